//! Exact-version compatibility checks.

use luapack_core::PluginSpec;

use crate::error::{PluginError, Result};
use crate::manifest::PluginManifest;

/// Accepts any manifest version for `latest`, otherwise requires a byte-equal match.
pub fn check_version(spec: &PluginSpec, manifest: &PluginManifest) -> Result<()> {
    if spec.is_latest() || spec.version == manifest.version {
        return Ok(());
    }

    Err(PluginError::VersionMismatch {
        name: manifest.name.clone(),
        requested: spec.version.clone(),
        found: manifest.version.clone(),
    })
}
