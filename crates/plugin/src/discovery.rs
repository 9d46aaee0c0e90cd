//! Discovery of plugins referenced by short name.

use std::path::{Path, PathBuf};

use luapack_core::{PluginSpec, SourceKind};
use tracing::debug;

/// Conventional plugin locations, relative to the project directory.
const SEARCH_PATTERNS: &[&str] = &[
    "plugins/{name}",
    "examples/plugins/{name}",
    "{name}-plugin",
    "examples/plugins/{name}-plugin",
];

/// Directories probed for a short plugin name, in order.
pub fn search_paths(name: &str, base_dir: &Path) -> Vec<PathBuf> {
    SEARCH_PATTERNS
        .iter()
        .map(|pattern| base_dir.join(pattern.replace("{name}", name)))
        .collect()
}

/// Returns the first existing directory for a short plugin name.
pub fn discover(name: &str, base_dir: &Path) -> Option<PathBuf> {
    search_paths(name, base_dir)
        .into_iter()
        .find(|candidate| candidate.is_dir())
}

/// Substitutes a discovered directory for a short-name source.
///
/// Specs that are not short names, or that match no directory, are returned
/// unchanged; fetching reports the missing plugin later.
pub fn resolve_spec(spec: PluginSpec, base_dir: &Path) -> PluginSpec {
    if spec.source_kind() != SourceKind::Short {
        return spec;
    }

    match discover(&spec.source, base_dir) {
        Some(dir) => {
            debug!(plugin = %spec.source, dir = %dir.display(), "discovered plugin");
            spec.with_source(dir.display().to_string())
        }
        None => spec,
    }
}
