//! Plugin manifest for metadata and loader selection.

use std::path::{Path, PathBuf};

use luapack_core::{NativeDependency, parse_dependencies};
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};

/// File name of the manifest at a plugin's root.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Plugin manifest containing metadata and the entry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name.
    pub name: String,

    /// Plugin version, compared byte for byte against requested versions.
    pub version: String,

    /// Loader strategy.
    #[serde(rename = "type")]
    pub kind: PluginKind,

    /// Entry file relative to the plugin root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Crates the plugin needs in the generated program, as `name` or `name@version`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// How a plugin is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    /// Lua source embedded into the program and evaluated by the interpreter.
    #[serde(rename = "lua", alias = "interpreted")]
    Interpreted,

    /// Rust source compiled by the host toolchain.
    #[serde(rename = "rust", alias = "native")]
    Native,
}

impl PluginKind {
    /// Entry file used when the manifest does not name one.
    pub fn default_entry(&self) -> &'static str {
        match self {
            PluginKind::Interpreted => "plugin.lua",
            PluginKind::Native => "plugin.rs",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Interpreted => "interpreted",
            PluginKind::Native => "native",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PluginManifest {
    /// Loads the manifest from a plugin root directory.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(PluginError::ManifestMissing(path));
        }
        Self::from_file(&path)
    }

    /// Loads a manifest from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|reason| PluginError::Manifest {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parses a manifest from JSON string.
    pub fn from_json(json: &str) -> std::result::Result<Self, String> {
        let manifest: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;
        if manifest.name.trim().is_empty() {
            return Err("`name` must not be empty".to_string());
        }
        if manifest.version.trim().is_empty() {
            return Err("`version` must not be empty".to_string());
        }
        Ok(manifest)
    }

    /// Converts the manifest to JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PluginError::Manifest {
            path: PathBuf::from(MANIFEST_FILE),
            reason: e.to_string(),
        })
    }

    /// Creates a minimal manifest with just name, version and kind.
    pub fn minimal(name: impl Into<String>, version: impl Into<String>, kind: PluginKind) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind,
            main: None,
            description: None,
            author: None,
            license: None,
            dependencies: Vec::new(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a declared dependency.
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Entry file name relative to the plugin root.
    pub fn entry_file(&self) -> &str {
        self.main
            .as_deref()
            .unwrap_or_else(|| self.kind.default_entry())
    }

    /// Declared dependencies, parsed.
    pub fn native_dependencies(&self) -> Result<Vec<NativeDependency>> {
        Ok(parse_dependencies(self.dependencies.iter().map(String::as_str))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let json = r#"{
            "name": "fs",
            "version": "1.0.0",
            "type": "lua",
            "description": "File system helpers",
            "author": "Jane",
            "license": "MIT",
            "dependencies": ["walkdir@2"]
        }"#;

        let manifest = PluginManifest::from_json(json).unwrap();
        assert_eq!(manifest.name, "fs");
        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.kind, PluginKind::Interpreted);
        assert_eq!(manifest.entry_file(), "plugin.lua");
        assert_eq!(manifest.description.as_deref(), Some("File system helpers"));

        let deps = manifest.native_dependencies().unwrap();
        assert_eq!(deps[0].name, "walkdir");
        assert_eq!(deps[0].version, "2");
    }

    #[test]
    fn test_kind_aliases() {
        for (kind, expected) in [
            ("lua", PluginKind::Interpreted),
            ("interpreted", PluginKind::Interpreted),
            ("rust", PluginKind::Native),
            ("native", PluginKind::Native),
        ] {
            let json = format!(r#"{{"name": "x", "version": "1", "type": "{kind}"}}"#);
            assert_eq!(PluginManifest::from_json(&json).unwrap().kind, expected);
        }

        assert!(PluginManifest::from_json(r#"{"name": "x", "version": "1", "type": "go"}"#).is_err());
    }

    #[test]
    fn test_native_entry_and_override() {
        let manifest = PluginManifest::minimal("db", "0.1.0", PluginKind::Native);
        assert_eq!(manifest.entry_file(), "plugin.rs");

        let json = r#"{"name": "db", "version": "0.1.0", "type": "rust", "main": "src/lib.rs"}"#;
        assert_eq!(PluginManifest::from_json(json).unwrap().entry_file(), "src/lib.rs");
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(PluginManifest::from_json(r#"{"name": "x", "type": "lua"}"#).is_err());
        assert!(PluginManifest::from_json(r#"{"name": "", "version": "1", "type": "lua"}"#).is_err());
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = PluginManifest::load(dir.path()).unwrap_err();
        assert!(matches!(err, PluginError::ManifestMissing(_)));
    }

    #[test]
    fn test_serialize_manifest() {
        let manifest = PluginManifest::minimal("test", "1.0.0", PluginKind::Interpreted)
            .with_description("demo")
            .with_dependency("regex@1");
        let json = manifest.to_json().unwrap();
        assert!(json.contains("\"name\": \"test\""));
        assert!(json.contains("\"type\": \"lua\""));
        assert!(!json.contains("\"main\""));
        assert_eq!(PluginManifest::from_json(&json).unwrap(), manifest);
    }
}
