//! Native dependencies of generated programs.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LuapackError, Result};

/// A crate dependency declared by a plugin, written as `name` or `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeDependency {
    pub name: String,
    pub version: String,
}

/// Where a crate is pulled from in a generated `Cargo.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

impl NativeDependency {
    /// Parses a dependency identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (name, version) = match raw.split_once('@') {
            Some((name, version)) => (name.trim(), version.trim()),
            None => (raw, "*"),
        };

        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_name || version.is_empty() {
            return Err(LuapackError::InvalidDependency(raw.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Registry source for this dependency.
    pub fn source(&self) -> DependencySource {
        DependencySource::version(&self.version)
    }

    /// Value of this dependency's entry in a `[dependencies]` table.
    pub fn to_toml(&self) -> toml::Value {
        toml::Value::String(self.version.clone())
    }
}

impl fmt::Display for NativeDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == "*" {
            f.write_str(&self.name)
        } else {
            write!(f, "{}@{}", self.name, self.version)
        }
    }
}

impl DependencySource {
    /// A crates.io version requirement.
    pub fn version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..Self::default()
        }
    }

    /// A local path dependency.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// A git dependency.
    pub fn git(url: impl Into<String>) -> Self {
        Self {
            git: Some(url.into()),
            ..Self::default()
        }
    }

    /// Pins a git dependency to a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Value of this source's entry in a `[dependencies]` table. A bare
    /// version renders as a string, anything else as an inline table.
    pub fn to_toml(&self) -> toml::Value {
        let only_version = self.path.is_none() && self.git.is_none();
        if let (Some(version), true) = (&self.version, only_version) {
            return toml::Value::String(version.clone());
        }

        let mut table = toml::Table::new();
        if let Some(version) = &self.version {
            table.insert("version".into(), version.clone().into());
        }
        if let Some(path) = &self.path {
            table.insert("path".into(), path.to_string_lossy().replace('\\', "/").into());
        }
        for (key, value) in [
            ("git", &self.git),
            ("tag", &self.tag),
            ("branch", &self.branch),
            ("rev", &self.rev),
        ] {
            if let Some(value) = value {
                table.insert(key.into(), value.clone().into());
            }
        }
        toml::Value::Table(table)
    }

    /// Turns relative paths into absolute ones so generated projects in
    /// temporary directories still find them.
    pub fn absolutize(mut self, base: &std::path::Path) -> Self {
        if let Some(path) = &self.path {
            if path.is_relative() {
                self.path = Some(base.join(path));
            }
        }
        self
    }
}

/// Parses a list of identifiers, keeping first-occurrence order and dropping duplicates.
pub fn parse_dependencies<'a, I>(raw: I) -> Result<Vec<NativeDependency>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut deps: Vec<NativeDependency> = Vec::new();
    for item in raw {
        let dep = NativeDependency::parse(item)?;
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    Ok(deps)
}
