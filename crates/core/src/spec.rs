//! Plugin specification strings.
//!
//! Grammar:
//!
//! ```text
//! spec    := [alias "="] source ["@" version]
//! alias   := identifier
//! source  := local-path | bare-name | module-reference
//! version := "latest" | exact-version-string
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LuapackError, Result};

/// Version string meaning "accept whatever the manifest declares".
pub const LATEST: &str = "latest";

/// A parsed plugin specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Name derived from the source (short name or last path segment).
    pub name: String,

    /// Registration name requested by the user, if any.
    pub alias: Option<String>,

    /// Filesystem path, short name or remote module reference.
    pub source: String,

    /// Requested version, `latest` when unspecified.
    pub version: String,
}

/// How a plugin source should be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A path on the local filesystem.
    Local,
    /// A remote module reference fetched through cargo.
    Remote,
    /// A bare name that discovery could not map to a directory.
    Short,
}

impl PluginSpec {
    /// Parses a raw specification string. Performs no I/O.
    ///
    /// # Examples
    /// ```
    /// use luapack_core::PluginSpec;
    ///
    /// let spec = PluginSpec::parse("myfs=./path/to/fs@2.0.0").unwrap();
    /// assert_eq!(spec.alias.as_deref(), Some("myfs"));
    /// assert_eq!(spec.source, "./path/to/fs");
    /// assert_eq!(spec.version, "2.0.0");
    /// assert_eq!(spec.registration_name(), "myfs");
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = |reason: &str| LuapackError::InvalidPluginSpec {
            spec: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty specification"));
        }

        let (alias, rest) = match raw.split_once('=') {
            Some((alias, rest)) => {
                let alias = alias.trim();
                if !is_identifier(alias) {
                    return Err(invalid("alias must be an identifier"));
                }
                (Some(alias.to_string()), rest.trim())
            }
            None => (None, raw),
        };

        let (source, version) = match rest.rsplit_once('@') {
            // `git@host:repo` style references keep their `@`
            Some((source, version)) if !version.contains(':') => {
                (source.trim(), version.trim())
            }
            _ => (rest, LATEST),
        };

        if source.is_empty() {
            return Err(invalid("missing plugin source"));
        }
        if version.is_empty() {
            return Err(invalid("empty version after '@'"));
        }

        Ok(Self {
            name: derive_name(source),
            alias,
            source: source.to_string(),
            version: version.to_string(),
        })
    }

    /// Name the plugin is exposed under to scripts before its manifest is read.
    pub fn registration_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Returns true when any manifest version is acceptable.
    pub fn is_latest(&self) -> bool {
        self.version.is_empty() || self.version == LATEST
    }

    /// Classifies the source string.
    pub fn source_kind(&self) -> SourceKind {
        SourceKind::classify(&self.source)
    }

    /// Replaces the source, keeping the rest of the spec.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{}=", alias)?;
        }
        write!(f, "{}", self.source)?;
        if !self.is_latest() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

impl SourceKind {
    /// Classifies a plugin source string.
    pub fn classify(source: &str) -> Self {
        if source.contains("://") || source.starts_with("git+") {
            return Self::Remote;
        }

        if source.starts_with('/')
            || source.starts_with("./")
            || source.starts_with("../")
            || source == "."
            || source == ".."
            || is_windows_absolute(source)
        {
            return Self::Local;
        }

        match source.split_once(['/', '\\']) {
            Some((first, _)) if first.contains('.') => Self::Remote,
            Some(_) => Self::Local,
            None => Self::Short,
        }
    }
}

/// Returns true for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Maps an arbitrary name onto a Rust/Lua identifier: lowercase ASCII,
/// other characters replaced by `_`, prefixed when it would start with a digit.
pub fn to_identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if !ident.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        ident.insert(0, '_');
    }
    ident
}

fn derive_name(source: &str) -> String {
    let trimmed = source.trim_end_matches(['/', '\\']);
    let last = trimmed
        .rsplit(['/', '\\', ':'])
        .find(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .unwrap_or(trimmed);
    last.trim_end_matches(".git").to_string()
}

fn is_windows_absolute(source: &str) -> bool {
    let bytes = source.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}
