//! Plugin error types.

use std::path::PathBuf;

use luapack_core::LuapackError;
use luapack_runtime::RuntimeError;
use thiserror::Error;

/// Error type for plugin operations. All of them are fatal to the invocation.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No directory or remote module matches the plugin source.
    #[error("Plugin '{spec}' not found (searched: {searched})")]
    NotFound { spec: String, searched: String },

    /// Fetching a plugin source failed.
    #[error("Failed to fetch plugin source '{spec}': {reason}")]
    Fetch { spec: String, reason: String },

    /// The plugin root has no manifest.
    #[error("Plugin manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    /// Manifest parsing error.
    #[error("Failed to parse plugin manifest {}: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },

    /// The manifest version differs from the requested one.
    #[error(
        "Plugin '{name}' version mismatch: requested {requested}, but manifest declares {found}"
    )]
    VersionMismatch {
        name: String,
        requested: String,
        found: String,
    },

    /// Failed to read the plugin entry file.
    #[error("Failed to read plugin entry file {}: {source}", .path.display())]
    EntryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An interpreted plugin did not evaluate to a module table.
    #[error("Invalid plugin '{name}': {reason}")]
    InvalidPlugin { name: String, reason: String },

    /// Compiling a native plugin failed.
    #[error("Failed to build native plugin '{name}': {source}")]
    Build {
        name: String,
        #[source]
        source: LuapackError,
    },

    /// Opening a native plugin library failed.
    #[error("Failed to load native plugin from {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    /// The library does not export a compatible plugin constructor.
    #[error("Native plugin {} has an incompatible interface: {reason}", .path.display())]
    InvalidAbi { path: PathBuf, reason: String },

    /// Registering a plugin into the host failed.
    #[error("Failed to register plugin '{name}': {reason}")]
    Registration { name: String, reason: String },

    /// Two plugins resolve to the same registration name.
    #[error("Plugin name '{0}' is registered more than once; use an alias (alias=source) to rename one")]
    DuplicateName(String),

    /// Closing a plugin failed.
    #[error("Failed to close plugin '{name}': {reason}")]
    Close { name: String, reason: String },

    #[error(transparent)]
    Core(#[from] LuapackError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
