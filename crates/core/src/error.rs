//! Error types for luapack.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for luapack core operations.
pub type Result<T> = std::result::Result<T, LuapackError>;

/// Main error type for the core crate.
#[derive(Debug, Error)]
pub enum LuapackError {
    #[error("Invalid plugin spec '{spec}': {reason}")]
    InvalidPluginSpec { spec: String, reason: String },

    #[error("Invalid native dependency '{0}'")]
    InvalidDependency(String),

    #[error("Unknown operating system '{0}' (expected linux, darwin or windows)")]
    UnknownOs(String),

    #[error("Unknown architecture '{0}' (expected amd64, arm64, 386 or arm)")]
    UnknownArch(String),

    #[error("Unsupported target {os}/{arch}")]
    UnsupportedTarget { os: String, arch: String },

    #[error("Cargo executable not found: {0}")]
    ToolchainNotFound(String),

    #[error("`{command}` failed{}\n{diagnostics}", exit_suffix(.exit_code))]
    ToolchainFailed {
        command: String,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("Failed to read file {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" with exit code {code}"),
        None => String::new(),
    }
}
