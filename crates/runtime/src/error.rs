//! Runtime error types.

use thiserror::Error;

/// Error type for the embedded runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Interpreter error.
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    /// The main script raised an error.
    #[error("Script {chunk} failed: {source}")]
    Script {
        chunk: String,
        #[source]
        source: mlua::Error,
    },

    /// A plugin failed to register its module.
    #[error("Failed to register plugin '{name}': {reason}")]
    Registration { name: String, reason: String },

    /// No module is registered under this name.
    #[error("Module '{0}' is not registered")]
    NotRegistered(String),

    /// A module name was registered twice.
    #[error("Module '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
