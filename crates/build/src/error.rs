//! Build pipeline error types.

use std::path::PathBuf;

use luapack_bundler::BundleError;
use luapack_core::LuapackError;
use luapack_plugin::PluginError;
use miette::Diagnostic;
use thiserror::Error;

/// Error type for a build. Every variant names the step that failed.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    /// Project configuration could not be read or is invalid.
    #[error("Invalid project configuration {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    /// Loading the requested plugins failed.
    #[error("Failed to load plugins: {0}")]
    Plugins(#[source] PluginError),

    /// Plugin loading did not finish in time.
    #[error("Plugin loading timed out after {secs}s")]
    PluginTimeout { secs: u64 },

    /// Resolving the script's module graph failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Bundle(#[from] BundleError),

    /// The script requires built-in modules but no bridge crate is configured.
    #[error("Script requires built-in module(s) {} but no bridge crate is configured", .modules.join(", "))]
    #[diagnostic(help("add a `bridges` entry to luapack.json"))]
    MissingBridges { modules: Vec<String> },

    /// Rendering the generated program failed.
    #[error("Failed to generate host program: {0}")]
    CodeGen(String),

    /// The build directory could not be created or written.
    #[error("Failed to prepare build directory {}: {source}", .path.display())]
    BuildDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `cargo generate-lockfile` failed.
    #[error("Dependency resolution failed: {0}")]
    Dependencies(#[source] LuapackError),

    /// The compiler failed for one target.
    #[error("Compilation for {target} failed: {source}")]
    Compile {
        target: String,
        #[source]
        source: LuapackError,
    },

    /// The compiler succeeded without producing the expected binary.
    #[error("Compiler produced no artifact at {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// Moving an artifact to its output path failed.
    #[error("Failed to write output {}: {source}", .path.display())]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] LuapackError),
}

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
