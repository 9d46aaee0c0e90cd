//! Luapack Build - turns a script and its plugins into native executables.
//!
//! A build loads the requested plugins, bundles the entry script, generates a
//! small Rust program embedding both and compiles it once per target.

pub mod codegen;
pub mod config;
mod error;
mod pipeline;
mod workspace;

pub use codegen::{HOST_BINARY, HostProgram, raw_string_literal};
pub use config::{BridgeConfig, CONFIG_FILE, ProjectConfig};
pub use error::{BuildError, Result};
pub use pipeline::{
    Artifact, BuildEvent, BuildReport, BuildRequest, BuildStage, EventCallback, Pipeline,
    Prepared, artifact_path,
};
pub use workspace::BuildDir;
