//! Luapack Plugin - discovery, validation and loading of script plugins.
//!
//! A plugin is a directory with a `plugin.json` manifest and an entry file.
//! Interpreted plugins are Lua source embedded into the host program;
//! native plugins are Rust source built as a shared library while packaging
//! and compiled into the executable itself.

mod discovery;
mod error;
mod fetch;
mod loader;
mod manifest;
mod registry;
mod version;

pub use discovery::{discover, resolve_spec, search_paths};
pub use error::{PluginError, Result};
pub use fetch::{Fetcher, copy_tree};
pub use loader::{
    DYLIB_CFG, InterpretedPlugin, LoadedPlugin, NativeBuildOptions, NativeModule, dylib_manifest,
    fingerprint,
};
pub use manifest::{MANIFEST_FILE, PluginKind, PluginManifest};
pub use registry::{PluginRegistry, RegistryOptions};
pub use version::check_version;
