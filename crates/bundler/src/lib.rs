//! Luapack Bundler - resolves `require` graphs and inlines local modules.

mod bundle;
mod error;
mod graph;
mod resolver;
mod scanner;

pub use bundle::{Bundle, BundleMode, Bundler, LUA_STANDARD_LIBRARIES, resolve};
pub use error::{BundleError, Result};
pub use graph::{ModuleGraph, ModuleNode};
pub use resolver::{candidates, module_id, resolve_reference};
pub use scanner::{RequireCall, scan_requires};
