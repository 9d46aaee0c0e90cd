//! Luapack Core - Shared types and toolchain access for luapack.

mod dependency;
mod error;
pub mod modules;
mod spec;
mod target;
pub mod toolchain;

pub use dependency::{DependencySource, NativeDependency, parse_dependencies};
pub use error::{LuapackError, Result};
pub use modules::{BUILTIN_MODULES, builtin_module_names, is_builtin};
pub use spec::{LATEST, PluginSpec, SourceKind, is_identifier, to_identifier};
pub use target::{Arch, DEFAULT_CROSS_ARCH, Os, Target};
pub use toolchain::{Cargo, CommandOutput};
