//! Luapack Runtime - the interpreter host linked into packaged executables.
//!
//! Generated programs create one [`HostState`], register bridge modules and
//! plugins into it, then run the bundled script with [`HostState::exec`].
//! Native plugins implement [`NativePlugin`] and export themselves with
//! [`declare_plugin!`].

mod error;
mod host;
mod plugin;

pub use error::{Result, RuntimeError};
pub use host::HostState;
pub use plugin::{ABI_SYMBOL, ABI_VERSION, CREATE_SYMBOL, NativePlugin, PluginCreate};

pub use mlua;
