//! Native plugin interface.

use crate::error::Result;
use crate::host::HostState;

/// Version of the native plugin binary interface.
///
/// A dynamically loaded plugin must export `LUAPACK_PLUGIN_ABI` with this value.
pub const ABI_VERSION: u32 = 1;

/// Name of the exported constructor of a dynamically built plugin.
pub const CREATE_SYMBOL: &[u8] = b"luapack_plugin_create";

/// Name of the exported ABI marker of a dynamically built plugin.
pub const ABI_SYMBOL: &[u8] = b"LUAPACK_PLUGIN_ABI";

/// Signature of the exported constructor.
pub type PluginCreate = fn() -> Box<dyn NativePlugin>;

/// A plugin compiled from Rust source.
///
/// The same source is used two ways: built as a shared library and loaded
/// while packaging, and compiled straight into the generated executable.
pub trait NativePlugin {
    /// Module name scripts `require`.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Crates the plugin needs, as `name` or `name@version`.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Installs the plugin's module into the host interpreter.
    fn register(&self, host: &HostState) -> Result<()>;

    /// Releases resources held by the plugin.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Exports a [`NativePlugin`] constructor.
///
/// Expands to a `luapack_plugin()` function used when the plugin is compiled
/// into an executable. Built with `--cfg luapack_dylib`, it also exports the
/// `luapack_plugin_create` constructor and the `LUAPACK_PLUGIN_ABI` marker.
///
/// ```ignore
/// struct Greeter;
///
/// impl luapack_runtime::NativePlugin for Greeter {
///     fn name(&self) -> &str { "greeter" }
///     fn version(&self) -> &str { "1.0.0" }
///     fn register(&self, host: &luapack_runtime::HostState) -> luapack_runtime::Result<()> {
///         host.preload_source("greeter", "return { hello = function() return 'hi' end }")
///     }
/// }
///
/// luapack_runtime::declare_plugin!(Greeter);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($ctor:expr) => {
        pub fn luapack_plugin() -> ::std::boxed::Box<dyn $crate::NativePlugin> {
            ::std::boxed::Box::new($ctor)
        }

        #[cfg(luapack_dylib)]
        #[unsafe(no_mangle)]
        pub static LUAPACK_PLUGIN_ABI: u32 = $crate::ABI_VERSION;

        #[cfg(luapack_dylib)]
        #[unsafe(no_mangle)]
        pub fn luapack_plugin_create() -> ::std::boxed::Box<dyn $crate::NativePlugin> {
            luapack_plugin()
        }
    };
}
