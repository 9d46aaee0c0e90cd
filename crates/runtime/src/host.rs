//! The host interpreter handle.

use mlua::{Function, Lua, MultiValue, Table, Value};
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};
use crate::plugin::NativePlugin;

/// One embedded interpreter and the plugins registered into it.
///
/// Every registration call takes the host explicitly, so independent hosts in
/// one process never share module state.
pub struct HostState {
    lua: Lua,
    plugins: Vec<Box<dyn NativePlugin>>,
}

impl HostState {
    pub fn new() -> Self {
        Self {
            lua: Lua::new(),
            plugins: Vec::new(),
        }
    }

    /// The underlying interpreter.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    fn preload_table(&self) -> Result<Table> {
        let package: Table = self.lua.globals().get("package")?;
        Ok(package.get("preload")?)
    }

    /// Installs a loader run the first time a script requires `name`.
    pub fn preload<F>(&self, name: &str, loader: F) -> Result<()>
    where
        F: Fn(&Lua) -> mlua::Result<Value> + Send + 'static,
    {
        let preload = self.preload_table()?;
        if preload.contains_key(name)? {
            return Err(RuntimeError::AlreadyRegistered(name.to_string()));
        }

        let function: Function = self
            .lua
            .create_function(move |lua, _args: MultiValue| loader(lua))?;
        preload.set(name, function)?;
        debug!(module = name, "registered preload");
        Ok(())
    }

    /// Registers a module whose value is the result of evaluating `source`.
    ///
    /// The source is evaluated lazily, on the first `require`, in its own
    /// environment: reads fall through to the host globals, writes stay in
    /// the module.
    pub fn preload_source(&self, name: &str, source: impl Into<String>) -> Result<()> {
        let source = source.into();
        let chunk_name = format!("={name}");
        self.preload(name, move |lua| {
            lua.load(source.as_str())
                .set_name(chunk_name.clone())
                .set_environment(sandbox(lua)?)
                .eval::<Value>()
        })
    }

    /// Makes the module registered as `name` also available as `alias`.
    pub fn alias(&self, name: &str, alias: &str) -> Result<()> {
        if name == alias {
            return Ok(());
        }
        let preload = self.preload_table()?;
        if preload.contains_key(alias)? {
            return Err(RuntimeError::AlreadyRegistered(alias.to_string()));
        }
        let loader: Value = preload.get(name)?;
        if loader.is_nil() {
            return Err(RuntimeError::NotRegistered(name.to_string()));
        }
        preload.set(alias, loader)?;
        Ok(())
    }

    /// Returns true when a loader for `name` is installed.
    pub fn is_preloaded(&self, name: &str) -> Result<bool> {
        Ok(self.preload_table()?.contains_key(name)?)
    }

    /// Registers a native plugin and keeps it alive for the lifetime of the host.
    pub fn register_plugin(&mut self, plugin: Box<dyn NativePlugin>) -> Result<()> {
        let name = plugin.name().to_string();
        plugin
            .register(self)
            .map_err(|e| RuntimeError::Registration {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        debug!(plugin = %name, version = plugin.version(), "registered native plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Runs a script. A leading `#` line is ignored.
    pub fn exec(&self, chunk_name: &str, source: &str) -> Result<()> {
        self.lua
            .load(skip_shebang(source))
            .set_name(format!("@{chunk_name}"))
            .exec()
            .map_err(|source| RuntimeError::Script {
                chunk: chunk_name.to_string(),
                source,
            })
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostState {
    fn drop(&mut self) {
        for plugin in self.plugins.iter_mut().rev() {
            if let Err(e) = plugin.close() {
                warn!(plugin = plugin.name(), error = %e, "failed to close plugin");
            }
        }
    }
}

/// A fresh global table backed by the host globals.
fn sandbox(lua: &Lua) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__index", lua.globals())?;
    env.set_metatable(Some(meta));
    Ok(env)
}

/// Blanks out a `#` first line, keeping line numbers intact.
fn skip_shebang(source: &str) -> &str {
    if source.starts_with('#') {
        match source.find('\n') {
            Some(end) => &source[end..],
            None => "",
        }
    } else {
        source
    }
}
