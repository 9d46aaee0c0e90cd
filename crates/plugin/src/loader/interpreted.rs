//! Plugins written in Lua.

use std::path::{Path, PathBuf};

use luapack_runtime::HostState;
use luapack_runtime::mlua::{Lua, Value};
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::manifest::PluginManifest;

/// A Lua plugin. Its source is kept verbatim; nothing runs at load time.
#[derive(Debug, Clone)]
pub struct InterpretedPlugin {
    name: String,
    manifest: PluginManifest,
    entry: PathBuf,
    source: String,
}

impl InterpretedPlugin {
    /// Reads the entry file named by the manifest.
    pub fn load(name: impl Into<String>, root: &Path, manifest: PluginManifest) -> Result<Self> {
        let entry = root.join(manifest.entry_file());
        let source = std::fs::read_to_string(&entry).map_err(|source| PluginError::EntryRead {
            path: entry.clone(),
            source,
        })?;

        Ok(Self {
            name: name.into(),
            manifest,
            entry,
            source,
        })
    }

    /// Registration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the source in a fresh interpreter and checks that it
    /// produces a module table.
    pub fn evaluate_isolated(&self) -> Result<()> {
        let lua = Lua::new();
        let value = lua
            .load(self.source.as_str())
            .set_name(format!("@{}", self.entry.display()))
            .eval::<Value>()
            .map_err(|e| PluginError::InvalidPlugin {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        match value {
            Value::Table(_) => Ok(()),
            other => Err(PluginError::InvalidPlugin {
                name: self.name.clone(),
                reason: format!("entry file must return a table, got {}", other.type_name()),
            }),
        }
    }

    /// Installs a preload hook into the host. The module is built from the
    /// source the first time a script requires it.
    pub fn register(&self, host: &HostState) -> Result<()> {
        self.evaluate_isolated()?;
        host.preload_source(&self.name, self.source.clone())
            .map_err(|e| PluginError::Registration {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        debug!(plugin = %self.name, "registered interpreted plugin");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::manifest::PluginKind;

    fn plugin(source: &str) -> (tempfile::TempDir, InterpretedPlugin) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.lua"), source).unwrap();
        let manifest = PluginManifest::minimal("greeter", "1.0.0", PluginKind::Interpreted);
        let plugin = InterpretedPlugin::load("greeter", dir.path(), manifest).unwrap();
        (dir, plugin)
    }

    #[test]
    fn test_load_keeps_source_verbatim() {
        let source = "-- greeter\nerror('must not run at load time')\n";
        let (_dir, plugin) = plugin(source);
        assert_eq!(plugin.source(), source);
        assert!(plugin.entry().ends_with("plugin.lua"));
    }

    #[test]
    fn test_missing_entry_file() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = PluginManifest {
            main: Some("lib/main.lua".to_string()),
            ..PluginManifest::minimal("x", "1", PluginKind::Interpreted)
        };
        let err = InterpretedPlugin::load("x", dir.path(), manifest).unwrap_err();
        assert!(matches!(err, PluginError::EntryRead { .. }));
    }

    #[test]
    fn test_register_is_lazy_and_isolated() {
        let (_dir, plugin) = plugin(
            "hits = (hits or 0) + 1\nreturn { hello = function(n) return 'hello ' .. n end }",
        );
        let host = HostState::new();
        plugin.register(&host).unwrap();

        let globals = host.lua().globals();
        assert!(globals.get::<Option<i64>>("hits").unwrap().is_none());

        host.exec("main.lua", "greeting = require('greeter').hello('lua')")
            .unwrap();
        assert_eq!(globals.get::<String>("greeting").unwrap(), "hello lua");
        assert!(globals.get::<Option<i64>>("hits").unwrap().is_none());
    }

    #[test]
    fn test_non_table_module_rejected() {
        let (_dir, plugin) = plugin("return 42");
        let err = plugin.register(&HostState::new()).unwrap_err();
        assert!(err.to_string().contains("must return a table, got integer"));
    }

    #[test]
    fn test_syntax_error_rejected() {
        let (_dir, plugin) = plugin("return {");
        assert!(matches!(
            plugin.evaluate_isolated(),
            Err(PluginError::InvalidPlugin { .. })
        ));
    }
}
