//! The per-invocation plugin registry.

use std::collections::HashSet;
use std::path::PathBuf;

use luapack_core::{Cargo, DependencySource, NativeDependency, PluginSpec};
use luapack_runtime::HostState;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::discovery::resolve_spec;
use crate::error::{PluginError, Result};
use crate::fetch::Fetcher;
use crate::loader::{InterpretedPlugin, LoadedPlugin, NativeBuildOptions, NativeModule};
use crate::manifest::PluginManifest;
use crate::version::check_version;

/// Settings for a [`PluginRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Directory short names and relative paths are resolved against.
    pub base_dir: PathBuf,

    pub cargo: Cargo,

    /// Where native plugins get `luapack-runtime` from.
    pub runtime: DependencySource,

    /// Native plugin artifact cache. `None` disables caching.
    pub cache_dir: Option<PathBuf>,
}

/// Loads, validates and registers the plugins of one build or run.
///
/// Owns a temporary working directory holding every fetched plugin tree. The
/// registry is closed once, explicitly or when dropped.
pub struct PluginRegistry {
    // Plugins are dropped before the directory their libraries live in.
    plugins: Vec<LoadedPlugin>,
    specs: Vec<PluginSpec>,
    work_dir: TempDir,
    options: RegistryOptions,
    closed: bool,
}

impl RegistryOptions {
    pub fn new(base_dir: impl Into<PathBuf>, cargo: Cargo) -> Self {
        Self {
            base_dir: base_dir.into(),
            cargo,
            runtime: DependencySource::version(env!("CARGO_PKG_VERSION")),
            cache_dir: NativeBuildOptions::default_cache_dir(),
        }
    }

    pub fn with_runtime(mut self, runtime: DependencySource) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = cache_dir;
        self
    }
}

impl PluginRegistry {
    pub fn new(options: RegistryOptions) -> Result<Self> {
        let work_dir = tempfile::Builder::new().prefix("luapack-plugins-").tempdir()?;
        Ok(Self {
            options,
            work_dir,
            specs: Vec::new(),
            plugins: Vec::new(),
            closed: false,
        })
    }

    /// Discovers, fetches, validates and loads every spec in order.
    ///
    /// The first failure stops loading; plugins loaded so far stay owned by
    /// the registry and are closed with it.
    pub async fn load_plugins(&mut self, specs: &[PluginSpec]) -> Result<()> {
        let fetcher = Fetcher::new(
            self.options.cargo.clone(),
            &self.options.base_dir,
            self.work_dir.path(),
        );
        let native = NativeBuildOptions {
            cargo: self.options.cargo.clone(),
            runtime: self.options.runtime.clone(),
            work_dir: self.work_dir.path().join("build"),
            cache_dir: self.options.cache_dir.clone(),
        };

        for spec in specs {
            let spec = resolve_spec(spec.clone(), &self.options.base_dir);
            let root = fetcher.fetch(&spec).await?;
            let manifest = PluginManifest::load(&root)?;
            check_version(&spec, &manifest)?;

            let name = spec
                .alias
                .clone()
                .unwrap_or_else(|| manifest.name.clone());
            if self.plugins.iter().any(|p| p.name() == name) {
                return Err(PluginError::DuplicateName(name));
            }

            let plugin = LoadedPlugin::load(&name, &root, manifest, &native).await?;
            info!(
                plugin = %name,
                version = plugin.version(),
                kind = %plugin.kind(),
                "loaded plugin"
            );

            self.specs.push(spec);
            self.plugins.push(plugin);
        }

        Ok(())
    }

    /// Registers every plugin into `host` in load order, stopping at the first failure.
    pub fn register_all(&self, host: &HostState) -> Result<()> {
        for plugin in &self.plugins {
            plugin.register(host)?;
        }
        Ok(())
    }

    /// Closes every plugin, in reverse load order. Later calls do nothing.
    ///
    /// Every plugin is closed even if one fails; the first error is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        for plugin in self.plugins.iter_mut().rev() {
            if let Err(e) = plugin.close() {
                warn!(plugin = plugin.name(), error = %e, "failed to close plugin");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Specs as resolved by discovery, in load order.
    pub fn specs(&self) -> &[PluginSpec] {
        &self.specs
    }

    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Every module name the loaded plugins make requirable, in load order.
    pub fn available_modules(&self) -> Vec<String> {
        self.plugins.iter().flat_map(LoadedPlugin::module_names).collect()
    }

    /// Union of every plugin's dependencies, first declaration winning per crate.
    pub fn dependencies(&self) -> Result<Vec<NativeDependency>> {
        let mut seen = HashSet::new();
        let mut union: Vec<NativeDependency> = Vec::new();

        for plugin in &self.plugins {
            for dep in plugin.dependencies()? {
                if seen.insert(dep.name.clone()) {
                    union.push(dep);
                } else if let Some(existing) = union.iter().find(|d| d.name == dep.name) {
                    if existing.version != dep.version {
                        warn!(
                            dependency = %dep.name,
                            kept = %existing.version,
                            ignored = %dep.version,
                            plugin = plugin.name(),
                            "conflicting dependency versions"
                        );
                    }
                }
            }
        }

        Ok(union)
    }

    pub fn interpreted(&self) -> impl Iterator<Item = &InterpretedPlugin> {
        self.plugins.iter().filter_map(|p| match p {
            LoadedPlugin::Interpreted(plugin) => Some(plugin),
            LoadedPlugin::Native(_) => None,
        })
    }

    pub fn native(&self) -> impl Iterator<Item = &NativeModule> {
        self.plugins.iter().filter_map(|p| match p {
            LoadedPlugin::Native(plugin) => Some(plugin),
            LoadedPlugin::Interpreted(_) => None,
        })
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close plugin registry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::path::Path;

    fn write_plugin(dir: &Path, name: &str, version: &str, source: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("plugin.json"),
            format!(
                r#"{{"name": "{name}", "version": "{version}", "type": "lua", "dependencies": ["regex@1"]}}"#
            ),
        )
        .unwrap();
        fs::write(dir.join("plugin.lua"), source).unwrap();
    }

    fn registry(base: &Path) -> PluginRegistry {
        let options = RegistryOptions::new(base, Cargo::with_program("cargo")).with_cache_dir(None);
        PluginRegistry::new(options).unwrap()
    }

    fn specs(raw: &[&str]) -> Vec<PluginSpec> {
        raw.iter().map(|s| PluginSpec::parse(s).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_version_mismatch_names_both_versions() {
        let base = tempfile::tempdir().unwrap();
        write_plugin(&base.path().join("plugins/fs"), "fs", "2.0.0", "return {}");

        let mut registry = registry(base.path());
        let err = registry
            .load_plugins(&specs(&["fs@1.0.0"]))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(matches!(err, PluginError::VersionMismatch { .. }));
        assert!(message.contains("1.0.0"));
        assert!(message.contains("2.0.0"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_exact_and_latest_versions_load() {
        let base = tempfile::tempdir().unwrap();
        write_plugin(&base.path().join("plugins/fs"), "fs", "2.0.0", "return {}");
        write_plugin(&base.path().join("kv-plugin"), "store", "0.1.0", "return {}");

        let mut registry = registry(base.path());
        registry
            .load_plugins(&specs(&["fs@2.0.0", "kv"]))
            .await
            .unwrap();

        assert_eq!(registry.available_modules(), vec!["fs", "store"]);
        assert_eq!(registry.interpreted().count(), 2);
        assert_eq!(registry.native().count(), 0);
        assert!(registry.specs()[1].source.ends_with("kv-plugin"));
    }

    #[tokio::test]
    async fn test_register_all_and_require() {
        let base = tempfile::tempdir().unwrap();
        write_plugin(
            &base.path().join("greeter"),
            "greeter",
            "1.0.0",
            "return { greet = function(who) return 'hi ' .. who end }",
        );

        let mut registry = registry(base.path());
        registry
            .load_plugins(&specs(&["hello=./greeter@1.0.0"]))
            .await
            .unwrap();
        assert_eq!(registry.available_modules(), vec!["hello"]);

        let host = HostState::new();
        registry.register_all(&host).unwrap();
        host.exec("main.lua", "out = require('hello').greet('bob')")
            .unwrap();
        assert_eq!(host.lua().globals().get::<String>("out").unwrap(), "hi bob");
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let base = tempfile::tempdir().unwrap();
        write_plugin(&base.path().join("a"), "util", "1.0.0", "return {}");
        write_plugin(&base.path().join("b"), "util", "1.0.0", "return {}");

        let mut registry = registry(base.path());
        let err = registry
            .load_plugins(&specs(&["./a", "./b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::DuplicateName(ref name) if name == "util"));

        // An alias resolves the clash.
        let mut registry = self::registry(base.path());
        registry
            .load_plugins(&specs(&["./a", "util2=./b"]))
            .await
            .unwrap();
        assert_eq!(registry.available_modules(), vec!["util", "util2"]);
    }

    #[tokio::test]
    async fn test_registration_failure_aborts_batch() {
        let base = tempfile::tempdir().unwrap();
        write_plugin(&base.path().join("bad"), "bad", "1.0.0", "return 'not a table'");
        write_plugin(&base.path().join("good"), "good", "1.0.0", "return {}");

        let mut registry = registry(base.path());
        registry
            .load_plugins(&specs(&["./bad", "./good"]))
            .await
            .unwrap();

        let host = HostState::new();
        let err = registry.register_all(&host).unwrap_err();
        assert!(err.to_string().contains("'bad'"));
        assert!(!host.is_preloaded("good").unwrap());
    }

    #[tokio::test]
    async fn test_dependencies_union() {
        let base = tempfile::tempdir().unwrap();
        write_plugin(&base.path().join("a"), "a", "1.0.0", "return {}");
        write_plugin(&base.path().join("b"), "b", "1.0.0", "return {}");

        let mut registry = registry(base.path());
        registry
            .load_plugins(&specs(&["./a", "./b"]))
            .await
            .unwrap();

        let deps = registry.dependencies().unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].to_string(), "regex@1");
    }

    #[tokio::test]
    async fn test_missing_manifest_is_fatal() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("plugins/empty")).unwrap();

        let mut registry = registry(base.path());
        let err = registry
            .load_plugins(&specs(&["empty"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::ManifestMissing(_)));
    }

    #[tokio::test]
    async fn test_close_once_and_work_dir_removed() {
        let base = tempfile::tempdir().unwrap();
        write_plugin(&base.path().join("plugins/fs"), "fs", "1.0.0", "return {}");

        let mut registry = registry(base.path());
        registry.load_plugins(&specs(&["fs"])).await.unwrap();
        let work_dir = registry.work_dir.path().to_path_buf();
        assert!(work_dir.join("plugins/fs/plugin.lua").is_file());

        registry.close().unwrap();
        assert!(registry.is_closed());
        registry.close().unwrap();

        drop(registry);
        assert!(!work_dir.exists());
    }
}
