//! Plugins written in Rust, built as shared libraries and loaded dynamically.

use std::collections::HashMap;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use luapack_core::{Cargo, DependencySource, NativeDependency, to_identifier};
use luapack_runtime::{ABI_SYMBOL, ABI_VERSION, CREATE_SYMBOL, HostState, NativePlugin, PluginCreate};
use tracing::{debug, info};

use crate::error::{PluginError, Result};
use crate::manifest::PluginManifest;

/// Configuration passed to `rustc` when building loadable plugins.
pub const DYLIB_CFG: &str = "luapack_dylib";

/// Everything needed to build a native plugin.
#[derive(Debug, Clone)]
pub struct NativeBuildOptions {
    pub cargo: Cargo,

    /// Where the plugin's `luapack-runtime` dependency comes from.
    pub runtime: DependencySource,

    /// Scratch space for generated crates and build output.
    pub work_dir: PathBuf,

    /// Persistent artifact cache. `None` disables caching.
    pub cache_dir: Option<PathBuf>,
}

/// A native plugin loaded from a shared library.
pub struct NativeModule {
    name: String,
    manifest: PluginManifest,
    entry: PathBuf,
    artifact: PathBuf,
    // Dropped before `library`; the plugin's code lives in it.
    plugin: Option<Box<dyn NativePlugin>>,
    library: Option<Library>,
}

impl NativeBuildOptions {
    /// Default artifact cache: `<user cache>/luapack/native`.
    pub fn default_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("luapack").join("native"))
    }
}

impl NativeModule {
    /// Builds the plugin (or reuses a cached build) and opens it.
    pub async fn load(
        name: impl Into<String>,
        root: &Path,
        manifest: PluginManifest,
        options: &NativeBuildOptions,
    ) -> Result<Self> {
        let name = name.into();
        let entry = root.join(manifest.entry_file());
        let source = std::fs::read_to_string(&entry).map_err(|source| PluginError::EntryRead {
            path: entry.clone(),
            source,
        })?;
        let dependencies = manifest.native_dependencies()?;

        let artifact = build_artifact(&manifest, &entry, &source, &dependencies, options)
            .await
            .map_err(|source| PluginError::Build {
                name: name.clone(),
                source,
            })?;

        let (library, plugin) = open(&artifact)?;
        info!(
            plugin = %name,
            version = plugin.version(),
            artifact = %artifact.display(),
            "loaded native plugin"
        );

        Ok(Self {
            name,
            manifest,
            entry,
            artifact,
            plugin: Some(plugin),
            library: Some(library),
        })
    }

    /// Registration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// The plugin's Rust source file.
    pub fn entry(&self) -> &Path {
        &self.entry
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Name the plugin registers its module under.
    pub fn module_name(&self) -> &str {
        self.plugin
            .as_ref()
            .map(|p| p.name())
            .unwrap_or(&self.manifest.name)
    }

    pub fn version(&self) -> &str {
        self.plugin
            .as_ref()
            .map(|p| p.version())
            .unwrap_or(&self.manifest.version)
    }

    pub fn description(&self) -> String {
        match &self.plugin {
            Some(plugin) if !plugin.description().is_empty() => plugin.description().to_string(),
            _ => self.manifest.description.clone().unwrap_or_default(),
        }
    }

    /// Dependencies the plugin reports about itself.
    pub fn own_dependencies(&self) -> Vec<String> {
        self.plugin
            .as_ref()
            .map(|p| p.dependencies())
            .unwrap_or_default()
    }

    /// Lets the plugin install its module, then exposes it under the registration name.
    pub fn register(&self, host: &HostState) -> Result<()> {
        let plugin = self.plugin.as_ref().ok_or_else(|| PluginError::Registration {
            name: self.name.clone(),
            reason: "plugin is closed".to_string(),
        })?;

        plugin
            .register(host)
            .and_then(|()| host.alias(plugin.name(), &self.name))
            .map_err(|e| PluginError::Registration {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        debug!(plugin = %self.name, "registered native plugin");
        Ok(())
    }

    /// Calls the plugin's `close` and unloads the library.
    pub fn close(&mut self) -> Result<()> {
        let result = match self.plugin.as_mut() {
            Some(plugin) => plugin.close().map_err(|e| PluginError::Close {
                name: self.name.clone(),
                reason: e.to_string(),
            }),
            None => Ok(()),
        };
        self.plugin = None;
        self.library = None;
        result
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        self.plugin = None;
        self.library = None;
    }
}

impl std::fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field("artifact", &self.artifact)
            .field("loaded", &self.library.is_some())
            .finish()
    }
}

/// Library file name produced for a plugin crate.
fn library_file(manifest: &PluginManifest) -> String {
    format!("{DLL_PREFIX}{}{DLL_SUFFIX}", library_name(manifest))
}

fn library_name(manifest: &PluginManifest) -> String {
    format!("luapack_plugin_{}", to_identifier(&manifest.name))
}

/// Cache key over everything that affects the built library.
pub fn fingerprint(
    source: &str,
    dependencies: &[NativeDependency],
    runtime: &DependencySource,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&ABI_VERSION.to_le_bytes());
    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    hasher.update(source.as_bytes());
    for dep in dependencies {
        hasher.update(b"\0");
        hasher.update(dep.to_string().as_bytes());
    }
    hasher.update(b"\0");
    hasher.update(runtime.to_toml().to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// `Cargo.toml` of the scratch `cdylib` crate wrapping a plugin entry file.
pub fn dylib_manifest(
    manifest: &PluginManifest,
    entry: &Path,
    dependencies: &[NativeDependency],
    runtime: &DependencySource,
) -> std::result::Result<String, toml::ser::Error> {
    let mut package = toml::Table::new();
    package.insert(
        "name".into(),
        library_name(manifest).replace('_', "-").into(),
    );
    package.insert("version".into(), "0.0.0".into());
    package.insert("edition".into(), "2024".into());
    package.insert("publish".into(), false.into());

    let mut lib = toml::Table::new();
    lib.insert("name".into(), library_name(manifest).into());
    lib.insert("path".into(), entry.to_string_lossy().replace('\\', "/").into());
    lib.insert(
        "crate-type".into(),
        toml::Value::Array(vec!["cdylib".into()]),
    );

    let mut deps = toml::Table::new();
    for dep in dependencies {
        deps.insert(dep.name.clone(), dep.to_toml());
    }
    deps.insert("luapack-runtime".into(), runtime.to_toml());

    let mut check_cfg = toml::Table::new();
    check_cfg.insert("level".into(), "warn".into());
    check_cfg.insert(
        "check-cfg".into(),
        toml::Value::Array(vec![format!("cfg({DYLIB_CFG})").into()]),
    );
    let mut rust_lints = toml::Table::new();
    rust_lints.insert("unexpected_cfgs".into(), check_cfg.into());
    let mut lints = toml::Table::new();
    lints.insert("rust".into(), rust_lints.into());

    let mut doc = toml::Table::new();
    doc.insert("package".into(), package.into());
    doc.insert("lib".into(), lib.into());
    doc.insert("dependencies".into(), deps.into());
    doc.insert("lints".into(), lints.into());
    doc.insert("workspace".into(), toml::Table::new().into());

    toml::to_string(&doc)
}

async fn build_artifact(
    manifest: &PluginManifest,
    entry: &Path,
    source: &str,
    dependencies: &[NativeDependency],
    options: &NativeBuildOptions,
) -> luapack_core::Result<PathBuf> {
    let file = library_file(manifest);
    let key = fingerprint(source, dependencies, &options.runtime);
    let cached = options
        .cache_dir
        .as_ref()
        .map(|dir| dir.join(&key).join(&file));

    if let Some(cached) = &cached {
        if cached.is_file() {
            debug!(plugin = %manifest.name, artifact = %cached.display(), "using cached native plugin");
            return Ok(cached.clone());
        }
    }

    let crate_dir = options
        .work_dir
        .join("native")
        .join(to_identifier(&manifest.name));
    std::fs::create_dir_all(&crate_dir)?;
    let cargo_toml = dylib_manifest(manifest, entry, dependencies, &options.runtime)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    std::fs::write(crate_dir.join("Cargo.toml"), cargo_toml)?;

    let target_dir = options.work_dir.join("native-target");
    let mut rustflags = std::env::var("RUSTFLAGS").unwrap_or_default();
    if !rustflags.is_empty() {
        rustflags.push(' ');
    }
    rustflags.push_str(&format!("--cfg {DYLIB_CFG}"));
    let env = HashMap::from([("RUSTFLAGS".to_string(), rustflags)]);

    info!(plugin = %manifest.name, "building native plugin");
    let target_arg = target_dir.display().to_string();
    options
        .cargo
        .run_checked(
            ["build", "--release", "--lib", "--target-dir", target_arg.as_str()],
            &crate_dir,
            &env,
        )
        .await?;

    let built = target_dir.join("release").join(&file);
    match cached {
        Some(cached) => {
            let stored = cached
                .parent()
                .map(std::fs::create_dir_all)
                .transpose()
                .and_then(|_| std::fs::copy(&built, &cached));
            match stored {
                Ok(_) => Ok(cached),
                Err(e) => {
                    debug!(error = %e, "native plugin cache unavailable");
                    Ok(built)
                }
            }
        }
        None => Ok(built),
    }
}

/// Opens a plugin library, checks its interface version and constructs the plugin.
fn open(artifact: &Path) -> Result<(Library, Box<dyn NativePlugin>)> {
    let invalid = |reason: String| PluginError::InvalidAbi {
        path: artifact.to_path_buf(),
        reason,
    };

    // SAFETY: loading runs the library's initializers; the library was
    // built from plugin source by this process.
    let library = unsafe { Library::new(artifact) }.map_err(|e| PluginError::Load {
        path: artifact.to_path_buf(),
        reason: e.to_string(),
    })?;

    let abi = {
        // SAFETY: the marker is declared as `static LUAPACK_PLUGIN_ABI: u32`.
        let symbol: Symbol<*const u32> = unsafe { library.get(ABI_SYMBOL) }
            .map_err(|e| invalid(format!("missing LUAPACK_PLUGIN_ABI marker: {e}")))?;
        unsafe { **symbol }
    };
    if abi != ABI_VERSION {
        return Err(invalid(format!(
            "built for plugin interface {abi}, expected {ABI_VERSION}"
        )));
    }

    let create: PluginCreate = {
        // SAFETY: the ABI marker matched, so the constructor has the
        // signature `declare_plugin!` exports.
        let symbol: Symbol<PluginCreate> = unsafe { library.get(CREATE_SYMBOL) }
            .map_err(|e| invalid(format!("missing luapack_plugin_create constructor: {e}")))?;
        *symbol
    };

    let plugin = create();
    Ok((library, plugin))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::manifest::PluginKind;

    fn manifest() -> PluginManifest {
        PluginManifest::minimal("lua-db", "0.2.0", PluginKind::Native).with_dependency("rusqlite@0.31")
    }

    #[test]
    fn test_dylib_manifest() {
        let manifest = manifest();
        let deps = manifest.native_dependencies().unwrap();
        let runtime = DependencySource::path("/src/luapack/crates/runtime");
        let text = dylib_manifest(&manifest, Path::new("/plugins/db/plugin.rs"), &deps, &runtime)
            .unwrap();
        let doc: toml::Table = toml::from_str(&text).unwrap();

        assert_eq!(doc["package"]["name"].as_str(), Some("luapack-plugin-lua-db"));
        assert_eq!(doc["lib"]["name"].as_str(), Some("luapack_plugin_lua_db"));
        assert_eq!(doc["lib"]["path"].as_str(), Some("/plugins/db/plugin.rs"));
        assert_eq!(doc["lib"]["crate-type"][0].as_str(), Some("cdylib"));
        assert_eq!(doc["dependencies"]["rusqlite"].as_str(), Some("0.31"));
        assert_eq!(
            doc["dependencies"]["luapack-runtime"]["path"].as_str(),
            Some("/src/luapack/crates/runtime")
        );
        assert_eq!(
            doc["lints"]["rust"]["unexpected_cfgs"]["check-cfg"][0].as_str(),
            Some("cfg(luapack_dylib)")
        );
        assert!(doc.contains_key("workspace"));
    }

    #[test]
    fn test_fingerprint_tracks_inputs() {
        let runtime = DependencySource::version("0.1.0");
        let deps = manifest().native_dependencies().unwrap();

        let base = fingerprint("fn a() {}", &deps, &runtime);
        assert_eq!(base, fingerprint("fn a() {}", &deps, &runtime));
        assert_ne!(base, fingerprint("fn b() {}", &deps, &runtime));
        assert_ne!(base, fingerprint("fn a() {}", &[], &runtime));
        assert_ne!(
            base,
            fingerprint("fn a() {}", &deps, &DependencySource::version("0.2.0"))
        );
    }

    #[tokio::test]
    async fn test_cached_artifact_skips_build() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let manifest = manifest();
        let source = "// plugin";
        std::fs::write(root.path().join("plugin.rs"), source).unwrap();

        let runtime = DependencySource::version("0.1.0");
        let deps = manifest.native_dependencies().unwrap();
        let cached = cache
            .path()
            .join(fingerprint(source, &deps, &runtime))
            .join(library_file(&manifest));
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"not a shared library").unwrap();

        let options = NativeBuildOptions {
            cargo: Cargo::with_program(work.path().join("no-such-cargo")),
            runtime,
            work_dir: work.path().to_path_buf(),
            cache_dir: Some(cache.path().to_path_buf()),
        };

        // The cached file is used as-is, so opening it is what fails.
        let err = NativeModule::load("db", root.path(), manifest, &options)
            .await
            .unwrap_err();
        match err {
            PluginError::Load { path, .. } => assert_eq!(path, cached),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn system_libc() -> Option<PathBuf> {
        [
            "/lib/x86_64-linux-gnu/libc.so.6",
            "/usr/lib/x86_64-linux-gnu/libc.so.6",
            "/lib/aarch64-linux-gnu/libc.so.6",
            "/usr/lib/aarch64-linux-gnu/libc.so.6",
            "/lib64/libc.so.6",
            "/usr/lib64/libc.so.6",
            "/usr/lib/libc.so.6",
            "/lib/libc.so.6",
        ]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
    }

    #[test]
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn test_library_without_marker_is_rejected() {
        let err = open(Path::new("libc.so.6")).err().unwrap();
        match err {
            PluginError::InvalidAbi { reason, .. } => {
                assert!(reason.contains("LUAPACK_PLUGIN_ABI"), "{reason}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    async fn test_cached_library_without_marker_fails_load() {
        let Some(libc) = system_libc() else {
            return;
        };
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let manifest = manifest();
        let source = "// plugin";
        std::fs::write(root.path().join("plugin.rs"), source).unwrap();

        let runtime = DependencySource::version("0.1.0");
        let deps = manifest.native_dependencies().unwrap();
        let cached = cache
            .path()
            .join(fingerprint(source, &deps, &runtime))
            .join(library_file(&manifest));
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        // A link keeps the loader from mapping a second copy of libc.
        std::os::unix::fs::symlink(&libc, &cached).unwrap();

        let options = NativeBuildOptions {
            cargo: Cargo::with_program(work.path().join("no-such-cargo")),
            runtime,
            work_dir: work.path().to_path_buf(),
            cache_dir: Some(cache.path().to_path_buf()),
        };

        let err = NativeModule::load("db", root.path(), manifest, &options)
            .await
            .unwrap_err();
        match err {
            PluginError::InvalidAbi { path, reason } => {
                assert_eq!(path, cached);
                assert!(reason.contains("missing LUAPACK_PLUGIN_ABI marker"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_build_failure_names_plugin() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("plugin.rs"), "fn broken(").unwrap();

        let options = NativeBuildOptions {
            cargo: Cargo::with_program(work.path().join("no-such-cargo")),
            runtime: DependencySource::version("0.1.0"),
            work_dir: work.path().to_path_buf(),
            cache_dir: None,
        };

        let err = NativeModule::load("db", root.path(), manifest(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Build { ref name, .. } if name == "db"));
        assert!(work.path().join("native/lua_db/Cargo.toml").is_file());
    }
}
