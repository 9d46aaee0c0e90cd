//! The build pipeline: plugins, bundling, code generation, compilation.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use luapack_bundler::{Bundle, Bundler};
use luapack_core::{Cargo, PluginSpec, Target, builtin_module_names, is_builtin};
use luapack_plugin::{LoadedPlugin, PluginKind, PluginRegistry, RegistryOptions};
use tracing::{debug, info, warn};

use crate::codegen::{HOST_BINARY, HostProgram};
use crate::config::ProjectConfig;
use crate::error::{BuildError, Result};
use crate::workspace::BuildDir;

/// States of one build. `Failed` is reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Init,
    PluginsLoaded,
    Bundled,
    CodeGenerated,
    DependenciesResolved,
    Compiled,
    Finalized,
    Failed,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Init => "init",
            BuildStage::PluginsLoaded => "plugins loaded",
            BuildStage::Bundled => "bundled",
            BuildStage::CodeGenerated => "code generated",
            BuildStage::DependenciesResolved => "dependencies resolved",
            BuildStage::Compiled => "compiled",
            BuildStage::Finalized => "finalized",
            BuildStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress reported while a build runs.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Stage(BuildStage),
    PluginLoaded {
        name: String,
        version: String,
        kind: PluginKind,
    },
    BuildDir(PathBuf),
    Compiling(Target),
    Artifact {
        target: Target,
        path: PathBuf,
    },
}

/// Callback receiving build events.
pub type EventCallback = Box<dyn Fn(&BuildEvent) + Send + Sync>;

/// What to build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub script: PathBuf,

    /// Output path without the executable suffix.
    pub output: PathBuf,

    pub targets: Vec<Target>,

    pub plugins: Vec<PluginSpec>,
}

impl BuildRequest {
    /// The request described by a project configuration.
    pub fn from_config(config: &ProjectConfig) -> Result<Self> {
        Ok(Self {
            script: config.entry.clone(),
            output: config.output_path(),
            targets: config.resolve_targets()?,
            plugins: config.plugin_specs()?,
        })
    }
}

/// A generated project, ready to compile.
pub struct Prepared {
    pub bundle: Bundle,
    pub program: HostProgram,
    registry: PluginRegistry,
    build_dir: BuildDir,
}

impl Prepared {
    pub fn build_dir(&self) -> &Path {
        self.build_dir.path()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }
}

/// A binary written to its output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub target: Target,
    pub path: PathBuf,
}

/// Outcome of a successful build.
#[derive(Debug)]
pub struct BuildReport {
    pub artifacts: Vec<Artifact>,

    /// The generated project, when it was kept.
    pub build_dir: Option<PathBuf>,

    /// Total build time in milliseconds.
    pub duration_ms: u64,
}

/// Runs builds for one project configuration.
pub struct Pipeline {
    config: ProjectConfig,
    base_dir: PathBuf,
    cargo: Option<Cargo>,
    cache_dir: Option<Option<PathBuf>>,
    keep_build_dir: bool,
    on_event: Option<EventCallback>,
}

impl Pipeline {
    /// Creates a pipeline resolving plugin paths against `base_dir`.
    pub fn new(config: ProjectConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
            cargo: None,
            cache_dir: None,
            keep_build_dir: false,
            on_event: None,
        }
    }

    /// Uses this cargo instead of the configured or located one.
    pub fn with_cargo(mut self, cargo: Cargo) -> Self {
        self.cargo = Some(cargo);
        self
    }

    /// Overrides the native plugin cache. `None` disables caching.
    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir);
        self
    }

    /// Keeps the generated project after the build.
    pub fn keep_build_dir(mut self, keep: bool) -> Self {
        self.keep_build_dir = keep;
        self
    }

    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BuildEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    fn emit(&self, event: BuildEvent) {
        if let Some(callback) = &self.on_event {
            callback(&event);
        }
    }

    fn cargo(&self) -> Result<Cargo> {
        match &self.cargo {
            Some(cargo) => Ok(cargo.clone()),
            None => self.config.cargo(),
        }
    }

    /// Loads plugins, bundles the script and writes the generated project.
    pub async fn prepare(&self, request: &BuildRequest) -> Result<Prepared> {
        self.emit(BuildEvent::Stage(BuildStage::Init));

        let registry = self.load_plugins(&request.plugins).await?;
        self.emit(BuildEvent::Stage(BuildStage::PluginsLoaded));

        let provided = registry.available_modules();
        let mut available: Vec<String> = builtin_module_names().collect();
        available.extend(provided.iter().cloned());
        let bundle = Bundler::new(available)
            .with_mode(self.config.bundle_mode)
            .bundle(&request.script)?;

        if self.config.bridges.is_none() {
            let missing: Vec<String> = bundle
                .graph
                .externals()
                .into_iter()
                .filter(|name| is_builtin(name) && !provided.iter().any(|p| p == name))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingBridges { modules: missing });
            }
        }
        debug!(
            script = %request.script.display(),
            modules = bundle.modules.len(),
            "bundled script"
        );
        self.emit(BuildEvent::Stage(BuildStage::Bundled));

        let program = self.generate(&request.script, &bundle, &registry)?;
        let build_dir = BuildDir::create(self.keep_build_dir)?;
        self.emit(BuildEvent::BuildDir(build_dir.path().to_path_buf()));

        for plugin in program.native() {
            build_dir.copy(&plugin.entry, Path::new("src").join(plugin.relative_path()))?;
        }
        build_dir.write("src/main.rs", &program.main_rs())?;
        let manifest = program
            .cargo_toml()
            .map_err(|e| BuildError::CodeGen(e.to_string()))?;
        build_dir.write("Cargo.toml", &manifest)?;
        debug!(dir = %build_dir.path().display(), "generated host program");
        self.emit(BuildEvent::Stage(BuildStage::CodeGenerated));

        Ok(Prepared {
            bundle,
            program,
            registry,
            build_dir,
        })
    }

    async fn load_plugins(&self, specs: &[PluginSpec]) -> Result<PluginRegistry> {
        let mut options = RegistryOptions::new(&self.base_dir, self.cargo()?)
            .with_runtime(self.config.runtime.clone());
        if let Some(cache_dir) = &self.cache_dir {
            options = options.with_cache_dir(cache_dir.clone());
        }

        let mut registry = PluginRegistry::new(options).map_err(BuildError::Plugins)?;
        if specs.is_empty() {
            return Ok(registry);
        }

        let timeout = self.config.plugin_timeout();
        match tokio::time::timeout(timeout, registry.load_plugins(specs)).await {
            Ok(loaded) => loaded.map_err(BuildError::Plugins)?,
            Err(_) => {
                return Err(BuildError::PluginTimeout {
                    secs: timeout.as_secs(),
                });
            }
        }

        for plugin in registry.plugins() {
            self.emit(BuildEvent::PluginLoaded {
                name: plugin.name().to_string(),
                version: plugin.version().to_string(),
                kind: plugin.kind(),
            });
        }
        Ok(registry)
    }

    fn generate(
        &self,
        script: &Path,
        bundle: &Bundle,
        registry: &PluginRegistry,
    ) -> Result<HostProgram> {
        let script_name = script
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "main.lua".to_string());

        let mut program = HostProgram::new(script_name, &bundle.source, self.config.runtime.clone())
            .with_bridges(self.config.bridges.clone())
            .with_dependencies(registry.dependencies().map_err(BuildError::Plugins)?);

        for plugin in registry.plugins() {
            match plugin {
                LoadedPlugin::Interpreted(plugin) => {
                    program.add_interpreted(plugin.name(), plugin.source())
                }
                LoadedPlugin::Native(plugin) => {
                    program.add_native(plugin.name(), plugin.module_name(), plugin.entry())
                }
            }
        }

        Ok(program)
    }

    /// Runs every step and writes one executable per target.
    ///
    /// Nothing is written to the output path unless every target compiled.
    pub async fn build(&self, request: &BuildRequest) -> Result<BuildReport> {
        let started = Instant::now();
        let result = self.run(request, started).await;
        if let Err(e) = &result {
            debug!(error = %e, "build failed");
            self.emit(BuildEvent::Stage(BuildStage::Failed));
        }
        result
    }

    async fn run(&self, request: &BuildRequest, started: Instant) -> Result<BuildReport> {
        if request.targets.is_empty() {
            return Err(BuildError::CodeGen("no target platform requested".to_string()));
        }

        let mut prepared = self.prepare(request).await?;
        let cargo = self.cargo()?;
        let dir = prepared.build_dir().to_path_buf();
        let env = HashMap::new();

        cargo
            .run_checked(["generate-lockfile"], &dir, &env)
            .await
            .map_err(BuildError::Dependencies)?;
        self.emit(BuildEvent::Stage(BuildStage::DependenciesResolved));

        let staging = dir.join("dist");
        let multiple = request.targets.len() > 1;
        let mut staged = Vec::new();

        for target in &request.targets {
            self.emit(BuildEvent::Compiling(*target));
            let built = self.compile(&cargo, &dir, target, &env).await?;

            let destination = artifact_path(&request.output, target, multiple);
            let file_name = destination
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(HOST_BINARY));
            let staged_path = staging.join(file_name);
            prepared.build_dir.copy(&built, &staged_path)?;
            staged.push((*target, staged_path, destination));
        }
        self.emit(BuildEvent::Stage(BuildStage::Compiled));

        let registry = &mut prepared.registry;
        let artifacts = publish(|| registry.close().map_err(BuildError::Plugins), staged)?;
        for artifact in &artifacts {
            info!(target = %artifact.target, path = %artifact.path.display(), "wrote executable");
            self.emit(BuildEvent::Artifact {
                target: artifact.target,
                path: artifact.path.clone(),
            });
        }

        let build_dir = prepared.build_dir.is_kept().then_some(dir);
        self.emit(BuildEvent::Stage(BuildStage::Finalized));

        Ok(BuildReport {
            artifacts,
            build_dir,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn compile(
        &self,
        cargo: &Cargo,
        dir: &Path,
        target: &Target,
        env: &HashMap<String, String>,
    ) -> Result<PathBuf> {
        let triple = target.triple()?;
        let target_dir = dir.join("target");

        let mut args: Vec<OsString> = vec![
            "build".into(),
            "--target".into(),
            triple.into(),
            "--target-dir".into(),
            target_dir.clone().into_os_string(),
            "--jobs".into(),
            self.config.jobs.to_string().into(),
        ];
        if self.config.release {
            args.push("--release".into());
        }

        cargo
            .run_checked(&args, dir, env)
            .await
            .map_err(|source| BuildError::Compile {
                target: target.to_string(),
                source,
            })?;

        let profile = if self.config.release { "release" } else { "debug" };
        let built = target_dir
            .join(triple)
            .join(profile)
            .join(format!("{HOST_BINARY}{}", target.exe_suffix()));
        if !built.is_file() {
            return Err(BuildError::ArtifactMissing(built));
        }
        debug!(target = %target, artifact = %built.display(), "compiled");
        Ok(built)
    }
}

/// Output file for `target`: `<output><suffix>` for a single target,
/// `<output>-<os>-<arch><suffix>` when building several.
pub fn artifact_path(output: &Path, target: &Target, multiple: bool) -> PathBuf {
    let suffix = target.exe_suffix();
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| HOST_BINARY.to_string());
    let stem = match name.strip_suffix(suffix) {
        Some(stem) if !suffix.is_empty() => stem.to_string(),
        _ => name,
    };

    let file_name = if multiple {
        format!("{stem}-{}-{}{suffix}", target.os, target.arch)
    } else {
        format!("{stem}{suffix}")
    };
    output.with_file_name(file_name)
}

/// Runs `release`, then moves staged artifacts into place. Nothing reaches
/// the output paths when `release` fails.
fn publish<F>(release: F, staged: Vec<(Target, PathBuf, PathBuf)>) -> Result<Vec<Artifact>>
where
    F: FnOnce() -> Result<()>,
{
    release()?;
    finalize(staged)
}

/// Moves staged artifacts to their destinations, removing the ones already
/// moved if any move fails.
fn finalize(staged: Vec<(Target, PathBuf, PathBuf)>) -> Result<Vec<Artifact>> {
    let mut written: Vec<Artifact> = Vec::new();
    for (target, from, to) in staged {
        if let Err(source) = move_file(&from, &to) {
            for artifact in &written {
                if let Err(e) = fs::remove_file(&artifact.path) {
                    warn!(path = %artifact.path.display(), error = %e, "failed to remove partial output");
                }
            }
            return Err(BuildError::Finalize { path: to, source });
        }
        written.push(Artifact { target, path: to });
    }
    Ok(written)
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    // Renaming across filesystems fails; fall back to copying.
    if let Err(e) = fs::copy(from, to) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    fs::remove_file(from)
}
