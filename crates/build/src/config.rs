//! Project configuration loaded from `luapack.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use luapack_bundler::BundleMode;
use luapack_core::{Cargo, DependencySource, PluginSpec, Target};
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// File name of the project configuration.
pub const CONFIG_FILE: &str = "luapack.json";

/// Overrides the cargo executable.
pub const CARGO_ENV: &str = "LUAPACK_CARGO";

/// Overrides `plugin_timeout_secs`.
pub const PLUGIN_TIMEOUT_ENV: &str = "LUAPACK_PLUGIN_TIMEOUT";

/// Crate name used for bridge modules when the config does not name one.
pub const DEFAULT_BRIDGE_CRATE: &str = "luapack-bridges";

/// Project configuration. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Entry script, relative to the config file.
    pub entry: PathBuf,

    /// Output path without executable suffix. Defaults to the entry's file stem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// Plugin specs, loaded in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,

    /// Targets as `os` or `os/arch`. Empty means the host.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    pub bundle_mode: BundleMode,

    pub plugin_timeout_secs: u64,

    /// Where generated programs get `luapack-runtime` from.
    pub runtime: DependencySource,

    /// Crate providing the built-in bridge modules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridges: Option<BridgeConfig>,

    /// Cargo executable. Located on `PATH` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cargo: Option<PathBuf>,

    /// Parallel compiler jobs.
    pub jobs: usize,

    /// Build with the release profile.
    pub release: bool,
}

/// Bridge crate linked into generated programs. It must export
/// `register_all(&HostState) -> Result<(), E>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(rename = "crate", default = "default_bridge_crate")]
    pub krate: String,

    #[serde(flatten)]
    pub source: DependencySource,
}

fn default_bridge_crate() -> String {
    DEFAULT_BRIDGE_CRATE.to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            entry: PathBuf::from("main.lua"),
            output: None,
            plugins: Vec::new(),
            targets: Vec::new(),
            bundle_mode: BundleMode::default(),
            plugin_timeout_secs: 300,
            runtime: DependencySource::version(env!("CARGO_PKG_VERSION")),
            bridges: None,
            cargo: None,
            jobs: num_cpus::get(),
            release: true,
        }
    }
}

impl BridgeConfig {
    /// Rust path of the bridge crate.
    pub fn crate_ident(&self) -> String {
        self.krate.replace('-', "_")
    }
}

impl ProjectConfig {
    /// Loads the configuration from a file and resolves its relative paths
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BuildError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config = Self::from_json(&content).map_err(|reason| BuildError::Config {
            path: path.to_path_buf(),
            reason,
        })?;

        let base = path.parent().unwrap_or(Path::new("."));
        Ok(config.resolve_paths(base))
    }

    /// Parses and validates a configuration.
    pub fn from_json(json: &str) -> std::result::Result<Self, String> {
        let config: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.entry.as_os_str().is_empty() {
            return Err("`entry` must not be empty".to_string());
        }
        if self.jobs == 0 {
            return Err("`jobs` must be at least 1".to_string());
        }
        if self.plugin_timeout_secs == 0 {
            return Err("`plugin_timeout_secs` must be at least 1".to_string());
        }
        Ok(())
    }

    /// Makes relative paths absolute against `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        if self.entry.is_relative() {
            self.entry = base.join(&self.entry);
        }
        if let Some(output) = self.output.take() {
            self.output = Some(if output.is_relative() {
                base.join(output)
            } else {
                output
            });
        }
        self.runtime = self.runtime.absolutize(base);
        if let Some(bridges) = self.bridges.as_mut() {
            bridges.source = bridges.source.clone().absolutize(base);
        }
        self
    }

    /// Applies `LUAPACK_CARGO` and `LUAPACK_PLUGIN_TIMEOUT` from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(cargo) = lookup(CARGO_ENV).filter(|v| !v.is_empty()) {
            self.cargo = Some(PathBuf::from(cargo));
        }
        if let Some(secs) = lookup(PLUGIN_TIMEOUT_ENV).and_then(|v| v.trim().parse::<u64>().ok())
        {
            if secs > 0 {
                self.plugin_timeout_secs = secs;
            }
        }
        self
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }

    /// Parses the configured plugin specs.
    pub fn plugin_specs(&self) -> Result<Vec<PluginSpec>> {
        Ok(self
            .plugins
            .iter()
            .map(|raw| PluginSpec::parse(raw))
            .collect::<luapack_core::Result<_>>()?)
    }

    /// Parses the configured targets, falling back to the host.
    pub fn resolve_targets(&self) -> Result<Vec<Target>> {
        if self.targets.is_empty() {
            return Ok(vec![Target::host()?]);
        }
        Ok(self
            .targets
            .iter()
            .map(|raw| raw.parse())
            .collect::<luapack_core::Result<_>>()?)
    }

    /// Output path for the configured entry.
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(output) => output.clone(),
            None => {
                let stem = self
                    .entry
                    .file_stem()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("app"));
                match self.entry.parent() {
                    Some(dir) => dir.join(stem),
                    None => stem,
                }
            }
        }
    }

    /// The cargo executable to build with.
    pub fn cargo(&self) -> Result<Cargo> {
        match &self.cargo {
            Some(program) => Ok(Cargo::with_program(program)),
            None => Ok(Cargo::locate()?),
        }
    }
}
