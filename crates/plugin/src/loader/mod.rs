//! Loaders for the two plugin kinds.

mod interpreted;
mod native;

pub use interpreted::InterpretedPlugin;
pub use native::{DYLIB_CFG, NativeBuildOptions, NativeModule, dylib_manifest, fingerprint};

use std::path::Path;

use luapack_core::{NativeDependency, parse_dependencies};
use luapack_runtime::HostState;

use crate::error::Result;
use crate::manifest::{PluginKind, PluginManifest};

/// A loaded plugin of either kind.
#[derive(Debug)]
pub enum LoadedPlugin {
    Interpreted(InterpretedPlugin),
    Native(NativeModule),
}

impl LoadedPlugin {
    /// Loads the plugin at `root` with the strategy its manifest selects.
    pub async fn load(
        name: &str,
        root: &Path,
        manifest: PluginManifest,
        native: &NativeBuildOptions,
    ) -> Result<Self> {
        match manifest.kind {
            PluginKind::Interpreted => Ok(Self::Interpreted(InterpretedPlugin::load(
                name, root, manifest,
            )?)),
            PluginKind::Native => Ok(Self::Native(
                NativeModule::load(name, root, manifest, native).await?,
            )),
        }
    }

    /// Registration name exposed to scripts.
    pub fn name(&self) -> &str {
        match self {
            Self::Interpreted(p) => p.name(),
            Self::Native(p) => p.name(),
        }
    }

    /// Every name scripts can `require` this plugin by. A native plugin
    /// registered under an alias is also reachable by its own module name.
    pub fn module_names(&self) -> Vec<String> {
        match self {
            Self::Interpreted(p) => exposed_names(p.name(), None),
            Self::Native(p) => exposed_names(p.name(), Some(p.module_name())),
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::Interpreted(p) => &p.manifest().version,
            Self::Native(p) => p.version(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Interpreted(p) => p.manifest().description.clone().unwrap_or_default(),
            Self::Native(p) => p.description(),
        }
    }

    pub fn kind(&self) -> PluginKind {
        self.manifest().kind
    }

    pub fn manifest(&self) -> &PluginManifest {
        match self {
            Self::Interpreted(p) => p.manifest(),
            Self::Native(p) => p.manifest(),
        }
    }

    /// The plugin's entry file inside the registry's working directory.
    pub fn entry(&self) -> &Path {
        match self {
            Self::Interpreted(p) => p.entry(),
            Self::Native(p) => p.entry(),
        }
    }

    /// The plugin's own dependencies followed by the manifest's, without duplicates.
    pub fn dependencies(&self) -> Result<Vec<NativeDependency>> {
        let own = match self {
            Self::Interpreted(_) => Vec::new(),
            Self::Native(p) => p.own_dependencies(),
        };
        let declared = &self.manifest().dependencies;
        Ok(parse_dependencies(
            own.iter().chain(declared.iter()).map(String::as_str),
        )?)
    }

    pub fn register(&self, host: &HostState) -> Result<()> {
        match self {
            Self::Interpreted(p) => p.register(host),
            Self::Native(p) => p.register(host),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            Self::Interpreted(_) => Ok(()),
            Self::Native(p) => p.close(),
        }
    }
}

fn exposed_names(registered: &str, own: Option<&str>) -> Vec<String> {
    let mut names = vec![registered.to_string()];
    if let Some(own) = own.filter(|own| *own != registered) {
        names.push(own.to_string());
    }
    names
}
