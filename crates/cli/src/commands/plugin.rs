//! Plugin command implementation.

use luapack_core::{Cargo, PluginSpec};
use luapack_plugin::{PluginRegistry, RegistryOptions};
use miette::{Result, miette};

use crate::discovery::Project;
use crate::output;

/// Loads plugins for a command, bounded by the configured timeout.
pub(crate) async fn load_registry(project: &Project, specs: &[PluginSpec]) -> Result<PluginRegistry> {
    // Only remote and native plugins need cargo; let those fail when they run it.
    let cargo = project
        .config
        .cargo()
        .unwrap_or_else(|_| Cargo::with_program("cargo"));
    let options = RegistryOptions::new(&project.root, cargo)
        .with_runtime(project.config.runtime.clone());

    let mut registry = PluginRegistry::new(options).map_err(|e| miette!("{}", e))?;
    let timeout = project.config.plugin_timeout();
    tokio::time::timeout(timeout, registry.load_plugins(specs))
        .await
        .map_err(|_| miette!("Plugin loading timed out after {}s", timeout.as_secs()))?
        .map_err(|e| miette!("Failed to load plugins: {}", e))?;

    Ok(registry)
}

/// Loads and validates one plugin, then prints its manifest.
pub async fn info(project: &Project, raw: &str) -> Result<()> {
    let spec = PluginSpec::parse(raw).map_err(|e| miette!("{}", e))?;
    let mut registry = load_registry(project, std::slice::from_ref(&spec)).await?;

    {
        let plugin = registry
            .plugins()
            .first()
            .ok_or_else(|| miette!("Plugin '{}' was not loaded", raw))?;
        let manifest = plugin.manifest();

        output::section_header(plugin.name());
        output::key_value("name", &manifest.name);
        output::key_value("version", plugin.version());
        output::key_value("type", plugin.kind().as_str());
        output::key_value("entry", &plugin.entry().display().to_string());
        if let Some(resolved) = registry.specs().first() {
            output::key_value("source", &resolved.source);
        }
        for (key, value) in [
            ("description", plugin.description()),
            ("author", manifest.author.clone().unwrap_or_default()),
            ("license", manifest.license.clone().unwrap_or_default()),
        ] {
            if !value.is_empty() {
                output::key_value(key, &value);
            }
        }

        let dependencies = plugin.dependencies().map_err(|e| miette!("{}", e))?;
        if !dependencies.is_empty() {
            output::section_header("dependencies");
            for dep in &dependencies {
                output::list_item(&dep.to_string());
            }
        }
    }

    registry.close().map_err(|e| miette!("{}", e))?;
    println!();
    output::success("Plugin is valid");
    Ok(())
}
