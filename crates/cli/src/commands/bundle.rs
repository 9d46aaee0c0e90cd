//! Bundle command implementation.

use std::fs;
use std::path::Path;

use luapack_bundler::{BundleMode, Bundler};
use luapack_core::builtin_module_names;
use miette::{Result, miette};

use crate::commands::build::parse_specs;
use crate::commands::plugin::load_registry;
use crate::discovery::{self, Project};
use crate::output;

/// Bundles a script into a single file or stdout.
pub async fn execute(
    project: &Project,
    script: &Path,
    output: Option<&Path>,
    plugins: &[String],
    modules: &[String],
    shared_modules: bool,
) -> Result<()> {
    let specs = parse_specs(plugins)?;

    let mut available: Vec<String> = builtin_module_names().collect();
    available.extend(modules.iter().cloned());

    // Kept alive until bundling is done.
    let registry = if specs.is_empty() {
        None
    } else {
        Some(load_registry(project, &specs).await?)
    };
    if let Some(registry) = &registry {
        available.extend(registry.available_modules());
    }

    let mode = if shared_modules {
        BundleMode::Shared
    } else {
        project.config.bundle_mode
    };
    let bundle = Bundler::new(available)
        .with_mode(mode)
        .bundle(&discovery::absolute(script)?)?;

    match output {
        Some(path) => {
            fs::write(path, &bundle.source)
                .map_err(|e| miette!("Failed to write {}: {}", path.display(), e))?;
            output::success(&format!(
                "Bundled {} file(s) into {}",
                bundle.modules.len(),
                path.display()
            ));
        }
        None => print!("{}", bundle.source),
    }

    Ok(())
}
