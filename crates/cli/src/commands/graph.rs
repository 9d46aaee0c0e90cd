//! Graph command implementation.

use std::path::Path;

use luapack_bundler::Bundler;
use luapack_core::builtin_module_names;
use miette::{Report, Result, miette};

use crate::discovery::{self, Project};

/// Shows the module graph of a script.
///
/// Configured plugins count as runtime modules; they are not loaded.
pub fn execute(project: &Project, script: &Path, format: &str) -> Result<()> {
    if format != "ascii" && format != "dot" {
        return Err(miette!("Unknown format: {}. Use 'ascii' or 'dot'", format));
    }

    let specs = project.config.plugin_specs().map_err(Report::new)?;
    let mut available: Vec<String> = builtin_module_names().collect();
    available.extend(specs.iter().map(|s| s.registration_name().to_string()));

    let bundle = Bundler::new(available).bundle(&discovery::absolute(script)?)?;
    let root_dir = bundle.entry.parent().unwrap_or(Path::new("."));

    match format {
        "dot" => print!("{}", bundle.graph.to_dot(root_dir)),
        _ => {
            println!("Module Graph:");
            println!();
            print!("{}", bundle.graph.to_ascii(root_dir));
        }
    }

    Ok(())
}
