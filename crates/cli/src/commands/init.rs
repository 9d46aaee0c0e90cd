//! Init command implementation.

use std::fs;
use std::path::Path;

use luapack_build::{CONFIG_FILE, ProjectConfig};
use miette::{Result, miette};

use crate::output;

const MAIN_TEMPLATE: &str = r#"-- Local modules are bundled at build time:
--   local util = require("./util")
-- Built-in and plugin modules are resolved when the program runs.

local function greet(name)
  return "Hello, " .. name .. "!"
end

print(greet("world"))
"#;

/// Initializes a new project in `dir`.
pub fn execute(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        return Err(miette!(
            "{} already exists. Use --force to overwrite.",
            CONFIG_FILE
        ));
    }

    let config = ProjectConfig::default();
    let json = config
        .to_json()
        .map_err(|e| miette!("Failed to render {}: {}", CONFIG_FILE, e))?;
    fs::write(&config_path, json + "\n")
        .map_err(|e| miette!("Failed to write {}: {}", CONFIG_FILE, e))?;
    output::success(&format!("Created {}", CONFIG_FILE));

    let entry = dir.join(&config.entry);
    if entry.exists() && !force {
        output::warning(&format!("{} already exists, keeping it", config.entry.display()));
    } else {
        fs::write(&entry, MAIN_TEMPLATE)
            .map_err(|e| miette!("Failed to write {}: {}", entry.display(), e))?;
        output::success(&format!("Created {}", config.entry.display()));
    }

    output::info("Run 'luapack build' to create an executable");
    Ok(())
}
