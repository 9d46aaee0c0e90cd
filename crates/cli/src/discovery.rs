//! Project configuration discovery.

use std::path::{Path, PathBuf};

use luapack_build::{CONFIG_FILE, ProjectConfig};
use miette::{Result, miette};
use tracing::debug;

/// A project: its configuration and the directory relative paths resolve against.
#[derive(Debug, Clone)]
pub struct Project {
    pub config: ProjectConfig,
    pub root: PathBuf,
}

/// Loads the project configuration.
///
/// An explicit path must exist. Otherwise `luapack.json` is searched upwards
/// from the current directory, and defaults are used when there is none.
pub fn load_project(explicit: Option<&Path>) -> Result<Project> {
    let cwd =
        std::env::current_dir().map_err(|e| miette!("Cannot get current directory: {}", e))?;

    let path = match explicit {
        Some(path) if !path.is_file() => {
            return Err(miette!("Config file not found: {}", path.display()));
        }
        Some(path) => Some(cwd.join(path)),
        None => find_config_from(&cwd),
    };

    let (config, root) = match path {
        Some(path) => {
            let config = ProjectConfig::load(&path)?;
            debug!(config = %path.display(), "loaded project configuration");
            (config, working_dir(&path))
        }
        None => (ProjectConfig::default().resolve_paths(&cwd), cwd),
    };

    Ok(Project {
        config: config.apply_env(),
        root,
    })
}

/// Finds `luapack.json` starting from the given directory.
pub fn find_config_from(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config = current.join(CONFIG_FILE);
        if config.is_file() {
            return Some(config);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Returns the project directory for a config file (its parent directory).
pub fn working_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolves a path given on the command line against the current directory.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd =
        std::env::current_dir().map_err(|e| miette!("Cannot get current directory: {}", e))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_find_config_in_current() {
        let dir = tempdir().unwrap();
        let config = dir.path().join(CONFIG_FILE);
        fs::write(&config, "{}").unwrap();

        assert_eq!(find_config_from(dir.path()), Some(config));
    }

    #[test]
    fn test_find_config_in_parent() {
        let dir = tempdir().unwrap();
        let config = dir.path().join(CONFIG_FILE);
        fs::write(&config, "{}").unwrap();

        let subdir = dir.path().join("scripts").join("nested");
        fs::create_dir_all(&subdir).unwrap();

        assert_eq!(find_config_from(&subdir), Some(config));
    }

    #[test]
    fn test_config_directory_is_not_a_file() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join(CONFIG_FILE)).unwrap();
        let nested = dir.path().join("a");
        fs::create_dir(&nested).unwrap();

        let found = find_config_from(&nested);
        assert_ne!(found, Some(dir.path().join(CONFIG_FILE)));
    }

    #[test]
    fn test_working_dir() {
        let config = Path::new("/some/project/luapack.json");
        assert_eq!(working_dir(config), Path::new("/some/project"));
    }
}
