//! Materializing plugin sources into the registry's working directory.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use luapack_core::{Cargo, PluginSpec, SourceKind};
use serde::Deserialize;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::discovery::search_paths;
use crate::error::{PluginError, Result};

/// Directory names never copied out of a plugin tree.
const SKIPPED_DIRS: &[&str] = &["target", ".git"];

/// Copies plugin sources into an isolated working directory.
#[derive(Debug, Clone)]
pub struct Fetcher {
    cargo: Cargo,
    base_dir: PathBuf,
    work_dir: PathBuf,
}

/// The subset of `cargo metadata` output needed to find a downloaded package.
#[derive(Debug, Deserialize)]
struct Metadata {
    packages: Vec<MetadataPackage>,
}

#[derive(Debug, Deserialize)]
struct MetadataPackage {
    name: String,
    manifest_path: PathBuf,
    source: Option<String>,
}

impl Fetcher {
    pub fn new(cargo: Cargo, base_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            cargo,
            base_dir: base_dir.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Copies the plugin tree named by `spec` and returns the copy's root.
    pub async fn fetch(&self, spec: &PluginSpec) -> Result<PathBuf> {
        let dest = self.destination(&spec.name)?;

        match spec.source_kind() {
            SourceKind::Local => {
                let path = Path::new(&spec.source);
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.base_dir.join(path)
                };
                if !path.is_dir() {
                    return Err(PluginError::NotFound {
                        spec: spec.to_string(),
                        searched: path.display().to_string(),
                    });
                }
                copy_tree(&path, &dest)?;
            }
            SourceKind::Short => {
                let searched = search_paths(&spec.source, &self.base_dir)
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(PluginError::NotFound {
                    spec: spec.to_string(),
                    searched,
                });
            }
            SourceKind::Remote => {
                let downloaded = self.download(spec).await?;
                copy_tree(&downloaded, &dest)?;
            }
        }

        info!(plugin = %spec, dir = %dest.display(), "fetched plugin");
        Ok(dest)
    }

    fn destination(&self, name: &str) -> Result<PathBuf> {
        let parent = self.work_dir.join("plugins");
        fs::create_dir_all(&parent)?;

        let mut dest = parent.join(name);
        let mut n = 1;
        while dest.exists() {
            n += 1;
            dest = parent.join(format!("{name}-{n}"));
        }
        Ok(dest)
    }

    /// Downloads a remote module through a scratch cargo project and returns
    /// its location in cargo's cache.
    async fn download(&self, spec: &PluginSpec) -> Result<PathBuf> {
        let fetch_error = |reason: String| PluginError::Fetch {
            spec: spec.source.clone(),
            reason,
        };

        let (key, dependency) = remote_dependency(spec);
        let scratch = self.work_dir.join(format!("fetch-{}", spec.name));
        fs::create_dir_all(&scratch)?;
        fs::write(scratch.join("lib.rs"), "")?;
        fs::write(
            scratch.join("Cargo.toml"),
            scratch_manifest(&key, dependency).map_err(fetch_error)?,
        )?;

        debug!(plugin = %spec.source, dir = %scratch.display(), "downloading plugin");
        let env = HashMap::new();
        self.cargo
            .run_checked(["fetch", "--quiet"], &scratch, &env)
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let output = self
            .cargo
            .run_checked(
                ["metadata", "--format-version", "1", "--offline"],
                &scratch,
                &env,
            )
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let metadata: Metadata =
            serde_json::from_str(&output.stdout).map_err(|e| fetch_error(e.to_string()))?;

        metadata
            .packages
            .into_iter()
            .find(|p| p.name == key && p.source.is_some())
            .and_then(|p| p.manifest_path.parent().map(Path::to_path_buf))
            .ok_or_else(|| fetch_error(format!("package '{key}' not found after download")))
    }
}

/// Dependency entry for a remote source: crates.io names pin the exact
/// version, everything else is a git repository pinned to the version tag.
fn remote_dependency(spec: &PluginSpec) -> (String, toml::Table) {
    let mut table = toml::Table::new();

    if let Some(name) = spec.source.strip_prefix("crates.io/") {
        let version = if spec.is_latest() {
            "*".to_string()
        } else {
            format!("={}", spec.version)
        };
        table.insert("version".into(), version.into());
        return (name.trim_matches('/').to_string(), table);
    }

    let url = spec.source.strip_prefix("git+").unwrap_or(&spec.source);
    let url = if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    table.insert("git".into(), url.into());

    if !spec.is_latest() {
        let tag = if spec.version.starts_with('v') {
            spec.version.clone()
        } else {
            format!("v{}", spec.version)
        };
        table.insert("tag".into(), tag.into());
    }

    (spec.name.clone(), table)
}

fn scratch_manifest(key: &str, dependency: toml::Table) -> std::result::Result<String, String> {
    let mut package = toml::Table::new();
    package.insert("name".into(), "luapack-fetch".into());
    package.insert("version".into(), "0.0.0".into());
    package.insert("edition".into(), "2021".into());
    package.insert("publish".into(), false.into());

    let mut lib = toml::Table::new();
    lib.insert("path".into(), "lib.rs".into());

    let mut dependencies = toml::Table::new();
    dependencies.insert(key.to_string(), dependency.into());

    let mut manifest = toml::Table::new();
    manifest.insert("package".into(), package.into());
    manifest.insert("lib".into(), lib.into());
    manifest.insert("dependencies".into(), dependencies.into());
    manifest.insert("workspace".into(), toml::Table::new().into());

    toml::to_string(&manifest).map_err(|e| e.to_string())
}

/// Recursively copies a directory, skipping build output and VCS metadata.
///
/// Symbolic links are recreated, never followed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)
}

#[cfg(windows)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let destination = fs::read_link(link)?;
    if fs::metadata(link).is_ok_and(|m| m.is_dir()) {
        std::os::windows::fs::symlink_dir(destination, target)
    } else {
        std::os::windows::fs::symlink_file(destination, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(base: &Path, work: &Path) -> Fetcher {
        Fetcher::new(Cargo::with_program("cargo"), base, work)
    }

    #[tokio::test]
    async fn test_local_copy_skips_build_output() {
        let base = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let plugin = base.path().join("my-plugin");
        fs::create_dir_all(plugin.join("lib")).unwrap();
        fs::create_dir_all(plugin.join("target/release")).unwrap();
        fs::create_dir_all(plugin.join(".git")).unwrap();
        fs::write(plugin.join("plugin.json"), "{}").unwrap();
        fs::write(plugin.join("lib/helpers.lua"), "return {}").unwrap();
        fs::write(plugin.join("target/release/junk"), "x").unwrap();

        let spec = PluginSpec::parse("./my-plugin").unwrap();
        let dest = fetcher(base.path(), work.path()).fetch(&spec).await.unwrap();

        assert!(dest.starts_with(work.path()));
        assert!(dest.join("plugin.json").is_file());
        assert!(dest.join("lib/helpers.lua").is_file());
        assert!(!dest.join("target").exists());
        assert!(!dest.join(".git").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_recreates_symlinks() {
        use std::os::unix::fs::symlink;

        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("plugin.lua"), "return {}").unwrap();
        symlink(".", src.path().join("loop")).unwrap();
        symlink("plugin.lua", src.path().join("init.lua")).unwrap();

        let copy = dst.path().join("copy");
        copy_tree(src.path(), &copy).unwrap();

        assert!(copy.join("plugin.lua").is_file());
        let looped = fs::symlink_metadata(copy.join("loop")).unwrap();
        assert!(looped.file_type().is_symlink());
        assert_eq!(fs::read_link(copy.join("loop")).unwrap(), PathBuf::from("."));
        assert_eq!(fs::read_to_string(copy.join("init.lua")).unwrap(), "return {}");
    }

    #[tokio::test]
    async fn test_same_name_gets_distinct_copies() {
        let base = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("fs")).unwrap();

        let fetcher = fetcher(base.path(), work.path());
        let spec = PluginSpec::parse("./fs").unwrap();
        let first = fetcher.fetch(&spec).await.unwrap();
        let second = fetcher.fetch(&spec).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_missing_sources() {
        let base = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let fetcher = fetcher(base.path(), work.path());

        let err = fetcher
            .fetch(&PluginSpec::parse("./absent").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotFound { .. }));

        let err = fetcher
            .fetch(&PluginSpec::parse("ghost@1.0.0").unwrap())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ghost@1.0.0"));
        assert!(message.contains("ghost-plugin"));
    }

    #[test]
    fn test_remote_dependency_forms() {
        let spec = PluginSpec::parse("github.com/acme/lua-fs@1.2.0").unwrap();
        let (key, table) = remote_dependency(&spec);
        assert_eq!(key, "lua-fs");
        assert_eq!(table["git"].as_str(), Some("https://github.com/acme/lua-fs"));
        assert_eq!(table["tag"].as_str(), Some("v1.2.0"));

        let spec = PluginSpec::parse("git+https://example.com/fs.git").unwrap();
        let (key, table) = remote_dependency(&spec);
        assert_eq!(key, "fs");
        assert_eq!(table["git"].as_str(), Some("https://example.com/fs.git"));
        assert!(!table.contains_key("tag"));

        let spec = PluginSpec::parse("crates.io/luapack-fs@0.3.1").unwrap();
        let (key, table) = remote_dependency(&spec);
        assert_eq!(key, "luapack-fs");
        assert_eq!(table["version"].as_str(), Some("=0.3.1"));
    }

    #[test]
    fn test_scratch_manifest_is_standalone() {
        let spec = PluginSpec::parse("crates.io/luapack-fs").unwrap();
        let (key, table) = remote_dependency(&spec);
        let text = scratch_manifest(&key, table).unwrap();
        let parsed: toml::Table = toml::from_str(&text).unwrap();

        assert!(parsed.contains_key("workspace"));
        assert_eq!(parsed["dependencies"]["luapack-fs"]["version"].as_str(), Some("*"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remote_fetch_through_cargo() {
        use std::os::unix::fs::PermissionsExt;

        let base = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let downloaded = cache.path().join("lua-fs-1234");
        fs::create_dir_all(&downloaded).unwrap();
        fs::write(downloaded.join("plugin.json"), "{}").unwrap();
        fs::write(downloaded.join("Cargo.toml"), "").unwrap();

        let metadata = serde_json::json!({
            "packages": [
                { "name": "luapack-fetch", "manifest_path": "/scratch/Cargo.toml", "source": null },
                { "name": "lua-fs", "manifest_path": downloaded.join("Cargo.toml"), "source": "git+https://github.com/acme/lua-fs?tag=v1.0.0" }
            ]
        });
        let metadata_file = base.path().join("metadata.json");
        fs::write(&metadata_file, metadata.to_string()).unwrap();

        let script = base.path().join("fake-cargo");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\ncase \"$1\" in\n  fetch) exit 0 ;;\n  metadata) cat '{}' ;;\n  *) exit 1 ;;\nesac\n",
                metadata_file.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let fetcher = Fetcher::new(Cargo::with_program(&script), base.path(), work.path());
        let spec = PluginSpec::parse("github.com/acme/lua-fs@1.0.0").unwrap();
        let dest = fetcher.fetch(&spec).await.unwrap();

        assert!(dest.join("plugin.json").is_file());
        let scratch = fs::read_to_string(work.path().join("fetch-lua-fs/Cargo.toml")).unwrap();
        assert!(scratch.contains("tag = \"v1.0.0\""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remote_fetch_failure_names_source() {
        use std::os::unix::fs::PermissionsExt;

        let base = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let script = base.path().join("fake-cargo");
        fs::write(&script, "#!/bin/sh\necho 'failed to resolve host' >&2\nexit 101\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let fetcher = Fetcher::new(Cargo::with_program(&script), base.path(), work.path());
        let spec = PluginSpec::parse("github.com/acme/unreachable").unwrap();
        let err = fetcher.fetch(&spec).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("github.com/acme/unreachable"));
        assert!(message.contains("failed to resolve host"));
    }
}
