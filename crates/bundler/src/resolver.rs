//! Mapping `require` references to script files.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Script file extension.
pub const SCRIPT_EXTENSION: &str = "lua";

/// Package entry file looked up inside module directories.
pub const PACKAGE_INIT: &str = "init.lua";

/// Returns true for `./x`, `../x` and their backslash forms.
pub fn is_relative_reference(reference: &str) -> bool {
    reference.starts_with("./")
        || reference.starts_with("../")
        || reference.starts_with(".\\")
        || reference.starts_with("..\\")
}

/// Lists the files a reference may resolve to, in lookup order.
pub fn candidates(reference: &str, base_dir: &Path) -> Vec<PathBuf> {
    let base = if is_relative_reference(reference) || Path::new(reference).is_absolute() {
        base_dir.join(reference)
    } else {
        // Bare names follow the Lua convention: `lib.util` means `lib/util`.
        let stem = reference
            .strip_suffix(".lua")
            .unwrap_or(reference)
            .replace('.', "/");
        let mut path = base_dir.join(stem);
        if reference.ends_with(".lua") {
            path.set_extension(SCRIPT_EXTENSION);
        }
        path
    };

    let mut paths = Vec::with_capacity(3);
    if base.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
        paths.push(base.clone());
    }

    let mut with_extension: OsString = base.clone().into_os_string();
    with_extension.push(".");
    with_extension.push(SCRIPT_EXTENSION);
    paths.push(PathBuf::from(with_extension));
    paths.push(base.join(PACKAGE_INIT));
    paths
}

/// Resolves a reference to an absolute, canonical script path.
///
/// On failure returns the list of paths that were searched.
pub fn resolve_reference(
    reference: &str,
    base_dir: &Path,
) -> std::result::Result<PathBuf, Vec<PathBuf>> {
    let searched = candidates(reference, base_dir);
    for candidate in &searched {
        if candidate.is_file() {
            return Ok(canonical(candidate));
        }
    }
    Err(searched)
}

/// Stable identifier of a module: its path relative to `root` with `/` separators.
///
/// Modules outside `root` keep their full path.
pub fn module_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}

/// Canonicalizes a path, falling back to the path itself.
pub fn canonical(path: &Path) -> PathBuf {
    canonicalize_readable(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(windows)]
fn canonicalize_readable(path: &Path) -> std::io::Result<PathBuf> {
    // Strip the verbatim prefix so module ids and messages stay readable.
    let canonical = std::fs::canonicalize(path)?;
    let text = canonical.to_string_lossy();
    Ok(match text.strip_prefix(r"\\?\") {
        Some(rest) => PathBuf::from(rest),
        None => canonical,
    })
}

#[cfg(not(windows))]
fn canonicalize_readable(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}
