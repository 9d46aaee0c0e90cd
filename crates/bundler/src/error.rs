//! Bundler error types.

use std::path::{Path, PathBuf};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Result type for bundling operations.
pub type Result<T> = std::result::Result<T, BundleError>;

/// Error type for bundling failures. Every variant aborts the whole bundle.
#[derive(Debug, Error, Diagnostic)]
pub enum BundleError {
    #[error("Failed to read script {}: {source}", .path.display())]
    #[diagnostic(code(luapack::bundle::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Module '{reference}' required by {} not found (searched: {searched})", .from.display())]
    #[diagnostic(
        code(luapack::bundle::module_not_found),
        help("relative requires start with ./ or ../; bare names are looked up as <name>.lua or <name>/init.lua next to the requiring file")
    )]
    ModuleNotFound {
        reference: String,
        from: PathBuf,
        searched: String,

        #[source_code]
        src: NamedSource<String>,

        #[label("required here")]
        span: SourceSpan,
    },

    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    #[diagnostic(code(luapack::bundle::circular_dependency))]
    CircularDependency { cycle: Vec<PathBuf> },
}

impl BundleError {
    pub(crate) fn module_not_found(
        reference: &str,
        from: &Path,
        searched: &[PathBuf],
        source: &str,
        offset: usize,
        len: usize,
    ) -> Self {
        let searched = searched
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Self::ModuleNotFound {
            reference: reference.to_string(),
            from: from.to_path_buf(),
            searched,
            src: NamedSource::new(from.display().to_string(), source.to_string()),
            span: SourceSpan::from(offset..offset + len),
        }
    }
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
