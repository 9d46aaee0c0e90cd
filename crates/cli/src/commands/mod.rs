//! CLI command implementations.

pub mod build;
pub mod bundle;
pub mod graph;
pub mod init;
pub mod plugin;
