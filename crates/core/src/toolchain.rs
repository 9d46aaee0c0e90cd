//! Invocation of the host Rust toolchain.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command as TokioCommand;
use tracing::debug;

use crate::error::{LuapackError, Result};

/// Environment variable overriding the cargo executable.
pub const CARGO_ENV: &str = "LUAPACK_CARGO";

/// Runs cargo subcommands.
#[derive(Debug, Clone)]
pub struct Cargo {
    /// Path to the cargo executable.
    program: PathBuf,

    /// Environment variables applied to every invocation.
    env: HashMap<String, String>,
}

/// Captured output of a toolchain invocation.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Cargo {
    /// Locates cargo: `LUAPACK_CARGO`, then `CARGO` (set when running under cargo), then `PATH`.
    pub fn locate() -> Result<Self> {
        for var in [CARGO_ENV, "CARGO"] {
            if let Ok(path) = std::env::var(var) {
                if !path.is_empty() {
                    return Ok(Self::with_program(path));
                }
            }
        }

        which::which("cargo")
            .map(Self::with_program)
            .map_err(|e| LuapackError::ToolchainNotFound(e.to_string()))
    }

    /// Uses an explicit cargo executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            env: HashMap::new(),
        }
    }

    /// Adds environment variables.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `cargo <args>` and captures its output.
    pub async fn run<I, S>(
        &self,
        args: I,
        working_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let command = self.describe(&args);
        debug!(command = %command, dir = %working_dir.display(), "running toolchain");

        let output = TokioCommand::new(&self.program)
            .args(&args)
            .current_dir(working_dir)
            .envs(&self.env)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LuapackError::ToolchainFailed {
                command: command.clone(),
                exit_code: None,
                diagnostics: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Runs `cargo <args>`, turning a non-zero exit into an error carrying the full diagnostics.
    pub async fn run_checked<I, S>(
        &self,
        args: I,
        working_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let output = self.run(&args, working_dir, env).await?;

        if output.exit_code != 0 {
            let mut diagnostics = output.stderr;
            if !output.stdout.trim().is_empty() {
                diagnostics.push_str(&output.stdout);
            }
            return Err(LuapackError::ToolchainFailed {
                command: self.describe(&args),
                exit_code: Some(output.exit_code),
                diagnostics,
            });
        }

        Ok(output)
    }

    fn describe(&self, args: &[std::ffi::OsString]) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(args.iter().map(|a| a.to_string_lossy().to_string()));
        parts.join(" ")
    }
}
