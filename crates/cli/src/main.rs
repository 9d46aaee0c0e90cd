//! Luapack CLI - packages Lua scripts into native executables.

mod commands;
mod discovery;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "luapack")]
#[command(
    author,
    version,
    about = "Package Lua scripts and their plugins into self-contained executables"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to luapack.json (searched upwards from the current directory if not specified)
    #[arg(short = 'C', long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a native executable from a script
    Build {
        /// Entry script (defaults to the configured entry)
        script: Option<PathBuf>,

        /// Output path, without executable suffix
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target platform shorthand: linux, darwin, windows or os/arch
        #[arg(long)]
        platform: Option<String>,

        /// Target operating system
        #[arg(long)]
        os: Option<String>,

        /// Target architecture: amd64, arm64, 386 or arm
        #[arg(long)]
        arch: Option<String>,

        /// Build for several targets at once (repeatable)
        #[arg(long = "target", value_name = "OS/ARCH")]
        targets: Vec<String>,

        /// Plugin spec: [alias=]source[@version] (repeatable)
        #[arg(short = 'p', long = "plugin", value_name = "SPEC")]
        plugins: Vec<String>,

        /// Emit each module once and initialize it on first require
        #[arg(long)]
        shared_modules: bool,

        /// Keep the generated project for inspection
        #[arg(long)]
        keep_build_dir: bool,
    },

    /// Bundle a script and its local modules into one file
    Bundle {
        /// Entry script
        script: PathBuf,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Plugin spec whose module is left for the runtime (repeatable)
        #[arg(short = 'p', long = "plugin", value_name = "SPEC")]
        plugins: Vec<String>,

        /// Extra module name resolved at runtime (repeatable)
        #[arg(long = "module", value_name = "NAME")]
        modules: Vec<String>,

        /// Emit each module once and initialize it on first require
        #[arg(long)]
        shared_modules: bool,
    },

    /// Show the module graph of a script
    Graph {
        /// Entry script
        script: PathBuf,

        /// Output format (ascii, dot)
        #[arg(short, long, default_value = "ascii")]
        format: String,
    },

    /// Plugin management
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Initialize a new project
    Init {
        /// Force overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PluginAction {
    /// Load and validate a plugin, then show its manifest
    Info {
        /// Plugin spec: [alias=]source[@version]
        spec: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    // Init writes the config, so it never reads one.
    if let Commands::Init { force } = &cli.command {
        let dir = std::env::current_dir()
            .map_err(|e| miette::miette!("Cannot get current directory: {}", e))?;
        return commands::init::execute(&dir, *force);
    }

    let project = discovery::load_project(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            script,
            output,
            platform,
            os,
            arch,
            targets,
            plugins,
            shared_modules,
            keep_build_dir,
        } => {
            let options = commands::build::BuildOptions {
                script,
                output,
                platform,
                os,
                arch,
                targets,
                plugins,
                shared_modules,
                keep_build_dir,
            };
            commands::build::execute(project, options).await
        }

        Commands::Bundle {
            script,
            output,
            plugins,
            modules,
            shared_modules,
        } => {
            commands::bundle::execute(
                &project,
                &script,
                output.as_deref(),
                &plugins,
                &modules,
                shared_modules,
            )
            .await
        }

        Commands::Graph { script, format } => commands::graph::execute(&project, &script, &format),

        Commands::Plugin { action } => match action {
            PluginAction::Info { spec } => commands::plugin::info(&project, &spec).await,
        },

        Commands::Init { .. } => unreachable!("Init is handled earlier"),
    }
}
