//! Build command implementation.

use std::path::PathBuf;

use luapack_build::{BuildEvent, BuildRequest, BuildStage, Pipeline};
use luapack_bundler::BundleMode;
use luapack_core::{PluginSpec, Target};
use miette::{Report, Result, miette};

use crate::discovery::{self, Project};
use crate::output;

/// Command-line overrides for a build.
#[derive(Debug, Default)]
pub struct BuildOptions {
    pub script: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub platform: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub targets: Vec<String>,
    pub plugins: Vec<String>,
    pub shared_modules: bool,
    pub keep_build_dir: bool,
}

/// Builds the project's executable.
pub async fn execute(project: Project, options: BuildOptions) -> Result<()> {
    let Project { mut config, root } = project;

    if let Some(script) = &options.script {
        config.entry = discovery::absolute(script)?;
        if options.output.is_none() {
            config.output = None;
        }
    }
    if let Some(output) = &options.output {
        config.output = Some(discovery::absolute(output)?);
    }
    if options.shared_modules {
        config.bundle_mode = BundleMode::Shared;
    }

    let targets = resolve_targets(&options, &config.targets)?;
    let plugins = if options.plugins.is_empty() {
        config.plugin_specs().map_err(Report::new)?
    } else {
        parse_specs(&options.plugins)?
    };

    let request = BuildRequest {
        script: config.entry.clone(),
        output: config.output_path(),
        targets,
        plugins,
    };

    output::info(&format!(
        "Building {} for {}",
        request.script.display(),
        request
            .targets
            .iter()
            .map(Target::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let spinner = output::create_spinner("Loading plugins");
    let progress = spinner.clone();
    let pipeline = Pipeline::new(config, root)
        .keep_build_dir(options.keep_build_dir)
        .on_event(move |event| match event {
            BuildEvent::Stage(stage) => {
                if let Some(message) = stage_message(*stage) {
                    progress.set_message(message);
                }
            }
            BuildEvent::PluginLoaded {
                name,
                version,
                kind,
            } => progress.println(format!("  loaded {name} {version} ({kind})")),
            BuildEvent::Compiling(target) => progress.set_message(format!("Compiling for {target}")),
            BuildEvent::BuildDir(_) | BuildEvent::Artifact { .. } => {}
        });

    match pipeline.build(&request).await {
        Ok(report) => {
            output::spinner_success(&spinner, &format!("Built in {}ms", report.duration_ms));
            for artifact in &report.artifacts {
                output::key_value(&artifact.target.to_string(), &artifact.path.display().to_string());
            }
            if let Some(dir) = &report.build_dir {
                output::info(&format!("Build directory kept at {}", dir.display()));
            }
            Ok(())
        }
        Err(e) => {
            output::spinner_failure(&spinner, "Build failed");
            Err(Report::new(e))
        }
    }
}

fn stage_message(stage: BuildStage) -> Option<&'static str> {
    match stage {
        BuildStage::Init => Some("Loading plugins"),
        BuildStage::PluginsLoaded => Some("Bundling script"),
        BuildStage::Bundled => Some("Generating host program"),
        BuildStage::CodeGenerated => Some("Resolving dependencies"),
        BuildStage::DependenciesResolved => Some("Compiling"),
        BuildStage::Compiled => Some("Writing executables"),
        BuildStage::Finalized | BuildStage::Failed => None,
    }
}

/// Explicit `--target`s win, then `--platform`/`--os`/`--arch`, then the config.
fn resolve_targets(options: &BuildOptions, configured: &[String]) -> Result<Vec<Target>> {
    let parse = |raw: &str| raw.parse::<Target>().map_err(|e| miette!("{}", e));

    if !options.targets.is_empty() {
        return options.targets.iter().map(|t| parse(t)).collect();
    }
    if options.platform.is_some() || options.os.is_some() || options.arch.is_some() {
        let target = Target::resolve(
            options.platform.as_deref(),
            options.os.as_deref(),
            options.arch.as_deref(),
        )
        .map_err(|e| miette!("{}", e))?;
        return Ok(vec![target]);
    }
    if !configured.is_empty() {
        return configured.iter().map(|t| parse(t)).collect();
    }
    Ok(vec![Target::host().map_err(|e| miette!("{}", e))?])
}

pub(crate) fn parse_specs(raw: &[String]) -> Result<Vec<PluginSpec>> {
    raw.iter()
        .map(|s| PluginSpec::parse(s).map_err(|e| miette!("{}", e)))
        .collect()
}
