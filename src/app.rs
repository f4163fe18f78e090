//! Wiring shared by the binaries

use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use topt_locator::{Locator, DEV_MODE_ENV, DEV_OUTPUT_DIR_ENV, NATIVE_SEARCH_PATH_ENV};
use topt_target::{Arch, LinkMode, Os, PlatformError, TargetKey};

use crate::config::{ConfigError, EffectiveConfig};
use crate::pipeline::{Pipeline, PipelineError};
use crate::process::{CommandRunner, Invocation, ProcessError, SystemRunner};
use crate::summary::{BuildSummary, TargetStatus};
use crate::toolchain::{self, CompressorCache, ToolResolver};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unsupported host: {0}")]
    Host(#[from] PlatformError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Install the stderr log subscriber (`RUST_LOG`, default `info`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Merge the configuration layers against the current process environment
pub fn load_config(workdir: &Path, overrides: Option<Value>) -> Result<EffectiveConfig, ConfigError> {
    let env: BTreeMap<String, String> = env::vars().collect();
    EffectiveConfig::build(workdir, &env, overrides)
}

/// Pipeline for the machine this process runs on
pub fn host_pipeline(config: &EffectiveConfig, workdir: &Path) -> Result<Pipeline, AppError> {
    let host = Os::host()?;
    let host_arch = Arch::host()?;
    let settings = &config.settings;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let compressor = CompressorCache::new(
        settings.compressor_cache_dir(workdir),
        &settings.compressor.version,
        host,
        host_arch,
    )
    .with_url_template(&settings.compressor.url_template);
    let toolchain = toolchain::for_host(
        host,
        host_arch,
        ToolResolver::for_host(host),
        runner.clone(),
        Some(compressor),
    );
    Ok(Pipeline::new(config, workdir, host_arch, runner, toolchain))
}

/// Load configuration and run the pipeline on this host
pub fn run_native_build(workdir: &Path, overrides: Option<Value>) -> Result<BuildSummary, AppError> {
    let config = load_config(workdir, overrides)?;
    let pipeline = host_pipeline(&config, workdir)?;
    Ok(pipeline.run()?)
}

/// Lines printed to stdout at the end of a run
pub fn render_report(summary: &BuildSummary) -> String {
    let mut lines = Vec::new();
    for target in &summary.targets {
        let mut line = format!("  {:<9} {}", target.status.to_string(), target.target);
        match (target.status, target.failed_stage, &target.message) {
            (TargetStatus::Failed, Some(stage), Some(message)) => {
                line.push_str(&format!(" [{}] {}", stage, message));
            }
            (TargetStatus::Skipped, _, Some(message)) => {
                line.push_str(&format!(" ({})", message));
            }
            _ => {}
        }
        lines.push(line);
        for warning in &target.warnings {
            lines.push(format!("            warning: {}", warning));
        }
    }
    for package in &summary.packages {
        lines.push(format!("  packaged  {} {}", package.archive_path.display(), package.sha256));
    }
    lines.push(summary.human_summary.clone());
    lines.join("\n")
}

/// Parsed `topt-localdev` command line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocaldevArgs {
    pub help: bool,
    pub skip_native: bool,

    /// Passed to cargo unchanged
    pub cargo_args: Vec<String>,
}

/// Split the wrapper's own leading flags from cargo's arguments.
///
/// Only flags before the first unrecognized argument belong to the wrapper;
/// `-h` after that point is cargo's.
pub fn parse_localdev_args<I, S>(args: I) -> LocaldevArgs
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut parsed = LocaldevArgs::default();
    let mut args = args.into_iter().map(Into::into);
    for arg in args.by_ref() {
        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "-sn" | "--skip-native" => parsed.skip_native = true,
            _ => {
                parsed.cargo_args.push(arg);
                break;
            }
        }
    }
    parsed.cargo_args.extend(args);
    parsed
}

/// Configuration overrides for a development build
pub fn localdev_overrides() -> Value {
    serde_json::json!({ "output": { "mode": "localdev" } })
}

/// Cargo invocation that makes the SDK link against the local build
pub fn cargo_invocation(
    cargo: impl Into<PathBuf>,
    cargo_args: &[String],
    host: Os,
    host_arch: Arch,
    output_root: &Path,
) -> Invocation {
    let locator = Locator::new(TargetKey::new(host, host_arch, LinkMode::Static));
    Invocation::new(cargo)
        .args(cargo_args)
        .env(DEV_MODE_ENV, "1")
        .env(
            NATIVE_SEARCH_PATH_ENV,
            locator.dev_output_dir(output_root).display().to_string(),
        )
        .env(DEV_OUTPUT_DIR_ENV, output_root.display().to_string())
}

/// `topt-localdev`: build the host's native library unless skipped, then
/// run cargo against it. Returns the exit code.
pub fn run_localdev(workdir: &Path, args: &LocaldevArgs) -> Result<i32, AppError> {
    let config = load_config(workdir, Some(localdev_overrides()))?;
    if !args.skip_native {
        let summary = host_pipeline(&config, workdir)?.run()?;
        println!("{}", render_report(&summary));
        if summary.exit_code != 0 {
            return Ok(summary.exit_code);
        }
    }

    let cargo = env::var_os("CARGO")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("cargo"));
    let invocation = cargo_invocation(
        cargo,
        &args.cargo_args,
        Os::host()?,
        Arch::host()?,
        &config.settings.output_root(workdir),
    );
    Ok(SystemRunner.run_inherited(&invocation)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailurePolicy, PackageMode};
    use crate::summary::{FailureStage, TargetOutcome};

    #[test]
    fn test_localdev_args() {
        let parsed = parse_localdev_args(["-sn", "test", "--release", "-h"]);
        assert!(parsed.skip_native);
        assert!(!parsed.help);
        assert_eq!(parsed.cargo_args, vec!["test", "--release", "-h"]);

        let parsed = parse_localdev_args(["--help"]);
        assert!(parsed.help);
        assert!(parsed.cargo_args.is_empty());

        let parsed = parse_localdev_args(["build", "-sn"]);
        assert!(!parsed.skip_native);
        assert_eq!(parsed.cargo_args, vec!["build", "-sn"]);
    }

    #[test]
    fn test_cargo_invocation_env() {
        let inv = cargo_invocation(
            "cargo",
            &["test".to_string()],
            Os::Linux,
            Arch::Amd64,
            Path::new("/repo/output"),
        );
        assert_eq!(inv.args_lossy(), vec!["test"]);
        assert_eq!(inv.env[DEV_MODE_ENV], "1");
        assert_eq!(
            inv.env[NATIVE_SEARCH_PATH_ENV],
            "/repo/output/linux-x64-libtestoptimization-static"
        );
        assert_eq!(inv.env[DEV_OUTPUT_DIR_ENV], "/repo/output");
    }

    #[test]
    fn test_cargo_invocation_macos_uses_universal_dir() {
        let inv = cargo_invocation("cargo", &[], Os::Macos, Arch::Arm64, Path::new("/o"));
        assert_eq!(inv.env[NATIVE_SEARCH_PATH_ENV], "/o/macos-libtestoptimization-static");
    }

    #[test]
    fn test_render_report() {
        let mut summary = BuildSummary::new("r", "linux-x64", PackageMode::Ci, FailurePolicy::Abort, Vec::new());
        summary.record_target(TargetOutcome::failed(
            "linux-x64-static".parse().unwrap(),
            FailureStage::Build,
            "exit status 2",
            Vec::new(),
            1,
        ));
        summary.finish(1);
        let report = render_report(&summary);
        assert!(report.contains("failed    linux-x64-static [build] exit status 2"));
        assert!(report.ends_with(&summary.human_summary));
    }
}
