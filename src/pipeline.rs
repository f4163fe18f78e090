//! Pipeline orchestration
//!
//! One run, strictly in order:
//! - Synchronize the external source and copy the native sources into it
//! - Prepare the output directory and resolve the Go toolchain
//! - Build and post-process each target
//! - Fuse macOS architectures
//! - Package every logical output
//! - Write the build summary
//!
//! A failed target is recorded and, under the abort policy, stops the
//! remaining targets and packaging. Failures outside a target (source sync,
//! missing Go, packaging) end the run. Either way the summary is written and
//! outputs already produced stay on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use topt_target::{Arch, BuildTarget, Os, TargetKey, TargetMatrix};

use crate::artifact::{
    remove_stale_package, verify_binary, verify_package, BinaryKind, BuildArtifact,
    PackagingError, Packager, UniversalArtifact,
};
use crate::build::{BuildEnvironment, Builder};
use crate::config::{ConfigError, ConfigSource, EffectiveConfig, FailurePolicy, PipelineSettings};
use crate::fuse::Fuser;
use crate::postprocess::{PostProcessor, PostStepOutcome};
use crate::process::CommandRunner;
use crate::source::{Overlay, SourceSync, SyncError};
use crate::state::{RunStateData, Stage, StageError};
use crate::summary::{BuildSummary, FailureStage, TargetOutcome, TargetStatus};
use crate::toolchain::{PlatformToolchain, ResolvedTool, ToolError};

/// Failures that end a run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("required tool missing: {0}")]
    Tool(#[from] ToolError),

    #[error("source synchronization failed: {0}")]
    Sync(#[from] SyncError),

    #[error("target {target} cannot be built on a {host} host")]
    UnsupportedTarget { target: TargetKey, host: Os },

    #[error("packaging failed: {0}")]
    Packaging(#[from] PackagingError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("writing the build summary failed: {0}")]
    Summary(#[source] io::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// A target that failed partway
struct TargetFailure {
    stage: FailureStage,
    message: String,
    post_steps: Vec<PostStepOutcome>,
}

impl TargetFailure {
    fn new(stage: FailureStage, error: impl ToString) -> Self {
        Self {
            stage,
            message: error.to_string(),
            post_steps: Vec::new(),
        }
    }
}

/// Everything one run needs
pub struct Pipeline {
    settings: PipelineSettings,
    config_sources: Vec<ConfigSource>,
    workdir: PathBuf,
    host: Os,
    host_arch: Arch,
    runner: Arc<dyn CommandRunner>,
    toolchain: Box<dyn PlatformToolchain>,
}

impl Pipeline {
    pub fn new(
        config: &EffectiveConfig,
        workdir: impl Into<PathBuf>,
        host_arch: Arch,
        runner: Arc<dyn CommandRunner>,
        toolchain: Box<dyn PlatformToolchain>,
    ) -> Self {
        Self {
            settings: config.settings.clone(),
            config_sources: config.sources.clone(),
            workdir: workdir.into(),
            host: toolchain.host(),
            host_arch,
            runner,
            toolchain,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn output_root(&self) -> PathBuf {
        self.settings.output_root(&self.workdir)
    }

    /// Run every stage and write `build_summary.json`.
    ///
    /// Stage failures are reported in the returned summary (and its exit
    /// code); `Err` means the summary itself could not be produced.
    pub fn run(&self) -> Result<BuildSummary, PipelineError> {
        let started = Instant::now();
        let run_id = ulid::Ulid::new().to_string();
        let mut state = RunStateData::new(run_id.clone());
        let mut summary = BuildSummary::new(
            run_id,
            format!("{}-{}", self.host, self.host_arch),
            self.settings.output.mode,
            self.settings.failure_policy,
            self.config_sources.clone(),
        );
        info!(
            run_id = %summary.run_id,
            host = %summary.host,
            mode = %self.settings.output.mode,
            policy = %self.settings.failure_policy,
            "starting native build"
        );

        match self.execute(&mut state, &mut summary) {
            Ok(()) => state.transition(Stage::Summarizing)?,
            Err(e) => {
                error!(stage = %state.stage, "{}", e);
                summary.record_fatal(state.stage, e.to_string());
                state.fail()?;
            }
        }

        summary.finish(millis(started.elapsed()));
        let path = summary
            .write_to_dir(&self.output_root())
            .map_err(PipelineError::Summary)?;
        if state.stage == Stage::Summarizing {
            state.transition(Stage::Done)?;
        }
        info!(summary = %path.display(), exit_code = summary.exit_code, "{}", summary.human_summary);
        Ok(summary)
    }

    fn execute(
        &self,
        state: &mut RunStateData,
        summary: &mut BuildSummary,
    ) -> Result<(), PipelineError> {
        let output_root = self.output_root();

        state.transition(Stage::SyncingSource)?;
        let package_dir = self.sync_source(&output_root, summary)?;

        state.transition(Stage::PreparingEnvironment)?;
        let matrix = self.settings.matrix(self.host, self.host_arch)?;
        let go = self.prepare(&matrix, &output_root)?;

        let mut built: BTreeMap<TargetKey, BuildArtifact> = BTreeMap::new();
        let mut aborted = false;
        for target in matrix.iter() {
            let key = target.key();
            if aborted {
                summary.record_target(TargetOutcome::skipped(
                    key,
                    "not attempted after an earlier failure",
                ));
                continue;
            }

            let started = Instant::now();
            state.enter_target(Stage::Building, key)?;
            let result = self.build_target(target, &go, &package_dir, &output_root, state);
            let elapsed = millis(started.elapsed());
            match result {
                Ok((artifact, steps)) => {
                    summary.record_target(TargetOutcome::succeeded(key, steps, elapsed));
                    built.insert(key, artifact);
                }
                Err(failure) => {
                    error!(target = %key, stage = %failure.stage, "{}", failure.message);
                    summary.record_target(TargetOutcome::failed(
                        key,
                        failure.stage,
                        failure.message,
                        failure.post_steps,
                        elapsed,
                    ));
                    aborted = self.settings.failure_policy == FailurePolicy::Abort;
                }
            }
        }

        let groups = matrix.fusion_groups();
        if !aborted && !groups.is_empty() {
            state.transition(Stage::Fusing)?;
            for group in groups {
                let ok = self.fuse_group(group.members, &built, &output_root, summary);
                if !ok && self.settings.failure_policy == FailurePolicy::Abort {
                    aborted = true;
                    break;
                }
            }
        }

        if aborted {
            warn!("skipping packaging after a failed target; outputs are left unpackaged");
            return Ok(());
        }

        state.transition(Stage::Packaging)?;
        for dir in self.package_dirs(&matrix, summary, &output_root) {
            let packaged = Packager::new(self.settings.output.mode).package(&dir)?;
            verify_package(&packaged)?;
            summary.packages.push(packaged);
        }
        Ok(())
    }

    /// Synchronize the checkout and apply the overlay; returns the directory
    /// holding the native package inside the checkout
    fn sync_source(
        &self,
        output_root: &Path,
        summary: &mut BuildSummary,
    ) -> Result<PathBuf, PipelineError> {
        let git = self.toolchain.resolve_git()?;
        let checkout_path = self.settings.checkout_path(&self.workdir);
        let checkout = SourceSync::new(self.runner.as_ref(), &git.path).ensure_source(
            &checkout_path,
            &self.settings.source.remote_url,
            &self.settings.source.branch,
        )?;
        summary.revision = Some(checkout.revision.clone());

        let package_dir = checkout_path.join(&self.settings.source.native_subpath);
        let copied = Overlay::new(
            self.settings.overlay_path(&self.workdir),
            &self.settings.overlay.patterns,
        )?
        .exclude(&checkout_path)
        .exclude(output_root)
        .apply(&package_dir)?;
        info!(
            revision = %checkout.revision,
            files = copied,
            dest = %package_dir.display(),
            "native sources in place"
        );
        Ok(package_dir)
    }

    /// Validate the matrix, resolve Go and clear stale release files
    fn prepare(&self, matrix: &TargetMatrix, output_root: &Path) -> Result<ResolvedTool, PipelineError> {
        if let Some(target) = matrix.iter().find(|t| !self.toolchain.supports(&t.key())) {
            return Err(PipelineError::UnsupportedTarget {
                target: target.key(),
                host: self.host,
            });
        }
        let go = self.toolchain.resolve_go()?;
        fs::create_dir_all(output_root)?;

        for target in matrix.iter() {
            let key = target.key();
            remove_stale_package(output_root, &key.output_dir_name())?;
            if key.logical_name() != key.output_dir_name() {
                remove_stale_package(output_root, &key.logical_name())?;
            }
        }
        info!(
            targets = matrix.len(),
            go = %go.path.display(),
            output = %output_root.display(),
            "environment ready"
        );
        Ok(go)
    }

    fn build_target(
        &self,
        target: &BuildTarget,
        go: &ResolvedTool,
        package_dir: &Path,
        output_root: &Path,
        state: &mut RunStateData,
    ) -> Result<(BuildArtifact, Vec<PostStepOutcome>), TargetFailure> {
        let key = target.key();
        let compiler = self
            .toolchain
            .resolve_compiler(target)
            .map_err(|e| TargetFailure::new(FailureStage::Toolchain, e))?;
        let env = BuildEnvironment::new(target, &compiler, &self.settings.flags);

        let artifact = Builder::new(self.runner.as_ref(), &go.path)
            .build(target, &env, package_dir, output_root)
            .map_err(|e| TargetFailure::new(FailureStage::Build, e))?;
        verify_binary(
            &artifact.binary_path,
            BinaryKind::expected_for(key.os, key.link_mode),
        )
        .map_err(|e| TargetFailure::new(FailureStage::Build, e))?;

        state
            .enter_target(Stage::PostProcessing, key)
            .map_err(|e| TargetFailure::new(FailureStage::PostProcess, e))?;
        let steps = PostProcessor::new(self.runner.as_ref(), self.toolchain.as_ref())
            .process(&artifact)
            .map_err(|e| TargetFailure::new(FailureStage::PostProcess, e))?;
        Ok((artifact, steps))
    }

    /// Fuse one macOS pair. Returns false when the pair could not be fused;
    /// both members are then marked failed.
    fn fuse_group(
        &self,
        members: [TargetKey; 2],
        built: &BTreeMap<TargetKey, BuildArtifact>,
        output_root: &Path,
        summary: &mut BuildSummary,
    ) -> bool {
        let result = match (built.get(&members[0]), built.get(&members[1])) {
            (Some(a), Some(b)) => self.fuse_pair([a, b], output_root),
            (Some(_), None) | (None, Some(_)) => {
                // The sibling already failed and is reported on its own
                Err("sibling architecture failed to build".to_string())
            }
            (None, None) => return true,
        };

        match result {
            Ok(universal) => {
                summary.fused.push(universal);
                true
            }
            Err(message) => {
                for key in members.iter().filter(|k| built.contains_key(k)) {
                    error!(target = %key, "{}", message);
                    if let Some(outcome) = summary.target_mut(key) {
                        outcome.status = TargetStatus::Failed;
                        outcome.failed_stage = Some(FailureStage::Fuse);
                        outcome.message = Some(message.clone());
                    }
                }
                false
            }
        }
    }

    fn fuse_pair(
        &self,
        pair: [&BuildArtifact; 2],
        output_root: &Path,
    ) -> Result<UniversalArtifact, String> {
        let lipo = match self.toolchain.resolve_fuser() {
            Some(Ok(tool)) => tool,
            Some(Err(e)) => return Err(e.to_string()),
            None => return Err(format!("no fusion tool on a {} host", self.host)),
        };
        Fuser::new(self.runner.as_ref(), &lipo.path)
            .fuse(pair, output_root)
            .map_err(|e| e.to_string())
    }

    /// Logical output directories to package, in matrix order
    fn package_dirs(
        &self,
        matrix: &TargetMatrix,
        summary: &BuildSummary,
        output_root: &Path,
    ) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for target in matrix.iter() {
            let key = target.key();
            let succeeded = summary
                .target(&key)
                .map(|t| t.status == TargetStatus::Succeeded)
                .unwrap_or(false);
            if !succeeded {
                continue;
            }
            // a macOS slice selected without its sibling ships unfused
            let name = if key.needs_fusion() && !matrix.contains(&key.sibling()) {
                key.output_dir_name()
            } else {
                key.logical_name()
            };
            let dir = output_root.join(name);
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
