//! Binary post-processing
//!
//! Which steps run depends only on the target:
//! - Strip symbols: macOS and Linux shared libraries
//! - Remove unwind tables: Windows static archives
//! - Compress: Windows and Android shared libraries
//!
//! Every step rewrites a copy and replaces the original only on success.
//! Stripping and compression are optional and degrade to a warning when
//! their tool is missing or fails. Unwind removal is required.

mod compress;
mod inspect;
mod strip;
mod unwind;

pub use compress::{compress_in_place, CompressOutcome};
pub use inspect::{scan_archive, ArchiveReport, MemberReport, UNWIND_SECTIONS};
pub use strip::{strip_args, strip_in_place};
pub use unwind::{remove_unwind_sections, UnwindOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use topt_target::{LinkMode, Os, TargetKey};

use crate::artifact::BuildArtifact;
use crate::process::{CommandRunner, ProcessError};
use crate::toolchain::{PlatformToolchain, ToolError};

/// Post-processing errors
#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("inspecting {} failed: {message}", .path.display())]
    Inspect { path: PathBuf, message: String },

    #[error("archive {} has no members", .0.display())]
    EmptyArchive(PathBuf),

    #[error("unwind sections remain after rewrite: {}", .members.join(", "))]
    UnwindRemains { members: Vec<String> },

    #[error("rewritten archive lost symbols: {}", .symbols.join(", "))]
    SymbolsLost { symbols: Vec<String> },

    #[error("rewrite of {} produced an empty file", .0.display())]
    EmptyResult(PathBuf),

    #[error("walking extracted members failed: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// A post-processing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStep {
    Strip,
    RemoveUnwind,
    Compress,
}

impl PostStep {
    /// Steps for a target, in execution order
    pub fn plan(key: &TargetKey) -> Vec<PostStep> {
        let mut steps = Vec::new();
        match (key.os, key.link_mode) {
            (Os::Macos | Os::Linux, LinkMode::Dynamic) => steps.push(PostStep::Strip),
            (Os::Windows, LinkMode::Static) => steps.push(PostStep::RemoveUnwind),
            _ => {}
        }
        if key.link_mode == LinkMode::Dynamic && matches!(key.os, Os::Windows | Os::Android) {
            steps.push(PostStep::Compress);
        }
        steps
    }
}

impl fmt::Display for PostStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PostStep::Strip => "strip",
            PostStep::RemoveUnwind => "remove-unwind",
            PostStep::Compress => "compress",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    Skipped,
    Failed,
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStepOutcome {
    pub step: PostStep,
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PostStepOutcome {
    pub fn applied(step: PostStep, detail: Option<String>) -> Self {
        Self {
            step,
            status: StepStatus::Applied,
            detail,
        }
    }

    pub fn skipped(step: PostStep, reason: impl Into<String>) -> Self {
        Self {
            step,
            status: StepStatus::Skipped,
            detail: Some(reason.into()),
        }
    }

    pub fn failed(step: PostStep, message: impl Into<String>) -> Self {
        Self {
            step,
            status: StepStatus::Failed,
            detail: Some(message.into()),
        }
    }

    /// Skipped and failed optional steps are reported as warnings
    pub fn warning(&self) -> Option<String> {
        match self.status {
            StepStatus::Applied => None,
            _ => Some(format!(
                "{} {}: {}",
                self.step,
                match self.status {
                    StepStatus::Skipped => "skipped",
                    _ => "failed",
                },
                self.detail.as_deref().unwrap_or("no detail")
            )),
        }
    }
}

/// Run `rewrite` on a copy of `path` in a scratch directory beside it.
///
/// When `rewrite` returns `(value, true)` the copy replaces the original
/// with a rename; on `(value, false)` or an error the original is untouched.
pub(crate) fn rewrite_via_copy<T>(
    path: &Path,
    rewrite: impl FnOnce(&Path) -> Result<(T, bool), PostProcessError>,
) -> Result<T, PostProcessError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().ok_or_else(|| PostProcessError::Inspect {
        path: path.to_path_buf(),
        message: "path has no file name".to_string(),
    })?;
    let scratch = tempfile::Builder::new()
        .prefix(".rewrite-")
        .tempdir_in(parent)?;
    let copy = scratch.path().join(file_name);
    fs::copy(path, &copy)?;

    let (value, replace) = rewrite(&copy)?;
    if replace {
        if fs::metadata(&copy)?.len() == 0 {
            return Err(PostProcessError::EmptyResult(path.to_path_buf()));
        }
        fs::rename(&copy, path)?;
    }
    Ok(value)
}

/// Applies a target's post-processing plan
pub struct PostProcessor<'a> {
    runner: &'a dyn CommandRunner,
    toolchain: &'a dyn PlatformToolchain,
}

impl<'a> PostProcessor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, toolchain: &'a dyn PlatformToolchain) -> Self {
        Self { runner, toolchain }
    }

    /// Run every planned step. An error means a required step failed and
    /// the target must be treated as failed.
    pub fn process(&self, artifact: &BuildArtifact) -> Result<Vec<PostStepOutcome>, PostProcessError> {
        let key = artifact.key();
        let binary = &artifact.binary_path;
        let mut outcomes = Vec::new();

        for step in PostStep::plan(&key) {
            let outcome = match step {
                PostStep::Strip => self.strip(key.os, binary),
                PostStep::RemoveUnwind => self.remove_unwind(binary)?,
                PostStep::Compress => self.compress(binary),
            };
            match outcome.warning() {
                Some(warning) => warn!(target = %key, "{}", warning),
                None => info!(target = %key, step = %step, detail = ?outcome.detail, "post-processed"),
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn strip(&self, os: Os, binary: &Path) -> PostStepOutcome {
        let tool = match self.toolchain.resolve_stripper() {
            Ok(tool) => tool,
            Err(e) => return PostStepOutcome::skipped(PostStep::Strip, e.to_string()),
        };
        match strip_in_place(self.runner, &tool.path, os, binary) {
            Ok(()) => PostStepOutcome::applied(PostStep::Strip, None),
            Err(e) => PostStepOutcome::failed(PostStep::Strip, e.to_string()),
        }
    }

    fn remove_unwind(&self, binary: &Path) -> Result<PostStepOutcome, PostProcessError> {
        let tools = self.toolchain.resolve_archiver()?;
        let detail = match remove_unwind_sections(self.runner, &tools, binary)? {
            UnwindOutcome::AlreadyClean => "no unwind sections present".to_string(),
            UnwindOutcome::Removed { cleaned, members } => {
                format!("cleaned {} of {} members", cleaned, members)
            }
        };
        Ok(PostStepOutcome::applied(PostStep::RemoveUnwind, Some(detail)))
    }

    fn compress(&self, binary: &Path) -> PostStepOutcome {
        let upx = match self.toolchain.resolve_compressor() {
            Ok(path) => path,
            Err(e) => {
                return PostStepOutcome::skipped(
                    PostStep::Compress,
                    format!("compressor unavailable, shipping uncompressed: {}", e),
                )
            }
        };
        match compress_in_place(self.runner, &upx, binary) {
            Ok(CompressOutcome::Compressed) => PostStepOutcome::applied(PostStep::Compress, None),
            Ok(CompressOutcome::AlreadyCompressed) => PostStepOutcome::applied(
                PostStep::Compress,
                Some("already compressed".to_string()),
            ),
            Err(e) => PostStepOutcome::failed(PostStep::Compress, e.to_string()),
        }
    }
}
