//! Build summary (build_summary.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use topt_target::TargetKey;

use super::failure::{FailureStage, RunStatus, TargetStatus};
use crate::artifact::{PackagedArtifact, UniversalArtifact};
use crate::config::{ConfigSource, FailurePolicy, PackageMode};
use crate::postprocess::PostStepOutcome;
use crate::state::Stage;

/// File written into the output directory at the end of every run
pub const SUMMARY_FILE_NAME: &str = "build_summary.json";

/// Result of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: TargetKey,
    pub output_dir: String,
    pub status: TargetStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<FailureStage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_steps: Vec<PostStepOutcome>,

    pub duration_ms: u64,
}

impl TargetOutcome {
    pub fn succeeded(target: TargetKey, post_steps: Vec<PostStepOutcome>, duration_ms: u64) -> Self {
        let warnings = post_steps.iter().filter_map(PostStepOutcome::warning).collect();
        Self {
            target,
            output_dir: target.output_dir_name(),
            status: TargetStatus::Succeeded,
            failed_stage: None,
            message: None,
            warnings,
            post_steps,
            duration_ms,
        }
    }

    pub fn failed(
        target: TargetKey,
        stage: FailureStage,
        message: impl Into<String>,
        post_steps: Vec<PostStepOutcome>,
        duration_ms: u64,
    ) -> Self {
        let warnings = post_steps.iter().filter_map(PostStepOutcome::warning).collect();
        Self {
            target,
            output_dir: target.output_dir_name(),
            status: TargetStatus::Failed,
            failed_stage: Some(stage),
            message: Some(message.into()),
            warnings,
            post_steps,
            duration_ms,
        }
    }

    pub fn skipped(target: TargetKey, reason: impl Into<String>) -> Self {
        Self {
            target,
            output_dir: target.output_dir_name(),
            status: TargetStatus::Skipped,
            failed_stage: None,
            message: Some(reason.into()),
            warnings: Vec::new(),
            post_steps: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// A failure that ended the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalFailure {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    /// ULID of the run
    pub run_id: String,
    pub created_at: DateTime<Utc>,

    /// Host the run executed on (`linux-x64`)
    pub host: String,
    pub mode: PackageMode,
    pub failure_policy: FailurePolicy,

    pub status: RunStatus,
    pub exit_code: i32,

    /// Source revision that was built
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    pub targets: Vec<TargetOutcome>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fused: Vec<UniversalArtifact>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackagedArtifact>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<FatalFailure>,

    pub config_sources: Vec<ConfigSource>,
    pub duration_ms: u64,
    pub human_summary: String,
}

impl BuildSummary {
    pub fn new(
        run_id: impl Into<String>,
        host: impl Into<String>,
        mode: PackageMode,
        failure_policy: FailurePolicy,
        config_sources: Vec<ConfigSource>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            created_at: Utc::now(),
            host: host.into(),
            mode,
            failure_policy,
            status: RunStatus::Success,
            exit_code: 0,
            revision: None,
            targets: Vec::new(),
            fused: Vec::new(),
            packages: Vec::new(),
            fatal: None,
            config_sources,
            duration_ms: 0,
            human_summary: String::new(),
        }
    }

    pub fn record_target(&mut self, outcome: TargetOutcome) {
        self.targets.push(outcome);
    }

    pub fn record_fatal(&mut self, stage: Stage, message: impl Into<String>) {
        self.fatal = Some(FatalFailure {
            stage,
            message: message.into(),
        });
    }

    pub fn target(&self, key: &TargetKey) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.target == *key)
    }

    pub fn target_mut(&mut self, key: &TargetKey) -> Option<&mut TargetOutcome> {
        self.targets.iter_mut().find(|t| t.target == *key)
    }

    pub fn count(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }

    pub fn warnings(&self) -> usize {
        self.targets.iter().map(|t| t.warnings.len()).sum()
    }

    /// Settle status, exit code and the human summary
    pub fn finish(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms;
        let succeeded = self.count(TargetStatus::Succeeded);
        let unsuccessful = self.targets.len() - succeeded;

        self.status = if self.fatal.is_some() || (unsuccessful > 0 && succeeded == 0) {
            RunStatus::Failed
        } else if unsuccessful > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };
        self.exit_code = self.status.exit_code().as_i32();
        self.human_summary = self.render_human_summary();
    }

    fn render_human_summary(&self) -> String {
        let counts = format!(
            "{} succeeded, {} failed, {} skipped; {} packaged",
            self.count(TargetStatus::Succeeded),
            self.count(TargetStatus::Failed),
            self.count(TargetStatus::Skipped),
            self.packages.len()
        );
        let warnings = match self.warnings() {
            0 => String::new(),
            1 => ", 1 warning".to_string(),
            n => format!(", {} warnings", n),
        };

        if let Some(ref fatal) = self.fatal {
            return format!(
                "Build failed during {}: {} ({}{})",
                fatal.stage, fatal.message, counts, warnings
            );
        }
        let first_failure = self
            .targets
            .iter()
            .find(|t| t.status == TargetStatus::Failed)
            .map(|t| {
                format!(
                    "; first failure: {} ({})",
                    t.target,
                    t.failed_stage.map(|s| s.description()).unwrap_or("failed")
                )
            })
            .unwrap_or_default();

        match self.status {
            RunStatus::Success if self.targets.is_empty() => "Build succeeded: no targets".to_string(),
            RunStatus::Success => format!("Build succeeded: {}{}", counts, warnings),
            _ => format!("Build failed: {}{}{}", counts, warnings, first_failure),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write `build_summary.json` into `dir` (write-then-rename)
    pub fn write_to_dir(&self, dir: &Path) -> io::Result<PathBuf> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::create_dir_all(dir)?;
        let path = dir.join(SUMMARY_FILE_NAME);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &path)?;
        Ok(path)
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }
}
