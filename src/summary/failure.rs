//! Outcome taxonomy and exit codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitCode {
    Success = 0,
    /// Any fatal stage failure or failed target
    Failure = 1,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<ExitCode> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Failure),
            _ => None,
        }
    }
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    /// Some targets failed, the rest were packaged
    Partial,
    Failed,
}

impl RunStatus {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunStatus::Success => ExitCode::Success,
            RunStatus::Partial | RunStatus::Failed => ExitCode::Failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Succeeded,
    Failed,
    /// Not attempted after an earlier failure under the abort policy
    Skipped,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetStatus::Succeeded => "succeeded",
            TargetStatus::Failed => "failed",
            TargetStatus::Skipped => "skipped",
        })
    }
}

/// Where a target failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// A required tool could not be resolved
    Toolchain,
    Build,
    PostProcess,
    Fuse,
    Package,
}

impl FailureStage {
    pub fn description(&self) -> &'static str {
        match self {
            FailureStage::Toolchain => "toolchain resolution failed",
            FailureStage::Build => "compilation failed",
            FailureStage::PostProcess => "post-processing failed",
            FailureStage::Fuse => "universal binary fusion failed",
            FailureStage::Package => "packaging failed",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Toolchain => "toolchain",
            FailureStage::Build => "build",
            FailureStage::PostProcess => "post-process",
            FailureStage::Fuse => "fuse",
            FailureStage::Package => "package",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Success.exit_code().as_i32(), 0);
        assert_eq!(RunStatus::Partial.exit_code().as_i32(), 1);
        assert_eq!(RunStatus::Failed.exit_code(), ExitCode::Failure);
        assert_eq!(ExitCode::from_i32(1), Some(ExitCode::Failure));
        assert_eq!(ExitCode::from_i32(7), None);
    }

    #[test]
    fn test_serialization() {
        assert_eq!(
            serde_json::to_string(&FailureStage::PostProcess).unwrap(),
            "\"post_process\""
        );
        assert_eq!(serde_json::to_string(&TargetStatus::Skipped).unwrap(), "\"skipped\"");
        assert_eq!(FailureStage::Toolchain.to_string(), "toolchain");
    }
}
