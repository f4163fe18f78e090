//! Build summary (build_summary.json) and per-target outcomes

mod failure;
mod run_summary;

pub use failure::{ExitCode, FailureStage, RunStatus, TargetStatus};
pub use run_summary::{BuildSummary, FatalFailure, TargetOutcome, SUMMARY_FILE_NAME};
