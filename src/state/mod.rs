//! Pipeline run state machine
//!
//! Stages: Idle → SyncingSource → PreparingEnvironment → Building ⇄
//! PostProcessing → Fusing → Packaging → Summarizing → {Done | Failed}

mod run_state;

pub use run_state::{RunStateData, Stage, StageError};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide sequence counter for ordering state updates
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
