//! Run lifecycle and completion metrics.

use serde::Serialize;
use std::path::PathBuf;

/// `Idle → Running → Completed | Failed | Cancelled`. Terminal states
/// release every collaborator; a second run is only possible when the source
/// adapter is restartable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Metrics for one completed (or cancelled) run. The counters obey
/// `records_in == records_out + records_failed + records_filtered`:
/// dead-lettered records count as failed, records dropped without a DLQ
/// entry count as filtered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub records_in: u64,
    pub records_out: u64,
    pub records_failed: u64,
    pub records_filtered: u64,
    pub bytes_written: u64,
    pub elapsed_seconds: f64,
    pub records_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_path: Option<PathBuf>,
}

impl PipelineResult {
    pub(crate) fn finish(mut self, elapsed: std::time::Duration) -> PipelineResult {
        self.elapsed_seconds = elapsed.as_secs_f64();
        self.records_per_second = if self.elapsed_seconds > 0.0 {
            self.records_in as f64 / self.elapsed_seconds
        } else {
            0.0
        };
        self
    }
}
