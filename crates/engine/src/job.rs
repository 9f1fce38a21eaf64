use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle state of one transcode attempt.
///
/// `Stopped` is part of the external status vocabulary but transient in
/// practice: the orchestrator resolves every stop straight back to `Queued`
/// with zero progress. The UI never observes mutation rights on this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
    /// Never a resting state here: the orchestrator resolves every stop
    /// straight back to `Queued`. Kept for front ends that render an
    /// in-flight stop distinctly.
    Stopped,
}

impl JobStatus {
    /// Terminal for aggregate-progress purposes
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// One file's transcode attempt. Mutated only by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub source_path: PathBuf,
    pub name: String,
    pub status: JobStatus,
    /// Percent in [0, 100], monotonic non-decreasing while `Processing`
    pub progress: f32,
    /// Source size in bytes, 0 when the probe failed
    pub original_size: u64,
    /// Set only on `Completed`
    pub output_size: Option<u64>,
    /// Set only on `Completed`
    pub output_path: Option<PathBuf>,
    /// Human-readable failure reason, set only on `Error`
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(source_path: PathBuf, original_size: u64) -> Self {
        let name = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Self {
            id: Uuid::new_v4(),
            source_path,
            name,
            status: JobStatus::Queued,
            progress: 0.0,
            original_size,
            output_size: None,
            output_path: None,
            reason: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Reset for a fresh run: back to the queue with no progress and no
    /// leftovers from a previous attempt.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Queued;
        self.progress = 0.0;
        self.output_size = None;
        self.output_path = None;
        self.reason = None;
        self.started_at = None;
        self.finished_at = None;
    }

    /// Apply a progress update; values never go backwards while processing.
    pub fn update_progress(&mut self, percent: f32) {
        if self.status == JobStatus::Processing {
            self.progress = self.progress.max(percent.clamp(0.0, 100.0));
        }
    }
}
