//! Job status registry
//!
//! Process-wide shared mapping from job id to its progress record. The
//! registry is created once at startup and injected wherever it is needed;
//! nothing in the crate reaches for a global. Each entry has a single
//! writer (the runner driving that job) and any number of concurrent
//! readers polling status, and every `update` call becomes visible as one
//! unit. Entries are never evicted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle states of a training job, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Initializing,
    LoadingModel,
    LoadingData,
    Training,
    Completed,
    Failed,
}

impl JobState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Progress record for one training job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(rename = "status")]
    pub state: JobState,
    /// Percent complete, derived from the step counters
    pub progress: u8,
    pub current_step: u32,
    pub total_steps: u32,
    /// Most recently observed training loss, if any
    pub loss: Option<f64>,
    pub started_at: DateTime<Utc>,
    /// Human-readable completion message
    pub message: Option<String>,
    /// Terminal error message for failed jobs
    pub error: Option<String>,
}

/// Partial update merged into a job's record.
///
/// Only the fields set here change; `progress` is always derived from the
/// step counters and cannot be set directly.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub state: Option<JobState>,
    pub current_step: Option<u32>,
    pub loss: Option<f64>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl StatusUpdate {
    /// Update that only moves the state machine.
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Per-step training progress update.
    pub fn step(current_step: u32, loss: f64) -> Self {
        Self {
            state: Some(JobState::Training),
            current_step: Some(current_step),
            loss: Some(loss),
            ..Self::default()
        }
    }

    /// Terminal success update.
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            state: Some(JobState::Completed),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Terminal failure update.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: Some(JobState::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Shared registry of training jobs.
pub struct JobRegistry {
    jobs: DashMap<String, JobStatus>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Create a fresh record for `job_id` in the initializing state.
    pub fn create(&self, job_id: &str, total_steps: u32) {
        self.jobs.insert(
            job_id.to_string(),
            JobStatus {
                state: JobState::Initializing,
                progress: 0,
                current_step: 0,
                total_steps,
                loss: None,
                started_at: Utc::now(),
                message: None,
                error: None,
            },
        );
    }

    /// Merge `update` into the record for `job_id`.
    ///
    /// State only moves forward; a step counter never regresses; a terminal
    /// record accepts no further state changes.
    pub fn update(&self, job_id: &str, update: StatusUpdate) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;
        let status = entry.value_mut();

        if let Some(state) = update.state {
            if !status.state.is_terminal() && state >= status.state {
                status.state = state;
            }
        }
        if let Some(step) = update.current_step {
            status.current_step = status.current_step.max(step);
        }
        if let Some(loss) = update.loss {
            status.loss = Some(loss);
        }
        if let Some(message) = update.message {
            status.message = Some(message);
        }
        if let Some(error) = update.error {
            status.error = Some(error);
        }

        status.progress = if status.state == JobState::Completed {
            status.current_step = status.total_steps;
            100
        } else if status.total_steps == 0 {
            0
        } else {
            ((u64::from(status.current_step) * 100) / u64::from(status.total_steps)).min(100) as u8
        };

        Ok(())
    }

    /// Point read of a job's record.
    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    /// Number of jobs ever registered.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
