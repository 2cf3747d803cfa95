use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::error::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Created,
    Started,
    Recovering,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "CREATED",
            RunStatus::Started => "STARTED",
            RunStatus::Recovering => "RECOVERING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Created, Started)
                | (Started, Finished)
                | (Started, Failed)
                | (Started, Recovering)
                | (Failed, Recovering)
                | (Recovering, Recovering)
                | (Recovering, Finished)
                | (Recovering, Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: RunStatus,
    pub to: RunStatus,
    pub at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Persistent record of one execution of a job.
///
/// Only the orchestrator moves a run between states; everything else reads
/// it. Results live in the store, keyed by [`JobRun::id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transitions: Vec<StatusTransition>,
}

impl JobRun {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            status: RunStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            transitions: Vec::new(),
        }
    }

    pub fn transition_to(&mut self, next: RunStatus) -> Result<(), RunError> {
        if !self.status.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        let since = self
            .transitions
            .last()
            .map(|t| t.at)
            .unwrap_or(self.created_at);
        let elapsed_ms = (now - since).num_milliseconds().max(0) as u64;

        debug!(
            run_id = %self.id,
            from = %self.status,
            to = %next,
            elapsed_ms,
            "Job run status transition"
        );

        self.transitions.push(StatusTransition {
            from: self.status,
            to: next,
            at: now,
            elapsed_ms,
        });
        self.status = next;

        match next {
            RunStatus::Started => self.started_at = Some(now),
            RunStatus::Recovering => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
                self.finished_at = None;
            }
            RunStatus::Finished | RunStatus::Failed => self.finished_at = Some(now),
            RunStatus::Created => {}
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), RunError> {
        self.transition_to(RunStatus::Started)
    }

    pub fn recover(&mut self) -> Result<(), RunError> {
        self.transition_to(RunStatus::Recovering)
    }

    pub fn finish(&mut self) -> Result<(), RunError> {
        self.transition_to(RunStatus::Finished)
    }

    pub fn fail(&mut self) -> Result<(), RunError> {
        self.transition_to(RunStatus::Failed)
    }
}
