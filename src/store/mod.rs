//! Persistence of job runs and their per-text result bundles.
//!
//! A bundle is written as one unit: either the whole [`ResultRecord`] for a
//! text is stored or nothing is. Text contents are kept once per content
//! hash regardless of how many runs or bundles reference them.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::run::JobRun;
use crate::pipeline::PipelineRunOutput;
use crate::text::content_hash;

pub use file::FileStore;
pub use memory::MemoryStore;

/// One persisted bundle: everything produced for one raw text in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub run_id: Uuid,
    pub raw_hash: String,
    pub preprocessed_hash: String,
    pub recorded_at: DateTime<Utc>,
    pub output: PipelineRunOutput,
}

impl ResultRecord {
    pub fn new(run_id: Uuid, output: PipelineRunOutput) -> Self {
        Self {
            run_id,
            raw_hash: content_hash(&output.raw_text),
            preprocessed_hash: content_hash(&output.preprocessed_text),
            recorded_at: Utc::now(),
            output,
        }
    }
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_run(&self, run: &JobRun) -> Result<(), StoreError>;

    async fn load_run(&self, run_id: Uuid) -> Result<JobRun, StoreError>;

    /// Persists one bundle atomically.
    ///
    /// Returns `false` when this run already holds a bundle for the same raw
    /// text; the stored bundle is left untouched.
    async fn save_output(
        &self,
        run_id: Uuid,
        output: &PipelineRunOutput,
    ) -> Result<bool, StoreError>;

    /// Content hashes of the raw texts that already have a bundle in this run.
    async fn completed_hashes(&self, run_id: Uuid) -> Result<HashSet<String>, StoreError>;

    async fn records(&self, run_id: Uuid) -> Result<Vec<ResultRecord>, StoreError>;
}
