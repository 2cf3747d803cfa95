use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use uuid::Uuid;

use super::{ResultRecord, ResultStore};
use crate::error::StoreError;
use crate::job::run::JobRun;
use crate::pipeline::PipelineRunOutput;
use crate::text::Text;

/// Store kept entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    runs: DashMap<Uuid, JobRun>,
    records: DashMap<Uuid, Vec<ResultRecord>>,
    texts: DashMap<String, Text>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct text contents held, shared by all runs.
    pub fn text_count(&self) -> usize {
        self.texts.len()
    }

    pub fn text(&self, hash: &str) -> Option<Text> {
        self.texts.get(hash).map(|t| t.value().clone())
    }

    fn remember_text(&self, content: &str) {
        let text = Text::new(content);
        self.texts.entry(text.hash.clone()).or_insert(text);
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save_run(&self, run: &JobRun) -> Result<(), StoreError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<JobRun, StoreError> {
        self.runs
            .get(&run_id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn save_output(
        &self,
        run_id: Uuid,
        output: &PipelineRunOutput,
    ) -> Result<bool, StoreError> {
        let record = ResultRecord::new(run_id, output.clone());

        // the shard lock is held for the check and the push
        let mut bundles = self.records.entry(run_id).or_default();
        if bundles.iter().any(|r| r.raw_hash == record.raw_hash) {
            return Ok(false);
        }
        self.remember_text(&output.raw_text);
        self.remember_text(&output.preprocessed_text);
        bundles.push(record);
        Ok(true)
    }

    async fn completed_hashes(&self, run_id: Uuid) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .records
            .get(&run_id)
            .map(|bundles| bundles.iter().map(|r| r.raw_hash.clone()).collect())
            .unwrap_or_default())
    }

    async fn records(&self, run_id: Uuid) -> Result<Vec<ResultRecord>, StoreError> {
        Ok(self
            .records
            .get(&run_id)
            .map(|bundles| bundles.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::Preprocessor;
    use crate::text::content_hash;

    fn output(raw: &str) -> PipelineRunOutput {
        PipelineRunOutput {
            raw_text: raw.to_string(),
            preprocessor: Preprocessor::StripDiacritics,
            preprocessed_text: Preprocessor::StripDiacritics.preprocess(raw),
            attempts: vec![],
        }
    }

    #[tokio::test]
    async fn test_run_round_trip() {
        let store = MemoryStore::new();
        let mut run = JobRun::new("romanian");
        run.start().unwrap();
        store.save_run(&run).await.unwrap();
        assert_eq!(store.load_run(run.id).await.unwrap(), run);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let err = store.load_run(id).await.unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_duplicate_bundle_is_ignored() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        assert!(store.save_output(run_id, &output("pâine")).await.unwrap());
        assert!(!store.save_output(run_id, &output("pâine")).await.unwrap());
        assert!(!store.save_output(run_id, &output("  pâine ")).await.unwrap());

        assert_eq!(store.records(run_id).await.unwrap().len(), 1);
        let done = store.completed_hashes(run_id).await.unwrap();
        assert!(done.contains(&content_hash("pâine")));
    }

    #[tokio::test]
    async fn test_texts_shared_across_runs() {
        let store = MemoryStore::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.save_output(first, &output("pâine")).await.unwrap();
        store.save_output(second, &output("pâine")).await.unwrap();
        store.save_output(second, &output("lapte")).await.unwrap();

        // "pâine", "paine" and "lapte" (already without diacritics)
        assert_eq!(store.text_count(), 3);
        assert_eq!(
            store.text(&content_hash("paine")).unwrap().content,
            "paine"
        );
        assert_eq!(store.records(first).await.unwrap().len(), 1);
        assert_eq!(store.records(second).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_run_has_no_completed_texts() {
        let store = MemoryStore::new();
        assert!(store.completed_hashes(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
