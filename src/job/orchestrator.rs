use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::run::{JobRun, RunStatus};
use crate::error::RunError;
use crate::metrics::Metrics;
use crate::pipeline::{GenerationAttempt, PipelineRunOutput, PipelineRunner};
use crate::store::ResultStore;
use crate::text::{short_text, Text};

pub const DEFAULT_TEXT_WORKERS: usize = 8;

/// Counts reported when a run (or recovery) returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Texts handed to the orchestrator.
    pub total: usize,
    /// Texts with a bundle from an earlier attempt of this run.
    pub already_done: usize,
    pub scheduled: usize,
    pub persisted: usize,
    /// Bundles the store already held for the same raw text.
    pub duplicates: usize,
    /// Texts not started because the run had halted.
    pub skipped: usize,
    pub persist_failures: usize,
    pub crashed: usize,
    pub generation_ok: usize,
    pub generation_failed: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    fn new(run_id: Uuid, total: usize, already_done: usize, scheduled: usize) -> Self {
        Self {
            run_id,
            status: RunStatus::Started,
            total,
            already_done,
            scheduled,
            persisted: 0,
            duplicates: 0,
            skipped: 0,
            persist_failures: 0,
            crashed: 0,
            generation_ok: 0,
            generation_failed: 0,
            duration_ms: 0,
        }
    }
}

enum TextOutcome {
    Completed(PipelineRunOutput),
    Skipped(Text),
}

/// Drives a [`PipelineRunner`] over a batch of texts for one [`JobRun`].
///
/// Texts run on a bounded pool and are persisted one bundle at a time as
/// they complete. A store failure moves the run to FAILED and stops new
/// texts from starting; texts already in flight finish and are still
/// offered to the store.
pub struct Orchestrator {
    store: Arc<dyn ResultStore>,
    runner: Arc<PipelineRunner>,
    text_workers: usize,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ResultStore>, runner: Arc<PipelineRunner>) -> Self {
        Self {
            store,
            runner,
            text_workers: DEFAULT_TEXT_WORKERS,
            metrics: Metrics::new(),
        }
    }

    pub fn with_text_workers(mut self, workers: usize) -> Self {
        self.text_workers = workers.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Creates and saves a fresh run in CREATED.
    pub async fn create_run(&self, job_name: &str) -> Result<JobRun, RunError> {
        let run = JobRun::new(job_name);
        self.store.save_run(&run).await?;
        info!(run_id = %run.id, job = %job_name, "Created job run");
        Ok(run)
    }

    /// Runs every text of the batch.
    pub async fn start(&self, run: &mut JobRun, texts: &[Text]) -> Result<RunSummary, RunError> {
        run.start()?;
        self.store.save_run(run).await?;
        info!(run_id = %run.id, texts = texts.len(), "Starting job run");

        let summary = RunSummary::new(run.id, texts.len(), 0, texts.len());
        self.execute(run, texts.to_vec(), summary).await
    }

    /// Resumes a run, skipping texts whose bundle this run already stored.
    pub async fn recover(&self, run: &mut JobRun, texts: &[Text]) -> Result<RunSummary, RunError> {
        run.recover()?;
        self.store.save_run(run).await?;

        let done = self.store.completed_hashes(run.id).await?;
        let pending: Vec<Text> = texts
            .iter()
            .filter(|t| !done.contains(&t.hash))
            .cloned()
            .collect();
        let already_done = texts.len() - pending.len();

        info!(
            run_id = %run.id,
            texts = texts.len(),
            already_done,
            pending = pending.len(),
            "Recovering job run"
        );

        let summary = RunSummary::new(run.id, texts.len(), already_done, pending.len());
        self.execute(run, pending, summary).await
    }

    async fn execute(
        &self,
        run: &mut JobRun,
        texts: Vec<Text>,
        mut summary: RunSummary,
    ) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        self.metrics.start_run();

        let semaphore = Arc::new(Semaphore::new(self.text_workers));
        let halted = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for text in texts {
            let runner = Arc::clone(&self.runner);
            let sem = Arc::clone(&semaphore);
            let halted = Arc::clone(&halted);

            tasks.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return TextOutcome::Skipped(text),
                };
                if halted.load(Ordering::SeqCst) {
                    return TextOutcome::Skipped(text);
                }
                TextOutcome::Completed(runner.run(&text.content).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let output = match joined {
                Ok(TextOutcome::Completed(output)) => output,
                Ok(TextOutcome::Skipped(text)) => {
                    debug!(
                        run_id = %run.id,
                        text = %short_text(&text.content),
                        "Skipped text after halt"
                    );
                    summary.skipped += 1;
                    self.metrics.record_skipped();
                    continue;
                }
                Err(e) => {
                    error!(run_id = %run.id, "Text task panicked: {}", e);
                    summary.crashed += 1;
                    continue;
                }
            };

            self.record_generations(&output, &mut summary);

            match self.store.save_output(run.id, &output).await {
                Ok(true) => {
                    summary.persisted += 1;
                    self.metrics.record_persisted();
                    debug!(
                        run_id = %run.id,
                        text = %short_text(&output.raw_text),
                        "Persisted text bundle"
                    );
                }
                Ok(false) => {
                    summary.duplicates += 1;
                    warn!(
                        run_id = %run.id,
                        text = %short_text(&output.raw_text),
                        "Bundle already stored for this run"
                    );
                }
                Err(e) => {
                    summary.persist_failures += 1;
                    self.metrics.record_persist_failure();
                    error!(
                        run_id = %run.id,
                        text = %short_text(&output.raw_text),
                        error = %e,
                        "Failed to persist text bundle"
                    );
                    if !halted.swap(true, Ordering::SeqCst) {
                        run.fail()?;
                        if let Err(e) = self.store.save_run(run).await {
                            error!(run_id = %run.id, error = %e, "Failed to record FAILED status");
                        }
                    }
                }
            }
        }

        let failed = halted.load(Ordering::SeqCst);
        if !failed {
            run.finish()?;
        }
        self.metrics.finish_run(failed);

        summary.status = run.status;
        summary.duration_ms = started.elapsed().as_millis() as u64;

        if failed {
            // the store already failed once; a second failure here changes nothing
            if let Err(e) = self.store.save_run(run).await {
                error!(run_id = %run.id, error = %e, "Failed to save failed job run");
            }
            warn!(
                run_id = %run.id,
                persisted = summary.persisted,
                skipped = summary.skipped,
                persist_failures = summary.persist_failures,
                "Job run failed"
            );
        } else {
            self.store.save_run(run).await?;
            info!(
                run_id = %run.id,
                persisted = summary.persisted,
                already_done = summary.already_done,
                generation_ok = summary.generation_ok,
                generation_failed = summary.generation_failed,
                duration_ms = summary.duration_ms,
                "Job run finished"
            );
        }

        Ok(summary)
    }

    fn record_generations(&self, output: &PipelineRunOutput, summary: &mut RunSummary) {
        for attempt in &output.attempts {
            match attempt {
                GenerationAttempt::Succeeded(o) => {
                    summary.generation_ok += 1;
                    self.metrics
                        .record_generation(true, (o.generation_time * 1000.0) as u64);
                }
                GenerationAttempt::Failed(_) => {
                    summary.generation_failed += 1;
                    self.metrics.record_generation(false, 0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, StoreError};
    use crate::evaluation::Evaluator;
    use crate::generation::{GenerationClient, Model, ModelDescriptor, ProcessingStrategy};
    use crate::preprocess::Preprocessor;
    use crate::prompt::PromptTemplate;
    use crate::store::{MemoryStore, ResultRecord};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Returns the prompt unchanged and counts calls.
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationClient for Echo {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(prompt.to_string())
        }
    }

    /// Fails every generation whose prompt mentions "poison".
    struct Picky;

    #[async_trait]
    impl GenerationClient for Picky {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            if prompt.contains("poison") {
                Err(GenerationError::Request("refused".to_string()))
            } else {
                Ok(prompt.to_string())
            }
        }
    }

    /// Records how many generations run at once.
    struct Tracker {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl GenerationClient for Tracker {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(prompt.to_string())
        }
    }

    /// Takes 50 ms on prompts mentioning "slow", answers the rest at once.
    struct SlowOnDemand;

    #[async_trait]
    impl GenerationClient for SlowOnDemand {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            if prompt.contains("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(prompt.to_string())
        }
    }

    /// Delegates to a [`MemoryStore`] but rejects bundles after `accept` saves.
    struct FlakyStore {
        inner: MemoryStore,
        accept: usize,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl ResultStore for FlakyStore {
        async fn save_run(&self, run: &JobRun) -> Result<(), StoreError> {
            self.inner.save_run(run).await
        }

        async fn load_run(&self, run_id: Uuid) -> Result<JobRun, StoreError> {
            self.inner.load_run(run_id).await
        }

        async fn save_output(
            &self,
            run_id: Uuid,
            output: &PipelineRunOutput,
        ) -> Result<bool, StoreError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) >= self.accept {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.inner.save_output(run_id, output).await
        }

        async fn completed_hashes(&self, run_id: Uuid) -> Result<HashSet<String>, StoreError> {
            self.inner.completed_hashes(run_id).await
        }

        async fn records(&self, run_id: Uuid) -> Result<Vec<ResultRecord>, StoreError> {
            self.inner.records(run_id).await
        }
    }

    fn runner(
        client: Arc<dyn GenerationClient>,
        models: usize,
        templates: usize,
    ) -> Arc<PipelineRunner> {
        let models = (0..models)
            .map(|i| {
                Model::new(
                    ModelDescriptor::new("test", format!("m{}", i)),
                    client.clone(),
                )
            })
            .collect();
        let templates = (0..templates)
            .map(|i| PromptTemplate::new(format!("t{}.md", i), "{input}").unwrap())
            .collect();
        Arc::new(
            PipelineRunner::new(
                Preprocessor::Basic,
                ProcessingStrategy::Direct,
                models,
                templates,
                vec![Evaluator::from_key("RA_CS_CL").unwrap()],
            )
            .unwrap(),
        )
    }

    fn texts(n: usize) -> Vec<Text> {
        (0..n).map(|i| Text::new(format!("Textul numărul {}", i))).collect()
    }

    #[tokio::test]
    async fn test_start_persists_every_text() {
        let echo = Arc::new(Echo { calls: AtomicUsize::new(0) });
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(store.clone(), runner(echo.clone(), 2, 2))
            .with_text_workers(3);

        let mut run = orchestrator.create_run("romanian").await.unwrap();
        let summary = orchestrator.start(&mut run, &texts(5)).await.unwrap();

        assert_eq!(summary.status, RunStatus::Finished);
        assert_eq!(summary.scheduled, 5);
        assert_eq!(summary.persisted, 5);
        assert_eq!(summary.generation_ok, 20);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 20);

        let records = store.records(run.id).await.unwrap();
        assert_eq!(records.len(), 5);
        for record in &records {
            assert_eq!(record.output.attempts.len(), 4);
            let best = record.output.ranked()[0];
            assert_eq!(best.score("RA_CS_CL"), Some(1.0));
        }

        let saved = store.load_run(run.id).await.unwrap();
        assert_eq!(saved.status, RunStatus::Finished);
        assert!(saved.finished_at.is_some());
        assert_eq!(orchestrator.metrics().texts_persisted.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_text_workers_bound_concurrent_texts() {
        let tracker = Arc::new(Tracker {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(store.clone(), runner(tracker.clone(), 1, 1))
            .with_text_workers(2);

        let mut run = orchestrator.create_run("romanian").await.unwrap();
        let summary = orchestrator.start(&mut run, &texts(8)).await.unwrap();

        assert_eq!(summary.persisted, 8);
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bundles_persisted_in_completion_order() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(store.clone(), runner(Arc::new(SlowOnDemand), 1, 1))
            .with_text_workers(2);
        let batch = vec![Text::new("slow text"), Text::new("fast text")];

        let mut run = orchestrator.create_run("romanian").await.unwrap();
        let summary = orchestrator.start(&mut run, &batch).await.unwrap();
        assert_eq!(summary.persisted, 2);

        let records = store.records(run.id).await.unwrap();
        let order: Vec<&str> = records.iter().map(|r| r.output.raw_text.as_str()).collect();
        assert_eq!(order, vec!["fast text", "slow text"]);
    }

    #[tokio::test]
    async fn test_generation_failures_do_not_fail_run() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(store.clone(), runner(Arc::new(Picky), 1, 1));
        let batch = vec![Text::new("good text"), Text::new("poison text")];

        let mut run = orchestrator.create_run("romanian").await.unwrap();
        let summary = orchestrator.start(&mut run, &batch).await.unwrap();

        assert_eq!(summary.status, RunStatus::Finished);
        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.generation_ok, 1);
        assert_eq!(summary.generation_failed, 1);

        let records = store.records(run.id).await.unwrap();
        let poisoned = records
            .iter()
            .find(|r| r.output.raw_text == "poison text")
            .unwrap();
        assert_eq!(poisoned.output.outputs().count(), 0);
        assert_eq!(poisoned.output.failures().count(), 1);
    }

    #[tokio::test]
    async fn test_recover_runs_only_missing_texts() {
        let echo = Arc::new(Echo { calls: AtomicUsize::new(0) });
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(store.clone(), runner(echo.clone(), 2, 3));
        let batch = texts(7);

        // a crash after three texts were stored
        let mut run = orchestrator.create_run("romanian").await.unwrap();
        run.start().unwrap();
        store.save_run(&run).await.unwrap();
        let plain = runner(Arc::new(Picky), 2, 3);
        for text in &batch[..3] {
            store.save_output(run.id, &plain.run(&text.content).await).await.unwrap();
        }

        let summary = orchestrator.recover(&mut run, &batch).await.unwrap();
        assert_eq!(summary.status, RunStatus::Finished);
        assert_eq!(summary.already_done, 3);
        assert_eq!(summary.scheduled, 4);
        assert_eq!(summary.persisted, 4);
        assert_eq!(summary.duplicates, 0);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 4 * 6);

        let records = store.records(run.id).await.unwrap();
        assert_eq!(records.len(), 7);
        let distinct: HashSet<&str> = records.iter().map(|r| r.raw_hash.as_str()).collect();
        assert_eq!(distinct.len(), 7);

        let saved = store.load_run(run.id).await.unwrap();
        let path: Vec<RunStatus> = saved.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![RunStatus::Started, RunStatus::Recovering, RunStatus::Finished]
        );
    }

    #[tokio::test]
    async fn test_finished_run_cannot_be_recovered() {
        let echo = Arc::new(Echo { calls: AtomicUsize::new(0) });
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(store.clone(), runner(echo.clone(), 1, 1));
        let batch = texts(3);

        let mut run = orchestrator.create_run("romanian").await.unwrap();
        orchestrator.start(&mut run, &batch).await.unwrap();
        assert_eq!(echo.calls.load(Ordering::SeqCst), 3);

        // FINISHED runs cannot be recovered
        let err = orchestrator.recover(&mut run, &batch).await.unwrap_err();
        assert!(matches!(err, RunError::InvalidTransition { .. }));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_store_failure_fails_run_and_halts_scheduling() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            accept: 2,
            saves: AtomicUsize::new(0),
        });
        let echo = Arc::new(Echo { calls: AtomicUsize::new(0) });
        let orchestrator =
            Orchestrator::new(store.clone(), runner(echo, 1, 1)).with_text_workers(1);

        let mut run = orchestrator.create_run("romanian").await.unwrap();
        let summary = orchestrator.start(&mut run, &texts(20)).await.unwrap();

        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(summary.persisted, 2);
        assert!(summary.persist_failures >= 1);
        assert!(summary.skipped > 0);
        assert_eq!(
            summary.persisted + summary.persist_failures + summary.skipped,
            20
        );

        let saved = store.load_run(run.id).await.unwrap();
        assert_eq!(saved.status, RunStatus::Failed);
        assert_eq!(orchestrator.metrics().runs_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_failed_run_can_be_recovered() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            accept: 3,
            saves: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::new(store.clone(), runner(Arc::new(Picky), 1, 1))
            .with_text_workers(1);
        let batch = texts(6);

        let mut run = orchestrator.create_run("romanian").await.unwrap();
        let first = orchestrator.start(&mut run, &batch).await.unwrap();
        assert_eq!(first.status, RunStatus::Failed);

        let healthy = Orchestrator::new(
            Arc::new(MemoryStoreView(store.clone())),
            runner(Arc::new(Picky), 1, 1),
        );
        let second = healthy.recover(&mut run, &batch).await.unwrap();
        assert_eq!(second.status, RunStatus::Finished);
        assert_eq!(second.already_done, first.persisted);
        assert_eq!(first.persisted + second.persisted, 6);
        assert_eq!(store.inner.records(run.id).await.unwrap().len(), 6);
    }

    /// Bypasses the failure injection of a [`FlakyStore`].
    struct MemoryStoreView(Arc<FlakyStore>);

    #[async_trait]
    impl ResultStore for MemoryStoreView {
        async fn save_run(&self, run: &JobRun) -> Result<(), StoreError> {
            self.0.inner.save_run(run).await
        }

        async fn load_run(&self, run_id: Uuid) -> Result<JobRun, StoreError> {
            self.0.inner.load_run(run_id).await
        }

        async fn save_output(
            &self,
            run_id: Uuid,
            output: &PipelineRunOutput,
        ) -> Result<bool, StoreError> {
            self.0.inner.save_output(run_id, output).await
        }

        async fn completed_hashes(&self, run_id: Uuid) -> Result<HashSet<String>, StoreError> {
            self.0.inner.completed_hashes(run_id).await
        }

        async fn records(&self, run_id: Uuid) -> Result<Vec<ResultRecord>, StoreError> {
            self.0.inner.records(run_id).await
        }
    }
}
