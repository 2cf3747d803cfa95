use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use restore_bench::config::Config;
use restore_bench::job::{DataSource, JobDefinition, Orchestrator, RunStatus, RunSummary};
use restore_bench::metrics::Metrics;
use restore_bench::registry::Registry;
use restore_bench::store::{FileStore, ResultStore};
use restore_bench::text::short_text;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("restore_bench=info".parse()?),
        )
        .init();

    let config = Config::from_env();
    config.print_banner();

    let job = JobDefinition::from_file(&config.job_file)?;
    let source = DataSource::from_file(&job.data_source)?;
    let registry = Registry::from_job(&job, config.request_timeout())?;
    let strategy = config.strategy(job.strategy);
    let runner = Arc::new(registry.build_pipeline(&job, strategy, config.generation_workers)?);

    info!(
        job = %job.name,
        texts = source.len(),
        pairs = runner.pair_count(),
        strategy = strategy.name(),
        "Pipeline ready"
    );

    let store = Arc::new(
        FileStore::open(&config.store_dir)
            .await
            .context("Failed to open result store")?,
    );
    let metrics = Metrics::new();
    let orchestrator = Orchestrator::new(store.clone(), runner)
        .with_text_workers(config.text_workers)
        .with_metrics(metrics.clone());

    let summary = match config.recover_run_id {
        Some(run_id) => {
            let mut run = store
                .load_run(run_id)
                .await
                .with_context(|| format!("Cannot recover job run {}", run_id))?;
            orchestrator.recover(&mut run, source.texts()).await?
        }
        None => {
            let mut run = orchestrator.create_run(&job.name).await?;
            orchestrator.start(&mut run, source.texts()).await?
        }
    };

    report(store.as_ref(), &summary).await?;
    debug!("Metrics:\n{}", metrics.render_prometheus());

    if summary.status == RunStatus::Failed {
        anyhow::bail!(
            "Job run {} failed; resume it with RECOVER_RUN_ID={}",
            summary.run_id,
            summary.run_id
        );
    }
    Ok(())
}

/// Logs the run summary and the best output of every stored text.
async fn report(store: &dyn ResultStore, summary: &RunSummary) -> Result<()> {
    info!(
        "Run summary: {}",
        serde_json::to_string_pretty(summary).context("Failed to render run summary")?
    );

    for record in store.records(summary.run_id).await? {
        let text = short_text(&record.output.raw_text);
        match record.output.ranked().first() {
            Some(best) => {
                let (evaluator, score) = best
                    .evals
                    .first()
                    .map(|e| (e.evaluator.as_str(), e.score))
                    .unwrap_or(("-", 0.0));
                info!(
                    text = %text,
                    model = %best.model,
                    template = %best.template,
                    evaluator,
                    score,
                    "Best restoration"
                );
            }
            None => warn!(text = %text, "No model produced an output"),
        }
    }
    Ok(())
}
