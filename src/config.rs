use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::generation::strategy::{
    BackoffPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY, DEFAULT_MULTIPLIER,
};
use crate::generation::ProcessingStrategy;
use crate::job::StrategyKind;

const DEFAULT_JOB_FILE: &str = "job.yaml";
const DEFAULT_STORE_DIR: &str = "runs";
const DEFAULT_TEXT_WORKERS: usize = crate::job::orchestrator::DEFAULT_TEXT_WORKERS;
const DEFAULT_GENERATION_WORKERS: usize = crate::pipeline::DEFAULT_GENERATION_WORKERS;
const DEFAULT_REQUEST_TIMEOUT: u64 = crate::generation::openai::DEFAULT_TIMEOUT_SECS;

#[derive(Debug, Clone)]
pub struct Config {
    pub job_file: PathBuf,
    pub recover_run_id: Option<Uuid>,
    pub store_dir: PathBuf,
    pub text_workers: usize,
    pub generation_workers: usize,
    pub backoff_min_delay_ms: u64,
    pub backoff_multiplier_ms: u64,
    pub backoff_max_delay_secs: u64,
    pub backoff_max_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            job_file: PathBuf::from(
                std::env::var("JOB_FILE").unwrap_or_else(|_| DEFAULT_JOB_FILE.into()),
            ),
            recover_run_id: std::env::var("RECOVER_RUN_ID")
                .ok()
                .and_then(|v| v.parse().ok()),
            store_dir: PathBuf::from(
                std::env::var("STORE_DIR").unwrap_or_else(|_| DEFAULT_STORE_DIR.into()),
            ),
            text_workers: env_parse("TEXT_WORKERS", DEFAULT_TEXT_WORKERS),
            generation_workers: env_parse("GENERATION_WORKERS", DEFAULT_GENERATION_WORKERS),
            backoff_min_delay_ms: env_parse(
                "BACKOFF_MIN_DELAY_MS",
                DEFAULT_MIN_DELAY.as_millis() as u64,
            ),
            backoff_multiplier_ms: env_parse(
                "BACKOFF_MULTIPLIER_MS",
                DEFAULT_MULTIPLIER.as_millis() as u64,
            ),
            backoff_max_delay_secs: env_parse(
                "BACKOFF_MAX_DELAY_SECS",
                DEFAULT_MAX_DELAY.as_secs(),
            ),
            backoff_max_attempts: env_parse("BACKOFF_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::default()
            .with_delays(
                Duration::from_millis(self.backoff_min_delay_ms),
                Duration::from_millis(self.backoff_multiplier_ms),
                Duration::from_secs(self.backoff_max_delay_secs),
            )
            .with_max_attempts(self.backoff_max_attempts)
    }

    pub fn strategy(&self, kind: StrategyKind) -> ProcessingStrategy {
        match kind {
            StrategyKind::Direct => ProcessingStrategy::Direct,
            StrategyKind::BackoffRetry => ProcessingStrategy::BackoffRetry(self.backoff_policy()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn print_banner(&self) {
        let recover = self
            .recover_run_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "no".to_string());
        tracing::info!("╔══════════════════════════════════════════════════╗");
        tracing::info!(
            "║           restore-bench v{}                   ║",
            env!("CARGO_PKG_VERSION")
        );
        tracing::info!("╠══════════════════════════════════════════════════╣");
        tracing::info!("║  Job file:          {:<28}║", self.job_file.display());
        tracing::info!("║  Store:             {:<28}║", self.store_dir.display());
        tracing::info!("║  Recover run:       {:<28}║", recover);
        tracing::info!("║  Text workers:      {:<28}║", self.text_workers);
        tracing::info!("║  Generation workers:{:<28}║", self.generation_workers);
        tracing::info!("║  Backoff min:       {:<24}ms ║", self.backoff_min_delay_ms);
        tracing::info!("║  Backoff unit:      {:<24}ms ║", self.backoff_multiplier_ms);
        tracing::info!("║  Backoff max:       {:<25}s ║", self.backoff_max_delay_secs);
        tracing::info!("║  Max attempts:      {:<28}║", self.backoff_max_attempts);
        tracing::info!("║  Request timeout:   {:<25}s ║", self.request_timeout_secs);
        tracing::info!("╚══════════════════════════════════════════════════╝");
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
