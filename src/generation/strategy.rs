use rand::RngExt;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Generation, Model};
use crate::error::GenerationError;

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MULTIPLIER: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

/// Randomized exponential backoff.
///
/// After the n-th failed attempt the ceiling is `multiplier * 2^(n-1)`,
/// capped at `max_delay`; the actual delay is drawn uniformly between
/// `min_delay` and that ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min_delay: Duration,
    pub multiplier: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(
        mut self,
        min_delay: Duration,
        multiplier: Duration,
        max_delay: Duration,
    ) -> Self {
        self.min_delay = min_delay;
        self.multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    /// Upper bound of the delay that follows failed attempt `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let grown = self.multiplier.saturating_mul(1u32 << exponent);
        grown.min(self.max_delay).max(self.min_delay.min(self.max_delay))
    }

    /// Maps `unit` in `[0, 1]` onto the jitter window of `attempt`.
    pub fn jittered(&self, attempt: u32, unit: f64) -> Duration {
        let high = self.ceiling(attempt);
        let low = self.min_delay.min(high);
        let span = high - low;
        low + span.mul_f64(unit.clamp(0.0, 1.0))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::rng().random_range(0.0..=1.0);
        self.jittered(attempt, unit)
    }
}

/// How one generation call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStrategy {
    /// Single call; the outcome is returned unchanged.
    Direct,
    /// Every failure is retried until `max_attempts` calls were made.
    BackoffRetry(BackoffPolicy),
}

impl ProcessingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingStrategy::Direct => "direct",
            ProcessingStrategy::BackoffRetry(_) => "backoff_retry",
        }
    }

    pub async fn process(
        &self,
        model: &Model,
        prompt: &str,
    ) -> Result<Generation, GenerationError> {
        match self {
            ProcessingStrategy::Direct => model.generate(prompt).await,
            ProcessingStrategy::BackoffRetry(policy) => {
                retry_with_backoff(policy, model, prompt).await
            }
        }
    }
}

async fn retry_with_backoff(
    policy: &BackoffPolicy,
    model: &Model,
    prompt: &str,
) -> Result<Generation, GenerationError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match model.generate(prompt).await {
            Ok(generation) => {
                if attempt > 1 {
                    debug!(
                        model = %model.descriptor(),
                        attempt,
                        "Generation succeeded after retry"
                    );
                }
                return Ok(generation);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    model = %model.descriptor(),
                    attempts = attempt,
                    error = %e,
                    "Generation failed, retries exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    model = %model.descriptor(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Generation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationClient, ModelDescriptor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails until `succeed_on` calls were made.
    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    impl Flaky {
        fn new(succeed_on: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationClient for Flaky {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(format!("{} (call {})", prompt, n))
            } else {
                Err(GenerationError::Request(format!("call {} failed", n)))
            }
        }
    }

    fn model(client: Arc<Flaky>) -> Model {
        Model::new(ModelDescriptor::new("test", "flaky"), client)
    }

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::default()
            .with_delays(
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(10),
            )
            .with_max_attempts(max_attempts)
    }

    #[test]
    fn test_default_policy() {
        let p = BackoffPolicy::default();
        assert_eq!(p.max_attempts, 25);
        assert_eq!(p.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_ceiling_grows_then_caps() {
        let p = BackoffPolicy::default();
        assert_eq!(p.ceiling(1), Duration::from_secs(1));
        assert_eq!(p.ceiling(2), Duration::from_secs(2));
        assert_eq!(p.ceiling(3), Duration::from_secs(4));
        assert_eq!(p.ceiling(6), Duration::from_secs(32));
        assert_eq!(p.ceiling(7), Duration::from_secs(60));
        assert_eq!(p.ceiling(24), Duration::from_secs(60));
        assert_eq!(p.ceiling(u32::MAX), Duration::from_secs(60));

        let ceilings: Vec<Duration> = (1..=25).map(|a| p.ceiling(a)).collect();
        for pair in ceilings.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_jitter_window() {
        let p = BackoffPolicy::default();
        assert_eq!(p.jittered(3, 0.0), Duration::from_secs(1));
        assert_eq!(p.jittered(3, 1.0), Duration::from_secs(4));
        assert_eq!(p.jittered(3, 0.5), Duration::from_millis(2500));
        assert_eq!(p.jittered(3, 7.0), Duration::from_secs(4));
    }

    #[test]
    fn test_random_delays_respect_cap() {
        let p = BackoffPolicy::default();
        for attempt in 1..=25 {
            let d = p.delay_for(attempt);
            assert!(d >= p.min_delay);
            assert!(d <= p.ceiling(attempt));
            assert!(d <= p.max_delay);
        }
    }

    #[tokio::test]
    async fn test_direct_single_call() {
        let client = Flaky::new(2);
        let result = ProcessingStrategy::Direct
            .process(&model(client.clone()), "p")
            .await;
        assert_eq!(
            result.unwrap_err(),
            GenerationError::Request("call 1 failed".to_string())
        );
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_n_attempts() {
        let client = Flaky::new(4);
        let strategy = ProcessingStrategy::BackoffRetry(fast_policy(25));
        let generation = strategy.process(&model(client.clone()), "p").await.unwrap();
        assert_eq!(generation.text, "p (call 4)");
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test]
    async fn test_retry_surfaces_last_error() {
        let client = Flaky::new(u32::MAX);
        let strategy = ProcessingStrategy::BackoffRetry(fast_policy(3));
        let err = strategy.process(&model(client.clone()), "p").await.unwrap_err();
        assert_eq!(err, GenerationError::Request("call 3 failed".to_string()));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_between_attempts() {
        let client = Flaky::new(4);
        let policy = BackoffPolicy::default();
        let strategy = ProcessingStrategy::BackoffRetry(policy);

        let start = tokio::time::Instant::now();
        strategy.process(&model(client.clone()), "p").await.unwrap();
        let waited = start.elapsed();

        // three sleeps, each within [min_delay, ceiling(attempt)]
        let lower = policy.min_delay * 3;
        let upper = policy.ceiling(1) + policy.ceiling(2) + policy.ceiling(3);
        assert!(waited >= lower, "waited {:?}", waited);
        assert!(waited <= upper + Duration::from_millis(5), "waited {:?}", waited);
        assert_eq!(client.calls(), 4);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(ProcessingStrategy::Direct.name(), "direct");
        assert_eq!(
            ProcessingStrategy::BackoffRetry(BackoffPolicy::default()).name(),
            "backoff_retry"
        );
    }
}
