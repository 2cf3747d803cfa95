use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Metrics {
    pub runs_total: AtomicU64,
    pub runs_active: AtomicU64,
    pub runs_finished: AtomicU64,
    pub runs_failed: AtomicU64,
    pub texts_persisted: AtomicU64,
    pub texts_skipped: AtomicU64,
    pub persist_failures: AtomicU64,
    pub generations_succeeded: AtomicU64,
    pub generations_failed: AtomicU64,
    pub generation_time_sum_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start_run(&self) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        self.runs_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish_run(&self, failed: bool) {
        self.runs_active.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_finished.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_generation(&self, succeeded: bool, elapsed_ms: u64) {
        if succeeded {
            self.generations_succeeded.fetch_add(1, Ordering::Relaxed);
            self.generation_time_sum_ms
                .fetch_add(elapsed_ms, Ordering::Relaxed);
        } else {
            self.generations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_persisted(&self) {
        self.texts_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.texts_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let runs_total = self.runs_total.load(Ordering::Relaxed);
        let runs_active = self.runs_active.load(Ordering::Relaxed);
        let runs_finished = self.runs_finished.load(Ordering::Relaxed);
        let runs_failed = self.runs_failed.load(Ordering::Relaxed);
        let persisted = self.texts_persisted.load(Ordering::Relaxed);
        let skipped = self.texts_skipped.load(Ordering::Relaxed);
        let persist_failures = self.persist_failures.load(Ordering::Relaxed);
        let gen_ok = self.generations_succeeded.load(Ordering::Relaxed);
        let gen_failed = self.generations_failed.load(Ordering::Relaxed);
        let gen_sum = self.generation_time_sum_ms.load(Ordering::Relaxed);

        format!(
            "# HELP restore_bench_runs_total Job runs started or recovered.\n\
             # TYPE restore_bench_runs_total counter\n\
             restore_bench_runs_total {}\n\
             # HELP restore_bench_runs_active Job runs in progress.\n\
             # TYPE restore_bench_runs_active gauge\n\
             restore_bench_runs_active {}\n\
             # HELP restore_bench_runs_finished Job runs that reached FINISHED.\n\
             # TYPE restore_bench_runs_finished counter\n\
             restore_bench_runs_finished {}\n\
             # HELP restore_bench_runs_failed Job runs that reached FAILED.\n\
             # TYPE restore_bench_runs_failed counter\n\
             restore_bench_runs_failed {}\n\
             # HELP restore_bench_texts_persisted Text bundles written to the store.\n\
             # TYPE restore_bench_texts_persisted counter\n\
             restore_bench_texts_persisted {}\n\
             # HELP restore_bench_texts_skipped Texts not started because the run halted.\n\
             # TYPE restore_bench_texts_skipped counter\n\
             restore_bench_texts_skipped {}\n\
             # HELP restore_bench_persist_failures Bundles the store rejected.\n\
             # TYPE restore_bench_persist_failures counter\n\
             restore_bench_persist_failures {}\n\
             # HELP restore_bench_generations_succeeded Generation calls that produced output.\n\
             # TYPE restore_bench_generations_succeeded counter\n\
             restore_bench_generations_succeeded {}\n\
             # HELP restore_bench_generations_failed Generation pairs that produced no output.\n\
             # TYPE restore_bench_generations_failed counter\n\
             restore_bench_generations_failed {}\n\
             # HELP restore_bench_generation_time_ms_sum Total successful generation time in ms.\n\
             # TYPE restore_bench_generation_time_ms_sum counter\n\
             restore_bench_generation_time_ms_sum {}\n",
            runs_total,
            runs_active,
            runs_finished,
            runs_failed,
            persisted,
            skipped,
            persist_failures,
            gen_ok,
            gen_failed,
            gen_sum
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let m = Metrics::new();
        m.start_run();
        assert_eq!(m.runs_active.load(Ordering::Relaxed), 1);
        assert_eq!(m.runs_total.load(Ordering::Relaxed), 1);

        m.finish_run(false);
        assert_eq!(m.runs_active.load(Ordering::Relaxed), 0);
        assert_eq!(m.runs_finished.load(Ordering::Relaxed), 1);
        assert_eq!(m.runs_failed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_generation_counters() {
        let m = Metrics::new();
        m.record_generation(true, 250);
        m.record_generation(true, 750);
        m.record_generation(false, 9000);
        assert_eq!(m.generations_succeeded.load(Ordering::Relaxed), 2);
        assert_eq!(m.generations_failed.load(Ordering::Relaxed), 1);
        assert_eq!(m.generation_time_sum_ms.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn test_prometheus_output() {
        let m = Metrics::new();
        m.start_run();
        m.record_persisted();
        m.record_persist_failure();
        m.finish_run(true);
        let out = m.render_prometheus();
        assert!(out.contains("restore_bench_runs_total 1"));
        assert!(out.contains("restore_bench_runs_failed 1"));
        assert!(out.contains("restore_bench_texts_persisted 1"));
        assert!(out.contains("restore_bench_persist_failures 1"));
        assert!(out.contains("# TYPE restore_bench_runs_active gauge"));
    }
}
