//! Runtime counters and reviewer-call latency tracking.
//!
//! Counters are plain `AtomicU64`s so the review engine can bump them from
//! spawned tasks without locking. Latency history lives behind a
//! `parking_lot::Mutex` and is only read for summaries and export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Atomic counters for session and review events.
#[derive(Debug)]
pub struct SessionCounters {
    /// Scenes committed to memory.
    pub scenes_committed: AtomicU64,
    /// Digests produced by eviction.
    pub digests_produced: AtomicU64,
    /// Questions raised.
    pub questions_raised: AtomicU64,
    /// Questions answered.
    pub questions_answered: AtomicU64,
    /// Questions closed by auto-pruning.
    pub questions_pruned: AtomicU64,
    /// Reviewer calls issued.
    pub reviews_requested: AtomicU64,
    /// Reviewer calls that failed at the provider.
    pub reviews_failed: AtomicU64,
    /// Reviewer outputs rejected (unparseable or invalid update).
    pub reviews_rejected: AtomicU64,
    /// Snapshots written to persistence.
    pub snapshots_saved: AtomicU64,
}

impl SessionCounters {
    /// Zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scenes_committed: AtomicU64::new(0),
            digests_produced: AtomicU64::new(0),
            questions_raised: AtomicU64::new(0),
            questions_answered: AtomicU64::new(0),
            questions_pruned: AtomicU64::new(0),
            reviews_requested: AtomicU64::new(0),
            reviews_failed: AtomicU64::new(0),
            reviews_rejected: AtomicU64::new(0),
            snapshots_saved: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            scenes_committed: self.scenes_committed.load(Ordering::Relaxed),
            digests_produced: self.digests_produced.load(Ordering::Relaxed),
            questions_raised: self.questions_raised.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            questions_pruned: self.questions_pruned.load(Ordering::Relaxed),
            reviews_requested: self.reviews_requested.load(Ordering::Relaxed),
            reviews_failed: self.reviews_failed.load(Ordering::Relaxed),
            reviews_rejected: self.reviews_rejected.load(Ordering::Relaxed),
            snapshots_saved: self.snapshots_saved.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CounterSnapshot {
    /// Scenes committed.
    pub scenes_committed: u64,
    /// Digests produced.
    pub digests_produced: u64,
    /// Questions raised.
    pub questions_raised: u64,
    /// Questions answered.
    pub questions_answered: u64,
    /// Questions pruned.
    pub questions_pruned: u64,
    /// Reviewer calls issued.
    pub reviews_requested: u64,
    /// Reviewer calls failed.
    pub reviews_failed: u64,
    /// Reviewer outputs rejected.
    pub reviews_rejected: u64,
    /// Snapshots saved.
    pub snapshots_saved: u64,
}

impl CounterSnapshot {
    /// Prometheus text exposition.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows = [
            ("scenes_committed", "Scenes committed to memory", self.scenes_committed),
            ("digests_produced", "Scene digests produced", self.digests_produced),
            ("questions_raised", "Questions raised by reviewers", self.questions_raised),
            ("questions_answered", "Questions answered", self.questions_answered),
            ("questions_pruned", "Questions auto-pruned", self.questions_pruned),
            ("reviews_requested", "Reviewer calls issued", self.reviews_requested),
            ("reviews_failed", "Reviewer calls failed", self.reviews_failed),
            ("reviews_rejected", "Reviewer outputs rejected", self.reviews_rejected),
            ("snapshots_saved", "Session snapshots saved", self.snapshots_saved),
        ];
        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP scenemind_{name}_total {help}\n\
                 # TYPE scenemind_{name}_total counter\n\
                 scenemind_{name}_total {value}\n"
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Latency monitor
// ---------------------------------------------------------------------------

const HISTORY_LEN: usize = 256;

/// Ring buffer of reviewer-call latencies against a budget.
#[derive(Debug)]
pub struct LatencyMonitor {
    budget_ms: f64,
    history: Mutex<LatencyHistory>,
}

#[derive(Debug)]
struct LatencyHistory {
    timings: Vec<f64>,
    write_idx: usize,
    count: u64,
}

impl LatencyMonitor {
    /// Monitor with the given per-call budget.
    #[must_use]
    pub fn new(budget_ms: f64) -> Self {
        Self {
            budget_ms,
            history: Mutex::new(LatencyHistory {
                timings: vec![0.0; HISTORY_LEN],
                write_idx: 0,
                count: 0,
            }),
        }
    }

    /// Start timing a call; the elapsed time is recorded on drop.
    pub fn time(&self) -> LatencyGuard<'_> {
        LatencyGuard {
            monitor: self,
            start: Instant::now(),
        }
    }

    /// Record one call duration in milliseconds.
    pub fn record(&self, ms: f64) {
        let mut h = self.history.lock();
        let idx = h.write_idx;
        h.timings[idx] = ms;
        h.write_idx = (idx + 1) % HISTORY_LEN;
        h.count += 1;
    }

    /// Calls recorded since creation.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.history.lock().count
    }

    /// Configured budget.
    #[must_use]
    pub fn budget_ms(&self) -> f64 {
        self.budget_ms
    }

    /// Percentiles over the retained history.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn percentiles(&self) -> LatencyPercentiles {
        let h = self.history.lock();
        let n = usize::try_from(h.count).unwrap_or(usize::MAX).min(HISTORY_LEN);
        if n == 0 {
            return LatencyPercentiles::default();
        }
        let mut sorted = h.timings[..n].to_vec();
        drop(h);
        sorted.sort_by(f64::total_cmp);

        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        let over = sorted.iter().filter(|&&t| t > self.budget_ms).count();
        LatencyPercentiles {
            p50: at(0.5),
            p99: at(0.99),
            max: sorted[n - 1],
            over_budget_ratio: over as f64 / n as f64,
        }
    }
}

/// Records elapsed time into its [`LatencyMonitor`] when dropped.
#[derive(Debug)]
pub struct LatencyGuard<'a> {
    monitor: &'a LatencyMonitor,
    start: Instant,
}

impl Drop for LatencyGuard<'_> {
    fn drop(&mut self) {
        self.monitor.record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Latency statistics in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct LatencyPercentiles {
    /// Median.
    pub p50: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Slowest retained call.
    pub max: f64,
    /// Share of calls over budget (0–1).
    pub over_budget_ratio: f64,
}

impl LatencyPercentiles {
    /// One-line summary.
    #[must_use]
    pub fn summary(&self, budget_ms: f64) -> String {
        format!(
            "P50={:.0}ms  P99={:.0}ms  Max={:.0}ms  Budget={budget_ms:.0}ms  Over-budget={:.1}%",
            self.p50,
            self.p99,
            self.max,
            self.over_budget_ratio * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Span names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::info_span!`.
pub mod spans {
    /// Whole-document review.
    pub const REVIEW_DOCUMENT: &str = "scenemind::review::document";
    /// One scene across all reviewers.
    pub const REVIEW_SCENE: &str = "scenemind::review::scene";
    /// One reviewer model call.
    pub const REVIEWER_CALL: &str = "scenemind::review::call";
    /// Scene commit (compress + admit).
    pub const COMMIT_SCENE: &str = "scenemind::session::commit";
    /// Snapshot save.
    pub const PERSIST_SAVE: &str = "scenemind::persist::save";
    /// Snapshot load.
    pub const PERSIST_LOAD: &str = "scenemind::persist::load";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_snapshot() {
        let c = SessionCounters::new();
        SessionCounters::add(&c.scenes_committed, 3);
        SessionCounters::add(&c.reviews_failed, 1);
        let snap = c.snapshot();
        assert_eq!(snap.scenes_committed, 3);
        assert_eq!(snap.reviews_failed, 1);
        assert_eq!(snap.digests_produced, 0);
    }

    #[test]
    fn prometheus_lines() {
        let c = SessionCounters::new();
        SessionCounters::add(&c.questions_raised, 42);
        let prom = c.snapshot().to_prometheus();
        assert!(prom.contains("scenemind_questions_raised_total 42"));
        assert!(prom.contains("# TYPE scenemind_scenes_committed_total counter"));
    }

    #[test]
    fn percentiles_and_budget() {
        let monitor = LatencyMonitor::new(100.0);
        assert_eq!(monitor.percentiles(), LatencyPercentiles::default());
        for ms in 1..=100 {
            monitor.record(f64::from(ms) * 2.0);
        }
        let pct = monitor.percentiles();
        assert!(pct.p50 >= 100.0 && pct.p50 <= 104.0);
        assert!((pct.max - 200.0).abs() < f64::EPSILON);
        assert!((pct.over_budget_ratio - 0.5).abs() < 0.01);
        assert!(pct.summary(100.0).contains("Budget=100ms"));
    }

    #[test]
    fn history_wraps() {
        let monitor = LatencyMonitor::new(10.0);
        for _ in 0..(HISTORY_LEN + 10) {
            monitor.record(1.0);
        }
        assert_eq!(monitor.count(), (HISTORY_LEN + 10) as u64);
        assert!((monitor.percentiles().max - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn guard_records_on_drop() {
        let monitor = LatencyMonitor::new(1000.0);
        {
            let _guard = monitor.time();
        }
        assert_eq!(monitor.count(), 1);
    }
}
