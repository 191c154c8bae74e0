//! Outcome accumulation and run statistics using HdrHistogram for percentiles.

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::Outcome;
use crate::report::{LatencyStats, RunReport};

/// Highest latency the histogram tracks: 1 hour in microseconds
const MAX_TRACKED_US: u64 = 3_600_000_000;

struct AggregatorState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    /// Set when the run ends; freezes the wall clock
    finished: Option<Instant>,
    last_recorded: Option<Instant>,
    expected: usize,
    outcomes: Vec<Outcome>,
}

/// Thread-safe collector of per-item outcomes.
///
/// All mutation goes through one mutex around `record`, so concurrent workers
/// cannot lose or duplicate an outcome. `summarize` may be called at any time
/// and reports on whatever has been recorded so far.
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    pub fn new(expected: usize) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                run_id: Uuid::new_v4(),
                started_at: Utc::now(),
                started: Instant::now(),
                finished: None,
                last_recorded: None,
                expected,
                outcomes: Vec::with_capacity(expected),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        // A panic elsewhere never leaves the outcome list half-written
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reset for a new run and mark its start
    pub fn start(&self, expected: usize) {
        let mut state = self.lock();
        state.run_id = Uuid::new_v4();
        state.started_at = Utc::now();
        state.started = Instant::now();
        state.finished = None;
        state.last_recorded = None;
        state.expected = expected;
        state.outcomes.clear();
    }

    /// Mark the end of the run
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.finished.is_none() {
            state.finished = Some(Instant::now());
        }
    }

    /// Record one resolved outcome. Returns how many have been recorded.
    pub fn record(&self, outcome: Outcome) -> usize {
        let mut state = self.lock();
        state.last_recorded = Some(Instant::now());
        state.outcomes.push(outcome);
        state.outcomes.len()
    }

    pub fn recorded(&self) -> usize {
        self.lock().outcomes.len()
    }

    pub fn expected(&self) -> usize {
        self.lock().expected
    }

    /// Copy of the outcomes recorded so far, in arrival order
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.lock().outcomes.clone()
    }

    /// Build a report over everything recorded so far
    pub fn summarize(&self) -> RunReport {
        let state = self.lock();

        let end = state
            .finished
            .or(state.last_recorded)
            .unwrap_or(state.started);
        let wall_clock = end.saturating_duration_since(state.started);

        let total = state.outcomes.len();
        let succeeded = state.outcomes.iter().filter(|o| o.is_success()).count();
        let failed = total - succeeded;

        let mut failures_by_kind = BTreeMap::new();
        for kind in state.outcomes.iter().filter_map(|o| o.failure_kind()) {
            *failures_by_kind.entry(kind).or_insert(0usize) += 1;
        }

        let success_durations: Vec<Duration> = state
            .outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.elapsed)
            .collect();

        let success_rate = if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64 * 100.0
        };

        let throughput_per_sec = if wall_clock.is_zero() {
            0.0
        } else {
            succeeded as f64 / wall_clock.as_secs_f64()
        };

        let mut outcomes = state.outcomes.clone();
        outcomes.sort_by_key(|o| o.item_id);

        RunReport {
            run_id: state.run_id,
            started_at: state.started_at,
            expected: state.expected,
            total,
            succeeded,
            failed,
            success_rate,
            failures_by_kind,
            latency: latency_stats(&success_durations),
            throughput_per_sec,
            wall_clock_secs: wall_clock.as_secs_f64(),
            total_attempts: outcomes.iter().map(|o| o.attempts.len()).sum(),
            throttled_attempts: outcomes.iter().map(|o| o.throttled_attempts()).sum(),
            outcomes,
        }
    }
}

/// Mean is exact; percentiles come from the histogram (3 significant figures)
fn latency_stats(durations: &[Duration]) -> LatencyStats {
    if durations.is_empty() {
        return LatencyStats::default();
    }

    let total: Duration = durations.iter().sum();
    let mean_ms = total.as_secs_f64() * 1000.0 / durations.len() as f64;
    let min_ms = durations.iter().min().map_or(0.0, |d| d.as_secs_f64() * 1000.0);
    let max_ms = durations.iter().max().map_or(0.0, |d| d.as_secs_f64() * 1000.0);

    let percentile = match Histogram::<u64>::new_with_bounds(1, MAX_TRACKED_US, 3) {
        Ok(mut histogram) => {
            for duration in durations {
                let us = (duration.as_micros() as u64).clamp(1, MAX_TRACKED_US);
                let _ = histogram.record(us);
            }
            move |p: f64| histogram.value_at_percentile(p) as f64 / 1000.0
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to create latency histogram");
            return LatencyStats {
                mean_ms,
                min_ms,
                max_ms,
                ..Default::default()
            };
        }
    };

    LatencyStats {
        mean_ms,
        p50_ms: percentile(50.0),
        p95_ms: percentile(95.0),
        p99_ms: percentile(99.0),
        min_ms,
        max_ms,
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(0)
    }
}
