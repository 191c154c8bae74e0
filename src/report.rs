//! Run-level report and its renderers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::FailureKind;
use crate::models::Outcome;

/// Duration statistics over successful outcomes, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Aggregate over every outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    /// Questions the run was configured with
    pub expected: usize,
    /// Outcomes recorded
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage, 0 to 100
    pub success_rate: f64,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub latency: LatencyStats,
    /// Successful queries per second of wall clock
    pub throughput_per_sec: f64,
    pub wall_clock_secs: f64,
    pub total_attempts: usize,
    pub throttled_attempts: usize,
    /// Every outcome, ordered by item id
    pub outcomes: Vec<Outcome>,
}

impl RunReport {
    /// True when every configured question has an outcome
    pub fn is_complete(&self) -> bool {
        self.total == self.expected
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures_by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Plain-text summary
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Run Summary ({}) ===", self.run_id);
        let _ = writeln!(
            out,
            "Started:      {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out, "Total:        {}", self.total);
        let _ = writeln!(out, "Succeeded:    {}", self.succeeded);
        let _ = writeln!(out, "Failed:       {}", self.failed);
        let _ = writeln!(out, "Success rate: {:.1}%", self.success_rate);
        let _ = writeln!(out, "Duration:     {:.2}s", self.wall_clock_secs);
        let _ = writeln!(out, "Avg latency:  {:.1}ms", self.latency.mean_ms);
        let _ = writeln!(
            out,
            "Percentiles:  p50 {:.1}ms / p95 {:.1}ms / p99 {:.1}ms",
            self.latency.p50_ms, self.latency.p95_ms, self.latency.p99_ms
        );
        let _ = writeln!(out, "Throughput:   {:.2} queries/s", self.throughput_per_sec);
        let _ = writeln!(
            out,
            "Attempts:     {} ({} throttled)",
            self.total_attempts, self.throttled_attempts
        );

        if !self.failures_by_kind.is_empty() {
            let _ = writeln!(out, "Failures:");
            for (kind, count) in &self.failures_by_kind {
                let _ = writeln!(out, "  {:<18} {}", kind.to_string(), count);
            }
        }
        out
    }

    /// Print the report as an ASCII table
    pub fn print_table(&self) {
        println!();
        println!("╔══════════════════════════════════════════════════════════════════════════════╗");
        println!("║                           QUERY LOAD RUN RESULTS                             ║");
        println!("╚══════════════════════════════════════════════════════════════════════════════╝");
        println!();
        println!("┌────────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────────┐");
        println!("│ Total  │ Success% │ avg(ms)  │  p50(ms) │  p95(ms) │  p99(ms) │  Throughput  │");
        println!("├────────┼──────────┼──────────┼──────────┼──────────┼──────────┼──────────────┤");
        println!(
            "│ {:>6} │ {:>7.1}% │ {:>8.1} │ {:>8.1} │ {:>8.1} │ {:>8.1} │ {:>8.2} q/s │",
            self.total,
            self.success_rate,
            self.latency.mean_ms,
            self.latency.p50_ms,
            self.latency.p95_ms,
            self.latency.p99_ms,
            self.throughput_per_sec
        );
        println!("└────────┴──────────┴──────────┴──────────┴──────────┴──────────┴──────────────┘");
        println!();
        print!("{}", self.render_summary());
        println!();
    }

    /// Export the report as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Resolution;
    use serde_json::json;
    use std::time::Duration;

    fn sample_report() -> RunReport {
        let mut failures_by_kind = BTreeMap::new();
        failures_by_kind.insert(FailureKind::RetriesExhausted, 1);

        RunReport {
            run_id: uuid::Uuid::new_v4(),
            started_at: Utc::now(),
            expected: 2,
            total: 2,
            succeeded: 1,
            failed: 1,
            success_rate: 50.0,
            failures_by_kind,
            latency: LatencyStats {
                mean_ms: 120.0,
                p50_ms: 120.0,
                p95_ms: 120.0,
                p99_ms: 120.0,
                min_ms: 120.0,
                max_ms: 120.0,
            },
            throughput_per_sec: 0.5,
            wall_clock_secs: 2.0,
            total_attempts: 7,
            throttled_attempts: 5,
            outcomes: vec![Outcome {
                item_id: 0,
                query: "how many orders".to_string(),
                resolution: Resolution::Succeeded {
                    payload: json!({"rows": [[1]]}),
                    row_count: 1,
                    size_bytes: 14,
                },
                attempts: Vec::new(),
                elapsed: Duration::from_millis(120),
            }],
        }
    }

    #[test]
    fn test_render_summary() {
        let report = sample_report();
        let text = report.render_summary();

        assert!(text.contains("Total:        2"));
        assert!(text.contains("Succeeded:    1"));
        assert!(text.contains("Failed:       1"));
        assert!(text.contains("Success rate: 50.0%"));
        assert!(text.contains("Duration:     2.00s"));
        assert!(text.contains("Avg latency:  120.0ms"));
        assert!(text.contains("Throughput:   0.50 queries/s"));
        assert!(text.contains("retries_exhausted"));
    }

    #[test]
    fn test_json_export() {
        let report = sample_report();
        let parsed: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();

        assert_eq!(parsed["succeeded"], 1);
        assert_eq!(parsed["failures_by_kind"]["retries_exhausted"], 1);
        assert_eq!(parsed["outcomes"][0]["resolution"]["status"], "succeeded");

        let back: RunReport = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.failures_by_kind, report.failures_by_kind);
    }

    #[test]
    fn test_failure_lookup() {
        let report = sample_report();
        assert!(report.is_complete());
        assert_eq!(report.failures_of(FailureKind::RetriesExhausted), 1);
        assert_eq!(report.failures_of(FailureKind::Timeout), 0);
    }
}
