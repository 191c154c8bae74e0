//! Experiment-tracking output for finished runs.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::RunConfig;
use crate::error::FailureKind;
use crate::models::Resolution;
use crate::report::RunReport;

/// Destination for run records
pub trait TrackingSink {
    fn log_run(&self, record: &RunRecord) -> anyhow::Result<()>;
}

/// One item of the run as a nested record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub item_id: usize,
    pub query: String,
    pub duration_ms: f64,
    pub success: bool,
    pub failure_kind: Option<FailureKind>,
    pub result_size: u64,
    pub attempts: usize,
}

/// Raw result payload attached to a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadArtifact {
    pub item_id: usize,
    pub payload: Value,
}

/// Flattened view of a run: scalar params and metrics plus per-item children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub children: Vec<ChildRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<PayloadArtifact>,
}

impl RunRecord {
    pub fn from_report(config: &RunConfig, report: &RunReport, include_payloads: bool) -> Self {
        let mut params = BTreeMap::new();
        let scenario = config
            .scenario
            .map_or_else(|| "custom".to_string(), |s| s.to_string());
        params.insert("scenario".to_string(), scenario);
        params.insert(
            "question_count".to_string(),
            config.question_count.to_string(),
        );
        params.insert("max_workers".to_string(), config.max_workers.to_string());
        params.insert(
            "spread_window_secs".to_string(),
            config
                .spread_window
                .map_or_else(|| "none".to_string(), |w| w.as_secs_f64().to_string()),
        );
        params.insert(
            "max_retries".to_string(),
            config.retry.max_retries.to_string(),
        );
        params.insert(
            "base_wait_secs".to_string(),
            config.retry.base_wait.as_secs_f64().to_string(),
        );
        params.insert(
            "max_wait_secs".to_string(),
            config.retry.max_wait.as_secs_f64().to_string(),
        );
        params.insert(
            "item_timeout_secs".to_string(),
            config.item_timeout.as_secs_f64().to_string(),
        );
        params.insert("host".to_string(), host_name());

        let mut metrics = BTreeMap::new();
        metrics.insert("success_rate".to_string(), report.success_rate);
        metrics.insert("succeeded".to_string(), report.succeeded as f64);
        metrics.insert("failed".to_string(), report.failed as f64);
        metrics.insert("avg_duration_ms".to_string(), report.latency.mean_ms);
        metrics.insert("p50_duration_ms".to_string(), report.latency.p50_ms);
        metrics.insert("p95_duration_ms".to_string(), report.latency.p95_ms);
        metrics.insert("p99_duration_ms".to_string(), report.latency.p99_ms);
        metrics.insert("throughput_per_sec".to_string(), report.throughput_per_sec);
        metrics.insert("wall_clock_secs".to_string(), report.wall_clock_secs);
        metrics.insert(
            "throttled_attempts".to_string(),
            report.throttled_attempts as f64,
        );

        let children = report
            .outcomes
            .iter()
            .map(|o| ChildRecord {
                item_id: o.item_id,
                query: o.query.clone(),
                duration_ms: o.elapsed.as_secs_f64() * 1000.0,
                success: o.is_success(),
                failure_kind: o.failure_kind(),
                result_size: o.result_size(),
                attempts: o.attempts.len(),
            })
            .collect();

        let artifacts = if include_payloads {
            report
                .outcomes
                .iter()
                .filter_map(|o| match &o.resolution {
                    Resolution::Succeeded { payload, .. } => Some(PayloadArtifact {
                        item_id: o.item_id,
                        payload: payload.clone(),
                    }),
                    Resolution::Failed { .. } => None,
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            run_id: report.run_id,
            started_at: report.started_at,
            params,
            metrics,
            children,
            artifacts,
        }
    }
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Writes each record as a pretty-printed JSON file
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TrackingSink for JsonFileSink {
    fn log_run(&self, record: &RunRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write run record to {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), "Run record written");
        Ok(())
    }
}

/// Emits the run metrics as one structured log event
pub struct TracingSink;

impl TrackingSink for TracingSink {
    fn log_run(&self, record: &RunRecord) -> anyhow::Result<()> {
        let metric = |name: &str| record.metrics.get(name).copied().unwrap_or(0.0);
        tracing::info!(
            run_id = %record.run_id,
            host = record.params.get("host").map(String::as_str).unwrap_or("unknown"),
            items = record.children.len(),
            success_rate = metric("success_rate"),
            avg_duration_ms = metric("avg_duration_ms"),
            p95_duration_ms = metric("p95_duration_ms"),
            throughput_per_sec = metric("throughput_per_sec"),
            wall_clock_secs = metric("wall_clock_secs"),
            "Run metrics"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scenario;
    use crate::engine::ResultAggregator;
    use crate::models::Outcome;
    use serde_json::json;
    use std::time::Duration;

    fn report() -> RunReport {
        let aggregator = ResultAggregator::new(2);
        aggregator.record(Outcome {
            item_id: 0,
            query: "top products".to_string(),
            resolution: Resolution::Succeeded {
                payload: json!({"rows": [["widget", 10]]}),
                row_count: 1,
                size_bytes: 26,
            },
            attempts: Vec::new(),
            elapsed: Duration::from_millis(250),
        });
        aggregator.record(Outcome::cancelled(1, "churn"));
        aggregator.stop();
        aggregator.summarize()
    }

    #[test]
    fn test_record_from_report() {
        let config = Scenario::Smoke.run_config();
        let record = RunRecord::from_report(&config, &report(), false);

        assert_eq!(record.params["scenario"], "smoke");
        assert_eq!(record.params["question_count"], "5");
        assert!(record.params.contains_key("host"));
        assert!((record.metrics["success_rate"] - 50.0).abs() < 1e-9);
        assert_eq!(record.children.len(), 2);
        assert!(record.children[0].success);
        assert_eq!(record.children[0].result_size, 26);
        assert_eq!(record.children[1].failure_kind, Some(FailureKind::Cancelled));
        assert!(record.artifacts.is_empty());
    }

    #[test]
    fn test_payload_artifacts() {
        let config = Scenario::Smoke.run_config();
        let record = RunRecord::from_report(&config, &report(), true);

        assert_eq!(record.artifacts.len(), 1);
        assert_eq!(record.artifacts[0].item_id, 0);
        assert_eq!(record.artifacts[0].payload["rows"][0][0], "widget");
    }

    #[test]
    fn test_json_file_sink() {
        let dir = std::env::temp_dir().join(format!("query-loadgen-{}", uuid::Uuid::new_v4()));
        let path = dir.join("runs").join("record.json");
        let record = RunRecord::from_report(&Scenario::Smoke.run_config(), &report(), true);

        JsonFileSink::new(&path).log_run(&record).unwrap();

        let written: RunRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.run_id, record.run_id);
        assert_eq!(written.children.len(), 2);
        assert_eq!(written.artifacts.len(), 1);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_tracing_sink() {
        let record = RunRecord::from_report(&Scenario::Smoke.run_config(), &report(), false);
        assert!(TracingSink.log_run(&record).is_ok());
    }
}
