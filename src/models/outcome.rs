use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::FailureKind;

// ==================================================================================================
// Attempts
// ==================================================================================================

/// Which remote call an attempt made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Submit,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Poll answered but the result is not ready yet
    Pending,
    RateLimited,
    Failed,
    TimedOut,
    Cancelled,
}

/// One remote call made on behalf of a work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Position in the item's history, contiguous from 0
    pub number: u32,
    pub phase: AttemptPhase,
    #[serde(with = "super::duration_ms")]
    pub wait_before: Duration,
    pub outcome: AttemptOutcome,
    pub status: Option<u16>,
    pub response_bytes: u64,
    #[serde(with = "super::duration_ms")]
    pub elapsed: Duration,
}

// ==================================================================================================
// Outcomes
// ==================================================================================================

/// How a work item ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Succeeded {
        payload: Value,
        row_count: u64,
        size_bytes: u64,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// Terminal result of one work item, with its full attempt history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub item_id: usize,
    pub query: String,
    pub resolution: Resolution,
    pub attempts: Vec<Attempt>,
    /// Time from dispatch to resolution
    #[serde(with = "super::duration_ms")]
    pub elapsed: Duration,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self.resolution, Resolution::Succeeded { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.resolution {
            Resolution::Succeeded { .. } => None,
            Resolution::Failed { kind, .. } => Some(*kind),
        }
    }

    /// Size of the result payload, 0 for failures
    pub fn result_size(&self) -> u64 {
        match &self.resolution {
            Resolution::Succeeded { size_bytes, .. } => *size_bytes,
            Resolution::Failed { .. } => 0,
        }
    }

    pub fn throttled_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::RateLimited)
            .count()
    }

    /// Outcome for an item that was never dispatched
    pub fn cancelled(item_id: usize, query: impl Into<String>) -> Self {
        Self {
            item_id,
            query: query.into(),
            resolution: Resolution::Failed {
                kind: FailureKind::Cancelled,
                message: "Run cancelled before dispatch".to_string(),
            },
            attempts: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attempt(number: u32, outcome: AttemptOutcome) -> Attempt {
        Attempt {
            number,
            phase: AttemptPhase::Submit,
            wait_before: Duration::ZERO,
            outcome,
            status: Some(429),
            response_bytes: 0,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_success_accessors() {
        let outcome = Outcome {
            item_id: 7,
            query: "top customers".to_string(),
            resolution: Resolution::Succeeded {
                payload: json!({"rows": [[1]]}),
                row_count: 1,
                size_bytes: 42,
            },
            attempts: vec![
                attempt(0, AttemptOutcome::RateLimited),
                attempt(1, AttemptOutcome::Succeeded),
            ],
            elapsed: Duration::from_millis(120),
        };

        assert!(outcome.is_success());
        assert_eq!(outcome.failure_kind(), None);
        assert_eq!(outcome.result_size(), 42);
        assert_eq!(outcome.throttled_attempts(), 1);
    }

    #[test]
    fn test_cancelled_before_dispatch() {
        let outcome = Outcome::cancelled(4, "q");
        assert!(!outcome.is_success());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
        assert!(outcome.attempts.is_empty());
        assert_eq!(outcome.result_size(), 0);
    }

    #[test]
    fn test_resolution_serialization() {
        let resolution = Resolution::Failed {
            kind: FailureKind::RetriesExhausted,
            message: "throttled 5 times".to_string(),
        };
        let json = serde_json::to_value(&resolution).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "retries_exhausted");
    }
}
