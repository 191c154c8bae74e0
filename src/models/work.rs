use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// One unit of load: a single query to submit.
///
/// The dispatch target is stored as an offset from the run start, so a
/// zero offset means "immediate".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: usize,
    pub query: String,
    #[serde(with = "super::duration_ms")]
    pub dispatch_offset: Duration,
}

impl WorkItem {
    pub fn new(id: usize, query: impl Into<String>, dispatch_offset: Duration) -> Self {
        Self {
            id,
            query: query.into(),
            dispatch_offset,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.dispatch_offset.is_zero()
    }

    /// Absolute dispatch target for a run that started at `run_start`
    pub fn target(&self, run_start: Instant) -> Instant {
        run_start + self.dispatch_offset
    }
}
