// Data models for work items, attempts and outcomes

pub mod outcome;
pub mod query;
pub mod work;

pub use outcome::{Attempt, AttemptOutcome, AttemptPhase, Outcome, Resolution};
pub use query::{PollStatus, QueryHandle, QueryResult, RemoteReply};
pub use work::WorkItem;

/// Serialize `Duration` fields as fractional milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(ms / 1000.0).map_err(serde::de::Error::custom)
    }
}
