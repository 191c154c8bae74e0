// Values exchanged with the remote query service

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handle identifying a submitted query on the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHandle {
    pub conversation_id: String,
    pub message_id: String,
}

/// Completed query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub payload: Value,
    pub row_count: u64,
}

/// Answer to a poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Completed(QueryResult),
    /// Query ran but the service reports it failed
    Failed(String),
}

/// A successful remote call, with the transport facts attempts record
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteReply<T> {
    pub value: T,
    pub status: u16,
    pub size_bytes: u64,
}

impl<T> RemoteReply<T> {
    pub fn ok(value: T, size_bytes: u64) -> Self {
        Self {
            value,
            status: 200,
            size_bytes,
        }
    }
}
