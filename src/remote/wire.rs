// JSON bodies of the conversational query protocol, shared by the HTTP
// client and the mock server

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONVERSATIONS_PATH: &str = "/api/conversations";
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    /// Explicit row count, else the length of `result.rows`
    pub fn rows(&self) -> u64 {
        self.row_count.unwrap_or_else(|| {
            self.result
                .as_ref()
                .and_then(|r| r.get("rows"))
                .and_then(|rows| rows.as_array())
                .map_or(0, |rows| rows.len() as u64)
        })
    }
}

pub fn message_path(conversation_id: &str, message_id: &str) -> String {
    format!(
        "{}/{}/messages/{}",
        CONVERSATIONS_PATH, conversation_id, message_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parsing() {
        let msg: MessageResponse = serde_json::from_value(json!({"status": "EXECUTING"})).unwrap();
        assert_eq!(msg.status, MessageStatus::Executing);

        let msg: MessageResponse =
            serde_json::from_value(json!({"status": "FETCHING_METADATA"})).unwrap();
        assert_eq!(msg.status, MessageStatus::Unknown);
    }

    #[test]
    fn test_rows_fallback() {
        let msg: MessageResponse = serde_json::from_value(json!({
            "status": "COMPLETED",
            "result": {"rows": [[1], [2], [3]]}
        }))
        .unwrap();
        assert_eq!(msg.rows(), 3);

        let msg: MessageResponse = serde_json::from_value(json!({
            "status": "COMPLETED",
            "result": {"rows": [[1]]},
            "row_count": 10
        }))
        .unwrap();
        assert_eq!(msg.rows(), 10);
    }

    #[test]
    fn test_message_path() {
        assert_eq!(message_path("c1", "m2"), "/api/conversations/c1/messages/m2");
    }
}
