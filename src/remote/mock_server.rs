//! Mock conversational query service speaking the same JSON protocol as the real API.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::wire::{self, MessageResponse, MessageStatus, SubmitRequest, SubmitResponse};

/// Configuration for the mock query server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockServerConfig {
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Polls answered with EXECUTING before a query completes
    pub pending_polls: u32,
    /// Simulated latency per call in milliseconds
    pub latency_ms: u64,
    /// Fraction of calls answered with 429 (0.0 to 1.0)
    pub throttle_rate: f64,
    /// Retry-After value sent with 429 responses
    pub retry_after_secs: Option<u64>,
    /// Fraction of submits answered with 500 (0.0 to 1.0)
    pub error_rate: f64,
    /// Rows in each completed result
    pub row_count: usize,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            pending_polls: 2,
            latency_ms: 20,
            throttle_rate: 0.0,
            retry_after_secs: None,
            error_rate: 0.0,
            row_count: 10,
        }
    }
}

struct Message {
    query: String,
    polls_remaining: u32,
}

struct MockState {
    config: MockServerConfig,
    messages: DashMap<String, Message>,
    submits: AtomicU64,
    throttled: AtomicU64,
}

/// Mock query server for local load runs and tests
pub struct MockQueryServer {
    config: MockServerConfig,
    state: Option<Arc<MockState>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockQueryServer {
    /// Create a new mock server with the given configuration
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            state: None,
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start the mock server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let state = Arc::new(MockState {
            config: self.config.clone(),
            messages: DashMap::new(),
            submits: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        });
        self.state = Some(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let message_route = format!(
            "{}/:conversation_id/messages/:message_id",
            wire::CONVERSATIONS_PATH
        );
        let app = Router::new()
            .route(wire::HEALTH_PATH, get(handle_health))
            .route(wire::CONVERSATIONS_PATH, post(handle_submit))
            .route(&message_route, get(handle_poll))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tracing::info!(port, "Mock query server listening");
        Ok(port)
    }

    /// Get the server's URL
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Queries accepted so far
    pub fn submitted(&self) -> u64 {
        self.state
            .as_ref()
            .map_or(0, |s| s.submits.load(Ordering::Relaxed))
    }

    /// Submitted queries that have not completed yet
    pub fn tracked(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.messages.len())
    }

    /// 429 responses sent so far
    pub fn throttled(&self) -> u64 {
        self.state
            .as_ref()
            .map_or(0, |s| s.throttled.load(Ordering::Relaxed))
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockQueryServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bernoulli draw; the rng never lives across an await
fn roll(rate: f64) -> bool {
    rate > 0.0 && rand::thread_rng().gen::<f64>() < rate
}

async fn simulate_latency(config: &MockServerConfig) {
    if config.latency_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.latency_ms)).await;
    }
}

fn throttled_response(state: &MockState) -> Response {
    state.throttled.fetch_add(1, Ordering::Relaxed);
    let mut response = (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
    if let Some(secs) = state.config.retry_after_secs {
        if let Ok(value) = secs.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn handle_submit(
    State(state): State<Arc<MockState>>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    simulate_latency(&state.config).await;

    if roll(state.config.throttle_rate) {
        return throttled_response(&state);
    }
    if roll(state.config.error_rate) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Simulated error").into_response();
    }

    state.submits.fetch_add(1, Ordering::Relaxed);
    let conversation_id = uuid::Uuid::new_v4().to_string();
    let message_id = uuid::Uuid::new_v4().to_string();
    state.messages.insert(
        message_id.clone(),
        Message {
            query: request.content,
            polls_remaining: state.config.pending_polls,
        },
    );

    Json(SubmitResponse {
        conversation_id,
        message_id,
    })
    .into_response()
}

async fn handle_poll(
    State(state): State<Arc<MockState>>,
    Path((_conversation_id, message_id)): Path<(String, String)>,
) -> Response {
    simulate_latency(&state.config).await;

    if roll(state.config.throttle_rate) {
        return throttled_response(&state);
    }

    let query = {
        let Some(mut message) = state.messages.get_mut(&message_id) else {
            return (StatusCode::NOT_FOUND, "Unknown message").into_response();
        };
        if message.polls_remaining > 0 {
            message.polls_remaining -= 1;
            return Json(MessageResponse {
                status: MessageStatus::Executing,
                result: None,
                row_count: None,
                error: None,
            })
            .into_response();
        }
        message.query.clone()
    };

    // Completed messages are answered once and forgotten
    state.messages.remove(&message_id);

    let rows: Vec<_> = (0..state.config.row_count)
        .map(|i| json!([i, query.len()]))
        .collect();
    let response = MessageResponse {
        status: MessageStatus::Completed,
        result: Some(json!({"columns": ["row", "query_length"], "rows": rows})),
        row_count: Some(state.config.row_count as u64),
        error: None,
    };

    Json(response).into_response()
}
