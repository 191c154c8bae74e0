use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::wire::{self, MessageResponse, MessageStatus, SubmitRequest, SubmitResponse};
use super::RemoteService;
use crate::error::{RemoteError, SetupError};
use crate::models::{PollStatus, QueryHandle, QueryResult, RemoteReply};

/// Longest error body kept in a `RemoteError::Server` message
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for the remote query service
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Bearer token, omitted when `None`
    pub token: Option<String>,
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            max_connections: 100,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP client for the conversational query API
pub struct HttpRemoteService {
    /// Shared HTTP client with connection pooling
    client: Client,

    base_url: String,

    token: Option<String>,
}

impl HttpRemoteService {
    /// Create a new HTTP client
    pub fn new(config: &RemoteConfig) -> Result<Self, SetupError> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_connections)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SetupError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and classify the response.
    /// Returns the status and raw body of a 2xx response.
    async fn send(&self, request: RequestBuilder) -> Result<(u16, Vec<u8>), RemoteError> {
        let response = self.authorized(request).send().await.map_err(transport_error)?;
        let status = response.status();

        tracing::debug!(status = %status, url = %response.url(), "Received HTTP response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(RemoteError::Throttled {
                status: status.as_u16(),
                retry_after,
            });
        }

        let body = response.bytes().await.map_err(transport_error)?.to_vec();

        if !status.is_success() {
            let mut message = String::from_utf8_lossy(&body).into_owned();
            if message.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            return Err(RemoteError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok((status.as_u16(), body))
    }
}

fn decode<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, RemoteError> {
    serde_json::from_slice(body).map_err(|e| RemoteError::Server {
        status,
        message: format!("Invalid response body: {}", e),
    })
}

/// Categorize a reqwest error for diagnostics
fn transport_error(e: reqwest::Error) -> RemoteError {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else if e.is_body() {
        "body"
    } else if e.is_decode() {
        "decode"
    } else {
        "unknown"
    };

    tracing::debug!(error_kind = kind, error = ?e, "HTTP request error");

    RemoteError::Transport {
        kind: kind.to_string(),
        message: e.to_string(),
    }
}

impl RemoteService for HttpRemoteService {
    async fn submit(&self, query: &str) -> Result<RemoteReply<QueryHandle>, RemoteError> {
        let request = self
            .client
            .post(self.url(wire::CONVERSATIONS_PATH))
            .json(&SubmitRequest {
                content: query.to_string(),
            });

        let (status, body) = self.send(request).await?;
        let submitted: SubmitResponse = decode(status, &body)?;

        Ok(RemoteReply {
            value: QueryHandle {
                conversation_id: submitted.conversation_id,
                message_id: submitted.message_id,
            },
            status,
            size_bytes: body.len() as u64,
        })
    }

    async fn poll(&self, handle: &QueryHandle) -> Result<RemoteReply<PollStatus>, RemoteError> {
        let path = wire::message_path(&handle.conversation_id, &handle.message_id);
        let (status, body) = self.send(self.client.get(self.url(&path))).await?;
        let message: MessageResponse = decode(status, &body)?;

        let value = match message.status {
            MessageStatus::Completed => {
                let row_count = message.rows();
                PollStatus::Completed(QueryResult {
                    payload: message.result.unwrap_or_default(),
                    row_count,
                })
            }
            MessageStatus::Failed | MessageStatus::Cancelled => PollStatus::Failed(
                message
                    .error
                    .unwrap_or_else(|| format!("Query ended with status {:?}", message.status)),
            ),
            MessageStatus::Pending | MessageStatus::Executing | MessageStatus::Unknown => {
                PollStatus::Pending
            }
        };

        Ok(RemoteReply {
            value,
            status,
            size_bytes: body.len() as u64,
        })
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        let url = self.url(wire::HEALTH_PATH);
        match self.send(self.client.get(&url)).await {
            Ok(_) => Ok(()),
            // Reachable; only credentials and transport matter here
            Err(RemoteError::Server { status, .. }) if status != 401 && status != 403 => {
                tracing::debug!(status, url = %url, "Health endpoint answered with an error");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
