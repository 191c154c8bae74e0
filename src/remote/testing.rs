// Closure-driven RemoteService for engine tests

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::RemoteService;
use crate::error::RemoteError;
use crate::models::{PollStatus, QueryHandle, QueryResult, RemoteReply};

type SubmitFn = Box<dyn Fn(usize) -> Result<RemoteReply<QueryHandle>, RemoteError> + Send + Sync>;
type PollFn =
    Box<dyn Fn(&QueryHandle, usize) -> Result<RemoteReply<PollStatus>, RemoteError> + Send + Sync>;

/// Test double: submits succeed and the first poll completes unless overridden.
///
/// `with_submit` closures receive the number of earlier submits; `with_poll`
/// closures receive the handle and the number of earlier polls of that handle.
pub(crate) struct FnService {
    submit: Option<SubmitFn>,
    poll: Option<PollFn>,
    probe: Option<RemoteError>,
    latency: Duration,
    submits: AtomicUsize,
    polls: AtomicUsize,
    polls_per_handle: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FnService {
    pub fn succeeding() -> Self {
        Self {
            submit: None,
            poll: None,
            probe: None,
            latency: Duration::ZERO,
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            polls_per_handle: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_submit(
        mut self,
        f: impl Fn(usize) -> Result<RemoteReply<QueryHandle>, RemoteError> + Send + Sync + 'static,
    ) -> Self {
        self.submit = Some(Box::new(f));
        self
    }

    pub fn with_poll(
        mut self,
        f: impl Fn(&QueryHandle, usize) -> Result<RemoteReply<PollStatus>, RemoteError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.poll = Some(Box::new(f));
        self
    }

    /// Every call takes this long
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.probe = Some(RemoteError::Transport {
            kind: "connect".to_string(),
            message: "connection refused".to_string(),
        });
        self
    }

    pub fn handle(query: &str, n: usize) -> RemoteReply<QueryHandle> {
        RemoteReply::ok(
            QueryHandle {
                conversation_id: query.to_string(),
                message_id: format!("msg-{}", n),
            },
            64,
        )
    }

    pub fn completed(payload: Value, row_count: u64) -> RemoteReply<PollStatus> {
        let size = payload.to_string().len() as u64;
        RemoteReply::ok(PollStatus::Completed(QueryResult { payload, row_count }), size)
    }

    pub fn submit_calls(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemoteService for FnService {
    async fn submit(&self, query: &str) -> Result<RemoteReply<QueryHandle>, RemoteError> {
        let calls = self.submits.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await;
        match &self.submit {
            Some(f) => f(calls),
            None => Ok(Self::handle(query, calls)),
        }
    }

    async fn poll(&self, handle: &QueryHandle) -> Result<RemoteReply<PollStatus>, RemoteError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let previous = {
            let mut per_handle = self
                .polls_per_handle
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let count = per_handle.entry(handle.message_id.clone()).or_insert(0);
            let previous = *count;
            *count += 1;
            previous
        };
        self.simulate_call().await;
        match &self.poll {
            Some(f) => f(handle, previous),
            None => Ok(Self::completed(serde_json::json!({"rows": [[42]]}), 1)),
        }
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        match &self.probe {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
