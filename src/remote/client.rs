use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::RemoteService;
use crate::backoff::BackoffCalculator;
use crate::cancel::CancelSignal;
use crate::config::{RetryPolicy, RunConfig};
use crate::error::{FailureKind, RemoteError};
use crate::models::{
    Attempt, AttemptOutcome, AttemptPhase, Outcome, PollStatus, QueryHandle, RemoteReply,
    Resolution, WorkItem,
};

/// Runs one query against the remote service until it resolves.
///
/// Per item the lifecycle is `Submitting -> Polling -> {Succeeded | Failed | TimedOut}`.
/// Only throttling is retried; the wait comes from [`BackoffCalculator`].
/// Pending polls wait `poll_interval`. Every call and every wait is bounded by
/// the per-item deadline and interrupted by run cancellation.
pub struct RemoteQueryClient<S> {
    service: Arc<S>,
    backoff: BackoffCalculator,
    max_retries: u32,
    item_timeout: Duration,
    poll_interval: Duration,
}

impl<S> Clone for RemoteQueryClient<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            backoff: self.backoff.clone(),
            max_retries: self.max_retries,
            item_timeout: self.item_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

/// Where a query is in its lifecycle
enum QueryState {
    Submitting,
    Polling(QueryHandle),
}

impl QueryState {
    fn phase(&self) -> AttemptPhase {
        match self {
            QueryState::Submitting => AttemptPhase::Submit,
            QueryState::Polling(_) => AttemptPhase::Poll,
        }
    }
}

enum Reply {
    Submitted(RemoteReply<QueryHandle>),
    Polled(RemoteReply<PollStatus>),
}

/// Result of racing a future against the deadline and cancellation
enum Guarded<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

impl<T> Guarded<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        match self {
            Guarded::Done(value) => Guarded::Done(f(value)),
            Guarded::TimedOut => Guarded::TimedOut,
            Guarded::Cancelled => Guarded::Cancelled,
        }
    }
}

async fn guard<F: Future>(fut: F, deadline: Instant, cancel: &mut CancelSignal) -> Guarded<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Guarded::Cancelled,
        _ = tokio::time::sleep_until(deadline) => Guarded::TimedOut,
        out = fut => Guarded::Done(out),
    }
}

/// Attempt history for the item being executed
struct History {
    attempts: Vec<Attempt>,
}

impl History {
    fn push(
        &mut self,
        phase: AttemptPhase,
        wait_before: Duration,
        outcome: AttemptOutcome,
        status: Option<u16>,
        response_bytes: u64,
        elapsed: Duration,
    ) {
        let number = self.attempts.len() as u32;
        self.attempts.push(Attempt {
            number,
            phase,
            wait_before,
            outcome,
            status,
            response_bytes,
            elapsed,
        });
    }
}

impl<S: RemoteService> RemoteQueryClient<S> {
    pub fn new(
        service: Arc<S>,
        retry: &RetryPolicy,
        item_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            service,
            backoff: BackoffCalculator::new(retry.base_wait, retry.max_wait, retry.jitter_max),
            max_retries: retry.max_retries,
            item_timeout,
            poll_interval,
        }
    }

    pub fn from_config(service: Arc<S>, config: &RunConfig) -> Self {
        Self::new(
            service,
            &config.retry,
            config.item_timeout,
            config.poll_interval,
        )
    }

    /// Execute one work item to its terminal outcome. Never fails: every
    /// error is folded into the returned [`Outcome`].
    pub async fn execute(&self, item: &WorkItem, cancel: &mut CancelSignal) -> Outcome {
        let started = Instant::now();
        let deadline = started + self.item_timeout;
        let mut history = History {
            attempts: Vec::new(),
        };
        let mut state = QueryState::Submitting;
        let mut wait = Duration::ZERO;
        let mut throttled = 0u32;

        loop {
            if !wait.is_zero() {
                match guard(tokio::time::sleep(wait), deadline, cancel).await {
                    Guarded::Done(()) => {}
                    Guarded::TimedOut => {
                        return self.timed_out(item, history, started);
                    }
                    Guarded::Cancelled => {
                        return self.cancelled(item, history, started);
                    }
                }
            }

            let phase = state.phase();
            let call_started = Instant::now();
            let call = match &state {
                QueryState::Submitting => guard(self.service.submit(&item.query), deadline, cancel)
                    .await
                    .map(|r| r.map(Reply::Submitted)),
                QueryState::Polling(handle) => guard(self.service.poll(handle), deadline, cancel)
                    .await
                    .map(|r| r.map(Reply::Polled)),
            };
            let elapsed = call_started.elapsed();

            match call {
                Guarded::TimedOut => {
                    history.push(phase, wait, AttemptOutcome::TimedOut, None, 0, elapsed);
                    return self.timed_out(item, history, started);
                }
                Guarded::Cancelled => {
                    history.push(phase, wait, AttemptOutcome::Cancelled, None, 0, elapsed);
                    return self.cancelled(item, history, started);
                }
                Guarded::Done(Err(err)) => {
                    let outcome = if err.is_retryable() {
                        AttemptOutcome::RateLimited
                    } else {
                        AttemptOutcome::Failed
                    };
                    history.push(phase, wait, outcome, err.status(), 0, elapsed);

                    match err {
                        RemoteError::Throttled { retry_after, .. } => {
                            throttled += 1;
                            if throttled >= self.max_retries {
                                tracing::warn!(
                                    item_id = item.id,
                                    attempts = history.attempts.len(),
                                    "Throttling persisted past retry budget"
                                );
                                let message = format!("Throttled {} times", throttled);
                                return self.resolve(
                                    item,
                                    history,
                                    started,
                                    failed(FailureKind::RetriesExhausted, message),
                                );
                            }

                            wait = self.backoff.wait(throttled, retry_after.as_deref());
                            tracing::warn!(
                                item_id = item.id,
                                phase = ?phase,
                                wait_ms = wait.as_millis() as u64,
                                retry = throttled,
                                max_retries = self.max_retries,
                                "Throttled, backing off"
                            );
                        }
                        other => {
                            tracing::warn!(
                                item_id = item.id,
                                phase = ?phase,
                                error = %other,
                                "Query failed, not retrying"
                            );
                            let kind = other.failure_kind();
                            return self.resolve(item, history, started, failed(kind, other.to_string()));
                        }
                    }
                }
                Guarded::Done(Ok(Reply::Submitted(reply))) => {
                    history.push(
                        phase,
                        wait,
                        AttemptOutcome::Succeeded,
                        Some(reply.status),
                        reply.size_bytes,
                        elapsed,
                    );
                    tracing::debug!(
                        item_id = item.id,
                        conversation_id = %reply.value.conversation_id,
                        message_id = %reply.value.message_id,
                        "Query submitted"
                    );
                    state = QueryState::Polling(reply.value);
                    wait = Duration::ZERO;
                }
                Guarded::Done(Ok(Reply::Polled(reply))) => match reply.value {
                    PollStatus::Pending => {
                        history.push(
                            phase,
                            wait,
                            AttemptOutcome::Pending,
                            Some(reply.status),
                            reply.size_bytes,
                            elapsed,
                        );
                        wait = self.poll_interval;
                    }
                    PollStatus::Completed(result) => {
                        history.push(
                            phase,
                            wait,
                            AttemptOutcome::Succeeded,
                            Some(reply.status),
                            reply.size_bytes,
                            elapsed,
                        );
                        let resolution = Resolution::Succeeded {
                            payload: result.payload,
                            row_count: result.row_count,
                            size_bytes: reply.size_bytes,
                        };
                        return self.resolve(item, history, started, resolution);
                    }
                    PollStatus::Failed(reason) => {
                        history.push(
                            phase,
                            wait,
                            AttemptOutcome::Failed,
                            Some(reply.status),
                            reply.size_bytes,
                            elapsed,
                        );
                        tracing::warn!(item_id = item.id, reason = %reason, "Query reported failure");
                        return self.resolve(item, history, started, failed(FailureKind::Server, reason));
                    }
                },
            }
        }
    }

    fn timed_out(&self, item: &WorkItem, history: History, started: Instant) -> Outcome {
        tracing::warn!(
            item_id = item.id,
            timeout_secs = self.item_timeout.as_secs_f64(),
            "Query timed out"
        );
        let message = format!("No result within {:?}", self.item_timeout);
        self.resolve(item, history, started, failed(FailureKind::Timeout, message))
    }

    fn cancelled(&self, item: &WorkItem, history: History, started: Instant) -> Outcome {
        tracing::debug!(item_id = item.id, "Query abandoned on cancellation");
        let message = "Run cancelled while in flight".to_string();
        self.resolve(item, history, started, failed(FailureKind::Cancelled, message))
    }

    fn resolve(
        &self,
        item: &WorkItem,
        history: History,
        started: Instant,
        resolution: Resolution,
    ) -> Outcome {
        let outcome = Outcome {
            item_id: item.id,
            query: item.query.clone(),
            resolution,
            attempts: history.attempts,
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            item_id = item.id,
            success = outcome.is_success(),
            attempts = outcome.attempts.len(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Work item resolved"
        );
        outcome
    }
}

fn failed(kind: FailureKind, message: String) -> Resolution {
    Resolution::Failed { kind, message }
}
