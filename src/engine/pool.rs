//! Bounded worker pool that dispatches work items on schedule.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::aggregator::ResultAggregator;
use crate::cancel::CancelSignal;
use crate::error::FailureKind;
use crate::models::{Outcome, Resolution, WorkItem};
use crate::remote::{RemoteQueryClient, RemoteService};

/// Executes work items with at most `max_workers` in progress at once.
///
/// Items take a worker slot in plan order, wait for their target dispatch
/// time, then run through the [`RemoteQueryClient`]. Each outcome is streamed
/// to the aggregator as soon as it resolves. One item failing never affects
/// another.
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Run every item to an outcome. Returns once all of them are recorded.
    ///
    /// On cancellation, items still waiting for a slot or for their dispatch
    /// time are recorded as cancelled without touching the service.
    pub async fn run<S: RemoteService>(
        &self,
        items: Vec<WorkItem>,
        client: &RemoteQueryClient<S>,
        aggregator: &Arc<ResultAggregator>,
        cancel: &CancelSignal,
    ) {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let run_start = Instant::now();
        let mut dispatcher_cancel = cancel.clone();
        let mut workers = FuturesUnordered::new();
        let mut pending = items.into_iter();

        tracing::debug!(total, max_workers = self.max_workers, "Worker pool starting");

        while let Some(item) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = dispatcher_cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                let skipped = 1 + pending.len();
                tracing::info!(skipped, "Run cancelled, skipping undispatched items");
                record_outcome(aggregator, Outcome::cancelled(item.id, item.query), total);
                for item in pending.by_ref() {
                    record_outcome(aggregator, Outcome::cancelled(item.id, item.query), total);
                }
                break;
            };

            let id = item.id;
            let query = item.query.clone();
            let client = client.clone();
            let aggregator_for_worker = Arc::clone(aggregator);
            let mut cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let due = item.is_immediate()
                    || tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        _ = tokio::time::sleep_until(item.target(run_start)) => true,
                    };

                let outcome = if due && !cancel.is_cancelled() {
                    client.execute(&item, &mut cancel).await
                } else {
                    Outcome::cancelled(item.id, item.query.clone())
                };
                record_outcome(&aggregator_for_worker, outcome, total);
            });

            workers.push(async move { (id, query, handle.await) });
        }

        while let Some((id, query, joined)) = workers.next().await {
            if let Err(e) = joined {
                tracing::error!(item_id = id, error = %e, "Worker task failed");
                let outcome = Outcome {
                    item_id: id,
                    query,
                    resolution: Resolution::Failed {
                        kind: FailureKind::Internal,
                        message: format!("Worker task failed: {}", e),
                    },
                    attempts: Vec::new(),
                    elapsed: std::time::Duration::ZERO,
                };
                record_outcome(aggregator, outcome, total);
            }
        }
    }
}

fn record_outcome(aggregator: &ResultAggregator, outcome: Outcome, total: usize) {
    let recorded = aggregator.record(outcome);
    let step = (total / 10).max(1);
    if recorded % step == 0 || recorded == total {
        tracing::info!(recorded, total, "Progress");
    }
}
