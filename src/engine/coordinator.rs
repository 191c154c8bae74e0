use std::sync::{Arc, Mutex};

use super::aggregator::ResultAggregator;
use super::pool::WorkerPool;
use super::scheduler::RequestScheduler;
use crate::cancel::{self, CancelHandle, CancelSignal};
use crate::config::RunConfig;
use crate::error::{RemoteError, Result, SetupError};
use crate::remote::{RemoteQueryClient, RemoteService};
use crate::report::RunReport;

/// Runs one complete load test: probe, plan, execute, summarize.
///
/// The configuration is fixed at construction. Only [`SetupError`] escapes
/// `execute`; every per-item failure ends up in the report.
///
/// Cancellation applies to the run in progress. One left over from an
/// earlier run is discarded when the next `execute` starts.
pub struct RunCoordinator<S> {
    service: Arc<S>,
    config: RunConfig,
    aggregator: Arc<ResultAggregator>,
    cancel: Mutex<(CancelHandle, CancelSignal)>,
}

impl<S: RemoteService> RunCoordinator<S> {
    pub fn new(service: Arc<S>, config: RunConfig) -> Result<Self> {
        config.validate()?;
        let aggregator = Arc::new(ResultAggregator::new(config.question_count));

        Ok(Self {
            service,
            config,
            aggregator,
            cancel: Mutex::new(cancel::channel()),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Handle that aborts the run from outside
    pub fn cancel_handle(&self) -> CancelHandle {
        self.channel().0.clone()
    }

    fn channel(&self) -> std::sync::MutexGuard<'_, (CancelHandle, CancelSignal)> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Live aggregator; summarizing it mid-run gives a partial report
    pub fn aggregator(&self) -> Arc<ResultAggregator> {
        Arc::clone(&self.aggregator)
    }

    pub async fn execute(&self) -> Result<RunReport> {
        let signal = {
            let mut channel = self.channel();
            if channel.0.is_cancelled() {
                tracing::debug!("Discarding cancellation left over from an earlier run");
                *channel = cancel::channel();
            }
            channel.1.clone()
        };
        self.run(&signal).await
    }

    async fn run(&self, signal: &CancelSignal) -> Result<RunReport> {
        self.check_service().await?;

        let config = &self.config;
        let items = RequestScheduler::schedule(
            config.question_count,
            config.spread_window,
            &config.questions,
            config.selection,
        );
        let client = RemoteQueryClient::from_config(Arc::clone(&self.service), config);

        tracing::info!(
            scenario = ?config.scenario,
            questions = items.len(),
            max_workers = config.max_workers,
            spread_secs = config.spread_window.map(|w| w.as_secs_f64()),
            max_retries = config.retry.max_retries,
            "Starting run"
        );

        self.aggregator.start(items.len());
        WorkerPool::new(config.max_workers)
            .run(items, &client, &self.aggregator, signal)
            .await;
        self.aggregator.stop();

        let report = self.aggregator.summarize();
        tracing::info!(
            run_id = %report.run_id,
            succeeded = report.succeeded,
            failed = report.failed,
            success_rate = report.success_rate,
            wall_clock_secs = report.wall_clock_secs,
            "Run complete"
        );
        Ok(report)
    }

    /// Fail fast before anything is dispatched
    async fn check_service(&self) -> Result<()> {
        match self.service.probe().await {
            Ok(()) => Ok(()),
            Err(RemoteError::Throttled { .. }) => {
                tracing::warn!("Remote service throttled the health check, continuing");
                Ok(())
            }
            Err(RemoteError::Server { status, message }) if status == 401 || status == 403 => {
                Err(SetupError::Unauthorized(format!("HTTP {}: {}", status, message)))
            }
            Err(err) => Err(SetupError::Unreachable(err.to_string())),
        }
    }
}
