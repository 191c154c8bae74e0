use anyhow::Result;
use std::sync::Arc;

use query_loadgen::cancel::CancelHandle;
use query_loadgen::config::{Config, Mode, RunConfig, Scenario};
use query_loadgen::engine::RunCoordinator;
use query_loadgen::remote::{HttpRemoteService, MockQueryServer, RemoteConfig, RemoteService};
use query_loadgen::sink::{JsonFileSink, RunRecord, TracingSink, TrackingSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;

    // Initialize logging with the configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match &config.mode {
        Mode::ListScenarios => {
            for scenario in Scenario::ALL {
                println!("{}", scenario.describe());
            }
            Ok(())
        }
        Mode::Remote { remote, run } => {
            tracing::info!(base_url = %remote.base_url, "Targeting remote query service");
            let service = Arc::new(HttpRemoteService::new(remote)?);
            run_load(service, run.clone(), &config).await
        }
        Mode::Standalone { mock, run } => {
            let mut server = MockQueryServer::new(mock.clone());
            server.start().await?;
            tracing::info!(url = %server.url(), "Standalone mode: running against mock service");

            let mut remote = RemoteConfig::new(server.url());
            remote.max_connections = run.max_workers;
            let service = Arc::new(HttpRemoteService::new(&remote)?);
            let result = run_load(service, run.clone(), &config).await;

            tracing::info!(
                submitted = server.submitted(),
                throttled = server.throttled(),
                unfinished = server.tracked(),
                "Mock service totals"
            );
            server.stop();
            result
        }
    }
}

async fn run_load<S: RemoteService>(service: Arc<S>, run: RunConfig, config: &Config) -> Result<()> {
    let coordinator = RunCoordinator::new(service, run)?;

    let cancel = coordinator.cancel_handle();
    tokio::spawn(cancel_on_shutdown(cancel));

    let report = coordinator.execute().await?;

    if config.json_output {
        println!("{}", report.to_json());
    } else {
        report.print_table();
    }

    let record = RunRecord::from_report(coordinator.config(), &report, config.include_payloads);
    TracingSink.log_run(&record)?;
    if let Some(path) = &config.output {
        JsonFileSink::new(path).log_run(&record)?;
    }

    Ok(())
}

/// Cancel the run on Ctrl+C or SIGTERM; the report still covers every item
async fn cancel_on_shutdown(cancel: CancelHandle) {
    shutdown_signal().await;
    cancel.cancel();
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, cancelling run...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, cancelling run...");
        },
    }
}
