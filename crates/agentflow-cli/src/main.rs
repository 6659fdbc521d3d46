mod config;
mod follow;

use agentflow_client::{PollOutcome, Poller, ProgressClient};
use agentflow_core::{ErrorStrategy, JobStatus, SubmitRequest};
use agentflow_gateway::GatewayServer;
use agentflow_orchestrator::{spawn_sweeper, JobSubmitter, Orchestrator, ProgressStore};
use clap::{Parser, Subcommand, ValueEnum};
use config::AgentflowConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Idle time after which a client's rate-limit bucket is dropped.
const BUCKET_IDLE: Duration = Duration::from_secs(600);

#[derive(Parser)]
#[command(name = "agentflow", about = "Agentflow: async multi-agent job execution")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentflow.toml")]
    config: PathBuf,

    /// Process log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Submit a task and follow its progress
    Submit {
        /// Task description
        #[arg(short, long)]
        task: String,
        /// Upper bound on oversight revisions and retries
        #[arg(short = 'n', long, default_value_t = 5)]
        max_iterations: u32,
        /// Wait for the result in the submit call instead of polling
        #[arg(long)]
        sync: bool,
        /// Error handling strategy for this job (defaults to the server's)
        #[arg(long, value_parser = parse_strategy)]
        strategy: Option<ErrorStrategy>,
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:5000")]
        server: String,
        /// API key (falls back to AGENTFLOW_API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },
}

fn parse_strategy(raw: &str) -> Result<ErrorStrategy, String> {
    match raw {
        "stop_on_error" => Ok(ErrorStrategy::StopOnError),
        "continue_on_error" => Ok(ErrorStrategy::ContinueOnError),
        "retry_on_error" => Ok(ErrorStrategy::RetryOnError),
        other => Err(format!(
            "unknown strategy '{other}' (expected stop_on_error, continue_on_error or retry_on_error)"
        )),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = AgentflowConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            serve(config, host, port).await
        }
        Commands::Submit {
            task,
            max_iterations,
            sync,
            strategy,
            server,
            api_key,
        } => {
            let mut client = ProgressClient::new(server);
            if let Some(key) = api_key.or_else(|| std::env::var("AGENTFLOW_API_KEY").ok()) {
                client = client.with_api_key(key);
            }
            let mut request = SubmitRequest::new(task, max_iterations);
            request.run_async = !sync;
            request.error_handling_strategy = strategy;
            submit(client, request, config).await
        }
    }
}

async fn serve(config: AgentflowConfig, host: String, port: u16) -> anyhow::Result<()> {
    info!("Starting Agentflow gateway on {}:{}", host, port);

    let store = Arc::new(ProgressStore::new());
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), config.execution.clone()));
    let submitter = Arc::new(JobSubmitter::new(orchestrator));

    if config.security.auth_enabled() {
        info!(keys = config.security.api_keys.len(), "API key auth enabled");
    }
    let (app, mw_state) = GatewayServer::build_with_middleware(submitter, &config.security);

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(store, config.retention.clone(), cancel.clone());

    let limiter = mw_state.rate_limiter.clone();
    let prune_cancel = cancel.clone();
    let pruner = tokio::spawn(async move {
        let mut tick = tokio::time::interval(BUCKET_IDLE);
        loop {
            tokio::select! {
                _ = prune_cancel.cancelled() => break,
                _ = tick.tick() => {
                    let remaining = limiter.prune_idle(BUCKET_IDLE).await;
                    debug!(remaining, "Rate limiter buckets pruned");
                }
            }
        }
    });

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Agentflow gateway listening on {}", addr);

    let shutdown = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown requested");
        shutdown.cancel();
    })
    .await?;

    cancel.cancel();
    sweeper.await?;
    pruner.await?;
    info!("Agentflow gateway stopped");
    Ok(())
}

async fn submit(
    client: ProgressClient,
    request: SubmitRequest,
    config: AgentflowConfig,
) -> anyhow::Result<()> {
    let response = client.submit(&request).await?;
    println!("Execution ID: {}", response.execution_id);

    if !request.run_async {
        if let Some(result) = &response.result {
            print!("{}", follow::format_result(result));
        }
        return finish(response.status, response.error);
    }

    let handle = Poller::spawn(client, response.execution_id, config.poller.clone());
    let mut updates = handle.subscribe();
    let mut seen = 0;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if let Some(job) = snapshot {
                    for entry in follow::new_entries(&job, seen) {
                        println!("{}", follow::format_entry(entry));
                    }
                    seen = job.logs.len();
                    println!("{}", follow::format_status(&job));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.stop();
                break;
            }
        }
    }

    match handle.wait().await {
        PollOutcome::Terminal(job) => {
            for entry in follow::new_entries(&job, seen) {
                println!("{}", follow::format_entry(entry));
            }
            if let Some(result) = &job.result {
                print!("{}", follow::format_result(result));
            }
            finish(job.status, job.error)
        }
        PollOutcome::Cancelled(_) => {
            println!("Stopped following; the job keeps running on the server.");
            Ok(())
        }
        PollOutcome::TimedOut(last) => {
            let status = last.map(|job| job.status.to_string());
            anyhow::bail!(
                "gave up polling after {}s (last status: {})",
                config.poller.max_duration_secs,
                status.as_deref().unwrap_or("unknown")
            )
        }
        PollOutcome::NotFound => {
            anyhow::bail!("job {} is no longer known to the server", response.execution_id)
        }
        PollOutcome::Failed(e) => Err(e.into()),
    }
}

fn finish(status: JobStatus, error: Option<String>) -> anyhow::Result<()> {
    match status {
        JobStatus::Completed => {
            println!("Job completed.");
            Ok(())
        }
        JobStatus::Error => anyhow::bail!(
            "job failed: {}",
            error.as_deref().unwrap_or("no reason given")
        ),
        other => {
            println!("Job is {other}.");
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "agentflow",
            "submit",
            "--task",
            "Research X",
            "-n",
            "3",
            "--sync",
            "--strategy",
            "retry_on_error",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                task,
                max_iterations,
                sync,
                strategy,
                server,
                ..
            } => {
                assert_eq!(task, "Research X");
                assert_eq!(max_iterations, 3);
                assert!(sync);
                assert_eq!(strategy, Some(ErrorStrategy::RetryOnError));
                assert_eq!(server, "http://127.0.0.1:5000");
            }
            Commands::Serve { .. } => panic!("expected submit"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from([
            "agentflow",
            "submit",
            "--task",
            "t",
            "--strategy",
            "yolo"
        ])
        .is_err());
    }

    #[test]
    fn test_cli_serve_overrides() {
        let cli = Cli::try_parse_from([
            "agentflow",
            "--log-format",
            "pretty",
            "serve",
            "-p",
            "9000",
        ])
        .unwrap();
        assert!(matches!(cli.log_format, LogFormat::Pretty));
        assert!(matches!(
            cli.command,
            Commands::Serve {
                port: Some(9000),
                host: None
            }
        ));
    }

    #[test]
    fn test_finish_maps_error_status() {
        assert!(finish(JobStatus::Completed, None).is_ok());
        let err = finish(JobStatus::Error, Some("Data Analyst failed".into())).unwrap_err();
        assert!(err.to_string().contains("Data Analyst failed"));
    }
}
