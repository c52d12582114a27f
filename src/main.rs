use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use renovate_agent::cache::Cache;
use renovate_agent::config::Config;
use renovate_agent::dedup::Deduplicator;
use renovate_agent::fixer::NoopFixer;
use renovate_agent::logging;
use renovate_agent::metrics::MetricsRecorder;
use renovate_agent::orchestrator::Orchestrator;
use renovate_agent::platform::github::GitHubPlatformClient;
use renovate_agent::platform::PlatformClient;
use renovate_agent::processor::PrProcessor;
use renovate_agent::ratelimit::RateLimitGovernor;
use renovate_agent::rest::{AppState, RestApiServer};
use renovate_agent::state::StateTracker;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "renovate-agent")]
#[command(about = "Adaptive polling and webhook agent that approves green dependency-update pull requests")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine (polling, webhook intake, or both per `operation.mode`)
    Run,

    /// Validate configuration and platform credentials, then exit
    CheckConfig,

    /// Print the current process health as JSON and exit
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(2);
        }
    };

    let _logging_handle = logging::init_logging(&config, cli.debug)?;

    let exit_code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(config).await,
        Commands::CheckConfig => cmd_check_config(config).await,
        Commands::Health => cmd_health(config).await,
    };

    match exit_code {
        Ok(()) => Ok(()),
        Err(err) => {
            if let Some(kind) = err.downcast_ref::<renovate_agent::error::ErrorKind>() {
                if let Some(code) = kind.exit_code() {
                    eprintln!("Error: {kind}");
                    std::process::exit(code);
                }
            }
            Err(err)
        }
    }
}

fn github_token() -> Result<String> {
    std::env::var("GITHUB_TOKEN")
        .context("GITHUB_TOKEN environment variable must be set with a platform access token")
}

async fn validated_platform(
    config: &Config,
    rate: Arc<RateLimitGovernor>,
) -> Result<Arc<dyn PlatformClient>> {
    let token = github_token()?;
    let platform: Arc<dyn PlatformClient> = Arc::new(GitHubPlatformClient::new(token, rate)?);
    platform
        .get_authenticated_identity()
        .await
        .map_err(|err| {
            anyhow::Error::new(renovate_agent::error::ErrorKind::AuthInvalid(err.to_string()))
        })?;
    let _ = config;
    Ok(platform)
}

async fn cmd_check_config(config: Config) -> Result<()> {
    config.validate().map_err(anyhow::Error::new)?;
    let rate = Arc::new(RateLimitGovernor::new(&config.rate));
    validated_platform(&config, rate).await?;
    println!("Configuration is valid and credentials were accepted.");
    Ok(())
}

async fn cmd_health(config: Config) -> Result<()> {
    let rate = Arc::new(RateLimitGovernor::new(&config.rate));
    let platform = validated_platform(&config, rate).await?;
    let snapshot = platform.get_rate_limit().await.map_err(|err| {
        anyhow::Error::new(renovate_agent::error::ErrorKind::from(err))
    })?;
    println!(
        "{}",
        serde_json::json!({
            "status": "ok",
            "rate_limit_remaining": snapshot.remaining,
            "rate_limit": snapshot.limit,
        })
    );
    Ok(())
}

async fn cmd_run(config: Config) -> Result<()> {
    config.validate().map_err(anyhow::Error::new)?;

    let cache = Arc::new(Cache::new(&config.cache));
    let rate = Arc::new(RateLimitGovernor::new(&config.rate));
    let state = Arc::new(StateTracker::new());
    let metrics = Arc::new(MetricsRecorder::new());
    let dedup = Arc::new(Deduplicator::default());
    let last_cycle_at = Arc::new(AsyncMutex::new(None));

    let platform = validated_platform(&config, Arc::clone(&rate)).await?;

    let token = CancellationToken::new();

    let mut handles = Vec::new();

    if config.operation.mode.polling_enabled() {
        let orchestrator = Arc::new(Orchestrator::with_last_cycle_at(
            Arc::clone(&platform),
            Arc::clone(&cache),
            Arc::clone(&rate),
            Arc::clone(&state),
            Arc::clone(&metrics),
            Arc::clone(&dedup),
            config.clone(),
            Arc::clone(&last_cycle_at),
        ));
        let orch_token = token.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.run(orch_token).await;
        }));
    }

    // Worker pool (§5): N tasks independently draining the Deduplicator
    // queue so a slow or retrying repo can't starve the others.
    for _ in 0..config.poll.processor_workers {
        let processor = Arc::new(PrProcessor {
            platform: Arc::clone(&platform),
            fixer: Arc::new(NoopFixer),
            state: Arc::clone(&state),
            cache: Arc::clone(&cache),
            rate: Arc::clone(&rate),
            metrics: Arc::clone(&metrics),
            config: config.clone(),
        });
        let worker_token = token.clone();
        let dedup_worker = Arc::clone(&dedup);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_token.cancelled() => return,
                    (key, sources) = dedup_worker.next() => {
                        let (repo, number) = key.clone();
                        let _ = processor.process(&repo, number, sources).await;
                        dedup_worker.done(&key).await;
                    }
                }
            }
        }));
    }

    let rest_server = if config.operation.mode.webhook_enabled() {
        let app_state = AppState::with_last_cycle_at(
            config.clone(),
            Arc::clone(&metrics),
            Arc::clone(&rate),
            Arc::clone(&cache),
            Arc::clone(&dedup),
            Arc::clone(&last_cycle_at),
        );
        let server = Arc::new(RestApiServer::new(app_state, config.rest_api.port));
        server.start().map_err(anyhow::Error::msg)?;
        Some(server)
    } else {
        None
    };

    tracing::info!(mode = ?config.operation.mode, "renovate-agent running");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, stopping");
    token.cancel();

    if let Some(server) = rest_server {
        server.stop();
    }

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
