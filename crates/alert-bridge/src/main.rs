//! Alert bridge binary.
//!
//! Standalone HTTP service receiving Alertmanager webhooks and opening
//! remediation pull requests.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alert_bridge::{
    server, AttemptRegistry, Config, DockerHubClient, GitHubClient, InferenceClient, OllamaClient,
    Orchestrator,
};
use notify::{Notifier, NotifyChannel, SlackChannel};

/// How often expired attempts are evicted.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Alert-to-remediation bridge
#[derive(Parser)]
#[command(name = "alert-bridge")]
#[command(about = "Turns workload alerts into validated GitOps pull requests")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides BRIDGE_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("alert_bridge=info,notify=info,tower_http=info"))
        .context("Invalid log filter")?;

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    info!("Starting alert bridge...");

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    info!(
        repo = %config.github_repo,
        branch = %config.github_branch,
        model = %config.ollama_model,
        workers = config.worker_pool_size,
        "Configuration loaded"
    );

    let model = OllamaClient::new(&config.ollama_url, &config.ollama_model, config.timeouts.llm)
        .context("Failed to create model client")?;
    let images = DockerHubClient::new(&config.image_registry_url, config.timeouts.registry)
        .context("Failed to create registry client")?;
    let github = GitHubClient::new(&config.github_api_url, &config.github_repo, &config.github_token)
        .context("Failed to create GitHub client")?;
    let slack: Arc<dyn NotifyChannel> = Arc::new(SlackChannel::with_timeout(
        config.slack_webhook_url.clone(),
        config.timeouts.notify,
    ));
    let notifier = Notifier::with_channels(vec![slack]);

    info!(
        backend = model.name(),
        model = model.model(),
        registry = %config.image_registry_url,
        notify_channels = notifier.channel_count(),
        "Collaborators ready"
    );

    let registry = Arc::new(AttemptRegistry::new(
        config.attempt_retention,
        config.attempt_cooldown,
    ));
    let eviction = Arc::clone(&registry).spawn_eviction(EVICTION_INTERVAL);

    let orchestrator = Arc::new(
        Orchestrator::new(
            &config,
            registry,
            Arc::new(model),
            Arc::new(images),
            Arc::new(github),
            Arc::new(notifier),
        )
        .context("Failed to load prompt templates")?,
    );

    let app = server::build_router(orchestrator);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port = config.port, "Alert bridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    eviction.abort();
    Ok(())
}
