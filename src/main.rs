//! agent-hub: HTTP gateway to specialised AI agents.
//!
//! This is the application entry point. It loads `.env`, reads configuration
//! from TOML with environment overrides, initializes tracing, starts the
//! configured agents, and serves the Axum router until a shutdown signal.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_hub::agents::AgentRegistry;
use agent_hub::config::{AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER, HEALTHCHECK_TIMEOUT_SECS};
use agent_hub::http::{probe, start_server};
use agent_hub::templates::init_templates;
use agent_hub::{create_router, AppState};

/// agent-hub: route chat messages to AI agents
#[derive(Parser, Debug)]
#[command(name = "agent-hub", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "agent_hub=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the health endpoint and exit non-zero if it does not answer 2xx
    Healthcheck {
        #[arg(long, default_value = "http://127.0.0.1:8000/health")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // .env is optional; the orchestrator may inject variables directly
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if let Some(Command::Healthcheck { url }) = &args.command {
        return Ok(healthcheck(url).await);
    }

    let config_found = std::path::Path::new(&args.config).exists();
    let mut config = AppConfig::load(&args.config)?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let subscriber =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.is_json() {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    if !config_found {
        tracing::info!(path = %args.config, "Config file not found, using defaults");
    }

    tracing::info!(
        environment = %config.environment,
        host = %config.http.host,
        port = config.http.port,
        rate_limit = config.rate_limit.enabled,
        "Loaded configuration"
    );

    let tera = init_templates()?;
    tracing::info!("Initialized templates");

    let agents = Arc::new(AgentRegistry::from_config(&config).await);
    tracing::info!(available = ?agents.available(), "Agents ready");

    let state = AppState::new(config.clone(), tera, agents.clone());
    let app = create_router(state);

    start_server(app, &config).await?;

    agents.cleanup().await;
    tracing::info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// Container probe that needs no curl in the runtime image
async fn healthcheck(url: &str) -> ExitCode {
    match probe(url, Duration::from_secs(HEALTHCHECK_TIMEOUT_SECS)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("healthcheck: {}", e);
            ExitCode::FAILURE
        }
    }
}
