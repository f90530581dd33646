use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use pageindex_domain::config::{Config, ConfigSeverity, CorsConfig};
use pageindex_gateway::cli::{Cli, Command};
use pageindex_gateway::llm_client::OpenAiCompatClient;
use pageindex_gateway::state::AppState;
use pageindex_gateway::store::Store;
use pageindex_gateway::supervisor::chat::ChatSupervisor;
use pageindex_gateway::supervisor::job::JobSupervisor;
use pageindex_gateway::{api, cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = Cli::parse();

    match parsed.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config(&parsed)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Validate) => {
            let (config, config_path) = cli::load_config(&parsed)?;
            let issues = config.validate();
            for issue in &issues {
                println!("[{:?}] {}", issue.severity, issue.message);
            }
            println!("{config_path}: {} issue(s)", issues.len());
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Structured JSON logging for the whole service.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pageindex_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("pageindex-web starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {}", issue.message),
            ConfigSeverity::Error => tracing::error!("config: {}", issue.message),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let store = Arc::new(Store::new(std::path::Path::new(&config.storage.root)).context("initializing store")?);
    tracing::info!(root = %config.storage.root, "store ready");

    let jobs = JobSupervisor::new(store.clone(), config.clone()).context("initializing job supervisor")?;
    tracing::info!("job supervisor ready (restart reconciliation complete)");

    let api_key = std::env::var(&config.llm.api_key_env).ok();
    let llm = Arc::new(OpenAiCompatClient::new(config.llm.base_url.clone(), api_key, config.llm.timeout_secs));
    tracing::info!(base_url = %config.llm.base_url, "LLM client ready");

    let chats = ChatSupervisor::new(store.clone(), config.clone(), jobs.clone(), llm)
        .context("initializing chat supervisor")?;
    tracing::info!("chat supervisor ready (restart reconciliation complete)");

    let state = AppState { config: config.clone(), store, jobs, chats };

    let cors_layer = build_cors_layer(&config.server.cors);
    let app = api::router(state).layer(cors_layer);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "pageindex-web listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

/// Flat allow-list only — no wildcard-port matching. Browser clients for
/// this service are configured with one fixed origin per deployment, so
/// the extra predicate machinery has no caller.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
