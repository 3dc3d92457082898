use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use entropy::server::create_app;
use entropy::{build_app, load_retriever};
use entropy_agents::HttpTransport;
use entropy_market::YahooQuotes;
use entropy_models::EntropyConfig;
use entropy_retrieval::{Embedder, FastembedEmbedder};

#[derive(Parser, Debug)]
#[command(name = "entropy", about = "Multi-agent financial intelligence API")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/entropy.toml")]
    config: String,

    /// Override the listen address (host:port)
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match std::fs::read_to_string(&cli.config) {
        Ok(raw) => toml::from_str::<EntropyConfig>(&raw)
            .with_context(|| format!("Failed to parse config: {}", cli.config))?,
        Err(_) => {
            info!(path = %cli.config, "No config file, using defaults");
            EntropyConfig::default()
        }
    };
    config.pool.apply_env_overrides();

    // Misconfiguration exits with code 1 before anything is wired.
    let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") else {
        eprintln!("ANTHROPIC_API_KEY not found in environment");
        std::process::exit(1);
    };

    let embedder: Arc<dyn Embedder> = Arc::new(
        FastembedEmbedder::new().context("Failed to initialize embedding model")?,
    );
    let retriever = load_retriever(&config, embedder);
    let transport = Arc::new(HttpTransport::new(config.llm.base_url.clone(), api_key));
    let quotes = Arc::new(YahooQuotes::new());

    let bind_addr = cli
        .listen
        .clone()
        .unwrap_or_else(|| config.server.bind_addr());
    let app = Arc::new(build_app(config, transport, retriever, quotes));
    let router = create_app(Arc::clone(&app));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "ENTROPY API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    app.orchestrator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
