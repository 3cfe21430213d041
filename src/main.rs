//! Tripguard HTTP server
//!
//! Starts an Axum web server exposing the guardrail preflight, cache
//! invalidation, health and metrics endpoints.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tripguard::{
    cache::TagVersions,
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    store, telemetry,
};

fn load_config(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::from_file(path)?;
    config.apply_env(|name| std::env::var(name).ok());
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Config { output } => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    eprintln!("Configuration template written to {}", path);
                }
                None => print!("{}", template),
            }
            Ok(())
        }
        Command::BumpTags { tags } => {
            let config = load_config(&cli.config)?;
            telemetry::init(&config.observability.log_level);

            let store = store::from_config(&config.store);
            if store.is_none() {
                return Err("bump-tags requires a configured key-value store".into());
            }
            let versions = TagVersions::new(store, telemetry::Telemetry::default());
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            for (tag, version) in versions.bump_tags(&tags).await {
                println!("{} -> v{}", tag, version);
            }
            Ok(())
        }
        Command::Serve => serve(&cli.config).await,
    }
}

async fn serve(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(load_config(config_path)?);

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting Tripguard server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::new(config.clone())?;
    let app = handlers::app(state);

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
