//! Mockhub Server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mockhub_server::config::DEFAULT_CONFIG_YAML;
use mockhub_server::{Dispatcher, MockServer, MockServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mockhub-server",
    about = "Dynamic mock server - versioned per-owner mocks with matching and templates",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mockhub.yaml")]
    config: PathBuf,

    /// Listen address, overrides the configuration file
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        print!("{}", DEFAULT_CONFIG_YAML);
        return Ok(());
    }

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no owners, no mocks)");
        MockServerConfig::default()
    };

    // Validate and exit if requested
    config.validate()?;
    if args.validate {
        println!(
            "Configuration is valid ({} owners, {} mocks defined)",
            config.owners.len(),
            config.mocks.len()
        );
        return Ok(());
    }

    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    // Build dispatcher and seed mocks
    let dispatcher = Arc::new(Dispatcher::from_config(&config).await?);
    let server = MockServer::new(dispatcher, config.dispatch.identity_header.clone());

    // Serve until Ctrl-C
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
}
