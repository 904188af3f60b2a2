use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use embercast::config::Config;
use embercast::state::AppState;
use embercast::tokens::TokenRegistry;
use embercast::users::UserRegistry;

#[derive(Parser, Debug)]
#[command(author, version, about = "Secure, line-oriented group-chat relay")]
struct Cli {
    /// Path to the JSON config file. Defaults to all-builtin values if absent.
    #[arg(default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy(),
        )
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("install_default should only be called once per process");

    let cli = Cli::parse();

    let config = Config::load(&cli.config).context("failed to load configuration")?;
    let users = UserRegistry::load(&config.users_file).context("failed to load user registry")?;
    let tokens = TokenRegistry::load(&config.tokens_file).context("failed to load token registry")?;

    tracing::info!(port = config.port, "embercast starting");

    let state = Arc::new(AppState::new(config, users, tokens));
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    embercast::server::run(state, shutdown).await.context("server loop failed")?;

    tracing::info!("goodbye");
    Ok(())
}
