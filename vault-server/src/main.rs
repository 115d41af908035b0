mod config;
mod server;
mod transport;

use anyhow::Context;
use clap::Parser;
use config::{Config, DEFAULT_CONFIG_FILE};
use server::run_server;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "safe_vault")]
#[command(about = "Storage vault of a distributed, content-addressed network")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safe_vault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Vault error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Only an explicitly named file has to exist.
    let (path, required) = match cli.config {
        Some(path) => (path, true),
        None => (DEFAULT_CONFIG_FILE.to_string(), false),
    };
    tracing::info!("Starting SAFE vault with config: {}", path);

    let config = Config::from_file(&path, required)
        .with_context(|| format!("failed to load config {}", path))?;
    let runtime = config.runtime().context("invalid configuration")?;

    tracing::info!(
        "Vault name: {}, client port: {}, peer port: {}, contacts: {}",
        runtime.our_info.name,
        runtime.client_bind_addr,
        runtime.peer_bind_addr,
        runtime.contacts.len()
    );

    run_server(runtime).await.context("server error")?;
    Ok(())
}
