//! Data Layer command line

use clap::Parser;
use datalayer_cli::{run, AppState, Command, DataLayerConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "datalayer")]
#[command(about = "Versioned Merkle key/value store")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "DATALAYER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "DATALAYER_DB")]
    db: Option<PathBuf>,

    /// Use in-memory storage (for testing, data will not persist)
    #[arg(long, env = "DATALAYER_MEMORY_STORE")]
    memory_store: bool,

    /// Enable debug logging
    #[arg(short, long, env = "DATALAYER_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logs go to stderr so stdout stays valid JSON
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("datalayer={log_level},sqlx=warn").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = DataLayerConfig::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.database.path = Some(db);
    }
    if args.memory_store {
        config.use_memory_store = true;
    }

    let state = AppState::new(config).await?;
    let output = run(&state, args.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
