use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quill_relay::api::{self, ApiState};
use quill_relay::context::{ContextBuilder, ContextConfig};
use quill_relay::db::{self, ConversationRepo, MemoryRepo};
use quill_relay::{Config, HttpComputeService, Relay, ScratchCache};

/// Quill - conversation relay for AI research assistants
#[derive(Parser)]
#[command(name = "quill", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "QUILL_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long, env = "QUILL_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the retention sweep once and exit
    Sweep {
        /// Delete conversation memory older than this many days
        #[arg(long)]
        horizon_days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,quill_relay=info",
        1 => "info,quill_relay=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let db_path = config.database_path()?;
    let pool = db::init(&db_path)?;
    let memory = MemoryRepo::new(pool.clone());

    if let Some(Command::Sweep { horizon_days }) = cli.command {
        let horizon = horizon_days.unwrap_or(config.memory.retention_days);
        let deleted = memory.sweep(horizon)?;
        tracing::info!(deleted, horizon, "retention sweep finished");
        return Ok(());
    }

    tracing::info!(
        db = %db_path.display(),
        upstream = %config.upstream.endpoint,
        "starting quill relay"
    );

    let conversations = ConversationRepo::new(pool.clone());
    let compute = HttpComputeService::new(
        &config.upstream.endpoint,
        Duration::from_secs(config.upstream.timeout_secs),
    )?;
    let relay = Relay::new(
        conversations.clone(),
        ContextBuilder::new(ContextConfig {
            max_messages: config.context.max_messages,
        }),
        Arc::new(compute),
    );

    let sweeper = quill_relay::sweeper::spawn(
        memory.clone(),
        config.memory.retention_days,
        config.memory.sweep_interval_secs,
    );

    let state = Arc::new(ApiState {
        db: pool,
        conversations,
        memory,
        scratch: ScratchCache::new(config.cache.max_entries, config.cache.max_ttl_secs),
        relay,
    });

    let result = api::serve(&config.server.host, config.server.port, state).await;
    sweeper.abort();
    result?;

    Ok(())
}
