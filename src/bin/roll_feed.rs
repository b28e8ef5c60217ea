use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use roll_feed::abi;
use roll_feed::api::ExplorerClient;
use roll_feed::config::{AppConfig, CONFIG_PATH};
use roll_feed::poller::{PollSettings, Poller};
use roll_feed::reporter;
use roll_feed::types::FeedUpdate;

#[derive(Parser)]
#[command(name = "roll_feed", about = "Follow settled dice and coin-flip bets")]
struct Args {
    /// Config file (built-in defaults are used if it does not exist)
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Only print bets placed by this address
    #[arg(long)]
    player: Option<Address>,

    /// Number of recent bets in the exit summary
    #[arg(long, default_value_t = 12)]
    limit: usize,

    /// Write the default config to --config and exit
    #[arg(long)]
    init_config: bool,
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.init_config {
        if args.config.exists() {
            anyhow::bail!("{} already exists", args.config.display());
        }
        AppConfig::default().save(&args.config)?;
        println!("Wrote default config to {}", args.config.display());
        return Ok(());
    }

    let config = AppConfig::resolve(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if !abi::verify_topic_hash() {
        warn!("Roll topic hash does not match {}", abi::ROLL_SIGNATURE);
    }
    if config.explorer.api_key.is_empty() {
        warn!("No explorer API key configured, requests may be rate limited");
    }

    let settings = PollSettings::from_config(&config);
    info!(
        "Starting roll feed: {} contract(s), poll={}s, api={}",
        config.contracts.len(),
        settings.interval.as_secs(),
        config.explorer.api_url,
    );
    for contract in &config.contracts {
        info!("  {} ({}) at {}", contract.name, contract.game, contract.address);
    }

    let client = Arc::new(ExplorerClient::new(&config.explorer)?);
    let (update_tx, mut updates) = mpsc::unbounded_channel();
    let poller = Poller::new(client, config.contracts.clone(), settings).with_updates(update_tx);
    let snapshots = poller.subscribe();

    let player = args.player;
    let printer = async move {
        while let Some(update) = updates.recv().await {
            match update {
                FeedUpdate::NewEvents { events, .. } => {
                    let now = chrono::Utc::now();
                    // Oldest first so stdout reads chronologically.
                    for event in events.iter().rev() {
                        if player.is_none_or(|p| p == event.player) {
                            reporter::report_event(event, now);
                        }
                    }
                }
                FeedUpdate::CycleFailed { contract, error, .. } => {
                    debug!("cycle for {contract} failed: {error}");
                }
            }
        }
    };

    tokio::join!(poller.run(shutdown_signal()), printer);

    let snapshot = snapshots.borrow().clone();
    let summary = reporter::summarize(&snapshot, args.player, args.limit, chrono::Utc::now());
    reporter::report_summary(&summary);

    Ok(())
}
