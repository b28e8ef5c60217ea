//! Stream settled bets from the live log subscription until ctrl-c.
//!
//! Prints one JSON line per bet; with --player only that player's bets.

use std::path::PathBuf;

use alloy_primitives::Address;
use anyhow::Result;
use clap::Parser;
use futures_util::future::select_all;
use tracing::info;

use roll_feed::config::{AppConfig, CONFIG_PATH};
use roll_feed::reporter;
use roll_feed::subscription::{RollSubscription, SubscriptionFilter};
use roll_feed::types::GameType;

#[derive(Parser)]
#[command(name = "watch_rolls", about = "Watch bet outcomes as they settle")]
struct Args {
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Only show bets placed by this address
    #[arg(long)]
    player: Option<Address>,

    /// Only follow one game (dice or coinflip)
    #[arg(long)]
    game: Option<String>,
}

fn parse_game(raw: &str) -> Result<GameType> {
    match raw.to_lowercase().as_str() {
        "dice" => Ok(GameType::Dice),
        "coinflip" | "flip" => Ok(GameType::Coinflip),
        other => anyhow::bail!("unknown game {other:?}, expected dice or coinflip"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = AppConfig::resolve(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let game = args.game.as_deref().map(parse_game).transpose()?;
    let mut subscriptions: Vec<RollSubscription> = config
        .contracts
        .iter()
        .filter(|c| game.is_none_or(|g| g == c.game))
        .map(|c| {
            info!("Watching {} ({}) at {}", c.name, c.game, c.address);
            RollSubscription::spawn(
                config.rpc.ws_url.clone(),
                SubscriptionFilter {
                    contract: c.address,
                    game: c.game,
                    player: args.player,
                },
            )
        })
        .collect();

    if subscriptions.is_empty() {
        anyhow::bail!("no configured contract matches the requested game");
    }

    loop {
        let next = select_all(subscriptions.iter_mut().map(|s| Box::pin(s.next())));
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            (event, _, _) = next => match event {
                Some(event) => reporter::report_event(&event, chrono::Utc::now()),
                None => {
                    info!("Subscription ended");
                    break;
                }
            }
        }
    }

    for subscription in subscriptions {
        subscription.unsubscribe().await;
    }

    Ok(())
}
