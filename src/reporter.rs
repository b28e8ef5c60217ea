use alloy_primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::types::{FeedSnapshot, FeedStatus, GameEvent, GameType};

/// Decimals of the native token.
const NATIVE_DECIMALS: u32 = 18;

/// One settled bet, formatted for output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetReport {
    pub game: GameType,
    pub block_number: u64,
    pub transaction_hash: TxHash,
    pub player: Address,
    pub amount_wei: String,
    /// Wager in whole tokens, two decimals.
    pub amount: String,
    pub choice: String,
    pub outcome: String,
    pub won: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    pub description: String,
}

impl BetReport {
    pub fn new(event: &GameEvent, now: DateTime<Utc>) -> Self {
        Self {
            game: event.game,
            block_number: event.block_number,
            transaction_hash: event.transaction_hash,
            player: event.player,
            amount_wei: event.amount.to_string(),
            amount: format_amount(event.amount),
            choice: selection_label(event.game, event.choice),
            outcome: selection_label(event.game, event.outcome),
            won: event.won,
            age: event.timestamp.map(|ts| relative_time(ts, now)),
            description: describe(event),
        }
    }
}

/// Summary printed when the feed stops.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSummary {
    pub total_events: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<Address>,
    pub recent: Vec<BetReport>,
    pub status: FeedStatus,
}

/// The `limit` most recent bets, optionally only those placed by `player`.
pub fn summarize(
    snapshot: &FeedSnapshot,
    player: Option<Address>,
    limit: usize,
    now: DateTime<Utc>,
) -> FeedSummary {
    let recent = snapshot
        .events
        .iter()
        .filter(|e| player.is_none_or(|p| p == e.player))
        .take(limit)
        .map(|e| BetReport::new(e, now))
        .collect();

    FeedSummary {
        total_events: snapshot.events.len(),
        player,
        recent,
        status: snapshot.status.clone(),
    }
}

/// Wei to whole tokens. `None` if the amount does not fit a `Decimal`.
pub fn ether_amount(wei: U256) -> Option<Decimal> {
    let wei = i128::try_from(wei).ok()?;
    Decimal::try_from_i128_with_scale(wei, NATIVE_DECIMALS).ok()
}

/// Whole tokens rounded to two decimals, e.g. `"1.50"`. Amounts too large
/// for a `Decimal` are shown in wei.
pub fn format_amount(wei: U256) -> String {
    match ether_amount(wei) {
        Some(amount) => {
            let mut rounded =
                amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            rounded.rescale(2);
            rounded.to_string()
        }
        None => format!("{wei} wei"),
    }
}

/// Coin-flip selections are `0` = Heads and `1` = Tails; dice selections
/// are shown as numbers.
pub fn selection_label(game: GameType, value: u8) -> String {
    match (game, value) {
        (GameType::Coinflip, 0) => "Heads".to_string(),
        (GameType::Coinflip, 1) => "Tails".to_string(),
        _ => value.to_string(),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

/// Coarse age of a block timestamp, e.g. "5 mins ago".
pub fn relative_time(timestamp: u64, now: DateTime<Utc>) -> String {
    let Some(at) = i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
    else {
        return "Just now".to_string();
    };

    let minutes = now.signed_duration_since(at).num_minutes();
    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        plural(minutes, "min")
    } else if minutes < 24 * 60 {
        plural(minutes / 60, "hour")
    } else {
        plural(minutes / (24 * 60), "day")
    }
}

/// `0x1234...abcd`
pub fn short_address(address: &Address) -> String {
    let full = address.to_string();
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// One-line description for the recent-bets view.
pub fn describe(event: &GameEvent) -> String {
    let player = short_address(&event.player);
    let amount = format_amount(event.amount);
    match event.game {
        GameType::Dice => format!(
            "{player} bet {amount} on {}, rolled {} and {}",
            event.choice,
            event.outcome,
            if event.won { "Won" } else { "Lost" }
        ),
        GameType::Coinflip => format!(
            "{player} flipped {amount} and {}",
            if event.won { "doubled" } else { "got rugged" }
        ),
    }
}

/// Emit a bet as a single JSON line to stdout.
pub fn report_event(event: &GameEvent, now: DateTime<Utc>) {
    if let Ok(json) = serde_json::to_string(&BetReport::new(event, now)) {
        println!("{json}");
    }
}

/// Emit the exit summary as pretty-printed JSON to stdout.
pub fn report_summary(summary: &FeedSummary) {
    if let Ok(json) = serde_json::to_string_pretty(summary) {
        println!("{json}");
    }
}
