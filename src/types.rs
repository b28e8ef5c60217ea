use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

/// Which game contract emitted a `Roll` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Dice,
    Coinflip,
}

impl GameType {
    /// Largest `choice`/`outcome` value the game can produce.
    ///
    /// Dice selections are win-chance / roll values on a 0–100 scale,
    /// coin-flip selections are 0 (heads) or 1 (tails).
    pub fn max_selection(self) -> u8 {
        match self {
            Self::Dice => 100,
            Self::Coinflip => 1,
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dice => write!(f, "dice"),
            Self::Coinflip => write!(f, "coinflip"),
        }
    }
}

/// A settled bet, decoded from one `Roll` log.
///
/// Immutable once created; the reconciliation store owns the canonical list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    pub block_number: u64,
    pub transaction_hash: TxHash,
    pub transaction_index: u64,
    pub log_index: u64,
    pub contract: Address,
    pub game: GameType,
    pub player: Address,
    /// Wager in wei.
    pub amount: U256,
    pub choice: u8,
    pub outcome: u8,
    pub won: bool,
    /// Block timestamp in seconds, when the source supplies one.
    pub timestamp: Option<u64>,
}

/// Undecoded log record as returned by the explorer `getLogs` endpoint.
///
/// The same shape is used by JSON-RPC `eth_subscription` notifications, which
/// omit `timeStamp` and may carry `removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    #[serde(default)]
    pub transaction_index: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub time_stamp: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// A contract the feed follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Display name, e.g. "dice".
    pub name: String,
    pub address: Address,
    pub game: GameType,
}

/// Per-contract cycle state: `Idle → Fetching → Decoding → Merging → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Fetching,
    Decoding,
    Merging,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractStatus {
    pub name: String,
    pub contract: Address,
    pub game: GameType,
    pub state: CycleState,
    pub high_water_mark: Option<u64>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// True until every contract has finished its first cycle.
    pub loading: bool,
    /// Set only while no cycle has ever succeeded.
    pub error: Option<String>,
    pub contracts: Vec<ContractStatus>,
}

/// Read-only view of the feed handed to readers after each cycle.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    /// Most recent first.
    pub events: Arc<Vec<GameEvent>>,
    pub status: FeedStatus,
}

impl FeedSnapshot {
    /// Bets placed by `player`, most recent first.
    pub fn for_player(&self, player: Address) -> Vec<&GameEvent> {
        self.events.iter().filter(|e| e.player == player).collect()
    }

    /// The `limit` most recent bets.
    pub fn recent(&self, limit: usize) -> &[GameEvent] {
        &self.events[..limit.min(self.events.len())]
    }
}

/// Incremental notifications emitted by the poller alongside snapshots.
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    /// Events that were new to the store after a merge, most recent first.
    NewEvents {
        contract: Address,
        game: GameType,
        events: Vec<GameEvent>,
    },
    CycleFailed {
        contract: Address,
        game: GameType,
        error: String,
    },
}
