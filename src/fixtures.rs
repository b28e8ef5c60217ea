//! Raw log builders shared by the unit tests.

use alloy_primitives::{Address, TxHash, U256, address, hex};
use alloy_sol_types::SolEvent;

use crate::abi::{ROLL_TOPIC, Roll};
use crate::types::{GameEvent, GameType, RawLog};

pub const DICE: Address = address!("D288c47feFE57f84607aA43F705F388D2aE900eC");
pub const COINFLIP: Address = address!("8d89670fE63E55b19B9C49972371D89451a94c10");
pub const PLAYER: Address = address!("aAaAaAaaAaAaAaaAaAAAAAAAAaaaAaAaAaaAaaAa");
pub const OTHER_PLAYER: Address = address!("bBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB");

/// Deterministic transaction hash for a test seed.
pub fn tx_hash(seed: u64) -> TxHash {
    TxHash::left_padding_from(&seed.to_be_bytes())
}

pub fn roll_log_with(
    contract: Address,
    block: u64,
    tx_seed: u64,
    choice: U256,
    outcome: U256,
    won: bool,
) -> RawLog {
    let roll = Roll {
        player: PLAYER,
        amount: U256::from(1_000_000_000_000_000_000u128),
        choice,
        outcome,
        won,
    };
    RawLog {
        address: Some(contract.to_string()),
        topics: vec![hex::encode_prefixed(ROLL_TOPIC)],
        data: hex::encode_prefixed(roll.encode_data()),
        block_number: format!("{block:#x}"),
        transaction_hash: hex::encode_prefixed(tx_hash(tx_seed)),
        transaction_index: Some("0x1".to_string()),
        log_index: Some("0x0".to_string()),
        time_stamp: Some("0x6553f100".to_string()),
        removed: false,
    }
}

/// A well-formed `Roll` log from [`PLAYER`] wagering one ether.
pub fn roll_log(contract: Address, block: u64, tx_seed: u64, choice: u8, outcome: u8, won: bool) -> RawLog {
    roll_log_with(
        contract,
        block,
        tx_seed,
        U256::from(choice),
        U256::from(outcome),
        won,
    )
}

/// An already-decoded event, for store and presentation tests.
pub fn game_event(contract: Address, game: GameType, block: u64, tx_seed: u64) -> GameEvent {
    GameEvent {
        block_number: block,
        transaction_hash: tx_hash(tx_seed),
        transaction_index: 0,
        log_index: 0,
        contract,
        game,
        player: PLAYER,
        amount: U256::from(1_000_000_000_000_000_000u128),
        choice: 1,
        outcome: 0,
        won: false,
        timestamp: None,
    }
}
