use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes, TxHash, U256};
use alloy_sol_types::SolEvent;
use tracing::{debug, warn};

use crate::abi::{ROLL_TOPIC, Roll};
use crate::error::DecodeError;
use crate::types::{GameEvent, GameType, RawLog};

/// Result of decoding one batch of raw logs.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    /// Successfully decoded events, in the order the source returned them.
    pub events: Vec<GameEvent>,
    pub failures: Vec<DecodeFailure>,
}

/// A record that was skipped, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub transaction_hash: String,
    pub error: DecodeError,
}

/// Parse a `0x`-prefixed hex quantity. Explorer APIs encode zero as `"0x"`.
pub fn parse_hex_u64(raw: &str) -> Option<u64> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))?;
    if digits.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(digits, 16).ok()
}

fn hex_field(field: &'static str, raw: &str) -> Result<u64, DecodeError> {
    parse_hex_u64(raw).ok_or_else(|| DecodeError::invalid(field, raw))
}

fn optional_hex_field(field: &'static str, raw: Option<&str>) -> Result<Option<u64>, DecodeError> {
    raw.map(|r| hex_field(field, r)).transpose()
}

/// Narrow a uint256 selection to `u8`, rejecting values outside the game's domain.
fn narrow_selection(field: &'static str, value: U256, game: GameType) -> Result<u8, DecodeError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= game.max_selection())
        .ok_or(DecodeError::OutOfRange { field, value, game })
}

/// Decode one raw log emitted by `contract` into a [`GameEvent`].
pub fn decode_log(raw: &RawLog, contract: Address, game: GameType) -> Result<GameEvent, DecodeError> {
    let topics = raw
        .topics
        .iter()
        .map(|t| B256::from_str(t).map_err(|_| DecodeError::invalid("topic", t.as_str())))
        .collect::<Result<Vec<_>, _>>()?;

    let topic0 = *topics.first().ok_or(DecodeError::MissingTopic)?;
    if topic0 != ROLL_TOPIC {
        return Err(DecodeError::UnexpectedEvent(topic0));
    }

    if let Some(addr) = raw.address.as_deref() {
        let found = Address::from_str(addr).map_err(|_| DecodeError::invalid("address", addr))?;
        if found != contract {
            return Err(DecodeError::ForeignContract {
                expected: contract,
                found,
            });
        }
    }

    let data = Bytes::from_str(&raw.data).map_err(|_| DecodeError::invalid("data", raw.data.as_str()))?;
    let roll = Roll::decode_raw_log(topics.iter().copied(), &data)
        .map_err(|e| DecodeError::Abi(e.to_string()))?;

    let block_number = hex_field("blockNumber", &raw.block_number)?;
    let transaction_hash = TxHash::from_str(&raw.transaction_hash)
        .map_err(|_| DecodeError::invalid("transactionHash", raw.transaction_hash.as_str()))?;
    let transaction_index =
        optional_hex_field("transactionIndex", raw.transaction_index.as_deref())?.unwrap_or(0);
    let log_index = optional_hex_field("logIndex", raw.log_index.as_deref())?.unwrap_or(0);
    let timestamp = optional_hex_field("timeStamp", raw.time_stamp.as_deref())?;

    Ok(GameEvent {
        block_number,
        transaction_hash,
        transaction_index,
        log_index,
        contract,
        game,
        player: roll.player,
        amount: roll.amount,
        choice: narrow_selection("choice", roll.choice, game)?,
        outcome: narrow_selection("outcome", roll.outcome, game)?,
        won: roll.won,
        timestamp,
    })
}

/// Decode a batch, skipping and logging every record that fails.
///
/// One malformed record never prevents the rest of the batch from decoding.
pub fn decode_batch(raws: &[RawLog], contract: Address, game: GameType) -> DecodedBatch {
    let mut batch = DecodedBatch {
        events: Vec::with_capacity(raws.len()),
        failures: Vec::new(),
    };

    for raw in raws {
        match decode_log(raw, contract, game) {
            Ok(event) => batch.events.push(event),
            Err(error) => {
                warn!(
                    %game,
                    tx = %raw.transaction_hash,
                    block = %raw.block_number,
                    error = %error,
                    "skipping undecodable log"
                );
                batch.failures.push(DecodeFailure {
                    transaction_hash: raw.transaction_hash.clone(),
                    error,
                });
            }
        }
    }

    debug!(
        %game,
        decoded = batch.events.len(),
        failed = batch.failures.len(),
        "decoded log batch"
    );
    batch
}
