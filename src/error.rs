use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

use crate::types::GameType;

/// Failure of one log query against the event source.
///
/// None of these are fatal: the poller abandons the current cycle for the
/// affected contract and retries on a later tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure or non-2xx HTTP status.
    #[error("log source unavailable: {0}")]
    SourceUnavailable(String),
    /// The API answered but reported a logical error (bad query, rate limit).
    #[error("log source rejected query: {0}")]
    SourceRejected(String),
    #[error("log request timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to decode a single raw log record into a [`GameEvent`].
///
/// [`GameEvent`]: crate::types::GameEvent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopic,
    #[error("unexpected event topic {0}")]
    UnexpectedEvent(B256),
    #[error("log emitted by {found}, expected {expected}")]
    ForeignContract { expected: Address, found: Address },
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("abi decode failed: {0}")]
    Abi(String),
    #[error("{field} value {value} out of range for {game}")]
    OutOfRange {
        field: &'static str,
        value: U256,
        game: GameType,
    },
}

impl DecodeError {
    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}

/// Failure of a live log subscription session. The subscription task
/// reconnects after any of these.
#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("websocket error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("subscription rejected: {0}")]
    Rejected(String),
    #[error("no subscription confirmation within {0:?}")]
    AckTimeout(Duration),
    #[error("connection closed before subscription was confirmed")]
    Closed,
}
