//! `Roll` event ABI shared by the dice and coin-flip contracts.

use alloy_primitives::{B256, keccak256};
use alloy_sol_types::{SolEvent, sol};

sol! {
    /// Emitted once per settled bet. No parameter is indexed, so the only
    /// topic is the signature hash.
    #[derive(Debug, PartialEq, Eq)]
    event Roll(address player, uint256 amount, uint256 choice, uint256 outcome, bool won);
}

/// Canonical event signature.
pub const ROLL_SIGNATURE: &str = "Roll(address,uint256,uint256,uint256,bool)";

/// topic0 used to filter explorer queries and log subscriptions.
pub const ROLL_TOPIC: B256 = Roll::SIGNATURE_HASH;

/// Recompute the topic hash from [`ROLL_SIGNATURE`] and compare it with the
/// compile-time value. Call at startup to catch a signature mismatch.
pub fn verify_topic_hash() -> bool {
    keccak256(ROLL_SIGNATURE.as_bytes()) == ROLL_TOPIC
}
