use alloy_primitives::{Address, address};

pub mod abi;
pub mod api;
pub mod config;
pub mod decoder;
pub mod error;
pub mod poller;
pub mod reporter;
pub mod store;
pub mod subscription;
pub mod types;

#[cfg(test)]
mod fixtures;

/// Dice game contract on Sonic mainnet
pub const DICE_CONTRACT: Address = address!("D288c47feFE57f84607aA43F705F388D2aE900eC");

/// Coin-flip game contract on Sonic mainnet
pub const COINFLIP_CONTRACT: Address = address!("8d89670fE63E55b19B9C49972371D89451a94c10");

/// Sonicscan log API (Etherscan-compatible)
pub const DEFAULT_EXPLORER_API: &str = "https://api.sonicscan.org/api";

/// Public Sonic WebSocket RPC for live log subscriptions
pub const DEFAULT_WS_RPC: &str = "wss://sonic-rpc.publicnode.com";
