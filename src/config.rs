use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{ContractConfig, GameType};
use crate::{COINFLIP_CONTRACT, DEFAULT_EXPLORER_API, DEFAULT_WS_RPC, DICE_CONTRACT};

/// Default config file path.
pub const CONFIG_PATH: &str = "roll_feed.toml";

/// Environment overrides, also read from `.env`.
pub const API_KEY_VAR: &str = "EXPLORER_API_KEY";
pub const API_URL_VAR: &str = "EXPLORER_API_URL";
pub const WS_URL_VAR: &str = "ROLL_FEED_WS_URL";

/// Top-level application config deserialized from `roll_feed.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default = "default_contracts")]
    pub contracts: Vec<ContractConfig>,
}

/// Block-explorer log API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Records requested per page (`offset` parameter).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Pages fetched per cycle before deferring the rest to the next one.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Polling interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// WebSocket JSON-RPC endpoint for live `Roll` subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

fn default_api_url() -> String {
    DEFAULT_EXPLORER_API.to_string()
}

fn default_page_size() -> u32 {
    1000
}

fn default_max_pages() -> u32 {
    10
}

fn default_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ws_url() -> String {
    DEFAULT_WS_RPC.to_string()
}

fn default_contracts() -> Vec<ContractConfig> {
    vec![
        ContractConfig {
            name: "dice".to_string(),
            address: DICE_CONTRACT,
            game: GameType::Dice,
        },
        ContractConfig {
            name: "coinflip".to_string(),
            address: COINFLIP_CONTRACT,
            game: GameType::Coinflip,
        },
    ]
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            explorer: ExplorerConfig::default(),
            settings: SettingsConfig::default(),
            rpc: RpcConfig::default(),
            contracts: default_contracts(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise the built-in defaults; then apply
    /// environment overrides and validate.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_VAR).filter(|v| !v.is_empty()) {
            self.explorer.api_key = key;
        }
        if let Some(url) = lookup(API_URL_VAR).filter(|v| !v.is_empty()) {
            self.explorer.api_url = url;
        }
        if let Some(url) = lookup(WS_URL_VAR).filter(|v| !v.is_empty()) {
            self.rpc.ws_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.contracts.is_empty() {
            anyhow::bail!("at least one contract must be configured");
        }
        let mut seen = HashSet::new();
        for contract in &self.contracts {
            if !seen.insert(contract.address) {
                anyhow::bail!("contract {} configured more than once", contract.address);
            }
        }
        if self.settings.poll_interval_secs == 0 {
            anyhow::bail!("settings.poll_interval_secs must be positive");
        }
        if self.explorer.page_size == 0 || self.explorer.max_pages == 0 {
            anyhow::bail!("explorer.page_size and explorer.max_pages must be positive");
        }
        if self.explorer.timeout_secs == 0 {
            anyhow::bail!("explorer.timeout_secs must be positive");
        }
        url::Url::parse(&self.explorer.api_url)
            .with_context(|| format!("invalid explorer.api_url {}", self.explorer.api_url))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.settings.poll_interval_secs)
    }

    /// Timeout for one explorer page request.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.explorer.timeout_secs)
    }

    /// Budget for one whole fetch cycle: every page may use its full
    /// request timeout.
    pub fn cycle_timeout(&self) -> Duration {
        self.fetch_timeout().saturating_mul(self.explorer.max_pages)
    }
}
