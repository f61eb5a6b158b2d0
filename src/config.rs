//! Node configuration, read from an optional TOML file

use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::blockchain::chain::{MAX_DIFFICULTY, MIN_DIFFICULTY};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex digits required of a block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    /// Amount credited to the miner of each block
    #[serde(default = "default_mining_reward")]
    pub mining_reward: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub path: String,
    /// Keep everything in memory; nothing survives a restart
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir(),
            in_memory: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_difficulty() -> u8 {
    4
}

fn default_mining_reward() -> f64 {
    50.0
}

fn default_data_dir() -> String {
    "data/blockchain".to_string()
}

impl Config {
    /// Parses a TOML document; missing keys take their defaults
    pub fn from_toml(source: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(source).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or the defaults when the file does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&source)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let difficulty = self.ledger.difficulty;
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
            bail!(
                "ledger.difficulty must be between {} and {}, got {}",
                MIN_DIFFICULTY,
                MAX_DIFFICULTY,
                difficulty
            );
        }

        if !self.ledger.mining_reward.is_finite() || self.ledger.mining_reward < 0.0 {
            bail!("ledger.mining_reward must be a non-negative number");
        }

        if !self.storage.in_memory && self.storage.path.is_empty() {
            bail!("storage.path must be set unless storage.in_memory is true");
        }

        Ok(())
    }
}
