//! Configuration for the chat history server.
//!
//! Settings come from serde defaults, then an optional TOML file, then
//! `CHAT_HISTORY_*` environment variables.

use anyhow::{Context, Result};
use chat_history::{HistoryConfig, HistoryVariant};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_DB_PATH: &str = "CHAT_HISTORY_DB_PATH";
pub const ENV_VARIANT: &str = "CHAT_HISTORY_VARIANT";
pub const ENV_MAX_PAGE_SIZE: &str = "CHAT_HISTORY_MAX_PAGE_SIZE";
pub const ENV_LOG_FORMAT: &str = "CHAT_HISTORY_LOG_FORMAT";

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. In-memory when unset.
    pub path: Option<String>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryServerConfig {
    pub database: DatabaseConfig,
    pub history: HistoryConfig,
    pub log: LogConfig,
}

impl HistoryServerConfig {
    /// Load configuration from an optional file, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Read a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = Some(path).filter(|p| !p.is_empty());
        }

        if let Some(variant) = lookup(ENV_VARIANT) {
            self.history.variant = match variant.as_str() {
                "sequence-ids" => HistoryVariant::SequenceIds,
                "stanza-ids" => HistoryVariant::StanzaIds,
                other => anyhow::bail!(
                    "{} must be sequence-ids or stanza-ids, was {}",
                    ENV_VARIANT,
                    other
                ),
            };
        }

        if let Some(max) = lookup(ENV_MAX_PAGE_SIZE) {
            self.history.max_page_size = max
                .parse()
                .with_context(|| format!("{} is not a number: {}", ENV_MAX_PAGE_SIZE, max))?;
        }

        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log.format = match format.as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                other => anyhow::bail!("{} must be pretty or json, was {}", ENV_LOG_FORMAT, other),
            };
        }

        Ok(())
    }
}
