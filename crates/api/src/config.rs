//! Application configuration loaded from environment variables.

use domain::Sku;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not a valid value: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("INVENTORY_SEED entry {0:?} is not of the form SKU=quantity")]
    SeedEntry(String),
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `"0.0.0.0"`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: Postgres connection string; unset means in-memory storage
/// - `INVENTORY_SEED`: initial stock, `SKU=qty,SKU=qty`
/// - `COMMAND_MAX_ATTEMPTS`: attempts per command under conflicts (default `3`)
/// - `CHECKPOINT_INTERVAL`: events between read-model commits in batch runs (default `100`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub inventory_seed: Vec<(Sku, i64)>,
    pub command_max_attempts: u32,
    pub checkpoint_interval: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            inventory_seed: match lookup("INVENTORY_SEED") {
                Some(raw) => parse_inventory_seed(&raw)?,
                None => defaults.inventory_seed,
            },
            command_max_attempts: parse_var(&lookup, "COMMAND_MAX_ATTEMPTS")?
                .unwrap_or(defaults.command_max_attempts),
            checkpoint_interval: parse_var(&lookup, "CHECKPOINT_INTERVAL")?
                .unwrap_or(defaults.checkpoint_interval),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            inventory_seed: Vec::new(),
            command_max_attempts: 3,
            checkpoint_interval: 100,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}

/// Parses `SKU=qty,SKU=qty`. Blank entries are ignored.
pub fn parse_inventory_seed(raw: &str) -> Result<Vec<(Sku, i64)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (sku, quantity) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::SeedEntry(entry.to_string()))?;
            let sku = sku.trim();
            let quantity = quantity
                .trim()
                .parse()
                .map_err(|_| ConfigError::SeedEntry(entry.to_string()))?;
            if sku.is_empty() {
                return Err(ConfigError::SeedEntry(entry.to_string()));
            }
            Ok((Sku::new(sku), quantity))
        })
        .collect()
}
