//! Configuration management for the task supervisor.
//!
//! Configuration is set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `6060`.
//! - `TZ_OFFSET_HOURS` - Optional. Fixed UTC offset that defines "today". Defaults to `7`.
//! - `NOTION_API_KEY` - Required. Integration token for the outline document.
//! - `NOTION_PAGE_IDS` - Required. Monthly pages as `mm/yyyy=pageid` pairs, comma separated.
//! - `TELEGRAM_BOT_TOKEN` - Required. Bot that receives photographic evidence.
//! - `OPENROUTER_API_KEY` - Required. Key for the vision model.
//! - `VISION_MODEL` - Optional. Defaults to `google/gemini-2.0-flash-001`.
//! - `RPC_URL` - Required. Ethereum JSON-RPC endpoint.
//! - `PRIVATE_KEY` - Required. Hex-encoded key of the paying account.
//! - `USDC_CONTRACT_ADDRESS` - Required. ERC-20 token contract.
//! - `CHAIN_ID` - Optional. Defaults to `42161` (Arbitrum One).
//! - `PUNISHMENT_AMOUNT_USDC` - Optional. Defaults to `0.01`.
//! - `ADDRESS_POOL_PATH` - Optional. Defaults to `all_addresses.txt`.
//! - `ENFORCEMENT_ENABLED` - Optional. `false` turns transfers into a logged dry run.
//! - `ENFORCEMENT_RETRY_DELAY_SECS` - Optional. Defaults to `10`.
//! - `ENFORCEMENT_MAX_ATTEMPTS` - Optional. Unbounded when unset.
//! - `OUTAGE_POLICY` - Optional. `exempt` (default) or `penalize`.
//! - `WORKOUT_CAPTION_MARKER` - Optional. Defaults to `#workout`.
//! - `WORKOUT_MIN_DISTANCE_KM` - Optional. Defaults to `2.5`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

use crate::scheduler::ScheduleConfig;
use crate::util::env_var_bool;
use crate::verify::OutagePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials and endpoint for the on-chain penalty.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rpc_url: url::Url,
    /// Hex private key (with or without `0x`)
    pub private_key: String,
    pub token_contract: String,
    pub chain_id: u64,
}

/// How the enforcement dispatcher behaves.
#[derive(Debug, Clone)]
pub struct EnforcementConfig {
    pub enabled: bool,
    pub amount_usdc: f64,
    pub address_pool_path: PathBuf,
    pub retry_delay: Duration,
    /// `None` retries until success or cancellation
    pub max_attempts: Option<u32>,
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Offset in which the day boundary is evaluated
    pub timezone: FixedOffset,

    pub notion_api_key: String,

    /// Monthly page ids keyed by `mm/yyyy`
    pub notion_page_ids: HashMap<String, String>,

    pub telegram_bot_token: String,

    pub openrouter_api_key: String,
    pub vision_model: String,

    pub ledger: LedgerConfig,
    pub enforcement: EnforcementConfig,

    pub outage_policy: OutagePolicy,

    pub workout_caption_marker: String,
    pub workout_min_distance_km: f64,

    pub morning_schedule: ScheduleConfig,
    pub evening_schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if a required credential is not set,
    /// and `ConfigError::InvalidValue` if a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_env("PORT", 6060u16)?;

        let offset_hours: i32 = parse_env("TZ_OFFSET_HOURS", 7)?;
        let timezone = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| {
            ConfigError::InvalidValue("TZ_OFFSET_HOURS".to_string(), offset_hours.to_string())
        })?;

        let notion_page_ids = parse_page_ids(&required("NOTION_PAGE_IDS")?)?;

        let rpc_url_raw = required("RPC_URL")?;
        let rpc_url = url::Url::parse(&rpc_url_raw)
            .map_err(|e| ConfigError::InvalidValue("RPC_URL".to_string(), e.to_string()))?;

        let ledger = LedgerConfig {
            rpc_url,
            private_key: required("PRIVATE_KEY")?,
            token_contract: required("USDC_CONTRACT_ADDRESS")?,
            chain_id: parse_env("CHAIN_ID", 42161u64)?,
        };

        let max_attempts = match std::env::var("ENFORCEMENT_MAX_ATTEMPTS") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse().map_err(|e| {
                ConfigError::InvalidValue("ENFORCEMENT_MAX_ATTEMPTS".to_string(), format!("{}", e))
            })?),
            _ => None,
        };

        let enforcement = EnforcementConfig {
            enabled: env_var_bool("ENFORCEMENT_ENABLED", true),
            amount_usdc: parse_env("PUNISHMENT_AMOUNT_USDC", 0.01f64)?,
            address_pool_path: std::env::var("ADDRESS_POOL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("all_addresses.txt")),
            retry_delay: Duration::from_secs(parse_env("ENFORCEMENT_RETRY_DELAY_SECS", 10u64)?),
            max_attempts,
        };

        let outage_policy = match std::env::var("OUTAGE_POLICY") {
            Ok(raw) => raw
                .parse()
                .map_err(|e: String| ConfigError::InvalidValue("OUTAGE_POLICY".to_string(), e))?,
            Err(_) => OutagePolicy::default(),
        };

        Ok(Self {
            host,
            port,
            timezone,
            notion_api_key: required("NOTION_API_KEY")?,
            notion_page_ids,
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN")?,
            openrouter_api_key: required("OPENROUTER_API_KEY")?,
            vision_model: std::env::var("VISION_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.0-flash-001".to_string()),
            ledger,
            enforcement,
            outage_policy,
            workout_caption_marker: std::env::var("WORKOUT_CAPTION_MARKER")
                .unwrap_or_else(|_| "#workout".to_string()),
            workout_min_distance_km: parse_env("WORKOUT_MIN_DISTANCE_KM", 2.5f64)?,
            morning_schedule: ScheduleConfig::new(7, 0, 0),
            evening_schedule: ScheduleConfig::new(23, 59, 59),
        })
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

/// Parse `mm/yyyy=pageid` pairs separated by commas.
pub fn parse_page_ids(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut ids = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (month, id) = pair.split_once('=').ok_or_else(|| {
            ConfigError::InvalidValue("NOTION_PAGE_IDS".to_string(), pair.to_string())
        })?;
        ids.insert(month.trim().to_string(), id.trim().replace('-', ""));
    }
    if ids.is_empty() {
        return Err(ConfigError::InvalidValue(
            "NOTION_PAGE_IDS".to_string(),
            "no pages configured".to_string(),
        ));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_ids_reads_pairs() {
        let ids = parse_page_ids("04/2025=1c8eb477-f91a, 05/2025 = abc").unwrap();
        assert_eq!(ids.get("04/2025").map(String::as_str), Some("1c8eb477f91a"));
        assert_eq!(ids.get("05/2025").map(String::as_str), Some("abc"));
    }

    #[test]
    fn parse_page_ids_rejects_garbage() {
        assert!(parse_page_ids("04/2025").is_err());
        assert!(parse_page_ids(" , ").is_err());
    }
}
