//! Environment-driven configuration.
//!
//! Every knob has a default suitable for paper trading; live mode
//! additionally requires venue credentials and fails fast at startup when
//! any are missing. Values come from the process environment so deployments
//! configure the binary without a config file.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::ledger::DEFAULT_STOPPED_LOSS_FACTOR;
use crate::types::TimeInForce;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    /// Simulated fills against live quotes.
    Paper,
    /// Real orders through the signed venue client.
    Live,
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => Err(format!("unknown trading mode: {other}")),
        }
    }
}

/// Venue API credentials, required only in live mode.
#[derive(Debug, Clone)]
pub struct VenueCredentials {
    pub private_key: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    /// Funding wallet address, when the signer differs from the funder.
    pub funder: Option<String>,
}

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: TradingMode,
    /// Public CLOB host for book reads.
    pub clob_host: String,
    pub condition_id: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub min_edge: Decimal,
    pub usd_per_attempt: Decimal,
    pub poll_interval: Duration,
    pub stop_buffer: Duration,
    pub tif: TimeInForce,
    pub stopped_loss_factor: Decimal,
    /// Directory for session ledger files.
    pub log_dir: String,
    pub credentials: Option<VenueCredentials>,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    var(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Reads configuration from the environment.
    ///
    /// `UP_TOKEN_ID`, `DOWN_TOKEN_ID` and `CONDITION_ID` are always
    /// required. Live mode (`TRADING_MODE=live`) also requires
    /// `POLYMARKET_PRIVATE_KEY`, `POLYMARKET_API_KEY`,
    /// `POLYMARKET_API_SECRET` and `POLYMARKET_API_PASSPHRASE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode: TradingMode = parsed("TRADING_MODE", TradingMode::Paper)?;

        let poll_interval_ms: u64 = parsed("POLL_INTERVAL_MS", 250)?;
        let stop_buffer_secs: u64 = parsed("STOP_BUFFER_SECS", 60)?;

        // Credentials are picked up whenever present so paper sessions can
        // be promoted to live with a flag; live mode requires them.
        let credentials = match (
            var("POLYMARKET_PRIVATE_KEY"),
            var("POLYMARKET_API_KEY"),
            var("POLYMARKET_API_SECRET"),
            var("POLYMARKET_API_PASSPHRASE"),
        ) {
            (Some(private_key), Some(api_key), Some(api_secret), Some(api_passphrase)) => {
                Some(VenueCredentials {
                    private_key,
                    api_key,
                    api_secret,
                    api_passphrase,
                    funder: var("POLYMARKET_FUNDER"),
                })
            }
            _ => None,
        };
        if mode == TradingMode::Live && credentials.is_none() {
            return Err(ConfigError::Missing(
                "POLYMARKET_PRIVATE_KEY / POLYMARKET_API_KEY / POLYMARKET_API_SECRET / POLYMARKET_API_PASSPHRASE",
            ));
        }

        Ok(Self {
            mode,
            clob_host: var("CLOB_HOST").unwrap_or_else(|| "https://clob.polymarket.com".into()),
            condition_id: required("CONDITION_ID")?,
            up_token_id: required("UP_TOKEN_ID")?,
            down_token_id: required("DOWN_TOKEN_ID")?,
            min_edge: parsed("MIN_EDGE", rust_decimal_macros::dec!(0.005))?,
            usd_per_attempt: parsed("USD_PER_ATTEMPT", rust_decimal_macros::dec!(5.0))?,
            poll_interval: Duration::from_millis(poll_interval_ms),
            stop_buffer: Duration::from_secs(stop_buffer_secs),
            tif: parsed("ORDER_TYPE", TimeInForce::Fok)?,
            stopped_loss_factor: parsed("STOPPED_LOSS_FACTOR", DEFAULT_STOPPED_LOSS_FACTOR)?,
            log_dir: var("TRADE_LOG_DIR").unwrap_or_else(|| "trade_logs".into()),
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trading_mode_parse() {
        assert_eq!("paper".parse::<TradingMode>().unwrap(), TradingMode::Paper);
        assert_eq!("LIVE".parse::<TradingMode>().unwrap(), TradingMode::Live);
        assert!("dry-run".parse::<TradingMode>().is_err());
    }
}
