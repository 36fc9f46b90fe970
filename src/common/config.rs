//! Environment-based Configuration for the Bridge
//!
//! All secret material comes from environment variables (or a `.env` file
//! loaded by the binary), never from hardcoded values.
//!
//! # Required Environment Variables
//!
//! - `BRIDGE_MNEMONIC` - BIP-39 phrase of the bridge seed
//! - `SOURCE_RPC_URL` - JSON-RPC endpoint of the deposit chain
//! - `PAYOUT_RPC_URL` - JSON-RPC endpoint of the payout chain
//! - `PAYOUT_CHAIN_ID` - EIP-155 chain id of the payout chain
//!
//! # Optional Settings
//!
//! - `BRIDGE_XPUB` - Account xpub; must match the mnemonic when set
//! - `REQUIRED_CONFIRMATIONS` (7), `POLL_INTERVAL_MS` (10000)
//! - `SAFETY_MARGIN_BLOCKS` (10), `FALLBACK_WINDOW_BLOCKS` (1000)
//! - `RPC_TIMEOUT_SECS` (30), `RECEIPT_TIMEOUT_SECS` (180), `CLAIM_TIMEOUT_SECS` (600)
//! - `BRIDGE_DB_PATH` (data/bridge.db), `API_PORT` (3001)
//! - `LOG_LEVEL` (info), `LOG_FORMAT` (pretty | json)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::derivation::{derive_public_extended_key, BridgeSeed};
use crate::watcher::WatcherConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue(
                "LOG_FORMAT".to_string(),
                format!("unknown format: {} (use 'pretty' or 'json')", s),
            )),
        }
    }
}

/// Main configuration struct
#[derive(Clone)]
pub struct BridgeConfig {
    /// Root seed for every deposit key
    pub seed: BridgeSeed,
    /// Account xpub at m/44'/60'/0'
    pub xpub: String,

    pub source_rpc_url: String,
    pub payout_rpc_url: String,
    pub payout_chain_id: u64,

    /// Per-request HTTP timeout
    pub rpc_timeout: Duration,
    /// Upper bound on waiting for a payout receipt
    pub receipt_timeout: Duration,

    pub watcher: WatcherConfig,

    pub db_path: String,
    pub api_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let mnemonic = vars.required("BRIDGE_MNEMONIC")?;
        let seed = BridgeSeed::from_mnemonic(&mnemonic, "")
            .map_err(|e| ConfigError::InvalidValue("BRIDGE_MNEMONIC".to_string(), e.to_string()))?;
        let derived_xpub = derive_public_extended_key(&seed)
            .map_err(|e| ConfigError::InvalidValue("BRIDGE_MNEMONIC".to_string(), e.to_string()))?;

        let xpub = match vars.optional("BRIDGE_XPUB") {
            Some(xpub) if xpub != derived_xpub => {
                return Err(ConfigError::InvalidValue(
                    "BRIDGE_XPUB".to_string(),
                    "does not match BRIDGE_MNEMONIC".to_string(),
                ));
            }
            _ => derived_xpub,
        };

        let defaults = WatcherConfig::default();
        let watcher = WatcherConfig {
            required_confirmations: vars
                .parsed("REQUIRED_CONFIRMATIONS", defaults.required_confirmations)?,
            poll_interval: Duration::from_millis(
                vars.parsed("POLL_INTERVAL_MS", defaults.poll_interval.as_millis() as u64)?,
            ),
            safety_margin_blocks: vars
                .parsed("SAFETY_MARGIN_BLOCKS", defaults.safety_margin_blocks)?,
            fallback_window_blocks: vars
                .parsed("FALLBACK_WINDOW_BLOCKS", defaults.fallback_window_blocks)?,
            claim_timeout: Duration::from_secs(
                vars.parsed("CLAIM_TIMEOUT_SECS", defaults.claim_timeout.as_secs())?,
            ),
        };

        Ok(Self {
            seed,
            xpub,
            source_rpc_url: vars.required("SOURCE_RPC_URL")?,
            payout_rpc_url: vars.required("PAYOUT_RPC_URL")?,
            payout_chain_id: vars.required_parsed("PAYOUT_CHAIN_ID")?,
            rpc_timeout: Duration::from_secs(vars.parsed("RPC_TIMEOUT_SECS", 30)?),
            receipt_timeout: Duration::from_secs(vars.parsed("RECEIPT_TIMEOUT_SECS", 180)?),
            watcher,
            db_path: vars
                .optional("BRIDGE_DB_PATH")
                .unwrap_or_else(|| "data/bridge.db".to_string()),
            api_port: vars.parsed("API_PORT", 3001)?,
            log_level: vars
                .optional("LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string()),
            log_format: match vars.optional("LOG_FORMAT") {
                Some(format) => format.parse()?,
                None => LogFormat::Pretty,
            },
        })
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== Bridge Configuration ===");
        println!("Source RPC: {}", self.source_rpc_url);
        println!("Payout RPC: {} (chain id {})", self.payout_rpc_url, self.payout_chain_id);
        println!("Xpub: {}", self.xpub);
        println!(
            "Confirmations: {} | Poll: {}ms",
            self.watcher.required_confirmations,
            self.watcher.poll_interval.as_millis()
        );
        println!("Database: {}", self.db_path);
        println!("API Port: {}", self.api_port);
        println!("Log Level: {} ({:?})", self.log_level, self.log_format);
        println!("============================");
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("xpub", &self.xpub)
            .field("source_rpc_url", &self.source_rpc_url)
            .field("payout_rpc_url", &self.payout_rpc_url)
            .field("payout_chain_id", &self.payout_chain_id)
            .field("watcher", &self.watcher)
            .field("db_path", &self.db_path)
            .field("api_port", &self.api_port)
            .finish_non_exhaustive()
    }
}

/// Typed access to a key lookup
struct Vars<'a, F>(&'a F);

impl<'a, F> Vars<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn required_parsed<T: FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        let raw = self.required(key)?;
        raw.parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), format!("not a number: {}", raw)))
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), format!("not a number: {}", raw))
            }),
            None => Ok(default),
        }
    }
}
