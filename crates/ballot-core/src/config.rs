//! Configuration management for ballot
//!
//! Handles loading and validation of ballot.toml configuration files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::wait::Backoff;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "BALLOT_CONFIG";

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "ballot.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network selection and overrides
    #[serde(default)]
    pub network: NetworkConfig,

    /// Transaction building defaults
    #[serde(default)]
    pub transactions: TransactionsConfig,

    /// Status polling settings
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Session persistence settings
    #[serde(default)]
    pub sessions: SessionsConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Data directory; defaults to the platform local data dir
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            log_file: None,
            data_dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Deployment the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Devnet,
    Testnet,
    Mainnet,
}

impl Environment {
    /// Gateway API base URL for this deployment.
    #[must_use]
    pub const fn gateway_url(self) -> &'static str {
        match self {
            Self::Devnet => "https://devnet-api.multiversx.com",
            Self::Testnet => "https://testnet-template-api.multiversx.com",
            Self::Mainnet => "https://template-api.multiversx.com",
        }
    }

    /// Chain identifier expected by the network.
    #[must_use]
    pub const fn chain_id(self) -> &'static str {
        match self {
            Self::Devnet => "D",
            Self::Testnet => "T",
            Self::Mainnet => "1",
        }
    }

    /// Address of the election contract deployed on this network.
    #[must_use]
    pub const fn contract_address(self) -> &'static str {
        match self {
            Self::Devnet => "erd1qqqqqqqqqqqqqpgq39y2fxfn72ew5ct0rgn4utaqtcnh9u49ua2ssqz2sd",
            Self::Testnet => "erd1qqqqqqqqqqqqqpgq8tq5rulzxzje29v8kzmcxx9pgx6kmevmep6qckwthl",
            Self::Mainnet => "erd1qqqqqqqqqqqqqpgqtmcuh307t6kky677ernjj9ulk64zq74w9l5qxyhdn7",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Devnet => f.write_str("devnet"),
            Self::Testnet => f.write_str("testnet"),
            Self::Mainnet => f.write_str("mainnet"),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    /// Preset deployment
    #[serde(default)]
    pub environment: Environment,

    /// Override the preset gateway URL
    #[serde(default)]
    pub gateway_url: Option<String>,

    /// Override the preset contract address
    #[serde(default)]
    pub contract_address: Option<String>,

    /// Override the preset chain id
    #[serde(default)]
    pub chain_id: Option<String>,
}

impl NetworkConfig {
    #[must_use]
    pub fn gateway_url(&self) -> String {
        self.gateway_url
            .clone()
            .unwrap_or_else(|| self.environment.gateway_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    #[must_use]
    pub fn contract_address(&self) -> String {
        self.contract_address
            .clone()
            .unwrap_or_else(|| self.environment.contract_address().to_string())
    }

    #[must_use]
    pub fn chain_id(&self) -> String {
        self.chain_id
            .clone()
            .unwrap_or_else(|| self.environment.chain_id().to_string())
    }
}

/// Transaction defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsConfig {
    /// Gas limit applied to every contract call
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Gas price in the smallest denomination
    #[serde(default = "default_gas_price")]
    pub gas_price: u64,

    /// Transaction format version
    #[serde(default = "default_tx_version")]
    pub version: u32,

    /// Give up waiting for the signer after this many seconds. 0 = wait forever.
    #[serde(default)]
    pub sign_timeout_secs: u64,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            gas_limit: default_gas_limit(),
            gas_price: default_gas_price(),
            version: default_tx_version(),
            sign_timeout_secs: 0,
        }
    }
}

impl TransactionsConfig {
    #[must_use]
    pub fn sign_timeout(&self) -> Option<Duration> {
        (self.sign_timeout_secs > 0).then(|| Duration::from_secs(self.sign_timeout_secs))
    }
}

fn default_gas_limit() -> u64 {
    60_000_000
}

fn default_gas_price() -> u64 {
    1_000_000_000
}

fn default_tx_version() -> u32 {
    1
}

/// Status polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// First poll delay in milliseconds
    #[serde(default = "default_poll_initial")]
    pub poll_initial_ms: u64,

    /// Maximum poll delay in milliseconds
    #[serde(default = "default_poll_max")]
    pub poll_max_ms: u64,

    /// Multiplicative backoff factor
    #[serde(default = "default_poll_factor")]
    pub poll_factor: u32,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_initial_ms: default_poll_initial(),
            poll_max_ms: default_poll_max(),
            poll_factor: default_poll_factor(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl TrackingConfig {
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.poll_initial_ms),
            max: Duration::from_millis(self.poll_max_ms),
            factor: self.poll_factor,
            max_polls: None,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_poll_initial() -> u64 {
    500
}

fn default_poll_max() -> u64 {
    6_000
}

fn default_poll_factor() -> u32 {
    2
}

fn default_request_timeout() -> u64 {
    10
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionsConfig {
    /// Session store file; defaults to `<data_dir>/sessions.json`
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Session registry file; defaults to `<data_dir>/registry.json`
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `BALLOT_CONFIG`, then `./ballot.toml`, then defaults
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load_from(local);
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::Missing(display).into());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Unreadable {
                path: display,
                reason: err.to_string(),
            })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration text
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|err| ConfigError::Syntax(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every submission fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transactions.gas_limit == 0 {
            return Err(ConfigError::Invalid(
                "transactions.gas_limit must be greater than zero".to_string(),
            ));
        }
        if self.tracking.poll_factor == 0 {
            return Err(ConfigError::Invalid(
                "tracking.poll_factor must be at least 1".to_string(),
            ));
        }
        if self.tracking.poll_initial_ms == 0
            || self.tracking.poll_initial_ms > self.tracking.poll_max_ms
        {
            return Err(ConfigError::Invalid(format!(
                "tracking.poll_initial_ms must be in 1..={}",
                self.tracking.poll_max_ms
            )));
        }
        let gateway = self.network.gateway_url();
        if !(gateway.starts_with("http://") || gateway.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "network.gateway_url must be an http(s) URL, got {gateway}"
            )));
        }
        if self.network.chain_id().is_empty() {
            return Err(ConfigError::Invalid(
                "network.chain_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved data directory
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.general.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("ballot"))
                .unwrap_or_else(|| PathBuf::from(".ballot"))
        })
    }

    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.sessions
            .store_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("sessions.json"))
    }

    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.sessions
            .registry_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("registry.json"))
    }

    /// Logging configuration derived from `[general]`
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.general.log_level.clone(),
            format: self.general.log_format,
            file: self.general.log_file.clone(),
        }
    }
}
