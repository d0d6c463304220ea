//! Configuration management for the bridge
//!
//! Loads configuration from config.toml at startup.
//! All timing constants of the session and market-data machinery are
//! configurable; defaults match the exchange's documented behavior.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bridge configuration
///
/// Loaded from config.toml (or `CONFIG_PATH`) at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// FIX session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Depth subscription settings
    #[serde(default)]
    pub market_data: MarketDataConfig,

    /// Security-definition cache settings
    #[serde(default)]
    pub reference_data: ReferenceDataConfig,

    /// Internal bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Control API settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// FIX session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Gateway host
    #[serde(default = "default_host")]
    pub host: String,

    /// Gateway port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Wrap the socket in TLS
    #[serde(default = "default_tls")]
    pub tls: bool,

    /// TLS server name if different from `host`
    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default)]
    pub sender_comp_id: String,

    #[serde(default)]
    pub target_comp_id: String,

    /// SecureData(91) sent in every header; omitted when empty
    #[serde(default)]
    pub secure_data: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// BeginString(8) as the gateway expects it
    #[serde(default = "default_begin_string")]
    pub begin_string: String,

    /// HeartBtInt(108) and keepalive period in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_logon_timeout")]
    pub logon_timeout_secs: u64,
}

/// Depth subscription configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketDataConfig {
    /// Idle window after the last snapshot fragment before assembly
    #[serde(default = "default_snapshot_idle_ms")]
    pub snapshot_idle_ms: u64,

    /// Wait between unsubscribe and resubscribe of an assembled instrument
    #[serde(default = "default_resubscribe_settle_ms")]
    pub resubscribe_settle_ms: u64,

    /// How long a subscribe waits for a reject or first snapshot
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    /// Depth used when a request asks for 0 (full book)
    #[serde(default = "default_depth")]
    pub default_depth: u32,

    /// MDUpdateType(265) sent with subscriptions
    #[serde(default = "default_md_update_type")]
    pub md_update_type: u32,

    /// Outbound event channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Security-definition cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReferenceDataConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Response wait for one definition query; 0 waits indefinitely
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,

    /// Persist the cache as JSON at this path
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

/// Internal bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// Per-topic backlog before a slow receiver lags
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Port for HTTP API server
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Module name reported by the status endpoint
    #[serde(default = "default_module_name")]
    pub module_name: String,

    /// Endpoint name reported by the status endpoint
    #[serde(default = "default_endpoint_name")]
    pub endpoint_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: default_tls(),
            server_name: None,
            sender_comp_id: String::new(),
            target_comp_id: String::new(),
            secure_data: String::new(),
            username: String::new(),
            password: String::new(),
            begin_string: default_begin_string(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            connect_timeout_secs: default_connect_timeout(),
            logon_timeout_secs: default_logon_timeout(),
        }
    }
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            snapshot_idle_ms: default_snapshot_idle_ms(),
            resubscribe_settle_ms: default_resubscribe_settle_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            default_depth: default_depth(),
            md_update_type: default_md_update_type(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for ReferenceDataConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            response_timeout_secs: default_response_timeout(),
            cache_path: None,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            module_name: default_module_name(),
            endpoint_name: default_endpoint_name(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9443
}

fn default_tls() -> bool {
    true
}

fn default_begin_string() -> String {
    "FIX 4.2".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_logon_timeout() -> u64 {
    30
}

fn default_snapshot_idle_ms() -> u64 {
    100
}

fn default_resubscribe_settle_ms() -> u64 {
    5_000
}

fn default_confirmation_timeout_ms() -> u64 {
    10_000
}

fn default_depth() -> u32 {
    10
}

fn default_md_update_type() -> u32 {
    8
}

fn default_event_capacity() -> usize {
    16_384
}

fn default_cache_ttl() -> u64 {
    86_400 // 24h
}

fn default_response_timeout() -> u64 {
    60
}

fn default_bus_capacity() -> usize {
    65_536
}

fn default_api_port() -> u16 {
    5000
}

fn default_module_name() -> String {
    "cts-fix-md".to_string()
}

fn default_endpoint_name() -> String {
    "cts".to_string()
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Reject settings the session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.sender_comp_id.is_empty() || self.session.target_comp_id.is_empty() {
            return Err(ConfigError::Invalid("sender_comp_id and target_comp_id are required".into()));
        }
        if self.session.port == 0 {
            return Err(ConfigError::Invalid("session.port must be non-zero".into()));
        }
        if self.session.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_secs must be non-zero".into()));
        }
        Ok(())
    }
}

impl SessionConfig {
    #[inline]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[inline]
    pub fn logon_timeout(&self) -> Duration {
        Duration::from_secs(self.logon_timeout_secs)
    }
}

impl MarketDataConfig {
    #[inline]
    pub fn snapshot_idle(&self) -> Duration {
        Duration::from_millis(self.snapshot_idle_ms)
    }

    #[inline]
    pub fn resubscribe_settle(&self) -> Duration {
        Duration::from_millis(self.resubscribe_settle_ms)
    }

    #[inline]
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}

impl ReferenceDataConfig {
    #[inline]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// `None` when the wait is unbounded
    #[inline]
    pub fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_secs > 0).then(|| Duration::from_secs(self.response_timeout_secs))
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading file
    IoError(std::io::Error),
    /// Parse error (invalid TOML)
    ParseError(String),
    /// Parsed but unusable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(_) | ConfigError::Invalid(_) => None,
        }
    }
}
