use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default = "default_run_mode")]
    pub run_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Per-attempt send timeout in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
    /// Total attempts per send (first attempt + retries)
    #[serde(default = "default_max_attempts")]
    pub max_send_attempts: u32,
    /// Initial retry backoff in milliseconds
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Delay before the extra critical-event retry in pre-production
    #[serde(default = "default_critical_retry_delay")]
    pub critical_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Maximum undelivered messages held per user
    #[serde(default = "default_max_pending")]
    pub max_pending_per_user: usize,
    /// Interval for the background flush task in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interval for the stale-connection sweep in seconds
    #[serde(default = "default_stale_check_interval")]
    pub stale_check_interval_seconds: u64,
    /// A supervised task is considered stalled after missing this many
    /// expected heartbeat intervals
    #[serde(default = "default_stale_factor")]
    pub heartbeat_stale_factor: u32,
}

fn default_run_mode() -> String {
    "development".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_send_timeout() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_initial() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_critical_retry_delay() -> u64 {
    500
}

fn default_max_pending() -> usize {
    50
}

fn default_flush_interval() -> u64 {
    10
}

fn default_stale_check_interval() -> u64 {
    30
}

fn default_stale_factor() -> u32 {
    2
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("run_mode", run_mode.clone())?
            .set_default("delivery.send_timeout_seconds", 5)?
            .set_default("delivery.max_send_attempts", 3)?
            .set_default("recovery.max_pending_per_user", 50)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, DELIVERY_SEND_TIMEOUT_SECONDS, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Pre-production mode relaxes nothing but adds an extra delivery retry
    /// for critical events.
    pub fn is_preproduction(&self) -> bool {
        self.run_mode == "preproduction" || self.run_mode == "staging"
    }
}

impl DeliveryConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_seconds)
    }

    pub fn critical_retry_delay(&self) -> Duration {
        Duration::from_millis(self.critical_retry_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_timeout_seconds: default_send_timeout(),
            max_send_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            critical_retry_delay_ms: default_critical_retry_delay(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_pending_per_user: default_max_pending(),
            flush_interval_seconds: default_flush_interval(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stale_check_interval_seconds: default_stale_check_interval(),
            heartbeat_stale_factor: default_stale_factor(),
        }
    }
}
