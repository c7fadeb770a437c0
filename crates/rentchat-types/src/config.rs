//! Configuration types for rentchat.
//!
//! `ChatConfig` represents the top-level `config.toml` that controls the
//! local identity, the gateway endpoints, and session sync tuning.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.rentchat/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Display label identifying the local user inside a chat topic.
    #[serde(default = "default_identity")]
    pub identity: String,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_identity() -> String {
    "owner".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            gateway: GatewayConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Where the reservation backend and the pub/sub server live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_ntfy_base_url")]
    pub ntfy_base_url: String,

    /// Bearer token for the reservation API. Never logged.
    #[serde(default, skip_serializing)]
    pub api_token: Option<String>,
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_ntfy_base_url() -> String {
    "https://ntfy.sh".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ntfy_base_url: default_ntfy_base_url(),
            api_token: None,
        }
    }
}

/// Session synchronization tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on each gateway fetch, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Capacity of the engine event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_event_capacity() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            reconnect: ReconnectConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Live subscription reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive failed attempts before the subscription gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles per attempt, capped at 30 seconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}
