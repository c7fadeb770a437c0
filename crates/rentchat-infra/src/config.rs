//! Configuration loader for rentchat.
//!
//! Reads `config.toml` from the data directory and layers environment
//! overrides on top. A missing or malformed file falls back to defaults.

use std::path::Path;

use rentchat_types::config::ChatConfig;

/// Load configuration from `{data_dir}/config.toml`, then apply
/// `RENTCHAT_IDENTITY` and `RENTCHAT_API_TOKEN` if set.
pub async fn load_config(data_dir: &Path) -> ChatConfig {
    let config = read_config_file(data_dir).await;
    apply_overrides(
        config,
        std::env::var("RENTCHAT_IDENTITY").ok(),
        std::env::var("RENTCHAT_API_TOKEN").ok(),
    )
}

async fn read_config_file(data_dir: &Path) -> ChatConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ChatConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ChatConfig::default();
        }
    };

    match toml::from_str::<ChatConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            ChatConfig::default()
        }
    }
}

/// Blank override values are ignored.
pub fn apply_overrides(
    mut config: ChatConfig,
    identity: Option<String>,
    api_token: Option<String>,
) -> ChatConfig {
    if let Some(identity) = identity.filter(|v| !v.trim().is_empty()) {
        config.identity = identity;
    }
    if let Some(token) = api_token.filter(|v| !v.trim().is_empty()) {
        config.gateway.api_token = Some(token);
    }
    config
}
