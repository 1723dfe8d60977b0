//! Server configuration.

use cryptocoach_exchange::ExchangeConfig;
use serde::Deserialize;

use crate::upstream::ChatUpstreamConfig;

/// Root configuration for the API server. Every section is optional in the
/// TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub chat: ChatUpstreamConfig,
    pub exchange: ExchangeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            chat: ChatUpstreamConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialize() {
        let toml = r#"
            bind = "127.0.0.1:8080"

            [chat]
            base_url = "https://api.deepseek.com/v1"
            model = "deepseek-chat"

            [exchange]
            min_spacing_ms = 500
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.chat.model, "deepseek-chat");
        assert!(config.chat.api_key.is_none());
        assert!(config.chat.system_prompt.contains("CryptoCoach"));
        assert_eq!(config.exchange.min_spacing_ms, 500);
        assert_eq!(config.exchange.timeout_secs, 30);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.bind, "0.0.0.0:3000");
        assert_eq!(config.chat.model, "gpt-4");
        assert_eq!(config.exchange.min_spacing_ms, 1000);
    }
}
