use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use crate::binance::{BinanceProvider, BINANCE_API_URL};
use crate::gate::RateGate;
use crate::gateway::{ExchangeError, ExchangeGateway};

/// Exchanges a [`GatewayRegistry`] can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
}

impl ExchangeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
        }
    }
}

impl FromStr for ExchangeId {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(ExchangeId::Binance),
            _ => Err(ExchangeError::UnsupportedExchange(s.to_string())),
        }
    }
}

/// Connection and pacing settings for exchange access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// REST base URL of the exchange.
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Minimum spacing between two outbound calls, in milliseconds.
    pub min_spacing_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_API_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
            min_spacing_ms: 1000,
        }
    }
}

pub type BinanceGateway = ExchangeGateway<BinanceProvider>;

/// Owns the lazily constructed gateway for each supported exchange.
///
/// The first [`GatewayRegistry::get`] for an exchange builds its gateway;
/// later calls share that instance (and its rate gate).
pub struct GatewayRegistry {
    config: ExchangeConfig,
    binance: OnceCell<Arc<BinanceGateway>>,
}

impl GatewayRegistry {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            config,
            binance: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Resolve a gateway by exchange identifier.
    ///
    /// Unsupported identifiers are rejected before anything is constructed.
    pub async fn get(&self, exchange: &str) -> Result<Arc<BinanceGateway>, ExchangeError> {
        match exchange.parse::<ExchangeId>()? {
            ExchangeId::Binance => {
                self.binance
                    .get_or_try_init(|| async { self.build_binance().map(Arc::new) })
                    .await
                    .cloned()
            }
        }
    }

    fn build_binance(&self) -> Result<BinanceGateway, ExchangeError> {
        let provider = BinanceProvider::new(
            self.config.base_url.clone(),
            self.config.api_key.clone(),
            Duration::from_secs(self.config.timeout_secs),
        )
        .map_err(|e| ExchangeError::Initialization(e.to_string()))?;
        info!(
            exchange = ExchangeId::Binance.as_str(),
            base_url = %self.config.base_url,
            min_spacing_ms = self.config.min_spacing_ms,
            "Exchange gateway initialized"
        );
        Ok(ExchangeGateway::new(
            provider,
            RateGate::new(Duration::from_millis(self.config.min_spacing_ms)),
        ))
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new(ExchangeConfig::default())
    }
}
