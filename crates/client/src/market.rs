use cryptocoach_core::format::api_url;
use cryptocoach_core::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::error;

pub const MARKET_DATA_PATH: &str = "/api/market-data";

/// Errors returned by [`MarketDataClient`].
#[derive(Debug, thiserror::Error)]
pub enum MarketClientError {
    /// The server answered with an error payload.
    #[error("{0}")]
    Server(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    details: Option<String>,
}

/// Client for the server's `POST /api/market-data` route.
#[derive(Debug, Clone)]
pub struct MarketDataClient {
    http: reqwest::Client,
    url: String,
    exchange: Option<String>,
}

impl MarketDataClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: api_url(base_url, MARKET_DATA_PATH),
            exchange: None,
        }
    }

    /// Query a specific exchange instead of the server default.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub async fn ticker(&self, symbol: &str) -> Result<TickerData, MarketClientError> {
        self.fetch(self.request(MarketDataKind::Ticker, symbol)).await
    }

    pub async fn order_book(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<OrderBookData, MarketClientError> {
        let mut req = self.request(MarketDataKind::Orderbook, symbol);
        req.limit = Some(limit);
        self.fetch(req).await
    }

    pub async fn ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
        since: Option<i64>,
    ) -> Result<Vec<Ohlcv>, MarketClientError> {
        let mut req = self.request(MarketDataKind::Ohlcv, symbol);
        req.timeframe = Some(timeframe.to_string());
        req.limit = Some(limit);
        req.since = since;
        self.fetch(req).await
    }

    fn request(&self, kind: MarketDataKind, symbol: &str) -> MarketDataRequest {
        let mut req = MarketDataRequest::new(kind, symbol.to_uppercase());
        req.exchange = self.exchange.clone();
        req
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        req: MarketDataRequest,
    ) -> Result<T, MarketClientError> {
        let result = self.try_fetch(&req).await;
        if let Err(err) = &result {
            error!(symbol = %req.symbol, kind = ?req.kind, error = %err, "Market data fetch error");
        }
        result
    }

    async fn try_fetch<T: DeserializeOwned>(
        &self,
        req: &MarketDataRequest,
    ) -> Result<T, MarketClientError> {
        let response = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| MarketClientError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| match (body.error, body.details) {
                    (Some(error), Some(details)) => Some(format!("{error}: {details}")),
                    (error, _) => error,
                })
                .unwrap_or_else(|| "Failed to fetch market data".to_string());
            return Err(MarketClientError::Server(message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MarketClientError::Decode(e.to_string()))
    }
}
