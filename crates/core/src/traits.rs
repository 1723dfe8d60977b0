use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;

// ---------------------------------------------------------------------------
// Chat Backend Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("HTTP error! status: {status}, {body}")]
    Transport { status: u16, body: String },
    #[error("No response body")]
    MalformedResponse,
    #[error("Network error: {0}")]
    Network(String),
}

/// Raw body chunks as they arrive. Boundaries carry no meaning.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChatError>>;

/// Something that accepts a conversation history and streams back the reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the history and return the response body once the status line
    /// has been validated.
    async fn open_stream(&self, turns: Vec<ChatTurn>) -> Result<ByteStream, ChatError>;
}

// ---------------------------------------------------------------------------
// Market Data Provider Trait
// ---------------------------------------------------------------------------

/// Errors raised by a market-data provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Http(String),
    #[error("Exchange returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Bad symbol: {0}")]
    BadSymbol(String),
}

/// A source of exchange market data.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Exchange identifier, used in log lines.
    fn id(&self) -> &str;

    async fn fetch_ticker(&self, symbol: &str) -> Result<RawTicker, ProviderError>;

    async fn fetch_order_book(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<RawOrderBook, ProviderError>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Ohlcv>, ProviderError>;
}
