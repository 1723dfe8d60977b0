use chrono::{DateTime, Utc};
use cryptocoach_core::*;
use tracing::{error, info};

use crate::gate::RateGate;

/// Errors surfaced by the gateway. Provider error types never leak past it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("Unsupported exchange: {0}")]
    UnsupportedExchange(String),
    #[error("Failed to initialize exchange: {0}")]
    Initialization(String),
    #[error("Failed to {action}: {message}")]
    Request { action: String, message: String },
}

/// Rate-limited, normalizing front for a [`MarketDataProvider`].
#[derive(Debug)]
pub struct ExchangeGateway<P: MarketDataProvider> {
    provider: P,
    gate: RateGate,
}

impl<P: MarketDataProvider> ExchangeGateway<P> {
    pub fn new(provider: P, gate: RateGate) -> Self {
        Self { provider, gate }
    }

    pub fn exchange_id(&self) -> &str {
        self.provider.id()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<TickerData, ExchangeError> {
        self.gate.admit().await;
        let raw = self
            .provider
            .fetch_ticker(symbol)
            .await
            .map_err(|e| self.fail(format!("fetch ticker for {symbol}"), e))?;

        Ok(TickerData {
            symbol: raw.symbol.unwrap_or_else(|| symbol.to_string()),
            last: raw.last,
            change: raw.percentage,
            high: raw.high,
            low: raw.low,
            volume: raw.base_volume,
            timestamp: raw.timestamp,
        })
    }

    pub async fn get_order_book(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<OrderBookData, ExchangeError> {
        self.gate.admit().await;
        let raw = self
            .provider
            .fetch_order_book(symbol, limit)
            .await
            .map_err(|e| self.fail(format!("fetch order book for {symbol}"), e))?;

        Ok(OrderBookData {
            symbol: symbol.to_string(),
            bids: raw.bids,
            asks: raw.asks,
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
        })
    }

    pub async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Ohlcv>, ExchangeError> {
        self.gate.admit().await;
        let candles = self
            .provider
            .fetch_ohlcv(symbol, timeframe, since, limit)
            .await
            .map_err(|e| self.fail(format!("fetch OHLCV for {symbol}"), e))?;
        info!(
            exchange = self.provider.id(),
            symbol = %symbol,
            timeframe = %timeframe,
            candles = candles.len(),
            "Fetched OHLCV"
        );
        Ok(candles)
    }

    fn fail(&self, action: String, err: ProviderError) -> ExchangeError {
        let message = err.to_string();
        error!(exchange = self.provider.id(), action = %action, error = %message, "Exchange request failed");
        ExchangeError::Request { action, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Provider that records when each call reached it.
    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<Instant>>,
        ticker: RawTicker,
        book: RawOrderBook,
        fail: bool,
    }

    impl RecordingProvider {
        fn record(&self) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push(Instant::now());
            if self.fail {
                Err(ProviderError::BadSymbol("NOPE/USDT".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl MarketDataProvider for RecordingProvider {
        fn id(&self) -> &str {
            "recording"
        }

        async fn fetch_ticker(&self, _symbol: &str) -> Result<RawTicker, ProviderError> {
            self.record()?;
            Ok(self.ticker.clone())
        }

        async fn fetch_order_book(
            &self,
            _symbol: &str,
            _limit: u32,
        ) -> Result<RawOrderBook, ProviderError> {
            self.record()?;
            Ok(self.book.clone())
        }

        async fn fetch_ohlcv(
            &self,
            _symbol: &str,
            _timeframe: &str,
            since: Option<DateTime<Utc>>,
            limit: u32,
        ) -> Result<Vec<Ohlcv>, ProviderError> {
            self.record()?;
            let ts = since.unwrap_or_else(Utc::now);
            Ok((0..limit)
                .map(|i| Ohlcv(ts, dec!(1), dec!(2), dec!(0.5), dec!(1.5), rust_decimal::Decimal::from(i)))
                .collect())
        }
    }

    fn gateway(provider: RecordingProvider, spacing_ms: u64) -> ExchangeGateway<RecordingProvider> {
        ExchangeGateway::new(provider, RateGate::new(Duration::from_millis(spacing_ms)))
    }

    #[tokio::test]
    async fn test_ticker_keeps_missing_fields_empty() {
        let provider = RecordingProvider {
            ticker: RawTicker {
                symbol: Some("BTC/USDT".to_string()),
                last: Some(dec!(65000)),
                percentage: Some(dec!(-1.2)),
                base_volume: Some(dec!(1234)),
                quote_volume: Some(dec!(80000000)),
                ..Default::default()
            },
            ..Default::default()
        };
        let gw = gateway(provider, 1);
        let ticker = gw.get_ticker("BTC/USDT").await.unwrap();

        assert_eq!(ticker.last, Some(dec!(65000)));
        assert_eq!(ticker.change, Some(dec!(-1.2)));
        // Volume is the base volume, not the quote volume.
        assert_eq!(ticker.volume, Some(dec!(1234)));
        assert!(ticker.high.is_none());
        assert!(ticker.low.is_none());
        assert!(ticker.timestamp.is_none());
    }

    #[tokio::test]
    async fn test_order_book_timestamp_falls_back_to_now() {
        let provider = RecordingProvider {
            book: RawOrderBook {
                bids: vec![[dec!(100), dec!(2)]],
                asks: vec![[dec!(101), dec!(3)]],
                timestamp: None,
            },
            ..Default::default()
        };
        let gw = gateway(provider, 1);
        let before = Utc::now();
        let book = gw.get_order_book("ETH/USDT", 5).await.unwrap();

        assert_eq!(book.symbol, "ETH/USDT");
        assert_eq!(book.bids, vec![[dec!(100), dec!(2)]]);
        assert_eq!(book.asks, vec![[dec!(101), dec!(3)]]);
        assert!(book.timestamp >= before);
    }

    #[tokio::test]
    async fn test_ohlcv_passthrough() {
        let gw = gateway(RecordingProvider::default(), 1);
        let since = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let candles = gw.get_ohlcv("BTC/USDT", "1h", Some(since), 3).await.unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].timestamp(), since);
    }

    #[tokio::test]
    async fn test_calls_share_one_gate() {
        let gw = gateway(RecordingProvider::default(), 150);
        gw.get_ticker("BTC/USDT").await.unwrap();
        gw.get_order_book("BTC/USDT", 10).await.unwrap();

        let calls = gw.provider().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].duration_since(calls[0]) >= Duration::from_millis(145));
    }

    #[tokio::test]
    async fn test_provider_error_is_normalized() {
        let provider = RecordingProvider {
            fail: true,
            ..Default::default()
        };
        let gw = gateway(provider, 1);
        let err = gw.get_ticker("NOPE/USDT").await.unwrap_err();

        match &err {
            ExchangeError::Request { action, .. } => {
                assert_eq!(action, "fetch ticker for NOPE/USDT")
            }
            other => panic!("Expected request error, got {other:?}"),
        }
        assert!(err.to_string().starts_with("Failed to fetch ticker for NOPE/USDT: "));
    }
}
