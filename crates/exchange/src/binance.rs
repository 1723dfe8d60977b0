use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cryptocoach_core::*;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Default public REST endpoint.
pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// Binance spot market-data provider over the public REST API.
#[derive(Debug)]
pub struct BinanceProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BinanceProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "Binance request");

        let mut request = self.http.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

/// `BTC/USDT` → `BTCUSDT`. Exchange-native symbols pass through upper-cased.
pub fn market_id(symbol: &str) -> Result<String, ProviderError> {
    let id: String = symbol
        .chars()
        .filter(|c| *c != '/')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ProviderError::BadSymbol(symbol.to_string()));
    }
    Ok(id)
}

#[derive(Debug, Deserialize)]
struct BinanceErrorBody {
    code: i64,
    msg: String,
}

fn classify_error(status: u16, body: String) -> ProviderError {
    match serde_json::from_str::<BinanceErrorBody>(&body) {
        // -1121: Invalid symbol.
        Ok(err) if err.code == -1121 => ProviderError::BadSymbol(err.msg),
        _ => ProviderError::Status { status, body },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    last_price: Option<Decimal>,
    price_change_percent: Option<Decimal>,
    high_price: Option<Decimal>,
    low_price: Option<Decimal>,
    volume: Option<Decimal>,
    quote_volume: Option<Decimal>,
    close_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Depth {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Ohlcv, ProviderError> {
    if row.len() < 6 {
        return Err(ProviderError::Parse(format!(
            "kline has {} fields, expected at least 6",
            row.len()
        )));
    }
    let open_time = row[0]
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| ProviderError::Parse(format!("bad kline open time: {}", row[0])))?;

    let field = |i: usize| -> Result<Decimal, ProviderError> {
        let value = &row[i];
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Decimal::from_str(&text)
            .map_err(|e| ProviderError::Parse(format!("bad kline field {i} ({value}): {e}")))
    };

    Ok(Ohlcv(open_time, field(1)?, field(2)?, field(3)?, field(4)?, field(5)?))
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    fn id(&self) -> &str {
        "binance"
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<RawTicker, ProviderError> {
        let id = market_id(symbol)?;
        let t: Ticker24h = self.get("/api/v3/ticker/24hr", &[("symbol", id)]).await?;
        Ok(RawTicker {
            symbol: Some(symbol.to_string()),
            last: t.last_price,
            percentage: t.price_change_percent,
            high: t.high_price,
            low: t.low_price,
            base_volume: t.volume,
            quote_volume: t.quote_volume,
            timestamp: t.close_time.and_then(DateTime::from_timestamp_millis),
        })
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<RawOrderBook, ProviderError> {
        let id = market_id(symbol)?;
        let depth: Depth = self
            .get("/api/v3/depth", &[("symbol", id), ("limit", limit.to_string())])
            .await?;
        // The depth endpoint carries an update id, not a timestamp.
        Ok(RawOrderBook {
            bids: depth.bids,
            asks: depth.asks,
            timestamp: None,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Ohlcv>, ProviderError> {
        let id = market_id(symbol)?;
        let mut query = vec![
            ("symbol", id),
            ("interval", timeframe.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            query.push(("startTime", since.timestamp_millis().to_string()));
        }
        let rows: Vec<Vec<serde_json::Value>> = self.get("/api/v3/klines", &query).await?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn test_market_id() {
        assert_eq!(market_id("BTC/USDT").unwrap(), "BTCUSDT");
        assert_eq!(market_id("eth/btc").unwrap(), "ETHBTC");
        assert!(matches!(market_id("BTC-USDT"), Err(ProviderError::BadSymbol(_))));
        assert!(matches!(market_id(""), Err(ProviderError::BadSymbol(_))));
    }

    #[test]
    fn test_parse_kline() {
        let row: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1700000000000,"35000.1","35100.0","34900.5","35050.2","12.5",1700003599999,"0",10,"0","0","0"]"#,
        )
        .unwrap();
        let candle = parse_kline(&row).unwrap();
        assert_eq!(candle.0.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(candle.1, dec!(35000.1));
        assert_eq!(candle.close(), dec!(35050.2));
        assert_eq!(candle.5, dec!(12.5));
    }

    #[test]
    fn test_parse_short_kline_fails() {
        let row = vec![serde_json::json!(1700000000000i64)];
        assert!(matches!(parse_kline(&row), Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_invalid_symbol_error_is_classified() {
        let err = classify_error(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#.to_string());
        assert!(matches!(err, ProviderError::BadSymbol(m) if m == "Invalid symbol."));
        let err = classify_error(503, "down".to_string());
        assert!(matches!(err, ProviderError::Status { status: 503, .. }));
    }

    async fn spawn_fake_binance() -> String {
        async fn ticker(Query(q): Query<HashMap<String, String>>) -> (StatusCode, Json<serde_json::Value>) {
            if q.get("symbol").map(String::as_str) != Some("BTCUSDT") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"code": -1121, "msg": "Invalid symbol."})),
                );
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "symbol": "BTCUSDT",
                    "priceChangePercent": "2.50",
                    "lastPrice": "65000.00",
                    "highPrice": "66000.00",
                    "lowPrice": "64000.00",
                    "volume": "1500.5",
                    "quoteVolume": "97500000.0",
                    "closeTime": 1700000000000i64
                })),
            )
        }

        async fn depth() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "lastUpdateId": 1,
                "bids": [["64999.0", "1.5"]],
                "asks": [["65001.0", "0.7"]]
            }))
        }

        let app = Router::new()
            .route("/api/v3/ticker/24hr", get(ticker))
            .route("/api/v3/depth", get(depth));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_ticker_and_depth_from_rest() {
        let base = spawn_fake_binance().await;
        let provider = BinanceProvider::new(base, None, Duration::from_secs(5)).unwrap();

        let ticker = provider.fetch_ticker("BTC/USDT").await.unwrap();
        assert_eq!(ticker.symbol.as_deref(), Some("BTC/USDT"));
        assert_eq!(ticker.last, Some(dec!(65000.00)));
        assert_eq!(ticker.percentage, Some(dec!(2.50)));
        assert_eq!(ticker.base_volume, Some(dec!(1500.5)));
        assert!(ticker.timestamp.is_some());

        let book = provider.fetch_order_book("BTC/USDT", 5).await.unwrap();
        assert_eq!(book.bids, vec![[dec!(64999.0), dec!(1.5)]]);
        assert!(book.timestamp.is_none());

        let err = provider.fetch_ticker("DOGE/XYZ").await.unwrap_err();
        assert!(matches!(err, ProviderError::BadSymbol(_)));
    }
}
