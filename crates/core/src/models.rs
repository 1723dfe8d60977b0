use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::SessionPhase;

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Distinguishes regular turns from the fixed error notice shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Normal,
    Error,
}

/// Opaque message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single entry in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    /// Creation time, assigned once.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), MessageKind::Normal)
    }

    /// An empty assistant reply, ready to receive streamed text.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), MessageKind::Normal)
    }

    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), MessageKind::Error)
    }

    fn new(role: Role, content: String, kind: MessageKind) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}

/// The wire shape of one turn sent to the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Request body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
}

/// An ordered, append-only list of messages with at most one message that is
/// still receiving streamed text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
    streaming: Option<MessageId>,
    awaiting_response: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn streaming_id(&self) -> Option<&MessageId> {
        self.streaming.as_ref()
    }

    pub fn awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    pub fn set_awaiting_response(&mut self, awaiting: bool) {
        self.awaiting_response = awaiting;
    }

    pub fn phase(&self) -> SessionPhase {
        match (self.awaiting_response, self.streaming.is_some()) {
            (_, true) => SessionPhase::Streaming,
            (true, false) => SessionPhase::Sending,
            (false, false) => SessionPhase::Idle,
        }
    }

    /// Append a finished message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append a message and mark it as the one receiving streamed text.
    /// Any previously streaming message is frozen.
    pub fn begin_streaming(&mut self, message: Message) -> MessageId {
        let id = message.id.clone();
        self.messages.push(message);
        self.streaming = Some(id.clone());
        id
    }

    /// Append text to the streaming message with the given id.
    ///
    /// Returns `false` (and changes nothing) when `id` is not the message
    /// currently streaming.
    pub fn append_to(&mut self, id: &MessageId, text: &str) -> bool {
        if self.streaming.as_ref() != Some(id) {
            return false;
        }
        match self.messages.iter_mut().rev().find(|m| &m.id == id) {
            Some(message) => {
                message.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Freeze the streaming message if it is `id`.
    pub fn finish_streaming(&mut self, id: &MessageId) {
        if self.streaming.as_ref() == Some(id) {
            self.streaming = None;
        }
    }

    /// History to send upstream. Error notices are not part of it.
    pub fn turns(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .filter(|m| !m.is_error())
            .map(|m| ChatTurn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// Normalized ticker. Fields the provider does not report stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerData {
    pub symbol: String,
    pub last: Option<Decimal>,
    /// Percentage change over the provider's window (24h for Binance).
    pub change: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    /// Base-asset volume.
    pub volume: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A `[price, amount]` level as reported by the provider.
pub type PriceLevel = [Decimal; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookData {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

/// One candle: `[timestamp, open, high, low, close, volume]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv(
    pub DateTime<Utc>,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
);

impl Ohlcv {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn close(&self) -> Decimal {
        self.4
    }
}

/// Raw ticker as a provider returns it, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTicker {
    pub symbol: Option<String>,
    pub last: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub base_volume: Option<Decimal>,
    pub quote_volume: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Raw order book as a provider returns it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOrderBook {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// The kind of query carried by a market-data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketDataKind {
    Ticker,
    Orderbook,
    Ohlcv,
}

pub const DEFAULT_EXCHANGE: &str = "binance";
pub const DEFAULT_ORDER_BOOK_LIMIT: u32 = 20;
pub const DEFAULT_OHLCV_LIMIT: u32 = 100;
pub const DEFAULT_TIMEFRAME: &str = "1h";

/// Request body of `POST /api/market-data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataRequest {
    #[serde(rename = "type")]
    pub kind: MarketDataKind,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    /// Start of the candle range in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
}

impl MarketDataRequest {
    pub fn new(kind: MarketDataKind, symbol: impl Into<String>) -> Self {
        Self {
            kind,
            symbol: symbol.into(),
            exchange: None,
            limit: None,
            timeframe: None,
            since: None,
        }
    }

    pub fn exchange(&self) -> &str {
        self.exchange.as_deref().unwrap_or(DEFAULT_EXCHANGE)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_ORDER_BOOK_LIMIT)
    }

    pub fn timeframe(&self) -> &str {
        self.timeframe.as_deref().unwrap_or(DEFAULT_TIMEFRAME)
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since.and_then(DateTime::from_timestamp_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_append_only_touches_streaming_message() {
        let mut conv = Conversation::new();
        conv.push(Message::user("hi"));
        let id = conv.begin_streaming(Message::assistant_placeholder());

        assert!(conv.append_to(&id, "hel"));
        assert!(conv.append_to(&id, "lo"));
        assert_eq!(conv.messages()[0].content, "hi");
        assert_eq!(conv.get(&id).map(|m| m.content.as_str()), Some("hello"));
    }

    #[test]
    fn test_frozen_message_rejects_appends() {
        let mut conv = Conversation::new();
        let id = conv.begin_streaming(Message::assistant_placeholder());
        conv.append_to(&id, "done");
        conv.finish_streaming(&id);

        assert!(!conv.append_to(&id, " more"));
        assert_eq!(conv.last().map(|m| m.content.as_str()), Some("done"));
        assert!(conv.streaming_id().is_none());
    }

    #[test]
    fn test_phase_transitions() {
        let mut conv = Conversation::new();
        assert_eq!(conv.phase(), SessionPhase::Idle);
        conv.set_awaiting_response(true);
        assert_eq!(conv.phase(), SessionPhase::Sending);
        let id = conv.begin_streaming(Message::assistant_placeholder());
        assert_eq!(conv.phase(), SessionPhase::Streaming);
        conv.finish_streaming(&id);
        conv.set_awaiting_response(false);
        assert_eq!(conv.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_turns_skip_error_notices() {
        let mut conv = Conversation::new();
        conv.push(Message::user("q"));
        conv.push(Message::assistant_error("oops"));
        let turns = conv.turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
    }

    #[test]
    fn test_market_request_defaults() {
        let req: MarketDataRequest =
            serde_json::from_str(r#"{"type":"orderbook","symbol":"BTC/USDT"}"#).unwrap();
        assert_eq!(req.kind, MarketDataKind::Orderbook);
        assert_eq!(req.exchange(), "binance");
        assert_eq!(req.limit(), 20);
        assert_eq!(req.timeframe(), "1h");
        assert!(req.since().is_none());
    }

    #[test]
    fn test_ohlcv_serializes_as_array() {
        let ts = DateTime::from_timestamp_millis(0).unwrap();
        let candle = Ohlcv(ts, dec!(1), dec!(2), dec!(0.5), dec!(1.5), dec!(10));
        let value = serde_json::to_value(&candle).unwrap();
        assert_eq!(value.as_array().map(|a| a.len()), Some(6));
    }
}
