//! Client side of CryptoCoach.
//!
//! [`ChatSession`] owns a conversation and streams assistant replies from the
//! chat endpoint into it; [`MarketDataClient`] queries the market-data route.

pub mod backend;
pub mod decoder;
pub mod market;
pub mod session;

pub use backend::HttpChatBackend;
pub use decoder::Utf8StreamDecoder;
pub use market::{MarketClientError, MarketDataClient};
pub use session::{ChatSession, ERROR_NOTICE};
