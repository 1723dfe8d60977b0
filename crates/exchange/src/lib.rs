//! Rate-limited exchange gateway.
//!
//! Market-data queries go through an [`ExchangeGateway`], which admits every
//! outbound call through one shared [`RateGate`] and normalizes provider
//! payloads. Initial provider: Binance spot REST.

pub mod binance;
pub mod gate;
pub mod gateway;
pub mod registry;

pub use binance::BinanceProvider;
pub use gate::RateGate;
pub use gateway::{ExchangeError, ExchangeGateway};
pub use registry::{BinanceGateway, ExchangeConfig, ExchangeId, GatewayRegistry};
