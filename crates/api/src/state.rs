use cryptocoach_exchange::GatewayRegistry;
use std::sync::Arc;

use crate::upstream::CompletionSource;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub completions: Arc<dyn CompletionSource>,
    /// Exchange gateways, built on first use.
    pub gateways: GatewayRegistry,
}

impl AppState {
    pub fn new(completions: Arc<dyn CompletionSource>, gateways: GatewayRegistry) -> Self {
        Self {
            completions,
            gateways,
        }
    }
}
