use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default spacing between two outbound exchange calls.
pub const DEFAULT_MIN_SPACING: Duration = Duration::from_millis(1000);

/// Minimum-spacing admission gate.
///
/// Every caller goes through [`RateGate::admit`] before an outbound call.
/// The lock is held across the wait, so concurrent callers are admitted one
/// at a time, each at least `min_spacing` after the previous one. There is
/// no burst allowance.
#[derive(Debug)]
pub struct RateGate {
    min_spacing: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Wait until the spacing since the previous admission has passed, then
    /// record this admission.
    pub async fn admit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                let wait = self.min_spacing - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Rate gate holding request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SPACING)
    }
}
