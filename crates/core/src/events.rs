use serde::{Deserialize, Serialize};

/// Where a chat session is in its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No request in flight.
    Idle,
    /// Request issued, no response body yet.
    Sending,
    /// Response body is being consumed into the assistant message.
    Streaming,
}

/// How one streamed exchange with the chat endpoint ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    /// End of stream reached.
    Completed { chunks: usize, bytes: usize },
    /// Aborted by the caller. Partial content is kept.
    Cancelled,
    /// Transport or response failure. An error notice was appended.
    Failed { reason: String },
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed { .. })
    }
}
