use cryptocoach_core::*;
use futures_util::future::{AbortHandle, Abortable};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::decoder::Utf8StreamDecoder;

/// Text of the assistant message appended when a request fails.
pub const ERROR_NOTICE: &str = "Sorry, there was an error processing your message.";

struct InFlight {
    request: u64,
    abort: AbortHandle,
}

/// One chat screen: the input buffer, the conversation, and at most one
/// in-flight request to the chat backend.
///
/// Every change to the conversation is published to [`ChatSession::subscribe`]
/// receivers. Must be used from within a tokio runtime.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    state: Arc<watch::Sender<Conversation>>,
    input: String,
    in_flight: Option<InFlight>,
    /// Request that currently owns the `awaiting_response` flag.
    current: Arc<AtomicU64>,
    next_request: u64,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        let (state, _) = watch::channel(Conversation::new());
        Self {
            backend,
            state: Arc::new(state),
            input: String::new(),
            in_flight: None,
            current: Arc::new(AtomicU64::new(0)),
            next_request: 0,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Conversation {
        self.state.borrow().clone()
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.state.borrow().awaiting_response()
    }

    /// Submit the input buffer.
    ///
    /// Whitespace-only input is ignored and `None` is returned. Otherwise any
    /// in-flight request is cancelled, the user message is appended before
    /// this returns, and the reply streams in on a spawned task whose handle
    /// is returned.
    pub fn send(&mut self) -> Option<JoinHandle<StreamOutcome>> {
        if self.input.trim().is_empty() {
            return None;
        }
        self.cancel();

        self.next_request += 1;
        let request = self.next_request;
        self.current.store(request, Ordering::SeqCst);

        let content = std::mem::take(&mut self.input);
        let mut turns = Vec::new();
        self.state.send_modify(|conv| {
            conv.push(Message::user(content));
            conv.set_awaiting_response(true);
            turns = conv.turns();
        });

        let (abort, registration) = AbortHandle::new_pair();
        self.in_flight = Some(InFlight { request, abort });

        let backend = self.backend.clone();
        let state = self.state.clone();
        let current = self.current.clone();

        debug!(request, turns = turns.len(), "Sending chat request");
        Some(tokio::spawn(async move {
            let streaming = OnceLock::new();
            let run = stream_reply(backend.as_ref(), turns, &state, &streaming);

            let outcome = match Abortable::new(run, registration).await {
                Ok(Ok((chunks, bytes))) => {
                    info!(request, chunks, bytes, "Chat stream completed");
                    StreamOutcome::Completed { chunks, bytes }
                }
                Ok(Err(err)) => {
                    warn!(request, error = %err, "Chat request failed");
                    state.send_modify(|conv| conv.push(Message::assistant_error(ERROR_NOTICE)));
                    StreamOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
                Err(_aborted) => {
                    debug!(request, "Chat request cancelled");
                    StreamOutcome::Cancelled
                }
            };

            state.send_modify(|conv| {
                if let Some(id) = streaming.get() {
                    conv.finish_streaming(id);
                }
                if current.load(Ordering::SeqCst) == request {
                    conv.set_awaiting_response(false);
                }
            });
            outcome
        }))
    }

    /// Abort the in-flight request, if any. Returns whether one was aborted.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                debug!(request = in_flight.request, "Cancelling chat request");
                in_flight.abort.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Open the stream and fold its chunks into one new assistant message.
async fn stream_reply(
    backend: &dyn ChatBackend,
    turns: Vec<ChatTurn>,
    state: &watch::Sender<Conversation>,
    streaming: &OnceLock<MessageId>,
) -> Result<(usize, usize), ChatError> {
    let mut body = backend.open_stream(turns).await?;

    let placeholder = Message::assistant_placeholder();
    let id = placeholder.id.clone();
    state.send_modify(|conv| {
        conv.begin_streaming(placeholder);
    });
    let _ = streaming.set(id.clone());

    let mut decoder = Utf8StreamDecoder::new();
    let (mut chunks, mut bytes) = (0usize, 0usize);
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        chunks += 1;
        bytes += chunk.len();
        let text = decoder.decode(&chunk);
        if !text.is_empty() {
            state.send_modify(|conv| {
                conv.append_to(&id, &text);
            });
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        state.send_modify(|conv| {
            conv.append_to(&id, &tail);
        });
    }
    Ok((chunks, bytes))
}
