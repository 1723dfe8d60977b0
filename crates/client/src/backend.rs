use async_trait::async_trait;
use cryptocoach_core::format::api_url;
use cryptocoach_core::*;
use futures_util::StreamExt;
use reqwest::StatusCode;
use tracing::debug;

/// Path of the chat endpoint on the API server.
pub const CHAT_PATH: &str = "/api/chat";

/// Chat backend that POSTs the history to `/api/chat` and streams the raw
/// response body.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    http: reqwest::Client,
    url: String,
}

impl HttpChatBackend {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: api_url(base_url, CHAT_PATH),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn open_stream(&self, turns: Vec<ChatTurn>) -> Result<ByteStream, ChatError> {
        debug!(url = %self.url, turns = turns.len(), "Opening chat stream");
        let response = self
            .http
            .post(&self.url)
            .json(&ChatRequest { messages: turns })
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Transport {
                status: status.as_u16(),
                body,
            });
        }
        if matches!(status, StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT) {
            return Err(ChatError::MalformedResponse);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ChatError::Network(e.to_string()))
            })
            .boxed();
        Ok(stream)
    }
}
