//! Anthropic Claude backend.
//!
//! Anthropic's messages API differs from the OpenAI shape: the system
//! prompt travels as a top-level field, only user/assistant turns appear in
//! `messages`, and `max_tokens` is mandatory.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Provider;
use crate::llm::{merge_extra, ChatError, ChatStream, Message, SseLines};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

/// Client for the Anthropic messages API.
pub struct AnthropicClient {
    pub model: String,
    api_key: String,
    max_tokens: u32,
    client: Client,
}

impl AnthropicClient {
    /// Create a new Anthropic client.
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            model,
            api_key,
            max_tokens,
            client,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", Provider::Anthropic.base_url())
    }

    fn request_body(
        &self,
        conversation: &[Message],
        stream: bool,
        extra: &Map<String, Value>,
    ) -> Result<Value, ChatError> {
        let (system, messages) = convert(conversation);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages,
            stream,
        };
        let mut body = serde_json::to_value(request).map_err(|e| ChatError::Wire(e.to_string()))?;
        merge_extra(&mut body, extra);
        Ok(body)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ChatError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::Network {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiError>().await {
                Ok(body) => body.error.message,
                Err(_) => "Unknown error".to_string(),
            };
            return Err(ChatError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Send a conversation and wait for the complete assistant reply.
    pub async fn send(
        &self,
        conversation: &[Message],
        extra: &Map<String, Value>,
    ) -> Result<Message, ChatError> {
        let body = self.request_body(conversation, false, extra)?;
        let response = self.post(&body).await?;

        let reply: MessagesResponse = response.json().await.map_err(|e| {
            ChatError::Wire(format!("failed to parse Anthropic response: {e}"))
        })?;

        let text: String = reply
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect();
        if text.is_empty() {
            return Err(ChatError::Wire("empty response content".to_string()));
        }
        Ok(Message::assistant(text))
    }

    /// Send a conversation and stream the reply as text fragments.
    pub async fn stream(
        &self,
        conversation: &[Message],
        extra: &Map<String, Value>,
    ) -> Result<ChatStream, ChatError> {
        let body = self.request_body(conversation, true, extra)?;
        let response = self.post(&body).await?;

        let mut decoder = EventDecoder::new();
        let stream = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.feed(&bytes),
                Err(e) => vec![Err(ChatError::Network {
                    provider: PROVIDER,
                    message: e.to_string(),
                })],
            })
            .map(futures::stream::iter)
            .flatten();

        Ok(Box::pin(stream))
    }
}

/// Decodes SSE body chunks into text fragments.
struct EventDecoder {
    lines: SseLines,
}

impl EventDecoder {
    fn new() -> Self {
        Self {
            lines: SseLines::new(),
        }
    }

    /// Feed one network chunk, returning the fragments it completes.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String, ChatError>> {
        self.lines
            .feed(bytes)
            .iter()
            .filter_map(|payload| match event_text(payload) {
                Ok(Some(text)) => Some(Ok(text)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }
}

/// Split a conversation into Anthropic's top-level system string and turns.
///
/// Tool messages and tool-call-only assistant turns have no representation
/// in this request format and are skipped. Multiple system turns are
/// concatenated with a blank line.
fn convert(conversation: &[Message]) -> (Option<String>, Vec<Turn>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns = Vec::new();
    for message in conversation {
        match message {
            Message::System { content } => system_parts.push(content),
            Message::User { content } => turns.push(Turn {
                role: "user",
                content: content.clone(),
            }),
            Message::Assistant {
                content: Some(content),
                ..
            } => turns.push(Turn {
                role: "assistant",
                content: content.clone(),
            }),
            Message::Assistant { content: None, .. } | Message::Tool { .. } => {}
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, turns)
}

/// Extract the text delta from one SSE payload.
///
/// Well-formed events without text (message bookkeeping, empty deltas)
/// yield `Ok(None)`; a payload that fails to parse is a wire error.
fn event_text(payload: &str) -> Result<Option<String>, ChatError> {
    let event: StreamEvent = serde_json::from_str(payload)
        .map_err(|e| ChatError::Wire(format!("unparseable stream payload: {e}")))?;
    if event.kind != "content_block_delta" {
        return Ok(None);
    }
    Ok(match event.delta.and_then(|d| d.text) {
        Some(text) if !text.is_empty() => Some(text),
        _ => None,
    })
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn>,
    stream: bool,
}

#[derive(Serialize)]
struct Turn {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<DeltaBlock>,
}

#[derive(Deserialize)]
struct DeltaBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}
