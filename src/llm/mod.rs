//! LLM backend clients and the chat message model.
//!
//! This module provides a unified interface over the supported chat APIs:
//! OpenAI (plus OpenAI-compatible endpoints such as Perplexity) and
//! Anthropic, which uses an incompatible request format.

pub mod anthropic;
pub mod openai;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{Credentials, Provider};

/// Errors surfaced by the chat clients.
///
/// Provider failures are returned as values rather than folded into
/// synthetic messages; the CLI decides how to present them.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The conversation passed to a client was empty.
    #[error("conversation must not be empty")]
    EmptyConversation,
    /// Failed to reach the provider at the transport level.
    #[error("failed to reach {provider}: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },
    /// The provider returned a non-success HTTP status.
    #[error("{provider} API request failed with status {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },
    /// The provider sent data that does not match the expected wire format.
    #[error("malformed wire data: {0}")]
    Wire(String),
}

/// A single conversation turn.
///
/// Closed over the four chat roles; each variant carries only the fields
/// legal for its role. Values are immutable once constructed. Optional
/// fields that are absent are omitted from the wire form entirely, never
/// emitted as `null` (some providers reject null fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Text content of the turn, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content } | Message::User { content } => Some(content),
            Message::Assistant { content, .. } | Message::Tool { content, .. } => {
                content.as_deref()
            }
        }
    }

    /// Serialize to the provider wire dictionary.
    pub fn to_wire(&self) -> Result<Value, ChatError> {
        serde_json::to_value(self).map_err(|e| ChatError::Wire(e.to_string()))
    }

    /// Parse a provider wire dictionary, dispatching on its `role` field.
    pub fn from_wire(value: Value) -> Result<Self, ChatError> {
        match value.get("role").and_then(Value::as_str) {
            Some("system" | "user" | "assistant" | "tool") => {
                serde_json::from_value(value).map_err(|e| ChatError::Wire(e.to_string()))
            }
            Some(other) => Err(ChatError::Wire(format!("unrecognized role: {other}"))),
            None => Err(ChatError::Wire("message has no role field".to_string())),
        }
    }
}

/// A request from the assistant to invoke a named function.
///
/// Purely descriptive: nothing in this crate executes the call. On the
/// wire the arguments are a JSON-encoded string; in memory they are the
/// decoded map.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub call_type: String,
    pub function_name: String,
    pub function_args: Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

impl Serialize for ToolCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let arguments =
            serde_json::to_string(&self.function_args).map_err(serde::ser::Error::custom)?;
        WireToolCall {
            id: self.id.clone(),
            call_type: self.call_type.clone(),
            function: WireFunction {
                name: self.function_name.clone(),
                arguments,
            },
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ToolCall {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireToolCall::deserialize(deserializer)?;
        let function_args =
            serde_json::from_str(&wire.function.arguments).map_err(serde::de::Error::custom)?;
        Ok(ToolCall {
            id: wire.id,
            call_type: wire.call_type,
            function_name: wire.function.name,
            function_args,
        })
    }
}

/// A finite, non-restartable stream of response text fragments.
///
/// Transport errors surface as `Err` items; consumers stop at the first
/// one. Deltas without text content are never yielded.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Enum-based client for the supported providers.
/// Using an enum instead of trait objects keeps the call sites simple.
pub enum Client {
    OpenAi(openai::OpenAiClient),
    Anthropic(anthropic::AnthropicClient),
}

/// Create a client for the detected credentials.
///
/// The model is fixed here, once, for the lifetime of the client.
pub fn build_client(credentials: &Credentials, model: String, max_tokens: u32) -> Client {
    match credentials.provider {
        Provider::OpenAi | Provider::Perplexity => Client::OpenAi(openai::OpenAiClient::new(
            credentials.provider,
            credentials.api_key.clone(),
            model,
        )),
        Provider::Anthropic => Client::Anthropic(anthropic::AnthropicClient::new(
            credentials.api_key.clone(),
            model,
            max_tokens,
        )),
    }
}

impl Client {
    /// Get the provider name.
    pub fn provider(&self) -> &'static str {
        match self {
            Client::OpenAi(c) => c.provider_name(),
            Client::Anthropic(_) => "anthropic",
        }
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        match self {
            Client::OpenAi(c) => &c.model,
            Client::Anthropic(c) => &c.model,
        }
    }

    /// Send a conversation and wait for the complete assistant reply.
    ///
    /// `extra` options (temperature, tools, ...) are merged verbatim into
    /// the request body and never validated here.
    pub async fn send(
        &self,
        conversation: &[Message],
        extra: &Map<String, Value>,
    ) -> Result<Message, ChatError> {
        if conversation.is_empty() {
            return Err(ChatError::EmptyConversation);
        }
        match self {
            Client::OpenAi(c) => c.send(conversation, extra).await,
            Client::Anthropic(c) => c.send(conversation, extra).await,
        }
    }

    /// Send a conversation and stream the reply as text fragments.
    pub async fn stream(
        &self,
        conversation: &[Message],
        extra: &Map<String, Value>,
    ) -> Result<ChatStream, ChatError> {
        if conversation.is_empty() {
            return Err(ChatError::EmptyConversation);
        }
        match self {
            Client::OpenAi(c) => c.stream(conversation, extra).await,
            Client::Anthropic(c) => c.stream(conversation, extra).await,
        }
    }
}

/// Merge caller-supplied provider options into a serialized request body.
pub(crate) fn merge_extra(body: &mut Value, extra: &Map<String, Value>) {
    if let Value::Object(object) = body {
        for (key, value) in extra {
            object.insert(key.clone(), value.clone());
        }
    }
}

/// Incremental splitter for `data:` lines in an SSE body.
///
/// Network chunks align with neither event boundaries nor character
/// boundaries, so raw bytes are buffered and only complete lines are
/// decoded; a multi-byte character split across chunks stays intact in
/// the tail until its line arrives in full.
pub(crate) struct SseLines {
    buf: Vec<u8>,
}

impl SseLines {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed a chunk, returning the payloads of any completed `data:` lines.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}
