//! OpenAI-compatible chat completion backend.
//!
//! Serves both the OpenAI API and OpenAI-compatible endpoints such as
//! Perplexity, which differ only in base URL.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Provider;
use crate::llm::{merge_extra, ChatError, ChatStream, Message, SseLines};

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiClient {
    pub model: String,
    provider: Provider,
    api_key: String,
    client: Client,
}

impl OpenAiClient {
    /// Create a new client bound to the provider's endpoint.
    pub fn new(provider: Provider, api_key: String, model: String) -> Self {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            model,
            provider,
            api_key,
            client,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.provider.base_url())
    }

    fn request_body(
        &self,
        conversation: &[Message],
        stream: bool,
        extra: &Map<String, Value>,
    ) -> Result<Value, ChatError> {
        let messages = conversation
            .iter()
            .map(Message::to_wire)
            .collect::<Result<Vec<_>, _>>()?;
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream,
        };
        let mut body = serde_json::to_value(request).map_err(|e| ChatError::Wire(e.to_string()))?;
        merge_extra(&mut body, extra);
        Ok(body)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ChatError> {
        let provider = self.provider.name();
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::Network {
                provider,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiError>().await {
                Ok(body) => body.error.message,
                Err(_) => "Unknown error".to_string(),
            };
            return Err(ChatError::Api {
                provider,
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

        let completion: ChatCompletion = response.json().await.map_err(|e| {
            ChatError::Wire(format!("failed to parse chat completion: {e}"))
        })?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Wire("completion has no choices".to_string()))?;

        Message::from_wire(choice.message)
    }

    /// Send a conversation and stream the reply as text fragments.
    ///
    /// Deltas without text content (role-only, tool-call-only) are skipped;
    /// tool-call streaming is not reconstructed here.
    pub async fn stream(
        &self,
        conversation: &[Message],
        extra: &Map<String, Value>,
    ) -> Result<ChatStream, ChatError> {
        let body = self.request_body(conversation, true, extra)?;
        let response = self.post(&body).await?;

        let provider = self.provider.name();
        let mut decoder = DeltaDecoder::new();
        let stream = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.feed(&bytes),
                Err(e) => vec![Err(ChatError::Network {
                    provider,
                    message: e.to_string(),
                })],
            })
            .map(futures::stream::iter)
            .flatten();

        Ok(Box::pin(stream))
    }
}

/// Decodes SSE body chunks into text fragments.
struct DeltaDecoder {
    lines: SseLines,
    done: bool,
}

impl DeltaDecoder {
    fn new() -> Self {
        Self {
            lines: SseLines::new(),
            done: false,
        }
    }

    /// Feed one network chunk, returning the fragments it completes.
    ///
    /// Nothing is yielded once the `[DONE]` sentinel has been seen,
    /// whatever the server sends afterwards and however the chunks are
    /// framed.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String, ChatError>> {
        let mut fragments = Vec::new();
        if self.done {
            return fragments;
        }
        for payload in self.lines.feed(bytes) {
            if payload == "[DONE]" {
                self.done = true;
                break;
            }
            match delta_text(&payload) {
                Ok(Some(text)) => fragments.push(Ok(text)),
                Ok(None) => {}
                Err(e) => fragments.push(Err(e)),
            }
        }
        fragments
    }
}

/// Extract the text delta from one SSE payload.
///
/// Well-formed deltas without text (role-only, tool-call-only) yield
/// `Ok(None)`; a payload that fails to parse is a wire error.
fn delta_text(payload: &str) -> Result<Option<String>, ChatError> {
    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|e| ChatError::Wire(format!("unparseable stream payload: {e}")))?;
    let delta = match chunk.choices.into_iter().next() {
        Some(choice) => choice.delta,
        None => return Ok(None),
    };
    Ok(match delta.content {
        Some(text) if !text.is_empty() => Some(text),
        _ => None,
    })
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Value,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_client(provider: Provider) -> OpenAiClient {
        OpenAiClient::new(provider, "test-key".to_string(), "gpt-4o".to_string())
    }

    #[test]
    fn test_endpoint_follows_provider_base_url() {
        let openai = test_client(Provider::OpenAi);
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        // Perplexity keeps the OpenAI transport on its own base URL.
        let perplexity = test_client(Provider::Perplexity);
        assert_eq!(
            perplexity.endpoint(),
            "https://api.perplexity.ai/chat/completions"
        );
    }

    #[test]
    fn test_request_body_serializes_roles_and_extras() {
        let client = test_client(Provider::OpenAi);
        let conversation = vec![Message::system("be brief"), Message::user("hello")];
        let mut extra = Map::new();
        extra.insert("temperature".to_string(), json!(0.3));

        let body = client.request_body(&conversation, true, &extra).unwrap();
        assert_eq!(body["model"], json!("gpt-4o"));
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["temperature"], json!(0.3));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["content"], json!("hello"));
    }

    #[test]
    fn test_delta_text_extracts_fragments_in_order() {
        let payloads = [
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"{"choices":[{"delta":{"content":" world"}}]}"#,
            r#"{"choices":[{"delta":{}}]}"#,
        ];
        let fragments: Vec<String> = payloads
            .iter()
            .filter_map(|p| delta_text(p).unwrap())
            .collect();
        assert_eq!(fragments, vec!["Hel", "lo", " world"]);
    }

    #[test]
    fn test_delta_text_separates_no_text_from_malformed() {
        assert_eq!(delta_text(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap(), None);
        assert_eq!(delta_text(r#"{"choices":[]}"#).unwrap(), None);
        assert!(matches!(delta_text("not json"), Err(ChatError::Wire(_))));
    }

    #[test]
    fn test_decoder_terminates_at_done_across_chunks() {
        let mut decoder = DeltaDecoder::new();
        let fragments =
            decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\ndata: [DONE]\n");
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_deref().unwrap(), "hi");

        // Anything the server sends after [DONE] is discarded.
        let later = decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"stray\"}}]}\n");
        assert!(later.is_empty());
    }

    #[test]
    fn test_decoder_keeps_multibyte_chars_intact_across_chunks() {
        let mut decoder = DeltaDecoder::new();
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n".as_bytes();
        // Split in the middle of the two-byte e-acute.
        let split = payload.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(decoder.feed(&payload[..split]).is_empty());
        let fragments = decoder.feed(&payload[split..]);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_deref().unwrap(), "caf\u{e9}");
    }
}
