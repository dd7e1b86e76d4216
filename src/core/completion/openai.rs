//! OpenAI-compatible streaming completion client
//!
//! Talks to a `/chat/completions` endpoint with `stream: true` and adapts
//! the server-sent-event protocol into this crate's fragment stream. Any
//! endpoint speaking the OpenAI chat wire format works; the base URL is
//! configurable.

use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};

use async_trait::async_trait;

use super::{
    CompletionBackend, CompletionError, CompletionRequest, CompletionResult, CompletionStream,
};
use crate::core::session::Role;

/// Streaming client for an OpenAI-compatible completion service.
pub struct OpenAiCompletion {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompletion {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({"role": role, "content": m.content})
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        body
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompletion {
    async fn stream_chat(&self, request: CompletionRequest) -> CompletionResult<CompletionStream> {
        let body = self.build_body(&request);

        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let mut source = builder
            .eventsource()
            .map_err(|e| CompletionError::InvalidConfiguration(e.to_string()))?;

        let stream = async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => {
                        if message.data == "[DONE]" {
                            break;
                        }
                        let parsed: serde_json::Value = match serde_json::from_str(&message.data) {
                            Ok(value) => value,
                            Err(e) => {
                                yield Err(CompletionError::MalformedResponse(e.to_string()));
                                break;
                            }
                        };
                        let delta = parsed["choices"][0]["delta"]["content"]
                            .as_str()
                            .unwrap_or("");
                        if !delta.is_empty() {
                            yield Ok(delta.to_string());
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(CompletionError::Stream(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::Message;

    #[test]
    fn test_request_body_shape() {
        let backend = OpenAiCompletion::new(
            "test-key".to_string(),
            "https://api.openai.com/v1/".to_string(),
            "gpt-4o-mini".to_string(),
        );
        let request = CompletionRequest {
            messages: vec![Message::system("sys"), Message::user("hi")],
            max_tokens: Some(128),
            temperature: Some(0.7),
        };

        let body = backend.build_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "hi");
        // Trailing slash on the base URL is normalized away.
        assert_eq!(backend.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_optional_sampling_fields_are_omitted() {
        let backend = OpenAiCompletion::new(
            "k".to_string(),
            "http://localhost:1234".to_string(),
            "m".to_string(),
        );
        let body = backend.build_body(&CompletionRequest::default());
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
    }
}
