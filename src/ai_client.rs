//! OpenAI-compatible chat completion client
//!
//! Every call in this crate asks for a strict JSON object reply. The HTTP
//! client sits behind `ChatBackend` so the conversation logic can be driven by
//! a scripted backend in tests.

use crate::error::{PaperError, Result};
use crate::settings::{Settings, API_KEY_ENV};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat API message format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Append-only message history for one conversation.
///
/// Owned by the caller and threaded through each round by value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self { messages: vec![ChatMessage::system(prompt)] }
    }

    pub fn push(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Anything that can answer a chat request with a JSON object string
#[allow(async_fn_in_trait)]
pub trait ChatBackend {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Chat completion request format
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.base_url, settings.api_key())
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl ChatBackend for OpenAiClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PaperError::service(format!("{} not set", API_KEY_ENV)))?;

        let request = ChatRequest {
            model,
            messages,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| PaperError::service(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaperError::service(format!("API error {}: {}", status, body)));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| PaperError::service(format!("Failed to parse response: {}", e)))?;

        if let Some(usage) = &api_response.usage {
            crate::log!(
                "[AI] {} tokens in, {} tokens out ({})",
                usage.prompt_tokens, usage.completion_tokens, model
            );
        }

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PaperError::service("No response content from model"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "deepseek-chat",
            messages: &messages,
            response_format: ResponseFormat { kind: "json_object" },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_response_deserialization() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"title\":\"x\"}"}}],
                       "usage":{"prompt_tokens":10,"completion_tokens":3,"total_tokens":13}}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("{\"title\":\"x\"}"));
        assert_eq!(parsed.usage.unwrap().completion_tokens, 3);
    }

    #[test]
    fn test_conversation_is_append_only() {
        let history = Conversation::with_system("rules")
            .push(ChatMessage::user("q"))
            .push(ChatMessage::assistant("a"));
        assert_eq!(history.len(), 3);
        assert_eq!(history.messages()[0].role, Role::System);
        assert_eq!(history.messages()[2].content, "a");
    }

    #[tokio::test]
    async fn test_missing_key_fails_at_call_time() {
        let client = OpenAiClient::new("http://127.0.0.1:9", None);
        let err = client.complete("m", &[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, PaperError::Service { .. }));
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let client = OpenAiClient::new("https://api.deepseek.com/", Some("k".into()));
        assert_eq!(client.endpoint(), "https://api.deepseek.com/chat/completions");
    }
}
