//! AI chat backend client
//!
//! Speaks the backend's `{ message, conversationHistory, context }` contract.
//! The system prompt travels in the context object; that is the mechanism
//! that imposes the reply-format contract on the model.

use crate::error::{Error, Result};
use crate::store::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// The seam between the extractor and whatever produces replies
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        message: &str,
        history: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    message: &'a str,
    conversation_history: &'a [ChatMessage],
    context: ChatContext<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatContext<'a> {
    system_prompt: &'a str,
}

/// The backend answers with either `response` or `message`
#[derive(Deserialize)]
struct ChatResponse {
    response: Option<String>,
    message: Option<String>,
}

/// HTTP client for the AI chat backend
pub struct HttpChatBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChatBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn chat(
        &self,
        message: &str,
        history: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<String> {
        let url = format!("{}/chat", self.base_url);
        let request = ChatRequest {
            message,
            conversation_history: history,
            context: ChatContext { system_prompt },
        };

        debug!(history_len = history.len(), "calling AI chat backend");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ChatBackend(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ChatBackend(format!(
                "backend returned {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::ChatBackend(format!("malformed response: {}", e)))?;

        body.response
            .or(body.message)
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| Error::ChatBackend("empty reply from backend".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    #[test]
    fn test_request_wire_shape() {
        let history = vec![ChatMessage {
            role: Role::User,
            content: "had a banana".to_string(),
        }];
        let request = ChatRequest {
            message: "and an apple",
            conversation_history: &history,
            context: ChatContext {
                system_prompt: "be brief",
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["message"], "and an apple");
        assert_eq!(json["conversationHistory"][0]["role"], "user");
        assert_eq!(json["conversationHistory"][0]["content"], "had a banana");
        assert_eq!(json["context"]["systemPrompt"], "be brief");
    }

    #[test]
    fn test_response_accepts_either_field() {
        let a: ChatResponse = serde_json::from_str(r#"{"response":"hi"}"#).unwrap();
        assert_eq!(a.response.as_deref(), Some("hi"));

        let b: ChatResponse = serde_json::from_str(r#"{"message":"hello"}"#).unwrap();
        assert_eq!(b.message.as_deref(), Some("hello"));

        let c: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(c.response.is_none() && c.message.is_none());
    }
}
