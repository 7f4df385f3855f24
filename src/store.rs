//! Conversation store - TTL-bound record of recent exchanges per phone
//!
//! The store is the only shared state in the gateway. It lives behind a
//! trait so the production impl can be an external key-value service with
//! native per-key expiry while tests run against the in-memory impl.

use crate::error::{Error, Result};
use crate::extractor::FoodEntryDraft;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Upper bound on retained messages per conversation; older exchanges
/// fall off the front.
const MAX_MESSAGES: usize = 20;

/// Who said what
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// The per-phone conversation record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<FoodEntryDraft>,
}

impl ConversationEntry {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.pending.is_none()
    }

    pub fn push_user(&mut self, content: &str) {
        self.push(Role::User, content);
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.push(Role::Assistant, content);
    }

    fn push(&mut self, role: Role, content: &str) {
        self.messages.push(ChatMessage {
            role,
            content: content.to_string(),
        });
        if self.messages.len() > MAX_MESSAGES {
            let excess = self.messages.len() - MAX_MESSAGES;
            self.messages.drain(..excess);
        }
    }

    /// Trailing window of prior exchanges forwarded for context continuity
    pub fn trailing_window(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

/// Keyed, expiring conversation storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch the entry for a phone; empty if absent or expired.
    async fn get(&self, phone: &str) -> Result<ConversationEntry>;

    /// Overwrite the entry and reset its expiry.
    async fn put(&self, phone: &str, entry: &ConversationEntry, ttl_seconds: u64) -> Result<()>;

    /// Delete the entry (after a successful commit).
    async fn clear(&self, phone: &str) -> Result<()>;
}

/// In-memory store with the same TTL semantics as the external service.
/// Suitable for tests and single-instance deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (ConversationEntry, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get(&self, phone: &str) -> Result<ConversationEntry> {
        let entries = self.entries.read().await;
        match entries.get(phone) {
            Some((entry, deadline)) if Instant::now() < *deadline => Ok(entry.clone()),
            _ => Ok(ConversationEntry::default()),
        }
    }

    async fn put(&self, phone: &str, entry: &ConversationEntry, ttl_seconds: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(ttl_seconds);
        let mut entries = self.entries.write().await;
        // Opportunistic sweep keeps expired phones from accumulating
        entries.retain(|_, (_, d)| Instant::now() < *d);
        entries.insert(phone.to_string(), (entry.clone(), deadline));
        Ok(())
    }

    async fn clear(&self, phone: &str) -> Result<()> {
        self.entries.write().await.remove(phone);
        Ok(())
    }
}

/// Client for the external REST key-value service with native per-key
/// expiry (`GET /get/<key>`, `POST /set/<key>?EX=<ttl>`, `POST /del/<key>`,
/// bearer token auth).
pub struct RestKvStore {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

/// The KV service wraps every response body in `{ "result": ... }`
#[derive(Deserialize)]
struct KvEnvelope {
    result: Option<String>,
}

impl RestKvStore {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn key(phone: &str) -> String {
        format!("conv:{}", phone)
    }
}

#[async_trait]
impl ConversationStore for RestKvStore {
    async fn get(&self, phone: &str) -> Result<ConversationEntry> {
        let url = format!("{}/get/{}", self.base_url, Self::key(phone));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Store(format!(
                "kv get returned {}",
                response.status()
            )));
        }

        let envelope: KvEnvelope = response.json().await?;
        match envelope.result {
            Some(raw) => {
                let entry = serde_json::from_str(&raw)
                    .map_err(|e| Error::Store(format!("corrupt conversation record: {}", e)))?;
                Ok(entry)
            }
            None => Ok(ConversationEntry::default()),
        }
    }

    async fn put(&self, phone: &str, entry: &ConversationEntry, ttl_seconds: u64) -> Result<()> {
        let url = format!(
            "{}/set/{}?EX={}",
            self.base_url,
            Self::key(phone),
            ttl_seconds
        );
        let body = serde_json::to_string(entry)?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Store(format!(
                "kv set returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn clear(&self, phone: &str) -> Result<()> {
        let url = format!("{}/del/{}", self.base_url, Self::key(phone));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Store(format!(
                "kv del returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
