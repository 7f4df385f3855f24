//! Environment-backed configuration
//!
//! Every credential is injected at process start; a missing required
//! variable is a fatal startup condition, never a per-request error.

use crate::error::{Error, Result};
use std::net::SocketAddr;

/// Hard ceiling for one composed reply (single SMS segment).
pub const SMS_MAX_LEN: usize = 140;

/// Trailing window of prior exchanges forwarded to the AI backend.
pub const HISTORY_WINDOW: usize = 10;

/// Conversation records expire this long after the last write.
pub const DEFAULT_CONVERSATION_TTL_SECS: u64 = 86_400;

/// All configuration for the gateway process
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the webhook server binds to
    pub bind_addr: SocketAddr,
    /// Base URL of the AI chat backend
    pub ai_backend_url: String,
    /// Base URL of the conversation KV store (REST, native per-key expiry)
    pub kv_url: String,
    /// Bearer token for the KV store
    pub kv_token: String,
    /// Base URL of the hosted storage service
    pub storage_url: String,
    /// API key for the hosted storage service
    pub storage_api_key: String,
    /// Outbound SMS API endpoint
    pub sms_api_url: String,
    /// Outbound SMS account identifier
    pub sms_account_sid: String,
    /// Outbound SMS auth token
    pub sms_auth_token: String,
    /// The service's own phone number (E.164); inbound messages from this
    /// number are dropped to prevent reply loops
    pub service_phone: String,
    /// When true, the webhook returns a JSON echo instead of sending SMS
    pub echo_mode: bool,
    /// Timeout applied to every external call
    pub request_timeout_secs: u64,
    /// TTL for conversation records
    pub conversation_ttl_secs: u64,
}

impl Config {
    /// Load configuration from the environment, failing fast on any
    /// missing required variable.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: optional("BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("invalid BIND_ADDR: {}", e)))?,
            ai_backend_url: required("AI_BACKEND_URL")?,
            kv_url: required("KV_REST_URL")?,
            kv_token: required("KV_REST_TOKEN")?,
            storage_url: required("STORAGE_URL")?,
            storage_api_key: required("STORAGE_API_KEY")?,
            sms_api_url: required("SMS_API_URL")?,
            sms_account_sid: required("SMS_ACCOUNT_SID")?,
            sms_auth_token: required("SMS_AUTH_TOKEN")?,
            service_phone: required("SERVICE_PHONE")?,
            echo_mode: optional("GATEWAY_ECHO_MODE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            request_timeout_secs: parse_optional("REQUEST_TIMEOUT_SECS")?.unwrap_or(10),
            conversation_ttl_secs: parse_optional("CONVERSATION_TTL_SECS")?
                .unwrap_or(DEFAULT_CONVERSATION_TTL_SECS),
        })
    }

    /// Create config for testing with placeholder credentials
    pub fn for_test() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ai_backend_url: "http://localhost:9100".to_string(),
            kv_url: "http://localhost:9101".to_string(),
            kv_token: "test-kv-token".to_string(),
            storage_url: "http://localhost:9102".to_string(),
            storage_api_key: "test-storage-key".to_string(),
            sms_api_url: "http://localhost:9103/messages".to_string(),
            sms_account_sid: "test-sid".to_string(),
            sms_auth_token: "test-token".to_string(),
            service_phone: "+15555550000".to_string(),
            echo_mode: true,
            request_timeout_secs: 2,
            conversation_ttl_secs: DEFAULT_CONVERSATION_TTL_SECS,
        }
    }
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| Error::Config(format!("missing required env var {}", name)))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_optional(name: &str) -> Result<Option<u64>> {
    match optional(name) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {}: {}", name, e))),
        None => Ok(None),
    }
}
