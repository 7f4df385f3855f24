//! Outbound SMS transport and phone normalization

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// The seam between the webhook and the SMS provider
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<()>;
}

/// REST sender: form-encoded `To`/`From`/`Body` with basic auth, the
/// shape programmable-SMS providers expose.
pub struct HttpSmsSender {
    api_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: reqwest::Client,
}

impl HttpSmsSender {
    pub fn new(
        api_url: &str,
        account_sid: &str,
        auth_token: &str,
        from_number: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: api_url.to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
            client,
        })
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.api_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("send failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "provider returned {}",
                response.status()
            )));
        }

        info!(to = to, chars = body.chars().count(), "outbound SMS sent");
        Ok(())
    }
}

/// Normalize a phone number to E.164 format
pub fn normalize_phone(phone: &str) -> String {
    let has_plus = phone.starts_with('+');
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    if has_plus {
        format!("+{}", digits)
    } else if digits.len() == 10 {
        // Assume US number
        format!("+1{}", digits)
    } else {
        format!("+{}", digits)
    }
}
