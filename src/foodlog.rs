//! Food log writer - resolve users and persist confirmed entries
//!
//! Exactly one persisted record per successful commit; records are never
//! updated afterwards. Unknown-user and storage-outage failures are kept
//! distinct so the gateway can log them apart while replying identically.

use crate::error::{Error, Result};
use crate::extractor::FoodEntryDraft;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// The seam between the gateway and the hosted storage service
#[async_trait]
pub trait FoodLog: Send + Sync {
    /// Resolve the phone to a user and write one food log record.
    async fn commit(&self, phone: &str, draft: &FoodEntryDraft) -> Result<()>;
}

#[derive(Deserialize)]
struct UserRow {
    id: String,
}

#[derive(Serialize)]
struct FoodEntryRow<'a> {
    user_id: &'a str,
    food_name: &'a str,
    calories: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    meal_type: Option<&'a str>,
    confidence: f32,
    logged_at: chrono::DateTime<Utc>,
}

/// REST client for the hosted storage service
pub struct RestFoodLog {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestFoodLog {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    /// Resolve a phone number to a user id. `Err(UnknownUser)` when no row
    /// matches; network and server failures are storage errors.
    async fn resolve_user(&self, phone: &str) -> Result<String> {
        let url = format!("{}/rest/v1/users", self.base_url);
        let phone_filter = format!("eq.{}", phone);
        let response = self
            .client
            .get(&url)
            .query(&[("select", "id"), ("phone", phone_filter.as_str())])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("user lookup failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "user lookup returned {}",
                response.status()
            )));
        }

        let rows: Vec<UserRow> = response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("malformed user lookup response: {}", e)))?;

        match rows.into_iter().next() {
            Some(row) => {
                debug!(phone = phone, user_id = %row.id, "resolved user");
                Ok(row.id)
            }
            None => Err(Error::UnknownUser(phone.to_string())),
        }
    }

    async fn write_entry(&self, user_id: &str, draft: &FoodEntryDraft) -> Result<()> {
        let url = format!("{}/rest/v1/food_entries", self.base_url);
        let row = FoodEntryRow {
            user_id,
            food_name: &draft.food_name,
            calories: draft.calories,
            meal_type: draft.meal_type.as_deref(),
            confidence: draft.confidence,
            logged_at: Utc::now(),
        };

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(&self.api_key)
            .json(&row)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("entry write failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "entry write returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FoodLog for RestFoodLog {
    async fn commit(&self, phone: &str, draft: &FoodEntryDraft) -> Result<()> {
        let user_id = self.resolve_user(phone).await?;
        self.write_entry(&user_id, draft).await?;
        info!(
            phone = phone,
            food = %draft.food_name,
            calories = draft.calories,
            "food entry committed"
        );
        Ok(())
    }
}
