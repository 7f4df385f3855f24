//! SMS gateway orchestration
//!
//! Single entry point per inbound message. Sequences the store, the
//! extractor, the confirmation machine, and the food log writer, and
//! always produces exactly one reply - except for messages from our own
//! number, which are dropped to break delivery-echo loops.

use crate::chat::ChatBackend;
use crate::config::{HISTORY_WINDOW, SMS_MAX_LEN};
use crate::confirm::{is_affirmative, ConfirmationState};
use crate::error::Error;
use crate::extractor::{Extractor, FoodEntryDraft};
use crate::foodlog::FoodLog;
use crate::store::{ConversationEntry, ConversationStore};
use crate::transport::normalize_phone;
use chrono::{Local, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Generic reply for both unknown-user and storage failures; the two are
/// logged apart but presented identically.
pub const COULDNT_LOG_REPLY: &str =
    "Sorry, I couldn't log that right now. Please try again later.";

pub struct Gateway {
    store: Arc<dyn ConversationStore>,
    extractor: Extractor,
    food_log: Arc<dyn FoodLog>,
    service_phone: String,
    conversation_ttl_secs: u64,
    /// Per-phone single-flight locks. Entries are a few words each and
    /// bounded by the phone population; they are never pruned.
    phone_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        chat: Arc<dyn ChatBackend>,
        food_log: Arc<dyn FoodLog>,
        service_phone: &str,
        conversation_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            extractor: Extractor::new(chat),
            food_log,
            service_phone: normalize_phone(service_phone),
            conversation_ttl_secs,
            phone_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound message and compose the reply. `None` means the
    /// message came from our own number and must not be answered.
    pub async fn handle_message(&self, from: &str, body: &str) -> Option<String> {
        let phone = normalize_phone(from);
        if phone == self.service_phone {
            debug!("ignoring message from our own number");
            return None;
        }

        // Serialize rapid double-texts from one phone; different phones
        // still process fully in parallel.
        let lock = self.phone_lock(&phone).await;
        let _guard = lock.lock().await;

        let reply = self.process(&phone, body).await;
        Some(sanitize_reply(&reply))
    }

    async fn phone_lock(&self, phone: &str) -> Arc<Mutex<()>> {
        let mut locks = self.phone_locks.lock().await;
        locks
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn process(&self, phone: &str, body: &str) -> String {
        let mut entry = match self.store.get(phone).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(phone = phone, error = %e, "store read failed, starting fresh conversation");
                ConversationEntry::default()
            }
        };

        if is_affirmative(body) {
            if let ConfirmationState::PendingConfirmation(draft) =
                ConfirmationState::from_entry(&entry)
            {
                return self.commit(phone, &draft).await;
            }
            // No pending draft (first contact, already committed, or TTL
            // expired): the affirmation falls through to the extractor as
            // ordinary text.
        }

        let extraction = self
            .extractor
            .extract(body, entry.trailing_window(HISTORY_WINDOW))
            .await;
        let reply = sanitize_reply(&extraction.reply_text);

        entry.push_user(body);
        entry.push_assistant(&reply);
        // A new extraction overwrites any prior unconfirmed draft; an
        // extraction failure collapses the state back to no-pending-entry.
        entry.pending = extraction.parsed.into_draft().map(|mut draft| {
            draft.meal_type = Some(meal_type_for_hour(Local::now().hour()).to_string());
            draft
        });

        if let Err(e) = self
            .store
            .put(phone, &entry, self.conversation_ttl_secs)
            .await
        {
            warn!(phone = phone, error = %e, "store write failed, conversation not persisted");
        }

        reply
    }

    async fn commit(&self, phone: &str, draft: &FoodEntryDraft) -> String {
        match self.food_log.commit(phone, draft).await {
            Ok(()) => {
                // Clearing drops the committed draft so a repeated "Y"
                // cannot double-log.
                if let Err(e) = self.store.clear(phone).await {
                    warn!(phone = phone, error = %e, "store clear failed after commit");
                }
                format!("Logged {}: {} cal. Nice!", draft.food_name, draft.calories)
            }
            Err(Error::UnknownUser(p)) => {
                warn!(phone = %p, "no user for phone, entry not logged");
                COULDNT_LOG_REPLY.to_string()
            }
            Err(e) => {
                // Draft stays in the store so the next "Y" can retry
                error!(phone = phone, error = %e, "food log commit failed, draft retained");
                COULDNT_LOG_REPLY.to_string()
            }
        }
    }
}

/// Markdown-style links keep their label; bare URLs vanish
static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("invalid markdown link regex"));
static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S*").expect("invalid url regex"));
static SPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("invalid space regex"));

/// Remove URLs and markdown links; they are not actionable over SMS and
/// waste the character budget.
pub fn strip_links(text: &str) -> String {
    let no_markdown = MARKDOWN_LINK.replace_all(text, "$1");
    let no_urls = BARE_URL.replace_all(&no_markdown, "");
    SPACE_RUN.replace_all(no_urls.trim(), " ").to_string()
}

/// Cap at `max` characters, ellipsis marker included.
pub fn truncate_sms(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

/// Full outbound post-processing: strip links first, then enforce the
/// single-segment ceiling.
pub fn sanitize_reply(text: &str) -> String {
    truncate_sms(&strip_links(text), SMS_MAX_LEN)
}

/// Meal type inferred from local wall-clock hour; the AI reply contract
/// doesn't carry one.
pub fn meal_type_for_hour(hour: u32) -> &'static str {
    match hour {
        5..=10 => "breakfast",
        11..=14 => "lunch",
        17..=21 => "dinner",
        _ => "snack",
    }
}
