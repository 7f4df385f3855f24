//! Confirmation state machine for pending food entries
//!
//! Two states per phone number, reconstructed from the conversation store
//! on every inbound message. TTL expiry of the store entry is the implicit
//! reset; there is no terminal state.

use crate::extractor::FoodEntryDraft;
use crate::store::ConversationEntry;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationState {
    NoPendingEntry,
    PendingConfirmation(FoodEntryDraft),
}

impl ConfirmationState {
    /// Rebuild the state from a stored conversation entry. An expired or
    /// missing entry reads as empty, which lands here as `NoPendingEntry`.
    pub fn from_entry(entry: &ConversationEntry) -> Self {
        match &entry.pending {
            Some(draft) => ConfirmationState::PendingConfirmation(draft.clone()),
            None => ConfirmationState::NoPendingEntry,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ConfirmationState::PendingConfirmation(_))
    }
}

/// The commit signal: a reply that is exactly "y" or "yes", any case.
pub fn is_affirmative(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.eq_ignore_ascii_case("y") || trimmed.eq_ignore_ascii_case("yes")
}
