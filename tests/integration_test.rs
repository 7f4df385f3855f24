//! Integration tests for the SMS nutrition gateway
//!
//! These drive the full per-message flow through the gateway with
//! in-process fakes behind the collaborator traits; no network involved.

use async_trait::async_trait;
use nutrition_gateway::chat::ChatBackend;
use nutrition_gateway::config::{DEFAULT_CONVERSATION_TTL_SECS, SMS_MAX_LEN};
use nutrition_gateway::error::{Error, Result};
use nutrition_gateway::extractor::{FoodEntryDraft, APOLOGY_REPLY};
use nutrition_gateway::foodlog::FoodLog;
use nutrition_gateway::gateway::{Gateway, COULDNT_LOG_REPLY};
use nutrition_gateway::store::{ChatMessage, ConversationEntry, ConversationStore, MemoryStore};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Canned AI backend: pops one scripted reply per call; an exhausted or
/// explicitly failing script behaves like a backend outage.
struct FakeChat {
    replies: Mutex<VecDeque<Option<String>>>,
}

impl FakeChat {
    fn with_replies(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| Some(r.to_string())).collect()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
        })
    }
}

#[async_trait]
impl ChatBackend for FakeChat {
    async fn chat(
        &self,
        _message: &str,
        _history: &[ChatMessage],
        _system_prompt: &str,
    ) -> Result<String> {
        match self.replies.lock().unwrap().pop_front() {
            Some(Some(reply)) => Ok(reply),
            _ => Err(Error::ChatBackend("backend down".to_string())),
        }
    }
}

#[derive(Clone, Copy)]
enum LogMode {
    Ok,
    UnknownUser,
    Outage,
}

/// Records every successful commit; failure modes are switchable mid-test.
struct RecordingLog {
    mode: Mutex<LogMode>,
    commits: Mutex<Vec<(String, FoodEntryDraft)>>,
}

impl RecordingLog {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(LogMode::Ok),
            commits: Mutex::new(Vec::new()),
        })
    }

    fn set_mode(&self, mode: LogMode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn commits(&self) -> Vec<(String, FoodEntryDraft)> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl FoodLog for RecordingLog {
    async fn commit(&self, phone: &str, draft: &FoodEntryDraft) -> Result<()> {
        match *self.mode.lock().unwrap() {
            LogMode::Ok => {
                self.commits
                    .lock()
                    .unwrap()
                    .push((phone.to_string(), draft.clone()));
                Ok(())
            }
            LogMode::UnknownUser => Err(Error::UnknownUser(phone.to_string())),
            LogMode::Outage => Err(Error::Storage("write timed out".to_string())),
        }
    }
}

/// Store where every operation fails; the gateway must keep answering.
struct FailingStore;

#[async_trait]
impl ConversationStore for FailingStore {
    async fn get(&self, _phone: &str) -> Result<ConversationEntry> {
        Err(Error::Store("kv unreachable".to_string()))
    }

    async fn put(&self, _phone: &str, _entry: &ConversationEntry, _ttl: u64) -> Result<()> {
        Err(Error::Store("kv unreachable".to_string()))
    }

    async fn clear(&self, _phone: &str) -> Result<()> {
        Err(Error::Store("kv unreachable".to_string()))
    }
}

const SERVICE_PHONE: &str = "+15555550000";
const USER_PHONE: &str = "+15555550123";

fn gateway(
    store: Arc<dyn ConversationStore>,
    chat: Arc<FakeChat>,
    log: Arc<RecordingLog>,
) -> Gateway {
    Gateway::new(
        store,
        chat,
        log,
        SERVICE_PHONE,
        DEFAULT_CONVERSATION_TTL_SECS,
    )
}

#[tokio::test]
async fn test_banana_scenario_creates_pending_draft() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&["Banana: 105 cal. Reply Y"]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    let reply = gw.handle_message(USER_PHONE, "had a banana").await.unwrap();
    assert!(reply.contains("105"));
    assert!(reply.ends_with("Reply Y"));

    let entry = store.get(USER_PHONE).await.unwrap();
    let draft = entry.pending.expect("draft should be pending");
    assert_eq!(draft.food_name, "Banana");
    assert_eq!(draft.calories, 105);
    assert!(draft.meal_type.is_some());

    // Both sides of the exchange were recorded
    assert_eq!(entry.messages.len(), 2);
    assert!(log.commits().is_empty());
}

#[tokio::test]
async fn test_confirmation_commits_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&["Banana: 105 cal. Reply Y"]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message(USER_PHONE, "had a banana").await.unwrap();
    let reply = gw.handle_message(USER_PHONE, "Y").await.unwrap();

    assert!(reply.contains("Logged"));
    assert!(reply.contains("105"));

    let commits = log.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].0, USER_PHONE);
    assert_eq!(commits[0].1.food_name, "Banana");
    assert_eq!(commits[0].1.calories, 105);

    // Store entry is gone after the commit
    let entry = store.get(USER_PHONE).await.unwrap();
    assert!(entry.is_empty());
}

#[tokio::test]
async fn test_round_trip_apple() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&["Apple: 95 cal. Reply Y"]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message(USER_PHONE, "ate an apple").await.unwrap();
    gw.handle_message(USER_PHONE, "y").await.unwrap();

    let commits = log.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].1.food_name, "Apple");
    assert_eq!(commits[0].1.calories, 95);
}

#[tokio::test]
async fn test_double_confirmation_does_not_double_commit() {
    let store = Arc::new(MemoryStore::new());
    // The second "Y" finds no draft and falls through to the extractor
    let chat = FakeChat::with_replies(&[
        "Banana: 105 cal. Reply Y",
        "What did you eat? I need a food description.",
    ]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message(USER_PHONE, "had a banana").await.unwrap();
    gw.handle_message(USER_PHONE, "Y").await.unwrap();
    let reply = gw.handle_message(USER_PHONE, "Y").await.unwrap();

    assert_eq!(log.commits().len(), 1);
    assert!(reply.contains("What did you eat"));
}

#[tokio::test]
async fn test_multi_item_commits_total() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&[
        "Apple: 95 cal\nBanana: 105 cal\nTotal: 200 cal\nReply Y",
    ]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message(USER_PHONE, "apple and a banana")
        .await
        .unwrap();
    gw.handle_message(USER_PHONE, "yes").await.unwrap();

    let commits = log.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].1.calories, 200);
    assert_eq!(commits[0].1.food_name, "Apple, Banana");
}

#[tokio::test]
async fn test_new_message_overwrites_pending_draft() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&[
        "Apple: 95 cal. Reply Y",
        "Pizza slice: 285 cal. Reply Y",
    ]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message(USER_PHONE, "ate an apple").await.unwrap();
    gw.handle_message(USER_PHONE, "actually it was pizza")
        .await
        .unwrap();

    // At most one pending draft per phone: the apple draft is gone
    let entry = store.get(USER_PHONE).await.unwrap();
    let draft = entry.pending.expect("replacement draft should be pending");
    assert_eq!(draft.food_name, "Pizza slice");
    assert_eq!(draft.calories, 285);

    gw.handle_message(USER_PHONE, "Y").await.unwrap();
    let commits = log.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].1.food_name, "Pizza slice");
}

#[tokio::test]
async fn test_unparsed_reply_collapses_pending_draft() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&[
        "Apple: 95 cal. Reply Y",
        "Was that a small or large bowl?",
    ]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message(USER_PHONE, "ate an apple").await.unwrap();
    let reply = gw
        .handle_message(USER_PHONE, "and some cereal")
        .await
        .unwrap();

    // The clarifying question is relayed as-is, un-logged
    assert!(reply.contains("small or large"));
    let entry = store.get(USER_PHONE).await.unwrap();
    assert!(entry.pending.is_none());
}

#[tokio::test]
async fn test_backend_failure_yields_apology_and_no_draft() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::failing();
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    let reply = gw.handle_message(USER_PHONE, "had a banana").await.unwrap();
    assert_eq!(reply, APOLOGY_REPLY);

    let entry = store.get(USER_PHONE).await.unwrap();
    assert!(entry.pending.is_none());
    assert!(log.commits().is_empty());
}

#[tokio::test]
async fn test_store_failure_still_answers() {
    // Availability over consistency: a dead store means a fresh
    // conversation, never a dropped message.
    let chat = FakeChat::with_replies(&["Banana: 105 cal. Reply Y"]);
    let log = RecordingLog::new();
    let gw = gateway(Arc::new(FailingStore), chat, log.clone());

    let reply = gw.handle_message(USER_PHONE, "had a banana").await.unwrap();
    assert!(reply.contains("105"));
}

#[tokio::test]
async fn test_unknown_user_gets_generic_reply_and_draft_survives() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&["Banana: 105 cal. Reply Y"]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message(USER_PHONE, "had a banana").await.unwrap();

    log.set_mode(LogMode::UnknownUser);
    let reply = gw.handle_message(USER_PHONE, "Y").await.unwrap();
    assert_eq!(reply, COULDNT_LOG_REPLY);
    assert!(log.commits().is_empty());

    let entry = store.get(USER_PHONE).await.unwrap();
    assert!(entry.pending.is_some());
}

#[tokio::test]
async fn test_storage_outage_permits_retry_on_next_confirmation() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&["Banana: 105 cal. Reply Y"]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message(USER_PHONE, "had a banana").await.unwrap();

    log.set_mode(LogMode::Outage);
    let reply = gw.handle_message(USER_PHONE, "Y").await.unwrap();
    assert_eq!(reply, COULDNT_LOG_REPLY);

    // Draft was retained, so a later "Y" retries and succeeds
    log.set_mode(LogMode::Ok);
    let reply = gw.handle_message(USER_PHONE, "Y").await.unwrap();
    assert!(reply.contains("Logged"));

    let commits = log.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].1.calories, 105);

    let entry = store.get(USER_PHONE).await.unwrap();
    assert!(entry.is_empty());
}

#[tokio::test]
async fn test_own_number_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&["should never be used"]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    assert!(gw.handle_message(SERVICE_PHONE, "delivery echo").await.is_none());
    // Formatting differences don't defeat the guard
    assert!(gw
        .handle_message("+1 (555) 555-0000", "delivery echo")
        .await
        .is_none());

    let entry = store.get(SERVICE_PHONE).await.unwrap();
    assert!(entry.is_empty());
}

#[tokio::test]
async fn test_reply_is_sanitized_and_truncated() {
    let store = Arc::new(MemoryStore::new());
    let long_reply = format!(
        "Burrito bowl: 850 cal. See https://example.com/nutrition for the full breakdown. {}",
        "More detail. ".repeat(20)
    );
    let chat = FakeChat::with_replies(&[long_reply.as_str()]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    let reply = gw.handle_message(USER_PHONE, "burrito bowl").await.unwrap();
    assert!(reply.chars().count() <= SMS_MAX_LEN);
    assert!(!reply.contains("https://"));
    assert!(reply.ends_with("..."));
}

#[tokio::test]
async fn test_different_phones_are_independent() {
    let store = Arc::new(MemoryStore::new());
    let chat = FakeChat::with_replies(&[
        "Banana: 105 cal. Reply Y",
        "Apple: 95 cal. Reply Y",
    ]);
    let log = RecordingLog::new();
    let gw = gateway(store.clone(), chat, log.clone());

    gw.handle_message("+15555550123", "had a banana").await.unwrap();
    gw.handle_message("+15555554567", "ate an apple").await.unwrap();

    // Confirming one phone leaves the other's draft alone
    gw.handle_message("+15555550123", "Y").await.unwrap();

    let commits = log.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].1.food_name, "Banana");

    let other = store.get("+15555554567").await.unwrap();
    assert_eq!(other.pending.unwrap().food_name, "Apple");
}

#[tokio::test]
async fn test_history_window_is_forwarded() {
    // The second extraction must see the first exchange in its history
    struct HistoryProbe {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChatBackend for HistoryProbe {
        async fn chat(
            &self,
            _message: &str,
            history: &[ChatMessage],
            _system_prompt: &str,
        ) -> Result<String> {
            self.seen.lock().unwrap().push(history.len());
            Ok("Apple: 95 cal. Reply Y".to_string())
        }
    }

    let probe = Arc::new(HistoryProbe {
        seen: Mutex::new(Vec::new()),
    });
    let store = Arc::new(MemoryStore::new());
    let log = RecordingLog::new();
    let gw = Gateway::new(
        store,
        probe.clone(),
        log,
        SERVICE_PHONE,
        DEFAULT_CONVERSATION_TTL_SECS,
    );

    gw.handle_message(USER_PHONE, "ate an apple").await.unwrap();
    gw.handle_message(USER_PHONE, "and another one").await.unwrap();

    let seen = probe.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![0, 2]);
}
