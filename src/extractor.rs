//! Nutrition extraction - the AI reply contract and calorie parsing
//!
//! The system prompt pins the model to two fixed reply shapes; the parser
//! pulls calorie facts back out with a tolerant pattern match. A reply that
//! doesn't match is not an error: the text is still relayed to the user,
//! just without a draft.

use crate::chat::ChatBackend;
use crate::store::ChatMessage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Reply contract imposed on the AI backend via the system prompt field.
pub const SYSTEM_PROMPT: &str = "\
You are a nutrition logging assistant replying over SMS. \
When the user describes food they ate, estimate calories and reply in exactly one of two shapes. \
Single item: \"<Item>: <N> cal. Reply Y\". \
Multiple items: one \"<Item>: <N> cal\" line per item, then \"Total: <N> cal\", then \"Reply Y\" on the last line. \
Calories are whole numbers. \
Never include URLs, links, or emojis. \
Keep every reply under 140 characters. \
If the food description is too vague to estimate, ask exactly one short clarifying question instead.";

/// Fixed reply when the AI backend call fails; the user is never left
/// without a response.
pub const APOLOGY_REPLY: &str =
    "Sorry, I'm having trouble right now. Please try again in a few minutes.";

/// An unconfirmed, parsed food-calorie fact awaiting user confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEntryDraft {
    pub food_name: String,
    pub calories: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<String>,
    pub confidence: f32,
}

/// Outcome of parsing an AI reply; callers must handle the no-match case.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(FoodEntryDraft),
    Unparsed,
}

impl ParseOutcome {
    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseOutcome::Parsed(_))
    }

    pub fn into_draft(self) -> Option<FoodEntryDraft> {
        match self {
            ParseOutcome::Parsed(draft) => Some(draft),
            ParseOutcome::Unparsed => None,
        }
    }
}

/// What the extractor hands back to the gateway
#[derive(Debug, Clone)]
pub struct Extraction {
    pub reply_text: String,
    pub parsed: ParseOutcome,
}

/// Matches an integer calorie figure. The leading guard rejects figures
/// that are the tail of a decimal ("95.5 cal") or negative ("-5 cal");
/// fractional calories are extraction failure, never rounded silently.
static CALORIE_FIGURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^\d.\-])(\d+)\s*cal").expect("invalid calorie regex"));

/// Last calorie figure on one line, if any. Overflowing figures don't count.
fn line_calories(line: &str) -> Option<u32> {
    CALORIE_FIGURE
        .captures_iter(line)
        .filter_map(|cap| cap.get(1)?.as_str().parse().ok())
        .last()
}

/// Item label on a line of the form `<Item>: ...`
fn line_label(line: &str) -> Option<&str> {
    let (label, _) = line.split_once(':')?;
    let label = label.trim();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn fallback_name(user_message: &str) -> String {
    let trimmed: String = user_message.trim().chars().take(60).collect();
    if trimmed.is_empty() {
        "Food".to_string()
    } else {
        trimmed
    }
}

/// Parse calorie facts out of an AI reply.
///
/// The last qualifying line wins, so a `Total:` line takes precedence over
/// the itemized lines above it. `user_message` is the fallback food name
/// when the reply carries a figure but no item label.
pub fn parse_reply(reply: &str, user_message: &str) -> ParseOutcome {
    struct Line {
        label: Option<String>,
        calories: u32,
        is_total: bool,
    }

    let lines: Vec<Line> = reply
        .lines()
        .filter_map(|line| {
            let calories = line_calories(line)?;
            let label = line_label(line).map(str::to_string);
            let is_total = label
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case("total"));
            Some(Line {
                label,
                calories,
                is_total,
            })
        })
        .collect();

    let last = match lines.last() {
        Some(line) => line,
        None => return ParseOutcome::Unparsed,
    };

    let (food_name, confidence) = if last.is_total {
        let names: Vec<&str> = lines
            .iter()
            .filter(|l| !l.is_total)
            .filter_map(|l| l.label.as_deref())
            .collect();
        if names.is_empty() {
            (fallback_name(user_message), 0.6)
        } else {
            (names.join(", "), 0.9)
        }
    } else {
        match &last.label {
            Some(label) => (label.clone(), 0.9),
            None => (fallback_name(user_message), 0.6),
        }
    };

    ParseOutcome::Parsed(FoodEntryDraft {
        food_name,
        calories: last.calories,
        meal_type: None,
        confidence,
    })
}

/// Sends free text to the AI backend under the reply contract and parses
/// the reply. Zero retries: a failed call becomes the apology reply.
pub struct Extractor {
    chat: Arc<dyn ChatBackend>,
}

impl Extractor {
    pub fn new(chat: Arc<dyn ChatBackend>) -> Self {
        Self { chat }
    }

    pub async fn extract(&self, message: &str, history: &[ChatMessage]) -> Extraction {
        match self.chat.chat(message, history, SYSTEM_PROMPT).await {
            Ok(reply) => {
                let parsed = parse_reply(&reply, message);
                Extraction {
                    reply_text: reply,
                    parsed,
                }
            }
            Err(e) => {
                warn!(error = %e, "AI backend call failed, substituting apology");
                Extraction {
                    reply_text: APOLOGY_REPLY.to_string(),
                    parsed: ParseOutcome::Unparsed,
                }
            }
        }
    }
}
