//! User-facing prompt texts and keyboards

use serde_json::{Map, Value};

use crate::options::MERGE_KEY;
use crate::ports::{Button, Keyboard};
use crate::types::{ActionId, ActionKind, Candidate, Domain, PendingAction};

pub const PICK_PREFIX: &str = "pick:";
pub const CONFIRM_PREFIX: &str = "confirm:";
pub const CANCEL_PREFIX: &str = "cancel:";

// ============================================================================
// Keyboards
// ============================================================================

pub fn confirm_keyboard(action_id: &ActionId) -> Keyboard {
    Keyboard {
        rows: vec![vec![
            Button::new("✅ Confirm", format!("{}{}", CONFIRM_PREFIX, action_id)),
            Button::new("❌ Cancel", format!("{}{}", CANCEL_PREFIX, action_id)),
        ]],
    }
}

/// One button per candidate
pub fn pick_keyboard(candidates: &[Candidate]) -> Keyboard {
    Keyboard {
        rows: candidates
            .iter()
            .map(|c| vec![Button::new(format!("{}. {}", c.index, c.title), format!("{}{}", PICK_PREFIX, c.index))])
            .collect(),
    }
}

// ============================================================================
// Prompts
// ============================================================================

pub fn pick_prompt(action: &PendingAction, candidates: &[Candidate]) -> String {
    let mut text = match action.kind {
        ActionKind::PickPlatformCreate | ActionKind::PickPlatformUpdate => {
            "Which platform is this post for?".to_string()
        }
        _ => format!("I found several {}s. Which one do you mean?", action.domain.label()),
    };
    for c in candidates {
        text.push_str(&format!("\n{}. {}", c.index, c.title));
    }
    text
}

/// Yes/no prompt naming the bound target and the change
pub fn confirm_prompt(action: &PendingAction) -> String {
    let label = action.domain.label();
    let title = action
        .target
        .as_ref()
        .map(|t| t.title.clone())
        .or_else(|| action.payload.get("title").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();

    let mut text = match action.kind {
        ActionKind::CreateTask
        | ActionKind::CreateIdea
        | ActionKind::CreateSocialPost
        | ActionKind::CreateJournalEntry => match &action.duplicate_of {
            Some(existing) => format!(
                "A similar {} already exists: \"{}\". Create a duplicate anyway?",
                label, existing.title
            ),
            None => format!("Create {} \"{}\"?", label, title),
        },
        ActionKind::PickPlatformCreate => {
            let mut text = format!("Create {} \"{}\"{}?", label, title, describe_platform(&action.payload));
            if let Some(existing) = &action.duplicate_of {
                text.push_str(&format!("\nNote: a similar post already exists (\"{}\").", existing.title));
            }
            text
        }
        ActionKind::PickPlatformUpdate => {
            format!("Move {} \"{}\"{}?", label, title, describe_platform(&action.payload))
        }
        ActionKind::UpdateTask
        | ActionKind::UpdateIdea
        | ActionKind::UpdateSocialPost
        | ActionKind::UpdateJournalEntry => {
            format!("Update {} \"{}\"?{}", label, title, describe_changes(&action.payload))
        }
        ActionKind::MarkDone => format!("Mark {} \"{}\" as done?", label, title),
        ActionKind::MoveToDeprecated => format!("Move {} \"{}\" to deprecated?", label, title),
        ActionKind::ArchiveIdea | ActionKind::ArchiveSocialPost | ActionKind::ArchiveJournalEntry => {
            format!("Archive {} \"{}\"?", label, title)
        }
        ActionKind::AppendDescription => {
            let note = action.payload.get("text").and_then(Value::as_str).unwrap_or_default();
            format!("Append to {} \"{}\":\n\"{}\"", label, title, note)
        }
        ActionKind::AutofillIdea => format!("Fill in category and tags of {} \"{}\"?", label, title),
    };

    if action.queue_len() > 0 {
        text.push_str(&format!("\n({} more queued)", action.queue_len()));
    }
    text
}

fn describe_platform(payload: &Map<String, Value>) -> String {
    payload
        .get("platform")
        .and_then(Value::as_str)
        .map(|p| format!(" on {}", p))
        .unwrap_or_default()
}

fn describe_changes(payload: &Map<String, Value>) -> String {
    let merged: Vec<&str> = payload
        .get(MERGE_KEY)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut text = String::new();
    for (field, value) in payload.iter().filter(|(k, _)| k.as_str() != MERGE_KEY) {
        let shown = match value {
            Value::Null => "(cleared)".to_string(),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        };
        let verb = if merged.contains(&field.as_str()) { "+=" } else { "→" };
        text.push_str(&format!("\n• {} {} {}", field, verb, shown));
    }
    text
}

pub fn not_found(domain: Domain, reference: Option<&str>) -> String {
    match reference {
        Some(r) => format!(
            "I couldn't find a {} matching \"{}\". Could you be more specific?",
            domain.label(),
            r
        ),
        None => format!("Which {} do you mean?", domain.label()),
    }
}

pub fn queue_dropped(domain: Domain, reference: Option<&str>) -> String {
    format!("{} Skipping the rest of the list.", not_found(domain, reference))
}

pub const STALE: &str = "That confirmation has expired.";
pub const CANCELLED: &str = "Cancelled.";
pub const NOTHING_TO_CHANGE: &str = "There was nothing to change.";

pub fn invalid_pick(index: usize, len: usize) -> String {
    format!("{} is not on the list. Please pick a number between 1 and {}.", index, len)
}

pub fn dropped_fields(dropped: &[crate::options::Dropped]) -> Option<String> {
    if dropped.is_empty() {
        return None;
    }
    let items: Vec<String> = dropped
        .iter()
        .map(|d| format!("{} \"{}\"", d.field, d.value))
        .collect();
    Some(format!("Ignored unknown values: {}.", items.join(", ")))
}
