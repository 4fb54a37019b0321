//! Confirmation Gateway
//!
//! Consumes user responses to a pending action: button callbacks
//! (`pick:<n>`, `confirm:<id>`, `cancel:<id>`) or free text. Transitions
//! operate on a locked slot and never touch a record store.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::classify::{classify_reply, infer_index, PhraseTable, ReplyDecision};
use crate::ports::ReplyClassifier;
use crate::pending::SlotGuard;
use crate::render::{self, CANCEL_PREFIX, CONFIRM_PREFIX, PICK_PREFIX};
use crate::types::{ActionId, ActionKind, PendingAction, PendingState, ResolvedTarget};
use serde_json::Value;

/// Free text longer than this is never read as a pick
const MAX_PICK_TEXT_WORDS: usize = 4;

/// An inbound response to a pending action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationEvent {
    Pick(usize),
    Confirm(String),
    Cancel(String),
    Text(String),
}

impl ConfirmationEvent {
    /// Parse a callback token; anything else is free text.
    pub fn parse(input: &str) -> ConfirmationEvent {
        let trimmed = input.trim();
        if let Some(rest) = trimmed.strip_prefix(PICK_PREFIX) {
            if let Ok(index) = rest.trim().parse::<usize>() {
                return ConfirmationEvent::Pick(index);
            }
        }
        if let Some(rest) = trimmed.strip_prefix(CONFIRM_PREFIX) {
            return ConfirmationEvent::Confirm(rest.trim().to_string());
        }
        if let Some(rest) = trimmed.strip_prefix(CANCEL_PREFIX) {
            return ConfirmationEvent::Cancel(rest.trim().to_string());
        }
        ConfirmationEvent::Text(input.to_string())
    }
}

/// What a response did to the slot
#[derive(Debug, Clone)]
pub enum Transition {
    /// Confirmed; the action has been taken out of the slot
    Execute(PendingAction),
    /// Cancelled; the slot is empty
    Cancelled(PendingAction),
    /// A pick bound a target or option; the slot now awaits confirmation
    Bound(PendingAction),
    InvalidPick { index: usize, len: usize },
    /// Missing or mismatched action; nothing changed
    Stale,
    /// The text is not a response; treat it as a new request
    Reinterpret(String),
}

/// Apply one event to the locked slot.
pub async fn apply(
    slot: &mut SlotGuard,
    event: ConfirmationEvent,
    phrases: &PhraseTable,
    classifier: Option<&dyn ReplyClassifier>,
) -> Transition {
    match event {
        ConfirmationEvent::Pick(index) => pick(slot, index),
        ConfirmationEvent::Confirm(token) => confirm(slot, &token),
        ConfirmationEvent::Cancel(token) => cancel(slot, &token),
        ConfirmationEvent::Text(text) => free_text(slot, text, phrases, classifier).await,
    }
}

fn confirm(slot: &mut SlotGuard, token: &str) -> Transition {
    let Some(id) = ActionId::parse(token) else {
        warn!(conversation = %slot.conversation(), token, "malformed confirm token");
        return Transition::Stale;
    };
    match slot.take_if_matches(&id) {
        Some(action) => {
            info!(conversation = %slot.conversation(), kind = %action.kind, "action confirmed");
            Transition::Execute(action)
        }
        None => {
            warn!(conversation = %slot.conversation(), token, "stale confirmation");
            Transition::Stale
        }
    }
}

fn cancel(slot: &mut SlotGuard, token: &str) -> Transition {
    let Some(id) = ActionId::parse(token) else {
        return Transition::Stale;
    };
    match slot.take_if_matches(&id) {
        Some(action) => {
            info!(conversation = %slot.conversation(), kind = %action.kind, "action cancelled");
            Transition::Cancelled(action)
        }
        None => {
            warn!(conversation = %slot.conversation(), token, "stale cancellation");
            Transition::Stale
        }
    }
}

fn pick(slot: &mut SlotGuard, index: usize) -> Transition {
    let conversation = slot.conversation().clone();
    let Some(action) = slot.current_mut() else {
        return Transition::Stale;
    };
    let Some(candidates) = action.candidates.as_ref() else {
        debug!(conversation = %conversation, "pick without an open candidate list");
        return Transition::Stale;
    };
    let Some(chosen) = candidates.iter().find(|c| c.index == index).cloned() else {
        return Transition::InvalidPick {
            index,
            len: candidates.len(),
        };
    };

    match action.kind {
        ActionKind::PickPlatformCreate | ActionKind::PickPlatformUpdate => {
            action.payload.insert("platform".to_string(), Value::String(chosen.title.clone()));
        }
        _ => {
            action.target = Some(ResolvedTarget {
                id: chosen.id.clone(),
                title: chosen.title.clone(),
                domain: action.domain,
            });
        }
    }
    action.candidates = None;
    action.action_id = Some(ActionId::new());
    action.created_at = Utc::now();
    info!(conversation = %conversation, kind = %action.kind, pick = index, "candidate bound");
    Transition::Bound(action.clone())
}

async fn free_text(
    slot: &mut SlotGuard,
    text: String,
    phrases: &PhraseTable,
    classifier: Option<&dyn ReplyClassifier>,
) -> Transition {
    let Some(action) = slot.current() else {
        return Transition::Reinterpret(text);
    };

    match action.state() {
        PendingState::AwaitingPick => {
            if text.split_whitespace().count() <= MAX_PICK_TEXT_WORDS {
                if let Some(index) = infer_index(&text, phrases) {
                    return pick(slot, index);
                }
            }
            if classify_reply(&text, phrases) == ReplyDecision::Cancel {
                let dropped = slot.take();
                return match dropped {
                    Some(action) => Transition::Cancelled(action),
                    None => Transition::Stale,
                };
            }
            Transition::Reinterpret(text)
        }
        PendingState::AwaitingConfirm => {
            let mut decision = classify_reply(&text, phrases);
            if decision == ReplyDecision::Unknown {
                if let Some(classifier) = classifier {
                    let prompt = render::confirm_prompt(action);
                    decision = match classifier.classify(&prompt, &text).await {
                        Ok(decision) => decision,
                        Err(e) => {
                            warn!("reply classifier failed: {:#}", e);
                            ReplyDecision::Unknown
                        }
                    };
                }
            }
            debug!(conversation = %slot.conversation(), ?decision, "free-text reply");

            match decision {
                ReplyDecision::Confirm => slot.take().map_or(Transition::Stale, Transition::Execute),
                ReplyDecision::Cancel => slot.take().map_or(Transition::Stale, Transition::Cancelled),
                ReplyDecision::Edit | ReplyDecision::Unknown => Transition::Reinterpret(text),
            }
        }
    }
}
