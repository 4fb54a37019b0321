//! Pending Action Store
//!
//! One slot per conversation, each behind its own async mutex. Handling an
//! event means holding the slot's guard from the first read to the last
//! write, so two events of one conversation never interleave while events of
//! different conversations run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::types::{ActionId, ConversationId, PendingAction};

type Slot = Arc<AsyncMutex<Option<PendingAction>>>;
type SlotMap = Arc<Mutex<HashMap<ConversationId, Slot>>>;

/// Holders of an idle slot's `Arc`: the map, the guard's own handle and the
/// owned mutex guard
const IDLE_SLOT_REFS: usize = 3;

#[derive(Default)]
pub struct PendingActionStore {
    slots: SlotMap,
    ttl: Option<Duration>,
}

impl PendingActionStore {
    /// `ttl_secs = None` keeps slots until they are consumed or overwritten
    pub fn new(ttl_secs: Option<u64>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl: ttl_secs.map(|secs| Duration::seconds(secs as i64)),
        }
    }

    fn slot(&self, conversation: &ConversationId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(conversation.clone()).or_default().clone()
    }

    /// Wait for exclusive access to a conversation's slot. The slot is
    /// dropped from the map again when the guard is released empty.
    pub async fn lock(&self, conversation: &ConversationId) -> SlotGuard {
        let slot = self.slot(conversation);
        let guard = slot.clone().lock_owned().await;
        SlotGuard {
            conversation: conversation.clone(),
            guard,
            slot,
            slots: self.slots.clone(),
            ttl: self.ttl,
        }
    }

    /// Copy of the current action, for inspection
    pub async fn snapshot(&self, conversation: &ConversationId) -> Option<PendingAction> {
        self.lock(conversation).await.current().cloned()
    }

    /// Drop expired actions and idle slots. Busy slots are skipped.
    pub fn sweep_expired(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut dropped = 0;
        slots.retain(|conversation, slot| {
            let Ok(mut inner) = slot.try_lock() else {
                return true;
            };
            if let Some(action) = inner.as_ref() {
                if is_expired(action, self.ttl) {
                    debug!(conversation = %conversation, kind = %action.kind, "dropping expired pending action");
                    *inner = None;
                    dropped += 1;
                }
            }
            inner.is_some() || Arc::strong_count(slot) > 1
        });
        dropped
    }

    /// Number of conversations with an allocated slot
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_expired(action: &PendingAction, ttl: Option<Duration>) -> bool {
    match ttl {
        Some(ttl) => action.created_at + ttl < Utc::now(),
        None => false,
    }
}

/// Exclusive handle on one conversation's slot
pub struct SlotGuard {
    conversation: ConversationId,
    guard: OwnedMutexGuard<Option<PendingAction>>,
    slot: Slot,
    slots: SlotMap,
    ttl: Option<Duration>,
}

impl SlotGuard {
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// The live action; expired actions read as absent
    pub fn current(&self) -> Option<&PendingAction> {
        self.guard.as_ref().filter(|a| !is_expired(a, self.ttl))
    }

    pub fn current_mut(&mut self) -> Option<&mut PendingAction> {
        let ttl = self.ttl;
        self.guard.as_mut().filter(|a| !is_expired(a, ttl))
    }

    /// Store `action`, discarding whatever was there
    pub fn replace(&mut self, action: PendingAction) -> Option<PendingAction> {
        if let Some(previous) = self.guard.as_ref() {
            debug!(conversation = %self.conversation, kind = %previous.kind, "overwriting pending action");
        }
        self.guard.replace(action)
    }

    pub fn take(&mut self) -> Option<PendingAction> {
        let ttl = self.ttl;
        self.guard.take().filter(|a| !is_expired(a, ttl))
    }

    /// Remove and return the action only if it awaits confirmation under `id`
    pub fn take_if_matches(&mut self, id: &ActionId) -> Option<PendingAction> {
        let matches = self.current().and_then(|a| a.action_id.as_ref()) == Some(id);
        if matches {
            self.guard.take()
        } else {
            None
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.guard.is_some() {
            return;
        }
        // Waiters hold extra references; they still need this slot
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let idle = slots
            .get(&self.conversation)
            .is_some_and(|s| Arc::ptr_eq(s, &self.slot) && Arc::strong_count(s) <= IDLE_SLOT_REFS);
        if idle {
            slots.remove(&self.conversation);
        }
    }
}
