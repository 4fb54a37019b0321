//! Collaborator contracts
//!
//! The engine only talks to the outside world through these traits: one
//! record store per domain, the recently shown lists, the chat presenter,
//! the legal-option catalog and an optional reply classifier.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classify::ReplyDecision;
use crate::error::MutationError;
use crate::types::{ConversationId, Domain, Record, ShownItem};

// ============================================================================
// Record Stores
// ============================================================================

/// Filters accepted by [`RecordStore::list`]
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub include_archived: bool,
    pub ids: Option<Vec<String>>,
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn by_id(id: &str) -> Self {
        Self {
            include_archived: true,
            ids: Some(vec![id.to_string()]),
            limit: Some(1),
        }
    }
}

/// Uniform per-domain store contract
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn domain(&self) -> Domain;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, MutationError>;

    async fn find(&self, query: &str, limit: usize) -> Result<Vec<Record>, MutationError>;

    async fn create(&self, fields: &Map<String, Value>) -> Result<Record, MutationError>;

    async fn update(&self, id: &str, patch: &Map<String, Value>) -> Result<Record, MutationError>;

    async fn archive(&self, id: &str) -> Result<(), MutationError>;

    async fn append_description(&self, id: &str, text: &str) -> Result<Record, MutationError>;

    /// Task stores override this
    async fn mark_done(&self, _id: &str) -> Result<(), MutationError> {
        Err(MutationError::new("mark_done", self.domain(), "not supported"))
    }

    /// Task stores override this
    async fn move_to_deprecated(&self, _id: &str) -> Result<(), MutationError> {
        Err(MutationError::new("move_to_deprecated", self.domain(), "not supported"))
    }

    /// Fetch one record. Defaults to a filtered `list`.
    async fn get(&self, id: &str) -> Result<Option<Record>, MutationError> {
        let records = self.list(&ListFilter::by_id(id)).await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }
}

/// Store registry keyed by domain
#[derive(Clone, Default)]
pub struct Stores {
    by_domain: HashMap<Domain, Arc<dyn RecordStore>>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.by_domain.insert(store.domain(), store);
        self
    }

    pub fn get(&self, domain: Domain) -> Result<&Arc<dyn RecordStore>, MutationError> {
        self.by_domain
            .get(&domain)
            .ok_or_else(|| MutationError::new("lookup", domain, "no store configured"))
    }
}

// ============================================================================
// Shown Lists
// ============================================================================

/// Lists most recently rendered to the user, per conversation and domain.
/// Populated by whoever renders list/find results; read-only to the engine.
pub trait ShownLists: Send + Sync {
    fn shown(&self, conversation: &ConversationId, domain: Domain) -> Vec<ShownItem>;
}

// ============================================================================
// Presentation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub callback: String,
}

impl Button {
    pub fn new(label: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback: callback.into(),
        }
    }
}

/// Abstract inline keyboard: rows of buttons
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef(pub String);

#[async_trait]
pub trait Presenter: Send + Sync {
    async fn send_message(
        &self,
        conversation: &ConversationId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> anyhow::Result<MessageRef>;
}

// ============================================================================
// Options & Classification
// ============================================================================

/// Legal values of enumerated fields
#[async_trait]
pub trait OptionCatalog: Send + Sync {
    async fn legal_options(&self, domain: Domain, field: &str) -> Vec<String>;

    /// Register a new legal value and return its canonical form
    async fn create_option(&self, domain: Domain, field: &str, value: &str) -> anyhow::Result<String>;
}

/// External fallback for free-text replies the rules cannot decide
#[async_trait]
pub trait ReplyClassifier: Send + Sync {
    async fn classify(&self, prompt: &str, reply: &str) -> anyhow::Result<ReplyDecision>;
}
