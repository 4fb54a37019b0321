//! In-memory adapters
//!
//! Record store, shown lists, presenter and option catalog kept in process.
//! Used by the CLI's offline mode and by the tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::{Config, OptionTable};
use crate::error::MutationError;
use crate::options::normalize_key;
use crate::ports::{Keyboard, ListFilter, MessageRef, OptionCatalog, Presenter, RecordStore, ShownLists};
use crate::types::{ConversationId, Domain, Record, ShownItem};

// ============================================================================
// Record Store
// ============================================================================

pub struct InMemoryStore {
    domain: Domain,
    records: RwLock<Vec<Record>>,
    next_id: AtomicU64,
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl InMemoryStore {
    pub fn new(domain: Domain) -> Self {
        Self::with_records(domain, Vec::new())
    }

    pub fn with_records(domain: Domain, records: Vec<Record>) -> Self {
        let next = records.len() as u64 + 1;
        Self {
            domain,
            records: RwLock::new(records),
            next_id: AtomicU64::new(next),
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// All records, including archived ones
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutating calls made so far, as `operation:id`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make every later call of `operation` fail
    pub fn fail_on(&self, operation: &str) {
        *self.fail_on.lock().unwrap_or_else(|e| e.into_inner()) = Some(operation.to_string());
    }

    fn check(&self, operation: &str, id: &str) -> Result<(), MutationError> {
        let failing = self.fail_on.lock().unwrap_or_else(|e| e.into_inner());
        if failing.as_deref() == Some(operation) {
            return Err(MutationError::new(operation, self.domain, "injected failure")
                .with_status(500)
                .with_code("internal")
                .with_request_id(format!("mem-{}", id)));
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{}:{}", operation, id));
        Ok(())
    }

    /// Apply `change` to the record `id` and return the result
    fn modify<F>(&self, operation: &str, id: &str, change: F) -> Result<Record, MutationError>
    where
        F: FnOnce(&mut Record),
    {
        self.check(operation, id)?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| MutationError::new(operation, self.domain, format!("{} not found", id)).with_status(404))?;
        change(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, MutationError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter(|r| filter.include_archived || r.is_active())
            .filter(|r| filter.ids.as_ref().map_or(true, |ids| ids.contains(&r.id)))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Case-insensitive title containment over active records
    async fn find(&self, query: &str, limit: usize) -> Result<Vec<Record>, MutationError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter(|r| r.is_active() && r.title.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create(&self, fields: &Map<String, Value>) -> Result<Record, MutationError> {
        let id = format!("{}-{}", self.domain, self.next_id.fetch_add(1, Ordering::SeqCst));
        self.check("create", &id)?;
        let mut record = Record::new(id, "");
        apply_patch(&mut record, fields);
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, patch: &Map<String, Value>) -> Result<Record, MutationError> {
        self.modify("update", id, |record| apply_patch(record, patch))
    }

    async fn archive(&self, id: &str) -> Result<(), MutationError> {
        self.modify("archive", id, |record| {
            record.fields.insert("archived".to_string(), Value::Bool(true));
        })
        .map(|_| ())
    }

    async fn append_description(&self, id: &str, text: &str) -> Result<Record, MutationError> {
        self.modify("append_description", id, |record| {
            let description = match record.text_field("description") {
                Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, text),
                _ => text.to_string(),
            };
            record
                .fields
                .insert("description".to_string(), Value::String(description));
        })
    }

    async fn mark_done(&self, id: &str) -> Result<(), MutationError> {
        if self.domain != Domain::Task {
            return Err(MutationError::new("mark_done", self.domain, "not supported"));
        }
        self.modify("mark_done", id, |record| {
            record.fields.insert("status".to_string(), Value::String("Done".to_string()));
        })
        .map(|_| ())
    }

    async fn move_to_deprecated(&self, id: &str) -> Result<(), MutationError> {
        if self.domain != Domain::Task {
            return Err(MutationError::new("move_to_deprecated", self.domain, "not supported"));
        }
        self.modify("move_to_deprecated", id, |record| {
            record
                .fields
                .insert("status".to_string(), Value::String("Deprecated".to_string()));
        })
        .map(|_| ())
    }
}

/// `title` sets the title, `null` removes a field, anything else overwrites
fn apply_patch(record: &mut Record, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (key.as_str(), value) {
            ("title", Value::String(title)) => record.title = title.clone(),
            ("id", _) => {}
            (_, Value::Null) => {
                record.fields.remove(key);
            }
            _ => {
                record.fields.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Load seed records from a JSON file: `{"task": [...], "idea": [...]}`
pub fn load_records(path: &Path) -> Result<HashMap<Domain, Vec<Record>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records: {}", path.display()))?;
    let raw: HashMap<String, Vec<Record>> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records: {}", path.display()))?;

    let mut out = HashMap::new();
    for (key, records) in raw {
        let domain = Domain::parse(&key).with_context(|| format!("Unknown domain in records file: {}", key))?;
        out.insert(domain, records);
    }
    Ok(out)
}

// ============================================================================
// Shown Lists
// ============================================================================

#[derive(Default)]
pub struct InMemoryShownLists {
    lists: RwLock<HashMap<(ConversationId, Domain), Vec<ShownItem>>>,
}

impl InMemoryShownLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `records` as the list just shown, indexed from 1
    pub fn record(&self, conversation: &ConversationId, domain: Domain, records: &[Record]) -> Vec<ShownItem> {
        let items: Vec<ShownItem> = records
            .iter()
            .enumerate()
            .map(|(i, r)| ShownItem {
                index: i + 1,
                id: r.id.clone(),
                title: r.title.clone(),
            })
            .collect();
        self.lists
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((conversation.clone(), domain), items.clone());
        items
    }
}

impl ShownLists for InMemoryShownLists {
    fn shown(&self, conversation: &ConversationId, domain: Domain) -> Vec<ShownItem> {
        self.lists
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(conversation.clone(), domain))
            .cloned()
            .unwrap_or_default()
    }
}

// ============================================================================
// Presenter
// ============================================================================

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub conversation: ConversationId,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

/// Keeps every message instead of sending it
#[derive(Default)]
pub struct RecordingPresenter {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn send_message(
        &self,
        conversation: &ConversationId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef> {
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push(SentMessage {
            conversation: conversation.clone(),
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(MessageRef(format!("msg-{}", sent.len())))
    }
}

// ============================================================================
// Option Catalog
// ============================================================================

/// Legal options seeded from configuration; created options live in memory
pub struct StaticOptionCatalog {
    table: RwLock<OptionTable>,
}

impl StaticOptionCatalog {
    pub fn new(table: OptionTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.options.clone())
    }
}

#[async_trait]
impl OptionCatalog for StaticOptionCatalog {
    async fn legal_options(&self, domain: Domain, field: &str) -> Vec<String> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&domain)
            .and_then(|fields| fields.get(field))
            .cloned()
            .unwrap_or_default()
    }

    async fn create_option(&self, domain: Domain, field: &str, value: &str) -> Result<String> {
        let value = value.trim().trim_start_matches('#').trim();
        anyhow::ensure!(!normalize_key(value).is_empty(), "empty option for {}.{}", domain, field);

        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let values = table.entry(domain).or_default().entry(field.to_string()).or_default();
        if let Some(existing) = values.iter().find(|v| normalize_key(v) == normalize_key(value)) {
            return Ok(existing.clone());
        }
        values.push(value.to_string());
        tracing::info!(domain = %domain, field, value, "created option");
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_find_skips_archived() {
        let store = InMemoryStore::with_records(
            Domain::Task,
            vec![
                Record::new("t1", "Buy milk"),
                Record::new("t2", "Buy milk powder").with_field("archived", json!(true)),
            ],
        );
        let hits = store.find("MILK", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "t1");
        assert_eq!(store.list(&ListFilter { include_archived: true, ..Default::default() }).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_update_and_get() {
        let store = InMemoryStore::new(Domain::Idea);
        let created = store
            .create(json!({"title": "Dark mode", "tags": ["ux"]}).as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(created.id, "idea-1");
        assert_eq!(created.title, "Dark mode");

        store
            .update(&created.id, json!({"tags": null, "category": "Product"}).as_object().unwrap())
            .await
            .unwrap();
        let fetched = store.get(&created.id).await.unwrap().unwrap();
        assert!(!fetched.fields.contains_key("tags"));
        assert_eq!(fetched.text_field("category"), Some("Product"));
        assert_eq!(store.calls(), vec!["create:idea-1", "update:idea-1"]);
    }

    #[tokio::test]
    async fn test_task_only_operations() {
        let ideas = InMemoryStore::with_records(Domain::Idea, vec![Record::new("i1", "x")]);
        assert!(ideas.mark_done("i1").await.is_err());

        let tasks = InMemoryStore::with_records(Domain::Task, vec![Record::new("t1", "x")]);
        tasks.move_to_deprecated("t1").await.unwrap();
        assert!(tasks.find("x", 10).await.unwrap().is_empty());
        assert!(tasks.update("missing", &Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_catalog_create_is_idempotent() {
        let catalog = StaticOptionCatalog::from_config(&Config::default());
        assert_eq!(catalog.create_option(Domain::Idea, "tags", "#DeepWork").await.unwrap(), "DeepWork");
        assert_eq!(catalog.create_option(Domain::Idea, "tags", "deepwork").await.unwrap(), "DeepWork");
        assert!(catalog.create_option(Domain::Idea, "tags", " # ").await.is_err());
        let tags = catalog.legal_options(Domain::Idea, "tags").await;
        assert_eq!(tags.iter().filter(|t| t.as_str() == "DeepWork").count(), 1);
    }

    #[test]
    fn test_shown_lists_are_per_conversation() {
        let shown = InMemoryShownLists::new();
        let records = vec![Record::new("t1", "Task A"), Record::new("t2", "Task B")];
        shown.record(&ConversationId::new("a"), Domain::Task, &records);
        assert_eq!(shown.shown(&ConversationId::new("a"), Domain::Task)[1].id, "t2");
        assert!(shown.shown(&ConversationId::new("b"), Domain::Task).is_empty());
        assert!(shown.shown(&ConversationId::new("a"), Domain::Idea).is_empty());
    }
}
