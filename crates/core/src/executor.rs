//! Action Executor
//!
//! Dispatches a confirmed action to exactly one store operation. Every
//! [`ActionKind`] has its own arm, so adding a kind fails to compile until it
//! is handled here.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::classify::{has_overwrite_marker, PhraseTable};
use crate::error::MutationError;
use crate::options::{merge_values, options_mentioned_in, MERGE_KEY};
use crate::ports::{OptionCatalog, RecordStore, Stores};
use crate::types::{ActionKind, Domain, PendingAction, Record, ResolvedTarget};

/// Fields of an idea that autofill may infer
const AUTOFILL_CATEGORY: &str = "category";
const AUTOFILL_TAGS: &str = "tags";

/// Record fields read as free text for autofill
const CONTENT_FIELDS: &[&str] = &["description", "notes", "body", "content"];

/// What an executed action produced
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub kind: ActionKind,
    pub summary: String,
    pub record: Option<Record>,
}

pub struct Executor<'a> {
    pub stores: &'a Stores,
    pub catalog: &'a dyn OptionCatalog,
    pub phrases: &'a PhraseTable,
    pub aliases: &'a HashMap<String, String>,
}

impl Executor<'_> {
    pub async fn execute(&self, action: &PendingAction) -> Result<ExecutionReport, MutationError> {
        let store: &dyn RecordStore = &**self.stores.get(action.domain)?;
        let label = action.domain.label();

        let (summary, record) = match action.kind {
            ActionKind::CreateTask
            | ActionKind::CreateIdea
            | ActionKind::CreateSocialPost
            | ActionKind::CreateJournalEntry
            | ActionKind::PickPlatformCreate => {
                let record = store.create(&strip_internal(&action.payload)).await?;
                (format!("Created {} \"{}\".", label, record.title), Some(record))
            }
            ActionKind::UpdateTask
            | ActionKind::UpdateIdea
            | ActionKind::UpdateSocialPost
            | ActionKind::UpdateJournalEntry
            | ActionKind::PickPlatformUpdate => {
                let target = bound_target(action, "update")?;
                let patch = self.merged_patch(store, &target.id, &action.payload).await?;
                let record = store.update(&target.id, &patch).await?;
                (format!("Updated {} \"{}\".", label, record.title), Some(record))
            }
            ActionKind::MarkDone => {
                let target = bound_target(action, "mark_done")?;
                store.mark_done(&target.id).await?;
                (format!("Marked \"{}\" as done.", target.title), None)
            }
            ActionKind::MoveToDeprecated => {
                let target = bound_target(action, "move_to_deprecated")?;
                store.move_to_deprecated(&target.id).await?;
                (format!("Moved \"{}\" to deprecated.", target.title), None)
            }
            ActionKind::ArchiveIdea | ActionKind::ArchiveSocialPost | ActionKind::ArchiveJournalEntry => {
                let target = bound_target(action, "archive")?;
                store.archive(&target.id).await?;
                (format!("Archived {} \"{}\".", label, target.title), None)
            }
            ActionKind::AppendDescription => {
                let target = bound_target(action, "append_description")?;
                let text = action
                    .payload
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| MutationError::new("append_description", action.domain, "no text to append"))?;
                let record = store.append_description(&target.id, text).await?;
                (format!("Added a note to {} \"{}\".", label, target.title), Some(record))
            }
            ActionKind::AutofillIdea => {
                let target = bound_target(action, "autofill")?;
                self.autofill(store, target, &action.raw_text).await?
            }
        };

        info!(kind = %action.kind, domain = %action.domain, "action executed");
        Ok(ExecutionReport {
            kind: action.kind,
            summary,
            record,
        })
    }

    /// Resolve merge instructions against the record's current values
    async fn merged_patch(
        &self,
        store: &dyn RecordStore,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<Map<String, Value>, MutationError> {
        let merge_fields: Vec<String> = payload
            .get(MERGE_KEY)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let mut patch = strip_internal(payload);
        if merge_fields.is_empty() {
            return Ok(patch);
        }

        let current = store.get(id).await?;
        for field in merge_fields {
            let incoming: Vec<String> = patch
                .get(&field)
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            let existing = current.as_ref().and_then(|r| r.fields.get(&field));
            let merged = merge_values(existing, &incoming);
            patch.insert(field, Value::Array(merged.into_iter().map(Value::String).collect()));
        }
        Ok(patch)
    }

    /// Infer category and tags of an idea from its own text. Filled fields
    /// are kept unless the request asked to overwrite.
    async fn autofill(
        &self,
        store: &dyn RecordStore,
        target: &ResolvedTarget,
        raw_text: &str,
    ) -> Result<(String, Option<Record>), MutationError> {
        let record = store
            .get(&target.id)
            .await?
            .ok_or_else(|| MutationError::new("autofill", Domain::Idea, format!("idea {} not found", target.id)))?;
        let overwrite = has_overwrite_marker(raw_text, self.phrases);

        let mut text = record.title.clone();
        for field in CONTENT_FIELDS {
            if let Some(content) = record.text_field(field) {
                text.push(' ');
                text.push_str(content);
            }
        }

        let mut patch = Map::new();
        if overwrite || is_blank(record.fields.get(AUTOFILL_CATEGORY)) {
            let legal = self.catalog.legal_options(Domain::Idea, AUTOFILL_CATEGORY).await;
            if let Some(category) = options_mentioned_in(&text, &legal, self.aliases).into_iter().next() {
                patch.insert(AUTOFILL_CATEGORY.to_string(), Value::String(category));
            }
        }
        if overwrite || is_blank(record.fields.get(AUTOFILL_TAGS)) {
            let legal = self.catalog.legal_options(Domain::Idea, AUTOFILL_TAGS).await;
            let tags = options_mentioned_in(&text, &legal, self.aliases);
            if !tags.is_empty() {
                patch.insert(
                    AUTOFILL_TAGS.to_string(),
                    Value::Array(tags.into_iter().map(Value::String).collect()),
                );
            }
        }

        if patch.is_empty() {
            warn!(id = %record.id, "autofill found nothing to fill");
            return Ok((format!("Nothing to fill in for idea \"{}\".", record.title), Some(record)));
        }

        let filled: Vec<String> = patch.keys().cloned().collect();
        let updated = store.update(&record.id, &patch).await?;
        Ok((
            format!("Filled in {} for idea \"{}\".", filled.join(" and "), updated.title),
            Some(updated),
        ))
    }
}

fn bound_target<'a>(action: &'a PendingAction, operation: &str) -> Result<&'a ResolvedTarget, MutationError> {
    action
        .target
        .as_ref()
        .ok_or_else(|| MutationError::new(operation, action.domain, "no target bound"))
}

fn strip_internal(payload: &Map<String, Value>) -> Map<String, Value> {
    payload
        .iter()
        .filter(|(k, _)| k.as_str() != MERGE_KEY)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}
