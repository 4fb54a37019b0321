//! Domain models for the action engine
//!
//! This module contains the core types used throughout the engine, including:
//! - Record domains and action kinds
//! - Intents as produced by the external planner
//! - Resolution results (targets, candidates, shown-list entries)
//! - The per-conversation pending action

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// Domains
// ============================================================================

/// Record collections the engine can mutate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Task,
    Idea,
    Social,
    Journal,
}

impl Domain {
    pub const ALL: [Domain; 4] = [Domain::Task, Domain::Idea, Domain::Social, Domain::Journal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Task => "task",
            Domain::Idea => "idea",
            Domain::Social => "social",
            Domain::Journal => "journal",
        }
    }

    /// Noun used in user-facing messages
    pub fn label(&self) -> &'static str {
        match self {
            Domain::Task => "task",
            Domain::Idea => "idea",
            Domain::Social => "social post",
            Domain::Journal => "journal entry",
        }
    }

    /// Argument keys that may carry an explicit record id
    pub fn id_keys(&self) -> &'static [&'static str] {
        match self {
            Domain::Task => &["id", "taskId", "task_id"],
            Domain::Idea => &["id", "ideaId", "idea_id"],
            Domain::Social => &["id", "postId", "post_id", "socialPostId"],
            Domain::Journal => &["id", "entryId", "entry_id", "journalEntryId"],
        }
    }

    /// Argument keys that may carry a 1-based index into the shown list
    pub fn index_keys(&self) -> &'static [&'static str] {
        match self {
            Domain::Task => &["index", "taskIndex", "task_index"],
            Domain::Idea => &["index", "ideaIndex", "idea_index"],
            Domain::Social => &["index", "postIndex", "post_index"],
            Domain::Journal => &["index", "entryIndex", "entry_index"],
        }
    }

    pub fn parse(s: &str) -> Option<Domain> {
        match s.trim().to_lowercase().as_str() {
            "task" | "tasks" | "todo" => Some(Domain::Task),
            "idea" | "ideas" => Some(Domain::Idea),
            "social" | "social_post" | "post" | "posts" => Some(Domain::Social),
            "journal" | "journal_entry" | "entry" | "entries" => Some(Domain::Journal),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Action Kinds
// ============================================================================

/// Every mutation the engine knows how to confirm and dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateTask,
    UpdateTask,
    MarkDone,
    MoveToDeprecated,
    AppendDescription,
    CreateIdea,
    UpdateIdea,
    ArchiveIdea,
    AutofillIdea,
    CreateSocialPost,
    UpdateSocialPost,
    ArchiveSocialPost,
    CreateJournalEntry,
    UpdateJournalEntry,
    ArchiveJournalEntry,
    PickPlatformCreate,
    PickPlatformUpdate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateTask => "create_task",
            ActionKind::UpdateTask => "update_task",
            ActionKind::MarkDone => "mark_done",
            ActionKind::MoveToDeprecated => "move_to_deprecated",
            ActionKind::AppendDescription => "append_description",
            ActionKind::CreateIdea => "create_idea",
            ActionKind::UpdateIdea => "update_idea",
            ActionKind::ArchiveIdea => "archive_idea",
            ActionKind::AutofillIdea => "autofill_idea",
            ActionKind::CreateSocialPost => "create_social_post",
            ActionKind::UpdateSocialPost => "update_social_post",
            ActionKind::ArchiveSocialPost => "archive_social_post",
            ActionKind::CreateJournalEntry => "create_journal_entry",
            ActionKind::UpdateJournalEntry => "update_journal_entry",
            ActionKind::ArchiveJournalEntry => "archive_journal_entry",
            ActionKind::PickPlatformCreate => "pick_platform_create",
            ActionKind::PickPlatformUpdate => "pick_platform_update",
        }
    }

    /// Map a planner tool name (with common aliases) to an action kind.
    ///
    /// Pick-platform kinds are internal and never produced here.
    pub fn from_tool_name(name: &str) -> Option<ActionKind> {
        let kind = match name.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "create_task" | "add_task" | "new_task" => ActionKind::CreateTask,
            "update_task" | "edit_task" => ActionKind::UpdateTask,
            "mark_done" | "complete_task" | "done_task" | "finish_task" => ActionKind::MarkDone,
            "move_to_deprecated" | "delete_task" | "deprecate_task" | "remove_task" => {
                ActionKind::MoveToDeprecated
            }
            "append_description" | "append_note" | "add_description" => {
                ActionKind::AppendDescription
            }
            "create_idea" | "add_idea" => ActionKind::CreateIdea,
            "update_idea" | "edit_idea" => ActionKind::UpdateIdea,
            "archive_idea" | "delete_idea" => ActionKind::ArchiveIdea,
            "autofill_idea" | "classify_idea" => ActionKind::AutofillIdea,
            "create_social_post" | "add_social_post" | "create_post" => {
                ActionKind::CreateSocialPost
            }
            "update_social_post" | "edit_social_post" | "update_post" => {
                ActionKind::UpdateSocialPost
            }
            "archive_social_post" | "delete_social_post" | "delete_post" => {
                ActionKind::ArchiveSocialPost
            }
            "create_journal_entry" | "add_journal_entry" | "create_journal" => {
                ActionKind::CreateJournalEntry
            }
            "update_journal_entry" | "edit_journal_entry" => ActionKind::UpdateJournalEntry,
            "archive_journal_entry" | "delete_journal_entry" => ActionKind::ArchiveJournalEntry,
            _ => return None,
        };
        Some(kind)
    }

    /// Fixed domain of the kind. `AppendDescription` is shared and takes its
    /// domain from the intent arguments instead.
    pub fn fixed_domain(&self) -> Option<Domain> {
        match self {
            ActionKind::CreateTask
            | ActionKind::UpdateTask
            | ActionKind::MarkDone
            | ActionKind::MoveToDeprecated => Some(Domain::Task),
            ActionKind::CreateIdea
            | ActionKind::UpdateIdea
            | ActionKind::ArchiveIdea
            | ActionKind::AutofillIdea => Some(Domain::Idea),
            ActionKind::CreateSocialPost
            | ActionKind::UpdateSocialPost
            | ActionKind::ArchiveSocialPost
            | ActionKind::PickPlatformCreate
            | ActionKind::PickPlatformUpdate => Some(Domain::Social),
            ActionKind::CreateJournalEntry
            | ActionKind::UpdateJournalEntry
            | ActionKind::ArchiveJournalEntry => Some(Domain::Journal),
            ActionKind::AppendDescription => None,
        }
    }

    /// Creation kinds never resolve a target; they go through the dedup guard.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            ActionKind::CreateTask
                | ActionKind::CreateIdea
                | ActionKind::CreateSocialPost
                | ActionKind::CreateJournalEntry
                | ActionKind::PickPlatformCreate
        )
    }

    pub fn is_update(&self) -> bool {
        matches!(
            self,
            ActionKind::UpdateTask
                | ActionKind::UpdateIdea
                | ActionKind::UpdateSocialPost
                | ActionKind::UpdateJournalEntry
                | ActionKind::PickPlatformUpdate
        )
    }

    /// Kinds that accept several targets in one request ("delete A and B")
    pub fn is_batch_capable(&self) -> bool {
        matches!(
            self,
            ActionKind::MarkDone
                | ActionKind::MoveToDeprecated
                | ActionKind::ArchiveIdea
                | ActionKind::ArchiveSocialPost
                | ActionKind::ArchiveJournalEntry
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Intent
// ============================================================================

/// A parsed request from the planner. Immutable and consumed once.
#[derive(Debug, Clone, Serialize)]
pub struct Intent {
    pub kind: ActionKind,
    pub arguments: Map<String, Value>,
    pub raw_text: String,
}

/// Planner output before the tool name is validated
#[derive(Debug, Deserialize)]
struct RawIntent {
    #[serde(alias = "toolKind", alias = "tool_kind", alias = "kind")]
    tool: String,
    #[serde(default, alias = "args")]
    arguments: Option<Map<String, Value>>,
    #[serde(default, alias = "rawUserText", alias = "raw_user_text", alias = "text")]
    raw_text: Option<String>,
}

impl Intent {
    pub fn new(kind: ActionKind, arguments: Map<String, Value>, raw_text: impl Into<String>) -> Self {
        Self {
            kind,
            arguments,
            raw_text: raw_text.into(),
        }
    }

    /// Parse a planner JSON object. Unknown tool names are an error so callers
    /// can fall back to plain chat.
    pub fn from_json(json: &str) -> Result<Intent, IntentParseError> {
        let raw: RawIntent = serde_json::from_str(json)?;
        let kind = ActionKind::from_tool_name(&raw.tool)
            .ok_or_else(|| IntentParseError::UnknownTool(raw.tool.clone()))?;
        Ok(Intent {
            kind,
            arguments: raw.arguments.unwrap_or_default(),
            raw_text: raw.raw_text.unwrap_or_default(),
        })
    }

    /// Domain of the intent: fixed by kind, or from a `domain` argument for
    /// shared kinds (defaults to task).
    pub fn domain(&self) -> Domain {
        self.kind.fixed_domain().unwrap_or_else(|| {
            self.arguments
                .get("domain")
                .and_then(Value::as_str)
                .and_then(Domain::parse)
                .unwrap_or(Domain::Task)
        })
    }

    /// First non-empty string argument among `keys`
    pub fn str_arg(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| {
            self.arguments
                .get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IntentParseError {
    #[error("invalid intent JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

// ============================================================================
// Records & Resolution
// ============================================================================

/// A record as returned by a domain store. Domain fields stay untyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Archived and deprecated records do not count for dedup
    pub fn is_active(&self) -> bool {
        let flag = |key: &str| self.fields.get(key).and_then(Value::as_bool).unwrap_or(false);
        if flag("archived") || flag("deprecated") {
            return false;
        }
        !matches!(
            self.fields
                .get("status")
                .and_then(Value::as_str)
                .map(|s| s.to_lowercase())
                .as_deref(),
            Some("archived") | Some("deprecated")
        )
    }

    pub fn text_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn as_target(&self, domain: Domain) -> ResolvedTarget {
        ResolvedTarget {
            id: self.id.clone(),
            title: self.title.clone(),
            domain,
        }
    }
}

/// The single record an action is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub id: String,
    pub title: String,
    pub domain: Domain,
}

/// One indexed entry of a disambiguation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// 1-based, scoped to one pending action
    pub index: usize,
    pub id: String,
    pub title: String,
}

/// One entry of the list most recently rendered to the user in a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShownItem {
    pub index: usize,
    pub id: String,
    pub title: String,
}

// ============================================================================
// Conversation & Pending Action
// ============================================================================

/// Chat identifier; one pending slot exists per conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token that validates confirm/cancel callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<ActionId> {
        Uuid::parse_str(s.trim()).ok().map(ActionId)
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    AwaitingPick,
    AwaitingConfirm,
}

/// The in-flight confirmable mutation of one conversation
#[derive(Debug, Clone, Serialize)]
pub struct PendingAction {
    /// `None` while a pick is outstanding
    pub action_id: Option<ActionId>,
    pub kind: ActionKind,
    pub domain: Domain,
    /// Bound target; `None` for creations and unresolved picks
    pub target: Option<ResolvedTarget>,
    /// Patch fields (updates) or creation fields (creates)
    pub payload: Map<String, Value>,
    pub candidates: Option<Vec<Candidate>>,
    pub follow_up_queue: Option<VecDeque<String>>,
    /// Set when the dedup guard found an equivalent active record
    pub duplicate_of: Option<ResolvedTarget>,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

impl PendingAction {
    /// An action bound to its target (or a creation) awaiting yes/no
    pub fn awaiting_confirm(
        kind: ActionKind,
        domain: Domain,
        target: Option<ResolvedTarget>,
        payload: Map<String, Value>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            action_id: Some(ActionId::new()),
            kind,
            domain,
            target,
            payload,
            candidates: None,
            follow_up_queue: None,
            duplicate_of: None,
            raw_text: raw_text.into(),
            created_at: Utc::now(),
        }
    }

    /// An action waiting for the user to pick one of `candidates`
    pub fn awaiting_pick(
        kind: ActionKind,
        domain: Domain,
        candidates: Vec<Candidate>,
        payload: Map<String, Value>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            action_id: None,
            kind,
            domain,
            target: None,
            payload,
            candidates: Some(candidates),
            follow_up_queue: None,
            duplicate_of: None,
            raw_text: raw_text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_queue(mut self, queue: VecDeque<String>) -> Self {
        self.follow_up_queue = if queue.is_empty() { None } else { Some(queue) };
        self
    }

    pub fn state(&self) -> PendingState {
        if self.action_id.is_some() {
            PendingState::AwaitingConfirm
        } else {
            PendingState::AwaitingPick
        }
    }

    pub fn queue_len(&self) -> usize {
        self.follow_up_queue.as_ref().map_or(0, VecDeque::len)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_name_aliases() {
        assert_eq!(ActionKind::from_tool_name("delete_task"), Some(ActionKind::MoveToDeprecated));
        assert_eq!(ActionKind::from_tool_name("Complete-Task"), Some(ActionKind::MarkDone));
        assert_eq!(ActionKind::from_tool_name("pick_platform_create"), None);
        assert_eq!(ActionKind::from_tool_name("weather"), None);
    }

    #[test]
    fn test_intent_from_planner_json() {
        let intent = Intent::from_json(
            r#"{"toolKind": "mark_done", "arguments": {"taskIndex": 2}, "rawUserText": "done with 2"}"#,
        )
        .unwrap();
        assert_eq!(intent.kind, ActionKind::MarkDone);
        assert_eq!(intent.domain(), Domain::Task);
        assert_eq!(intent.arguments["taskIndex"], json!(2));
        assert_eq!(intent.raw_text, "done with 2");
    }

    #[test]
    fn test_intent_unknown_tool() {
        let err = Intent::from_json(r#"{"tool": "get_weather"}"#).unwrap_err();
        assert!(err.to_string().contains("get_weather"));
    }

    #[test]
    fn test_shared_kind_domain_from_arguments() {
        let mut args = Map::new();
        args.insert("domain".into(), json!("journal"));
        let intent = Intent::new(ActionKind::AppendDescription, args, "");
        assert_eq!(intent.domain(), Domain::Journal);

        let intent = Intent::new(ActionKind::AppendDescription, Map::new(), "");
        assert_eq!(intent.domain(), Domain::Task);
    }

    #[test]
    fn test_record_activity() {
        assert!(Record::new("1", "a").is_active());
        assert!(Record::new("1", "a").with_field("status", json!("Done")).is_active());
        assert!(!Record::new("1", "a").with_field("archived", json!(true)).is_active());
        assert!(!Record::new("1", "a").with_field("status", json!("Deprecated")).is_active());
    }

    #[test]
    fn test_record_flattened_fields() {
        let record: Record =
            serde_json::from_value(json!({"id": "t1", "title": "Task A", "status": "Open"})).unwrap();
        assert_eq!(record.text_field("status"), Some("Open"));
        assert!(!record.fields.contains_key("id"));
    }

    #[test]
    fn test_pending_state_follows_action_id() {
        let pick = PendingAction::awaiting_pick(ActionKind::MarkDone, Domain::Task, vec![], Map::new(), "");
        assert_eq!(pick.state(), PendingState::AwaitingPick);
        let confirm =
            PendingAction::awaiting_confirm(ActionKind::MarkDone, Domain::Task, None, Map::new(), "");
        assert_eq!(confirm.state(), PendingState::AwaitingConfirm);
    }

    #[test]
    fn test_action_id_round_trips_through_display() {
        let id = ActionId::new();
        assert_eq!(ActionId::parse(&id.to_string()), Some(id));
        assert_eq!(ActionId::parse("nope"), None);
    }
}
