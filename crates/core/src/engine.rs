//! Action engine
//!
//! The two entry points of the library. [`Engine::execute_tool_plan`] takes a
//! planner intent through normalization, dedup and resolution and leaves at
//! most one pending action behind. [`Engine::handle_confirmation_event`]
//! feeds a user response through the gateway and runs whatever it confirms.
//!
//! Each call holds the conversation's slot for its whole duration, including
//! store calls and batch continuation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::classify::PhraseTable;
use crate::config::{Config, EngineSettings};
use crate::dedup::find_duplicate;
use crate::error::{EngineError, MutationError};
use crate::executor::{ExecutionReport, Executor};
use crate::gateway::{self, ConfirmationEvent, Transition};
use crate::options::{normalize_fields, NormalizeContext};
use crate::pending::{PendingActionStore, SlotGuard};
use crate::ports::{Keyboard, MessageRef, OptionCatalog, Presenter, RecordStore, ReplyClassifier, ShownLists, Stores};
use crate::render;
use crate::resolver::{self, Resolution, ResolveContext};
use crate::types::{
    ActionId, ActionKind, Candidate, ConversationId, Domain, Intent, PendingAction, ResolvedTarget,
};

/// Argument keys carrying the text of an append-description request
const APPEND_TEXT_KEYS: &[&str] = &["text", "description", "note", "content"];

// ============================================================================
// Outcome
// ============================================================================

/// What one call did. User-facing messages have already been sent.
#[derive(Debug, Clone)]
pub enum Outcome {
    Executed(ExecutionReport),
    /// An execution followed by the next step of its batch queue
    Continued {
        executed: ExecutionReport,
        next: Box<Outcome>,
    },
    AwaitingPick {
        kind: ActionKind,
        candidates: Vec<Candidate>,
    },
    AwaitingConfirm {
        kind: ActionKind,
        action_id: ActionId,
        target: Option<ResolvedTarget>,
        duplicate_of: Option<ResolvedTarget>,
    },
    NotFound {
        domain: Domain,
        reference: Option<String>,
    },
    NothingToDo {
        reason: String,
    },
    Cancelled {
        kind: ActionKind,
    },
    Stale,
    InvalidPick {
        index: usize,
    },
    Failed(MutationError),
    /// Not a response to the pending action; hand the text to the planner
    Reinterpret(String),
}

impl Outcome {
    /// The last step of a chain
    pub fn last(&self) -> &Outcome {
        match self {
            Outcome::Continued { next, .. } => next.last(),
            other => other,
        }
    }

    /// Id of the confirmation this outcome is waiting for, if any
    pub fn action_id(&self) -> Option<ActionId> {
        match self.last() {
            Outcome::AwaitingConfirm { action_id, .. } => Some(*action_id),
            _ => None,
        }
    }

    /// Execution reports in order
    pub fn executed(&self) -> Vec<&ExecutionReport> {
        match self {
            Outcome::Executed(report) => vec![report],
            Outcome::Continued { executed, next } => {
                let mut reports = vec![executed];
                reports.extend(next.executed());
                reports
            }
            _ => Vec::new(),
        }
    }

    fn chain(mut outcomes: Vec<Outcome>) -> Outcome {
        let mut acc = outcomes.pop().unwrap_or(Outcome::NothingToDo {
            reason: "no steps".to_string(),
        });
        while let Some(previous) = outcomes.pop() {
            acc = match previous {
                Outcome::Executed(executed) => Outcome::Continued {
                    executed,
                    next: Box::new(acc),
                },
                other => other,
            };
        }
        acc
    }
}

/// Unit of work of one call
enum Step {
    Execute(PendingAction),
    /// Resolve the next queued reference of a batch
    Continue {
        kind: ActionKind,
        domain: Domain,
        raw_text: String,
        queue: VecDeque<String>,
    },
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    stores: Stores,
    shown: Arc<dyn ShownLists>,
    presenter: Arc<dyn Presenter>,
    catalog: Arc<dyn OptionCatalog>,
    classifier: Option<Arc<dyn ReplyClassifier>>,
    pending: PendingActionStore,
    phrases: PhraseTable,
    settings: EngineSettings,
    aliases: HashMap<String, String>,
}

impl Engine {
    pub fn new(
        config: &Config,
        stores: Stores,
        shown: Arc<dyn ShownLists>,
        presenter: Arc<dyn Presenter>,
        catalog: Arc<dyn OptionCatalog>,
    ) -> Self {
        Self {
            stores,
            shown,
            presenter,
            catalog,
            classifier: None,
            pending: PendingActionStore::new(config.engine.pending_ttl_secs),
            phrases: PhraseTable::default(),
            settings: config.engine.clone(),
            aliases: config.aliases.clone(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ReplyClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_phrases(mut self, phrases: PhraseTable) -> Self {
        self.phrases = phrases;
        self
    }

    pub fn pending(&self) -> &PendingActionStore {
        &self.pending
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Consume a planner intent.
    pub async fn execute_tool_plan(
        &self,
        conversation: &ConversationId,
        intent: Intent,
    ) -> Result<Outcome, EngineError> {
        let mut slot = self.pending.lock(conversation).await;
        let domain = intent.domain();
        info!(conversation = %conversation, kind = %intent.kind, domain = %domain, "tool plan");

        let store = match self.stores.get(domain) {
            Ok(store) => store.clone(),
            Err(e) => return self.fail(conversation, e).await,
        };

        if intent.kind.is_create() {
            self.plan_create(&mut slot, &intent, store.as_ref()).await
        } else {
            self.plan_targeted(&mut slot, &intent, store.as_ref()).await
        }
    }

    /// Consume a callback token or free-text reply.
    pub async fn handle_confirmation_event(
        &self,
        conversation: &ConversationId,
        event: ConfirmationEvent,
    ) -> Result<Outcome, EngineError> {
        let mut slot = self.pending.lock(conversation).await;
        let transition =
            gateway::apply(&mut slot, event, &self.phrases, self.classifier.as_deref()).await;

        match transition {
            Transition::Execute(action) => self.run(&mut slot, VecDeque::from([Step::Execute(action)])).await,
            Transition::Cancelled(action) => {
                self.say(conversation, render::CANCELLED, None).await?;
                Ok(Outcome::Cancelled { kind: action.kind })
            }
            Transition::Bound(action) => self.prompt_confirm(conversation, &action, None).await,
            Transition::InvalidPick { index, len } => {
                self.say(conversation, &render::invalid_pick(index, len), None).await?;
                Ok(Outcome::InvalidPick { index })
            }
            Transition::Stale => {
                self.say(conversation, render::STALE, None).await?;
                Ok(Outcome::Stale)
            }
            Transition::Reinterpret(text) => Ok(Outcome::Reinterpret(text)),
        }
    }

    /// Parse `input` as a callback token or free text and handle it.
    pub async fn handle_reply(&self, conversation: &ConversationId, input: &str) -> Result<Outcome, EngineError> {
        self.handle_confirmation_event(conversation, ConfirmationEvent::parse(input)).await
    }

    // ========================================================================
    // Planning
    // ========================================================================

    async fn plan_create(
        &self,
        slot: &mut SlotGuard,
        intent: &Intent,
        store: &dyn RecordStore,
    ) -> Result<Outcome, EngineError> {
        let conversation = slot.conversation().clone();
        let domain = intent.domain();
        let normalized = normalize_fields(domain, &intent.arguments, self.catalog.as_ref(), &self.normalize_context(intent)).await;
        let note = render::dropped_fields(&normalized.dropped);

        let title = normalized
            .fields
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let duplicate = match find_duplicate(store, &title, self.settings.find_limit).await {
            Ok(hit) => hit.map(|r| r.as_target(domain)),
            Err(e) => return self.fail(&conversation, e).await,
        };
        let needs_platform = domain == Domain::Social
            && !normalized.fields.get("platform").is_some_and(Value::is_string);
        let payload = normalized.into_payload();

        if needs_platform {
            let candidates = self.platform_candidates().await;
            if candidates.is_empty() {
                return self.nothing_to_do(&conversation, "No platforms are configured.").await;
            }
            let mut action =
                PendingAction::awaiting_pick(ActionKind::PickPlatformCreate, domain, candidates, payload, &intent.raw_text);
            action.duplicate_of = duplicate;
            return self.prompt_pick(slot, action, note).await;
        }

        if let Some(existing) = duplicate {
            info!(conversation = %conversation, existing = %existing.id, "duplicate title, asking first");
            let mut action = PendingAction::awaiting_confirm(intent.kind, domain, None, payload, &intent.raw_text);
            action.duplicate_of = Some(existing);
            slot.replace(action.clone());
            return self.prompt_confirm(&conversation, &action, note).await;
        }

        let action = PendingAction::awaiting_confirm(intent.kind, domain, None, payload, &intent.raw_text);
        let outcome = self.run(slot, VecDeque::from([Step::Execute(action)])).await?;
        if let Some(note) = note {
            self.say(&conversation, &note, None).await?;
        }
        Ok(outcome)
    }

    async fn plan_targeted(
        &self,
        slot: &mut SlotGuard,
        intent: &Intent,
        store: &dyn RecordStore,
    ) -> Result<Outcome, EngineError> {
        let conversation = slot.conversation().clone();
        let domain = intent.domain();
        let mut payload = Map::new();
        let mut note = None;
        let mut platform_only = false;

        if intent.kind.is_update() {
            let normalized =
                normalize_fields(domain, &intent.arguments, self.catalog.as_ref(), &self.normalize_context(intent)).await;
            note = render::dropped_fields(&normalized.dropped);
            if normalized.is_empty() {
                if domain == Domain::Social && normalized.was_dropped("platform") {
                    platform_only = true;
                } else {
                    let text = match note {
                        Some(note) => format!("{}\n{}", render::NOTHING_TO_CHANGE, note),
                        None => render::NOTHING_TO_CHANGE.to_string(),
                    };
                    return self.nothing_to_do(&conversation, &text).await;
                }
            }
            payload = normalized.into_payload();
        } else if intent.kind == ActionKind::AppendDescription {
            let Some(text) = intent.str_arg(APPEND_TEXT_KEYS) else {
                let reason = EngineError::MissingArgument("text".to_string()).to_string();
                warn!(conversation = %conversation, "{}", reason);
                return self.nothing_to_do(&conversation, "What should I add to it?").await;
            };
            payload.insert("text".to_string(), Value::String(text));
        }

        let ctx = self.resolve_context(&conversation, domain, store);
        let resolved = match resolver::resolve(intent, &ctx).await {
            Ok(resolved) => resolved,
            Err(e) => return self.fail(&conversation, e).await,
        };

        match resolved.resolution {
            Resolution::Empty => {
                let reference = resolved.reference;
                self.say(&conversation, &render::not_found(domain, reference.as_deref()), None)
                    .await?;
                Ok(Outcome::NotFound { domain, reference })
            }
            Resolution::Single(target) if platform_only => {
                let candidates = self.platform_candidates().await;
                let mut action = PendingAction::awaiting_pick(
                    ActionKind::PickPlatformUpdate,
                    domain,
                    candidates,
                    Map::new(),
                    &intent.raw_text,
                );
                action.target = Some(target);
                self.prompt_pick(slot, action, note).await
            }
            Resolution::Single(target) => {
                let action =
                    PendingAction::awaiting_confirm(intent.kind, domain, Some(target), payload, &intent.raw_text)
                        .with_queue(resolved.queue);
                slot.replace(action.clone());
                self.prompt_confirm(&conversation, &action, note).await
            }
            Resolution::Candidates(_) if platform_only => {
                self.nothing_to_do(
                    &conversation,
                    &format!("Several {}s match. Which one should move platform?", domain.label()),
                )
                .await
            }
            Resolution::Candidates(candidates) => {
                let action =
                    PendingAction::awaiting_pick(intent.kind, domain, candidates, payload, &intent.raw_text)
                        .with_queue(resolved.queue);
                self.prompt_pick(slot, action, note).await
            }
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Drain the work queue. Only a successful batch step adds work.
    async fn run(&self, slot: &mut SlotGuard, mut steps: VecDeque<Step>) -> Result<Outcome, EngineError> {
        let conversation = slot.conversation().clone();
        let mut outcomes = Vec::new();

        while let Some(step) = steps.pop_front() {
            match step {
                Step::Execute(action) => {
                    let executor = Executor {
                        stores: &self.stores,
                        catalog: self.catalog.as_ref(),
                        phrases: &self.phrases,
                        aliases: &self.aliases,
                    };
                    match executor.execute(&action).await {
                        Ok(report) => {
                            self.say(&conversation, &report.summary, None).await?;
                            if action.kind.is_batch_capable() {
                                if let Some(queue) = action.follow_up_queue.filter(|q| !q.is_empty()) {
                                    steps.push_back(Step::Continue {
                                        kind: action.kind,
                                        domain: action.domain,
                                        raw_text: action.raw_text,
                                        queue,
                                    });
                                }
                            }
                            outcomes.push(Outcome::Executed(report));
                        }
                        Err(e) => {
                            if action.queue_len() > 0 {
                                info!(conversation = %conversation, dropped = action.queue_len(), "batch queue dropped after failure");
                            }
                            outcomes.push(self.fail(&conversation, e).await?);
                        }
                    }
                }
                Step::Continue { kind, domain, raw_text, queue } => {
                    outcomes.push(self.continue_batch(slot, kind, domain, raw_text, queue).await?);
                }
            }
        }

        Ok(Outcome::chain(outcomes))
    }

    async fn continue_batch(
        &self,
        slot: &mut SlotGuard,
        kind: ActionKind,
        domain: Domain,
        raw_text: String,
        queue: VecDeque<String>,
    ) -> Result<Outcome, EngineError> {
        let conversation = slot.conversation().clone();
        let store = match self.stores.get(domain) {
            Ok(store) => store.clone(),
            Err(e) => return self.fail(&conversation, e).await,
        };
        info!(conversation = %conversation, kind = %kind, remaining = queue.len(), "continuing batch");

        let ctx = self.resolve_context(&conversation, domain, store.as_ref());
        let resolved = match resolver::resolve_queue(queue, &ctx).await {
            Ok(resolved) => resolved,
            Err(e) => return self.fail(&conversation, e).await,
        };

        match resolved.resolution {
            Resolution::Single(target) => {
                let action = PendingAction::awaiting_confirm(kind, domain, Some(target), Map::new(), raw_text)
                    .with_queue(resolved.queue);
                slot.replace(action.clone());
                self.prompt_confirm(&conversation, &action, None).await
            }
            Resolution::Candidates(candidates) => {
                let action = PendingAction::awaiting_pick(kind, domain, candidates, Map::new(), raw_text)
                    .with_queue(resolved.queue);
                self.prompt_pick(slot, action, None).await
            }
            Resolution::Empty => {
                let reference = resolved.reference;
                self.say(&conversation, &render::queue_dropped(domain, reference.as_deref()), None)
                    .await?;
                Ok(Outcome::NotFound { domain, reference })
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn normalize_context<'a>(&'a self, intent: &'a Intent) -> NormalizeContext<'a> {
        NormalizeContext {
            raw_text: &intent.raw_text,
            phrases: &self.phrases,
            aliases: &self.aliases,
        }
    }

    fn resolve_context<'a>(
        &'a self,
        conversation: &'a ConversationId,
        domain: Domain,
        store: &'a dyn RecordStore,
    ) -> ResolveContext<'a> {
        ResolveContext {
            conversation,
            domain,
            store,
            shown: self.shown.as_ref(),
            phrases: &self.phrases,
            settings: &self.settings,
        }
    }

    async fn platform_candidates(&self) -> Vec<Candidate> {
        self.catalog
            .legal_options(Domain::Social, "platform")
            .await
            .into_iter()
            .take(self.settings.max_candidates())
            .enumerate()
            .map(|(i, platform)| Candidate {
                index: i + 1,
                id: platform.clone(),
                title: platform,
            })
            .collect()
    }

    async fn prompt_pick(
        &self,
        slot: &mut SlotGuard,
        action: PendingAction,
        note: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let conversation = slot.conversation().clone();
        let candidates = action.candidates.clone().unwrap_or_default();
        let text = with_note(render::pick_prompt(&action, &candidates), note);
        let kind = action.kind;
        slot.replace(action);
        info!(conversation = %conversation, kind = %kind, candidates = candidates.len(), "awaiting pick");
        self.say(&conversation, &text, Some(&render::pick_keyboard(&candidates))).await?;
        Ok(Outcome::AwaitingPick { kind, candidates })
    }

    async fn prompt_confirm(
        &self,
        conversation: &ConversationId,
        action: &PendingAction,
        note: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let Some(action_id) = action.action_id else {
            return self.nothing_to_do(conversation, "Nothing to confirm.").await;
        };
        let text = with_note(render::confirm_prompt(action), note);
        info!(conversation = %conversation, kind = %action.kind, "awaiting confirmation");
        self.say(conversation, &text, Some(&render::confirm_keyboard(&action_id))).await?;
        Ok(Outcome::AwaitingConfirm {
            kind: action.kind,
            action_id,
            target: action.target.clone(),
            duplicate_of: action.duplicate_of.clone(),
        })
    }

    async fn nothing_to_do(&self, conversation: &ConversationId, text: &str) -> Result<Outcome, EngineError> {
        self.say(conversation, text, None).await?;
        Ok(Outcome::NothingToDo {
            reason: text.to_string(),
        })
    }

    async fn fail(&self, conversation: &ConversationId, error: MutationError) -> Result<Outcome, EngineError> {
        warn!(
            conversation = %conversation,
            operation = %error.operation,
            domain = %error.domain,
            status = ?error.status,
            request_id = ?error.request_id,
            "mutation failed: {}",
            error.message
        );
        self.say(conversation, &error.user_message(self.settings.debug_errors), None)
            .await?;
        Ok(Outcome::Failed(error))
    }

    async fn say(
        &self,
        conversation: &ConversationId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, EngineError> {
        self.presenter
            .send_message(conversation, text, keyboard)
            .await
            .map_err(EngineError::Presentation)
    }
}

fn with_note(text: String, note: Option<String>) -> String {
    match note {
        Some(note) => format!("{}\n{}", text, note),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryShownLists, InMemoryStore, RecordingPresenter, StaticOptionCatalog};
    use crate::types::Record;
    use serde_json::json;

    struct Harness {
        engine: Engine,
        tasks: Arc<InMemoryStore>,
        social: Arc<InMemoryStore>,
        presenter: Arc<RecordingPresenter>,
    }

    fn harness() -> Harness {
        let config = Config::default();
        let tasks = Arc::new(InMemoryStore::with_records(
            Domain::Task,
            vec![Record::new("t1", "Write report"), Record::new("t2", "Review report")],
        ));
        let social = Arc::new(InMemoryStore::with_records(
            Domain::Social,
            vec![Record::new("s1", "Launch teaser").with_field("platform", json!("X"))],
        ));
        let presenter = Arc::new(RecordingPresenter::new());
        let engine = Engine::new(
            &config,
            Stores::new().with(tasks.clone()).with(social.clone()),
            Arc::new(InMemoryShownLists::new()),
            presenter.clone(),
            Arc::new(StaticOptionCatalog::from_config(&config)),
        );
        Harness { engine, tasks, social, presenter }
    }

    fn intent(kind: ActionKind, args: Value, raw: &str) -> Intent {
        Intent::new(kind, args.as_object().cloned().unwrap_or_default(), raw)
    }

    #[tokio::test]
    async fn test_pick_then_confirm_executes_once() {
        let h = harness();
        let conv = ConversationId::new("c1");
        let outcome = h
            .engine
            .execute_tool_plan(&conv, intent(ActionKind::MarkDone, json!({"query": "report"}), "finish the report"))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::AwaitingPick { ref candidates, .. } if candidates.len() == 2));

        let outcome = h.engine.handle_reply(&conv, "pick:2").await.unwrap();
        let id = outcome.action_id().expect("awaiting confirmation");
        assert!(h.presenter.last().unwrap().text.contains("Review report"));

        let outcome = h.engine.handle_reply(&conv, &format!("confirm:{}", id)).await.unwrap();
        assert_eq!(outcome.executed().len(), 1);
        assert_eq!(h.tasks.calls(), vec!["mark_done:t2"]);
        assert!(h.engine.pending().snapshot(&conv).await.is_none());

        // A replayed confirmation is stale and does nothing
        let outcome = h.engine.handle_reply(&conv, &format!("confirm:{}", id)).await.unwrap();
        assert!(matches!(outcome, Outcome::Stale));
        assert_eq!(h.tasks.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_stores_nothing() {
        let h = harness();
        let conv = ConversationId::new("c1");
        let outcome = h
            .engine
            .execute_tool_plan(&conv, intent(ActionKind::MarkDone, json!({"query": "taxes"}), ""))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::NotFound { .. }));
        assert!(h.engine.pending().snapshot(&conv).await.is_none());
        assert!(h.presenter.last().unwrap().text.contains("taxes"));
    }

    #[tokio::test]
    async fn test_update_with_only_unknown_values_changes_nothing() {
        let h = harness();
        let conv = ConversationId::new("c1");
        let outcome = h
            .engine
            .execute_tool_plan(&conv, intent(ActionKind::UpdateTask, json!({"taskId": "t1", "priority": "purple"}), ""))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::NothingToDo { .. }));
        assert!(h.presenter.last().unwrap().text.contains("priority \"purple\""));
        assert!(h.engine.pending().snapshot(&conv).await.is_none());
    }

    #[tokio::test]
    async fn test_social_create_without_platform_asks_for_one() {
        let h = harness();
        let conv = ConversationId::new("c1");
        let outcome = h
            .engine
            .execute_tool_plan(&conv, intent(ActionKind::CreateSocialPost, json!({"title": "Summer recap"}), ""))
            .await
            .unwrap();
        match outcome {
            Outcome::AwaitingPick { kind, candidates } => {
                assert_eq!(kind, ActionKind::PickPlatformCreate);
                assert_eq!(candidates[1].title, "LinkedIn");
            }
            other => panic!("expected platform pick, got {:?}", other),
        }

        let outcome = h.engine.handle_reply(&conv, "2").await.unwrap();
        let id = outcome.action_id().unwrap();
        assert!(h.presenter.last().unwrap().text.contains("on LinkedIn"));
        h.engine.handle_reply(&conv, &format!("confirm:{}", id)).await.unwrap();

        let created = h.social.snapshot().into_iter().find(|r| r.title == "Summer recap").unwrap();
        assert_eq!(created.text_field("platform"), Some("LinkedIn"));
    }

    #[tokio::test]
    async fn test_unmatched_platform_update_picks_platform() {
        let h = harness();
        let conv = ConversationId::new("c1");
        let outcome = h
            .engine
            .execute_tool_plan(
                &conv,
                intent(ActionKind::UpdateSocialPost, json!({"query": "teaser", "platform": "Myspace"}), ""),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::AwaitingPick { kind: ActionKind::PickPlatformUpdate, .. }));

        let outcome = h.engine.handle_reply(&conv, "pick:1").await.unwrap();
        let id = outcome.action_id().unwrap();
        h.engine.handle_reply(&conv, &format!("confirm:{}", id)).await.unwrap();
        assert_eq!(h.social.snapshot()[0].text_field("platform"), Some("Instagram"));
        assert_eq!(h.social.calls(), vec!["update:s1"]);
    }

    #[tokio::test]
    async fn test_failed_execution_clears_slot() {
        let h = harness();
        let conv = ConversationId::new("c1");
        h.tasks.fail_on("move_to_deprecated");
        let outcome = h
            .engine
            .execute_tool_plan(&conv, intent(ActionKind::MoveToDeprecated, json!({"taskId": "t1"}), ""))
            .await
            .unwrap();
        let id = outcome.action_id().unwrap();

        let outcome = h.engine.handle_reply(&conv, &format!("confirm:{}", id)).await.unwrap();
        match outcome {
            Outcome::Failed(err) => assert_eq!(err.status, Some(500)),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(h.presenter.last().unwrap().text, "Sorry, I couldn't update the task.");
        assert!(h.engine.pending().snapshot(&conv).await.is_none());
    }

    #[tokio::test]
    async fn test_append_description_requires_text() {
        let h = harness();
        let conv = ConversationId::new("c1");
        let outcome = h
            .engine
            .execute_tool_plan(&conv, intent(ActionKind::AppendDescription, json!({"taskId": "t1"}), ""))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::NothingToDo { .. }));
    }

    #[tokio::test]
    async fn test_unrelated_replies_leave_no_slots() {
        let h = harness();
        for i in 0..1000 {
            let conv = ConversationId::new(format!("c{}", i));
            let outcome = h.engine.handle_reply(&conv, "hello").await.unwrap();
            assert!(matches!(outcome, Outcome::Reinterpret(_)));
        }
        assert!(h.engine.pending().is_empty());

        let conv = ConversationId::new("c1");
        let outcome = h
            .engine
            .execute_tool_plan(&conv, intent(ActionKind::MarkDone, json!({"taskId": "t1"}), ""))
            .await
            .unwrap();
        assert_eq!(h.engine.pending().len(), 1);
        let id = outcome.action_id().unwrap();
        h.engine.handle_reply(&conv, &format!("confirm:{}", id)).await.unwrap();
        assert!(h.engine.pending().is_empty());
    }

    #[tokio::test]
    async fn test_free_text_reply_reinterprets_unrelated_text() {
        let h = harness();
        let conv = ConversationId::new("c1");
        h.engine
            .execute_tool_plan(&conv, intent(ActionKind::MarkDone, json!({"taskId": "t1"}), ""))
            .await
            .unwrap();
        let outcome = h.engine.handle_reply(&conv, "what is on my list for tomorrow morning then").await.unwrap();
        assert!(matches!(outcome, Outcome::Reinterpret(_)));
        assert!(h.engine.pending().snapshot(&conv).await.is_some());

        let outcome = h.engine.handle_reply(&conv, "yes").await.unwrap();
        assert_eq!(outcome.executed().len(), 1);
    }
}
