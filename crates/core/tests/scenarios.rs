//! End-to-end conversations against in-memory collaborators.

use std::sync::Arc;

use serde_json::{json, Value};

use chat_actions_core::memory::{InMemoryShownLists, InMemoryStore, RecordingPresenter, StaticOptionCatalog};
use chat_actions_core::options::match_option;
use chat_actions_core::{ActionKind, Config, ConversationId, Domain, Engine, Intent, Outcome, Record, Stores};

struct Chat {
    engine: Engine,
    tasks: Arc<InMemoryStore>,
    ideas: Arc<InMemoryStore>,
    shown: Arc<InMemoryShownLists>,
    presenter: Arc<RecordingPresenter>,
    conv: ConversationId,
}

fn chat(tasks: Vec<Record>, ideas: Vec<Record>) -> Chat {
    let config = Config::default();
    let tasks = Arc::new(InMemoryStore::with_records(Domain::Task, tasks));
    let ideas = Arc::new(InMemoryStore::with_records(Domain::Idea, ideas));
    let shown = Arc::new(InMemoryShownLists::new());
    let presenter = Arc::new(RecordingPresenter::new());
    let engine = Engine::new(
        &config,
        Stores::new().with(tasks.clone()).with(ideas.clone()),
        shown.clone(),
        presenter.clone(),
        Arc::new(StaticOptionCatalog::from_config(&config)),
    );
    Chat {
        engine,
        tasks,
        ideas,
        shown,
        presenter,
        conv: ConversationId::new("chat-1"),
    }
}

fn intent(kind: ActionKind, args: Value, raw: &str) -> Intent {
    Intent::new(kind, args.as_object().cloned().unwrap_or_default(), raw)
}

#[tokio::test]
async fn test_mark_done_by_shown_index() {
    let records = vec![Record::new("t1", "Task A"), Record::new("t2", "Task B")];
    let c = chat(records.clone(), vec![]);
    c.shown.record(&c.conv, Domain::Task, &records);

    let outcome = c
        .engine
        .execute_tool_plan(&c.conv, intent(ActionKind::MarkDone, json!({"taskIndex": 2}), "mark 2 done"))
        .await
        .unwrap();
    match &outcome {
        Outcome::AwaitingConfirm { target: Some(target), .. } => assert_eq!(target.id, "t2"),
        other => panic!("expected confirmation, got {:?}", other),
    }
    assert!(c.tasks.calls().is_empty());

    let id = outcome.action_id().unwrap();
    let outcome = c.engine.handle_reply(&c.conv, &format!("confirm:{}", id)).await.unwrap();
    assert_eq!(outcome.executed().len(), 1);
    assert_eq!(c.tasks.calls(), vec!["mark_done:t2"]);
    assert!(c.engine.pending().snapshot(&c.conv).await.is_none());
}

#[tokio::test]
async fn test_batch_skips_unmatched_segment() {
    let c = chat(vec![Record::new("t2", "Task B")], vec![]);

    let outcome = c
        .engine
        .execute_tool_plan(
            &c.conv,
            intent(ActionKind::MoveToDeprecated, json!({"queryText": "Task A; Task B"}), ""),
        )
        .await
        .unwrap();
    match &outcome {
        Outcome::AwaitingConfirm { target: Some(target), .. } => assert_eq!(target.id, "t2"),
        other => panic!("expected confirmation, got {:?}", other),
    }

    let pending = c.engine.pending().snapshot(&c.conv).await.unwrap();
    assert_eq!(pending.queue_len(), 0);
    let prompt = c.presenter.last().unwrap().text;
    assert!(prompt.contains("\"Task B\""));
    assert!(!prompt.contains("more queued"));
}

#[tokio::test]
async fn test_create_with_duplicate_title_asks_first() {
    let c = chat(vec![], vec![Record::new("i1", "dark mode")]);

    let outcome = c
        .engine
        .execute_tool_plan(&c.conv, intent(ActionKind::CreateIdea, json!({"title": "Dark mode"}), ""))
        .await
        .unwrap();
    match &outcome {
        Outcome::AwaitingConfirm { duplicate_of: Some(existing), .. } => assert_eq!(existing.id, "i1"),
        other => panic!("expected duplicate confirmation, got {:?}", other),
    }
    assert!(c.ideas.calls().is_empty());
    assert!(c.presenter.last().unwrap().text.contains("already exists"));

    let outcome = c.engine.handle_reply(&c.conv, "yes").await.unwrap();
    assert_eq!(outcome.executed().len(), 1);
    assert_eq!(c.ideas.snapshot().len(), 2);
}

#[tokio::test]
async fn test_create_without_duplicate_runs_immediately() {
    let c = chat(vec![], vec![Record::new("i1", "dark mode")]);

    let outcome = c
        .engine
        .execute_tool_plan(&c.conv, intent(ActionKind::CreateIdea, json!({"title": "Offline sync"}), ""))
        .await
        .unwrap();
    assert_eq!(outcome.executed().len(), 1);
    assert_eq!(c.ideas.calls().len(), 1);
    assert!(c.engine.pending().snapshot(&c.conv).await.is_none());
}

#[tokio::test]
async fn test_superseded_confirmation_never_mutates() {
    let c = chat(vec![Record::new("t1", "Task A"), Record::new("t2", "Task B")], vec![]);

    let first = c
        .engine
        .execute_tool_plan(&c.conv, intent(ActionKind::MarkDone, json!({"taskId": "t1"}), ""))
        .await
        .unwrap();
    let old_id = first.action_id().unwrap();

    let second = c
        .engine
        .execute_tool_plan(&c.conv, intent(ActionKind::MoveToDeprecated, json!({"taskId": "t2"}), ""))
        .await
        .unwrap();
    assert_ne!(second.action_id(), Some(old_id));

    let outcome = c.engine.handle_reply(&c.conv, &format!("confirm:{}", old_id)).await.unwrap();
    assert!(matches!(outcome, Outcome::Stale));
    assert!(c.tasks.calls().is_empty());

    // The newer action is still waiting
    let pending = c.engine.pending().snapshot(&c.conv).await.unwrap();
    assert_eq!(pending.kind, ActionKind::MoveToDeprecated);
}

#[tokio::test]
async fn test_cancel_clears_slot() {
    let c = chat(vec![Record::new("t1", "Task A")], vec![]);

    let outcome = c
        .engine
        .execute_tool_plan(&c.conv, intent(ActionKind::MarkDone, json!({"taskId": "t1"}), ""))
        .await
        .unwrap();
    let id = outcome.action_id().unwrap();

    let outcome = c.engine.handle_reply(&c.conv, &format!("cancel:{}", id)).await.unwrap();
    assert!(matches!(outcome, Outcome::Cancelled { kind: ActionKind::MarkDone }));
    assert!(c.engine.pending().snapshot(&c.conv).await.is_none());
    assert!(c.tasks.calls().is_empty());
}

#[tokio::test]
async fn test_candidates_never_exceed_ten() {
    let records: Vec<Record> = (1..=15)
        .map(|i| Record::new(format!("t{}", i), format!("Report {}", i)))
        .collect();
    let c = chat(records, vec![]);

    let outcome = c
        .engine
        .execute_tool_plan(&c.conv, intent(ActionKind::MarkDone, json!({"query": "report"}), ""))
        .await
        .unwrap();
    match outcome {
        Outcome::AwaitingPick { candidates, .. } => {
            assert!(candidates.len() <= 10);
            let indices: Vec<usize> = candidates.iter().map(|c| c.index).collect();
            assert_eq!(indices, (1..=candidates.len()).collect::<Vec<_>>());
        }
        other => panic!("expected pick, got {:?}", other),
    }
    assert!(c.presenter.last().unwrap().keyboard.unwrap().buttons().count() <= 10);
}

#[tokio::test]
async fn test_batch_queue_terminates() {
    let c = chat(
        vec![Record::new("t1", "Task A"), Record::new("t2", "Task B"), Record::new("t3", "Task C")],
        vec![],
    );

    let mut outcome = c
        .engine
        .execute_tool_plan(
            &c.conv,
            intent(ActionKind::MoveToDeprecated, json!({"queryText": "Task A; Task B; Task C"}), ""),
        )
        .await
        .unwrap();

    let mut cycles = 0;
    while let Some(id) = outcome.action_id() {
        cycles += 1;
        assert!(cycles <= 3, "batch of 3 ran more than 3 cycles");
        outcome = c.engine.handle_reply(&c.conv, &format!("confirm:{}", id)).await.unwrap();
        assert_eq!(outcome.executed().len(), 1);
    }

    assert_eq!(cycles, 3);
    assert_eq!(
        c.tasks.calls(),
        vec!["move_to_deprecated:t1", "move_to_deprecated:t2", "move_to_deprecated:t3"]
    );
    assert!(c.engine.pending().snapshot(&c.conv).await.is_none());
}

#[tokio::test]
async fn test_update_normalizes_priority_alias() {
    let c = chat(vec![Record::new("t1", "Task A").with_field("priority", json!("Low"))], vec![]);

    let outcome = c
        .engine
        .execute_tool_plan(&c.conv, intent(ActionKind::UpdateTask, json!({"taskId": "t1", "priority": "Medium"}), ""))
        .await
        .unwrap();
    let id = outcome.action_id().unwrap();
    assert!(c.presenter.last().unwrap().text.contains("Med"));

    c.engine.handle_reply(&c.conv, &format!("confirm:{}", id)).await.unwrap();
    assert_eq!(c.tasks.snapshot()[0].text_field("priority"), Some("Med"));
}

#[test]
fn test_option_match_alias_and_idempotence() {
    let config = Config::default();
    let legal: Vec<String> = vec!["Low".into(), "Med".into(), "High".into()];
    assert_eq!(match_option("Medium", &legal, &config.aliases).as_deref(), Some("Med"));
    for value in &legal {
        assert_eq!(match_option(value, &legal, &config.aliases).as_ref(), Some(value));
    }
}

#[tokio::test]
async fn test_concurrent_events_leave_one_pending_action() {
    let c = chat(vec![Record::new("t1", "Task A"), Record::new("t2", "Task B")], vec![]);

    let (a, b) = tokio::join!(
        c.engine
            .execute_tool_plan(&c.conv, intent(ActionKind::MarkDone, json!({"taskId": "t1"}), "")),
        c.engine
            .execute_tool_plan(&c.conv, intent(ActionKind::MarkDone, json!({"taskId": "t2"}), "")),
    );
    let ids = [a.unwrap().action_id().unwrap(), b.unwrap().action_id().unwrap()];

    let pending = c.engine.pending().snapshot(&c.conv).await.unwrap();
    let current = pending.action_id.unwrap();
    assert!(ids.contains(&current));
    assert_eq!(c.engine.pending().len(), 1);
}

#[tokio::test]
async fn test_batch_drops_queue_when_next_target_disappears() {
    use chat_actions_core::RecordStore;

    let c = chat(vec![Record::new("t1", "Task A"), Record::new("t2", "Task B")], vec![]);

    let outcome = c
        .engine
        .execute_tool_plan(
            &c.conv,
            intent(ActionKind::MoveToDeprecated, json!({"queryText": "Task A; Task B"}), ""),
        )
        .await
        .unwrap();
    let id = outcome.action_id().unwrap();

    // Task B leaves the active set before the continuation resolves it
    c.tasks.move_to_deprecated("t2").await.unwrap();

    let outcome = c.engine.handle_reply(&c.conv, &format!("confirm:{}", id)).await.unwrap();
    match &outcome {
        Outcome::Continued { executed, next } => {
            assert_eq!(executed.kind, ActionKind::MoveToDeprecated);
            match next.as_ref() {
                Outcome::NotFound { reference, .. } => assert_eq!(reference.as_deref(), Some("Task B")),
                other => panic!("expected not found, got {:?}", other),
            }
        }
        other => panic!("expected continuation, got {:?}", other),
    }
    assert!(c.presenter.last().unwrap().text.contains("Skipping the rest"));
    assert!(c.engine.pending().snapshot(&c.conv).await.is_none());
    assert_eq!(c.tasks.calls(), vec!["move_to_deprecated:t2", "move_to_deprecated:t1"]);
}
