//! End-to-end tests for the flex (provider-managed) pipeline.

use std::time::Duration;

use task_autopilot::config::TaskSource;
use task_autopilot::models::task::{InternalTask, TaskStatus};
use task_autopilot::provider::{Worker, Workspace};
use task_autopilot::templates;

use super::test_helpers::{
    accepted_reservation, customer_participant, identity_participant, provider_task,
    short_config, test_engine, FakeProvider,
};

const TASK_ATTRIBUTES: &str = r#"{
    "conversationSid": "CH001",
    "channelType": "sms",
    "customers": {"name": "Ana"},
    "from": "+5511999990001",
    "customerAddress": "+5511999990001"
}"#;

fn scripted_provider() -> std::sync::Arc<FakeProvider> {
    let provider = FakeProvider::new();
    {
        let mut state = provider.state();
        state.workspaces = vec![Workspace {
            sid: "WS1".to_owned(),
            friendly_name: "Flex Task Assignment".to_owned(),
        }];
        state.tasks = vec![provider_task("WT001", TASK_ATTRIBUTES)];
        state
            .reservations
            .insert("WT001".to_owned(), vec![accepted_reservation("WK001", "bia")]);
        state.workers.insert(
            "WK001".to_owned(),
            Worker {
                sid: "WK001".to_owned(),
                friendly_name: "bia".to_owned(),
                attributes: r#"{"full_name":"Bia Santos"}"#.to_owned(),
            },
        );
        state.participants.insert(
            "CH001".to_owned(),
            vec![customer_participant("P1", "+5511999990001")],
        );
    }
    provider
}

#[tokio::test]
async fn greeting_deferred_until_worker_participant_joins() {
    let provider = scripted_provider();
    let (engine, _db) = test_engine(
        Some(provider.clone()),
        Some("WS1"),
        short_config(5000, 30_000),
    )
    .await;

    // Tick 1: only the customer is in the conversation — no greeting yet.
    let produced = engine.process_flex().await.expect("tick 1");
    assert!(produced, "task was observed and upserted");
    assert!(provider.state().conversation_messages.is_empty());

    let row = engine
        .flex_repo()
        .get_by_task_sid("WT001")
        .await
        .expect("query")
        .expect("row upserted");
    assert_eq!(row.conversation_sid.as_deref(), Some("CH001"));
    assert_eq!(row.customer_name.as_deref(), Some("Ana"));
    assert_eq!(row.worker_name.as_deref(), Some("Bia Santos"));
    assert!(row.greeting_sent_at.is_none());

    // The operator joins; tick 2 greets exactly once, as the worker.
    provider
        .state()
        .participants
        .get_mut("CH001")
        .expect("conversation scripted")
        .push(identity_participant("P2", "WK001"));
    engine.process_flex().await.expect("tick 2");

    let state = provider.state();
    assert_eq!(state.conversation_messages.len(), 1);
    let (conversation, author, body) = &state.conversation_messages[0];
    assert_eq!(conversation, "CH001");
    assert_eq!(author, "WK001");
    assert_eq!(body, &templates::greeting_body("Ana", "Bia Santos"));
    assert_eq!(state.worker_fetches, 1, "worker resolved once, then cached");
    drop(state);

    let row = engine
        .flex_repo()
        .get_by_task_sid("WT001")
        .await
        .expect("query")
        .expect("exists");
    assert!(row.greeting_sent_at.is_some());
    assert!(engine.scheduler().has("WT001"));
}

#[tokio::test]
async fn silent_epoch_pings_closes_and_tears_down() {
    let provider = scripted_provider();
    provider
        .state()
        .participants
        .get_mut("CH001")
        .expect("conversation scripted")
        .push(identity_participant("P2", "WK001"));

    let (engine, _db) = test_engine(
        Some(provider.clone()),
        Some("WS1"),
        short_config(100, 300),
    )
    .await;

    engine.process_flex().await.expect("tick");
    tokio::time::sleep(Duration::from_millis(900)).await;

    let state = provider.state();
    assert_eq!(state.conversation_messages.len(), 3, "greeting, ping, closure");
    assert_eq!(state.conversation_messages[1].2, templates::ping_body("Ana"));
    assert_eq!(state.conversation_messages[2].2, templates::closure_body("Ana"));
    assert_eq!(state.closed_conversations, vec!["CH001".to_owned()]);
    assert_eq!(
        state.completed_tasks,
        vec![("WT001".to_owned(), "inactivity".to_owned())]
    );
    drop(state);

    let row = engine
        .flex_repo()
        .get_by_task_sid("WT001")
        .await
        .expect("query")
        .expect("exists");
    assert!(row.ping_sent_at.is_some());
    assert!(row.inactive_sent_at.is_some());
    assert!(!engine.scheduler().has("WT001"));
}

#[tokio::test]
async fn teardown_toggles_disable_close_and_complete() {
    let provider = scripted_provider();
    provider
        .state()
        .participants
        .get_mut("CH001")
        .expect("conversation scripted")
        .push(identity_participant("P2", "WK001"));

    let mut config = short_config(100, 300);
    config.close_conversation = false;
    config.complete_task = false;
    let (engine, _db) = test_engine(Some(provider.clone()), Some("WS1"), config).await;

    engine.process_flex().await.expect("tick");
    tokio::time::sleep(Duration::from_millis(900)).await;

    let state = provider.state();
    assert_eq!(state.conversation_messages.len(), 3);
    assert!(state.closed_conversations.is_empty());
    assert!(state.completed_tasks.is_empty());
}

#[tokio::test]
async fn customer_reply_cancels_flex_epoch() {
    let provider = scripted_provider();
    provider
        .state()
        .participants
        .get_mut("CH001")
        .expect("conversation scripted")
        .push(identity_participant("P2", "WK001"));

    let (engine, _db) = test_engine(
        Some(provider.clone()),
        Some("WS1"),
        short_config(150, 400),
    )
    .await;

    engine.process_flex().await.expect("tick");
    assert_eq!(provider.state().conversation_messages.len(), 1);

    // Customer message arrives through the webhook sink.
    engine
        .mark_activity_by_conversation("CH001", Some("+5511999990001"))
        .await;
    assert!(!engine.scheduler().has("WT001"));

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(
        provider.state().conversation_messages.len(),
        1,
        "no ping or closure after a customer reply"
    );
}

#[tokio::test]
async fn greeting_post_failure_leaves_no_mark_and_retries() {
    let provider = scripted_provider();
    {
        let mut state = provider.state();
        state
            .participants
            .get_mut("CH001")
            .expect("conversation scripted")
            .push(identity_participant("P2", "WK001"));
        state.fail_conversation_post = true;
    }
    let (engine, _db) = test_engine(
        Some(provider.clone()),
        Some("WS1"),
        short_config(5000, 30_000),
    )
    .await;

    engine.process_flex().await.expect("tick 1");
    let row = engine
        .flex_repo()
        .get_by_task_sid("WT001")
        .await
        .expect("query")
        .expect("exists");
    assert!(row.greeting_sent_at.is_none(), "failed post leaves no mark");
    assert!(!engine.scheduler().has("WT001"));

    provider.state().fail_conversation_post = false;
    engine.process_flex().await.expect("tick 2");

    let row = engine
        .flex_repo()
        .get_by_task_sid("WT001")
        .await
        .expect("query")
        .expect("exists");
    assert!(row.greeting_sent_at.is_some());
    assert_eq!(provider.state().conversation_messages.len(), 1);
}

#[tokio::test]
async fn non_conversation_tasks_are_ignored() {
    let provider = scripted_provider();
    provider.state().tasks = vec![provider_task("WT002", r#"{"channelType":"voice"}"#)];

    let (engine, _db) = test_engine(
        Some(provider.clone()),
        Some("WS1"),
        short_config(5000, 30_000),
    )
    .await;

    let produced = engine.process_flex().await.expect("tick");
    assert!(!produced, "voice task is not flex work");
}

#[tokio::test]
async fn no_reservation_means_no_work() {
    let provider = scripted_provider();
    provider.state().reservations.clear();

    let (engine, _db) = test_engine(
        Some(provider.clone()),
        Some("WS1"),
        short_config(5000, 30_000),
    )
    .await;

    let produced = engine.process_flex().await.expect("tick");
    assert!(!produced);
}

#[tokio::test]
async fn auto_mode_falls_through_to_internal_when_flex_is_idle() {
    let provider = scripted_provider();
    provider.state().tasks.clear();

    let mut config = short_config(5000, 30_000);
    config.source = TaskSource::Auto;
    let (engine, _db) = test_engine(Some(provider.clone()), Some("WS1"), config).await;

    let task = InternalTask::new("Ana".into(), "+5511999990009".into());
    engine.task_repo().create(&task).await.expect("create");
    engine
        .task_repo()
        .assign(&task.id, "O1", "Bia", chrono::Utc::now())
        .await
        .expect("assign");

    engine.tick().await;

    assert_eq!(provider.state().sms.len(), 1, "internal pipeline ran");
    let row = engine
        .task_repo()
        .get_by_id(&task.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(row.status, TaskStatus::Assigned);
    assert!(row.greeting_sent_at.is_some());
}

#[tokio::test]
async fn auto_mode_stops_at_flex_when_it_produced_work() {
    let provider = scripted_provider();

    let mut config = short_config(5000, 30_000);
    config.source = TaskSource::Auto;
    let (engine, _db) = test_engine(Some(provider.clone()), Some("WS1"), config).await;

    let task = InternalTask::new("Ana".into(), "+5511999990010".into());
    engine.task_repo().create(&task).await.expect("create");
    engine
        .task_repo()
        .assign(&task.id, "O1", "Bia", chrono::Utc::now())
        .await
        .expect("assign");

    engine.tick().await;

    assert!(
        provider.state().sms.is_empty(),
        "internal pipeline must not run when flex produced work"
    );
}

#[tokio::test]
async fn workspace_detected_by_flex_name() {
    let provider = scripted_provider();
    provider.state().workspaces = vec![
        Workspace {
            sid: "WS-A".to_owned(),
            friendly_name: "Support".to_owned(),
        },
        Workspace {
            sid: "WS-B".to_owned(),
            friendly_name: "Flex Task Assignment".to_owned(),
        },
    ];

    // No configured workspace: detection must pick the flex-named one.
    let (engine, _db) = test_engine(
        Some(provider.clone()),
        None,
        short_config(5000, 30_000),
    )
    .await;

    let produced = engine.process_flex().await.expect("tick");
    assert!(produced, "detection succeeded and the task was processed");
}

#[tokio::test]
async fn ambiguous_workspaces_disable_the_flex_pipeline() {
    let provider = scripted_provider();
    provider.state().workspaces = vec![
        Workspace {
            sid: "WS-A".to_owned(),
            friendly_name: "Alpha".to_owned(),
        },
        Workspace {
            sid: "WS-B".to_owned(),
            friendly_name: "Beta".to_owned(),
        },
    ];

    let (engine, _db) = test_engine(
        Some(provider.clone()),
        None,
        short_config(5000, 30_000),
    )
    .await;

    let produced = engine.process_flex().await.expect("tick");
    assert!(!produced, "unresolvable workspace reports no work");
}
