//! Unit tests for `FlexTaskRepo` upserts and the conversation lookup.

use std::sync::Arc;

use chrono::{Duration, Utc};

use task_autopilot::models::flex_task::FlexTaskBaseState;
use task_autopilot::persistence::{db, flex_repo::FlexTaskRepo};

async fn test_repo() -> FlexTaskRepo {
    let database = db::connect_memory().await.expect("db connect");
    FlexTaskRepo::new(Arc::new(database))
}

fn sample_state(conversation_sid: &str) -> FlexTaskBaseState {
    FlexTaskBaseState {
        conversation_sid: Some(conversation_sid.to_owned()),
        channel_type: Some("sms".to_owned()),
        customer_name: Some("Ana".to_owned()),
        customer_address: Some("+5511999990001".to_owned()),
        customer_from: Some("+5511999990001".to_owned()),
        worker_sid: Some("WK001".to_owned()),
        worker_name: Some("Bia".to_owned()),
        task_assignment_status: Some("assigned".to_owned()),
        task_attributes: Some(r#"{"conversationSid":"CH001"}"#.to_owned()),
    }
}

#[tokio::test]
async fn upsert_inserts_row_and_lookup_entry() {
    let repo = test_repo().await;
    repo.upsert_base_state("WT001", &sample_state("CH001"), Utc::now())
        .await
        .expect("upsert");

    let by_sid = repo
        .get_by_task_sid("WT001")
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(by_sid.conversation_sid.as_deref(), Some("CH001"));
    assert_eq!(by_sid.worker_name.as_deref(), Some("Bia"));

    let by_conversation = repo
        .get_by_conversation_sid("CH001")
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(by_conversation.task_sid, "WT001");
}

#[tokio::test]
async fn upsert_refreshes_observed_state_but_not_epoch_marks() {
    let repo = test_repo().await;
    repo.upsert_base_state("WT002", &sample_state("CH002"), Utc::now())
        .await
        .expect("insert");

    let greeted_at = Utc::now();
    repo.set_greeting_sent("WT002", greeted_at).await.expect("greet");
    repo.mark_ping_sent("WT002", greeted_at + Duration::seconds(5))
        .await
        .expect("ping");

    let mut refreshed = sample_state("CH002");
    refreshed.worker_name = Some("Carla".to_owned());
    repo.upsert_base_state("WT002", &refreshed, Utc::now())
        .await
        .expect("re-upsert");

    let row = repo
        .get_by_task_sid("WT002")
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(row.worker_name.as_deref(), Some("Carla"));
    assert_eq!(row.greeting_sent_at, Some(greeted_at));
    assert!(row.ping_sent_at.is_some());
}

#[tokio::test]
async fn conversation_lookup_is_last_write_wins() {
    let repo = test_repo().await;
    repo.upsert_base_state("WT003", &sample_state("CH003"), Utc::now())
        .await
        .expect("first");
    repo.upsert_base_state("WT004", &sample_state("CH003"), Utc::now())
        .await
        .expect("second");

    let row = repo
        .get_by_conversation_sid("CH003")
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(row.task_sid, "WT004");
}

#[tokio::test]
async fn dangling_lookup_entry_yields_none() {
    let repo = test_repo().await;
    let database = db::connect_memory().await.expect("db connect");
    let repo_with_dangling = FlexTaskRepo::new(Arc::new(database.clone()));

    sqlx::query(
        "INSERT INTO flex_tasks_by_conversation (conversation_sid, task_sid) VALUES ('CHX', 'WTX')",
    )
    .execute(&database)
    .await
    .expect("seed dangling entry");

    let row = repo_with_dangling
        .get_by_conversation_sid("CHX")
        .await
        .expect("query");
    assert!(row.is_none());

    let missing = repo.get_by_conversation_sid("CH-missing").await.expect("query");
    assert!(missing.is_none());
}

#[tokio::test]
async fn set_greeting_sent_clears_previous_epoch_marks() {
    let repo = test_repo().await;
    repo.upsert_base_state("WT005", &sample_state("CH005"), Utc::now())
        .await
        .expect("insert");

    let first_epoch = Utc::now() - Duration::minutes(1);
    repo.set_greeting_sent("WT005", first_epoch).await.expect("greet");
    repo.mark_ping_sent("WT005", first_epoch + Duration::seconds(5))
        .await
        .expect("ping");
    repo.mark_inactive_sent("WT005", first_epoch + Duration::seconds(30))
        .await
        .expect("inactive");

    let second_epoch = Utc::now();
    repo.set_greeting_sent("WT005", second_epoch).await.expect("regreet");

    let row = repo
        .get_by_task_sid("WT005")
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(row.greeting_sent_at, Some(second_epoch));
    assert!(row.ping_sent_at.is_none());
    assert!(row.inactive_sent_at.is_none());
}

#[tokio::test]
async fn inactive_mark_writes_at_most_once_per_epoch() {
    let repo = test_repo().await;
    repo.upsert_base_state("WT006", &sample_state("CH006"), Utc::now())
        .await
        .expect("insert");
    repo.set_greeting_sent("WT006", Utc::now()).await.expect("greet");

    let first = Utc::now();
    repo.mark_inactive_sent("WT006", first).await.expect("inactive 1");
    repo.mark_inactive_sent("WT006", first + Duration::seconds(30))
        .await
        .expect("inactive 2 is a no-op");

    let row = repo
        .get_by_task_sid("WT006")
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(row.inactive_sent_at, Some(first));
}

#[tokio::test]
async fn mark_customer_activity_updates_timestamp() {
    let repo = test_repo().await;
    repo.upsert_base_state("WT007", &sample_state("CH007"), Utc::now())
        .await
        .expect("insert");

    let at = Utc::now();
    repo.mark_customer_activity("WT007", at).await.expect("activity");

    let row = repo
        .get_by_task_sid("WT007")
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(row.last_customer_activity_at, Some(at));
}
