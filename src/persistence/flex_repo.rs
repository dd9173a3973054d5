//! Flex task repository for `SQLite` persistence.
//!
//! Rows mirror provider-managed tasks. Reads by conversation go through
//! the denormalized `flex_tasks_by_conversation` table rather than a
//! filtering scan of the primary table.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::flex_task::{FlexTask, FlexTaskBaseState};
use crate::Result;

use super::db::Database;
use super::task_repo::{parse_opt_ts, parse_ts};

/// Repository wrapper around `SQLite` for flex task records.
#[derive(Clone)]
pub struct FlexTaskRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct FlexTaskRow {
    task_sid: String,
    conversation_sid: Option<String>,
    channel_type: Option<String>,
    customer_name: Option<String>,
    customer_address: Option<String>,
    customer_from: Option<String>,
    worker_sid: Option<String>,
    worker_name: Option<String>,
    task_assignment_status: Option<String>,
    task_attributes: Option<String>,
    greeting_sent_at: Option<String>,
    ping_sent_at: Option<String>,
    inactive_sent_at: Option<String>,
    last_customer_activity_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl FlexTaskRow {
    /// Convert a database row into the domain model.
    fn into_flex_task(self) -> Result<FlexTask> {
        Ok(FlexTask {
            task_sid: self.task_sid,
            conversation_sid: self.conversation_sid,
            channel_type: self.channel_type,
            customer_name: self.customer_name,
            customer_address: self.customer_address,
            customer_from: self.customer_from,
            worker_sid: self.worker_sid,
            worker_name: self.worker_name,
            task_assignment_status: self.task_assignment_status,
            task_attributes: self.task_attributes,
            greeting_sent_at: parse_opt_ts("greeting_sent_at", self.greeting_sent_at)?,
            ping_sent_at: parse_opt_ts("ping_sent_at", self.ping_sent_at)?,
            inactive_sent_at: parse_opt_ts("inactive_sent_at", self.inactive_sent_at)?,
            last_customer_activity_at: parse_opt_ts(
                "last_customer_activity_at",
                self.last_customer_activity_at,
            )?,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

impl FlexTaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Retrieve a flex task by its provider task sid.
    ///
    /// Returns `Ok(None)` if the row does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_task_sid(&self, task_sid: &str) -> Result<Option<FlexTask>> {
        let row: Option<FlexTaskRow> =
            sqlx::query_as("SELECT * FROM flex_tasks WHERE task_sid = ?1")
                .bind(task_sid)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(FlexTaskRow::into_flex_task).transpose()
    }

    /// Retrieve a flex task through the conversation reverse lookup.
    ///
    /// Lookup entries may outlive their task; a dangling entry yields
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_conversation_sid(&self, conversation_sid: &str) -> Result<Option<FlexTask>> {
        let task_sid: Option<(String,)> = sqlx::query_as(
            "SELECT task_sid FROM flex_tasks_by_conversation WHERE conversation_sid = ?1",
        )
        .bind(conversation_sid)
        .fetch_optional(self.db.as_ref())
        .await?;

        match task_sid {
            Some((sid,)) => self.get_by_task_sid(&sid).await,
            None => Ok(None),
        }
    }

    /// Blind-upsert the observed provider state for a task.
    ///
    /// Inserts the row on first sight, refreshes the descriptive columns
    /// on every later poll, and leaves the greeting-epoch marks alone.
    /// Keeps the conversation reverse-lookup row current (last write wins).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a write fails.
    pub async fn upsert_base_state(
        &self,
        task_sid: &str,
        state: &FlexTaskBaseState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now_s = now.to_rfc3339();
        sqlx::query(
            "INSERT INTO flex_tasks (task_sid, conversation_sid, channel_type,
             customer_name, customer_address, customer_from, worker_sid, worker_name,
             task_assignment_status, task_attributes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT (task_sid) DO UPDATE SET
                 conversation_sid = excluded.conversation_sid,
                 channel_type = excluded.channel_type,
                 customer_name = excluded.customer_name,
                 customer_address = excluded.customer_address,
                 customer_from = excluded.customer_from,
                 worker_sid = excluded.worker_sid,
                 worker_name = excluded.worker_name,
                 task_assignment_status = excluded.task_assignment_status,
                 task_attributes = excluded.task_attributes,
                 updated_at = excluded.updated_at",
        )
        .bind(task_sid)
        .bind(&state.conversation_sid)
        .bind(&state.channel_type)
        .bind(&state.customer_name)
        .bind(&state.customer_address)
        .bind(&state.customer_from)
        .bind(&state.worker_sid)
        .bind(&state.worker_name)
        .bind(&state.task_assignment_status)
        .bind(&state.task_attributes)
        .bind(&now_s)
        .execute(self.db.as_ref())
        .await?;

        if let Some(conversation_sid) = &state.conversation_sid {
            sqlx::query(
                "INSERT INTO flex_tasks_by_conversation (conversation_sid, task_sid)
                 VALUES (?1, ?2)
                 ON CONFLICT (conversation_sid) DO UPDATE SET task_sid = excluded.task_sid",
            )
            .bind(conversation_sid)
            .bind(task_sid)
            .execute(self.db.as_ref())
            .await?;
        }

        Ok(())
    }

    /// Record a greeting send, opening a fresh epoch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_greeting_sent(&self, task_sid: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE flex_tasks SET greeting_sent_at = ?1, ping_sent_at = NULL, \
             inactive_sent_at = NULL, updated_at = ?1 WHERE task_sid = ?2",
        )
        .bind(&at_s)
        .bind(task_sid)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record a ping send. No-op if the epoch already has one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_ping_sent(&self, task_sid: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE flex_tasks SET ping_sent_at = ?1, updated_at = ?1 \
             WHERE task_sid = ?2 AND ping_sent_at IS NULL",
        )
        .bind(&at_s)
        .bind(task_sid)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record the closure-message send. No-op if the epoch already has one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_inactive_sent(&self, task_sid: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE flex_tasks SET inactive_sent_at = ?1, updated_at = ?1 \
             WHERE task_sid = ?2 AND inactive_sent_at IS NULL",
        )
        .bind(&at_s)
        .bind(task_sid)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record inbound customer activity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_customer_activity(&self, task_sid: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE flex_tasks SET last_customer_activity_at = ?1, updated_at = ?1 \
             WHERE task_sid = ?2",
        )
        .bind(&at_s)
        .bind(task_sid)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }
}
