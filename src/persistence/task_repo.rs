//! Internal task repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::task::{InternalTask, TaskStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for internal task records.
#[derive(Clone)]
pub struct TaskRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    customer_name: String,
    customer_contact: String,
    operator_id: Option<String>,
    operator_name: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
    assigned_at: Option<String>,
    greeting_sent_at: Option<String>,
    ping_sent_at: Option<String>,
    inactive_sent_at: Option<String>,
    last_customer_activity_at: Option<String>,
    closed_at: Option<String>,
    close_reason: Option<String>,
}

impl TaskRow {
    /// Convert a database row into the domain model.
    fn into_task(self) -> Result<InternalTask> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid task status: {}", self.status)))?;
        Ok(InternalTask {
            id: self.id,
            customer_name: self.customer_name,
            customer_contact: self.customer_contact,
            operator_id: self.operator_id,
            operator_name: self.operator_name,
            status,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            assigned_at: parse_opt_ts("assigned_at", self.assigned_at)?,
            greeting_sent_at: parse_opt_ts("greeting_sent_at", self.greeting_sent_at)?,
            ping_sent_at: parse_opt_ts("ping_sent_at", self.ping_sent_at)?,
            inactive_sent_at: parse_opt_ts("inactive_sent_at", self.inactive_sent_at)?,
            last_customer_activity_at: parse_opt_ts(
                "last_customer_activity_at",
                self.last_customer_activity_at,
            )?,
            closed_at: parse_opt_ts("closed_at", self.closed_at)?,
            close_reason: self.close_reason,
        })
    }
}

pub(crate) fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

pub(crate) fn parse_opt_ts(field: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(|r| parse_ts(field, r)).transpose()
}

impl TaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new task record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, task: &InternalTask) -> Result<InternalTask> {
        sqlx::query(
            "INSERT INTO tasks (id, customer_name, customer_contact, operator_id,
             operator_name, status, created_at, updated_at, assigned_at,
             greeting_sent_at, ping_sent_at, inactive_sent_at,
             last_customer_activity_at, closed_at, close_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&task.id)
        .bind(&task.customer_name)
        .bind(&task.customer_contact)
        .bind(&task.operator_id)
        .bind(&task.operator_name)
        .bind(task.status.as_str())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.assigned_at.map(|t| t.to_rfc3339()))
        .bind(task.greeting_sent_at.map(|t| t.to_rfc3339()))
        .bind(task.ping_sent_at.map(|t| t.to_rfc3339()))
        .bind(task.inactive_sent_at.map(|t| t.to_rfc3339()))
        .bind(task.last_customer_activity_at.map(|t| t.to_rfc3339()))
        .bind(task.closed_at.map(|t| t.to_rfc3339()))
        .bind(&task.close_reason)
        .execute(self.db.as_ref())
        .await?;

        Ok(task.clone())
    }

    /// Retrieve a task by its ID.
    ///
    /// Returns `Ok(None)` if the task does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<InternalTask>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(TaskRow::into_task).transpose()
    }

    /// List tasks in a given status, oldest first, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_by_status(&self, status: TaskStatus, limit: u32) -> Result<Vec<InternalTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE status = ?1 ORDER BY created_at ASC LIMIT ?2",
        )
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// List tasks for the admin read surface, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self, status: Option<TaskStatus>, limit: u32) -> Result<Vec<InternalTask>> {
        let rows: Vec<TaskRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM tasks WHERE status = ?1 ORDER BY updated_at DESC LIMIT ?2",
                )
                .bind(status.as_str())
                .bind(i64::from(limit))
                .fetch_all(self.db.as_ref())
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM tasks ORDER BY updated_at DESC LIMIT ?1")
                    .bind(i64::from(limit))
                    .fetch_all(self.db.as_ref())
                    .await?
            }
        };

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// The most recently updated assigned task for a customer contact.
    ///
    /// When one customer has several assigned tasks, only the latest one
    /// is returned; the others are untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_latest_assigned_by_contact(
        &self,
        customer_contact: &str,
    ) -> Result<Option<InternalTask>> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE customer_contact = ?1 AND status = 'assigned' \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(customer_contact)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    /// Assign an operator and move the task to `assigned`.
    ///
    /// `assigned_at` is written only on the first assignment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn assign(
        &self,
        id: &str,
        operator_id: &str,
        operator_name: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now_s = now.to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET operator_id = ?1, operator_name = ?2, status = 'assigned', \
             assigned_at = COALESCE(assigned_at, ?3), updated_at = ?3 WHERE id = ?4",
        )
        .bind(operator_id)
        .bind(operator_name)
        .bind(&now_s)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record a greeting send, opening a fresh epoch.
    ///
    /// Clears the ping and inactivity marks so the new epoch's timers are
    /// not skipped by the previous epoch's writes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_greeting_sent(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET greeting_sent_at = ?1, ping_sent_at = NULL, \
             inactive_sent_at = NULL, updated_at = ?1 WHERE id = ?2",
        )
        .bind(&at_s)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record a ping send. No-op if the epoch already has one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_ping_sent(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET ping_sent_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND ping_sent_at IS NULL",
        )
        .bind(&at_s)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Close the task for inactivity, recording the closure-message send.
    ///
    /// No-op if the epoch already committed an inactivity close.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn close_due_to_inactivity(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET inactive_sent_at = ?1, closed_at = ?1, \
             close_reason = 'inactivity', status = 'closed', updated_at = ?1 \
             WHERE id = ?2 AND inactive_sent_at IS NULL",
        )
        .bind(&at_s)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Close the task manually with an operator-supplied reason.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn close(&self, id: &str, reason: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET status = 'closed', closed_at = ?1, close_reason = ?2, \
             updated_at = ?1 WHERE id = ?3",
        )
        .bind(&at_s)
        .bind(reason)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record inbound customer activity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_customer_activity(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let at_s = at.to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET last_customer_activity_at = ?1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(&at_s)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }
}
