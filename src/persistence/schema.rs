//! `SQLite` schema definitions and bootstrap logic.
//!
//! All statements use `IF NOT EXISTS` so re-execution is safe across
//! restarts. Timestamps are RFC 3339 UTC strings.

use crate::Result;

use super::db::Database;

/// Apply all table and index definitions to the connected database.
///
/// # Errors
///
/// Returns `AppError::Db` if any schema statement fails.
pub async fn apply_schema(db: &Database) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS tasks (
    id                        TEXT PRIMARY KEY,
    customer_name             TEXT NOT NULL,
    customer_contact          TEXT NOT NULL,
    operator_id               TEXT,
    operator_name             TEXT,
    status                    TEXT NOT NULL CHECK (status IN ('open', 'assigned', 'closed')),
    created_at                TEXT NOT NULL,
    updated_at                TEXT NOT NULL,
    assigned_at               TEXT,
    greeting_sent_at          TEXT,
    ping_sent_at              TEXT,
    inactive_sent_at          TEXT,
    last_customer_activity_at TEXT,
    closed_at                 TEXT,
    close_reason              TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
CREATE INDEX IF NOT EXISTS idx_tasks_contact_status ON tasks (customer_contact, status);

CREATE TABLE IF NOT EXISTS flex_tasks (
    task_sid                  TEXT PRIMARY KEY,
    conversation_sid          TEXT,
    channel_type              TEXT,
    customer_name             TEXT,
    customer_address          TEXT,
    customer_from             TEXT,
    worker_sid                TEXT,
    worker_name               TEXT,
    task_assignment_status    TEXT,
    task_attributes           TEXT,
    greeting_sent_at          TEXT,
    ping_sent_at              TEXT,
    inactive_sent_at          TEXT,
    last_customer_activity_at TEXT,
    created_at                TEXT NOT NULL,
    updated_at                TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS flex_tasks_by_conversation (
    conversation_sid TEXT PRIMARY KEY,
    task_sid         TEXT NOT NULL
);
";

    sqlx::raw_sql(ddl).execute(db).await?;
    Ok(())
}
