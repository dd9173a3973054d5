//! `SQLite` connection management and schema bootstrap.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::Result;

use super::schema;

/// Alias for the shared `SQLite` pool.
pub type Database = SqlitePool;

/// Connect to the on-disk database, creating the file if needed, and
/// apply the schema.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect(path: &str) -> Result<Database> {
    let url = format!("sqlite:{path}?mode=rwc");
    let pool = SqlitePool::connect(&url).await?;
    schema::apply_schema(&pool).await?;
    Ok(pool)
}

/// Connect to a private in-memory database for tests.
///
/// The pool is capped at a single connection: each `SQLite` in-memory
/// connection is otherwise its own empty database.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect_memory() -> Result<Database> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    schema::apply_schema(&pool).await?;
    Ok(pool)
}
