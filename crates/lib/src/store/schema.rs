//! SQLite schema, created on open.

use sqlx::SqlitePool;

/// `seq` gives a stable insertion order for timestamp ties.
/// `created_at` and `completed_at` are Unix milliseconds.
pub const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        text TEXT NOT NULL,
        author TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS step_results (
        event_id TEXT NOT NULL,
        step TEXT NOT NULL,
        output TEXT NOT NULL,
        completed_at INTEGER NOT NULL,
        PRIMARY KEY (event_id, step)
    )",
];

pub const CREATE_INDEXES: &[&str] =
    &["CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at, seq)"];

pub async fn initialize(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in CREATE_TABLES.iter().chain(CREATE_INDEXES) {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
