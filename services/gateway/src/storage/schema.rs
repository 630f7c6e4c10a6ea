use rusqlite::Connection;

use super::error::StorageError;

pub const USAGE_COUNTERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS usage_counters (
    scope_id TEXT NOT NULL,
    day TEXT NOT NULL,
    messages_in INTEGER NOT NULL DEFAULT 0,
    messages_out INTEGER NOT NULL DEFAULT 0,
    bytes_in INTEGER NOT NULL DEFAULT 0,
    bytes_out INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (scope_id, day)
);
"#;

pub const USAGE_COUNTERS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_usage_counters_day ON usage_counters(day);
"#;

pub fn init_database(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(USAGE_COUNTERS_TABLE_SCHEMA)?;
    conn.execute_batch(USAGE_COUNTERS_INDEXES)?;
    Ok(())
}
