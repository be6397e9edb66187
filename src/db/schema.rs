//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::EngineError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, EngineError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| EngineError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), EngineError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| EngineError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| EngineError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(VOTES_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create vote tables: {}", e)))?;
    Ok(())
}

/// Reconciled scores and votes
///
/// Rows are only ever upserted by the reconciliation pass; `updated_at`
/// moves only when the stored value actually changes.
const VOTES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS post_scores (
    post_id INTEGER PRIMARY KEY NOT NULL,
    score INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS post_votes (
    post_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    direction INTEGER NOT NULL CHECK (direction IN (-1, 1)),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (post_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_post_votes_user ON post_votes(user_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute("INSERT INTO post_scores (post_id, score) VALUES (1, 432)", [])
            .unwrap();

        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM post_scores", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
