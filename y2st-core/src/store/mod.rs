//! Durable key-value stores backed by a local SQLite file: `WorkspaceStore`
//! and `UserSecretStore`. Both share the same idempotent-migration and
//! encrypted-field conventions, so the common pieces live here.

mod user_secret_store;
mod workspace_store;

pub use user_secret_store::UserSecretStore;
pub use workspace_store::WorkspaceStore;

use rusqlite::Connection;

use crate::error::StoreError;

/// Open a connection with the pragmas every store in this crate wants:
/// WAL for concurrent readers, foreign keys on.
pub(crate) fn open_connection(path: &std::path::Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Idempotent schema-evolution step: if `table` predates multi-workspace
/// support and lacks a `team_id` column, add one defaulted to `_default_`.
/// Safe to call on every store open — `table_info` is read first so the
/// `ALTER TABLE` (which is not itself idempotent) only ever runs once.
pub(crate) fn ensure_team_id_column(conn: &Connection, table: &str) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let has_team_id = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .any(|name| name == "team_id");
    drop(stmt);

    if !has_team_id {
        conn.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN team_id TEXT NOT NULL DEFAULT '{default}';",
            table = table,
            default = crate::types::DEFAULT_TEAM_ID,
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_team_id_column_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY);")
            .unwrap();
        conn.execute("INSERT INTO t (id) VALUES ('a')", []).unwrap();

        ensure_team_id_column(&conn, "t").unwrap();
        ensure_team_id_column(&conn, "t").unwrap();

        let team_id: String = conn
            .query_row("SELECT team_id FROM t WHERE id = 'a'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(team_id, "_default_");
    }

    #[test]
    fn ensure_team_id_column_noop_when_already_present() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id TEXT PRIMARY KEY, team_id TEXT NOT NULL DEFAULT 'x');",
        )
        .unwrap();
        ensure_team_id_column(&conn, "t").unwrap();
        ensure_team_id_column(&conn, "t").unwrap();
    }
}
