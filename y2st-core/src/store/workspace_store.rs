use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::crypto::SecretBox;
use crate::error::StoreError;
use crate::types::Workspace;

use super::{ensure_team_id_column, open_connection};

/// Durable keyed store of `Workspace` rows, values encrypted via `SecretBox`.
pub struct WorkspaceStore {
    conn: Mutex<Connection>,
    secret_box: SecretBox,
}

impl WorkspaceStore {
    pub fn open(path: &Path, secret_box: SecretBox) -> Result<Self, StoreError> {
        let conn = open_connection(path)?;
        init_schema(&conn)?;
        ensure_team_id_column(&conn, "workspaces")?;
        Ok(Self {
            conn: Mutex::new(conn),
            secret_box,
        })
    }

    pub fn open_in_memory(secret_box: SecretBox) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            secret_box,
        })
    }

    /// Upsert a workspace row, encrypting its secret fields and refreshing
    /// `updated_at`.
    pub fn put(&self, ws: &Workspace) -> Result<(), StoreError> {
        let bot_token = self.secret_box.seal(ws.bot_token.as_bytes());
        let signing_secret = self.secret_box.seal(ws.signing_secret.as_bytes());
        let app_token = ws.app_token.as_ref().map(|t| self.secret_box.seal(t.as_bytes()));
        let updated_at = chrono::Utc::now().to_rfc3339();

        self.conn.lock().execute(
            "INSERT INTO workspaces (team_id, team_name, bot_token, signing_secret, app_token, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(team_id) DO UPDATE SET
                team_name = excluded.team_name,
                bot_token = excluded.bot_token,
                signing_secret = excluded.signing_secret,
                app_token = excluded.app_token,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                ws.team_id,
                ws.team_name,
                bot_token,
                signing_secret,
                app_token,
                ws.active as i32,
                updated_at,
            ],
        )?;
        Ok(())
    }

    /// Fetch and decrypt a workspace row. `AuthFailure` (wrapped in
    /// `StoreError::Secret`) if any encrypted field fails to open.
    pub fn get(&self, team_id: &str) -> Result<Option<Workspace>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT team_id, team_name, bot_token, signing_secret, app_token, active, created_at, updated_at
                 FROM workspaces WHERE team_id = ?1",
                params![team_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i32>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        let Some((team_id, team_name, bot_token, signing_secret, app_token, active, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let bot_token = String::from_utf8_lossy(&self.secret_box.open(&bot_token)?).into_owned();
        let signing_secret =
            String::from_utf8_lossy(&self.secret_box.open(&signing_secret)?).into_owned();
        let app_token = app_token
            .map(|t| self.secret_box.open(&t))
            .transpose()?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        Ok(Some(Workspace {
            team_id,
            team_name,
            bot_token,
            signing_secret,
            app_token,
            active: active != 0,
            created_at,
            updated_at,
        }))
    }

    pub fn delete(&self, team_id: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM workspaces WHERE team_id = ?1", params![team_id])?;
        Ok(())
    }

    /// List workspaces, optionally filtering to only active ones.
    pub fn list(&self, active_only: bool) -> Result<Vec<Workspace>, StoreError> {
        let conn = self.conn.lock();
        let sql = if active_only {
            "SELECT team_id FROM workspaces WHERE active = 1 ORDER BY team_id"
        } else {
            "SELECT team_id FROM workspaces ORDER BY team_id"
        };
        let mut stmt = conn.prepare(sql)?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        ids.into_iter()
            .filter_map(|id| self.get(&id).transpose())
            .collect()
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS workspaces (
            team_id         TEXT PRIMARY KEY NOT NULL,
            team_name       TEXT NOT NULL,
            bot_token       TEXT NOT NULL,
            signing_secret  TEXT NOT NULL,
            app_token       TEXT,
            active          INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> WorkspaceStore {
        WorkspaceStore::open_in_memory(SecretBox::new([9u8; 32])).unwrap()
    }

    fn sample(team_id: &str) -> Workspace {
        Workspace {
            team_id: team_id.to_string(),
            team_name: "Acme".to_string(),
            bot_token: "xoxb-secret".to_string(),
            signing_secret: "sign-secret".to_string(),
            app_token: Some("xapp-secret".to_string()),
            active: true,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn put_then_get_round_trips_decrypted() {
        let store = store();
        store.put(&sample("T1")).unwrap();
        let got = store.get("T1").unwrap().unwrap();
        assert_eq!(got.bot_token, "xoxb-secret");
        assert_eq!(got.app_token.as_deref(), Some("xapp-secret"));
    }

    #[test]
    fn get_missing_returns_none() {
        let store = store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn put_twice_is_observably_a_single_upsert() {
        let store = store();
        store.put(&sample("T1")).unwrap();
        let mut second = sample("T1");
        second.team_name = "Acme Renamed".to_string();
        store.put(&second).unwrap();

        assert_eq!(store.list(false).unwrap().len(), 1);
        assert_eq!(store.get("T1").unwrap().unwrap().team_name, "Acme Renamed");
    }

    #[test]
    fn delete_removes_row() {
        let store = store();
        store.put(&sample("T1")).unwrap();
        store.delete("T1").unwrap();
        assert!(store.get("T1").unwrap().is_none());
    }

    #[test]
    fn list_active_only_filters_inactive() {
        let store = store();
        store.put(&sample("T1")).unwrap();
        let mut inactive = sample("T2");
        inactive.active = false;
        store.put(&inactive).unwrap();

        assert_eq!(store.list(true).unwrap().len(), 1);
        assert_eq!(store.list(false).unwrap().len(), 2);
    }

    #[test]
    fn decrypting_with_wrong_key_is_auth_failure() {
        let store = store();
        store.put(&sample("T1")).unwrap();

        let wrong = WorkspaceStore {
            conn: Mutex::new(Connection::open_in_memory().unwrap()),
            secret_box: SecretBox::new([1u8; 32]),
        };
        // Copy the row across raw connections to simulate opening the same
        // file with the wrong key.
        let raw: String = store
            .conn
            .lock()
            .query_row("SELECT bot_token FROM workspaces WHERE team_id='T1'", [], |r| r.get(0))
            .unwrap();
        let err = wrong.secret_box.open(&raw).unwrap_err();
        assert!(matches!(err, crate::error::SecretBoxError::AuthFailure));
    }
}
