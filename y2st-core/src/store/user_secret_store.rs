use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::crypto::SecretBox;
use crate::error::StoreError;
use crate::types::{UserCookies, UserSettings};

use super::{ensure_team_id_column, open_connection};

/// One row: `(team_id, user_id) → {cookies, settings}`. Only `cookies` is
/// secret and passes through `SecretBox`; `settings` has no confidential
/// fields and is stored as plain JSON.
pub struct UserSecretStore {
    conn: Mutex<Connection>,
    secret_box: SecretBox,
}

impl UserSecretStore {
    pub fn open(path: &Path, secret_box: SecretBox) -> Result<Self, StoreError> {
        let conn = open_connection(path)?;
        init_schema(&conn)?;
        ensure_team_id_column(&conn, "user_secrets")?;
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

    pub fn put_cookies(&self, cookies: &UserCookies) -> Result<(), StoreError> {
        let sealed = self.secret_box.seal(&cookies.cookies);
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "INSERT INTO user_secrets (team_id, user_id, cookies, settings, updated_at)
             VALUES (?1, ?2, ?3, '{}', ?4)
             ON CONFLICT(team_id, user_id) DO UPDATE SET
                cookies = excluded.cookies,
                updated_at = excluded.updated_at",
            params![cookies.team_id, cookies.user_id, sealed, updated_at],
        )?;
        Ok(())
    }

    pub fn get_cookies(&self, team_id: &str, user_id: &str) -> Result<Option<UserCookies>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT cookies, updated_at FROM user_secrets WHERE team_id = ?1 AND user_id = ?2",
                params![team_id, user_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        drop(conn);

        let Some((sealed, updated_at)) = row else {
            return Ok(None);
        };
        if sealed.is_empty() {
            return Ok(None);
        }
        let cookies = self.secret_box.open(&sealed)?;
        Ok(Some(UserCookies {
            team_id: team_id.to_string(),
            user_id: user_id.to_string(),
            cookies,
            updated_at,
        }))
    }

    pub fn put_settings(&self, team_id: &str, user_id: &str, settings: &UserSettings) -> Result<(), StoreError> {
        let json = serde_json::to_string(settings).expect("UserSettings always serializes");
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "INSERT INTO user_secrets (team_id, user_id, cookies, settings, updated_at)
             VALUES (?1, ?2, '', ?3, ?4)
             ON CONFLICT(team_id, user_id) DO UPDATE SET
                settings = excluded.settings,
                updated_at = excluded.updated_at",
            params![team_id, user_id, json, updated_at],
        )?;
        Ok(())
    }

    pub fn get_settings(&self, team_id: &str, user_id: &str) -> Result<UserSettings, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT settings FROM user_secrets WHERE team_id = ?1 AND user_id = ?2",
                params![team_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        Ok(match raw {
            Some(json) if json != "{}" && !json.is_empty() => {
                serde_json::from_str(&json).unwrap_or_default()
            }
            _ => UserSettings::default(),
        })
    }

    pub fn delete(&self, team_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "DELETE FROM user_secrets WHERE team_id = ?1 AND user_id = ?2",
            params![team_id, user_id],
        )?;
        Ok(())
    }

    pub fn list(&self, team_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT user_id FROM user_secrets WHERE team_id = ?1 ORDER BY user_id")?;
        let ids = stmt
            .query_map(params![team_id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_secrets (
            team_id     TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            cookies     TEXT NOT NULL DEFAULT '',
            settings    TEXT NOT NULL DEFAULT '{}',
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (team_id, user_id)
        );",
    )?;
    Ok(())
}
