//! Named key/value pairs persisted per session, the host's equivalent of survey
//! "embedded data" fields.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::Database;

impl Database {
    /// Inserts or replaces `key` for `session_id`.
    pub async fn set_embedded_data(&self, session_id: &str, key: &str, value: &str) -> Result<()> {
        let session_id = session_id.to_string();
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO embedded_data (session_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id, key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![session_id, key, value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to persist embedded data '{key}'"))?;
            Ok(())
        })
        .await
    }

    pub async fn get_embedded_data(&self, session_id: &str, key: &str) -> Result<Option<String>> {
        let session_id = session_id.to_string();
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM embedded_data WHERE session_id = ?1 AND key = ?2",
                    params![session_id, key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn list_embedded_data(&self, session_id: &str) -> Result<BTreeMap<String, String>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM embedded_data
                 WHERE session_id = ?1
                 ORDER BY key",
            )?;
            let entries = stmt
                .query_map(params![session_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<BTreeMap<String, String>, _>>()?;
            Ok(entries)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::{Session, TaskConfig};

    #[tokio::test]
    async fn upsert_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("bridge.sqlite3")).unwrap();
        let session = Session::new("s-1".into(), TaskConfig::default());
        db.insert_session(&session).await.unwrap();

        db.set_embedded_data("s-1", "EYEGAZE_Completed", "Timeout").await.unwrap();
        db.set_embedded_data("s-1", "EYEGAZE_Completed", "Yes").await.unwrap();
        db.set_embedded_data("s-1", "EYEGAZE_Data", "{}").await.unwrap();

        assert_eq!(
            db.get_embedded_data("s-1", "EYEGAZE_Completed").await.unwrap().as_deref(),
            Some("Yes")
        );
        assert_eq!(db.get_embedded_data("s-1", "nope").await.unwrap(), None);

        let all = db.list_embedded_data("s-1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.keys().next().map(String::as_str), Some("EYEGAZE_Completed"));
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("bridge.sqlite3")).unwrap();
        assert!(db.set_embedded_data("ghost", "K", "V").await.is_err());
    }
}
