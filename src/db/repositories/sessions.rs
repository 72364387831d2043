use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_optional_datetime, parse_state, to_u32},
    Database,
};
use crate::models::{Session, SessionState, TaskConfig};

const SESSION_COLUMNS: &str = "id, study_id, subject_id, trials_per_block, state, error, started_at, ready_at, completed_at";

fn row_to_session(row: &Row) -> Result<Session> {
    let state: String = row.get("state")?;
    let trials_per_block: Option<i64> = row.get("trials_per_block")?;

    Ok(Session {
        id: row.get("id")?,
        config: TaskConfig {
            session_id: row.get("id")?,
            study_id: row.get("study_id")?,
            subject_id: row.get("subject_id")?,
            trials_per_block: trials_per_block
                .map(|n| to_u32(n, "trials_per_block"))
                .transpose()?,
        },
        state: parse_state(&state)?,
        error: row.get("error")?,
        started_at: parse_optional_datetime(row.get("started_at")?, "started_at")?,
        ready_at: parse_optional_datetime(row.get("ready_at")?, "ready_at")?,
        completed_at: parse_optional_datetime(row.get("completed_at")?, "completed_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (id, study_id, subject_id, trials_per_block, state, error, started_at, ready_at, completed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    record.id,
                    record.config.study_id,
                    record.config.subject_id,
                    record.config.trials_per_block,
                    record.state.as_str(),
                    record.error,
                    record.started_at.map(|dt| dt.to_rfc3339()),
                    record.ready_at.map(|dt| dt.to_rfc3339()),
                    record.completed_at.map(|dt| dt.to_rfc3339()),
                    now,
                ],
            )
            .with_context(|| "failed to insert session")?;
            Ok(())
        })
        .await
    }

    /// Writes the mutable part of a session: state, error and timestamps.
    pub async fn update_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions
                     SET state = ?1,
                         error = ?2,
                         started_at = ?3,
                         ready_at = ?4,
                         completed_at = ?5,
                         updated_at = ?6
                     WHERE id = ?7",
                    params![
                        record.state.as_str(),
                        record.error,
                        record.started_at.map(|dt| dt.to_rfc3339()),
                        record.ready_at.map(|dt| dt.to_rfc3339()),
                        record.completed_at.map(|dt| dt.to_rfc3339()),
                        Utc::now().to_rfc3339(),
                        record.id,
                    ],
                )
                .with_context(|| "failed to update session")?;
            if updated == 0 {
                return Err(anyhow!("session {} not found", record.id));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Sessions a previous run left before reaching a terminal state.
    pub async fn get_incomplete_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE state NOT IN ('DONE', 'FAILED', 'TIMED_OUT')
                 ORDER BY created_at DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn mark_session_abandoned(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET state = ?1,
                     error = ?2,
                     completed_at = ?3,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    SessionState::TimedOut.as_str(),
                    "abandoned",
                    at.to_rfc3339(),
                    session_id,
                ],
            )
            .with_context(|| "failed to mark session abandoned")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session::new(
            id.into(),
            TaskConfig {
                session_id: id.into(),
                study_id: Some("study-1".into()),
                subject_id: Some("sub-9".into()),
                trials_per_block: Some(30),
            },
        )
    }

    #[tokio::test]
    async fn insert_update_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("bridge.sqlite3")).unwrap();

        let mut record = session("s-1");
        db.insert_session(&record).await.unwrap();

        record.state = SessionState::Done;
        record.started_at = Some(Utc::now());
        record.completed_at = Some(Utc::now());
        db.update_session(&record).await.unwrap();

        let loaded = db.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Done);
        assert_eq!(loaded.config, record.config);
        assert!(loaded.completed_at.is_some());

        assert!(db.get_session("missing").await.unwrap().is_none());
        assert!(db.update_session(&session("missing")).await.is_err());
    }

    #[tokio::test]
    async fn incomplete_sessions_can_be_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("bridge.sqlite3")).unwrap();

        let mut loading = session("s-loading");
        loading.state = SessionState::Loading;
        db.insert_session(&loading).await.unwrap();

        let mut done = session("s-done");
        done.state = SessionState::Done;
        db.insert_session(&done).await.unwrap();

        let incomplete = db.get_incomplete_sessions().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, "s-loading");

        db.mark_session_abandoned("s-loading", Utc::now()).await.unwrap();
        let reloaded = db.get_session("s-loading").await.unwrap().unwrap();
        assert_eq!(reloaded.state, SessionState::TimedOut);
        assert_eq!(reloaded.error.as_deref(), Some("abandoned"));
        assert!(db.get_incomplete_sessions().await.unwrap().is_empty());
    }
}
