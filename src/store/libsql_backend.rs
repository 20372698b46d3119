//! libSQL backend — async `Database` trait implementation.
//!
//! One connection is shared by every task. Every write takes `write_lock`, so
//! a single-statement write can never land inside another task's open
//! transaction on that connection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::voting::{Card, ExportedVote, NewSession, Tally, VoteOption, VotingSession};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        // WAL lets the Sheets sync read while a vote is being written
        backend.pragma("PRAGMA journal_mode=WAL").await?;
        backend.init().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    async fn init(&self) -> Result<(), DatabaseError> {
        self.pragma("PRAGMA foreign_keys=ON").await?;
        self.run_migrations().await
    }

    /// PRAGMAs may return a row; drain it and ignore the value.
    async fn pragma(&self, sql: &str) -> Result<(), DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?;
        while let Ok(Some(_)) = rows.next().await {}
        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a single-value `SELECT` and return the first column of the first row.
    async fn query_scalar_i64(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn exists(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn query_sessions(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<VotingSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut sessions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_session(&row) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Skipping session row: {e}"),
            }
        }
        Ok(sessions)
    }
}

// ── Helper functions ────────────────────────────────────────────────

const SESSION_COLUMNS: &str =
    "id, question, option_a, option_b, option_c, option_d, start_time, end_time, created_at, is_active";

const CARD_COLUMNS: &str = "id, uid, label, enrolled_at, is_active";

/// Map a libsql Row to a VotingSession. Column order matches SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<VotingSession, libsql::Error> {
    Ok(VotingSession {
        id: row.get(0)?,
        question: row.get(1)?,
        option_a: row.get(2)?,
        option_b: row.get(3)?,
        option_c: row.get::<String>(4).ok().filter(|s| !s.is_empty()),
        option_d: row.get::<String>(5).ok().filter(|s| !s.is_empty()),
        start_time: row.get(6)?,
        end_time: row.get(7)?,
        created_at: row.get(8)?,
        is_active: row.get::<i64>(9)? != 0,
    })
}

/// Map a libsql Row to a Card. Column order matches CARD_COLUMNS.
fn row_to_card(row: &libsql::Row) -> Result<Card, libsql::Error> {
    Ok(Card {
        id: row.get(0)?,
        uid: row.get(1)?,
        label: row.get::<String>(2).ok(),
        enrolled_at: row.get(3)?,
        is_active: row.get::<i64>(4)? != 0,
    })
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn active_session(&self, now: &str) -> Result<Option<VotingSession>, DatabaseError> {
        let sessions = self
            .query_sessions(
                "active_session",
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE is_active = 1
                       AND datetime(?1) BETWEEN datetime(start_time) AND datetime(end_time)
                     ORDER BY id DESC LIMIT 1"
                ),
                params![now],
            )
            .await?;
        Ok(sessions.into_iter().next())
    }

    async fn get_session(&self, id: i64) -> Result<Option<VotingSession>, DatabaseError> {
        let sessions = self
            .query_sessions(
                "get_session",
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
            )
            .await?;
        Ok(sessions.into_iter().next())
    }

    async fn list_sessions(&self) -> Result<Vec<VotingSession>, DatabaseError> {
        self.query_sessions(
            "list_sessions",
            &format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY id DESC"),
            (),
        )
        .await
    }

    async fn create_session(&self, session: &NewSession) -> Result<i64, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let id = self
            .query_scalar_i64(
                "create_session",
                "INSERT INTO sessions
                    (question, option_a, option_b, option_c, option_d, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 RETURNING id",
                params![
                    session.question.as_str(),
                    session.option_a.as_str(),
                    session.option_b.as_str(),
                    opt_text(session.option_c.as_deref().filter(|s| !s.is_empty())),
                    opt_text(session.option_d.as_deref().filter(|s| !s.is_empty())),
                    session.start_time.as_str(),
                    session.end_time.as_str(),
                ],
            )
            .await?;

        debug!(session_id = id, "Session created in DB");
        Ok(id)
    }

    async fn update_session(
        &self,
        id: i64,
        session: &NewSession,
        is_active: bool,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let changed = self
            .conn()
            .execute(
                "UPDATE sessions
                 SET question = ?1, option_a = ?2, option_b = ?3, option_c = ?4, option_d = ?5,
                     start_time = ?6, end_time = ?7, is_active = ?8
                 WHERE id = ?9",
                params![
                    session.question.as_str(),
                    session.option_a.as_str(),
                    session.option_b.as_str(),
                    opt_text(session.option_c.as_deref().filter(|s| !s.is_empty())),
                    opt_text(session.option_d.as_deref().filter(|s| !s.is_empty())),
                    session.start_time.as_str(),
                    session.end_time.as_str(),
                    is_active as i64,
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_session: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "session".into(),
                id: id.to_string(),
            });
        }
        debug!(session_id = id, is_active, "Session updated in DB");
        Ok(())
    }

    // ── Cards ───────────────────────────────────────────────────────

    async fn card_is_registered(&self, uid: &str) -> Result<bool, DatabaseError> {
        self.exists(
            "card_is_registered",
            "SELECT id FROM cards WHERE uid = ?1 AND is_active = 1",
            params![uid],
        )
        .await
    }

    async fn card_exists(&self, uid: &str) -> Result<bool, DatabaseError> {
        self.exists("card_exists", "SELECT id FROM cards WHERE uid = ?1", params![uid])
            .await
    }

    async fn list_cards(&self) -> Result<Vec<Card>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CARD_COLUMNS} FROM cards ORDER BY enrolled_at DESC, id DESC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_cards: {e}")))?;

        let mut cards = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_cards: {e}")))?
        {
            match row_to_card(&row) {
                Ok(card) => cards.push(card),
                Err(e) => warn!("Skipping card row: {e}"),
            }
        }
        Ok(cards)
    }

    async fn enroll_card(&self, uid: &str, label: Option<&str>) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO cards (uid, label, is_active) VALUES (?1, ?2, 1)
                 ON CONFLICT(uid) DO UPDATE SET label = excluded.label, is_active = 1",
                params![uid, opt_text(label)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("enroll_card: {e}")))?;

        debug!(uid, "Card enrolled in DB");
        Ok(())
    }

    async fn deactivate_card(&self, id: i64) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute("UPDATE cards SET is_active = 0 WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate_card: {e}")))?;

        debug!(card_id = id, "Card deactivated in DB");
        Ok(())
    }

    // ── Votes ───────────────────────────────────────────────────────

    async fn card_has_voted(&self, uid: &str, session_id: i64) -> Result<bool, DatabaseError> {
        self.exists(
            "card_has_voted",
            "SELECT id FROM vote_tracker WHERE session_id = ?1 AND card_uid = ?2",
            params![session_id, uid],
        )
        .await
    }

    async fn record_vote(
        &self,
        session_id: i64,
        uid: &str,
        option: VoteOption,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_vote begin: {e}")))?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO vote_tracker (session_id, card_uid) VALUES (?1, ?2)",
                params![session_id, uid],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_vote tracker: {e}")))?;

        if inserted == 0 {
            tx.rollback()
                .await
                .map_err(|e| DatabaseError::Query(format!("record_vote rollback: {e}")))?;
            debug!(session_id, uid, "Duplicate vote rejected");
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO votes (session_id, option) VALUES (?1, ?2)",
            params![session_id, option.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_vote ballot: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_vote commit: {e}")))?;

        Ok(true)
    }

    async fn vote_counts(&self, session_id: i64) -> Result<Option<Tally>, DatabaseError> {
        let Some(session) = self.get_session(session_id).await? else {
            return Ok(None);
        };

        let mut rows = self
            .conn()
            .query(
                "SELECT option, COUNT(*) FROM votes WHERE session_id = ?1 GROUP BY option",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("vote_counts: {e}")))?;

        let mut raw = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("vote_counts: {e}")))?
        {
            let option: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("vote_counts row parse: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("vote_counts row parse: {e}")))?;
            raw.push((option, count));
        }

        Ok(Some(Tally::from_rows(&session, &raw)))
    }

    async fn total_votes(&self, session_id: i64) -> Result<i64, DatabaseError> {
        self.query_scalar_i64(
            "total_votes",
            "SELECT COUNT(*) FROM votes WHERE session_id = ?1",
            params![session_id],
        )
        .await
    }

    async fn votes_for_export(&self, session_id: i64) -> Result<Vec<ExportedVote>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT voted_at, option FROM votes WHERE session_id = ?1 ORDER BY voted_at, id",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("votes_for_export: {e}")))?;

        let mut votes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("votes_for_export: {e}")))?
        {
            votes.push(ExportedVote {
                voted_at: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("votes_for_export row: {e}")))?,
                option: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("votes_for_export row: {e}")))?,
            });
        }
        Ok(votes)
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_setting: {e}"))),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_setting: {e}")))?;
        Ok(())
    }

    // ── Admin ───────────────────────────────────────────────────────

    async fn set_admin_password_hash(&self, hash: &str) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("set_admin_password begin: {e}")))?;
        tx.execute("DELETE FROM admin", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("set_admin_password: {e}")))?;
        tx.execute(
            "INSERT INTO admin (id, password_hash) VALUES (1, ?1)",
            params![hash],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_admin_password: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("set_admin_password commit: {e}")))?;
        Ok(())
    }

    async fn admin_password_hash(&self) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT password_hash FROM admin WHERE id = 1", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("admin_password_hash: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("admin_password_hash: {e}"))),
        }
    }
}
