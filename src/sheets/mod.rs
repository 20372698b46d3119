//! Google Sheets mirror of session results.
//!
//! SQLite stays the source of truth; the spreadsheet is rewritten from it on
//! every sync. Automatic syncs after a vote are fire-and-forget and debounced
//! so burst voting stays under the Sheets write quota. A manual sync from the
//! admin panel always runs.

pub mod client;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

pub use client::{GoogleSheets, ServiceAccountKey, SpreadsheetApi};

use crate::error::SheetsError;
use crate::export::summary_rows;
use crate::store::Database;
use crate::voting::{ExportedVote, Tally, VotingSession};

pub const SUMMARY_TAB: &str = "Summary";
pub const DETAIL_TAB: &str = "Detail";
const SUMMARY_GRID: (u32, u32) = (30, 4);
const DETAIL_GRID: (u32, u32) = (2000, 2);

/// Result of one sync attempt, as returned to the admin panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn ok(total: i64) -> Self {
        Self {
            success: true,
            total: Some(total),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            total: None,
            error: Some(error.into()),
        }
    }
}

/// Opens a spreadsheet by id with the given credentials.
#[async_trait]
pub trait SheetsConnector: Send + Sync {
    async fn connect(
        &self,
        credentials_path: &Path,
        spreadsheet_id: &str,
    ) -> Result<Box<dyn SpreadsheetApi>, SheetsError>;
}

/// Connects through the Google REST API.
pub struct GoogleConnector;

#[async_trait]
impl SheetsConnector for GoogleConnector {
    async fn connect(
        &self,
        credentials_path: &Path,
        spreadsheet_id: &str,
    ) -> Result<Box<dyn SpreadsheetApi>, SheetsError> {
        let sheets = GoogleSheets::from_credentials_file(credentials_path, spreadsheet_id).await?;
        Ok(Box::new(sheets))
    }
}

pub struct SheetsSync {
    db: Arc<dyn Database>,
    connector: Arc<dyn SheetsConnector>,
    credentials_path: PathBuf,
    debounce: Duration,
    last_sync: Mutex<Option<Instant>>,
}

impl SheetsSync {
    pub fn new(
        db: Arc<dyn Database>,
        connector: Arc<dyn SheetsConnector>,
        credentials_path: impl Into<PathBuf>,
        debounce: Duration,
    ) -> Self {
        Self {
            db,
            connector,
            credentials_path: credentials_path.into(),
            debounce,
            last_sync: Mutex::new(None),
        }
    }

    /// Debounced sync on a background task.
    pub fn sync_in_background(self: &Arc<Self>, session_id: i64) -> tokio::task::JoinHandle<SyncOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.sync(session_id, false).await })
    }

    /// Sync immediately, ignoring and clearing the debounce window.
    pub async fn sync_now(&self, session_id: i64) -> SyncOutcome {
        if let Ok(mut last) = self.last_sync.lock() {
            *last = None;
        }
        self.sync(session_id, true).await
    }

    /// False if an automatic sync ran within the debounce window.
    /// Otherwise claims the window.
    fn claim_slot(&self) -> bool {
        let Ok(mut last) = self.last_sync.lock() else {
            return true;
        };
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.debounce {
                debug!(
                    since_secs = now.duration_since(prev).as_secs(),
                    "Sheets sync debounced"
                );
                return false;
            }
        }
        *last = Some(now);
        true
    }

    async fn sync(&self, session_id: i64, force: bool) -> SyncOutcome {
        if !force && !self.claim_slot() {
            return SyncOutcome::failed("Debounced");
        }

        match self.try_sync(session_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session_id, error = %e, "Sheets sync failed");
                SyncOutcome::failed(e.to_string())
            }
        }
    }

    async fn try_sync(&self, session_id: i64) -> Result<SyncOutcome, SheetsError> {
        let enabled = self.db.get_setting("sheets_enabled").await?.as_deref() == Some("1");
        if !enabled {
            return Ok(SyncOutcome::failed("Sheets sync is disabled in settings"));
        }
        let spreadsheet_id = self
            .db
            .get_setting("sheets_spreadsheet_id")
            .await?
            .unwrap_or_default();
        if spreadsheet_id.is_empty() {
            return Ok(SyncOutcome::failed("No Spreadsheet ID configured in settings"));
        }
        if !tokio::fs::try_exists(&self.credentials_path).await.unwrap_or(false) {
            return Ok(SyncOutcome::failed(format!(
                "Credentials file not found: {}",
                self.credentials_path.display()
            )));
        }

        let Some(session) = self.db.get_session(session_id).await? else {
            return Ok(SyncOutcome::failed("Session not found"));
        };
        let tally = self
            .db
            .vote_counts(session_id)
            .await?
            .unwrap_or_else(|| Tally::from_rows(&session, &[]));
        let votes = self.db.votes_for_export(session_id).await?;

        let sheet = self
            .connector
            .connect(&self.credentials_path, &spreadsheet_id)
            .await?;
        write_session(sheet.as_ref(), &session, &tally, &votes).await?;

        info!(session_id, total = tally.total, "Sheets sync complete");
        Ok(SyncOutcome::ok(tally.total))
    }
}

/// Rewrite the Summary and Detail tabs for `session`.
pub async fn write_session(
    sheet: &dyn SpreadsheetApi,
    session: &VotingSession,
    tally: &Tally,
    votes: &[ExportedVote],
) -> Result<(), SheetsError> {
    sheet
        .ensure_worksheet(SUMMARY_TAB, SUMMARY_GRID.0, SUMMARY_GRID.1)
        .await?;
    sheet.clear(SUMMARY_TAB).await?;
    sheet
        .write(
            SUMMARY_TAB,
            "A1",
            vec![vec![json!("Question"), json!(session.question)]],
        )
        .await?;
    sheet
        .write(
            SUMMARY_TAB,
            "A2",
            vec![["Option", "Label", "Count", "Percentage"].map(Value::from).to_vec()],
        )
        .await?;

    let rows: Vec<Vec<Value>> = summary_rows(tally)
        .into_iter()
        .map(|r| vec![json!(r.option), json!(r.label), json!(r.count), json!(r.percentage)])
        .collect();
    let total_row = 3 + rows.len();
    if !rows.is_empty() {
        sheet.write(SUMMARY_TAB, "A3", rows).await?;
    }
    sheet
        .write(
            SUMMARY_TAB,
            &format!("A{total_row}"),
            vec![vec![json!(""), json!("TOTAL"), json!(tally.total), json!("")]],
        )
        .await?;

    sheet
        .ensure_worksheet(DETAIL_TAB, DETAIL_GRID.0, DETAIL_GRID.1)
        .await?;
    sheet.clear(DETAIL_TAB).await?;
    sheet
        .write(DETAIL_TAB, "A1", vec![vec![json!("Timestamp"), json!("Option")]])
        .await?;
    if !votes.is_empty() {
        let rows = votes
            .iter()
            .map(|v| vec![json!(v.voted_at), json!(v.option)])
            .collect();
        sheet.write(DETAIL_TAB, "A2", rows).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::voting::{NewSession, VoteOption};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Ensure(String, u32, u32),
        Clear(String),
        Write(String, String, Vec<Vec<Value>>),
    }

    #[derive(Default)]
    struct FakeSheet {
        ops: Arc<StdMutex<Vec<Op>>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl SpreadsheetApi for FakeSheet {
        async fn ensure_worksheet(&self, title: &str, rows: u32, cols: u32) -> Result<(), SheetsError> {
            self.ops.lock().unwrap().push(Op::Ensure(title.into(), rows, cols));
            Ok(())
        }
        async fn clear(&self, title: &str) -> Result<(), SheetsError> {
            self.ops.lock().unwrap().push(Op::Clear(title.into()));
            Ok(())
        }
        async fn write(&self, title: &str, start_cell: &str, rows: Vec<Vec<Value>>) -> Result<(), SheetsError> {
            if self.fail_writes {
                return Err(SheetsError::Api {
                    status: 403,
                    message: "The caller does not have permission".into(),
                });
            }
            self.ops
                .lock()
                .unwrap()
                .push(Op::Write(title.into(), start_cell.into(), rows));
            Ok(())
        }
    }

    struct FakeConnector {
        ops: Arc<StdMutex<Vec<Op>>>,
        connects: Arc<StdMutex<usize>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl SheetsConnector for FakeConnector {
        async fn connect(&self, _: &Path, _: &str) -> Result<Box<dyn SpreadsheetApi>, SheetsError> {
            *self.connects.lock().unwrap() += 1;
            Ok(Box::new(FakeSheet {
                ops: Arc::clone(&self.ops),
                fail_writes: self.fail_writes,
            }))
        }
    }

    struct Harness {
        db: Arc<dyn Database>,
        sync: Arc<SheetsSync>,
        ops: Arc<StdMutex<Vec<Op>>>,
        connects: Arc<StdMutex<usize>>,
        _dir: tempfile::TempDir,
    }

    async fn harness(fail_writes: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let creds = dir.path().join("sa.json");
        std::fs::write(&creds, "{}").unwrap();

        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.set_setting("sheets_enabled", "1").await.unwrap();
        db.set_setting("sheets_spreadsheet_id", "sheet-1").await.unwrap();

        let ops = Arc::new(StdMutex::new(Vec::new()));
        let connects = Arc::new(StdMutex::new(0));
        let connector = Arc::new(FakeConnector {
            ops: Arc::clone(&ops),
            connects: Arc::clone(&connects),
            fail_writes,
        });
        let sync = Arc::new(SheetsSync::new(
            Arc::clone(&db),
            connector,
            creds,
            Duration::from_secs(30),
        ));
        Harness {
            db,
            sync,
            ops,
            connects,
            _dir: dir,
        }
    }

    async fn session_with_votes(db: &Arc<dyn Database>) -> i64 {
        let id = db
            .create_session(&NewSession {
                question: "Best lunch?".into(),
                option_a: "Pizza".into(),
                option_b: "Tacos".into(),
                option_c: Some("Soup".into()),
                start_time: "2025-09-15 08:00:00".into(),
                end_time: "2025-09-15 15:00:00".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        db.record_vote(id, "04:01", VoteOption::A).await.unwrap();
        db.record_vote(id, "04:02", VoteOption::A).await.unwrap();
        db.record_vote(id, "04:03", VoteOption::B).await.unwrap();
        id
    }

    #[tokio::test]
    async fn manual_sync_writes_both_tabs() {
        let h = harness(false).await;
        let id = session_with_votes(&h.db).await;

        let outcome = h.sync.sync_now(id).await;
        assert_eq!(outcome, SyncOutcome::ok(3));

        let ops = h.ops.lock().unwrap().clone();
        assert_eq!(ops[0], Op::Ensure("Summary".into(), 30, 4));
        assert_eq!(ops[1], Op::Clear("Summary".into()));
        assert_eq!(
            ops[2],
            Op::Write("Summary".into(), "A1".into(), vec![vec![json!("Question"), json!("Best lunch?")]])
        );
        let Op::Write(_, cell, rows) = &ops[4] else {
            panic!("expected summary rows");
        };
        assert_eq!(cell, "A3");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![json!("A"), json!("Pizza"), json!(2), json!("66.7%")]);
        assert_eq!(rows[2], vec![json!("C"), json!("Soup"), json!(0), json!("0.0%")]);
        assert_eq!(
            ops[5],
            Op::Write(
                "Summary".into(),
                "A6".into(),
                vec![vec![json!(""), json!("TOTAL"), json!(3), json!("")]]
            )
        );
        assert_eq!(ops[6], Op::Ensure("Detail".into(), 2000, 2));
        assert_eq!(ops[7], Op::Clear("Detail".into()));
        let Op::Write(_, cell, rows) = &ops[9] else {
            panic!("expected detail rows");
        };
        assert_eq!(cell, "A2");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 2);
    }

    #[tokio::test]
    async fn background_sync_is_debounced() {
        let h = harness(false).await;
        let id = session_with_votes(&h.db).await;

        assert!(h.sync.sync_in_background(id).await.unwrap().success);
        let second = h.sync.sync_in_background(id).await.unwrap();
        assert_eq!(second, SyncOutcome::failed("Debounced"));
        assert_eq!(*h.connects.lock().unwrap(), 1);

        // manual sync ignores the window
        assert!(h.sync.sync_now(id).await.success);
        assert_eq!(*h.connects.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn disabled_in_settings() {
        let h = harness(false).await;
        let id = session_with_votes(&h.db).await;
        h.db.set_setting("sheets_enabled", "0").await.unwrap();

        assert_eq!(
            h.sync.sync_now(id).await,
            SyncOutcome::failed("Sheets sync is disabled in settings")
        );
    }

    #[tokio::test]
    async fn missing_spreadsheet_id() {
        let h = harness(false).await;
        let id = session_with_votes(&h.db).await;
        h.db.set_setting("sheets_spreadsheet_id", "").await.unwrap();

        assert_eq!(
            h.sync.sync_now(id).await,
            SyncOutcome::failed("No Spreadsheet ID configured in settings")
        );
    }

    #[tokio::test]
    async fn missing_credentials_file() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.set_setting("sheets_enabled", "1").await.unwrap();
        db.set_setting("sheets_spreadsheet_id", "sheet-1").await.unwrap();
        let sync = SheetsSync::new(
            Arc::clone(&db),
            Arc::new(GoogleConnector),
            "/nonexistent/sa.json",
            Duration::from_secs(30),
        );

        assert_eq!(
            sync.sync_now(1).await,
            SyncOutcome::failed("Credentials file not found: /nonexistent/sa.json")
        );
    }

    #[tokio::test]
    async fn unknown_session() {
        let h = harness(false).await;
        assert_eq!(h.sync.sync_now(99).await, SyncOutcome::failed("Session not found"));
        assert_eq!(*h.connects.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn api_error_reported() {
        let h = harness(true).await;
        let id = session_with_votes(&h.db).await;

        let outcome = h.sync.sync_now(id).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("does not have permission"));
    }

    #[test]
    fn outcome_wire_format() {
        assert_eq!(
            serde_json::to_value(SyncOutcome::ok(4)).unwrap(),
            json!({"success": true, "total": 4})
        );
        assert_eq!(
            serde_json::to_value(SyncOutcome::failed("Debounced")).unwrap(),
            json!({"success": false, "error": "Debounced"})
        );
    }
}
