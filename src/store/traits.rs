//! `Database` trait — single async interface for all persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::voting::{Card, ExportedVote, NewSession, Tally, VoteOption, VotingSession};

/// Backend-agnostic database trait covering sessions, cards, votes, and settings.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// The session open for voting at local time `now`
    /// (`YYYY-MM-DD HH:MM:SS`). The newest one wins if schedules overlap.
    async fn active_session(&self, now: &str) -> Result<Option<VotingSession>, DatabaseError>;

    async fn get_session(&self, id: i64) -> Result<Option<VotingSession>, DatabaseError>;

    /// All sessions, newest first.
    async fn list_sessions(&self) -> Result<Vec<VotingSession>, DatabaseError>;

    /// Insert a session. Returns its id.
    async fn create_session(&self, session: &NewSession) -> Result<i64, DatabaseError>;

    async fn update_session(
        &self,
        id: i64,
        session: &NewSession,
        is_active: bool,
    ) -> Result<(), DatabaseError>;

    // ── Cards ───────────────────────────────────────────────────────

    /// True if the card exists and is active.
    async fn card_is_registered(&self, uid: &str) -> Result<bool, DatabaseError>;

    /// True if the card exists in any state.
    async fn card_exists(&self, uid: &str) -> Result<bool, DatabaseError>;

    /// All cards, most recently enrolled first.
    async fn list_cards(&self) -> Result<Vec<Card>, DatabaseError>;

    /// Insert a card, or re-activate and relabel an existing one.
    async fn enroll_card(&self, uid: &str, label: Option<&str>) -> Result<(), DatabaseError>;

    async fn deactivate_card(&self, id: i64) -> Result<(), DatabaseError>;

    // ── Votes ───────────────────────────────────────────────────────

    async fn card_has_voted(&self, uid: &str, session_id: i64) -> Result<bool, DatabaseError>;

    /// Atomically record a ballot and mark the card as having voted.
    /// Returns `false` if the card already voted in this session.
    async fn record_vote(
        &self,
        session_id: i64,
        uid: &str,
        option: VoteOption,
    ) -> Result<bool, DatabaseError>;

    /// Counts for every option the session offers, or `None` for an unknown session.
    async fn vote_counts(&self, session_id: i64) -> Result<Option<Tally>, DatabaseError>;

    async fn total_votes(&self, session_id: i64) -> Result<i64, DatabaseError>;

    /// Ballots in time order. No card UIDs.
    async fn votes_for_export(&self, session_id: i64) -> Result<Vec<ExportedVote>, DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    // ── Admin ───────────────────────────────────────────────────────

    /// Replace the admin password hash.
    async fn set_admin_password_hash(&self, hash: &str) -> Result<(), DatabaseError>;

    async fn admin_password_hash(&self) -> Result<Option<String>, DatabaseError>;
}
