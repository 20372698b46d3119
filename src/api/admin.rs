//! Admin routes — login, sessions, cards, results, export, settings.

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use super::auth::bearer_token;
use super::error::ApiError;
use crate::export::{build_csv, csv_filename};
use crate::voting::schedule::{db_time_to_form, form_time_to_db, local_now};
use crate::voting::{NewSession, Tally, VotingSession};

const REQUIRED_FIELDS_MSG: &str = "Please fill in all required fields.";

// ── Auth ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hash = state.db.admin_password_hash().await?;

    let verified = match hash {
        Some(hash) => tokio::task::spawn_blocking(move || bcrypt::verify(body.password, &hash))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .unwrap_or(false),
        None => false,
    };

    if !verified {
        warn!("Admin login failed");
        return Err(ApiError::Unauthorized(Some("Incorrect password.".into())));
    }

    let token = state.admin_sessions.create().await;
    Ok(Json(json!({ "token": token })))
}

pub async fn logout(State(state): State<AppState>, request: Request<Body>) -> StatusCode {
    if let Some(token) = bearer_token(&request) {
        state.admin_sessions.revoke(token).await;
    }
    StatusCode::NO_CONTENT
}

// ── Dashboard ───────────────────────────────────────────────────────────

pub async fn dashboard(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let active = state.db.active_session(&local_now()).await?;
    let sessions = state.db.list_sessions().await?;
    let total_cards = state
        .db
        .list_cards()
        .await?
        .iter()
        .filter(|c| c.is_active)
        .count();
    let votes_today = match &active {
        Some(session) => state.db.total_votes(session.id).await?,
        None => 0,
    };

    Ok(Json(json!({
        "active_session": active,
        "sessions": sessions,
        "total_cards": total_cards,
        "votes_today": votes_today,
    })))
}

// ── Sessions ────────────────────────────────────────────────────────────

/// A session plus its times in `datetime-local` form.
#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: VotingSession,
    pub start_time_html: String,
    pub end_time_html: String,
}

impl From<VotingSession> for SessionView {
    fn from(session: VotingSession) -> Self {
        Self {
            start_time_html: db_time_to_form(&session.start_time),
            end_time_html: db_time_to_form(&session.end_time),
            session,
        }
    }
}

/// Session editor payload. Times are `YYYY-MM-DDTHH:MM`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionForm {
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: Option<String>,
    pub option_d: Option<String>,
    pub start_time: String,
    pub end_time: String,
    /// Omitted on edit keeps the current state.
    pub is_active: Option<bool>,
}

impl SessionForm {
    fn into_new_session(self) -> Result<NewSession, ApiError> {
        let draft = NewSession {
            question: self.question,
            option_a: self.option_a,
            option_b: self.option_b,
            option_c: self.option_c,
            option_d: self.option_d,
            start_time: self.start_time,
            end_time: self.end_time,
        }
        .normalized();

        if !draft.has_required_fields() {
            return Err(ApiError::BadRequest(REQUIRED_FIELDS_MSG.into()));
        }

        let start_time = form_time_to_db(&draft.start_time)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid start time: {}", draft.start_time)))?;
        let end_time = form_time_to_db(&draft.end_time)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid end time: {}", draft.end_time)))?;

        Ok(NewSession {
            start_time,
            end_time,
            ..draft
        })
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let sessions: Vec<SessionView> = state
        .db
        .list_sessions()
        .await?
        .into_iter()
        .map(SessionView::from)
        .collect();
    Ok(Json(sessions))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(form): Json<SessionForm>,
) -> Result<impl IntoResponse, ApiError> {
    let session = form.into_new_session()?;
    let id = state.db.create_session(&session).await?;
    info!(session_id = id, question = %session.question, "Session created");
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .db
        .get_session(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found.".into()))?;
    Ok(Json(SessionView::from(session)))
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(form): Json<SessionForm>,
) -> Result<impl IntoResponse, ApiError> {
    let current = state
        .db
        .get_session(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found.".into()))?;

    let is_active = form.is_active.unwrap_or(current.is_active);
    let session = form.into_new_session()?;
    state.db.update_session(id, &session, is_active).await?;
    info!(session_id = id, is_active, "Session updated");

    let updated = state
        .db
        .get_session(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found.".into()))?;
    Ok(Json(SessionView::from(updated)))
}

// ── Cards ───────────────────────────────────────────────────────────────

pub async fn list_cards(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.list_cards().await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnrollRequest {
    pub uid: String,
    pub label: Option<String>,
}

pub async fn enroll_card(
    State(state): State<AppState>,
    Json(body): Json<EnrollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = body.uid.trim();
    if uid.is_empty() {
        return Err(ApiError::BadRequest("Card UID is required.".into()));
    }
    let label = body
        .label
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    state.db.enroll_card(uid, label).await?;
    info!(uid, label = ?label, "Card enrolled");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "uid": uid, "label": label.unwrap_or_default() })),
    ))
}

pub async fn deactivate_card(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db.deactivate_card(id).await?;
    info!(card_id = id, "Card deactivated");
    Ok(StatusCode::NO_CONTENT)
}

// ── Results / export ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<i64>,
}

/// Explicit id first, then the active session, then the newest one.
pub async fn results(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.db.list_sessions().await?;

    let selected = match query.session_id {
        Some(id) => state.db.get_session(id).await?,
        None => match state.db.active_session(&local_now()).await? {
            Some(active) => Some(active),
            None => sessions.first().cloned(),
        },
    };
    let selected_id = selected.as_ref().map(|s| s.id).or(query.session_id);

    let tally = match &selected {
        Some(session) => state.db.vote_counts(session.id).await?.unwrap_or_default(),
        None => Tally::default(),
    };

    Ok(Json(json!({
        "sessions": sessions,
        "selected": selected,
        "selected_id": selected_id,
        "counts": tally.counts,
        "total": tally.total,
    })))
}

pub async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    let session_id = match query.session_id {
        Some(id) => id,
        None => state
            .db
            .list_sessions()
            .await?
            .first()
            .map(|s| s.id)
            .ok_or_else(|| ApiError::NotFound("No sessions available.".into()))?,
    };

    let session = state
        .db
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found.".into()))?;
    let tally = state
        .db
        .vote_counts(session_id)
        .await?
        .unwrap_or_else(|| Tally::from_rows(&session, &[]));
    let votes = state.db.votes_for_export(session_id).await?;

    let body = build_csv(&session, &tally, &votes).map_err(|e| ApiError::Internal(e.to_string()))?;
    let filename = csv_filename(&session.question, Local::now().date_naive());
    info!(session_id, votes = votes.len(), "CSV export");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename.replace('"', "")),
            ),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SheetsExportRequest {
    pub session_id: Option<i64>,
}

pub async fn export_sheets(
    State(state): State<AppState>,
    Json(body): Json<SheetsExportRequest>,
) -> impl IntoResponse {
    let Some(session_id) = body.session_id else {
        return Json(json!({ "success": false, "error": "No session selected" }));
    };
    let outcome = state.sheets.sync_now(session_id).await;
    Json(serde_json::to_value(outcome).unwrap_or_default())
}

// ── Settings ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub spreadsheet_id: String,
    pub sheets_enabled: bool,
}

async fn load_settings(state: &AppState) -> Result<Settings, ApiError> {
    Ok(Settings {
        spreadsheet_id: state
            .db
            .get_setting("sheets_spreadsheet_id")
            .await?
            .unwrap_or_default(),
        sheets_enabled: state.db.get_setting("sheets_enabled").await?.as_deref() == Some("1"),
    })
}

pub async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_settings(&state).await?))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<Settings>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .set_setting("sheets_spreadsheet_id", body.spreadsheet_id.trim())
        .await?;
    state
        .db
        .set_setting("sheets_enabled", if body.sheets_enabled { "1" } else { "0" })
        .await?;
    info!(sheets_enabled = body.sheets_enabled, "Settings saved");
    Ok(Json(load_settings(&state).await?))
}

// ── Scan simulation ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SimulateScan {
    pub uid: String,
}

/// Feed a UID through the same gates a physical tap goes through.
pub async fn simulate_scan(
    State(state): State<AppState>,
    Json(body): Json<SimulateScan>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = body.uid.trim().to_ascii_uppercase();
    if uid.is_empty() {
        return Err(ApiError::BadRequest("Card UID is required.".into()));
    }
    info!(uid = %uid, "Simulated card scan");
    Ok(Json(state.scans.process(&uid).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> SessionForm {
        SessionForm {
            question: " Best lunch? ".into(),
            option_a: "Pizza".into(),
            option_b: "Tacos".into(),
            option_c: Some("  ".into()),
            option_d: None,
            start_time: "2025-09-15T09:00".into(),
            end_time: "2025-09-15T15:30".into(),
            is_active: None,
        }
    }

    #[test]
    fn form_converts_times_and_trims() {
        let session = form().into_new_session().unwrap();
        assert_eq!(session.question, "Best lunch?");
        assert_eq!(session.option_c, None);
        assert_eq!(session.start_time, "2025-09-15 09:00:00");
        assert_eq!(session.end_time, "2025-09-15 15:30:00");
    }

    #[test]
    fn form_requires_fields() {
        let err = SessionForm {
            option_b: "   ".into(),
            ..form()
        }
        .into_new_session()
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg == REQUIRED_FIELDS_MSG));

        let err = SessionForm {
            end_time: String::new(),
            ..form()
        }
        .into_new_session()
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg == REQUIRED_FIELDS_MSG));
    }

    #[test]
    fn form_rejects_garbage_times() {
        let err = SessionForm {
            start_time: "next tuesday".into(),
            ..form()
        }
        .into_new_session()
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.starts_with("Invalid start time")));
    }

    #[test]
    fn session_view_flattens_and_adds_form_times() {
        let view = SessionView::from(VotingSession {
            id: 3,
            question: "Q".into(),
            option_a: "a".into(),
            option_b: "b".into(),
            option_c: None,
            option_d: None,
            start_time: "2025-09-15 09:00:00".into(),
            end_time: "2025-09-15 15:00:00".into(),
            created_at: "2025-09-14 10:00:00".into(),
            is_active: true,
        });
        let json = serde_json::to_value(view).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["start_time_html"], "2025-09-15T09:00");
        assert_eq!(json["end_time_html"], "2025-09-15T15:00");
    }
}
