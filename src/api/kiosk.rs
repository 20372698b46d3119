//! Public kiosk routes — welcome, ballot, vote submission, result data.
//!
//! Vote-flow failures are never HTTP errors: every outcome is a [`Screen`]
//! the kiosk front-end renders.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::AppState;
use crate::config::{ERROR_DISPLAY_SECONDS, RESULTS_DISPLAY_SECONDS, TOKEN_MAX_AGE};
use crate::error::DatabaseError;
use crate::kiosk::{KioskEvent, touch_guard};
use crate::voting::schedule::local_now;
use crate::voting::{BallotOption, Tally, VoteOption, VotingSession};

/// Why a vote could not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteErrorCode {
    TokenExpired,
    AlreadyVoted,
    SessionChanged,
    InvalidRequest,
    SessionNotFound,
    InvalidOption,
    UnknownError,
}

impl VoteErrorCode {
    pub fn message(&self) -> &'static str {
        match self {
            Self::TokenExpired => "Your session has expired. Please tap your card again.",
            Self::AlreadyVoted => "You have already voted this week!",
            Self::SessionChanged => "The voting session changed. Please tap your card again.",
            Self::InvalidRequest => "Invalid request. Please try again.",
            Self::SessionNotFound => "Voting session not found.",
            Self::InvalidOption => "Invalid option selected.",
            Self::UnknownError => "An unexpected error occurred.",
        }
    }

    /// Unknown codes map to `UnknownError`.
    pub fn from_code(code: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(code.to_string()))
            .unwrap_or(Self::UnknownError)
    }
}

/// What the kiosk should display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    Welcome {
        session: VotingSession,
        error_display_ms: u64,
    },
    Closed,
    Vote {
        session: VotingSession,
        options: Vec<BallotOption>,
        token: String,
    },
    ThankYou {
        session_id: i64,
        results_display_seconds: u64,
    },
    Error {
        code: VoteErrorCode,
        message: String,
        error_display_seconds: u64,
    },
}

impl Screen {
    pub fn error(code: VoteErrorCode) -> Self {
        Self::Error {
            code,
            message: code.message().to_string(),
            error_display_seconds: ERROR_DISPLAY_SECONDS,
        }
    }

    fn thank_you(session_id: i64) -> Self {
        Self::ThankYou {
            session_id,
            results_display_seconds: RESULTS_DISPLAY_SECONDS,
        }
    }
}

/// Collapse a store failure into the generic error screen.
fn or_error_screen(result: Result<Screen, DatabaseError>) -> Json<Screen> {
    Json(result.unwrap_or_else(|e| {
        error!(error = %e, "Vote flow failed");
        Screen::error(VoteErrorCode::UnknownError)
    }))
}

// ── Health / static ─────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "vote-kiosk"
    }))
}

pub async fn kiosk_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        touch_guard::script(),
    )
}

// ── Kiosk screens ───────────────────────────────────────────────────────

async fn welcome_screen(state: &AppState) -> Result<Screen, DatabaseError> {
    Ok(match state.db.active_session(&local_now()).await? {
        Some(session) => Screen::Welcome {
            session,
            error_display_ms: ERROR_DISPLAY_SECONDS * 1000,
        },
        None => Screen::Closed,
    })
}

pub async fn kiosk(State(state): State<AppState>) -> Json<Screen> {
    or_error_screen(welcome_screen(&state).await)
}

pub async fn ballot(State(state): State<AppState>, Path(token): Path<String>) -> Json<Screen> {
    or_error_screen(ballot_screen(&state, token).await)
}

async fn ballot_screen(state: &AppState, token: String) -> Result<Screen, DatabaseError> {
    let Ok(claims) = state.signer.verify(&token, TOKEN_MAX_AGE) else {
        return Ok(Screen::error(VoteErrorCode::TokenExpired));
    };

    let session = match state.db.active_session(&local_now()).await? {
        Some(active) if active.id == claims.session_id => active,
        _ => return Ok(Screen::error(VoteErrorCode::SessionChanged)),
    };

    if state.db.card_has_voted(&claims.uid, session.id).await? {
        return Ok(Screen::error(VoteErrorCode::AlreadyVoted));
    }

    Ok(Screen::Vote {
        options: session.options(),
        session,
        token,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitVote {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub option: String,
}

/// A body that is not a `{token, option}` object is an invalid request,
/// reported as a screen like every other vote failure.
pub async fn submit_vote(
    State(state): State<AppState>,
    body: Result<Json<SubmitVote>, JsonRejection>,
) -> Json<Screen> {
    match body {
        Ok(Json(body)) => or_error_screen(record_ballot(&state, body).await),
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected vote body");
            Json(Screen::error(VoteErrorCode::InvalidRequest))
        }
    }
}

async fn record_ballot(state: &AppState, body: SubmitVote) -> Result<Screen, DatabaseError> {
    let chosen = body.option.trim().to_ascii_uppercase();
    if body.token.is_empty() || chosen.is_empty() {
        return Ok(Screen::error(VoteErrorCode::InvalidRequest));
    }

    let Ok(claims) = state.signer.verify(&body.token, TOKEN_MAX_AGE) else {
        return Ok(Screen::error(VoteErrorCode::TokenExpired));
    };

    let Some(session) = state.db.get_session(claims.session_id).await? else {
        return Ok(Screen::error(VoteErrorCode::SessionNotFound));
    };

    let option = match chosen.parse::<VoteOption>() {
        Ok(option) if session.offers(option) => option,
        _ => return Ok(Screen::error(VoteErrorCode::InvalidOption)),
    };

    if !state.db.record_vote(session.id, &claims.uid, option).await? {
        return Ok(Screen::error(VoteErrorCode::AlreadyVoted));
    }
    info!(session_id = session.id, option = %option, "Vote recorded");

    announce_vote(state, session.id).await;
    Ok(Screen::thank_you(session.id))
}

/// Post-commit side effects. The ballot is already counted, so failures
/// here are logged and never reach the voter.
async fn announce_vote(state: &AppState, session_id: i64) {
    match state.db.get_setting("sheets_enabled").await {
        Ok(enabled) if enabled.as_deref() == Some("1") => {
            state.sheets.sync_in_background(session_id);
        }
        Ok(_) => {}
        Err(e) => warn!(session_id, error = %e, "Could not read Sheets setting after vote"),
    }

    match state.db.total_votes(session_id).await {
        Ok(total) => state.hub.emit_kiosk(KioskEvent::VoteUpdate { session_id, total }),
        Err(e) => warn!(session_id, error = %e, "Could not count votes for live update"),
    }
}

pub async fn thank_you(State(state): State<AppState>, Path(session_id): Path<i64>) -> Json<Screen> {
    let result = match state.db.get_session(session_id).await {
        Ok(Some(_)) => Ok(Screen::thank_you(session_id)),
        Ok(None) => welcome_screen(&state).await,
        Err(e) => Err(e),
    };
    or_error_screen(result)
}

#[derive(Debug, Deserialize)]
pub struct ErrorQuery {
    pub msg: Option<String>,
}

pub async fn error_screen(Query(query): Query<ErrorQuery>) -> Json<Screen> {
    let code = query
        .msg
        .as_deref()
        .map(VoteErrorCode::from_code)
        .unwrap_or(VoteErrorCode::UnknownError);
    Json(Screen::error(code))
}

/// Live counts for the thank-you chart. Unknown sessions report nothing.
pub async fn results_data(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Result<Json<Tally>, super::error::ApiError> {
    Ok(Json(state.db.vote_counts(session_id).await?.unwrap_or_default()))
}
