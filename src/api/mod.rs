//! HTTP + WebSocket surface of the kiosk server.

pub mod admin;
pub mod auth;
pub mod error;
pub mod kiosk;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::ADMIN_SESSION_TTL;
use crate::kiosk::{EventHub, ScanProcessor, ws};
use crate::sheets::SheetsSync;
use crate::store::Database;
use crate::voting::TokenSigner;

pub use auth::{AdminSessions, spawn_sweep_task};
pub use kiosk::{Screen, VoteErrorCode};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub hub: Arc<EventHub>,
    pub signer: TokenSigner,
    pub admin_sessions: Arc<AdminSessions>,
    pub sheets: Arc<SheetsSync>,
    pub scans: Arc<ScanProcessor>,
}

impl AppState {
    /// Wire a fresh event hub, scan processor and admin session store
    /// around the given store and signer.
    pub fn new(db: Arc<dyn Database>, signer: TokenSigner, sheets: Arc<SheetsSync>) -> Self {
        let hub = EventHub::new();
        let scans = Arc::new(ScanProcessor::new(
            Arc::clone(&db),
            Arc::clone(&hub),
            signer.clone(),
        ));
        Self {
            db,
            hub,
            signer,
            admin_sessions: AdminSessions::new(ADMIN_SESSION_TTL),
            sheets,
            scans,
        }
    }
}

/// Build the full router: kiosk, admin, and WebSocket routes.
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/logout", post(admin::logout))
        .route("/dashboard", get(admin::dashboard))
        .route(
            "/sessions",
            get(admin::list_sessions).post(admin::create_session),
        )
        .route(
            "/sessions/{id}",
            get(admin::get_session).put(admin::update_session),
        )
        .route("/cards", get(admin::list_cards).post(admin::enroll_card))
        .route("/cards/{id}/deactivate", post(admin::deactivate_card))
        .route("/results", get(admin::results))
        .route("/export/csv", get(admin::export_csv))
        .route("/export/sheets", post(admin::export_sheets))
        .route(
            "/settings",
            get(admin::get_settings).put(admin::update_settings),
        )
        .route("/simulate-scan", post(admin::simulate_scan))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ))
        // login sits outside the auth layer
        .route("/login", post(admin::login));

    Router::new()
        .route("/health", get(kiosk::health))
        .route("/static/kiosk.js", get(kiosk::kiosk_script))
        .route("/api/kiosk", get(kiosk::kiosk))
        .route("/api/vote", post(kiosk::submit_vote))
        .route("/api/vote/{token}", get(kiosk::ballot))
        .route("/api/thankyou/{id}", get(kiosk::thank_you))
        .route("/api/error", get(kiosk::error_screen))
        .route("/results-data/{id}", get(kiosk::results_data))
        .route("/ws/kiosk", get(kiosk_ws))
        .route("/ws/admin", get(admin_ws))
        .nest("/api/admin", admin_routes)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn kiosk_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("Kiosk WebSocket client connecting");
    ws.on_upgrade(move |socket| ws::handle_kiosk_socket(socket, state.hub))
}

#[derive(Debug, Deserialize)]
struct AdminWsQuery {
    token: Option<String>,
}

async fn admin_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<AdminWsQuery>,
) -> Response {
    let authorized = match query.token.as_deref() {
        Some(token) => state.admin_sessions.is_valid(token).await,
        None => false,
    };
    if !authorized {
        warn!("Admin WebSocket rejected: no valid session");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    info!("Admin WebSocket client connecting");
    ws.on_upgrade(move |socket| ws::handle_admin_socket(socket, state.hub, state.db))
}
