//! Admin login sessions — random bearer tokens held in memory.
//!
//! Tokens do not survive a restart; admins simply log in again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::AppState;
use super::error::ApiError;

const TOKEN_BYTES: usize = 32;
const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Live admin sessions keyed by token, each with its expiry.
pub struct AdminSessions {
    ttl: Duration,
    sessions: RwLock<HashMap<String, Instant>>,
}

impl AdminSessions {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Start a session and return its token.
    pub async fn create(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.sessions
            .write()
            .await
            .insert(token.clone(), Instant::now() + self.ttl);
        info!("Admin logged in");
        token
    }

    pub async fn is_valid(&self, token: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(token)
            .is_some_and(|expires| Instant::now() < *expires)
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop expired sessions. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, expires| now < *expires);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Expired admin sessions swept");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Spawn a background task that periodically sweeps expired sessions.
pub fn spawn_sweep_task(sessions: Arc<AdminSessions>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sessions.sweep().await;
        }
    })
}

/// Extract the token from the Authorization header
pub fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Rejects requests without a live admin session.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request).ok_or(ApiError::Unauthorized(None))?;
    if !state.admin_sessions.is_valid(token).await {
        return Err(ApiError::Unauthorized(None));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_is_64_hex_chars_and_valid() {
        let sessions = AdminSessions::new(Duration::from_secs(60));
        let token = sessions.create().await;
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(sessions.is_valid(&token).await);
        assert!(!sessions.is_valid("nope").await);
    }

    #[tokio::test]
    async fn tokens_are_unique() {
        let sessions = AdminSessions::new(Duration::from_secs(60));
        assert_ne!(sessions.create().await, sessions.create().await);
    }

    #[tokio::test]
    async fn revoke_invalidates() {
        let sessions = AdminSessions::new(Duration::from_secs(60));
        let token = sessions.create().await;
        assert!(sessions.revoke(&token).await);
        assert!(!sessions.is_valid(&token).await);
        assert!(!sessions.revoke(&token).await);
    }

    #[tokio::test]
    async fn expired_sessions_rejected_and_swept() {
        let sessions = AdminSessions::new(Duration::ZERO);
        let token = sessions.create().await;
        assert!(!sessions.is_valid(&token).await);
        assert_eq!(sessions.sweep().await, 1);
        assert_eq!(sessions.len().await, 0);
    }

    #[test]
    fn bearer_extraction() {
        let req = Request::builder()
            .header("Authorization", "Bearer abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc123"));

        let req = Request::builder()
            .header("Authorization", "Basic abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);
    }
}
