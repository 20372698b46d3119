//! Signed, time-limited vote tokens.
//!
//! Layout: `base64url(json payload) "." base64url(issued_at) "." base64url(hmac)`,
//! where the HMAC-SHA256 covers the first two segments joined by `.`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// What a vote token authorises: one card, one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteClaims {
    pub uid: String,
    pub session_id: i64,
}

/// Issues and verifies vote tokens with the server secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: SecretString,
}

impl TokenSigner {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC accepts keys of any length")
    }

    pub fn sign(&self, claims: &VoteClaims) -> String {
        self.sign_at(claims, Utc::now().timestamp())
    }

    pub fn sign_at(&self, claims: &VoteClaims, issued_at: i64) -> String {
        let payload = serde_json::to_vec(claims).unwrap_or_default();
        let body = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(issued_at.to_string())
        );
        let mut mac = self.mac();
        mac.update(body.as_bytes());
        let sig = mac.finalize().into_bytes();
        format!("{body}.{}", URL_SAFE_NO_PAD.encode(sig))
    }

    pub fn verify(&self, token: &str, max_age: std::time::Duration) -> Result<VoteClaims, TokenError> {
        self.verify_at(token, max_age, Utc::now().timestamp())
    }

    /// Verify against an explicit clock. The signature is checked before the
    /// payload is decoded.
    pub fn verify_at(
        &self,
        token: &str,
        max_age: std::time::Duration,
        now: i64,
    ) -> Result<VoteClaims, TokenError> {
        let (body, sig_b64) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let (payload_b64, ts_b64) = body.split_once('.').ok_or(TokenError::Malformed)?;

        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac();
        mac.update(body.as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;

        let issued_at: i64 = URL_SAFE_NO_PAD
            .decode(ts_b64)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .and_then(|s| s.parse().ok())
            .ok_or(TokenError::Malformed)?;

        let age_secs = now - issued_at;
        if age_secs > max_age.as_secs() as i64 {
            return Err(TokenError::Expired { age_secs });
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)
    }
}
