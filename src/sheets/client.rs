//! Google Sheets v4 REST client authenticated with a service account.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SheetsError;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SCOPES: &str = "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Google caps assertion lifetime at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the access token actually expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The operations sync needs from a spreadsheet.
#[async_trait]
pub trait SpreadsheetApi: Send + Sync {
    /// Create the tab if it does not exist.
    async fn ensure_worksheet(&self, title: &str, rows: u32, cols: u32) -> Result<(), SheetsError>;

    /// Clear every value on the tab.
    async fn clear(&self, title: &str) -> Result<(), SheetsError>;

    /// Write `rows` starting at `start_cell` (e.g. `A3`).
    async fn write(&self, title: &str, start_cell: &str, rows: Vec<Vec<Value>>) -> Result<(), SheetsError>;
}

/// The fields of a service-account key file we use.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub async fn from_file(path: &Path) -> Result<Self, SheetsError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SheetsError::Credentials(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| SheetsError::Credentials(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// One spreadsheet, reached through the Sheets REST API.
pub struct GoogleSheets {
    client: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    spreadsheet_id: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheets {
    pub fn new(key: ServiceAccountKey, spreadsheet_id: impl Into<String>) -> Result<Self, SheetsError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SheetsError::Credentials(format!("invalid private key: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            key,
            encoding_key,
            spreadsheet_id: spreadsheet_id.into(),
            api_base: SHEETS_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    pub async fn from_credentials_file(
        path: &Path,
        spreadsheet_id: impl Into<String>,
    ) -> Result<Self, SheetsError> {
        Self::new(ServiceAccountKey::from_file(path).await?, spreadsheet_id)
    }

    /// Point at a different API root (used by tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn assertion(&self) -> Result<String, SheetsError> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: SCOPES.to_string(),
            aud: self.key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| SheetsError::Auth(e.to_string()))
    }

    /// A valid access token, exchanging a fresh assertion when needed.
    async fn access_token(&self) -> Result<String, SheetsError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.assertion()?;
        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetsError::Auth(format!("{status}: {body}")));
        }
        let token: TokenResponse = resp.json().await?;
        debug!(expires_in = token.expires_in, "Sheets access token refreshed");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{suffix}", self.api_base, self.spreadsheet_id)
    }

    /// `.../values/<segment>`, with the segment percent-encoded by `Url`.
    fn values_url(&self, segment: &str) -> Result<reqwest::Url, SheetsError> {
        let mut url = reqwest::Url::parse(&self.url("/values"))
            .map_err(|e| SheetsError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| SheetsError::InvalidUrl(self.api_base.clone()))?
            .push(segment);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, SheetsError> {
        let token = self.access_token().await?;
        let resp = request.bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetsError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }
        Ok(resp.json().await.unwrap_or(Value::Null))
    }

    async fn worksheet_titles(&self) -> Result<Vec<String>, SheetsError> {
        let body = self
            .send(
                self.client
                    .get(self.url(""))
                    .query(&[("fields", "sheets.properties.title")]),
            )
            .await?;
        Ok(body["sheets"]
            .as_array()
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|s| s["properties"]["title"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Pull `error.message` out of a Google error body, else the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// `'Title'!A1`, quoting the title as A1 notation requires.
fn a1_range(title: &str, cell: &str) -> String {
    format!("'{}'!{cell}", title.replace('\'', "''"))
}

#[async_trait]
impl SpreadsheetApi for GoogleSheets {
    async fn ensure_worksheet(&self, title: &str, rows: u32, cols: u32) -> Result<(), SheetsError> {
        if self.worksheet_titles().await?.iter().any(|t| t == title) {
            return Ok(());
        }
        debug!(title, "Adding worksheet");
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": { "rowCount": rows, "columnCount": cols }
                    }
                }
            }]
        });
        self.send(self.client.post(self.url(":batchUpdate")).json(&body))
            .await
            .map(|_| ())
    }

    async fn clear(&self, title: &str) -> Result<(), SheetsError> {
        let range = format!("'{}'", title.replace('\'', "''"));
        self.send(
            self.client
                .post(self.values_url(&format!("{range}:clear"))?)
                .json(&json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn write(&self, title: &str, start_cell: &str, rows: Vec<Vec<Value>>) -> Result<(), SheetsError> {
        let range = a1_range(title, start_cell);
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": rows });
        self.send(
            self.client
                .put(self.values_url(&range)?)
                .query(&[("valueInputOption", "RAW")])
                .json(&body),
        )
        .await
        .map(|_| ())
    }
}
