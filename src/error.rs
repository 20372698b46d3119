//! Error types for the voting kiosk.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// PN532 / I2C reader errors.
#[derive(Debug, thiserror::Error)]
pub enum NfcError {
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("I2C transfer failed: {0}")]
    Transport(String),

    #[error("Reader did not acknowledge command 0x{command:02X}")]
    NoAck { command: u8 },

    #[error("Reader not ready after {0:?}")]
    Timeout(Duration),

    #[error("Malformed frame: {0}")]
    Frame(String),
}

/// Google Sheets sync errors.
#[derive(Debug, thiserror::Error)]
pub enum SheetsError {
    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Token exchange failed: {0}")]
    Auth(String),

    #[error("Sheets API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Signed vote-token errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Bad signature")]
    BadSignature,

    #[error("Token expired ({age_secs}s old)")]
    Expired { age_secs: i64 },
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sync_step() -> Result<(), SheetsError> {
        Err(DatabaseError::Query("no such table: votes".into()))?
    }

    #[test]
    fn wrapped_layers_keep_context() {
        let err = sync_step().unwrap_err();
        assert!(matches!(err, SheetsError::Database(DatabaseError::Query(_))));
        assert_eq!(
            err.to_string(),
            "Database error: Query failed: no such table: votes"
        );
        assert_eq!(
            NfcError::NoAck { command: 0x4A }.to_string(),
            "Reader did not acknowledge command 0x4A"
        );
    }
}
