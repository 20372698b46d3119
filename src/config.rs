//! Configuration: paths, timing constants, and the signing secret.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngCore;
use secrecy::SecretString;
use tracing::warn;

use crate::error::ConfigError;

/// Lifespan of a signed vote token.
pub const TOKEN_MAX_AGE: Duration = Duration::from_secs(300);
/// Same card UID is ignored for this long after a scan.
pub const SCAN_COOLDOWN: Duration = Duration::from_secs(2);
/// Wait before re-initialising the reader after an I2C error.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Thank-you screen auto-return delay.
pub const RESULTS_DISPLAY_SECONDS: u64 = 15;
/// Error overlay auto-hide delay.
pub const ERROR_DISPLAY_SECONDS: u64 = 5;
/// Minimum gap between automatic background Sheets syncs.
pub const SHEETS_SYNC_DEBOUNCE: Duration = Duration::from_secs(30);
/// Admin login lifetime.
pub const ADMIN_SESSION_TTL: Duration = Duration::from_secs(12 * 3600);

/// Coolwell PN532 HAT default; confirm with `i2cdetect -y 1`.
pub const DEFAULT_NFC_I2C_ADDRESS: u16 = 0x24;

const SECRET_KEY_FILE: &str = ".secret_key";

/// Kiosk configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct KioskConfig {
    pub base_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub nfc_i2c_bus: String,
    pub nfc_i2c_address: u16,
}

impl KioskConfig {
    /// Build config from `VOTING_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_dir = std::env::var("VOTING_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let nfc_i2c_address = match std::env::var("VOTING_NFC_I2C_ADDRESS") {
            Ok(raw) => parse_i2c_address(&raw)?,
            Err(_) => DEFAULT_NFC_I2C_ADDRESS,
        };

        Ok(Self {
            database_path: env_path("VOTING_DB_PATH").unwrap_or_else(|| base_dir.join("voting.db")),
            log_dir: env_path("VOTING_LOG_DIR").unwrap_or_else(|| base_dir.join("logs")),
            credentials_path: env_path("VOTING_CREDENTIALS_PATH")
                .unwrap_or_else(|| base_dir.join("credentials").join("google_service_account.json")),
            nfc_i2c_bus: std::env::var("VOTING_NFC_I2C_BUS")
                .unwrap_or_else(|_| "/dev/i2c-1".to_string()),
            nfc_i2c_address,
            base_dir,
        })
    }

    /// Config rooted at `base_dir` with default file layout.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            database_path: base_dir.join("voting.db"),
            log_dir: base_dir.join("logs"),
            credentials_path: base_dir.join("credentials").join("google_service_account.json"),
            nfc_i2c_bus: "/dev/i2c-1".to_string(),
            nfc_i2c_address: DEFAULT_NFC_I2C_ADDRESS,
            base_dir,
        }
    }

    pub fn secret_key_path(&self) -> PathBuf {
        self.base_dir.join(SECRET_KEY_FILE)
    }

    /// Load the signing secret.
    ///
    /// The key file written by `--setup` wins, then `VOTING_SECRET_KEY`.
    /// Without either, a random per-process key is used, which invalidates
    /// outstanding vote tokens on restart.
    pub fn load_secret_key(&self) -> Result<SecretString, ConfigError> {
        if let Some(key) = read_secret_key_file(&self.secret_key_path())? {
            return Ok(SecretString::from(key));
        }
        if let Ok(key) = std::env::var("VOTING_SECRET_KEY") {
            if !key.trim().is_empty() {
                return Ok(SecretString::from(key.trim().to_string()));
            }
        }
        warn!("No secret key file or VOTING_SECRET_KEY; using an ephemeral key");
        Ok(SecretString::from(generate_secret_hex()))
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

/// Read and trim the key file. `Ok(None)` if it does not exist or is blank.
pub fn read_secret_key_file(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let key = contents.trim().to_string();
            Ok(if key.is_empty() { None } else { Some(key) })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Io(e)),
    }
}

/// 32 random bytes as 64 lowercase hex chars.
pub fn generate_secret_hex() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Accepts `0x24`, `0X24` or decimal `36`.
pub fn parse_i2c_address(raw: &str) -> Result<u16, ConfigError> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse::<u16>(),
    };
    parsed.map_err(|e| ConfigError::InvalidValue {
        key: "VOTING_NFC_I2C_ADDRESS".into(),
        message: format!("{raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn i2c_address_formats() {
        assert_eq!(parse_i2c_address("0x24").unwrap(), 0x24);
        assert_eq!(parse_i2c_address("0X48").unwrap(), 0x48);
        assert_eq!(parse_i2c_address("36").unwrap(), 36);
        assert!(parse_i2c_address("zz").is_err());
    }

    #[test]
    fn default_layout_under_base_dir() {
        let config = KioskConfig::with_base_dir("/srv/kiosk");
        assert_eq!(config.database_path, PathBuf::from("/srv/kiosk/voting.db"));
        assert_eq!(config.log_dir, PathBuf::from("/srv/kiosk/logs"));
        assert_eq!(
            config.credentials_path,
            PathBuf::from("/srv/kiosk/credentials/google_service_account.json")
        );
        assert_eq!(config.secret_key_path(), PathBuf::from("/srv/kiosk/.secret_key"));
    }

    #[test]
    fn secret_key_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let config = KioskConfig::with_base_dir(dir.path());
        std::fs::write(config.secret_key_path(), "abc123\n").unwrap();
        let key = config.load_secret_key().unwrap();
        assert_eq!(key.expose_secret(), "abc123");
    }

    #[test]
    fn missing_key_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_secret_key_file(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn generated_secret_is_64_hex_chars() {
        let key = generate_secret_hex();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_secret_hex());
    }
}
