//! First-time setup wizard (`--setup`).

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use inquire::Password;

use crate::config::{KioskConfig, generate_secret_hex, read_secret_key_file};
use crate::error::ConfigError;
use crate::store::{Database, LibSqlBackend};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    #[error("Passwords do not match.")]
    Mismatch,
    #[error("Password must be at least {MIN_PASSWORD_LEN} characters.")]
    TooShort,
}

/// Both entries must match and be long enough.
pub fn validate_new_password(password: &str, confirm: &str) -> Result<(), PasswordError> {
    if password != confirm {
        return Err(PasswordError::Mismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort);
    }
    Ok(())
}

/// Write a fresh signing key unless one exists. Returns true if written.
pub fn ensure_secret_key(path: &Path) -> Result<bool, ConfigError> {
    if read_secret_key_file(path)?.is_some() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = open_private(path)?;
    file.write_all(generate_secret_hex().as_bytes())?;
    Ok(true)
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::File::create(path)
}

/// Hash and store the admin password.
pub async fn set_admin_password(db: &dyn Database, password: &str) -> anyhow::Result<()> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .context("password hashing task failed")??;
    db.set_admin_password_hash(&hash).await?;
    Ok(())
}

/// Ask twice until the entries agree and are long enough.
fn prompt_new_password() -> anyhow::Result<String> {
    loop {
        let password = Password::new(&format!("Set admin password (min {MIN_PASSWORD_LEN} chars):"))
            .without_confirmation()
            .prompt()?;
        let confirm = Password::new("Confirm password:")
            .without_confirmation()
            .prompt()?;
        match validate_new_password(&password, &confirm) {
            Ok(()) => return Ok(password),
            Err(e) => println!("{e}"),
        }
    }
}

/// Secret key, schema, admin password.
pub async fn run_setup(config: &KioskConfig, host: &str, port: u16) -> anyhow::Result<()> {
    println!("=== School Voting System: First-Time Setup ===\n");

    let key_path = config.secret_key_path();
    if ensure_secret_key(&key_path)
        .with_context(|| format!("writing {}", key_path.display()))?
    {
        println!("Secret key generated.");
    } else {
        println!("Secret key already exists.");
    }

    let db = LibSqlBackend::new_local(&config.database_path)
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    println!("Database initialised.");

    let password = tokio::task::spawn_blocking(prompt_new_password).await??;
    set_admin_password(&db, &password).await?;

    println!("\nAdmin password set.");
    println!("\nSetup complete!");
    println!("  Start server:  vote-kiosk");
    println!("  Admin API:     http://{host}:{port}/api/admin/login");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rules() {
        assert_eq!(validate_new_password("secret", "secret"), Ok(()));
        assert_eq!(validate_new_password("secret", "secreT"), Err(PasswordError::Mismatch));
        assert_eq!(validate_new_password("abc", "abc"), Err(PasswordError::TooShort));
        assert_eq!(validate_new_password("", ""), Err(PasswordError::TooShort));
    }

    #[test]
    fn mismatch_reported_before_length() {
        assert_eq!(validate_new_password("ab", "cd"), Err(PasswordError::Mismatch));
    }

    #[test]
    fn secret_key_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".secret_key");

        assert!(ensure_secret_key(&path).unwrap());
        let first = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first.len(), 64);

        assert!(!ensure_secret_key(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }

    #[cfg(unix)]
    #[test]
    fn secret_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".secret_key");
        ensure_secret_key(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn admin_password_is_hashed() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        set_admin_password(&db, "hunter22").await.unwrap();

        let hash = db.admin_password_hash().await.unwrap().unwrap();
        assert_ne!(hash, "hunter22");
        assert!(bcrypt::verify("hunter22", &hash).unwrap());
        assert!(!bcrypt::verify("hunter2", &hash).unwrap());
    }
}
