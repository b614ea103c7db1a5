//! Account storage consulted before a client may join the relay.
//!
//! Accounts live in a small SQLite database. Passwords are never written in
//! the clear: each account keeps a random salt and the SHA-256 digest of
//! `salt || password`, both hex encoded. The username is the primary key, so
//! concurrent sign-ups for the same name cannot both succeed.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{CredentialError, RegistrationError};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MOBILE_DIGITS: usize = 10;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    username      TEXT PRIMARY KEY,
    salt          TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    mobile        TEXT NOT NULL
)";

/// Answers whether a username/password pair may log in.
pub trait Authenticator {
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub mobile: String,
}

impl NewAccount {
    /// Trims every field and applies the sign-up rules.
    fn validated(&self) -> Result<NewAccount, RegistrationError> {
        let username = self.username.trim();
        let password = self.password.trim();
        let mobile = self.mobile.trim();

        for (name, value) in [("username", username), ("password", password), ("mobile", mobile)] {
            if value.is_empty() {
                return Err(RegistrationError::MissingField(name));
            }
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(RegistrationError::PasswordTooShort(MIN_PASSWORD_LEN));
        }
        if mobile.len() != MOBILE_DIGITS || !mobile.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RegistrationError::InvalidMobile(MOBILE_DIGITS));
        }

        Ok(NewAccount {
            username: username.to_owned(),
            password: password.to_owned(),
            mobile: mobile.to_owned(),
        })
    }
}

/// SQLite-backed account store. Each call opens its own connection, so
/// threads and separate processes sharing a path see each other's sign-ups.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Opens `path`, creating the database and its schema if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let store = Self { path: path.into() };
        let conn = store.connect()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn register(&self, account: &NewAccount) -> Result<(), RegistrationError> {
        let account = account.validated()?;
        let salt = hex::encode(rand::random::<[u8; 16]>());
        let password_hash = digest(&salt, &account.password);

        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT INTO users (username, salt, password_hash, mobile) VALUES (?1, ?2, ?3, ?4)",
            params![account.username, salt, password_hash, account.mobile],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                return Err(RegistrationError::UsernameTaken(account.username));
            }
            Err(err) => return Err(CredentialError::from(err).into()),
        }

        info!(username = %account.username, "account created");
        Ok(())
    }

    pub fn contains(&self, username: &str) -> Result<bool, CredentialError> {
        let found = self
            .connect()?
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                params![username],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn lookup(&self, username: &str) -> Result<Option<(String, String)>, CredentialError> {
        let row = self
            .connect()?
            .query_row(
                "SELECT salt, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    fn connect(&self) -> Result<Connection, CredentialError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl Authenticator for CredentialStore {
    fn authenticate(&self, username: &str, password: &str) -> bool {
        match self.lookup(username.trim()) {
            Ok(Some((salt, password_hash))) => digest(&salt, password.trim()) == password_hash,
            Ok(None) => false,
            Err(err) => {
                warn!(path = %self.path.display(), error = ?err, "credential store unreadable");
                false
            }
        }
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
