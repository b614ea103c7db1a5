use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Why a relay session stopped before or while it was active.
///
/// Every variant is contained in the session that produced it; the listener
/// logs it and nothing else observes it.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket handshake failed")]
    Handshake(#[source] tungstenite::Error),

    #[error("no identity frame received within {0:?}")]
    RegistrationTimeout(Duration),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("failed to read from connection")]
    Receive(#[source] tungstenite::Error),
}

impl SessionError {
    /// Failures caused by a misbehaving or idle client rather than the
    /// transport; these are only worth a debug line.
    pub fn is_quiet(&self) -> bool {
        !matches!(self, SessionError::Receive(_))
    }
}

/// Failure to hand a frame to one peer's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("peer outbound queue is full")]
    QueueFull,

    #[error("peer connection is gone")]
    Disconnected,
}

/// Errors reading a single frame from the transport.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("binary frame is not valid utf-8")]
    InvalidUtf8,

    #[error(transparent)]
    Transport(#[from] tungstenite::Error),
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::InvalidUtf8 => SessionError::ProtocolViolation(err.to_string()),
            FrameError::Transport(source) => SessionError::Receive(source),
        }
    }
}

/// Rejections when creating a new account.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("all fields are required (missing {0})")]
    MissingField(&'static str),

    #[error("password must be at least {0} characters long")]
    PasswordTooShort(usize),

    #[error("mobile number must be a {0}-digit numeric value")]
    InvalidMobile(usize),

    #[error("username '{0}' already exists")]
    UsernameTaken(String),

    #[error("credential store unavailable: {0}")]
    Store(String),
}

/// Problems reading or writing the credential database.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<CredentialError> for RegistrationError {
    fn from(err: CredentialError) -> Self {
        RegistrationError::Store(err.to_string())
    }
}
