//! The error taxonomy of §7, shared as a common enum that per-crate error
//! types convert into at their boundary with the event loop.

use thiserror::Error;

/// Coarse error kind used for alert throttling (§7: "throttled per error
/// kind").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Data,
    FeedStale,
    BrokerTransient,
    BrokerPermanent,
    AuthSession,
    StopArmingFailure,
    InvariantViolation,
}

/// Top-level error type the event loop deals in. Domain crates define
/// their own `thiserror` enums and convert into this one at the seam.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed tick dropped: {0}")]
    Data(String),

    #[error("feed stale: {0}")]
    FeedStale(String),

    #[error("broker transient error: {0}")]
    BrokerTransient(String),

    #[error("broker permanent error: {0}")]
    BrokerPermanent(String),

    #[error("auth/session error: {0}")]
    AuthSession(String),

    #[error("protective stop could not be armed: {0}")]
    StopArmingFailure(String),

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl CoreError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Data(_) => ErrorKind::Data,
            Self::FeedStale(_) => ErrorKind::FeedStale,
            Self::BrokerTransient(_) => ErrorKind::BrokerTransient,
            Self::BrokerPermanent(_) => ErrorKind::BrokerPermanent,
            Self::AuthSession(_) => ErrorKind::AuthSession,
            Self::StopArmingFailure(_) => ErrorKind::StopArmingFailure,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }
}
