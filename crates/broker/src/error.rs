//! Broker-adapter error taxonomy, matching §6/§7: transient (retry),
//! permanent (do not retry), auth/session (escalate to login collaborator).

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("transient broker error: {0}")]
    Transient(String),
    #[error("permanent broker error: {0}")]
    Permanent(String),
    #[error("broker auth/session error: {0}")]
    AuthExpired(String),
}

impl BrokerError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
