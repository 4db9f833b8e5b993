//! Journal/notifier error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
