//! The persistence collaborator (§6) and the alert `Notifier` (§7),
//! bundled in one crate since both are simple pluggable sinks the engine
//! wires up at startup and both treat the same way: append-only,
//! fire-and-forget, never blocking the decision loop.

pub mod error;
pub mod events;
pub mod notifier;

pub use error::JournalError;
pub use events::JournalEvent;
pub use notifier::{Alert, ChannelNotifier, NullNotifier, Notifier, Throttle};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only event sink. Flushes are fire-and-forget: a failure is
/// logged and surfaced on the next loop iteration, never blocking the
/// decision cycle that produced the event (§5).
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, event: JournalEvent) -> Result<(), JournalError>;
}

/// Appends one JSON object per line to a file, matching the corpus's
/// plain-text audit-trail convention (`services/oms/src/audit.rs`) rather
/// than a binary format, so a warm restart can replay it with any JSON
/// tool.
pub struct FileJournal {
    path: PathBuf,
    writer: Mutex<Option<tokio::fs::File>>,
}

impl FileJournal {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), writer: Mutex::new(None) }
    }

    async fn writer(&self) -> Result<tokio::fs::File, JournalError> {
        OpenOptions::new().create(true).append(true).open(&self.path).await.map_err(JournalError::from)
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn append(&self, event: JournalEvent) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            *guard = Some(self.writer().await?);
        }
        let file = guard.as_mut().expect("just populated");
        file.write_all(line.as_bytes()).await.map_err(JournalError::from)?;
        file.flush().await.map_err(JournalError::from)
    }
}

#[derive(Default)]
pub struct NullJournal;

#[async_trait]
impl Journal for NullJournal {
    async fn append(&self, _event: JournalEvent) -> Result<(), JournalError> {
        Ok(())
    }
}

/// Convenience alias used by the engine binary when wiring a trait object.
pub type SharedJournal = Arc<dyn Journal>;
