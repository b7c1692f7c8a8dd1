//! Interaction history
//!
//! Every event the orchestrator received or produced, in the order it saw
//! them. Dumped as a pretty JSON array for offline inspection; the replay
//! transport reads the same format back.

use serde_json::Value;
use shared_types::Event;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Failed to write history: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode history: {0}")]
    Json(#[from] serde_json::Error),
}

/// Entries are kept as wire JSON so rejected inbound payloads fit alongside
/// well-formed events
#[derive(Debug, Default, Clone)]
pub struct InteractionHistory {
    entries: Vec<Value>,
}

impl InteractionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &Event) {
        match serde_json::to_value(event) {
            Ok(value) => self.entries.push(value),
            Err(err) => {
                tracing::warn!(error = %err, uid = %event.uid, "Event left out of history");
            }
        }
    }

    /// Record an inbound payload as received, before it is validated
    pub fn push_raw(&mut self, value: Value) {
        self.entries.push(value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    /// Write the full history, replacing any existing file
    pub async fn save_json(&self, path: &Path) -> Result<usize, HistoryError> {
        let content = serde_json::to_string_pretty(&self.entries)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;

        tracing::info!(
            path = %path.display(),
            events = self.entries.len(),
            "Interaction history saved"
        );
        Ok(self.entries.len())
    }
}
