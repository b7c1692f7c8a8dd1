//! Replays a saved interaction history as the inbound stream

use serde_json::Value;
use shared_types::Event;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::ports::{MessageTransport, TransportError};
use crate::protocol::display::short_description;

/// Yields the events of a history file in batches, then stays quiet
#[derive(Debug)]
pub struct ReplayTransport {
    pending: Mutex<VecDeque<String>>,
    batch_size: usize,
}

impl ReplayTransport {
    pub fn new(events: Vec<String>, batch_size: usize) -> Self {
        Self {
            pending: Mutex::new(events.into()),
            batch_size: batch_size.max(1),
        }
    }

    /// Load a JSON array of events, as written by the history dump
    pub async fn from_path(path: &Path, batch_size: usize) -> Result<Self, TransportError> {
        let content = tokio::fs::read_to_string(path).await?;
        let values: Vec<Value> = serde_json::from_str(&content)?;
        let events = values
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            path = %path.display(),
            events = events.len(),
            "Loaded replay history"
        );
        Ok(Self::new(events, batch_size))
    }

    pub async fn remaining(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait::async_trait]
impl MessageTransport for ReplayTransport {
    async fn receive(&self, timeout: Duration) -> Result<Vec<String>, TransportError> {
        let batch: Vec<String> = {
            let mut pending = self.pending.lock().await;
            let take = self.batch_size.min(pending.len());
            pending.drain(..take).collect()
        };

        if batch.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(batch)
    }

    async fn send(&self, channel: &str, event: &Event) -> Result<(), TransportError> {
        tracing::info!(
            channel = %channel,
            event = %short_description(event),
            "Replay output"
        );
        Ok(())
    }
}
