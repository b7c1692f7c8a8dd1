//! Collaborator ports injected into the orchestrator
//!
//! The action engine never owns I/O. Rendering and the event stream are
//! reached through these two traits so the state machines can run against
//! in-memory doubles.

use shared_types::{Event, Modality};
use std::time::Duration;

/// Observability surface for the action currently in effect per modality
///
/// Calls never influence control flow.
pub trait RenderSink: Send {
    /// Replace what the modality's slot shows
    fn show(&mut self, family: Modality, text: &str);

    /// Clear the modality's slot
    fn hide(&mut self, family: Modality);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport is closed")]
    Closed,

    #[error("Failed to encode event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Publish/subscribe event stream with polling receive
#[async_trait::async_trait]
pub trait MessageTransport: Send + Sync {
    /// Wait up to `timeout` for the next batch of raw wire events
    ///
    /// An empty batch means nothing arrived in time.
    async fn receive(&self, timeout: Duration) -> Result<Vec<String>, TransportError>;

    /// Publish one event on a channel
    async fn send(&self, channel: &str, event: &Event) -> Result<(), TransportError>;
}
