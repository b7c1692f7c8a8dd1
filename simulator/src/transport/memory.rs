//! In-process event stream

use shared_types::Event;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::ports::{MessageTransport, TransportError};

/// Queue-backed transport
///
/// With a loopback channel, events sent on it are also queued for receive,
/// the way a shared stream echoes a publisher's own events.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: Mutex<VecDeque<String>>,
    arrived: Notify,
    sent: Mutex<Vec<(String, Event)>>,
    loopback_channel: Option<String>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loopback(channel: impl Into<String>) -> Self {
        Self {
            loopback_channel: Some(channel.into()),
            ..Self::default()
        }
    }

    pub async fn push_raw(&self, raw: impl Into<String>) {
        self.inbound.lock().await.push_back(raw.into());
        self.arrived.notify_one();
    }

    pub async fn push_event(&self, event: &Event) -> Result<(), TransportError> {
        let raw = serde_json::to_string(event)?;
        self.push_raw(raw).await;
        Ok(())
    }

    /// Everything published so far, as `(channel, event)`
    pub async fn sent(&self) -> Vec<(String, Event)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_on(&self, channel: &str) -> Vec<Event> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, event)| event.clone())
            .collect()
    }

    async fn drain(&self) -> Vec<String> {
        self.inbound.lock().await.drain(..).collect()
    }
}

#[async_trait::async_trait]
impl MessageTransport for MemoryTransport {
    async fn receive(&self, timeout: Duration) -> Result<Vec<String>, TransportError> {
        let batch = self.drain().await;
        if !batch.is_empty() {
            return Ok(batch);
        }

        if tokio::time::timeout(timeout, self.arrived.notified())
            .await
            .is_err()
        {
            return Ok(Vec::new());
        }
        Ok(self.drain().await)
    }

    async fn send(&self, channel: &str, event: &Event) -> Result<(), TransportError> {
        self.sent
            .lock()
            .await
            .push((channel.to_string(), event.clone()));

        if self.loopback_channel.as_deref() == Some(channel) {
            self.push_event(event).await?;
        }
        Ok(())
    }
}
