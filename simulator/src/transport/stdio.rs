//! JSON lines over stdin/stdout

use serde::Serialize;
use shared_types::Event;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::ports::{MessageTransport, TransportError};

#[derive(Serialize)]
struct OutboundLine<'a> {
    channel: &'a str,
    event: &'a Event,
}

/// One wire event per stdin line; published events go to stdout tagged with their channel
#[derive(Debug)]
pub struct StdioTransport {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    stdout: Mutex<Stdout>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MessageTransport for StdioTransport {
    async fn receive(&self, timeout: Duration) -> Result<Vec<String>, TransportError> {
        let mut lines = self.lines.lock().await;
        match tokio::time::timeout(timeout, lines.next_line()).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(Some(line))) if line.trim().is_empty() => Ok(Vec::new()),
            Ok(Ok(Some(line))) => Ok(vec![line]),
            Ok(Ok(None)) => Err(TransportError::Closed),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn send(&self, channel: &str, event: &Event) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(&OutboundLine { channel, event })?;
        line.push(b'\n');

        let mut stdout = self.stdout.lock().await;
        stdout.write_all(&line).await?;
        stdout.flush().await?;
        Ok(())
    }
}
