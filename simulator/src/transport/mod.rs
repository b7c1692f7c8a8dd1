//! Message transports
//!
//! The orchestrator only sees [`MessageTransport`]; these are the concrete
//! streams it can be wired to.

pub mod memory;
pub mod replay;
pub mod stdio;

pub use memory::MemoryTransport;
pub use replay::ReplayTransport;
pub use stdio::StdioTransport;

use std::sync::Arc;

use crate::config::{SimulatorConfig, TransportKind};
use crate::ports::{MessageTransport, TransportError};

/// Build the transport selected by configuration
pub async fn build_transport(
    config: &SimulatorConfig,
) -> Result<Arc<dyn MessageTransport>, TransportError> {
    match config.transport.kind {
        TransportKind::Stdio => Ok(Arc::new(StdioTransport::new())),
        TransportKind::Replay => {
            let path = config.transport.replay_path.as_deref().ok_or_else(|| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "replay transport requires a replay_path",
                ))
            })?;
            let transport =
                ReplayTransport::from_path(path, config.transport.replay_batch_size).await?;
            Ok(Arc::new(transport))
        }
    }
}
