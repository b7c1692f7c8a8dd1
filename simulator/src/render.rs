//! Render sinks
//!
//! [`TracingRenderSink`] logs what would be on screen; [`RecordingRenderSink`]
//! keeps the current display per modality for inspection.

use shared_types::Modality;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ports::RenderSink;

/// Emits every display change as a structured log line
#[derive(Debug, Default)]
pub struct TracingRenderSink;

impl RenderSink for TracingRenderSink {
    fn show(&mut self, family: Modality, text: &str) {
        tracing::info!(family = %family, display = %text, "Show");
    }

    fn hide(&mut self, family: Modality) {
        tracing::info!(family = %family, "Hide");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOp {
    Show { family: Modality, display: String },
    Hide { family: Modality },
}

#[derive(Debug, Default)]
struct Recording {
    current: BTreeMap<Modality, String>,
    ops: Vec<RenderOp>,
}

/// Shareable in-memory sink; clones observe the same recording
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderSink {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingRenderSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// What the modality currently shows, if anything
    pub fn current(&self, family: Modality) -> Option<String> {
        self.lock().current.get(&family).cloned()
    }

    pub fn ops(&self) -> Vec<RenderOp> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }
}

impl RenderSink for RecordingRenderSink {
    fn show(&mut self, family: Modality, text: &str) {
        let mut recording = self.lock();
        recording.current.insert(family, text.to_string());
        recording.ops.push(RenderOp::Show {
            family,
            display: text.to_string(),
        });
    }

    fn hide(&mut self, family: Modality) {
        let mut recording = self.lock();
        recording.current.remove(&family);
        recording.ops.push(RenderOp::Hide { family });
    }
}
