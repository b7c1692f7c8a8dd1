//! ACE Simulator - action lifecycle and modality arbitration
//!
//! This crate tracks every in-flight action on a UMIM-style event stream,
//! drives each one through its state machine, and arbitrates which action of
//! an output modality is in effect while the others wait in the background.

pub mod actions;
pub mod actors;
pub mod config;
pub mod history;
pub mod ports;
pub mod protocol;
pub mod render;
pub mod transport;
