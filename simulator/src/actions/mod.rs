//! Action lifecycle - state machine engine, action catalog, override stacks
//! and the registry/dispatcher that ties them together.
//!
//! Everything here is synchronous and free of I/O: rendering goes through a
//! borrowed [`crate::ports::RenderSink`] and outbound events are collected in
//! an outbox the caller publishes.

pub mod catalog;
pub mod effects;
pub mod error;
pub mod fsm;
pub mod override_stack;
pub mod registry;

pub use catalog::{ActionSpec, Arbitration, Completion, ACTION_SPECS};
pub use effects::{ActionEffects, ActionSettings, EffectContext, ExecutionMode};
pub use error::ActionError;
pub use fsm::{ActionHandler, Trigger, TriggerInput};
pub use override_stack::OverrideStacks;
pub use registry::Dispatcher;
