//! Event protocol - kinds, validation, construction and description of wire events
//!
//! Inbound JSON goes through [`validation::decode_wire_event`] before anything
//! else sees it; outbound events are built by [`construct::EventFactory`],
//! which re-validates what it stamps.

pub mod construct;
pub mod display;
pub mod kind;
pub mod validation;

pub use construct::EventFactory;
pub use kind::{ActionVerb, EventKind};
pub use validation::{
    decode_wire_event, decode_wire_value, is_valid, validate, DecodeError, ValidationError,
};
