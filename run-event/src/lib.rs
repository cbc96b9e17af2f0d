//! Run stream protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of a single run-stream event and envelope injection.
//! It does not depend on parley. Parley bridges its internal events into [`RunStreamEvent`]
//! and calls `to_json` before handing lines to a consumer.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::RunStreamEvent;
