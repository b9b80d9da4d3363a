//! Pure data types for volley — records, rendered commands, markers, outcomes.
//!
//! This crate is a leaf dependency with no async runtime and no I/O. It
//! exists so the engine and any embedders can share volley's data model
//! without pulling in the engine's transitive dependencies.

pub mod duration;
pub mod outcome;
pub mod record;

// Flat re-exports for convenience
pub use duration::{friendly_duration, parse_duration, DurationParseError};
pub use outcome::{JobOutcome, OutcomeKind};
pub use record::{Record, RenderedCommand};
