//! Binary event log.
//!
//! - `binary`: little-endian primitive writers with capacity checks
//! - `types`: event kinds, directions and format constants
//! - `encoder`: record and header framing
//! - `writer`: the append-and-flush sink wrapper

pub mod binary;
pub mod encoder;
pub mod types;
pub mod writer;

#[cfg(test)]
pub(crate) mod testutil;

pub use types::{Direction, Event, EventKind, StreamId};
pub use writer::EventWriter;
