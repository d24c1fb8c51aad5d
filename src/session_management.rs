//! Capture-session bookkeeping.
//!
//! This module provides the per-run session context and the registry that
//! assigns stream identifiers to admitted connections.

/// Submodule for the stream registry.
pub mod registry;
/// Submodule for the session context (clock, header, writer).
pub mod session;

pub use registry::{SessionRegistry, StreamEntry};
pub use session::Session;
