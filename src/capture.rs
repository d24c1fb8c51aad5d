//! Capture controller subsystem.
//!
//! This module turns reassembly-engine notifications into log records. The
//! controller owns the session, the stream registry and the admission policy,
//! and is the only writer of the output sink.
//!
//! Re-exports:
//! - [`CaptureController`]: the [`StreamHandler`](crate::reassembly::StreamHandler) implementation
//! - [`AdmissionPolicy`]: destination-port admission predicate
//! - [`CaptureStats`], [`CaptureReport`]: counters and shutdown summary
//!
//! Example:
//! ```
//! use hcapture::capture::{AdmissionPolicy, CaptureController};
//! use hcapture::clock::SystemMonotonic;
//! use hcapture::configuration::types::WriteErrorPolicy;
//! use hcapture::session_management::Session;
//!
//! let session = Session::start(Vec::new(), SystemMonotonic::new(), 0)?;
//! let controller: CaptureController<_, _, u64> =
//!     CaptureController::new(session, AdmissionPolicy::default(), WriteErrorPolicy::Continue);
//! let report = controller.finish()?;
//! assert_eq!(report.sink.len(), 19);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod controller;
pub mod policy;

pub use controller::{CaptureController, CaptureReport, CaptureStats};
pub use policy::{AdmissionPolicy, DEFAULT_ADMISSION_PORT};
