pub mod capture;
pub use capture::{AdmissionPolicy, CaptureController, CaptureReport, CaptureStats};

pub mod clock;
pub mod configuration;
pub mod error_handling;
pub mod event_log;
pub mod reassembly;

pub mod recorder;
pub use recorder::{Recorder, RunReport};

pub mod session_management;
