pub mod config;
pub mod types;

pub use config::{usage, Args, Config};
pub use types::{CaptureSource, FileConfig, WriteErrorPolicy};
