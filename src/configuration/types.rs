use serde::Deserialize;
use std::path::PathBuf;

/// What the controller does when a record cannot be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteErrorPolicy {
    /// Log the failure and keep capturing; the record is lost. A write that
    /// fails part way through a record still halts the capture.
    #[default]
    Continue,
    /// Stop the capture and exit non-zero once the sink is finalized.
    Abort,
}

/// Where packets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Live capture through the external capture tool. `None` lets the tool
    /// pick its default interface.
    Live {
        interface: Option<String>,
        tool: String,
    },
    /// A pcap or pcapng file.
    File(PathBuf),
    /// A pcap or pcapng stream on standard input.
    Stdin,
}

/// Optional settings read from a TOML file; every field may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub admission_port: u16,
    pub interface: Option<String>,
    pub capture_tool: String,
    pub snaplen: u32,
    pub on_write_error: WriteErrorPolicy,
    pub max_pending_bytes: usize,
    pub max_connections: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            admission_port: crate::capture::DEFAULT_ADMISSION_PORT,
            interface: None,
            capture_tool: String::from("tcpdump"),
            snaplen: 65535,
            on_write_error: WriteErrorPolicy::Continue,
            max_pending_bytes: 1024 * 1024,
            max_connections: crate::reassembly::DEFAULT_MAX_CONNECTIONS,
        }
    }
}
