pub mod packet;
pub mod source;
pub mod tcp;
pub mod types;

pub use source::{open_source, CaptureStopper, PacketSource, PcapSource};
pub use tcp::{ConnectionHandle, TcpReassembler, DEFAULT_MAX_CONNECTIONS};
pub use types::{
    AddressTuple, EngineSummary, Notification, Phase, ReassemblyEngine, StreamHandler, Verdict,
};
