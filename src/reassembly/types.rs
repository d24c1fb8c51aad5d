//! The contract between a reassembly engine and the code it drives.
//!
//! An engine calls [`StreamHandler::on_notification`] once per lifecycle
//! event, serially, from its own loop. The handler answers with a
//! [`Verdict`]; on an establishment notification `Collect` asks the engine to
//! keep delivering bytes for that connection and `Ignore` asks it to forget
//! the connection entirely.

use std::fmt;
use std::net::SocketAddrV4;

use crate::error_handling::types::EngineError;

/// Source and destination of a connection, as seen on its first SYN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressTuple {
    pub source: SocketAddrV4,
    pub dest: SocketAddrV4,
}

impl AddressTuple {
    pub fn new(source: SocketAddrV4, dest: SocketAddrV4) -> Self {
        Self { source, dest }
    }
}

impl fmt::Display for AddressTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.dest)
    }
}

/// Lifecycle phase carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase<'a> {
    Established,
    /// Bytes that became available since the previous notification, per sender.
    Data {
        from_initiator: &'a [u8],
        from_responder: &'a [u8],
    },
    Closed,
    Reset,
}

#[derive(Debug, Clone, Copy)]
pub struct Notification<'a, H> {
    pub handle: H,
    pub addr: AddressTuple,
    pub phase: Phase<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Collect,
    Ignore,
    /// Stop the engine loop; the handler hit a condition it cannot continue from.
    Halt,
}

pub trait StreamHandler<H> {
    fn on_notification(&mut self, notification: Notification<'_, H>) -> Verdict;
}

/// Counters an engine reports once its input is exhausted or it was stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSummary {
    pub packets: u64,
    pub skipped_packets: u64,
    pub connections_offered: u64,
    /// Connections dropped to stay under the tracking limit.
    pub connections_evicted: u64,
    /// Segments whose payload was cut short by the snapshot length.
    pub truncated_segments: u64,
    pub halted: bool,
    pub stopped: bool,
}

pub trait ReassemblyEngine {
    type Handle;

    fn run(&mut self, handler: &mut dyn StreamHandler<Self::Handle>) -> Result<EngineSummary, EngineError>;
}
