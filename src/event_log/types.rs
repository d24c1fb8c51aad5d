//! Record-level types shared by the encoder and the writer.

use std::net::SocketAddrV4;

/// Identifier assigned to an admitted stream, unique within one session.
pub type StreamId = u32;

/// Format magic written at the very start of a log, NUL terminated.
pub const MAGIC: &[u8; 11] = b"HCaptureV0\0";

/// Size of the session header: magic plus the wall-clock start seconds.
pub const HEADER_LEN: usize = MAGIC.len() + 8;

/// Size of the `total_length` field that opens every record.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Timestamp plus kind, present in every record after the length prefix.
pub const RECORD_PREAMBLE_LEN: usize = 8 + 1;

/// Largest fixed portion of any record (an open record); payload bytes of a
/// data record follow the fixed portion and never pass through scratch space.
pub const MAX_RECORD_PREFIX: usize = LENGTH_PREFIX_LEN + RECORD_PREAMBLE_LEN + 4 + 4 + 2 + 4 + 2;

/// Event kind tag as stored on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Open = 0,
    Close = 1,
    Data = 2,
}

impl EventKind {
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EventKind::Open),
            1 => Some(EventKind::Close),
            2 => Some(EventKind::Data),
            _ => None,
        }
    }
}

/// Which side of the connection sent a chunk of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// Bytes sent by the side that answered the handshake.
    ResponderToInitiator = 0,
    /// Bytes sent by the side that opened the connection.
    InitiatorToResponder = 1,
}

impl Direction {
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Direction::ResponderToInitiator),
            1 => Some(Direction::InitiatorToResponder),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::ResponderToInitiator => "R->I",
            Direction::InitiatorToResponder => "I->R",
        }
    }
}

/// One loggable event. Data records borrow their payload from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    Open {
        stream_id: StreamId,
        source: SocketAddrV4,
        dest: SocketAddrV4,
    },
    Close {
        stream_id: StreamId,
    },
    Data {
        stream_id: StreamId,
        direction: Direction,
        payload: &'a [u8],
    },
}

impl<'a> Event<'a> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Open { .. } => EventKind::Open,
            Event::Close { .. } => EventKind::Close,
            Event::Data { .. } => EventKind::Data,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Event::Open { stream_id, .. }
            | Event::Close { stream_id }
            | Event::Data { stream_id, .. } => *stream_id,
        }
    }

    /// Bytes of kind-specific fields, payload excluded.
    pub fn fields_len(&self) -> usize {
        match self {
            Event::Open { .. } => 4 + 4 + 2 + 4 + 2,
            Event::Close { .. } => 4,
            Event::Data { .. } => 4 + 1,
        }
    }

    pub fn payload(&self) -> &'a [u8] {
        match self {
            Event::Data { payload, .. } => payload,
            _ => &[],
        }
    }
}
