//! Forward-only log parser used by the tests to check what was written.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use super::types::{Direction, EventKind, HEADER_LEN, MAGIC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    Open {
        stream_id: u32,
        source: SocketAddrV4,
        dest: SocketAddrV4,
    },
    Close {
        stream_id: u32,
    },
    Data {
        stream_id: u32,
        direction: Direction,
        payload: Vec<u8>,
    },
}

impl ParsedEvent {
    pub fn stream_id(&self) -> u32 {
        match self {
            ParsedEvent::Open { stream_id, .. }
            | ParsedEvent::Close { stream_id }
            | ParsedEvent::Data { stream_id, .. } => *stream_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub total_length: u32,
    pub timestamp: u64,
    pub event: ParsedEvent,
}

#[derive(Debug)]
pub struct ParsedLog {
    pub wall_clock_start: u64,
    pub records: Vec<ParsedRecord>,
}

fn bad(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn u64_at(b: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn addr_at(b: &[u8], at: usize) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::from(u32_at(b, at)), u16_at(b, at + 4))
}

/// Parses a complete log. A truncated trailing record is an error.
pub fn parse_log(bytes: &[u8]) -> io::Result<ParsedLog> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(bad("missing header"));
    }
    let wall_clock_start = u64_at(bytes, MAGIC.len());

    let mut records = Vec::new();
    let mut off = HEADER_LEN;
    while off < bytes.len() {
        if bytes.len() - off < 4 {
            return Err(bad("truncated length prefix"));
        }
        let total_length = u32_at(bytes, off);
        let record_end = off + total_length as usize;
        if total_length < 13 {
            return Err(bad("record shorter than its fixed part"));
        }
        if record_end > bytes.len() {
            return Err(bad("truncated record"));
        }
        let body = &bytes[off + 4..record_end];
        let timestamp = u64_at(body, 0);
        let fields = &body[9..];
        let event = match EventKind::from_wire(body[8]).ok_or_else(|| bad("unknown kind"))? {
            EventKind::Open => {
                if fields.len() != 16 {
                    return Err(bad("bad open record"));
                }
                ParsedEvent::Open {
                    stream_id: u32_at(fields, 0),
                    source: addr_at(fields, 4),
                    dest: addr_at(fields, 10),
                }
            }
            EventKind::Close => {
                if fields.len() != 4 {
                    return Err(bad("bad close record"));
                }
                ParsedEvent::Close {
                    stream_id: u32_at(fields, 0),
                }
            }
            EventKind::Data => {
                if fields.len() < 5 {
                    return Err(bad("bad data record"));
                }
                ParsedEvent::Data {
                    stream_id: u32_at(fields, 0),
                    direction: Direction::from_wire(fields[4]).ok_or_else(|| bad("bad direction"))?,
                    payload: fields[5..].to_vec(),
                }
            }
        };
        records.push(ParsedRecord {
            total_length,
            timestamp,
            event,
        });
        off = record_end;
    }

    Ok(ParsedLog {
        wall_clock_start,
        records,
    })
}

/// Counts occurrences of the session header magic anywhere in `bytes`.
pub fn count_magic(bytes: &[u8]) -> usize {
    bytes.windows(MAGIC.len()).filter(|w| *w == MAGIC).count()
}
