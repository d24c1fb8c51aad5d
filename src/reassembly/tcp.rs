//! Handshake tracking and in-order delivery of TCP payload.
//!
//! A connection is tracked from its SYN and offered to the handler once the
//! three-way handshake completes. Payload is delivered per half in sequence
//! order: retransmitted bytes are trimmed and segments that arrive ahead of a
//! gap wait in a bounded buffer. FIN on both halves closes the connection and
//! RST resets it.
//!
//! At most `max_connections` connections are tracked. Opening one more evicts
//! the oldest; an evicted established connection is reported as reset.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, trace, warn};

use super::packet::{decode, TcpSegment};
use super::source::PacketSource;
use super::types::*;
use crate::error_handling::types::EngineError;

/// Connections tracked at once unless configured otherwise.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16384;

/// Opaque identity of a tracked connection for the lifetime of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    SynSent,
    SynReceived,
    Established,
}

/// Receive state of one direction of a connection.
#[derive(Debug)]
struct HalfStream {
    /// Sequence number of the next byte to deliver.
    next_seq: u32,
    /// Stream offset of `next_seq`; unwraps sequence numbers across 2^32.
    offset: u64,
    pending: BTreeMap<u64, Vec<u8>>,
    pending_bytes: usize,
    fin_at: Option<u64>,
    fin_seen: bool,
}

impl HalfStream {
    fn new(isn: u32) -> Self {
        Self {
            next_seq: isn.wrapping_add(1),
            offset: 0,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            fin_at: None,
            fin_seen: false,
        }
    }

    fn advance(&mut self, len: usize) {
        self.offset += len as u64;
        self.next_seq = self.next_seq.wrapping_add(len as u32);
    }

    /// Accepts a segment and returns the bytes that became deliverable.
    fn accept(&mut self, seq: u32, payload: &[u8], fin: bool, max_pending: usize) -> Vec<u8> {
        let delta = i64::from(seq.wrapping_sub(self.next_seq) as i32);
        let start = self.offset as i64 + delta;
        let mut out = Vec::new();

        if start <= self.offset as i64 {
            let skip = (self.offset as i64 - start) as usize;
            if skip < payload.len() {
                out.extend_from_slice(&payload[skip..]);
                self.advance(payload.len() - skip);
            }
        } else if !payload.is_empty() {
            let key = start as u64;
            let held = self.pending.get(&key).map_or(0, Vec::len);
            if held < payload.len() {
                let after = self.pending_bytes - held + payload.len();
                if after > max_pending {
                    warn!(
                        "Out-of-order buffer full ({} bytes), dropping {} byte segment",
                        self.pending_bytes,
                        payload.len()
                    );
                } else {
                    self.pending.insert(key, payload.to_vec());
                    self.pending_bytes = after;
                }
            }
        }

        if fin && start >= 0 {
            self.fin_at = Some(start as u64 + payload.len() as u64);
        }

        loop {
            let Some(key) = self.pending.keys().next().copied() else {
                break;
            };
            if key > self.offset {
                break;
            }
            if let Some(held) = self.pending.remove(&key) {
                self.pending_bytes -= held.len();
                let skip = (self.offset - key) as usize;
                if skip < held.len() {
                    out.extend_from_slice(&held[skip..]);
                    self.advance(held.len() - skip);
                }
            }
        }

        if let Some(at) = self.fin_at {
            if at <= self.offset {
                self.fin_seen = true;
            }
        }
        out
    }
}

#[derive(Debug)]
struct Connection {
    handle: ConnectionHandle,
    addr: AddressTuple,
    state: HandshakeState,
    /// A segment was cut short by the snapshot length.
    truncated: bool,
    initiator: HalfStream,
    responder: HalfStream,
}

type ConnectionKey = (SocketAddrV4, SocketAddrV4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

/// Reassembles TCP streams from a [`PacketSource`] and reports them to a
/// [`StreamHandler`].
pub struct TcpReassembler<P: PacketSource> {
    source: P,
    stop: Arc<AtomicBool>,
    max_pending_bytes: usize,
    max_connections: usize,
    connections: HashMap<ConnectionKey, Connection>,
    /// Tracked connections by handle, oldest first.
    age: BTreeMap<u64, ConnectionKey>,
    next_handle: u64,
    summary: EngineSummary,
}

impl<P: PacketSource> TcpReassembler<P> {
    pub fn new(source: P, stop: Arc<AtomicBool>, max_pending_bytes: usize) -> Self {
        Self {
            source,
            stop,
            max_pending_bytes,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connections: HashMap::new(),
            age: BTreeMap::new(),
            next_handle: 0,
            summary: EngineSummary::default(),
        }
    }

    /// Caps the number of tracked connections, at least one.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Connections currently tracked, including unfinished handshakes.
    pub fn tracked_connections(&self) -> usize {
        self.connections.len()
    }

    fn forget(&mut self, key: &ConnectionKey) -> Option<Connection> {
        let conn = self.connections.remove(key)?;
        self.age.remove(&conn.handle.0);
        Some(conn)
    }

    /// Drops the oldest connection; an established one is reported as reset.
    fn evict_oldest(&mut self, handler: &mut dyn StreamHandler<ConnectionHandle>) -> Flow {
        let Some((_, key)) = self.age.pop_first() else {
            return Flow::Continue;
        };
        let Some(conn) = self.connections.remove(&key) else {
            return Flow::Continue;
        };
        self.summary.connections_evicted += 1;
        if conn.state != HandshakeState::Established {
            trace!("{} {} evicted before its handshake completed", conn.handle, conn.addr);
            return Flow::Continue;
        }
        warn!(
            "Tracking limit of {} connections reached, dropping {} {}",
            self.max_connections, conn.handle, conn.addr
        );
        if Self::notify(handler, conn.handle, conn.addr, Phase::Reset) == Verdict::Halt {
            return Flow::Halt;
        }
        Flow::Continue
    }

    fn open(
        &mut self,
        seg: &TcpSegment<'_>,
        handler: &mut dyn StreamHandler<ConnectionHandle>,
    ) -> Flow {
        while self.connections.len() >= self.max_connections {
            if self.evict_oldest(handler) == Flow::Halt {
                return Flow::Halt;
            }
            if self.age.is_empty() {
                break;
            }
        }
        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;
        trace!("SYN {} -> {} tracked as {}", seg.source, seg.dest, handle);
        self.age.insert(handle.0, (seg.source, seg.dest));
        self.connections.insert(
            (seg.source, seg.dest),
            Connection {
                handle,
                addr: AddressTuple::new(seg.source, seg.dest),
                state: HandshakeState::SynSent,
                truncated: false,
                initiator: HalfStream::new(seg.seq),
                responder: HalfStream::new(0),
            },
        );
        Flow::Continue
    }

    fn notify(
        handler: &mut dyn StreamHandler<ConnectionHandle>,
        handle: ConnectionHandle,
        addr: AddressTuple,
        phase: Phase<'_>,
    ) -> Verdict {
        handler.on_notification(Notification {
            handle,
            addr,
            phase,
        })
    }

    fn process(
        &mut self,
        seg: TcpSegment<'_>,
        handler: &mut dyn StreamHandler<ConnectionHandle>,
    ) -> Flow {
        let forward = (seg.source, seg.dest);
        let reverse = (seg.dest, seg.source);
        let (key, from_initiator) = if self.connections.contains_key(&forward) {
            (forward, true)
        } else if self.connections.contains_key(&reverse) {
            (reverse, false)
        } else {
            if seg.flags.syn() && !seg.flags.ack() && !seg.flags.rst() {
                return self.open(&seg, handler);
            }
            return Flow::Continue;
        };

        let max_pending = self.max_pending_bytes;
        let Some(conn) = self.connections.get_mut(&key) else {
            return Flow::Continue;
        };
        let handle = conn.handle;
        let addr = conn.addr;

        if seg.flags.rst() {
            let established = conn.state == HandshakeState::Established;
            self.forget(&key);
            if established {
                debug!("{} {} reset", handle, addr);
                if Self::notify(handler, handle, addr, Phase::Reset) == Verdict::Halt {
                    return Flow::Halt;
                }
            }
            return Flow::Continue;
        }

        // a fresh SYN on a tracked tuple: the old connection is gone
        if from_initiator && seg.flags.syn() && !seg.flags.ack() {
            if conn.state == HandshakeState::SynSent {
                conn.initiator = HalfStream::new(seg.seq);
                return Flow::Continue;
            }
            let established = conn.state == HandshakeState::Established;
            self.forget(&key);
            if established {
                debug!("{} {} superseded by a new SYN", handle, addr);
                if Self::notify(handler, handle, addr, Phase::Reset) == Verdict::Halt {
                    return Flow::Halt;
                }
            }
            return self.open(&seg, handler);
        }

        match conn.state {
            HandshakeState::SynSent => {
                if !from_initiator
                    && seg.flags.syn()
                    && seg.flags.ack()
                    && seg.ack == conn.initiator.next_seq
                {
                    conn.responder = HalfStream::new(seg.seq);
                    conn.state = HandshakeState::SynReceived;
                }
                return Flow::Continue;
            }
            HandshakeState::SynReceived => {
                if !from_initiator && seg.flags.syn() && seg.flags.ack() {
                    conn.responder = HalfStream::new(seg.seq);
                    return Flow::Continue;
                }
                if !(from_initiator && seg.flags.ack() && seg.ack == conn.responder.next_seq) {
                    return Flow::Continue;
                }
                conn.state = HandshakeState::Established;
                self.summary.connections_offered += 1;
                match Self::notify(handler, handle, addr, Phase::Established) {
                    Verdict::Collect => {}
                    Verdict::Ignore => {
                        self.forget(&key);
                        return Flow::Continue;
                    }
                    Verdict::Halt => return Flow::Halt,
                }
            }
            HandshakeState::Established => {}
        }

        let Some(conn) = self.connections.get_mut(&key) else {
            return Flow::Continue;
        };
        if seg.is_truncated() {
            self.summary.truncated_segments += 1;
        }
        if seg.is_truncated() && !conn.truncated {
            conn.truncated = true;
            warn!(
                "{} {}: segment captured with {} of {} payload bytes, the stream will stall",
                handle,
                addr,
                seg.payload.len(),
                seg.wire_len
            );
        }
        let half = if from_initiator {
            &mut conn.initiator
        } else {
            &mut conn.responder
        };
        let delivered = half.accept(seg.seq, seg.payload, seg.flags.fin(), max_pending);
        let closed = conn.initiator.fin_seen && conn.responder.fin_seen;

        if !delivered.is_empty() {
            let phase = if from_initiator {
                Phase::Data {
                    from_initiator: &delivered,
                    from_responder: &[],
                }
            } else {
                Phase::Data {
                    from_initiator: &[],
                    from_responder: &delivered,
                }
            };
            match Self::notify(handler, handle, addr, phase) {
                Verdict::Collect => {}
                Verdict::Ignore => {
                    self.forget(&key);
                    return Flow::Continue;
                }
                Verdict::Halt => return Flow::Halt,
            }
        }

        if closed {
            self.forget(&key);
            debug!("{} {} closed", handle, addr);
            if Self::notify(handler, handle, addr, Phase::Closed) == Verdict::Halt {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }
}

impl<P: PacketSource> ReassemblyEngine for TcpReassembler<P> {
    type Handle = ConnectionHandle;

    fn run(
        &mut self,
        handler: &mut dyn StreamHandler<ConnectionHandle>,
    ) -> Result<EngineSummary, EngineError> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("Capture stop requested");
                self.summary.stopped = true;
                break;
            }
            let packet = match self.source.next_packet()? {
                Some(packet) => packet,
                None => break,
            };
            self.summary.packets += 1;
            let Some(segment) = decode(packet.link, &packet.data) else {
                self.summary.skipped_packets += 1;
                continue;
            };
            if self.process(segment, handler) == Flow::Halt {
                warn!("Stream handler halted the capture");
                self.summary.halted = true;
                break;
            }
        }
        // stop wins over end-of-input when the stop killed the source
        if self.stop.load(Ordering::SeqCst) {
            self.summary.stopped = true;
        }
        Ok(self.summary.clone())
    }
}
