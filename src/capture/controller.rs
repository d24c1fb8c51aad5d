//! Notification-driven capture state machine.
//!
//! This module provides `CaptureController`, the [`StreamHandler`] the
//! reassembly engine drives. Each connection handle is in one of three
//! states:
//!
//! - *Unobserved*: no registry entry (the default, and forever the state of
//!   connections the admission policy rejects)
//! - *Admitted*: a registry entry exists and bytes are being collected
//! - *Terminal*: the entry was released after a close or reset
//!
//! Every transition that produces a record goes through the single
//! [`Session`], so records reach the sink in notification order with
//! non-decreasing timestamps.
//!
//! Logging
//! - INFO for stream start/close
//! - WARN for notifications that the engine contract says cannot happen, and
//!   for connections dropped because no state could be allocated
//! - ERROR for failed record writes; a partial record halts the capture
//!   under every write-error policy
//! - TRACE for short (64-byte) previews of captured chunks

use std::fmt::Debug;
use std::hash::Hash;
use std::io::Write;

use log::{error, info, trace, warn};

use super::policy::AdmissionPolicy;
use crate::clock::MonotonicSource;
use crate::configuration::types::WriteErrorPolicy;
use crate::error_handling::types::{RecordError, RegistryError};
use crate::event_log::{Direction, Event, StreamId};
use crate::reassembly::types::{AddressTuple, Notification, Phase, StreamHandler, Verdict};
use crate::session_management::{Session, SessionRegistry};

/// Counters kept over the life of one capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub streams_admitted: u64,
    pub streams_rejected: u64,
    pub streams_dropped: u64,
    pub streams_closed: u64,
    pub data_records: u64,
    pub payload_bytes: u64,
    pub write_failures: u64,
    pub anomalies: u64,
}

/// What is left once a capture is finished.
pub struct CaptureReport<W> {
    pub sink: W,
    pub stats: CaptureStats,
    /// Streams that were still admitted when the capture ended.
    pub open_streams: Vec<StreamId>,
    /// The error that halted the capture, if any.
    pub fatal: Option<RecordError>,
}

pub struct CaptureController<W: Write, S: MonotonicSource, H> {
    session: Session<W, S>,
    registry: SessionRegistry<H>,
    policy: AdmissionPolicy,
    on_write_error: WriteErrorPolicy,
    stats: CaptureStats,
    fatal: Option<RecordError>,
}

impl<W, S, H> CaptureController<W, S, H>
where
    W: Write,
    S: MonotonicSource,
    H: Eq + Hash + Copy + Debug,
{
    pub fn new(session: Session<W, S>, policy: AdmissionPolicy, on_write_error: WriteErrorPolicy) -> Self {
        Self {
            session,
            registry: SessionRegistry::new(),
            policy,
            on_write_error,
            stats: CaptureStats::default(),
            fatal: None,
        }
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn registry(&self) -> &SessionRegistry<H> {
        &self.registry
    }

    pub fn session(&self) -> &Session<W, S> {
        &self.session
    }

    pub fn is_halted(&self) -> bool {
        self.fatal.is_some()
    }

    /// Flushes the sink and reports the final state of the capture.
    pub fn finish(self) -> Result<CaptureReport<W>, RecordError> {
        let mut open_streams: Vec<StreamId> = self
            .registry
            .live_streams()
            .map(|entry| entry.stream_id)
            .collect();
        open_streams.sort_unstable();
        if !open_streams.is_empty() {
            info!(
                "{} stream(s) still open at shutdown: {:?}",
                open_streams.len(),
                open_streams
            );
        }

        let stats = self.stats;
        info!(
            "Capture finished: admitted={}, rejected={}, dropped={}, closed={}, data_records={}, payload_bytes={}, write_failures={}, anomalies={}",
            stats.streams_admitted,
            stats.streams_rejected,
            stats.streams_dropped,
            stats.streams_closed,
            stats.data_records,
            stats.payload_bytes,
            stats.write_failures,
            stats.anomalies
        );

        let sink = self.session.finish()?;
        Ok(CaptureReport {
            sink,
            stats,
            open_streams,
            fatal: self.fatal,
        })
    }

    fn on_established(&mut self, handle: H, addr: AddressTuple) -> Verdict {
        if self.registry.lookup(&handle).is_ok() {
            self.anomaly(format_args!(
                "establishment for already admitted connection {:?} ({})",
                handle, addr
            ));
            return Verdict::Collect;
        }

        if !self.policy.admits(&addr) {
            trace!("Ignoring connection {}", addr);
            self.stats.streams_rejected += 1;
            return Verdict::Ignore;
        }

        let admitted_at = match self.session.now() {
            Ok(ts) => ts,
            Err(e) => return self.fail(e),
        };

        let stream_id = match self.registry.admit(handle, addr, admitted_at) {
            Ok(id) => id,
            Err(e @ (RegistryError::Allocation | RegistryError::Exhausted)) => {
                warn!("Dropping connection {}: {}", addr, e);
                self.stats.streams_dropped += 1;
                return Verdict::Ignore;
            }
            Err(e) => {
                self.anomaly(format_args!("cannot admit {}: {}", addr, e));
                return Verdict::Ignore;
            }
        };
        self.stats.streams_admitted += 1;

        let verdict = self.record(&Event::Open {
            stream_id,
            source: addr.source,
            dest: addr.dest,
        });
        info!("Started recording stream id={} ({})", stream_id, addr);

        match verdict {
            Verdict::Halt => Verdict::Halt,
            _ => Verdict::Collect,
        }
    }

    fn on_data(&mut self, handle: H, from_initiator: &[u8], from_responder: &[u8]) -> Verdict {
        let stream_id = match self.registry.lookup(&handle) {
            Ok(id) => id,
            Err(_) => {
                self.anomaly(format_args!("data for unobserved connection {:?}", handle));
                return Verdict::Ignore;
            }
        };

        if from_initiator.is_empty() && from_responder.is_empty() {
            self.anomaly(format_args!(
                "data notification without new data on stream id={}",
                stream_id
            ));
            return Verdict::Collect;
        }

        let chunks = [
            (Direction::InitiatorToResponder, from_initiator),
            (Direction::ResponderToInitiator, from_responder),
        ];
        for (direction, payload) in chunks {
            if payload.is_empty() {
                continue;
            }
            let preview = &payload[..std::cmp::min(payload.len(), 64)];
            trace!(
                "stream id={} captured {} {} bytes: {}{}",
                stream_id,
                direction.label(),
                payload.len(),
                String::from_utf8_lossy(preview),
                if payload.len() > 64 { " ..." } else { "" }
            );
            let verdict = self.record(&Event::Data {
                stream_id,
                direction,
                payload,
            });
            if verdict == Verdict::Halt {
                return Verdict::Halt;
            }
            self.stats.data_records += 1;
            self.stats.payload_bytes += payload.len() as u64;
        }
        Verdict::Collect
    }

    fn on_closed(&mut self, handle: H, reset: bool) -> Verdict {
        let stream_id = match self.registry.lookup(&handle) {
            Ok(id) => id,
            Err(_) => {
                self.anomaly(format_args!("close for unobserved connection {:?}", handle));
                return Verdict::Ignore;
            }
        };

        let verdict = self.record(&Event::Close { stream_id });
        // the entry goes regardless of whether the close record made it out
        let _ = self.registry.release(&handle);
        self.stats.streams_closed += 1;
        info!(
            "Stream id={} {}",
            stream_id,
            if reset { "reset" } else { "closed" }
        );

        match verdict {
            Verdict::Halt => Verdict::Halt,
            _ => Verdict::Ignore,
        }
    }

    /// Emits one record, applying the write-failure policy.
    fn record(&mut self, event: &Event<'_>) -> Verdict {
        match self.session.emit(event) {
            Ok(_) => Verdict::Collect,
            Err(e @ RecordError::Clock(_)) => self.fail(e),
            Err(e) => {
                self.stats.write_failures += 1;
                error!(
                    "Failed to write {:?} record for stream id={}: {}",
                    event.kind(),
                    event.stream_id(),
                    e
                );
                match self.on_write_error {
                    _ if e.leaves_log_torn() => self.fail(e),
                    WriteErrorPolicy::Continue => Verdict::Collect,
                    WriteErrorPolicy::Abort => self.fail(e),
                }
            }
        }
    }

    fn fail(&mut self, e: RecordError) -> Verdict {
        error!("Halting capture: {}", e);
        if self.fatal.is_none() {
            self.fatal = Some(e);
        }
        Verdict::Halt
    }

    fn anomaly(&mut self, what: std::fmt::Arguments<'_>) {
        self.stats.anomalies += 1;
        warn!("Warning: {}", what);
    }
}

impl<W, S, H> StreamHandler<H> for CaptureController<W, S, H>
where
    W: Write,
    S: MonotonicSource,
    H: Eq + Hash + Copy + Debug,
{
    fn on_notification(&mut self, notification: Notification<'_, H>) -> Verdict {
        if self.fatal.is_some() {
            return Verdict::Halt;
        }
        match notification.phase {
            Phase::Established => self.on_established(notification.handle, notification.addr),
            Phase::Data {
                from_initiator,
                from_responder,
            } => self.on_data(notification.handle, from_initiator, from_responder),
            Phase::Closed => self.on_closed(notification.handle, false),
            Phase::Reset => self.on_closed(notification.handle, true),
        }
    }
}
