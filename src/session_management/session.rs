use std::io::Write;

use log::info;

use crate::clock::{MonotonicSource, RelativeClock};
use crate::error_handling::types::{RecordError, SessionError};
use crate::event_log::{Event, EventWriter};

/// One log file's worth of state: the relative clock, the wall-clock start
/// and the writer. The header is written by [`Session::start`] and by nothing
/// else, so a session holds exactly one header.
pub struct Session<W: Write, S: MonotonicSource> {
    clock: RelativeClock<S>,
    wall_clock_start: u64,
    writer: EventWriter<W>,
    last_timestamp: u64,
}

impl<W: Write, S: MonotonicSource> Session<W, S> {
    /// Fixes the reference timestamp and writes the session header.
    pub fn start(sink: W, source: S, wall_clock_start: u64) -> Result<Self, SessionError> {
        let clock = RelativeClock::start(source)?;
        let mut writer = EventWriter::new(sink);
        writer.write_header(wall_clock_start)?;
        info!("Session started (wall clock {}s)", wall_clock_start);
        Ok(Self {
            clock,
            wall_clock_start,
            writer,
            last_timestamp: 0,
        })
    }

    /// Current relative timestamp in milliseconds.
    pub fn now(&self) -> Result<u64, RecordError> {
        Ok(self.clock.elapsed()?)
    }

    /// Timestamps and appends one record, returning its timestamp.
    pub fn emit(&mut self, event: &Event<'_>) -> Result<u64, RecordError> {
        let timestamp = self.now()?;
        self.writer.append(event, timestamp)?;
        self.last_timestamp = timestamp;
        Ok(timestamp)
    }

    pub fn wall_clock_start(&self) -> u64 {
        self.wall_clock_start
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn records_written(&self) -> u64 {
        self.writer.records_written()
    }

    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    pub fn sink(&self) -> &W {
        self.writer.get_ref()
    }

    /// Flushes the sink and returns it.
    pub fn finish(self) -> Result<W, RecordError> {
        self.writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::tests::ManualClock;
    use crate::event_log::testutil::{count_magic, parse_log};

    #[test]
    fn start_writes_header_once() {
        let clock = ManualClock::at(100);
        let mut session = Session::start(Vec::new(), clock.clone(), 1_600_000_000).unwrap();
        for id in 0..5 {
            clock.advance(3);
            session.emit(&Event::Close { stream_id: id }).unwrap();
        }
        let bytes = session.finish().unwrap();
        assert_eq!(count_magic(&bytes), 1);

        let log = parse_log(&bytes).unwrap();
        assert_eq!(log.wall_clock_start, 1_600_000_000);
        let stamps: Vec<u64> = log.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![3, 6, 9, 12, 15]);
    }

    #[test]
    fn start_fails_without_clock() {
        let clock = ManualClock::at(0);
        clock.break_source();
        let err = Session::start(Vec::new(), clock, 0).err().unwrap();
        assert!(matches!(err, SessionError::Clock(_)));
    }

    #[test]
    fn emit_surfaces_clock_failure() {
        let clock = ManualClock::at(0);
        let mut session = Session::start(Vec::new(), clock.clone(), 0).unwrap();
        clock.break_source();
        assert!(matches!(
            session.emit(&Event::Close { stream_id: 0 }),
            Err(RecordError::Clock(_))
        ));
        assert_eq!(session.records_written(), 0);
    }
}
