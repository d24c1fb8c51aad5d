//! Append-only record writer.
//!
//! `EventWriter` owns the output sink. Every append writes exactly one record
//! and flushes before returning, so a record is persisted before control goes
//! back to the reassembly engine.
//!
//! A sink that fails after taking only part of a record leaves a fragment the
//! forward-only reader cannot frame past. The writer reports that as
//! [`RecordError::PartialRecord`] and refuses every later append.

use std::io::{self, Write};

use log::trace;

use super::encoder::{encode_header, encode_prefix};
use super::types::{Event, MAX_RECORD_PREFIX};
use crate::error_handling::types::RecordError;

pub struct EventWriter<W: Write> {
    sink: W,
    scratch: [u8; MAX_RECORD_PREFIX],
    header_written: bool,
    torn: bool,
    records_written: u64,
    bytes_written: u64,
}

/// Hands `buf` to the sink, adding what it accepted to `accepted`.
fn write_counted<W: Write>(sink: &mut W, buf: &[u8], accepted: &mut usize) -> io::Result<()> {
    let mut rest = buf;
    while !rest.is_empty() {
        match sink.write(rest) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                ))
            }
            Ok(n) => {
                *accepted += n;
                rest = &rest[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl<W: Write> EventWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            scratch: [0u8; MAX_RECORD_PREFIX],
            header_written: false,
            torn: false,
            records_written: 0,
            bytes_written: 0,
        }
    }

    /// Writes the session header. Only the first successful call writes;
    /// later calls fail with [`RecordError::HeaderAlreadyWritten`].
    pub fn write_header(&mut self, wall_clock_start: u64) -> Result<(), RecordError> {
        if self.header_written {
            return Err(RecordError::HeaderAlreadyWritten);
        }
        let header = encode_header(wall_clock_start)?;
        self.sink.write_all(&header)?;
        self.sink.flush()?;
        self.header_written = true;
        self.bytes_written += header.len() as u64;
        Ok(())
    }

    /// Appends one framed record and flushes the sink. Returns the number of
    /// bytes the record occupies in the log.
    ///
    /// A failure before any byte of the record reached the sink is
    /// [`RecordError::Io`] and leaves the log intact. A failure part way
    /// through is [`RecordError::PartialRecord`].
    pub fn append(&mut self, event: &Event<'_>, timestamp: u64) -> Result<usize, RecordError> {
        if !self.header_written {
            return Err(RecordError::HeaderMissing);
        }
        if self.torn {
            return Err(RecordError::LogTorn);
        }
        let prefix_len = encode_prefix(event, timestamp, &mut self.scratch)?;
        let payload = event.payload();
        let written = prefix_len + payload.len();

        let mut accepted = 0;
        let result = write_counted(&mut self.sink, &self.scratch[..prefix_len], &mut accepted)
            .and_then(|()| write_counted(&mut self.sink, payload, &mut accepted));
        if let Err(cause) = result {
            if accepted == 0 {
                return Err(RecordError::Io(cause));
            }
            self.torn = true;
            self.bytes_written += accepted as u64;
            return Err(RecordError::PartialRecord {
                written: accepted,
                expected: written,
                cause,
            });
        }
        self.sink.flush()?;

        self.records_written += 1;
        self.bytes_written += written as u64;
        trace!(
            "appended {:?} record for stream {} ({} bytes, ts={})",
            event.kind(),
            event.stream_id(),
            written,
            timestamp
        );
        Ok(written)
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Flushes and hands the sink back.
    pub fn finish(mut self) -> Result<W, RecordError> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::testutil::{count_magic, parse_log, ParsedEvent};
    use crate::event_log::types::{Direction, HEADER_LEN};

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts `room` bytes, then fails every write.
    struct ShortSink {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left"));
            }
            let n = buf.len().min(self.room);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Counts flushes so tests can check that every append is flushed.
    #[derive(Default)]
    struct CountingSink {
        data: Vec<u8>,
        flushes: usize,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn append_requires_header() {
        let mut w = EventWriter::new(Vec::new());
        let err = w.append(&Event::Close { stream_id: 0 }, 0).unwrap_err();
        assert!(matches!(err, RecordError::HeaderMissing));
        assert!(w.get_ref().is_empty());
    }

    #[test]
    fn header_only_once() {
        let mut w = EventWriter::new(Vec::new());
        w.write_header(10).unwrap();
        assert!(matches!(
            w.write_header(11),
            Err(RecordError::HeaderAlreadyWritten)
        ));
        let bytes = w.finish().unwrap();
        assert_eq!(count_magic(&bytes), 1);
        assert_eq!(parse_log(&bytes).unwrap().wall_clock_start, 10);
    }

    #[test]
    fn each_append_is_flushed() {
        let mut w = EventWriter::new(CountingSink::default());
        w.write_header(0).unwrap();
        let before = w.get_ref().flushes;
        w.append(&Event::Close { stream_id: 1 }, 5).unwrap();
        w.append(&Event::Close { stream_id: 2 }, 6).unwrap();
        assert_eq!(w.get_ref().flushes, before + 2);
        assert_eq!(w.records_written(), 2);
    }

    #[test]
    fn data_payload_round_trips_for_any_length() {
        for n in [0usize, 1, 5, 28, 29, 30, 4096] {
            let payload: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
            let mut w = EventWriter::new(Vec::new());
            w.write_header(0).unwrap();
            let written = w
                .append(
                    &Event::Data {
                        stream_id: 9,
                        direction: Direction::ResponderToInitiator,
                        payload: &payload,
                    },
                    1,
                )
                .unwrap();
            assert_eq!(written, 18 + n);

            let log = parse_log(&w.finish().unwrap()).unwrap();
            assert_eq!(log.records.len(), 1);
            assert_eq!(log.records[0].total_length as usize, written);
            assert_eq!(
                log.records[0].event,
                ParsedEvent::Data {
                    stream_id: 9,
                    direction: Direction::ResponderToInitiator,
                    payload,
                }
            );
        }
    }

    #[test]
    fn sink_failure_is_reported() {
        let mut w = EventWriter::new(FailingSink);
        assert!(matches!(w.write_header(0), Err(RecordError::Io(_))));
        assert!(!w.header_written());
    }

    #[test]
    fn short_write_marks_the_log_torn() {
        let mut w = EventWriter::new(ShortSink {
            data: Vec::new(),
            room: HEADER_LEN + 10,
        });
        w.write_header(0).unwrap();
        let err = w
            .append(
                &Event::Data {
                    stream_id: 1,
                    direction: Direction::InitiatorToResponder,
                    payload: b"hello",
                },
                2,
            )
            .unwrap_err();
        assert!(err.leaves_log_torn());
        match err {
            RecordError::PartialRecord {
                written, expected, ..
            } => {
                assert_eq!(written, 10);
                assert_eq!(expected, 23);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(w.bytes_written(), (HEADER_LEN + 10) as u64);
        assert_eq!(w.records_written(), 0);

        assert!(matches!(
            w.append(&Event::Close { stream_id: 1 }, 3),
            Err(RecordError::LogTorn)
        ));
        assert_eq!(w.get_ref().data.len(), HEADER_LEN + 10);
    }

    #[test]
    fn failure_before_any_byte_keeps_the_log_usable() {
        let mut w = EventWriter::new(ShortSink {
            data: Vec::new(),
            room: HEADER_LEN,
        });
        w.write_header(0).unwrap();
        let err = w.append(&Event::Close { stream_id: 0 }, 1).unwrap_err();
        assert!(matches!(err, RecordError::Io(_)));
        assert!(!err.leaves_log_torn());
    }
}
