//! Record framing.
//!
//! A record is `[u32 total_length][u64 timestamp][u8 kind][fields][payload]`
//! where `total_length` counts every byte of the record, its own four
//! included, so a reader skips a record by advancing `total_length` bytes
//! from its start. The encoder only lays out the fixed part; a data record's
//! payload is appended by the writer straight from the caller's slice.

use super::binary::{write_u16, write_u32, write_u64, write_u8};
use super::types::{Event, HEADER_LEN, LENGTH_PREFIX_LEN, MAGIC, RECORD_PREAMBLE_LEN};
use crate::error_handling::types::EncodeError;

/// Value of the length prefix for `event`.
pub fn total_length(event: &Event<'_>) -> Result<u32, EncodeError> {
    let body = LENGTH_PREFIX_LEN + RECORD_PREAMBLE_LEN + event.fields_len();
    let len = body
        .checked_add(event.payload().len())
        .ok_or(EncodeError::RecordTooLarge(usize::MAX))?;
    u32::try_from(len).map_err(|_| EncodeError::RecordTooLarge(len))
}

/// Writes the length prefix, timestamp, kind and kind-specific fields of
/// `event` into `buf`, returning the number of bytes written.
pub fn encode_prefix(event: &Event<'_>, timestamp: u64, buf: &mut [u8]) -> Result<usize, EncodeError> {
    let total = total_length(event)?;

    let mut off = write_u32(buf, 0, total)?;
    off = write_u64(buf, off, timestamp)?;
    off = write_u8(buf, off, event.kind() as u8)?;

    match event {
        Event::Open {
            stream_id,
            source,
            dest,
        } => {
            off = write_u32(buf, off, *stream_id)?;
            off = write_u32(buf, off, u32::from(*source.ip()))?;
            off = write_u16(buf, off, source.port())?;
            off = write_u32(buf, off, u32::from(*dest.ip()))?;
            off = write_u16(buf, off, dest.port())?;
        }
        Event::Close { stream_id } => {
            off = write_u32(buf, off, *stream_id)?;
        }
        Event::Data {
            stream_id,
            direction,
            ..
        } => {
            off = write_u32(buf, off, *stream_id)?;
            off = write_u8(buf, off, *direction as u8)?;
        }
    }

    debug_assert_eq!(off, LENGTH_PREFIX_LEN + RECORD_PREAMBLE_LEN + event.fields_len());
    Ok(off)
}

/// Lays out the session header: the magic followed by the wall-clock start.
pub fn encode_header(wall_clock_start: u64) -> Result<[u8; HEADER_LEN], EncodeError> {
    let mut buf = [0u8; HEADER_LEN];
    buf[..MAGIC.len()].copy_from_slice(MAGIC);
    write_u64(&mut buf, MAGIC.len(), wall_clock_start)?;
    Ok(buf)
}
