//! Little-endian primitive writers.
//!
//! Each writer places a fixed-width unsigned integer into `buf` starting at
//! `offset` and returns the offset just past it. A write that would cross the
//! end of the buffer fails with [`EncodeError::Capacity`] and leaves the
//! buffer untouched.

use crate::error_handling::types::EncodeError;

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) -> Result<usize, EncodeError> {
    let end = offset
        .checked_add(bytes.len())
        .filter(|end| *end <= buf.len())
        .ok_or(EncodeError::Capacity {
            offset,
            width: bytes.len(),
            capacity: buf.len(),
        })?;
    buf[offset..end].copy_from_slice(bytes);
    Ok(end)
}

pub fn write_u8(buf: &mut [u8], offset: usize, value: u8) -> Result<usize, EncodeError> {
    put(buf, offset, &[value])
}

pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<usize, EncodeError> {
    put(buf, offset, &value.to_le_bytes())
}

pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<usize, EncodeError> {
    put(buf, offset, &value.to_le_bytes())
}

pub fn write_u64(buf: &mut [u8], offset: usize, value: u64) -> Result<usize, EncodeError> {
    put(buf, offset, &value.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_little_endian_and_advances() {
        let mut buf = [0u8; 15];
        let mut off = write_u8(&mut buf, 0, 0xab).unwrap();
        off = write_u16(&mut buf, off, 0x0102).unwrap();
        off = write_u32(&mut buf, off, 0x0304_0506).unwrap();
        off = write_u64(&mut buf, off, 0x0708_090a_0b0c_0d0e).unwrap();
        assert_eq!(off, 15);
        assert_eq!(
            buf,
            [
                0xab, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 0x0e, 0x0d, 0x0c, 0x0b, 0x0a, 0x09,
                0x08, 0x07
            ]
        );
    }

    #[test]
    fn rejects_write_past_capacity() {
        let mut buf = [0u8; 6];
        let err = write_u32(&mut buf, 3, 0xffff_ffff).unwrap_err();
        assert_eq!(
            err,
            EncodeError::Capacity {
                offset: 3,
                width: 4,
                capacity: 6
            }
        );
        assert_eq!(buf, [0u8; 6]);
    }

    #[test]
    fn exact_fit_is_allowed() {
        let mut buf = [0u8; 8];
        assert_eq!(write_u64(&mut buf, 0, u64::MAX).unwrap(), 8);
        assert!(write_u8(&mut buf, 8, 1).is_err());
    }

    #[test]
    fn offset_overflow_is_a_capacity_error() {
        let mut buf = [0u8; 4];
        assert!(matches!(
            write_u16(&mut buf, usize::MAX, 1),
            Err(EncodeError::Capacity { .. })
        ));
    }
}
