#![forbid(unsafe_code)]
//! Big-endian fixed-width encoding helpers shared by the page codec and the
//! file store header.

pub mod be {
    //! Appending writers for big-endian integers.

    /// Appends a big-endian `u16`.
    #[inline]
    pub fn put_u16(dst: &mut Vec<u8>, v: u16) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian `u32`.
    #[inline]
    pub fn put_u32(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian `i32`.
    #[inline]
    pub fn put_i32(dst: &mut Vec<u8>, v: i32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian `i64`.
    #[inline]
    pub fn put_i64(dst: &mut Vec<u8>, v: i64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }
}

pub mod buf {
    //! A slice-backed cursor that reports truncation as corruption.

    use core::fmt;

    use crate::types::{Result, StoreError};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Creates a cursor positioned at `off`.
        pub fn at(buf: &'a [u8], off: usize) -> Self {
            Self { buf, off }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(StoreError::Invalid("cursor offset overflow"))?;
            if end > self.buf.len() {
                return Err(StoreError::corruption(format!(
                    "read of {} bytes at offset {} runs past {} byte buffer",
                    n,
                    self.off,
                    self.buf.len()
                )));
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a big-endian `u16`.
        pub fn read_u16(&mut self) -> Result<u16> {
            let bytes = self.take(2)?;
            Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
        }

        /// Reads a big-endian `u32`.
        pub fn read_u32(&mut self) -> Result<u32> {
            let bytes = self.take(4)?;
            Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }

        /// Reads a big-endian `i32`.
        pub fn read_i32(&mut self) -> Result<i32> {
            Ok(self.read_u32()? as i32)
        }

        /// Reads a big-endian `u64`.
        pub fn read_u64(&mut self) -> Result<u64> {
            let hi = self.read_u32()? as u64;
            let lo = self.read_u32()? as u64;
            Ok((hi << 32) | lo)
        }

        /// Reads a big-endian `i64`.
        pub fn read_i64(&mut self) -> Result<i64> {
            Ok(self.read_u64()? as i64)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{be, buf::Cursor};
    use crate::types::StoreError;
    use proptest::prelude::*;

    #[test]
    fn cursor_reads_mixed_widths() {
        let mut out = Vec::new();
        be::put_u16(&mut out, 0xBEEF);
        be::put_i32(&mut out, -5);
        be::put_i64(&mut out, i64::MIN + 1);
        be::put_u32(&mut out, 7);
        let mut cursor = Cursor::new(&out);
        assert_eq!(cursor.read_u16().unwrap(), 0xBEEF);
        assert_eq!(cursor.read_i32().unwrap(), -5);
        assert_eq!(cursor.read_i64().unwrap(), i64::MIN + 1);
        assert_eq!(cursor.read_u32().unwrap(), 7);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn truncated_read_is_corruption() {
        let data = [0u8; 3];
        let mut cursor = Cursor::at(&data, 2);
        let err = cursor.read_u16().unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }

    proptest! {
        #[test]
        fn i64_survives_cursor(v in any::<i64>()) {
            let mut out = Vec::new();
            be::put_i64(&mut out, v);
            prop_assert_eq!(Cursor::new(&out).read_i64().unwrap(), v);
        }
    }
}
