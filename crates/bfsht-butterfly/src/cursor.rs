// crates/bfsht-butterfly/src/cursor.rs

//! Typed cursor over a blob byte slice.
//!
//! All multi-byte fields in the resource format are little-endian, and all
//! `f64` arrays sit on 16-byte boundaries relative to the blob base (which is
//! itself 16-byte aligned in the file and in copied buffers). The cursor owns
//! the bounds and alignment checks so the traversal code reads like the
//! format description.

use crate::error::BfmError;

/// Bounds- and alignment-checked reader over blob bytes.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Wrap `buf`, verifying the base pointer carries the format's 16-byte
    /// alignment.
    ///
    /// # Errors
    ///
    /// [`BfmError::Misaligned`] when the base pointer is not 16-byte aligned.
    pub fn new(buf: &'a [u8]) -> Result<Self, BfmError> {
        if buf.as_ptr() as usize % 16 != 0 {
            return Err(BfmError::Misaligned);
        }
        Ok(Self { buf, pos: 0 })
    }

    /// Current offset from the blob base.
    #[inline]
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes left in the blob.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the current position sits on a 16-byte boundary.
    #[inline]
    #[must_use]
    pub fn is_aligned16(&self) -> bool {
        self.pos % 16 == 0
    }

    /// Skip forward to the next 16-byte boundary (no-op when already there).
    #[inline]
    pub fn align16(&mut self) {
        let m = self.pos % 16;
        if m != 0 {
            self.pos += 16 - m;
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BfmError> {
        let end = self.pos.checked_add(n).ok_or(BfmError::Truncated {
            need: n,
            at: self.pos,
        })?;
        if end > self.buf.len() {
            return Err(BfmError::Truncated {
                need: n,
                at: self.pos,
            });
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    /// Read a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// [`BfmError::Truncated`] when fewer than 4 bytes remain.
    pub fn read_i32(&mut self) -> Result<i32, BfmError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian `i64`.
    ///
    /// # Errors
    ///
    /// [`BfmError::Truncated`] when fewer than 8 bytes remain.
    pub fn read_i64(&mut self) -> Result<i64, BfmError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a little-endian `i64` and require it to fit a `usize` index.
    ///
    /// # Errors
    ///
    /// [`BfmError::Truncated`] on short reads, [`BfmError::Dimensions`] on
    /// negative values.
    pub fn read_index(&mut self) -> Result<usize, BfmError> {
        let v = self.read_i64()?;
        usize::try_from(v).map_err(|_| BfmError::Dimensions("negative index field"))
    }

    /// Read `n` raw bytes (interpolation filters).
    ///
    /// # Errors
    ///
    /// [`BfmError::Truncated`] when fewer than `n` bytes remain.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], BfmError> {
        self.take(n)
    }

    /// Skip to the next 16-byte boundary and borrow `n` doubles.
    ///
    /// # Errors
    ///
    /// [`BfmError::Truncated`] on short reads; [`BfmError::Misaligned`] when
    /// the cast fails (cannot happen while the base invariant holds).
    pub fn read_f64s(&mut self, n: usize) -> Result<&'a [f64], BfmError> {
        self.align16();
        let raw = self.take(n * 8)?;
        bytemuck::try_cast_slice(raw).map_err(|_| BfmError::Misaligned)
    }
}

/// Owned blob storage with a 16-byte aligned start.
///
/// Blobs normally live in a page-aligned mapping or copy; this safe
/// over-allocating buffer gives synthetic blobs (tests, fixture writers) the
/// same alignment guarantee.
#[derive(Clone, Debug)]
pub struct AlignedBlobBuf {
    buf: Vec<u8>,
    off: usize,
    len: usize,
}

impl AlignedBlobBuf {
    /// Copy `bytes` into 16-aligned storage.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = vec![0u8; bytes.len() + 15];
        let off = (16 - (buf.as_ptr() as usize % 16)) % 16;
        buf[off..off + bytes.len()].copy_from_slice(bytes);
        Self {
            buf,
            off,
            len: bytes.len(),
        }
    }

    /// The aligned blob bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.off..self.off + self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16-aligned byte storage for cursor tests.
    #[repr(C, align(16))]
    struct Aligned([u8; 64]);

    #[test]
    fn typed_reads_and_padding() {
        let mut a = Aligned([0u8; 64]);
        a.0[..4].copy_from_slice(&3i32.to_le_bytes());
        a.0[4..12].copy_from_slice(&7i64.to_le_bytes());
        // read_f64s pads from 12 to 16 before the array.
        a.0[16..24].copy_from_slice(&1.5f64.to_le_bytes());

        let mut c = Cursor::new(&a.0).unwrap();
        assert_eq!(c.read_i32().unwrap(), 3);
        assert_eq!(c.read_i64().unwrap(), 7);
        let xs = c.read_f64s(1).unwrap();
        assert_eq!(xs[0], 1.5);
        assert_eq!(c.pos(), 24);
    }

    #[test]
    fn truncation_is_reported() {
        let a = Aligned([0u8; 64]);
        let mut c = Cursor::new(&a.0[..4]).unwrap();
        let _ = c.read_i32().unwrap();
        match c.read_i32() {
            Err(BfmError::Truncated { need: 4, at: 4 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn misaligned_base_is_rejected() {
        let a = Aligned([0u8; 64]);
        assert!(matches!(Cursor::new(&a.0[1..]), Err(BfmError::Misaligned)));
    }

    #[test]
    fn negative_index_is_dimensions_error() {
        let mut a = Aligned([0u8; 64]);
        a.0[..8].copy_from_slice(&(-1i64).to_le_bytes());
        let mut c = Cursor::new(&a.0).unwrap();
        assert!(matches!(
            c.read_index(),
            Err(BfmError::Dimensions(_))
        ));
    }
}
