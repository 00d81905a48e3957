// crates/bfsht-butterfly/src/dense.rs

//! Reference leaf kernel: plain row-major dense payloads.
//!
//! Payload layout after the type tag: padding to 16 bytes, then
//! `nk · ncols` doubles row-major. Used by engine tests and synthetic blobs;
//! the production resource files route leaves through the Legendre kernel
//! instead.

use bfsht_kernels::dgemm_crc;

use crate::cursor::Cursor;
use crate::engine::LeafKernel;
use crate::error::BfmError;

/// Leaf kernel multiplying the stored dense block against a fixed input.
#[derive(Debug)]
pub struct DenseKernel<'a> {
    /// Input block, `rows × nvecs` (row `i` at `i * nvecs`).
    x: &'a [f64],
}

impl<'a> DenseKernel<'a> {
    /// Kernel over input block `x`.
    #[must_use]
    pub fn new(x: &'a [f64]) -> Self {
        Self { x }
    }
}

impl LeafKernel for DenseKernel<'_> {
    fn apply(
        &mut self,
        out: &mut [f64],
        cur: &mut Cursor<'_>,
        nk: usize,
        nvecs: usize,
    ) -> Result<(), BfmError> {
        let ncols = out.len() / nvecs;
        let d = cur.read_f64s(nk * ncols)?;
        if self.x.len() < nk * nvecs {
            return Err(BfmError::Dimensions("input block shorter than leaf rows"));
        }
        // out (nvecs × ncols, col-major) = x (nvecs × nk, col-major) · D.
        dgemm_crc(&self.x[..nk * nvecs], d, out, nvecs, ncols, nk, 0.0);
        Ok(())
    }
}

/// Measure a plain dense leaf: skips the payload, returns `nk · ncols`.
///
/// # Errors
///
/// [`BfmError::Truncated`] when the payload is short.
pub fn measure_dense_leaf(
    cur: &mut Cursor<'_>,
    nk: usize,
    ncols: usize,
) -> Result<u64, BfmError> {
    let _ = cur.read_f64s(nk * ncols)?;
    Ok((nk * ncols) as u64)
}
