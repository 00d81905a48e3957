// crates/bfsht-butterfly/src/legendre.rs

//! Fast associated-Legendre leaf kernel.
//!
//! A Legendre leaf describes a `(row_stop − row_start) × ncols` block of the
//! transposed application: rows are same-parity degrees `l`, columns are
//! northern-hemisphere rings. Small blocks (≤ 4 rows) store the dense values
//! column-major; larger blocks store, per column strip, the samples `x²`,
//! two seed rows `P₀`/`P₁`, and share a `3·(k − 2)` table of recurrence
//! coefficients so the remaining rows are regenerated on the fly:
//!
//! ```text
//! P_i(x) = (α_i · x² + γ_i) · P_{i−1}(x) + β_i · P_{i−2}(x)
//! ```
//!
//! The kernel packs the selected-parity coefficient rows once per leaf and
//! accumulates `out[:, c] = Σ_i P_i(x_c) · a_i` column by column, which keeps
//! the inner loop contiguous over the `nvecs` interleaved vectors.

use bfsht_kernels::dgemm_ccc;

use crate::cursor::Cursor;
use crate::engine::LeafKernel;
use crate::error::BfmError;

/// Parity view into one m-block of the coefficient array.
///
/// `data` starts at the first coefficient of the selected parity; row `r`
/// (degree `l = l₀ + 2r`) lives at `2 · r · nvecs` because even and odd
/// degrees interleave in storage.
#[derive(Clone, Copy, Debug)]
pub struct CoeffView<'a> {
    data: &'a [f64],
    nvecs: usize,
}

impl<'a> CoeffView<'a> {
    /// View over `data` with `nvecs` interleaved vector lanes.
    #[must_use]
    pub fn new(data: &'a [f64], nvecs: usize) -> Self {
        Self { data, nvecs }
    }

    /// Gather rows `row_start .. row_start + nk` into contiguous `pack`.
    fn pack_into(&self, row_start: usize, nk: usize, pack: &mut [f64]) -> Result<(), BfmError> {
        if nk == 0 {
            return Ok(());
        }
        let nvecs = self.nvecs;
        let need = 2 * (row_start + nk - 1) * nvecs + nvecs;
        if self.data.len() < need {
            return Err(BfmError::Dimensions("leaf rows outside coefficient block"));
        }
        for r in 0..nk {
            let src = &self.data[2 * (row_start + r) * nvecs..][..nvecs];
            pack[r * nvecs..(r + 1) * nvecs].copy_from_slice(src);
        }
        Ok(())
    }
}

/// Leaf kernel applying the stored/regenerated Legendre block to the packed
/// coefficient rows.
#[derive(Debug)]
pub struct LegendreKernel<'a, 'p> {
    view: CoeffView<'a>,
    pack: &'p mut [f64],
}

impl<'a, 'p> LegendreKernel<'a, 'p> {
    /// Kernel over one (m, parity) coefficient view with a caller-owned pack
    /// buffer of at least `rows · nvecs` doubles.
    #[must_use]
    pub fn new(view: CoeffView<'a>, pack: &'p mut [f64]) -> Self {
        Self { view, pack }
    }
}

impl LeafKernel for LegendreKernel<'_, '_> {
    fn apply(
        &mut self,
        out: &mut [f64],
        cur: &mut Cursor<'_>,
        nk_ctx: usize,
        nvecs: usize,
    ) -> Result<(), BfmError> {
        cur.align16();
        let row_start = cur.read_index()?;
        let row_stop = cur.read_index()?;
        if row_start > row_stop || row_stop > nk_ctx {
            return Err(BfmError::Dimensions("leaf row range outside context"));
        }
        let nk = row_stop - row_start;
        let ncols = out.len() / nvecs;

        if nk <= 4 || ncols == 0 {
            let a = cur.read_f64s(nk * ncols)?;
            if self.pack.len() < nk * nvecs {
                return Err(BfmError::Dimensions("pack buffer shorter than leaf"));
            }
            self.view.pack_into(row_start, nk, self.pack)?;
            dgemm_ccc(&self.pack[..nk * nvecs], a, out, nvecs, ncols, nk, 0.0);
            return Ok(());
        }

        let nstrips = cur.read_index()?;
        let aux = cur.read_f64s(3 * (nk - 2))?;
        let mut cstart = 0usize;
        for _ in 0..nstrips {
            let rstart = cur.read_index()?;
            let cstop = cur.read_index()?;
            if rstart >= nk || cstop <= cstart || cstop > ncols {
                return Err(BfmError::Dimensions("strip outside leaf block"));
            }
            let nx = cstop - cstart;
            let nk_strip = nk - rstart;
            let out_strip = &mut out[cstart * nvecs..cstop * nvecs];
            if self.pack.len() < nk_strip * nvecs {
                return Err(BfmError::Dimensions("pack buffer shorter than strip"));
            }
            if nk_strip <= 4 {
                let a = cur.read_f64s(nk_strip * nx)?;
                self.view.pack_into(row_start + rstart, nk_strip, self.pack)?;
                dgemm_ccc(
                    &self.pack[..nk_strip * nvecs],
                    a,
                    out_strip,
                    nvecs,
                    nx,
                    nk_strip,
                    0.0,
                );
            } else {
                let x_squared = cur.read_f64s(nx)?;
                let p0 = cur.read_f64s(nx)?;
                let p1 = cur.read_f64s(nx)?;
                self.view.pack_into(row_start + rstart, nk_strip, self.pack)?;
                recurrence_accumulate(
                    nx,
                    nk_strip,
                    nvecs,
                    &self.pack[..nk_strip * nvecs],
                    out_strip,
                    x_squared,
                    &aux[3 * rstart..3 * rstart + 3 * (nk_strip - 2)],
                    p0,
                    p1,
                );
            }
            cstart = cstop;
        }
        if cstart != ncols {
            return Err(BfmError::Dimensions("strips do not tile leaf columns"));
        }
        Ok(())
    }
}

/// Regenerate rows `2..nk` by the three-term recurrence and accumulate the
/// leaf product column by column. Seeds `p0`/`p1` contribute first; every
/// strip owns its columns outright, so the first write overwrites.
#[allow(clippy::too_many_arguments)]
fn recurrence_accumulate(
    nx: usize,
    nk: usize,
    nvecs: usize,
    a: &[f64],
    out: &mut [f64],
    x_squared: &[f64],
    aux: &[f64],
    p0: &[f64],
    p1: &[f64],
) {
    debug_assert!(nk >= 2);
    debug_assert_eq!(aux.len(), 3 * (nk - 2));
    for c in 0..nx {
        let t = x_squared[c];
        let mut prev2 = p0[c];
        let mut prev1 = p1[c];
        let dst = &mut out[c * nvecs..(c + 1) * nvecs];
        for (v, d) in dst.iter_mut().enumerate() {
            *d = prev2 * a[v] + prev1 * a[nvecs + v];
        }
        for i in 2..nk {
            let alpha = aux[3 * (i - 2)];
            let beta = aux[3 * (i - 2) + 1];
            let gamma = aux[3 * (i - 2) + 2];
            let p = (alpha * t + gamma) * prev1 + beta * prev2;
            let row = &a[i * nvecs..(i + 1) * nvecs];
            for (v, d) in dst.iter_mut().enumerate() {
                *d += p * row[v];
            }
            prev2 = prev1;
            prev1 = p;
        }
    }
}

/// Measure a Legendre leaf: parse the payload, return the effective dense
/// element count (`Σ nk_strip · nx` over strips, or `nk · ncols` for small
/// leaves).
///
/// # Errors
///
/// Corruption in the payload.
pub fn measure_legendre_leaf(
    cur: &mut Cursor<'_>,
    nk_ctx: usize,
    ncols: usize,
) -> Result<u64, BfmError> {
    cur.align16();
    let row_start = cur.read_index()?;
    let row_stop = cur.read_index()?;
    if row_start > row_stop || row_stop > nk_ctx {
        return Err(BfmError::Dimensions("leaf row range outside context"));
    }
    let nk = row_stop - row_start;

    if nk <= 4 || ncols == 0 {
        let _ = cur.read_f64s(nk * ncols)?;
        return Ok((nk * ncols) as u64);
    }

    let nstrips = cur.read_index()?;
    let _ = cur.read_f64s(3 * (nk - 2))?;
    let mut count = 0u64;
    let mut cstart = 0usize;
    for _ in 0..nstrips {
        let rstart = cur.read_index()?;
        let cstop = cur.read_index()?;
        if rstart >= nk || cstop <= cstart || cstop > ncols {
            return Err(BfmError::Dimensions("strip outside leaf block"));
        }
        let nx = cstop - cstart;
        let nk_strip = nk - rstart;
        if nk_strip <= 4 {
            let _ = cur.read_f64s(nk_strip * nx)?;
        } else {
            let _ = cur.read_f64s(nx)?; // x²
            let _ = cur.read_f64s(nx)?; // P₀
            let _ = cur.read_f64s(nx)?; // P₁
        }
        count += (nk_strip * nx) as u64;
        cstart = cstop;
    }
    if cstart != ncols {
        return Err(BfmError::Dimensions("strips do not tile leaf columns"));
    }
    Ok(count)
}
