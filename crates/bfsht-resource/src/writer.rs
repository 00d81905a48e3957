// crates/bfsht-resource/src/writer.rs

//! Test/benchmark fixture writer.
//!
//! Emits resource files in the production wire format, with one leaf blob per
//! (m, parity): a `Zero` block when the degree range is empty, a raw dense
//! column-major block when it has at most 4 rows, and otherwise a single
//! full-width strip carrying `x²`, the two seed rows, and the shared
//! recurrence table so the engine regenerates the remaining rows on the fly.
//!
//! Values are normalized associated Legendre functions λ_{l,m}(cos θ)
//! (Condon–Shortley phase, 4π normalization: `a_{0,0} = √(4π)` synthesizes
//! the constant 1 map). Matrix columns are northern-hemisphere rings counted
//! from the equator outward, matching the phase-vector layout the assembly
//! stage reads.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use bfsht_butterfly::{TYPE_DENSE, TYPE_ZERO};
use bfsht_grid::RingGrid;
use tracing::debug;

use crate::error::ResourceError;
use crate::parity_degree_count;

/// What to write.
#[derive(Clone, Debug)]
pub struct FixtureSpec {
    /// Grid resolution.
    pub nside: usize,
    /// Maximum degree.
    pub lmax: usize,
    /// Maximum order.
    pub mmax: usize,
    /// `(m, odd)` entries to register as absent (offset 0).
    pub omit: Vec<(usize, usize)>,
}

impl FixtureSpec {
    /// Spec with `mmax = lmax` and nothing omitted.
    #[must_use]
    pub fn new(nside: usize, lmax: usize) -> Self {
        Self {
            nside,
            lmax,
            mmax: lmax,
            omit: Vec::new(),
        }
    }
}

/// Coupling coefficient of the single-step degree recurrence:
/// `x·λ_l = α_l·λ_{l+1} + α_{l−1}·λ_{l−1}`.
#[inline]
fn alpha(l: usize, m: usize) -> f64 {
    let l = l as f64;
    let m = m as f64;
    (((l + 1.0) * (l + 1.0) - m * m) / ((2.0 * l + 1.0) * (2.0 * l + 3.0))).sqrt()
}

/// Normalized associated Legendre values λ_{l,m}(x) for `l = m ..= lmax`.
///
/// Stable upward recurrence seeded at `λ_{m,m}`.
#[must_use]
pub fn normalized_legendre(m: usize, lmax: usize, x: f64) -> Vec<f64> {
    assert!(lmax >= m);
    let sin2 = (1.0 - x * x).max(0.0);
    // λ_{m,m} = (−1)^m √((2m+1)/(4π) · (2m−1)!!/(2m)!!) · sin^m θ.
    let mut norm = (2.0 * m as f64 + 1.0) / (4.0 * PI);
    for i in 1..=m {
        norm *= (2.0 * i as f64 - 1.0) / (2.0 * i as f64);
    }
    let mut lam_mm = norm.sqrt() * sin2.powf(m as f64 / 2.0);
    if m % 2 == 1 {
        lam_mm = -lam_mm;
    }

    let mut out = Vec::with_capacity(lmax - m + 1);
    out.push(lam_mm);
    if lmax == m {
        return out;
    }
    let mut prev = lam_mm;
    let mut cur = x * (2.0 * m as f64 + 3.0).sqrt() * lam_mm; // λ_{m+1,m}
    out.push(cur);
    for l in m + 1..lmax {
        let next = (x * cur - alpha(l - 1, m) * prev) / alpha(l, m);
        prev = cur;
        cur = next;
        out.push(cur);
    }
    out
}

/// Two-step recurrence coefficients `(α, β, γ)` for strip row `i ≥ 2`
/// (degree `l_i = l₀ + 2i`), satisfying
/// `λ_{l+2} = (α·x² + γ)·λ_l + β·λ_{l−2}` at `l = l₀ + 2(i−1)`.
fn two_step_aux(l0: usize, m: usize, nk: usize) -> Vec<f64> {
    let mut aux = Vec::with_capacity(3 * nk.saturating_sub(2));
    for i in 2..nk {
        let l = l0 + 2 * (i - 1);
        let d = alpha(l, m) * alpha(l + 1, m);
        let a = 1.0 / d;
        let b = -(alpha(l - 1, m) * alpha(l - 2, m)) / d;
        let g = -(alpha(l - 1, m).powi(2) + alpha(l, m).powi(2)) / d;
        aux.extend_from_slice(&[a, b, g]);
    }
    aux
}

/* ------------------------------ blob assembly ----------------------------- */

fn pad16(buf: &mut Vec<u8>) {
    while buf.len() % 16 != 0 {
        buf.push(0);
    }
}

fn push_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_f64s(buf: &mut Vec<u8>, xs: &[f64]) {
    pad16(buf);
    for x in xs {
        buf.extend_from_slice(&x.to_le_bytes());
    }
}

/// Leaf blob for one (m, parity): values `lam[r][c] = λ_{l₀+2r,m}(x_c)`.
fn leaf_blob(m: usize, odd: usize, lmax: usize, xs: &[f64]) -> Vec<u8> {
    let nk = parity_degree_count(lmax, m, odd);
    let mut blob = Vec::new();
    if nk == 0 {
        blob.extend_from_slice(&TYPE_ZERO.to_le_bytes());
        return blob;
    }
    let l0 = m + odd;
    let ncols = xs.len();
    // λ per column; keep only the selected parity (row r ↔ l₀ + 2r).
    let lam_col: Vec<Vec<f64>> = xs
        .iter()
        .map(|&x| {
            normalized_legendre(m, lmax, x)
                .into_iter()
                .skip(odd)
                .step_by(2)
                .collect()
        })
        .collect();

    blob.extend_from_slice(&TYPE_DENSE.to_le_bytes());
    pad16(&mut blob);
    push_i64(&mut blob, 0); // row_start
    push_i64(&mut blob, nk as i64); // row_stop

    if nk <= 4 {
        // Dense column-major (nk × ncols).
        let mut dense = Vec::with_capacity(nk * ncols);
        for col in &lam_col {
            dense.extend_from_slice(col);
        }
        push_f64s(&mut blob, &dense);
        return blob;
    }

    // One full-width strip regenerated by the two-step recurrence.
    push_i64(&mut blob, 1); // nstrips
    push_f64s(&mut blob, &two_step_aux(l0, m, nk));
    push_i64(&mut blob, 0); // rstart
    push_i64(&mut blob, ncols as i64); // cstop
    let x2: Vec<f64> = xs.iter().map(|x| x * x).collect();
    let p0: Vec<f64> = lam_col.iter().map(|c| c[0]).collect();
    let p1: Vec<f64> = lam_col.iter().map(|c| c[1]).collect();
    push_f64s(&mut blob, &x2);
    push_f64s(&mut blob, &p0);
    push_f64s(&mut blob, &p1);
    blob
}

/* ------------------------------ file assembly ----------------------------- */

/// Write a fixture resource file at `path` (parent directories are created).
///
/// # Errors
///
/// Propagates filesystem failures.
pub fn write_fixture(path: &Path, spec: &FixtureSpec) -> Result<(), ResourceError> {
    let FixtureSpec {
        nside,
        lmax,
        mmax,
        ref omit,
    } = *spec;
    assert!(nside >= 1 && mmax <= lmax, "invalid fixture spec");

    let grid = RingGrid::new(nside);
    let mid = grid.mid_ring();
    // Column c ↔ ring pair c: equator first, then outward to the pole.
    let xs: Vec<f64> = (0..grid.nrings_half())
        .map(|c| grid.ring_cos_theta(mid - c))
        .collect();

    let table_at = 24usize;
    let table_len = 8 * 4 * (mmax + 1);
    let mut buf = vec![0u8; table_at + table_len];
    buf[0..8].copy_from_slice(&(lmax as i64).to_le_bytes());
    buf[8..16].copy_from_slice(&(mmax as i64).to_le_bytes());
    buf[16..24].copy_from_slice(&(nside as i64).to_le_bytes());

    for m in 0..=mmax {
        for odd in 0..2 {
            if omit.contains(&(m, odd)) {
                continue; // offset stays 0 = absent
            }
            let blob = leaf_blob(m, odd, lmax, &xs);
            pad16(&mut buf);
            let off = buf.len();
            buf.extend_from_slice(&blob);
            let at = table_at + 8 * (4 * m + 2 * odd);
            buf[at..at + 8].copy_from_slice(&(off as i64).to_le_bytes());
            buf[at + 8..at + 16].copy_from_slice(&(blob.len() as i64).to_le_bytes());
        }
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ResourceError::Write {
            path: path.to_owned(),
            source,
        })?;
    }
    fs::write(path, &buf).map_err(|source| ResourceError::Write {
        path: path.to_owned(),
        source,
    })?;
    debug!(
        path = %path.display(),
        nside, lmax, mmax,
        bytes = buf.len(),
        "wrote fixture resource file"
    );
    Ok(())
}
