//! Shared helpers for the synthesis tests: fixture contexts, deterministic
//! coefficient vectors, and the direct O(lmax²·npix) reference synthesis.

#![allow(dead_code)] // each test binary uses its own subset

use bfsht_grid::RingGrid;
use bfsht_plan::{coeff_index, coeff_len, SynthContext};
use bfsht_resource::writer::{normalized_legendre, write_fixture, FixtureSpec};
use bfsht_resource::resource_path;
use rand::{rngs::StdRng, Rng as _, SeedableRng};
use tempfile::TempDir;

/// Context over a fresh fixture resource file (`mmax = lmax`).
pub fn fixture_context(nside: usize, lmax: usize) -> (TempDir, SynthContext) {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(
        &resource_path(dir.path(), nside),
        &FixtureSpec::new(nside, lmax),
    )
    .expect("write fixture");
    let ctx = SynthContext::new(dir.path());
    (dir, ctx)
}

/// Deterministic random coefficients in the packed layout.
pub fn random_alm(lmax: usize, mmax: usize, nmaps: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut alm = vec![0.0; coeff_len(lmax, mmax, nmaps)];
    for m in 0..=mmax {
        for l in m..=lmax {
            for map in 0..nmaps {
                let at = coeff_index(lmax, nmaps, l, m, map);
                alm[at] = rng.random_range(-1.0..1.0);
                alm[at + 1] = rng.random_range(-1.0..1.0);
            }
        }
    }
    alm
}

/// Direct synthesis: per ring, evaluate every q_m by the stable single-step
/// Legendre recurrence and sum `w_m · Re(q_m · e^{imφ})` per pixel
/// (`w_0 = 1`, `w_m = 2`). Aliasing needs no special casing here: the DFT
/// identity the fold exploits holds termwise on the uniform ring.
pub fn reference_synthesis(
    grid: &RingGrid,
    lmax: usize,
    mmax: usize,
    nmaps: usize,
    alm: &[f64],
) -> Vec<f64> {
    let npix = grid.npix();
    let mut out = vec![0.0; nmaps * npix];
    for r in 0..grid.nrings() {
        let x = grid.ring_cos_theta(r);
        let n = grid.ring_len(r);
        let off = grid.ring_offset(r);
        let phi0 = grid.phi0(r);
        for m in 0..=mmax {
            let lam = normalized_legendre(m, lmax, x);
            let w = if m == 0 { 1.0 } else { 2.0 };
            for map in 0..nmaps {
                let (mut qre, mut qim) = (0.0, 0.0);
                for l in m..=lmax {
                    let at = coeff_index(lmax, nmaps, l, m, map);
                    qre += lam[l - m] * alm[at];
                    qim += lam[l - m] * alm[at + 1];
                }
                if m == 0 {
                    qim = 0.0; // only the real part of q₀ is physical
                }
                for k in 0..n {
                    let phi = phi0 + 2.0 * std::f64::consts::PI * k as f64 / n as f64;
                    let (s, c) = (m as f64 * phi).sin_cos();
                    out[map * npix + off + k] += w * (qre * c - qim * s);
                }
            }
        }
    }
    out
}

/// Relative RMS difference between two maps.
pub fn rel_rms(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in a.iter().zip(b) {
        num += (x - y) * (x - y);
        den += y * y;
    }
    (num / den.max(f64::MIN_POSITIVE)).sqrt()
}

/// Map pixel → `(ring, index-in-ring)` walk helper.
pub fn for_each_pixel(grid: &RingGrid, mut f: impl FnMut(usize, usize, usize)) {
    for r in 0..grid.nrings() {
        let off = grid.ring_offset(r);
        for k in 0..grid.ring_len(r) {
            f(r, k, off + k);
        }
    }
}
