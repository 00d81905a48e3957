// crates/bfsht-grid/src/lib.rs

//! HEALPix equatorial-symmetric ring grid.
//!
//! For resolution `Nside` the sphere is sampled on `4·Nside − 1` iso-latitude
//! rings; ring `r` (counted from the north pole) carries a uniform-phi set of
//! pixels whose count and first-pixel offset follow the HEALPix law:
//!
//! - `ring_len(r) = 4·(r+1)` in the north polar cap (`r < Nside`),
//!   `4·Nside` in the equatorial belt, mirrored in the south cap;
//! - `phi0(r) = π / (4·(r+1))` in the caps and
//!   `(π / (4·Nside)) · (r mod 2)` in the belt.
//!
//! The descriptor is immutable after construction; ring lengths are
//! equatorially symmetric, which the ring-pair drivers rely on.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]

use std::f64::consts::PI;

/// Immutable ring-grid descriptor.
#[derive(Clone, Debug)]
pub struct RingGrid {
    nside: usize,
    nrings: usize,
    mid_ring: usize,
    npix: usize,
    ring_offsets: Vec<usize>,
    phi0s: Vec<f64>,
}

impl RingGrid {
    /// Build the descriptor for `nside ≥ 1`.
    ///
    /// # Panics
    ///
    /// Panics on `nside == 0`.
    #[must_use]
    pub fn new(nside: usize) -> Self {
        Self::build(nside, false)
    }

    /// Variant with every `phi0` forced to zero (phase-shift debugging).
    #[must_use]
    pub fn without_phase_shifts(nside: usize) -> Self {
        Self::build(nside, true)
    }

    fn build(nside: usize, zero_phi0: bool) -> Self {
        assert!(nside >= 1, "nside must be positive");
        let nrings = 4 * nside - 1;
        let mut ring_offsets = Vec::with_capacity(nrings + 1);
        let mut phi0s = Vec::with_capacity(nrings);

        let mut ring_npix = 0usize;
        let mut ipix = 0usize;
        for iring in 0..nrings {
            let phi0 = if iring <= nside - 1 {
                ring_npix += 4;
                PI / (4.0 * (iring + 1) as f64)
            } else if iring > 3 * nside - 1 {
                ring_npix -= 4;
                PI / (4.0 * (nrings - iring) as f64)
            } else {
                (PI / (4.0 * nside as f64)) * (iring % 2) as f64
            };
            phi0s.push(if zero_phi0 { 0.0 } else { phi0 });
            ring_offsets.push(ipix);
            ipix += ring_npix;
        }
        ring_offsets.push(ipix);

        Self {
            nside,
            nrings,
            mid_ring: 2 * nside - 1,
            npix: ipix,
            ring_offsets,
            phi0s,
        }
    }

    /// Resolution parameter.
    #[inline]
    #[must_use]
    pub fn nside(&self) -> usize {
        self.nside
    }

    /// Number of rings, `4·Nside − 1`.
    #[inline]
    #[must_use]
    pub fn nrings(&self) -> usize {
        self.nrings
    }

    /// Index of the equator ring, `2·Nside − 1`.
    #[inline]
    #[must_use]
    pub fn mid_ring(&self) -> usize {
        self.mid_ring
    }

    /// Rings in the closed northern half-sphere (equator included).
    #[inline]
    #[must_use]
    pub fn nrings_half(&self) -> usize {
        self.mid_ring + 1
    }

    /// This grid always carries an equator ring.
    #[inline]
    #[must_use]
    pub fn has_equator(&self) -> bool {
        true
    }

    /// Total pixel count, `12·Nside²`.
    #[inline]
    #[must_use]
    pub fn npix(&self) -> usize {
        self.npix
    }

    /// First-pixel offset of ring `r`; `ring_offset(nrings)` is `npix`.
    #[inline]
    #[must_use]
    pub fn ring_offset(&self, r: usize) -> usize {
        self.ring_offsets[r]
    }

    /// Pixel count of ring `r`.
    #[inline]
    #[must_use]
    pub fn ring_len(&self, r: usize) -> usize {
        self.ring_offsets[r + 1] - self.ring_offsets[r]
    }

    /// Azimuth of the first pixel of ring `r`.
    #[inline]
    #[must_use]
    pub fn phi0(&self, r: usize) -> f64 {
        self.phi0s[r]
    }

    /// `cos θ` of ring `r` (HEALPix z law; positive in the north).
    #[inline]
    #[must_use]
    pub fn ring_cos_theta(&self, r: usize) -> f64 {
        let ns = self.nside as f64;
        if r < self.nside {
            let i = (r + 1) as f64;
            1.0 - i * i / (3.0 * ns * ns)
        } else if r < 3 * self.nside {
            let i = (r + 1) as f64;
            4.0 / 3.0 - 2.0 * i / (3.0 * ns)
        } else {
            -self.ring_cos_theta(self.nrings - 1 - r)
        }
    }
}
