// crates/bfsht-kernels/src/fft.rs

//! Inverse real-FFT adaptor for the per-ring assembly stage.
//!
//! Half-complex convention: a length-`n` real signal is synthesized from
//! `n/2 + 1` complex bins, unnormalized (`y_k = Σ_j Y_j e^{+2πi jk/n}` over
//! the Hermitian extension). The imaginary parts of the DC and Nyquist bins
//! are required to be zero; the assembly stage clears them before invoking
//! the transform.

#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

use std::sync::Arc;

use num_complex::Complex64;
use realfft::{ComplexToReal, RealFftPlanner};

/// A planned inverse transform for one ring length. Cheap to clone, safe to
/// execute concurrently from many threads with per-caller scratch.
pub type RingInverseFft = Arc<dyn ComplexToReal<f64>>;

/// Planner for per-ring inverse FFTs.
///
/// Planning is *not* assumed thread-safe; callers serialize access (the
/// planner is held under a mutex during plan construction). Execution of the
/// returned plans is lock-free.
pub struct RingFftPlanner {
    inner: RealFftPlanner<f64>,
}

impl RingFftPlanner {
    /// Fresh planner. Repeated lengths share one underlying plan.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: RealFftPlanner::new() }
    }

    /// Plan the inverse transform for a ring of `len` real samples.
    pub fn plan_inverse(&mut self, len: usize) -> RingInverseFft {
        self.inner.plan_fft_inverse(len)
    }
}

impl Default for RingFftPlanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of complex bins backing a length-`len` real ring.
#[inline]
#[must_use]
pub fn complex_len(len: usize) -> usize {
    len / 2 + 1
}

/// Scratch (in complex elements) required to execute `fft`.
#[inline]
#[must_use]
pub fn scratch_len(fft: &RingInverseFft) -> usize {
    fft.get_scratch_len()
}

/// Convenience used by tests: synthesize `bins` into `out`.
///
/// # Errors
///
/// Propagates the backend error on length mismatch or nonzero DC/Nyquist
/// imaginary parts.
pub fn synthesize_ring(
    fft: &RingInverseFft,
    bins: &mut [Complex64],
    out: &mut [f64],
    scratch: &mut [Complex64],
) -> Result<(), realfft::FftError> {
    fft.process_with_scratch(bins, out, scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    /// Direct Hermitian synthesis: y_k = Re Σ_j w_j Y_j e^{2πi jk/n},
    /// w_0 = w_{n/2} = 1, else 2.
    fn naive(bins: &[Complex64], n: usize) -> Vec<f64> {
        (0..n)
            .map(|k| {
                let mut acc = 0.0;
                for (j, y) in bins.iter().enumerate() {
                    let w = if j == 0 || 2 * j == n { 1.0 } else { 2.0 };
                    let ph = 2.0 * PI * (j * k) as f64 / n as f64;
                    acc += w * (y.re * ph.cos() - y.im * ph.sin());
                }
                acc
            })
            .collect()
    }

    #[test]
    fn inverse_matches_direct_sum() {
        let n = 8;
        let mut planner = RingFftPlanner::new();
        let fft = planner.plan_inverse(n);
        let mut bins: Vec<Complex64> = (0..complex_len(n))
            .map(|j| Complex64::new(1.0 + j as f64, 0.3 * j as f64))
            .collect();
        bins[0].im = 0.0;
        bins[n / 2].im = 0.0;
        let want = naive(&bins, n);

        let mut out = vec![0.0; n];
        let mut scratch = vec![Complex64::default(); scratch_len(&fft)];
        synthesize_ring(&fft, &mut bins, &mut out, &mut scratch).unwrap();
        for (a, b) in out.iter().zip(&want) {
            assert!((a - b).abs() < 1e-10, "{a} vs {b}");
        }
    }

    #[test]
    fn dc_only_gives_constant() {
        let n = 4;
        let mut planner = RingFftPlanner::new();
        let fft = planner.plan_inverse(n);
        let mut bins = vec![Complex64::default(); complex_len(n)];
        bins[0] = Complex64::new(3.25, 0.0);
        let mut out = vec![0.0; n];
        let mut scratch = vec![Complex64::default(); scratch_len(&fft)];
        synthesize_ring(&fft, &mut bins, &mut out, &mut scratch).unwrap();
        for x in &out {
            assert!((x - 3.25).abs() < 1e-12);
        }
    }
}
