// crates/bfsht-plan/src/fft_stage.rs

//! Assembly + inverse-FFT stage.
//!
//! Per chunk of up to `FFT_CHUNK_SIZE` ring-pairs this CPU owns:
//!
//! 1. zero the Fourier scratch;
//! 2. scan every m, combine the even/odd phase vectors into top/bottom ring
//!    values, phase-shift by `e^{i·m·φ₀}`, and fold the mode into the ring's
//!    representable band: bin `j₁ = m mod n` takes the value, bin
//!    `j₂ = (n − m) mod n` takes its conjugate (the −m partner), each only
//!    while it lies at or below the Nyquist bin. Modes beyond `n/2` re-enter
//!    through their conjugate partner; that is the aliasing fold;
//! 3. inverse real FFT per map (bottom skipped on the self-paired equator);
//! 4. copy each ring into its map's slice of the output.
//!
//! Accumulation within a chunk is single-threaded per CPU, and different
//! CPUs own disjoint output rings, so the stage needs no locks at all.

use num_complex::Complex64;

use crate::plan::{hard_check, CpuScratch, PlanShared, FFT_CHUNK_SIZE};

pub(crate) fn run(shared: &PlanShared, cpu_idx: usize, scratch: &mut CpuScratch) {
    let cpu = &shared.cpus[cpu_idx];
    let nmaps = shared.nmaps;
    let nvecs = shared.nvecs;
    let nrings_half = shared.grid.nrings_half();
    let npix = shared.grid.npix();
    let stride = shared.work_q_stride;
    let cmax = 2 * shared.nside + 1;
    // Complex bins of (ring-pair slot jj, map k); jj = 2·j for the northern
    // ring of chunk entry j, 2·j + 1 for its southern twin.
    let slot = |jj: usize, k: usize| (jj * nmaps + k) * cmax;

    for (chunk_idx, chunk) in cpu.ring_pairs.chunks(FFT_CHUNK_SIZE).enumerate() {
        scratch.fft_acc.fill(Complex64::default());

        for m in 0..=shared.mmax {
            let (node_idx, off) = shared.m_to_phase[m];
            let work_q = &shared.nodes[node_idx].work_q;
            // SAFETY: the inter-stage barrier ordered all Legendre writes
            // before this read; nothing writes work_q during this stage.
            let q_even = unsafe { work_q.slice(off, nvecs * nrings_half) };
            let q_odd = unsafe { work_q.slice(off + stride, nvecs * nrings_half) };

            for (j, rp) in chunk.iter().enumerate() {
                let n = rp.length;
                let half = n / 2;
                let ang = m as f64 * rp.phi0;
                let phase = Complex64::new(ang.cos(), ang.sin());
                let j1 = m % n;
                let j2 = (n - j1) % n; // sign-of-divisor mod of (n − m)
                let ring = rp.ring_number;

                for k in 0..nmaps {
                    let at = ring * nvecs + 2 * k;
                    let qe = Complex64::new(q_even[at], q_even[at + 1]);
                    let qo = Complex64::new(q_odd[at], q_odd[at + 1]);
                    let q_top = (qe + qo) * phase;
                    let q_bottom = (qe - qo) * phase;
                    if j1 <= half {
                        scratch.fft_acc[slot(2 * j, k) + j1] += q_top;
                        scratch.fft_acc[slot(2 * j + 1, k) + j1] += q_bottom;
                    }
                    if m != 0 && j2 <= half {
                        scratch.fft_acc[slot(2 * j, k) + j2] += q_top.conj();
                        scratch.fft_acc[slot(2 * j + 1, k) + j2] += q_bottom.conj();
                    }
                }
            }
        }

        for (j, rp) in chunk.iter().enumerate() {
            let n = rp.length;
            let nc = n / 2 + 1;
            let fft = &scratch.ring_ffts[chunk_idx * FFT_CHUNK_SIZE + j];
            for k in 0..nmaps {
                for (jj, offset) in [(2 * j, rp.offset_top), (2 * j + 1, rp.offset_bottom)] {
                    if jj % 2 == 1 && rp.offset_bottom == rp.offset_top {
                        continue; // equator ring is its own twin
                    }
                    let base = slot(jj, k);
                    let bins = &mut scratch.fft_acc[base..base + nc];
                    // The DC and Nyquist bins of a real signal are purely
                    // real; ±m cancellation leaves rounding noise there.
                    bins[0].im = 0.0;
                    bins[nc - 1].im = 0.0;
                    let out_ring = &mut scratch.fft_real[..n];
                    hard_check(
                        fft.process_with_scratch(bins, out_ring, &mut scratch.fft_scratch),
                        "inverse ring FFT",
                    );
                    // SAFETY: ring regions of distinct CPUs are disjoint and
                    // the barrier protocol brackets the output borrow.
                    let dst = unsafe { shared.io.output_region(k * npix + offset, n) };
                    dst.copy_from_slice(out_ring);
                }
            }
        }
    }
}
