// crates/bfsht-kernels/src/gemm.rs

//! Slice-checked wrappers around `matrixmultiply::dgemm` in the two memory
//! layouts the engine uses.
//!
//! Conventions: a column-major `m × n` matrix stores element `(i, j)` at
//! `j * m + i`; a row-major one at `i * n + j`. `beta` selects overwrite
//! (`0.0`) or accumulate (`1.0`) on the destination.

#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

/// `C ← A · B + beta · C` with A, B, C all column-major.
///
/// `C` is `m × n`, `A` is `m × k`, `B` is `k × n`.
///
/// # Panics
///
/// Panics when a slice is shorter than its matrix.
pub fn dgemm_ccc(a: &[f64], b: &[f64], c: &mut [f64], m: usize, n: usize, k: usize, beta: f64) {
    assert!(a.len() >= m * k, "A too short: {} < {}", a.len(), m * k);
    assert!(b.len() >= k * n, "B too short: {} < {}", b.len(), k * n);
    assert!(c.len() >= m * n, "C too short: {} < {}", c.len(), m * n);
    if m == 0 || n == 0 {
        return;
    }
    // SAFETY: lengths checked above; strides describe the column-major
    // layouts documented in the module header.
    unsafe {
        matrixmultiply::dgemm(
            m,
            k,
            n,
            1.0,
            a.as_ptr(),
            1,
            m as isize,
            b.as_ptr(),
            1,
            k as isize,
            beta,
            c.as_mut_ptr(),
            1,
            m as isize,
        );
    }
}

/// `C ← A · B + beta · C` with A and C column-major and B row-major.
///
/// `C` is `m × n`, `A` is `m × k`, `B` is `k × n`.
///
/// # Panics
///
/// Panics when a slice is shorter than its matrix.
pub fn dgemm_crc(a: &[f64], b: &[f64], c: &mut [f64], m: usize, n: usize, k: usize, beta: f64) {
    assert!(a.len() >= m * k, "A too short: {} < {}", a.len(), m * k);
    assert!(b.len() >= k * n, "B too short: {} < {}", b.len(), k * n);
    assert!(c.len() >= m * n, "C too short: {} < {}", c.len(), m * n);
    if m == 0 || n == 0 {
        return;
    }
    // SAFETY: as in `dgemm_ccc`; B uses row-major strides.
    unsafe {
        matrixmultiply::dgemm(
            m,
            k,
            n,
            1.0,
            a.as_ptr(),
            1,
            m as isize,
            b.as_ptr(),
            n as isize,
            1,
            beta,
            c.as_mut_ptr(),
            1,
            m as isize,
        );
    }
}
