// crates/bfsht-kernels/src/lib.rs

//! Thin adaptors over the dense-GEMM and real-FFT primitives.
//!
//! The transform engine treats both as opaque: the butterfly/Legendre code
//! only ever needs two fixed GEMM shapes, and the assembly stage needs one
//! inverse complex-to-real transform per ring length. Everything else
//! (planning strategy, SIMD dispatch) belongs to the backing crates.

#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

pub mod fft;
pub mod gemm;

pub use fft::{RingFftPlanner, RingInverseFft};
pub use gemm::{dgemm_ccc, dgemm_crc};
