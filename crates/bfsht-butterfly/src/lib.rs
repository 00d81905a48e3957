// crates/bfsht-butterfly/src/lib.rs

//! Butterfly-compressed matrix engine.
//!
//! A *blob* is a serialized block tree describing a matrix `A` of
//! `rows × cols` entries; the engine streams over the tree and computes
//! `out = Aᵀ · x` for a block of `nvecs` input vectors without ever
//! materializing `A`. Interior `butterfly` nodes carry two interpolation
//! operators that expand the (shorter) results of their two children onto
//! disjoint output column ranges; leaves are applied through a caller-supplied
//! kernel, which is how the dense associated-Legendre recurrence is plugged
//! in without the engine knowing anything about spherical harmonics.
//!
//! Design notes:
//! - Blob bytes are walked by a typed [`cursor::Cursor`] that enforces bounds
//!   and the format's 16-byte internal alignment.
//! - Recursion works inside an explicitly sized scratch arena
//!   ([`engine::BfmPlan`]); the hot path performs no allocation.
//! - The bandwidth-heavy leaf step runs under a caller-provided
//!   [`engine::StreamThrottle`] so a node-level semaphore can bound
//!   concurrent memory-bus streams.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod cursor;
pub mod dense;
pub mod engine;
mod error;
pub mod legendre;

pub use cursor::{AlignedBlobBuf, Cursor};
pub use dense::{measure_dense_leaf, DenseKernel};
pub use engine::{
    apply_transpose, query, BfmPlan, LeafKernel, MatrixShape, NoThrottle, QueryInfo,
    StreamThrottle, TYPE_BUTTERFLY, TYPE_DENSE, TYPE_HSTACK, TYPE_ZERO,
};
pub use error::BfmError;
pub use legendre::{measure_legendre_leaf, CoeffView, LegendreKernel};
