// crates/bfsht-resource/src/lib.rs

//! Resource files: versioned, memory-mapped containers of the per-(m, parity)
//! butterfly matrix blobs.
//!
//! Wire layout (little-endian, offsets are byte positions from file start):
//!
//! ```text
//! 0        i64 lmax
//! 8        i64 mmax
//! 16       i64 Nside
//! 24       (i64 offset, i64 length) × 4·(mmax + 1)
//!          indexed [4·m + 2·odd], [4·m + 2·odd + 1]
//! ...      blobs, each 16-byte aligned; offset 0 marks an absent entry
//! ```
//!
//! Files live at `<root>/rev<RESOURCE_FORMAT_VERSION>/<Nside>.dat`. The
//! loader maps the file read-only and hands out borrowed blob slices; the
//! [`writer`] module produces small test/benchmark fixtures in the same
//! format (the production precomputation pipeline is an external tool).

#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

mod aligned;
mod error;
mod file;
pub mod writer;

pub use aligned::AlignedBytes;
pub use error::ResourceError;
pub use file::{query_resourcefile, ResourceFile};

use std::path::{Path, PathBuf};

/// Bumped on any breaking change of the wire format.
pub const RESOURCE_FORMAT_VERSION: u32 = 1;

/// Conventional on-disk location of the resource file for `nside`.
#[must_use]
pub fn resource_path(root: &Path, nside: usize) -> PathBuf {
    root.join(format!("rev{RESOURCE_FORMAT_VERSION}"))
        .join(format!("{nside}.dat"))
}

/// Degrees of one (m, parity) matrix: count of `l ∈ [m + odd, lmax]` with
/// `l − m − odd` even.
#[inline]
#[must_use]
pub fn parity_degree_count(lmax: usize, m: usize, odd: usize) -> usize {
    if lmax >= m + odd {
        (lmax - m - odd) / 2 + 1
    } else {
        0
    }
}
