// crates/bfsht-butterfly/src/error.rs

//! Corruption taxonomy for blob traversal.
//!
//! A blob comes from a trusted resource file, so every variant here means the
//! file (or the pointer math around it) is bad; callers on the execute path
//! treat these as fatal.

use thiserror::Error;

/// Errors from parsing or applying a butterfly blob.
#[derive(Debug, Error)]
pub enum BfmError {
    /// Blob base pointer or an internal read position missed the format's
    /// 16-byte alignment.
    #[error("blob data is not 16-byte aligned")]
    Misaligned,

    /// A read ran past the end of the blob.
    #[error("blob truncated: needed {need} bytes at offset {at}")]
    Truncated {
        /// Bytes the reader asked for.
        need: usize,
        /// Offset of the failed read.
        at: usize,
    },

    /// First word of a block was none of the known type tags.
    #[error("unknown block type tag {0}")]
    UnknownType(i32),

    /// `hstack` blocks are reserved and must not appear at this format
    /// version.
    #[error("hstack block is reserved at this resource format version")]
    ReservedHstack,

    /// An interpolation filter byte was neither 0 nor 1.
    #[error("interpolation filter byte {0:#x} (expected 0 or 1)")]
    FilterByte(u8),

    /// A block's dimensions disagree with its children or its payload.
    #[error("inconsistent block dimensions: {0}")]
    Dimensions(&'static str),
}
