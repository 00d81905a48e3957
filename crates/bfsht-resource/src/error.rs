// crates/bfsht-resource/src/error.rs

//! I/O and format errors for resource files.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or writing a resource file.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Opening or stat-ing the file failed.
    #[error("open {path}: {source}")]
    Open {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Mapping the file into memory failed.
    #[error("mmap {path}: {source}")]
    Map {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Writing a fixture failed.
    #[error("write {path}: {source}")]
    Write {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// File is shorter than its header plus offsets table.
    #[error("{path}: truncated resource header")]
    Truncated {
        /// File involved.
        path: PathBuf,
    },

    /// A header field does not describe a plausible geometry.
    #[error("{path}: bad header field {field} = {value}")]
    BadHeader {
        /// File involved.
        path: PathBuf,
        /// Offending field.
        field: &'static str,
        /// Raw value.
        value: i64,
    },

    /// An offsets-table entry points outside the file or off alignment.
    #[error("{path}: bad blob table entry for m={m} odd={odd}")]
    BadTable {
        /// File involved.
        path: PathBuf,
        /// Azimuthal index.
        m: usize,
        /// Parity.
        odd: usize,
    },
}
