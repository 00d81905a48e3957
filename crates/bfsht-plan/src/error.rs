// crates/bfsht-plan/src/error.rs

//! Planning-time error taxonomy.

use thiserror::Error;

use bfsht_butterfly::BfmError;
use bfsht_resource::ResourceError;

/// Errors surfaced while building a plan (or validating an execute call).
///
/// Execution itself has no recoverable errors: corruption mid-execute is a
/// hard abort by policy.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Invalid request: geometry, thread count, or buffer sizes.
    #[error("configuration: {0}")]
    Config(String),

    /// Resource file could not be loaded or is malformed at the file level.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// A matrix blob failed validation during planning.
    #[error("corrupt matrix blob: {0}")]
    Corrupt(#[from] BfmError),

    /// The resource file registers no matrix for this entry.
    #[error("resource file has no matrix for m={m} odd={odd}")]
    MissingMatrix {
        /// Azimuthal index.
        m: usize,
        /// Parity.
        odd: usize,
    },

    /// An initialization worker failed.
    #[error("planning worker failed: {0}")]
    Worker(String),
}
