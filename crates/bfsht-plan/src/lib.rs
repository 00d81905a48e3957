// crates/bfsht-plan/src/lib.rs

//! Planning and execution of the two-stage HEALPix synthesis.
//!
//! A [`SynthPlan`] is built once per problem geometry: it distributes
//! m-values across topology nodes and ring-pairs across CPUs, loads (and by
//! default copies node-locally) the butterfly matrices, allocates every
//! scratch buffer from the thread that will use it, plans the per-ring FFTs,
//! and parks one pinned worker per CPU at a barrier. Each
//! [`SynthPlan::execute`] then runs
//!
//! ```text
//! barrier → Legendre stage (per-node m queue) → barrier → assembly + FFT
//! stage (per-CPU ring pairs) → barrier
//! ```
//!
//! with the driver thread as the extra barrier participant. The plan is
//! immutable after construction apart from the per-node queue cursors.
//!
//! Corruption discovered while executing aborts the process (resource files
//! are trusted input); everything detectable at planning time is returned as
//! a [`PlanError`] instead.

#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

mod context;
mod error;
mod fft_stage;
mod legendre_stage;
mod plan;
mod sync;
pub mod topology;

pub use context::SynthContext;
pub use error::PlanError;
pub use plan::{
    coeff_block_start, coeff_index, coeff_len, PlanFlags, PlanSpec, SynthPlan, FFT_CHUNK_SIZE,
};
pub use topology::{MachineTopology, StubTopology, Topology};
