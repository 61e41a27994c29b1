#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! All-pairs dependency matrices computed as independent, resumable batches.
//!
//! A matrix of `n` variables has `n(n-1)/2` unordered row pairs. Every pair is
//! named by a single linear index (see [`triangular`]), so the full space can be
//! cut into contiguous ranges that separate workers compute without talking to
//! each other. Each worker writes one artifact per statistic channel
//! ([`batch`]); the [`compile`] step merges all artifacts back into one dense
//! result and reports what is missing or duplicated.

pub mod align;
pub mod artifact;
pub mod batch;
pub mod compile;
pub mod config;
pub mod import;
pub mod matrix;
pub mod plan;
pub mod progress;
pub mod stats;
pub mod triangular;

pub use batch::{BatchOutcome, BatchReport, BatchRequest, PairData, run_batch};
pub use compile::{CompileOptions, CompiledChannel, DuplicatePolicy, compile_dir};
pub use matrix::MaskedMatrix;
pub use stats::{Statistic, StatisticComputer};
pub use triangular::{PairRange, PairSpace, inv_sym_idx, pair_count, sym_idx};
