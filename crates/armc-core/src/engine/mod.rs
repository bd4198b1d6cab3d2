//! # Engine Module
//!
//! The stateful Adaptive Rate Monte Carlo engine: everything that changes from one iteration to
//! the next lives here.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Chain length, phi schedule, move grid and evaluation policy
//! - **Moves** ([`moves`]) - Quantized random perturbation of one optimizable parameter
//! - **Evaluation** ([`evaluation`]) - The simulation runner seam and descriptor computation
//! - **Caching** ([`cache`]) - Exact-fingerprint memoization of evaluations, deduplicating
//!   concurrent misses
//! - **Landscape** ([`landscape`]) - The phi bias overlay kept apart from the cached base errors
//! - **Auxiliary error** ([`aux_error`]) - Normalized squared deviation from the reference
//! - **Phi control** ([`phi`]) - Acceptance window and super-iteration rescaling
//! - **History** ([`history`]) - Append-only iteration log used for diagnostics and restart
//! - **Orchestration** ([`orchestrator`]) - The `Idle -> Proposing -> Evaluating -> Deciding ->
//!   Recording` state machine
//! - **Progress** ([`progress`]) and **Errors** ([`error`])

pub mod aux_error;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod history;
pub mod landscape;
pub mod moves;
pub mod orchestrator;
pub mod phi;
pub mod progress;
pub mod state;
pub(crate) mod utils;
