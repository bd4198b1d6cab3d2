//! # ARMC Core Library
//!
//! A library for fitting classical force-field parameters (charges, Lennard-Jones terms, bonded
//! potentials) to an ab-initio reference with the Adaptive Rate Monte Carlo (ARMC) method.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture to keep concerns separated:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`ParameterSet`, `Trajectory`,
//!   `Descriptor`), constraint parsing, parameter guessing and trajectory I/O.
//!
//! - **[`engine`]: The Logic Core.** The stateful pieces of the Monte Carlo chain: the move
//!   generator, the fingerprint-keyed `PesCache`, the bias overlay that distorts the error
//!   landscape, the `PhiController`, the auxiliary-error evaluator and the append-only
//!   `HistoryStore`.
//!
//! - **[`workflows`]: The Public API.** Ties `engine` and `core` together into a complete ARMC
//!   run, including resumption from a persisted history.

pub mod core;
pub mod engine;
pub mod workflows;
