//! # Workflows Module
//!
//! High-level entry points that run a complete ARMC parameter fit.
//!
//! ## Overview
//!
//! A workflow takes an assembled [`ArmcConfig`](crate::engine::config::ArmcConfig), an
//! [`Evaluator`](crate::engine::evaluation::Evaluator) wrapping the user's simulation runner and
//! the initial parameter set, and drives the Monte Carlo chain to completion. It owns phase and
//! task reporting, so callers only need to render [`Progress`](crate::engine::progress::Progress)
//! events.
//!
//! ## Architecture
//!
//! - **ARMC Workflow** ([`armc`]) - Fresh or resumed runs of the adaptive rate Monte Carlo chain,
//!   returning an [`ArmcSummary`](crate::engine::orchestrator::ArmcSummary) with the best state.

pub mod armc;
