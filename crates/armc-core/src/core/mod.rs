//! # Core Module
//!
//! The stateless foundation of the ARMC library.
//!
//! - **Parameters** ([`params`]) - Tunable force-field parameters, their constraints and
//!   strategies for guessing missing values.
//! - **Models** ([`models`]) - The trajectory capability interface shared by simulation runners
//!   and descriptor functions.
//! - **Descriptors** ([`descriptors`]) - Labelled descriptor arrays and the registry of named
//!   descriptor functions.
//! - **I/O** ([`io`]) - Readers and writers for trajectory files.

pub mod descriptors;
pub mod io;
pub mod models;
pub mod params;
