//! Helpers shared by the engine: weighted selection and reproducible per-iteration randomness.

pub mod sampling;
