//! Tunable force-field parameters.
//!
//! A [`set::ParameterSet`] is an ordered collection of [`parameter::Parameter`]s grouped by
//! parameter kind (`charge`, `epsilon`, `sigma`, ...). Bounds and ratio links between parameters
//! are declared as string expressions and parsed by [`constraints`]; missing Lennard-Jones values
//! can be estimated by the strategies in [`guess`].

pub mod constraints;
pub mod guess;
pub mod parameter;
pub mod set;
