use thiserror::Error;

use super::config::ConfigError;
use super::evaluation::EvaluationError;
use super::history::HistoryError;
use crate::core::descriptors::DescriptorError;
use crate::core::params::guess::GuessError;
use crate::core::params::set::ParamSetError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid parameter set: {0}")]
    Parameters(#[from] ParamSetError),

    #[error("Parameter guess failed: {0}")]
    Guess(#[from] GuessError),

    #[error("Invalid descriptor setup: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resampling a bound-violating move never succeeded: the feasible range is effectively empty.
    #[error(
        "No move of parameter '{parameter}' satisfied its constraints after {attempts} attempts"
    )]
    ConstraintViolation { parameter: String, attempts: usize },

    #[error("The initial parameter set could not be evaluated: {0}")]
    InitialEvaluation(#[source] EvaluationError),

    #[error("Cannot resume from history: {0}")]
    RestartMismatch(String),

    #[error("Failed to persist history: {0}")]
    Persistence(#[from] HistoryError),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the error stems from the user's configuration rather than from the run itself.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::Config(_)
                | EngineError::Parameters(_)
                | EngineError::Guess(_)
                | EngineError::Descriptor(_)
                | EngineError::Configuration(_)
                | EngineError::ConstraintViolation { .. }
        )
    }
}
