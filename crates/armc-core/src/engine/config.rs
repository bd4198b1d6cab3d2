use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// How a drawn step is applied to the selected parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveFunc {
    /// `value * (1 + step)`
    #[default]
    Multiply,
    /// `value + step`
    Add,
}

impl MoveFunc {
    pub fn apply(&self, value: f64, step: f64) -> f64 {
        match self {
            MoveFunc::Multiply => value * (1.0 + step),
            MoveFunc::Add => value + step,
        }
    }
}

impl FromStr for MoveFunc {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "multiply" | "mul" => Ok(MoveFunc::Multiply),
            "add" => Ok(MoveFunc::Add),
            other => Err(invalid(
                "move.func",
                format!("'{}' is not one of 'multiply' or 'add'", other),
            )),
        }
    }
}

impl fmt::Display for MoveFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MoveFunc::Multiply => "multiply",
            MoveFunc::Add => "add",
        })
    }
}

/// How per-molecule errors are combined in state-averaged mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoleculeReduction {
    #[default]
    Mean,
    Sum,
}

impl FromStr for MoleculeReduction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" | "average" => Ok(MoleculeReduction::Mean),
            "sum" => Ok(MoleculeReduction::Sum),
            other => Err(invalid(
                "armc.molecule-reduction",
                format!("'{}' is not one of 'mean' or 'sum'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveConfig {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    pub func: MoveFunc,
    /// Draws allowed before a bound-violating move becomes a fatal error.
    pub max_attempts: usize,
    /// Round moved values to this many decimals.
    pub decimals: Option<u32>,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            start: 0.005,
            stop: 0.1,
            step: 0.005,
            func: MoveFunc::Multiply,
            max_attempts: 100,
            decimals: None,
        }
    }
}

impl MoveConfig {
    /// Unsigned step magnitudes `start, start + step, ..., stop`.
    pub fn magnitudes(&self) -> Vec<f64> {
        let n = ((self.stop - self.start) / self.step + 1e-9).floor() as usize + 1;
        (0..n).map(|i| self.start + i as f64 * self.step).collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.step > 0.0 && self.step.is_finite()) {
            return Err(invalid("move.step", "must be a positive number"));
        }
        if !(self.start > 0.0 && self.start <= self.stop && self.stop.is_finite()) {
            return Err(invalid("move.start", "expected 0 < start <= stop"));
        }
        if self.func == MoveFunc::Multiply && self.stop >= 1.0 {
            return Err(invalid(
                "move.stop",
                "multiplicative steps must stay below 1 to preserve the sign of a parameter",
            ));
        }
        if self.max_attempts == 0 {
            return Err(invalid("move.max-attempts", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhiConfig {
    pub phi: f64,
    pub gamma: f64,
    pub a_target: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonteCarloConfig {
    /// Total number of iterations, `kappa * omega`.
    pub iter_len: usize,
    /// Iterations per super-iteration, `omega`.
    pub sub_iter_len: usize,
    pub seed: u64,
    pub flush_interval: usize,
}

impl MonteCarloConfig {
    pub fn super_iter_len(&self) -> usize {
        self.iter_len / self.sub_iter_len
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    /// Error assigned to a trial whose evaluation failed.
    pub failure_penalty: f64,
    pub molecule_reduction: MoleculeReduction,
    pub timeout: Option<Duration>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            failure_penalty: f64::INFINITY,
            molecule_reduction: MoleculeReduction::Mean,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArmcConfig {
    pub monte_carlo: MonteCarloConfig,
    pub phi: PhiConfig,
    pub moves: MoveConfig,
    pub evaluation: EvaluationConfig,
    pub history_path: PathBuf,
}

#[derive(Default)]
pub struct ArmcConfigBuilder {
    iter_len: Option<usize>,
    sub_iter_len: Option<usize>,
    seed: Option<u64>,
    flush_interval: Option<usize>,
    phi: Option<f64>,
    gamma: Option<f64>,
    a_target: Option<f64>,
    moves: Option<MoveConfig>,
    evaluation: Option<EvaluationConfig>,
    history_path: Option<PathBuf>,
}

impl ArmcConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter_len(mut self, n: usize) -> Self {
        self.iter_len = Some(n);
        self
    }
    pub fn sub_iter_len(mut self, n: usize) -> Self {
        self.sub_iter_len = Some(n);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn flush_interval(mut self, n: usize) -> Self {
        self.flush_interval = Some(n);
        self
    }
    pub fn phi(mut self, phi: f64) -> Self {
        self.phi = Some(phi);
        self
    }
    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = Some(gamma);
        self
    }
    pub fn a_target(mut self, a_target: f64) -> Self {
        self.a_target = Some(a_target);
        self
    }
    pub fn moves(mut self, moves: MoveConfig) -> Self {
        self.moves = Some(moves);
        self
    }
    pub fn evaluation(mut self, evaluation: EvaluationConfig) -> Self {
        self.evaluation = Some(evaluation);
        self
    }
    pub fn history_path(mut self, path: PathBuf) -> Self {
        self.history_path = Some(path);
        self
    }

    pub fn build(self) -> Result<ArmcConfig, ConfigError> {
        let iter_len = self
            .iter_len
            .ok_or(ConfigError::MissingParameter("iter_len"))?;
        let sub_iter_len = self
            .sub_iter_len
            .ok_or(ConfigError::MissingParameter("sub_iter_len"))?;
        if sub_iter_len == 0 {
            return Err(invalid("armc.sub-iter-len", "must be positive"));
        }
        if iter_len == 0 || iter_len % sub_iter_len != 0 {
            return Err(invalid(
                "armc.iter-len",
                format!(
                    "{} is not a positive multiple of sub-iter-len ({})",
                    iter_len, sub_iter_len
                ),
            ));
        }
        let flush_interval = self.flush_interval.unwrap_or(sub_iter_len);
        if flush_interval == 0 {
            return Err(invalid("armc.flush-interval", "must be positive"));
        }

        let phi = PhiConfig {
            phi: self.phi.ok_or(ConfigError::MissingParameter("phi"))?,
            gamma: self.gamma.ok_or(ConfigError::MissingParameter("gamma"))?,
            a_target: self
                .a_target
                .ok_or(ConfigError::MissingParameter("a_target"))?,
        };
        if !(phi.phi > 0.0 && phi.phi.is_finite()) {
            return Err(invalid("armc.phi", "must be a positive number"));
        }
        if !(phi.gamma > 1.0 && phi.gamma.is_finite()) {
            return Err(invalid("armc.gamma", "must be greater than 1"));
        }
        if !(phi.a_target > 0.0 && phi.a_target <= 1.0) {
            return Err(invalid("armc.a-target", "expected 0 < a-target <= 1"));
        }

        let moves = self.moves.unwrap_or_default();
        moves.validate()?;

        let evaluation = self.evaluation.unwrap_or_default();
        if !(evaluation.failure_penalty > 0.0) {
            return Err(invalid("armc.failure-penalty", "must be positive"));
        }

        Ok(ArmcConfig {
            monte_carlo: MonteCarloConfig {
                iter_len,
                sub_iter_len,
                seed: self.seed.ok_or(ConfigError::MissingParameter("seed"))?,
                flush_interval,
            },
            phi,
            moves,
            evaluation,
            history_path: self
                .history_path
                .ok_or(ConfigError::MissingParameter("history_path"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ArmcConfigBuilder {
        ArmcConfigBuilder::new()
            .iter_len(200)
            .sub_iter_len(100)
            .seed(7)
            .phi(1.0)
            .gamma(2.0)
            .a_target(0.25)
            .history_path(PathBuf::from("armc.hdf5"))
    }

    #[test]
    fn builds_with_defaults_for_optional_blocks() {
        let config = complete().build().unwrap();
        assert_eq!(config.monte_carlo.flush_interval, 100);
        assert_eq!(config.monte_carlo.super_iter_len(), 2);
        assert_eq!(config.moves, MoveConfig::default());
        assert_eq!(config.evaluation.failure_penalty, f64::INFINITY);
    }

    #[test]
    fn missing_mandatory_value_is_reported_by_name() {
        let result = ArmcConfigBuilder::new().sub_iter_len(10).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("iter_len")));
        let result = complete().iter_len(100).build().map(|_| ());
        assert!(result.is_ok());
    }

    #[test]
    fn iter_len_must_be_a_multiple_of_sub_iter_len() {
        let result = complete().iter_len(150).build();
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "armc.iter-len",
                ..
            })
        ));
    }

    #[test]
    fn out_of_range_schedule_values_are_rejected() {
        assert!(complete().gamma(1.0).build().is_err());
        assert!(complete().a_target(0.0).build().is_err());
        assert!(complete().phi(-1.0).build().is_err());
        assert!(complete().flush_interval(0).build().is_err());
        let bad_moves = MoveConfig {
            start: 0.2,
            stop: 0.1,
            ..MoveConfig::default()
        };
        assert!(complete().moves(bad_moves).build().is_err());
    }

    #[test]
    fn default_move_grid_has_twenty_magnitudes() {
        let magnitudes = MoveConfig::default().magnitudes();
        assert_eq!(magnitudes.len(), 20);
        assert!((magnitudes[0] - 0.005).abs() < 1e-12);
        assert!((magnitudes[19] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn move_functions_apply_steps() {
        assert!((MoveFunc::Multiply.apply(2.0, -0.1) - 1.8).abs() < 1e-12);
        assert_eq!(MoveFunc::Add.apply(2.0, 0.5), 2.5);
        assert_eq!("ADD".parse::<MoveFunc>(), Ok(MoveFunc::Add));
        assert!("divide".parse::<MoveFunc>().is_err());
        assert_eq!(
            "sum".parse::<MoleculeReduction>(),
            Ok(MoleculeReduction::Sum)
        );
    }
}
