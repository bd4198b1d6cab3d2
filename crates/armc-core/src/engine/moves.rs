use super::config::{ConfigError, MoveConfig};
use super::error::EngineError;
use super::utils::sampling::weighted_choice;
use crate::core::params::set::ParameterSet;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::trace;

/// A move that produced a valid trial state.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    /// The parameter that was drawn.
    pub index: usize,
    pub old_value: f64,
    pub new_value: f64,
    /// Signed step that was applied.
    pub step: f64,
    /// Every parameter rewritten by the move, including linked ones.
    pub changed: Vec<usize>,
    /// Draws needed to satisfy all bounds.
    pub attempts: usize,
}

/// Proposes trial states by perturbing one optimizable parameter by a quantized step.
#[derive(Debug, Clone)]
pub struct MoveGenerator {
    config: MoveConfig,
    magnitudes: Vec<f64>,
}

impl MoveGenerator {
    pub fn new(config: MoveConfig) -> Result<Self, ConfigError> {
        let magnitudes = config.magnitudes();
        if magnitudes.is_empty() {
            return Err(ConfigError::Invalid {
                field: "move",
                reason: "step range is empty".to_string(),
            });
        }
        Ok(Self { config, magnitudes })
    }

    /// Every signed step the generator can draw, in ascending order.
    pub fn steps(&self) -> Vec<f64> {
        let mut steps: Vec<f64> = self
            .magnitudes
            .iter()
            .rev()
            .map(|m| -m)
            .chain(self.magnitudes.iter().copied())
            .collect();
        steps.dedup();
        steps
    }

    /// Returns a modified copy of `current`; `current` itself is never touched.
    ///
    /// Moves that break a bound are redrawn, up to `max_attempts` times.
    pub fn propose(
        &self,
        current: &ParameterSet,
        rng: &mut impl Rng,
    ) -> Result<(ParameterSet, Move), EngineError> {
        let free = current.free_indices();
        if free.is_empty() {
            return Err(EngineError::Configuration(
                "every parameter is frozen; nothing to optimize".to_string(),
            ));
        }
        let weights: Vec<f64> = free.iter().map(|&i| current.selection_weight(i)).collect();

        let mut last_selected = free[0];
        for attempt in 1..=self.config.max_attempts {
            let index = free[weighted_choice(&weights, rng)
                .map_err(|e| EngineError::Configuration(e.to_string()))?];
            last_selected = index;

            let magnitude = *self
                .magnitudes
                .choose(rng)
                .ok_or_else(|| EngineError::Internal("empty move grid".to_string()))?;
            let step = if rng.gen_bool(0.5) { magnitude } else { -magnitude };

            let old_value = current
                .get(index)
                .map(|p| p.value)
                .ok_or_else(|| EngineError::Internal(format!("no parameter {}", index)))?;
            let new_value = self.round(self.config.func.apply(old_value, step));
            if new_value == old_value {
                trace!(index, value = old_value, attempt, "Rounded move is a no-op; redrawing.");
                continue;
            }

            let mut trial = current.clone();
            let changed = trial.set_linked(index, new_value);
            match trial.first_violation(&changed) {
                None => {
                    return Ok((
                        trial,
                        Move {
                            index,
                            old_value,
                            new_value,
                            step,
                            changed,
                            attempts: attempt,
                        },
                    ));
                }
                Some((id, value)) => {
                    trace!(parameter = %id, value, attempt, "Move violates bounds; redrawing.");
                }
            }
        }

        let parameter = current
            .get(last_selected)
            .map(|p| p.id.to_string())
            .unwrap_or_default();
        Err(EngineError::ConstraintViolation {
            parameter,
            attempts: self.config.max_attempts,
        })
    }

    fn round(&self, value: f64) -> f64 {
        match self.config.decimals {
            Some(d) => {
                let scale = 10f64.powi(d as i32);
                (value * scale).round() / scale
            }
            None => value,
        }
    }
}
