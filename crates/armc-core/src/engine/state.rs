use super::cache::Fingerprint;
use crate::core::params::set::ParameterSet;

/// A parameter snapshot together with its unbiased auxiliary error.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub params: ParameterSet,
    pub fingerprint: Fingerprint,
    pub aux_error: f64,
}

impl State {
    pub fn new(params: ParameterSet, aux_error: f64) -> Self {
        let fingerprint = Fingerprint::of(&params.values());
        Self {
            params,
            fingerprint,
            aux_error,
        }
    }
}

/// Acceptance rule: the trial must be strictly better. Ties and NaN keep the incumbent.
pub fn accepts(current_biased: f64, trial_biased: f64) -> bool {
    trial_biased < current_biased
}

/// The lowest-error state visited so far.
#[derive(Debug, Clone, PartialEq)]
pub struct BestState {
    /// `None` for the initial state.
    pub iteration: Option<usize>,
    pub aux_error: f64,
    pub params: ParameterSet,
}

impl BestState {
    pub fn from_state(state: &State, iteration: Option<usize>) -> Self {
        Self {
            iteration,
            aux_error: state.aux_error,
            params: state.params.clone(),
        }
    }

    /// Replaces the stored state if `state` has a strictly lower error.
    pub fn offer(&mut self, state: &State, iteration: usize) -> bool {
        if state.aux_error < self.aux_error {
            *self = Self::from_state(state, Some(iteration));
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evaluation::testing::charges;

    #[test]
    fn lower_trial_error_is_accepted() {
        assert!(accepts(0.40, 0.35));
    }

    #[test]
    fn higher_trial_error_is_rejected() {
        assert!(!accepts(0.40, 0.45));
    }

    #[test]
    fn ties_favor_the_incumbent() {
        assert!(!accepts(0.40, 0.40));
    }

    #[test]
    fn nan_and_infinite_trials_are_rejected() {
        assert!(!accepts(0.40, f64::NAN));
        assert!(!accepts(0.40, f64::INFINITY));
        assert!(!accepts(f64::INFINITY, f64::INFINITY));
    }

    #[test]
    fn best_state_tracks_strict_improvements() {
        let a = State::new(charges(&[("Cd", 1.0)], &[]), 0.5);
        let b = State::new(charges(&[("Cd", 1.1)], &[]), 0.4);
        let mut best = BestState::from_state(&a, None);
        assert!(!best.offer(&a, 3));
        assert!(best.offer(&b, 4));
        assert_eq!(best.iteration, Some(4));
        assert_eq!(best.aux_error, 0.4);
    }
}
