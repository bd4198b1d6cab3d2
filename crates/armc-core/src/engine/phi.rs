use super::config::PhiConfig;
use std::collections::VecDeque;
use tracing::info;

/// Accept/reject outcomes of the current super-iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptanceWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl AcceptanceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, accepted: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(accepted);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|a| **a).count()
    }

    /// Fraction of accepted moves; `None` for an empty window.
    pub fn rate(&self) -> Option<f64> {
        if self.outcomes.is_empty() {
            None
        } else {
            Some(self.accepted() as f64 / self.outcomes.len() as f64)
        }
    }

    pub fn reset(&mut self) {
        self.outcomes.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhiUpdate {
    pub acceptance_rate: f64,
    pub old_phi: f64,
    pub new_phi: f64,
}

/// Holds phi and rescales it at every super-iteration boundary:
/// `phi_new = phi * gamma^sign(rate - a_target)`.
#[derive(Debug, Clone)]
pub struct PhiController {
    phi: f64,
    gamma: f64,
    a_target: f64,
    window: AcceptanceWindow,
    updates: usize,
}

impl PhiController {
    pub fn new(config: &PhiConfig, sub_iter_len: usize) -> Self {
        Self {
            phi: config.phi,
            gamma: config.gamma,
            a_target: config.a_target,
            window: AcceptanceWindow::new(sub_iter_len),
            updates: 0,
        }
    }

    pub fn phi(&self) -> f64 {
        self.phi
    }

    pub fn window(&self) -> &AcceptanceWindow {
        &self.window
    }

    /// Number of boundary rescales performed so far.
    pub fn updates(&self) -> usize {
        self.updates
    }

    pub fn record(&mut self, accepted: bool) {
        self.window.push(accepted);
    }

    /// Rescales phi from the window's acceptance rate and starts a new window.
    pub fn rescale(&mut self) -> PhiUpdate {
        let rate = self.window.rate().unwrap_or(self.a_target);
        let old_phi = self.phi;
        if rate > self.a_target {
            self.phi *= self.gamma;
        } else if rate < self.a_target {
            self.phi /= self.gamma;
        }
        self.window.reset();
        self.updates += 1;

        info!(
            acceptance_rate = rate,
            old_phi,
            new_phi = self.phi,
            "Super-iteration finished; phi rescaled."
        );
        PhiUpdate {
            acceptance_rate: rate,
            old_phi,
            new_phi: self.phi,
        }
    }

    /// Reinstates a persisted phi, the number of rescales already done and the outcomes
    /// of an unfinished super-iteration.
    pub fn restore(&mut self, phi: f64, outcomes: impl IntoIterator<Item = bool>, updates: usize) {
        self.phi = phi;
        self.updates = updates;
        self.window.reset();
        for accepted in outcomes {
            self.window.push(accepted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> PhiController {
        PhiController::new(
            &PhiConfig {
                phi: 1.0,
                gamma: 2.0,
                a_target: 0.25,
            },
            100,
        )
    }

    fn fill(controller: &mut PhiController, accepted: usize) {
        for i in 0..100 {
            controller.record(i < accepted);
        }
    }

    #[test]
    fn high_acceptance_multiplies_phi_by_gamma() {
        let mut c = controller();
        fill(&mut c, 40);
        let update = c.rescale();
        assert_eq!(update.acceptance_rate, 0.40);
        assert_eq!(c.phi(), 2.0);
        assert!(c.window().is_empty());
    }

    #[test]
    fn low_acceptance_divides_phi_by_gamma() {
        let mut c = controller();
        fill(&mut c, 10);
        c.rescale();
        assert_eq!(c.phi(), 0.5);
    }

    #[test]
    fn on_target_acceptance_leaves_phi_unchanged() {
        let mut c = controller();
        fill(&mut c, 25);
        let update = c.rescale();
        assert_eq!(update.acceptance_rate, 0.25);
        assert_eq!(c.phi(), 1.0);
        assert_eq!(c.updates(), 1);
    }

    #[test]
    fn window_keeps_only_the_last_outcomes() {
        let mut window = AcceptanceWindow::new(3);
        for accepted in [true, true, false, false, false] {
            window.push(accepted);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.rate(), Some(0.0));
        window.reset();
        assert_eq!(window.rate(), None);
    }

    #[test]
    fn restore_reinstates_phi_and_partial_window() {
        let mut c = controller();
        c.restore(4.0, [true, false, false, false], 7);
        assert_eq!(c.phi(), 4.0);
        assert_eq!(c.updates(), 7);
        assert_eq!(c.window().rate(), Some(0.25));
    }
}
