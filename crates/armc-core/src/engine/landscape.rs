use super::cache::Fingerprint;
use std::collections::HashMap;

/// Accumulated phi bias per visited state, kept apart from the cached base errors.
///
/// The error a state is compared with is `base + bias(fingerprint)`.
#[derive(Debug, Default, Clone)]
pub struct BiasOverlay {
    bias: HashMap<Fingerprint, f64>,
}

impl BiasOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `phi` to the bias of `fingerprint` and returns the new total bias.
    pub fn apply(&mut self, fingerprint: &Fingerprint, phi: f64) -> f64 {
        let entry = self.bias.entry(fingerprint.clone()).or_insert(0.0);
        *entry += phi;
        *entry
    }

    pub fn bias(&self, fingerprint: &Fingerprint) -> f64 {
        self.bias.get(fingerprint).copied().unwrap_or(0.0)
    }

    pub fn biased(&self, fingerprint: &Fingerprint, base: f64) -> f64 {
        base + self.bias(fingerprint)
    }

    /// Number of states that have received a bias.
    pub fn len(&self) -> usize {
        self.bias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bias.is_empty()
    }
}
