use super::evaluation::{Evaluation, EvaluationError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::trace;

/// Exact-equality key of a parameter snapshot: the bit patterns of every value, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Box<[u64]>);

impl Fingerprint {
    pub fn of(values: &[f64]) -> Self {
        // -0.0 and 0.0 describe the same parameter value
        Self(
            values
                .iter()
                .map(|v| if *v == 0.0 { 0f64.to_bits() } else { v.to_bits() })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub type Outcome = Result<Arc<Evaluation>, EvaluationError>;

/// Memoized evaluations keyed by [`Fingerprint`]. Entries are never evicted during a run.
///
/// Concurrent requests for a fingerprint that is still being computed wait for that computation
/// instead of starting their own.
#[derive(Debug, Default)]
pub struct PesCache {
    cells: Mutex<HashMap<Fingerprint, Arc<OnceCell<Outcome>>>>,
    computed: AtomicU64,
    hits: AtomicU64,
}

impl PesCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, fingerprint: &Fingerprint) -> Arc<OnceCell<Outcome>> {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.entry(fingerprint.clone()).or_default().clone()
    }

    /// Returns the finished outcome for `fingerprint`, if any.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Outcome> {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.get(fingerprint).and_then(|cell| cell.get().cloned())
    }

    /// Stores an outcome computed elsewhere. Returns `false` if one was already present.
    pub fn store(&self, fingerprint: &Fingerprint, outcome: Outcome) -> bool {
        self.cell(fingerprint).set(outcome).is_ok()
    }

    /// Returns the cached outcome or runs `compute` exactly once for this fingerprint.
    ///
    /// The boolean is `true` when this call performed the computation.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &Fingerprint, compute: F) -> (Outcome, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let cell = self.cell(fingerprint);
        let mut computed_here = false;
        let flag = &mut computed_here;
        let outcome = cell
            .get_or_init(|| async move {
                *flag = true;
                compute().await
            })
            .await
            .clone();

        if computed_here {
            self.computed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("PES cache hit.");
        }
        (outcome, computed_here)
    }

    /// Number of evaluations actually performed through [`PesCache::get_or_compute`].
    pub fn computed(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn evaluation(err: f64) -> Outcome {
        Ok(Arc::new(Evaluation::restored(err)))
    }

    #[test]
    fn fingerprint_uses_exact_values() {
        assert_eq!(Fingerprint::of(&[1.0, 2.0]), Fingerprint::of(&[1.0, 2.0]));
        assert_ne!(
            Fingerprint::of(&[1.0, 2.0]),
            Fingerprint::of(&[1.0, 2.0 + f64::EPSILON * 2.0])
        );
        assert_eq!(Fingerprint::of(&[-0.0]), Fingerprint::of(&[0.0]));
    }

    #[tokio::test]
    async fn repeated_fingerprint_is_computed_once() {
        let cache = PesCache::new();
        let fp = Fingerprint::of(&[0.5]);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let (outcome, _) = cache
                .get_or_compute(&fp, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    evaluation(0.25)
                })
                .await;
            assert_eq!(outcome.unwrap().aux_error, 0.25);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.computed(), 1);
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_computation() {
        let cache = Arc::new(PesCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::of(&[1.0, -1.0]);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let fp = fp.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute(&fp, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            evaluation(0.1)
                        })
                        .await
                })
            })
            .collect();

        let mut fresh = 0;
        for task in tasks {
            let (outcome, computed) = task.await.unwrap();
            assert_eq!(outcome.unwrap().aux_error, 0.1);
            fresh += usize::from(computed);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn failures_are_cached_like_results() {
        let cache = PesCache::new();
        let fp = Fingerprint::of(&[3.0]);
        let failure = EvaluationError::Simulation {
            molecule: 0,
            reason: "crashed".into(),
        };
        let (first, _) = cache
            .get_or_compute(&fp, || async { Err(failure.clone()) })
            .await;
        assert_eq!(first.unwrap_err(), failure);
        assert!(matches!(cache.lookup(&fp), Some(Err(_))));
    }

    #[test]
    fn stored_outcomes_are_visible_to_lookup() {
        let cache = PesCache::new();
        let fp = Fingerprint::of(&[2.0]);
        assert!(cache.lookup(&fp).is_none());
        assert!(cache.store(&fp, evaluation(0.3)));
        assert!(!cache.store(&fp, evaluation(0.9)));
        assert_eq!(cache.lookup(&fp).unwrap().unwrap().aux_error, 0.3);
    }
}
