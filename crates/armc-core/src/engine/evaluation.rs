use super::aux_error::{AuxErrorEvaluator, ComparisonError};
use super::config::MoleculeReduction;
use super::error::EngineError;
use crate::core::descriptors::{Descriptor, DescriptorFn, DescriptorRegistry, DescriptorSpec};
use crate::core::models::trajectory::Trajectory;
use crate::core::params::set::ParameterSet;
use futures_util::future::join_all;
use itertools::Itertools;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Why a trial state could not be scored. Never aborts a run: the trial is rejected instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Simulation of molecule {molecule} failed: {reason}")]
    Simulation { molecule: usize, reason: String },
    #[error("Simulation of molecule {molecule} timed out after {seconds:.1} s")]
    Timeout { molecule: usize, seconds: f64 },
    #[error("Descriptor '{name}' failed for molecule {molecule}: {reason}")]
    Descriptor {
        name: String,
        molecule: usize,
        reason: String,
    },
    #[error("Descriptor comparison failed: {0}")]
    Comparison(#[from] ComparisonError),
}

/// One simulation job: a parameter snapshot to be run for one reference molecule.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: u64,
    pub molecule: usize,
    pub params: Arc<ParameterSet>,
}

/// The external simulation pipeline.
///
/// Implementations must be idempotent: the same snapshot always yields the same trajectory.
pub trait SimulationRunner: Send + Sync {
    fn run(
        &self,
        request: &JobRequest,
    ) -> impl Future<Output = Result<Trajectory, EvaluationError>> + Send;
}

/// The scored result of one parameter snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Combined, unbiased auxiliary error.
    pub aux_error: f64,
    pub molecule_errors: Vec<f64>,
    /// `descriptors[molecule][descriptor]`; empty for evaluations restored from history.
    pub descriptors: Vec<Vec<Descriptor>>,
}

impl Evaluation {
    /// An evaluation known only by its error, as recovered from a persisted history.
    pub fn restored(aux_error: f64) -> Self {
        Self {
            aux_error,
            molecule_errors: Vec::new(),
            descriptors: Vec::new(),
        }
    }
}

/// Runs the simulation pipeline for every reference molecule and scores the result.
pub struct Evaluator<R> {
    runner: R,
    specs: Vec<(DescriptorSpec, DescriptorFn)>,
    comparison: AuxErrorEvaluator,
    timeout: Option<Duration>,
}

impl<R: SimulationRunner> Evaluator<R> {
    /// Resolves every descriptor against `registry` and computes the reference descriptors once.
    #[instrument(skip_all, name = "evaluator_setup", fields(molecules = references.len()))]
    pub fn new(
        runner: R,
        registry: &DescriptorRegistry,
        specs: Vec<DescriptorSpec>,
        references: &[Trajectory],
        reduction: MoleculeReduction,
        timeout: Option<Duration>,
    ) -> Result<Self, EngineError> {
        if references.is_empty() {
            return Err(EngineError::Configuration(
                "at least one reference molecule is required".to_string(),
            ));
        }
        if specs.is_empty() {
            return Err(EngineError::Configuration(
                "at least one descriptor must be configured in the 'pes' block".to_string(),
            ));
        }

        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            spec.check_molecule_count(references.len())?;
            let func = registry.resolve(&spec.func)?;
            resolved.push((spec, func));
        }

        let reference_descriptors = compute_descriptors(&resolved, references).map_err(|e| {
            EngineError::Configuration(format!("reference descriptor failed: {}", e))
        })?;
        let names = resolved.iter().map(|(spec, _)| spec.name.clone()).collect();
        let comparison = AuxErrorEvaluator::new(names, reference_descriptors, reduction)
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        info!(
            descriptors = resolved.len(),
            "Reference descriptors computed."
        );
        Ok(Self {
            runner,
            specs: resolved,
            comparison,
            timeout,
        })
    }

    pub fn n_molecules(&self) -> usize {
        self.comparison.n_molecules()
    }

    pub fn reference(&self, molecule: usize, name: &str) -> Option<&Descriptor> {
        self.comparison.reference(molecule, name)
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Simulates every molecule concurrently, then computes and scores their descriptors.
    #[instrument(level = "debug", skip_all, fields(job_id = job_id))]
    pub async fn evaluate(
        &self,
        params: Arc<ParameterSet>,
        job_id: u64,
    ) -> Result<Evaluation, EvaluationError> {
        let jobs = (0..self.n_molecules()).map(|molecule| {
            let request = JobRequest {
                job_id,
                molecule,
                params: Arc::clone(&params),
            };
            async move { self.run_one(request).await }
        });
        let trajectories = join_all(jobs)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let descriptors = compute_descriptors(&self.specs, &trajectories)?;
        let (aux_error, molecule_errors) = self.comparison.evaluate(&descriptors)?;
        debug!(aux_error, "Trial state evaluated.");
        Ok(Evaluation {
            aux_error,
            molecule_errors,
            descriptors,
        })
    }

    async fn run_one(&self, request: JobRequest) -> Result<Trajectory, EvaluationError> {
        let trajectory = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.runner.run(&request))
                .await
                .map_err(|_| EvaluationError::Timeout {
                    molecule: request.molecule,
                    seconds: limit.as_secs_f64(),
                })??,
            None => self.runner.run(&request).await?,
        };
        trajectory
            .validate()
            .map_err(|e| EvaluationError::Simulation {
                molecule: request.molecule,
                reason: e.to_string(),
            })?;
        Ok(trajectory)
    }
}

/// Computes `descriptors[molecule][descriptor]`; the pairs are independent and run in parallel.
fn compute_descriptors(
    specs: &[(DescriptorSpec, DescriptorFn)],
    trajectories: &[Trajectory],
) -> Result<Vec<Vec<Descriptor>>, EvaluationError> {
    let pairs: Vec<(usize, usize)> = (0..trajectories.len())
        .cartesian_product(0..specs.len())
        .collect();

    let compute = |&(m, d): &(usize, usize)| {
        let (spec, func) = &specs[d];
        func(&trajectories[m], &spec.args_for(m)).map_err(|e| EvaluationError::Descriptor {
            name: spec.name.clone(),
            molecule: m,
            reason: e.to_string(),
        })
    };

    #[cfg(feature = "parallel")]
    let flat = pairs.par_iter().map(compute).collect::<Result<Vec<_>, _>>()?;
    #[cfg(not(feature = "parallel"))]
    let flat = pairs.iter().map(compute).collect::<Result<Vec<_>, _>>()?;

    let mut flat = flat.into_iter();
    Ok((0..trajectories.len())
        .map(|_| flat.by_ref().take(specs.len()).collect())
        .collect())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic runners shared by engine and workflow tests.

    use super::*;
    use crate::core::descriptors::{DescriptorArgs, DescriptorError};
    use crate::core::models::trajectory::TrajectoryError;
    use crate::core::params::set::GroupMeta;
    use nalgebra::Point3;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Encodes the parameter values as x-coordinates of a one-frame trajectory.
    pub struct FakeRunner {
        pub calls: AtomicUsize,
        /// Job id of every request, in call order.
        pub job_ids: Mutex<Vec<u64>>,
        /// Fails every job whose rounded first parameter value is in this set.
        pub fail_values: Mutex<HashSet<u64>>,
        pub fail_all: bool,
        pub delay: Option<Duration>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                job_ids: Mutex::new(Vec::new()),
                fail_values: Mutex::new(HashSet::new()),
                fail_all: false,
                delay: None,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SimulationRunner for FakeRunner {
        async fn run(&self, request: &JobRequest) -> Result<Trajectory, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.job_ids.lock().unwrap().push(request.job_id);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let values = request.params.values();
            let key = (values[0] * 1e6).round() as u64;
            if self.fail_all || self.fail_values.lock().unwrap().contains(&key) {
                return Err(EvaluationError::Simulation {
                    molecule: request.molecule,
                    reason: "injected failure".into(),
                });
            }
            let frame = values
                .iter()
                .map(|v| Point3::new(*v, request.molecule as f64, 0.0))
                .collect();
            let symbols = (0..values.len()).map(|i| format!("X{}", i)).collect();
            Trajectory::new(symbols, vec![frame]).map_err(|e| EvaluationError::Simulation {
                molecule: request.molecule,
                reason: e.to_string(),
            })
        }
    }

    /// One column per atom holding its x-coordinate.
    pub fn positions(traj: &Trajectory, _: &DescriptorArgs) -> Result<Descriptor, DescriptorError> {
        let frame = traj
            .frame(0)
            .ok_or(DescriptorError::Trajectory(TrajectoryError::NoFrames))?;
        Descriptor::from_rows(
            vec![0.0],
            traj.symbols().to_vec(),
            &[frame.iter().map(|p| p.x).collect()],
        )
    }

    pub fn registry() -> DescriptorRegistry {
        let mut registry = DescriptorRegistry::new();
        registry.register("positions", positions);
        registry
    }

    pub fn spec() -> DescriptorSpec {
        DescriptorSpec {
            name: "positions".into(),
            func: "positions".into(),
            args: vec![],
            kwargs: vec![],
        }
    }

    /// A reference trajectory whose descriptor is minimized at `target`.
    pub fn reference(target: &[f64]) -> Trajectory {
        let frame = target.iter().map(|v| Point3::new(*v, 0.0, 0.0)).collect();
        let symbols = (0..target.len()).map(|i| format!("X{}", i)).collect();
        Trajectory::new(symbols, vec![frame]).unwrap()
    }

    pub fn charges(values: &[(&str, f64)], constraints: &[&str]) -> ParameterSet {
        let mut builder = ParameterSet::builder()
            .group(GroupMeta::new("charge"))
            .unwrap();
        for (key, value) in values {
            builder = builder.parameter("charge", key, *value, false).unwrap();
        }
        for expr in constraints {
            builder = builder.constraint("charge", expr).unwrap();
        }
        builder.build().unwrap()
    }
}
