use super::cache::{Fingerprint, PesCache};
use super::config::ArmcConfig;
use super::context::{RunContext, RunStats};
use super::error::EngineError;
use super::evaluation::{Evaluation, Evaluator, SimulationRunner};
use super::history::{HistoryError, HistoryMeta, HistoryRecord, HistoryStore};
use super::landscape::BiasOverlay;
use super::moves::MoveGenerator;
use super::phi::{PhiController, PhiUpdate};
use super::progress::{Progress, ProgressReporter};
use super::state::{BestState, State, accepts};
use super::utils::sampling::iteration_rng;
use crate::core::params::set::ParameterSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where the chain is within the current iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Proposing,
    Evaluating,
    Deciding,
    Recording,
    Done,
}

/// What happened during one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub iteration: usize,
    pub accepted: bool,
    /// The trial could not be evaluated and was rejected with the failure penalty.
    pub failed: bool,
    pub cache_hit: bool,
    pub trial_error: f64,
    pub current_error: f64,
    pub phi_update: Option<PhiUpdate>,
}

#[derive(Debug, Clone)]
pub struct ArmcSummary {
    /// Iterations recorded in the history, including those of a resumed run.
    pub iterations: usize,
    pub stats: RunStats,
    pub phi_updates: usize,
    pub final_phi: f64,
    pub current: State,
    pub best: BestState,
    pub history_path: PathBuf,
}

/// The ARMC chain: a single sequential state machine over proposals, evaluations and decisions.
pub struct Armc<'a, R: SimulationRunner> {
    config: &'a ArmcConfig,
    evaluator: &'a Evaluator<R>,
    moves: MoveGenerator,
    cache: PesCache,
    landscape: BiasOverlay,
    phi: PhiController,
    history: HistoryStore,
    current: State,
    best: BestState,
    iteration: usize,
    phase: Phase,
    ctx: RunContext<'a>,
}

impl<'a, R: SimulationRunner> Armc<'a, R> {
    /// Evaluates `initial` and prepares a fresh chain. A failed initial evaluation is fatal.
    #[instrument(skip_all, name = "armc_start")]
    pub async fn start(
        config: &'a ArmcConfig,
        evaluator: &'a Evaluator<R>,
        initial: ParameterSet,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, EngineError> {
        let moves = MoveGenerator::new(config.moves.clone())?;
        let mut ctx = RunContext::new(reporter);
        let cache = PesCache::new();

        let fingerprint = Fingerprint::of(&initial.values());
        let job_id = ctx.next_job_id();
        let snapshot = Arc::new(initial.clone());
        let (outcome, _) = cache
            .get_or_compute(&fingerprint, || async move {
                evaluator.evaluate(snapshot, job_id).await.map(Arc::new)
            })
            .await;
        let evaluation = outcome.map_err(EngineError::InitialEvaluation)?;

        let current = State {
            params: initial,
            fingerprint,
            aux_error: evaluation.aux_error,
        };
        let mut landscape = BiasOverlay::new();
        landscape.apply(&current.fingerprint, config.phi.phi);

        let history = HistoryStore::create(
            &config.history_path,
            HistoryMeta {
                seed: config.monte_carlo.seed,
                sub_iter_len: config.monte_carlo.sub_iter_len,
                iter_len: config.monte_carlo.iter_len,
                columns: current.params.column_names(),
            },
        );
        info!(
            aux_error = current.aux_error,
            parameters = current.params.len(),
            "Initial state evaluated."
        );

        Ok(Self {
            config,
            evaluator,
            moves,
            cache,
            landscape,
            phi: PhiController::new(&config.phi, config.monte_carlo.sub_iter_len),
            best: BestState::from_state(&current, None),
            history,
            current,
            iteration: 0,
            phase: Phase::Idle,
            ctx,
        })
    }

    /// Rebuilds the chain from a persisted history so that it continues exactly where it
    /// stopped. `template` is the configured initial parameter set.
    #[instrument(skip_all, name = "armc_resume")]
    pub async fn resume(
        config: &'a ArmcConfig,
        evaluator: &'a Evaluator<R>,
        template: ParameterSet,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, EngineError> {
        let (meta, records) = match HistoryStore::load(&config.history_path) {
            Ok(loaded) => loaded,
            Err(HistoryError::Malformed { path, row, reason }) => {
                return Err(EngineError::RestartMismatch(format!(
                    "'{}' row {}: {}",
                    path, row, reason
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let mc = &config.monte_carlo;
        check_identity(&meta, config, &template)?;

        let Some(last) = records.last().cloned() else {
            info!("History is empty; starting a fresh run.");
            return Self::start(config, evaluator, template, reporter).await;
        };
        for (i, record) in records.iter().enumerate() {
            if record.iteration != i || record.super_iteration != i / mc.sub_iter_len {
                return Err(EngineError::RestartMismatch(format!(
                    "row {} is labelled iteration {} (super-iteration {})",
                    i + 1,
                    record.iteration,
                    record.super_iteration
                )));
            }
        }
        if records.len() > mc.iter_len {
            return Err(EngineError::RestartMismatch(format!(
                "history holds {} iterations but iter-len is {}",
                records.len(),
                mc.iter_len
            )));
        }

        let cache = PesCache::new();
        let mut landscape = BiasOverlay::new();
        landscape.apply(&Fingerprint::of(&template.values()), config.phi.phi);
        let mut best: Option<BestState> = None;
        for record in &records {
            let fingerprint = Fingerprint::of(&record.params);
            landscape.apply(&fingerprint, record.phi);
            cache.store(
                &fingerprint,
                Ok(Arc::new(Evaluation::restored(record.aux_error))),
            );
            if best.as_ref().is_none_or(|b| record.aux_error < b.aux_error) {
                let mut params = template.clone();
                params.assign_values(&record.params)?;
                best = Some(BestState {
                    iteration: Some(record.iteration),
                    aux_error: record.aux_error,
                    params,
                });
            }
        }

        let mut params = template;
        params.assign_values(&last.params)?;
        let current = State::new(params, last.aux_error);

        let mut phi = PhiController::new(&config.phi, mc.sub_iter_len);
        let window = records
            .iter()
            .filter(|r| r.super_iteration == last.super_iteration)
            .map(|r| r.accepted);
        phi.restore(last.phi, window, last.super_iteration);
        if last.iteration % mc.sub_iter_len == mc.sub_iter_len - 1 {
            phi.rescale();
        }

        let iteration = last.iteration + 1;
        info!(
            iteration,
            phi = phi.phi(),
            aux_error = current.aux_error,
            "Resuming from history."
        );

        let best = best.unwrap_or_else(|| BestState::from_state(&current, None));
        Ok(Self {
            config,
            evaluator,
            moves: MoveGenerator::new(config.moves.clone())?,
            cache,
            landscape,
            phi,
            history: HistoryStore::resume(&config.history_path, meta, records),
            current,
            best,
            iteration,
            phase: if iteration >= mc.iter_len {
                Phase::Done
            } else {
                Phase::Idle
            },
            // A run uses at most one job id per iteration plus one for the initial state.
            ctx: RunContext::starting_at(reporter, iteration as u64 + 1),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Index of the next iteration to run.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn phi(&self) -> f64 {
        self.phi.phi()
    }

    pub fn current(&self) -> &State {
        &self.current
    }

    pub fn best(&self) -> &BestState {
        &self.best
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn landscape(&self) -> &BiasOverlay {
        &self.landscape
    }

    pub fn cache(&self) -> &PesCache {
        &self.cache
    }

    pub fn is_done(&self) -> bool {
        self.iteration >= self.config.monte_carlo.iter_len
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            evaluations: self.cache.computed(),
            cache_hits: self.cache.hits(),
            ..self.ctx.stats
        }
    }

    /// Runs one full iteration. Returns `None` once the chain is done.
    pub async fn step(&mut self) -> Result<Option<StepReport>, EngineError> {
        if self.is_done() {
            self.phase = Phase::Done;
            return Ok(None);
        }
        let config = self.config;
        let evaluator = self.evaluator;
        let omega = config.monte_carlo.sub_iter_len;
        let i = self.iteration;
        let phi = self.phi.phi();

        self.phase = Phase::Proposing;
        let mut rng = iteration_rng(config.monte_carlo.seed, i);
        let (trial, mv) = self.moves.propose(&self.current.params, &mut rng)?;
        debug!(
            iteration = i,
            parameter = %self.current.params.column_names()[mv.index],
            step = mv.step,
            attempts = mv.attempts,
            "Proposed move."
        );

        self.phase = Phase::Evaluating;
        let fingerprint = Fingerprint::of(&trial.values());
        let snapshot = Arc::new(trial);
        let request = Arc::clone(&snapshot);
        let ctx = &mut self.ctx;
        let (outcome, computed) = self
            .cache
            .get_or_compute(&fingerprint, || {
                let job_id = ctx.next_job_id();
                async move { evaluator.evaluate(request, job_id).await.map(Arc::new) }
            })
            .await;
        let (trial_error, failed) = match &outcome {
            Ok(evaluation) => (evaluation.aux_error, false),
            Err(err) => {
                warn!(iteration = i, error = %err, "Trial evaluation failed; rejecting trial.");
                self.ctx.stats.failures += 1;
                (config.evaluation.failure_penalty, true)
            }
        };

        self.phase = Phase::Deciding;
        let current_biased = self
            .landscape
            .biased(&self.current.fingerprint, self.current.aux_error);
        let trial_biased = self.landscape.biased(&fingerprint, trial_error);
        let accepted = !failed && accepts(current_biased, trial_biased);

        self.phase = Phase::Recording;
        if accepted {
            let params = Arc::try_unwrap(snapshot).unwrap_or_else(|shared| (*shared).clone());
            self.current = State {
                params,
                fingerprint,
                aux_error: trial_error,
            };
            self.best.offer(&self.current, i);
            self.ctx.stats.acceptances += 1;
        }
        self.landscape.apply(&self.current.fingerprint, phi);
        self.phi.record(accepted);
        self.history.append(HistoryRecord {
            iteration: i,
            super_iteration: i / omega,
            accepted,
            aux_error: self.current.aux_error,
            trial_error,
            phi,
            params: self.current.params.values(),
        });
        self.ctx.stats.iterations += 1;
        self.iteration += 1;

        let phi_update = (i % omega == omega - 1).then(|| {
            let update = self.phi.rescale();
            self.ctx.report(Progress::SuperIteration {
                index: i / omega,
                total: config.monte_carlo.super_iter_len(),
                acceptance_rate: update.acceptance_rate,
                phi: update.new_phi,
            });
            update
        });

        if self.iteration % config.monte_carlo.flush_interval == 0 {
            if let Err(e) = self.history.flush() {
                warn!(error = %e, pending = self.history.pending(), "History flush failed; will retry.");
            }
        }

        self.ctx.report(Progress::TaskIncrement);
        self.phase = if self.is_done() {
            Phase::Done
        } else {
            Phase::Idle
        };
        Ok(Some(StepReport {
            iteration: i,
            accepted,
            failed,
            cache_hit: !computed,
            trial_error,
            current_error: self.current.aux_error,
            phi_update,
        }))
    }

    /// Steps until iteration `stop` (capped at `iter_len`) has been recorded.
    pub async fn run_until(&mut self, stop: usize) -> Result<(), EngineError> {
        let stop = stop.min(self.config.monte_carlo.iter_len);
        while self.iteration < stop {
            self.step().await?;
        }
        Ok(())
    }

    /// Persists pending history rows.
    pub fn flush(&mut self) -> Result<usize, EngineError> {
        Ok(self.history.flush()?)
    }

    /// Performs the final flush and summarizes the run. A failing final flush is an error.
    pub fn finish(mut self) -> Result<ArmcSummary, EngineError> {
        self.history.flush()?;
        let stats = self.stats();
        info!(
            iterations = self.history.len(),
            acceptances = stats.acceptances,
            evaluations = stats.evaluations,
            cache_hits = stats.cache_hits,
            failures = stats.failures,
            best_error = self.best.aux_error,
            "ARMC run finished."
        );
        Ok(ArmcSummary {
            iterations: self.history.len(),
            stats,
            phi_updates: self.phi.updates(),
            final_phi: self.phi.phi(),
            current: self.current,
            best: self.best,
            history_path: self.config.history_path.clone(),
        })
    }
}

fn check_identity(
    meta: &HistoryMeta,
    config: &ArmcConfig,
    template: &ParameterSet,
) -> Result<(), EngineError> {
    let mc = &config.monte_carlo;
    if meta.seed != mc.seed {
        return Err(EngineError::RestartMismatch(format!(
            "history was written with seed {}, configuration uses {}",
            meta.seed, mc.seed
        )));
    }
    if meta.sub_iter_len != mc.sub_iter_len {
        return Err(EngineError::RestartMismatch(format!(
            "history was written with sub-iter-len {}, configuration uses {}",
            meta.sub_iter_len, mc.sub_iter_len
        )));
    }
    let columns = template.column_names();
    if meta.columns != columns {
        return Err(EngineError::RestartMismatch(format!(
            "history parameters [{}] differ from configured parameters [{}]",
            meta.columns.join(", "),
            columns.join(", ")
        )));
    }
    Ok(())
}
