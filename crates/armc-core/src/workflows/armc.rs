use crate::core::params::set::ParameterSet;
use crate::engine::config::ArmcConfig;
use crate::engine::error::EngineError;
use crate::engine::evaluation::{Evaluator, SimulationRunner};
use crate::engine::orchestrator::{Armc, ArmcSummary};
use crate::engine::progress::{Progress, ProgressReporter};
use tracing::{info, instrument, warn};

/// Runs the chain until `iter_len` iterations are recorded.
///
/// With `restart` set, the chain continues from the history at `config.history_path`; otherwise
/// any existing history there is replaced.
#[instrument(skip_all, name = "armc_workflow", fields(restart = restart))]
pub async fn run<R: SimulationRunner>(
    config: &ArmcConfig,
    evaluator: &Evaluator<R>,
    initial: ParameterSet,
    restart: bool,
    reporter: &ProgressReporter<'_>,
) -> Result<ArmcSummary, EngineError> {
    // === Phase 1: Initial state ===
    reporter.report(Progress::PhaseStart {
        name: if restart {
            "Restoring History"
        } else {
            "Initial Evaluation"
        },
    });
    let mut armc = if restart {
        Armc::resume(config, evaluator, initial, reporter).await?
    } else {
        Armc::start(config, evaluator, initial, reporter).await?
    };
    reporter.report(Progress::PhaseFinish);
    reporter.report(Progress::Message(if restart {
        format!(
            "resumed at iteration {} with error {:.4e}, phi {:.3e}",
            armc.iteration(),
            armc.current().aux_error,
            armc.phi()
        )
    } else {
        format!("initial error {:.4e}", armc.current().aux_error)
    }));

    // === Phase 2: Monte Carlo ===
    let remaining = config
        .monte_carlo
        .iter_len
        .saturating_sub(armc.iteration());
    info!(
        start = armc.iteration(),
        remaining,
        phi = armc.phi(),
        "Starting Monte Carlo iterations."
    );
    reporter.report(Progress::PhaseStart {
        name: "Monte Carlo",
    });
    reporter.report(Progress::TaskStart {
        total_steps: remaining as u64,
    });

    let outcome = drive(&mut armc, reporter).await;

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    if let Err(e) = outcome {
        if let Err(flush_err) = armc.flush() {
            warn!(error = %flush_err, "Could not persist history after a fatal error.");
        }
        return Err(e);
    }

    // === Phase 3: Final flush and summary ===
    let summary = armc.finish()?;
    info!(
        iterations = summary.iterations,
        best_error = summary.best.aux_error,
        "Workflow complete."
    );
    Ok(summary)
}

async fn drive<R: SimulationRunner>(
    armc: &mut Armc<'_, R>,
    reporter: &ProgressReporter<'_>,
) -> Result<(), EngineError> {
    while let Some(report) = armc.step().await? {
        reporter.report(Progress::StatusUpdate {
            text: format!(
                "err {:.4e} | best {:.4e} | phi {:.3e}",
                report.current_error,
                armc.best().aux_error,
                armc.phi()
            ),
        });
    }
    Ok(())
}
