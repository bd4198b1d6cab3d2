use crate::cli::Cli;
use crate::config::{FileConfig, build_config, build_parameter_set};
use crate::error::{CliError, Result};
use crate::runner::{ProcessRunner, external};
use crate::ui::{CliProgressHandler, UiEvent};
use armc::core::descriptors::DescriptorRegistry;
use armc::core::io::traits::TrajectoryFile;
use armc::core::io::xyz::XyzFile;
use armc::core::params::set::ParameterSet;
use armc::engine::evaluation::Evaluator;
use armc::engine::orchestrator::ArmcSummary;
use armc::engine::progress::ProgressReporter;
use armc::workflows;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

pub async fn run(args: &Cli, ui_sender: mpsc::Sender<UiEvent>) -> Result<()> {
    let file_config = FileConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let app = build_config(args, file_config)?;

    let mut references = Vec::with_capacity(app.molecules.len());
    for path in &app.molecules {
        info!("Loading reference trajectory from {:?}", path);
        let trajectory = XyzFile::read_from_path(path).map_err(|e| CliError::FileParsing {
            path: path.clone(),
            source: e.into(),
        })?;
        references.push(trajectory);
    }

    let mut registry = DescriptorRegistry::new();
    registry.register(external::NAME, external::external);

    let evaluator = Evaluator::new(
        ProcessRunner::new(app.job.clone()),
        &registry,
        app.descriptors.clone(),
        &references,
        app.armc.evaluation.molecule_reduction,
        app.armc.evaluation.timeout,
    )?;
    let params = build_parameter_set(&app.params, |name| evaluator.reference(0, name))?;
    info!(
        parameters = params.len(),
        free = params.free_indices().len(),
        "Parameter set assembled."
    );

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Starting ARMC: {} iterations, {} per super-iteration.",
        app.armc.monte_carlo.iter_len, app.armc.monte_carlo.sub_iter_len
    );
    let summary =
        workflows::armc::run(&app.armc, &evaluator, params, args.restart, &reporter).await?;

    print_summary(&summary);
    let best_path = best_params_path(&summary.history_path);
    write_best(&summary, &best_path)?;
    println!("✓ Best parameters written to: {}", best_path.display());
    Ok(())
}

fn print_summary(summary: &ArmcSummary) {
    let stats = &summary.stats;
    println!();
    println!("{:<22}{}", "Iterations recorded", summary.iterations);
    println!("{:<22}{}", "Accepted moves", stats.acceptances);
    println!("{:<22}{}", "Simulations run", stats.evaluations);
    println!("{:<22}{}", "Cache hits", stats.cache_hits);
    println!("{:<22}{}", "Failed evaluations", stats.failures);
    println!("{:<22}{}", "Phi updates", summary.phi_updates);
    println!("{:<22}{:.6e}", "Final phi", summary.final_phi);
    println!("{:<22}{:.6}", "Final error", summary.current.aux_error);
    match summary.best.iteration {
        Some(i) => println!("{:<22}{:.6} (iteration {})", "Best error", summary.best.aux_error, i),
        None => println!("{:<22}{:.6} (initial state)", "Best error", summary.best.aux_error),
    }
    println!("{:<22}{}", "History", summary.history_path.display());
}

/// `armc.hdf5` -> `armc.hdf5.best.toml`
fn best_params_path(history: &Path) -> PathBuf {
    let mut name = history.as_os_str().to_owned();
    name.push(".best.toml");
    PathBuf::from(name)
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct BestFile {
    aux_error: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    iteration: Option<usize>,
    param: BTreeMap<String, BestGroup>,
}

#[derive(Serialize)]
struct BestGroup {
    values: BTreeMap<String, f64>,
}

fn best_file(aux_error: f64, iteration: Option<usize>, params: &ParameterSet) -> BestFile {
    let mut param: BTreeMap<String, BestGroup> = BTreeMap::new();
    for p in params.iter() {
        param
            .entry(p.id.group.clone())
            .or_insert_with(|| BestGroup {
                values: BTreeMap::new(),
            })
            .values
            .insert(p.id.key.to_string(), p.value);
    }
    BestFile {
        aux_error,
        iteration,
        param,
    }
}

fn write_best(summary: &ArmcSummary, path: &Path) -> Result<()> {
    let best = &summary.best;
    let content = toml::to_string(&best_file(best.aux_error, best.iteration, &best.params))
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to serialize best parameters: {}", e)))?;
    std::fs::write(path, content)?;
    info!("Best parameters written to {:?}", path);
    Ok(())
}
