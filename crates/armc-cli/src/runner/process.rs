use crate::config::models::JobConfig;
use armc::core::io::traits::TrajectoryFile;
use armc::core::io::xyz::XyzFile;
use armc::core::models::trajectory::Trajectory;
use armc::core::params::set::ParameterSet;
use armc::engine::evaluation::{EvaluationError, JobRequest, SimulationRunner};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// File written into every job directory; the job command reads its inputs from here.
pub const PARAMS_FILE: &str = "armc_params.toml";

const STDERR_TAIL: usize = 400;

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "kebab-case")]
struct GroupSnapshot {
    keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    values: BTreeMap<String, f64>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "kebab-case")]
struct JobSnapshot<'a> {
    job_id: u64,
    molecule: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a Path>,
    param: BTreeMap<String, GroupSnapshot>,
    psf: &'a toml::Table,
    settings: &'a toml::Table,
}

fn group_snapshots(params: &ParameterSet) -> BTreeMap<String, GroupSnapshot> {
    let mut groups: BTreeMap<String, GroupSnapshot> = BTreeMap::new();
    for (idx, param) in params.iter().enumerate() {
        let meta = params.group_of(idx);
        groups
            .entry(meta.name.clone())
            .or_insert_with(|| GroupSnapshot {
                keys: meta.keys.clone(),
                unit: meta.unit.clone(),
                values: BTreeMap::new(),
            })
            .values
            .insert(param.id.key.to_string(), param.value);
    }
    groups
}

/// Runs one external command per job in its own directory and reads back an XYZ trajectory.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    job: JobConfig,
}

impl ProcessRunner {
    pub fn new(job: JobConfig) -> Self {
        Self { job }
    }

    pub fn job_dir(&self, request: &JobRequest) -> PathBuf {
        self.job
            .workdir
            .join(format!("job_{:06}_mol{}", request.job_id, request.molecule))
    }

    fn snapshot_toml(&self, request: &JobRequest) -> Result<String, EvaluationError> {
        let snapshot = JobSnapshot {
            job_id: request.job_id,
            molecule: request.molecule,
            reference: self.job.references.get(request.molecule).map(PathBuf::as_path),
            param: group_snapshots(&request.params),
            psf: &self.job.psf,
            settings: &self.job.settings,
        };
        toml::to_string(&snapshot).map_err(|e| failure(request, format!("cannot serialize parameters: {}", e)))
    }

    async fn execute(&self, request: &JobRequest, dir: &Path) -> Result<Trajectory, EvaluationError> {
        // Job ids restart with every run, so the directory may hold files of an earlier job.
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => debug!(path = %dir.display(), "Cleared stale job directory."),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(failure(
                    request,
                    format!("cannot clear '{}': {}", dir.display(), e),
                ));
            }
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| failure(request, format!("cannot create '{}': {}", dir.display(), e)))?;
        tokio::fs::write(dir.join(PARAMS_FILE), self.snapshot_toml(request)?)
            .await
            .map_err(|e| failure(request, format!("cannot write parameters: {}", e)))?;

        let (program, args) = self
            .job
            .command
            .split_first()
            .ok_or_else(|| failure(request, "no job command configured".to_string()))?;
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .env("ARMC_PARAMS", PARAMS_FILE)
            .env("ARMC_JOB_ID", request.job_id.to_string())
            .env("ARMC_MOLECULE", request.molecule.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failure(request, format!("cannot launch '{}': {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(failure(
                request,
                format!("'{}' exited with {}: {}", program, output.status, tail.trim()),
            ));
        }

        let path = dir.join(&self.job.output);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| failure(request, format!("cannot read '{}': {}", path.display(), e)))?;
        XyzFile::read_from(&mut text.as_bytes())
            .map_err(|e| failure(request, format!("invalid trajectory '{}': {}", path.display(), e)))
    }
}

impl SimulationRunner for ProcessRunner {
    #[instrument(level = "debug", skip_all, fields(job_id = request.job_id, molecule = request.molecule))]
    async fn run(&self, request: &JobRequest) -> Result<Trajectory, EvaluationError> {
        let dir = JobDir {
            path: self.job_dir(request),
            keep: self.job.keep_files,
        };
        let result = self.execute(request, &dir.path).await;
        debug!(ok = result.is_ok(), "Simulation job finished.");
        result
    }
}

/// A job's working directory. Removed when dropped unless files are kept, which also covers
/// jobs cancelled by the evaluation timeout.
struct JobDir {
    path: PathBuf,
    keep: bool,
}

impl Drop for JobDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not remove job directory."),
        }
    }
}

fn failure(request: &JobRequest, reason: String) -> EvaluationError {
    EvaluationError::Simulation {
        molecule: request.molecule,
        reason,
    }
}
