use super::file::FileParamGroup;
use armc::core::descriptors::DescriptorSpec;
use armc::engine::config::ArmcConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the process-backed runner needs to launch one simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub command: Vec<String>,
    /// Per-job directories are created below this one.
    pub workdir: PathBuf,
    pub keep_files: bool,
    pub output: String,
    pub timeout: Option<Duration>,
    pub settings: toml::Table,
    pub psf: toml::Table,
    pub references: Vec<PathBuf>,
}

pub struct AppConfig {
    pub armc: ArmcConfig,
    pub params: Vec<(String, FileParamGroup)>,
    pub descriptors: Vec<DescriptorSpec>,
    pub molecules: Vec<PathBuf>,
    pub job: JobConfig,
}
