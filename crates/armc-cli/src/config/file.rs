use crate::error::{CliError, Result};
use armc::core::descriptors::ArgValue;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The TOML run configuration as written by the user. Every field is optional here; mandatory
/// values are enforced when the configuration is built.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    #[serde(default)]
    pub param: BTreeMap<String, FileParamGroup>,
    /// Atom-typing inputs, handed to the simulation job unchanged.
    #[serde(default)]
    pub psf: toml::Table,
    #[serde(default)]
    pub pes: BTreeMap<String, FilePesConfig>,
    #[serde(default)]
    pub molecule: Vec<PathBuf>,
    pub job: Option<FileJobConfig>,
    pub armc: Option<FileArmcConfig>,
    #[serde(rename = "move")]
    pub moves: Option<FileMoveConfig>,
    pub hdf5_file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileParamGroup {
    /// Path of this group inside the simulation input.
    pub keys: Option<Vec<String>>,
    pub unit: Option<String>,
    pub weight: Option<f64>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Optimizable values keyed by atom (`"Cd"`) or atom pair (`"Cd Se"`).
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Values that are passed to the simulation but never moved.
    #[serde(default)]
    pub frozen: BTreeMap<String, f64>,
    pub guess: Option<FileGuessConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileGuessConfig {
    pub strategy: String,
    /// Keys whose values should be estimated.
    pub keys: Vec<String>,
    #[serde(default)]
    pub frozen: bool,
    /// Name of the `pes` entry holding the reference RDF for the `rdf` strategy.
    pub rdf: Option<String>,
    /// Atom name to element overrides, e.g. `{ C2O3 = "C" }`.
    #[serde(default)]
    pub elements: HashMap<String, String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FileKwargs {
    Shared(BTreeMap<String, ArgValue>),
    PerMolecule(Vec<BTreeMap<String, ArgValue>>),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FilePesConfig {
    pub func: String,
    #[serde(default)]
    pub args: Vec<ArgValue>,
    pub kwargs: Option<FileKwargs>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileJobConfig {
    /// Program and arguments launched once per molecule and trial.
    #[serde(default)]
    pub command: Vec<String>,
    pub path: Option<PathBuf>,
    pub folder: Option<String>,
    pub keep_files: Option<bool>,
    /// Trajectory file the command leaves in its working directory.
    pub output: Option<String>,
    pub timeout_secs: Option<f64>,
    /// Free-form job settings (pre-optimization, MD) forwarded to the command.
    #[serde(default)]
    pub settings: toml::Table,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileArmcConfig {
    pub iter_len: Option<usize>,
    pub sub_iter_len: Option<usize>,
    pub phi: Option<f64>,
    pub gamma: Option<f64>,
    pub a_target: Option<f64>,
    pub seed: Option<u64>,
    pub flush_interval: Option<usize>,
    pub failure_penalty: Option<f64>,
    pub molecule_reduction: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileMoveConfig {
    pub start: Option<f64>,
    pub stop: Option<f64>,
    pub step: Option<f64>,
    pub func: Option<String>,
    pub max_attempts: Option<usize>,
    pub decimals: Option<u32>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        hdf5-file = "run.hdf5"
        molecule = ["ref1.xyz", "ref2.xyz"]

        [param.charge]
        keys = ["input", "force_eval", "mm", "forcefield", "charge"]
        unit = "e"
        constraints = ["Cd == -1 * Se", "0 < Cd < 2"]
        values = { Cd = 0.9768, Se = -0.9768 }
        frozen = { O = -0.47 }

        [param.sigma]
        keys = ["input", "force_eval", "mm", "forcefield", "nonbonded", "lennard-jones", "sigma"]
        unit = "angstrom"
        values = { "Cd Se" = 2.94 }
        guess = { strategy = "uff", keys = ["Cd Cd", "Se Se"], frozen = true }

        [pes.rdf]
        func = "external"
        kwargs = [{ command = "rdf a" }, { command = "rdf b" }]

        [job]
        command = ["cp2k.psmp", "-i", "md.inp"]
        keep-files = true
        timeout-secs = 600.0

        [job.settings.md]
        steps = 3000

        [armc]
        iter-len = 5000
        sub-iter-len = 50
        seed = 12

        [move]
        func = "add"
        decimals = 4
    "#;

    #[test]
    fn parses_a_complete_configuration() {
        let config = FileConfig::from_toml(EXAMPLE).unwrap();
        assert_eq!(config.hdf5_file, Some(PathBuf::from("run.hdf5")));
        assert_eq!(config.molecule.len(), 2);
        assert_eq!(config.param.len(), 2);

        let charge = &config.param["charge"];
        assert_eq!(charge.values["Cd"], 0.9768);
        assert_eq!(charge.frozen["O"], -0.47);
        assert_eq!(charge.constraints.len(), 2);

        let guess = config.param["sigma"].guess.as_ref().unwrap();
        assert_eq!(guess.strategy, "uff");
        assert!(guess.frozen);

        assert!(matches!(
            config.pes["rdf"].kwargs,
            Some(FileKwargs::PerMolecule(ref sets)) if sets.len() == 2
        ));
        let job = config.job.unwrap();
        assert_eq!(job.command[0], "cp2k.psmp");
        assert!(job.settings.contains_key("md"));
        assert_eq!(config.armc.unwrap().sub_iter_len, Some(50));
        assert_eq!(config.moves.unwrap().decimals, Some(4));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = FileConfig::from_toml("[armc]\niter_length = 10\n");
        assert!(result.is_err());
    }

    #[test]
    fn shared_kwargs_parse_as_a_table() {
        let config = FileConfig::from_toml(
            "[pes.rdf]\nfunc = \"external\"\nkwargs = { command = \"rdf\" }\n",
        )
        .unwrap();
        assert!(matches!(
            config.pes["rdf"].kwargs,
            Some(FileKwargs::Shared(_))
        ));
    }
}
