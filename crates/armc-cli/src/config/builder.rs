use super::defaults::DefaultsConfig;
use super::file::{FileConfig, FileKwargs, FileParamGroup};
use super::models::{AppConfig, JobConfig};
use crate::cli::Cli;
use crate::error::{CliError, Result};
use armc::core::descriptors::{Descriptor, DescriptorSpec};
use armc::core::params::guess::{GuessContext, GuessQuantity, GuessStrategy};
use armc::core::params::parameter::ParamKey;
use armc::core::params::set::{GroupMeta, ParamSetError, ParameterSet};
use armc::engine::config::{
    ArmcConfig, ArmcConfigBuilder, EvaluationConfig, MoleculeReduction, MoveConfig, MoveFunc,
};
use armc::engine::error::EngineError;
use armc::engine::history::HistoryStore;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Merges the file configuration with command-line overrides and defaults.
pub fn build_config(args: &Cli, file_config: FileConfig) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();
    let file_config = apply_set_values(file_config, &args.set_values)?;

    let history_path = file_config
        .hdf5_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(defaults.history_file));

    let armc_file = file_config.armc.clone().unwrap_or_default();
    let sub_iter_len = armc_file.sub_iter_len.unwrap_or(defaults.sub_iter_len);
    let iter_len = args
        .iter_len
        .or(armc_file.iter_len)
        .unwrap_or(defaults.iter_len);
    let seed = resolve_seed(args, armc_file.seed, &history_path)?;

    let moves = merge_moves(&file_config)?;
    let mut evaluation = EvaluationConfig::default();
    if let Some(penalty) = armc_file.failure_penalty {
        evaluation.failure_penalty = penalty;
    }
    if let Some(reduction) = &armc_file.molecule_reduction {
        evaluation.molecule_reduction =
            MoleculeReduction::from_str(reduction).map_err(|e| CliError::Config(e.to_string()))?;
    }
    let job = merge_job(&file_config, &defaults)?;
    evaluation.timeout = job.timeout;

    let mut builder = ArmcConfigBuilder::new()
        .iter_len(iter_len)
        .sub_iter_len(sub_iter_len)
        .seed(seed)
        .phi(armc_file.phi.unwrap_or(defaults.phi))
        .gamma(armc_file.gamma.unwrap_or(defaults.gamma))
        .a_target(armc_file.a_target.unwrap_or(defaults.a_target))
        .moves(moves)
        .evaluation(evaluation)
        .history_path(history_path);
    if let Some(n) = armc_file.flush_interval {
        builder = builder.flush_interval(n);
    }
    let armc = builder
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let params = validate_param_groups(&file_config)?;
    let descriptors = file_config
        .pes
        .iter()
        .map(|(name, pes)| DescriptorSpec {
            name: name.clone(),
            func: pes.func.clone(),
            args: pes.args.clone(),
            kwargs: match &pes.kwargs {
                None => Vec::new(),
                Some(FileKwargs::Shared(set)) => vec![set.clone()],
                Some(FileKwargs::PerMolecule(sets)) => sets.clone(),
            },
        })
        .collect();
    if file_config.molecule.is_empty() {
        return Err(CliError::Config(
            "`molecule` must list at least one reference trajectory".to_string(),
        ));
    }

    Ok(AppConfig {
        armc,
        params,
        descriptors,
        molecules: file_config.molecule.clone(),
        job,
    })
}

/// Builds the initial parameter set, filling guessed values. `rdf` looks up a reference
/// descriptor by its `pes` name.
pub fn build_parameter_set<'a>(
    groups: &[(String, FileParamGroup)],
    rdf: impl Fn(&str) -> Option<&'a Descriptor>,
) -> std::result::Result<ParameterSet, EngineError> {
    let defaults = DefaultsConfig::default();
    let mut builder = ParameterSet::builder();

    for (name, group) in groups {
        builder = builder.group(GroupMeta {
            name: name.clone(),
            keys: group.keys.clone().unwrap_or_default(),
            unit: group.unit.clone(),
            weight: group.weight.unwrap_or(1.0),
        })?;

        let mut declared = HashSet::new();
        for (key, value) in &group.values {
            builder = builder.parameter(name, key, *value, false)?;
            declared.insert(ParamKey::new(key).map_err(ParamSetError::from)?);
        }
        for (key, value) in &group.frozen {
            builder = builder.parameter(name, key, *value, true)?;
            declared.insert(ParamKey::new(key).map_err(ParamSetError::from)?);
        }

        if let Some(guess) = &group.guess {
            let strategy = GuessStrategy::from_str(&guess.strategy)?;
            let quantity = GuessQuantity::from_group(name)?;
            let rdf_name = guess.rdf.as_deref().unwrap_or(defaults.rdf_descriptor);
            let context = GuessContext {
                strategy,
                quantity,
                elements: &guess.elements,
                rdf: rdf(rdf_name),
            };
            for key in &guess.keys {
                let parsed = ParamKey::new(key).map_err(ParamSetError::from)?;
                if declared.contains(&parsed) {
                    continue;
                }
                let value = context.guess(&parsed)?;
                info!(group = %name, key = %parsed, value, %strategy, "Guessed parameter value.");
                builder = builder.parameter(name, key, value, guess.frozen)?;
                declared.insert(parsed);
            }
        }

        for expr in &group.constraints {
            builder = builder.constraint(name, expr)?;
        }
    }

    Ok(builder.build()?)
}

fn validate_param_groups(file_config: &FileConfig) -> Result<Vec<(String, FileParamGroup)>> {
    if file_config.param.is_empty() {
        return Err(CliError::Config(
            "no parameters to optimize: the `param` block is empty".to_string(),
        ));
    }
    for (name, group) in &file_config.param {
        if group.keys.as_ref().is_none_or(Vec::is_empty) {
            return Err(CliError::Config(format!(
                "`param.{}` is missing its mandatory `keys`",
                name
            )));
        }
        let guessed = group.guess.as_ref().is_some_and(|g| !g.keys.is_empty());
        if group.values.is_empty() && group.frozen.is_empty() && !guessed {
            return Err(CliError::Config(format!(
                "`param.{}` declares no values",
                name
            )));
        }
    }
    Ok(file_config
        .param
        .iter()
        .map(|(name, group)| (name.clone(), group.clone()))
        .collect())
}

fn resolve_seed(args: &Cli, file_seed: Option<u64>, history_path: &Path) -> Result<u64> {
    if let Some(seed) = args.seed.or(file_seed) {
        return Ok(seed);
    }
    if args.restart {
        let meta = HistoryStore::read_meta(history_path)
            .map_err(|e| CliError::Armc(EngineError::Persistence(e)))?;
        info!(seed = meta.seed, "Using the seed stored with the history.");
        return Ok(meta.seed);
    }
    let seed = rand::random();
    info!(seed, "No seed configured; drew a random one.");
    Ok(seed)
}

fn merge_moves(file_config: &FileConfig) -> Result<MoveConfig> {
    let file = file_config.moves.clone().unwrap_or_default();
    let defaults = MoveConfig::default();
    let func = match &file.func {
        Some(s) => MoveFunc::from_str(s).map_err(|e| CliError::Config(e.to_string()))?,
        None => defaults.func,
    };
    Ok(MoveConfig {
        start: file.start.unwrap_or(defaults.start),
        stop: file.stop.unwrap_or(defaults.stop),
        step: file.step.unwrap_or(defaults.step),
        func,
        max_attempts: file.max_attempts.unwrap_or(defaults.max_attempts),
        decimals: file.decimals.or(defaults.decimals),
    })
}

fn merge_job(file_config: &FileConfig, defaults: &DefaultsConfig) -> Result<JobConfig> {
    let job = file_config.job.clone().unwrap_or_default();
    if job.command.is_empty() {
        return Err(CliError::Config(
            "`job.command` must name the program that runs one simulation".to_string(),
        ));
    }
    let timeout = match job.timeout_secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => {
            return Err(CliError::Config(format!(
                "`job.timeout-secs` must be positive, got {}",
                secs
            )));
        }
        None => None,
    };
    let workdir = job
        .path
        .unwrap_or_else(|| PathBuf::from(defaults.job_path))
        .join(job.folder.as_deref().unwrap_or(defaults.job_folder));

    Ok(JobConfig {
        command: job.command,
        workdir,
        keep_files: job.keep_files.unwrap_or(defaults.keep_files),
        output: job
            .output
            .unwrap_or_else(|| defaults.job_output.to_string()),
        timeout,
        settings: job.settings,
        psf: file_config.psf.clone(),
        references: file_config.molecule.clone(),
    })
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CliError::Config(format!("Invalid value for {}: {}", key, value))
    })
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value)) = kv_pair.split_once('=') else {
            return Err(CliError::Argument(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };
        let key = key.trim();

        if key == "hdf5-file" {
            config.hdf5_file = Some(PathBuf::from(value.trim()));
            continue;
        }
        if let Some(field) = key.strip_prefix("armc.") {
            let armc = config.armc.get_or_insert_with(Default::default);
            match field {
                "iter-len" => armc.iter_len = Some(parse_value(key, value)?),
                "sub-iter-len" => armc.sub_iter_len = Some(parse_value(key, value)?),
                "phi" => armc.phi = Some(parse_value(key, value)?),
                "gamma" => armc.gamma = Some(parse_value(key, value)?),
                "a-target" => armc.a_target = Some(parse_value(key, value)?),
                "seed" => armc.seed = Some(parse_value(key, value)?),
                "flush-interval" => armc.flush_interval = Some(parse_value(key, value)?),
                "failure-penalty" => armc.failure_penalty = Some(parse_value(key, value)?),
                "molecule-reduction" => armc.molecule_reduction = Some(value.trim().to_string()),
                _ => return Err(unsupported_key(key)),
            }
            continue;
        }
        if let Some(field) = key.strip_prefix("move.") {
            let moves = config.moves.get_or_insert_with(Default::default);
            match field {
                "start" => moves.start = Some(parse_value(key, value)?),
                "stop" => moves.stop = Some(parse_value(key, value)?),
                "step" => moves.step = Some(parse_value(key, value)?),
                "func" => moves.func = Some(value.trim().to_string()),
                "max-attempts" => moves.max_attempts = Some(parse_value(key, value)?),
                "decimals" => moves.decimals = Some(parse_value(key, value)?),
                _ => return Err(unsupported_key(key)),
            }
            continue;
        }
        if let Some(field) = key.strip_prefix("job.") {
            let job = config.job.get_or_insert_with(Default::default);
            match field {
                "keep-files" => job.keep_files = Some(parse_value(key, value)?),
                "timeout-secs" => job.timeout_secs = Some(parse_value(key, value)?),
                "folder" => job.folder = Some(value.trim().to_string()),
                _ => return Err(unsupported_key(key)),
            }
            continue;
        }
        return Err(unsupported_key(key));
    }
    Ok(config)
}

fn unsupported_key(key: &str) -> CliError {
    CliError::Config(format!(
        "Unsupported configuration key for --set: '{}'",
        key
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::BTreeMap;

    const MINIMAL: &str = r#"
        molecule = ["ref.xyz"]

        [param.charge]
        keys = ["charge"]
        values = { Cd = 0.9768, Se = -0.9768 }
        constraints = ["Cd == -1 * Se"]

        [pes.rdf]
        func = "external"
        kwargs = { command = "rdf" }

        [job]
        command = ["md.sh"]
    "#;

    fn args(extra: &[&str]) -> Cli {
        let mut argv = vec!["armc", "run.toml"];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv).unwrap()
    }

    fn build(extra: &[&str], toml: &str) -> Result<AppConfig> {
        build_config(&args(extra), FileConfig::from_toml(toml).unwrap())
    }

    #[test]
    fn defaults_fill_everything_not_in_the_file() {
        let app = build(&["--seed", "1"], MINIMAL).unwrap();
        let mc = app.armc.monte_carlo;
        assert_eq!(mc.iter_len, 50000);
        assert_eq!(mc.sub_iter_len, 100);
        assert_eq!(mc.flush_interval, 100);
        assert_eq!(mc.seed, 1);
        assert_eq!(app.armc.phi.phi, 1.0);
        assert_eq!(app.armc.phi.gamma, 2.0);
        assert_eq!(app.armc.phi.a_target, 0.25);
        assert_eq!(app.armc.moves, MoveConfig::default());
        assert_eq!(app.armc.history_path, PathBuf::from("armc.hdf5"));
        assert_eq!(app.job.workdir, PathBuf::from(".").join("armc_jobs"));
        assert!(app.job.keep_files);
        assert_eq!(app.descriptors.len(), 1);
        assert_eq!(app.descriptors[0].kwargs.len(), 1);
    }

    #[test]
    fn cli_and_set_values_override_the_file() {
        let toml = format!("{}\n[armc]\niter-len = 1000\nsub-iter-len = 10\n", MINIMAL);
        let app = build(
            &[
                "--iter-len",
                "200",
                "-S",
                "armc.phi=0.5",
                "-S",
                "move.func=add",
                "-S",
                "hdf5-file=out.hdf5",
                "-S",
                "armc.seed=9",
            ],
            &toml,
        )
        .unwrap();
        assert_eq!(app.armc.monte_carlo.iter_len, 200);
        assert_eq!(app.armc.monte_carlo.sub_iter_len, 10);
        assert_eq!(app.armc.monte_carlo.seed, 9);
        assert_eq!(app.armc.phi.phi, 0.5);
        assert_eq!(app.armc.moves.func, MoveFunc::Add);
        assert_eq!(app.armc.history_path, PathBuf::from("out.hdf5"));
    }

    #[test]
    fn unsupported_set_keys_are_rejected() {
        assert!(matches!(
            build(&["-S", "armc.temperature=3"], MINIMAL),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            build(&["-S", "armc.phi"], MINIMAL),
            Err(CliError::Argument(_))
        ));
    }

    #[test]
    fn invalid_schedule_is_a_configuration_error() {
        assert!(matches!(
            build(&["--seed", "1", "-S", "armc.gamma=0.5"], MINIMAL),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            build(&["--seed", "1", "--iter-len", "150"], MINIMAL),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn param_groups_need_keys() {
        let toml = MINIMAL.replace("keys = [\"charge\"]", "");
        assert!(matches!(
            build(&["--seed", "1"], &toml),
            Err(CliError::Config(msg)) if msg.contains("keys")
        ));
    }

    #[test]
    fn restart_without_seed_reads_the_history_seed() {
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("armc.hdf5");
        let mut store = HistoryStore::create(
            &history,
            armc::engine::history::HistoryMeta {
                seed: 4242,
                sub_iter_len: 100,
                iter_len: 100,
                columns: vec!["charge/Cd".into()],
            },
        );
        store.flush().unwrap();

        let set = format!("hdf5-file={}", history.display());
        let app = build(&["--restart", "-S", &set], MINIMAL).unwrap();
        assert_eq!(app.armc.monte_carlo.seed, 4242);
    }

    #[test]
    fn parameter_set_combines_values_frozen_and_guesses() {
        let mut sigma = FileParamGroup {
            keys: Some(vec!["sigma".into()]),
            values: BTreeMap::from([("Cd Se".to_string(), 2.9)]),
            frozen: BTreeMap::from([("O".to_string(), 3.0)]),
            ..Default::default()
        };
        sigma.guess = Some(super::super::file::FileGuessConfig {
            strategy: "uff".into(),
            keys: vec!["Se Cd".into(), "Cd Cd".into()],
            frozen: true,
            ..Default::default()
        });
        let params = build_parameter_set(&[("sigma".to_string(), sigma)], |_| None).unwrap();

        assert_eq!(params.len(), 3);
        assert_eq!(params.value_of("sigma", "Cd Se"), Some(2.9));
        let guessed = params.value_of("sigma", "Cd Cd").unwrap();
        assert!(guessed > 2.0 && guessed < 4.0);
        assert_eq!(params.free_indices().len(), 1);
    }

    #[test]
    fn rdf_guess_without_descriptor_fails() {
        let group = FileParamGroup {
            keys: Some(vec!["epsilon".into()]),
            guess: Some(super::super::file::FileGuessConfig {
                strategy: "rdf".into(),
                keys: vec!["Cd Se".into()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = build_parameter_set(&[("epsilon".to_string(), group)], |_| None);
        assert!(matches!(result, Err(EngineError::Guess(_))));
    }
}
