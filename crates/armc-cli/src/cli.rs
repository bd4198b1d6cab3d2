use clap::Parser;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug, Clone)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "ARMC CLI - Fit classical force-field parameters to ab-initio structural descriptors with Adaptive Rate Monte Carlo.",
    help_template = HELP_TEMPLATE,
)]
pub struct Cli {
    /// Path to the run configuration in TOML format.
    #[arg(required = true, value_name = "CONFIG")]
    pub config: PathBuf,

    /// Continue from the history file named in the configuration instead of starting over.
    #[arg(short, long)]
    pub restart: bool,

    /// Override `armc.seed`. On restart the seed stored with the history is used by default.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Override `armc.iter-len`, e.g. to extend a finished run together with --restart.
    #[arg(long, value_name = "INT")]
    pub iter_len: Option<usize>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S armc.phi=0.5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to this file in addition to the console [default: armc.log]
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for descriptor computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, value_name = "NUM")]
    pub threads: Option<usize>,
}
