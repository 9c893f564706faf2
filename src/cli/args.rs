//! CLI argument definitions

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "eaudit",
    about = "Attribute hardware-counter activity and RAPL energy to the functions of a traced target, per core",
    disable_version_flag = true
)]
pub struct Args {
    /// Sample period in microseconds
    #[arg(short = 'p', value_name = "MICROSECONDS", default_value_t = 1_000)]
    pub period: u64,

    /// Output prefix; the report is written to <PREFIX>.tsv
    #[arg(short = 'o', value_name = "PREFIX", default_value = "eaudit")]
    pub output: PathBuf,

    /// Regression model for the processor energy plane
    #[arg(short = 'm', short_alias = 'c', value_name = "PATH")]
    pub processor_model: Option<PathBuf>,

    /// Regression model for the uncore energy plane (defaults to the processor model)
    #[arg(short = 'u', value_name = "PATH")]
    pub uncore_model: Option<PathBuf>,

    /// Print usage (same as -h)
    #[arg(short = '?', action = ArgAction::Help)]
    pub usage: Option<bool>,

    /// Target executable and its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "EXECUTABLE [ARGS]..."
    )]
    pub command: Vec<String>,
}
