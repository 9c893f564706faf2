//! Command-line interface and run configuration.

pub mod args;

pub use args::Args;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::ConfigError;
use crate::model::EnergyModel;

/// Lowest accepted sample period; the energy counters update on a
/// roughly millisecond cadence and sampling below half of that reads
/// mostly zeros.
pub const MIN_PERIOD_US: u64 = 500;

/// A validated run configuration: flags checked, models loaded.
#[derive(Debug)]
pub struct Config {
    pub period_us: u64,
    pub output: PathBuf,
    pub command: Vec<String>,
    pub physical_cores: usize,
    pub processor_model: Arc<EnergyModel>,
    pub uncore_model: Arc<EnergyModel>,
}

impl Config {
    /// Validate arguments and load model files. Everything that can be
    /// rejected is rejected here, before any target process exists.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.period < MIN_PERIOD_US {
            return Err(ConfigError::PeriodTooShort {
                requested: args.period,
                floor: MIN_PERIOD_US,
            });
        }
        if args.command.is_empty() {
            return Err(ConfigError::MissingTarget);
        }

        let processor_model = match &args.processor_model {
            Some(path) => Arc::new(load_model(path)?),
            None => Arc::new(EnergyModel::constant()),
        };
        let uncore_model = match &args.uncore_model {
            Some(path) => Arc::new(load_model(path)?),
            None => Arc::clone(&processor_model),
        };

        Ok(Self {
            period_us: args.period,
            output: args.output,
            command: args.command,
            physical_cores: num_cpus::get_physical().max(1),
            processor_model,
            uncore_model,
        })
    }

    /// Path of the report file: `<output>.tsv`.
    pub fn report_path(&self) -> PathBuf {
        let mut path = self.output.clone().into_os_string();
        path.push(".tsv");
        PathBuf::from(path)
    }
}

fn load_model(path: &Path) -> Result<EnergyModel, ConfigError> {
    let text = fs::read_to_string(path)
        .map_err(|source| ConfigError::ModelUnreadable { path: path.to_owned(), source })?;
    EnergyModel::from_json(&text)
        .map_err(|source| ConfigError::MalformedModel { path: path.to_owned(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv.iter().copied()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["eaudit", "./target"]);
        assert_eq!(args.period, 1_000);
        assert_eq!(args.output, PathBuf::from("eaudit"));
        assert!(args.processor_model.is_none());
        assert_eq!(args.command, vec!["./target".to_string()]);
    }

    #[test]
    fn test_target_arguments_pass_through() {
        let args = parse(&["eaudit", "-p", "2000", "./target", "--flag", "-x"]);
        assert_eq!(args.period, 2_000);
        assert_eq!(args.command, vec!["./target", "--flag", "-x"]);
    }

    #[test]
    fn test_processor_model_alias() {
        let with_m = parse(&["eaudit", "-m", "model.json", "./target"]);
        let with_c = parse(&["eaudit", "-c", "model.json", "./target"]);
        assert_eq!(with_m.processor_model, with_c.processor_model);
    }

    #[test]
    fn test_period_below_floor_rejected() {
        let args = parse(&["eaudit", "-p", "100", "./target"]);
        let err = Config::from_args(args).unwrap_err();
        assert!(matches!(err, ConfigError::PeriodTooShort { requested: 100, floor: 500 }));
    }

    #[test]
    fn test_period_at_floor_accepted() {
        let args = parse(&["eaudit", "-p", "500", "/bin/true"]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.period_us, 500);
        assert!(config.physical_cores >= 1);
    }

    #[test]
    fn test_missing_target_rejected_by_parser() {
        assert!(Args::try_parse_from(["eaudit", "-p", "1000"].iter().copied()).is_err());
    }

    #[test]
    fn test_help_flags_print_usage_and_exit_clean() {
        // Both spellings must surface as a help display, not a parse
        // error, so main exits 0 after printing usage.
        for flag in ["-h", "-?"] {
            let err = Args::try_parse_from(["eaudit", flag].iter().copied()).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
            assert!(!err.use_stderr());
        }
    }

    #[test]
    fn test_missing_model_file_is_config_error() {
        let args = parse(&["eaudit", "-m", "/nonexistent/model.json", "/bin/true"]);
        assert!(matches!(Config::from_args(args), Err(ConfigError::ModelUnreadable { .. })));
    }

    #[test]
    fn test_report_path_appends_extension() {
        let args = parse(&["eaudit", "-o", "runs/today", "/bin/true"]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.report_path(), PathBuf::from("runs/today.tsv"));
    }

    #[test]
    fn test_no_model_means_uniform_split() {
        let args = parse(&["eaudit", "/bin/true"]);
        let config = Config::from_args(args).unwrap();
        assert!(config.processor_model.metric_names().is_empty());
        assert_eq!(config.processor_model.evaluate(&[]), 1.0);
        // The uncore plane shares the processor model when -u is absent.
        assert!(Arc::ptr_eq(&config.processor_model, &config.uncore_model));
    }
}
