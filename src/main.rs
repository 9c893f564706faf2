use std::fs::File;
use std::io::BufWriter;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use eaudit::cli::{Args, Config};
use eaudit::clock::SamplingClock;
use eaudit::counters::CounterProvider;
use eaudit::report::{self, Profile};
use eaudit::sampling::{Sampler, SamplerConfig};
use eaudit::symbolization::Symbolizer;
use eaudit::tracer::Tracer;

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help goes to stdout and exits clean; real parse errors share
            // the configuration-failure exit code.
            let code = if err.use_stderr() { -1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if let Err(err) = run(args) {
        eprintln!("eaudit: {err:#}");
        std::process::exit(-1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::from_args(args)?;

    let provider = CounterProvider::new().context("failed to initialize counter provider")?;
    let clock = SamplingClock::new(config.period_us)?;
    let tracer = Tracer::spawn(&config.command)
        .with_context(|| format!("failed to launch {}", config.command[0]))?;
    info!(
        "profiling {} across {} cores at {} us",
        config.command[0], config.physical_cores, config.period_us
    );

    let sampler = Sampler::new(
        SamplerConfig {
            period_us: config.period_us,
            physical_cores: config.physical_cores,
            processor_model: config.processor_model.clone(),
            uncore_model: config.uncore_model.clone(),
        },
        &provider,
        tracer,
        clock,
    )?;
    let outcome = sampler.run()?;
    info!(
        "target finished after {:.3} s with {} attribution buckets",
        outcome.elapsed.as_secs_f64(),
        outcome.table.len()
    );

    let symbolizer = Symbolizer::new(&config.command[0]);
    let names = symbolizer.resolve_all(&outcome.table.addresses());
    let profile = Profile::build(&outcome.table, &names, config.physical_cores, outcome.elapsed);

    let path = config.report_path();
    let file = File::create(&path)
        .with_context(|| format!("failed to create report file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    report::write_report(&mut writer, &profile)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    info!("report written to {}", path.display());

    Ok(())
}
