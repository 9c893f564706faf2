//! The profile report.
//!
//! Two TSV blocks plus a global summary line. Unit conversion happens
//! here and nowhere else: energies arrive in microjoules and leave in
//! joules, times arrive in microseconds and leave in seconds.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use crate::domain::ReportError;
use crate::sampling::{AttributionTable, SampleStats};

const JOULES_PER_MICROJOULE: f64 = 1e-6;
const SECONDS_PER_MICROSECOND: f64 = 1e-6;

/// One function's accumulated activity, total and per core.
pub struct FunctionProfile {
    pub name: String,
    pub totals: SampleStats,
    pub per_core: Vec<SampleStats>,
}

/// The finished profile, ready to format.
pub struct Profile {
    /// Sorted by total energy descending, ties by name.
    pub functions: Vec<FunctionProfile>,
    pub cores: usize,
    pub totals: SampleStats,
    pub elapsed: Duration,
}

impl Profile {
    /// Merge attribution buckets by resolved function name.
    ///
    /// Addresses missing from `names` (the symbolizer never saw them)
    /// fall back to their hex form.
    pub fn build(
        table: &AttributionTable,
        names: &HashMap<u64, String>,
        cores: usize,
        elapsed: Duration,
    ) -> Self {
        let cores = table
            .iter()
            .map(|((core, _), _)| core.0 + 1)
            .max()
            .unwrap_or(0)
            .max(cores);

        let mut by_name: HashMap<String, FunctionProfile> = HashMap::new();
        let mut totals = SampleStats::default();
        for ((core, ip), stats) in table.iter() {
            let name = names.get(ip).cloned().unwrap_or_else(|| format!("{ip:#x}"));
            let entry = by_name.entry(name.clone()).or_insert_with(|| FunctionProfile {
                name,
                totals: SampleStats::default(),
                per_core: vec![SampleStats::default(); cores],
            });
            entry.totals += *stats;
            entry.per_core[core.0] += *stats;
            totals += *stats;
        }

        let mut functions: Vec<FunctionProfile> = by_name.into_values().collect();
        functions.sort_by(|a, b| {
            b.totals
                .total_energy()
                .partial_cmp(&a.totals.total_energy())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });

        Self { functions, cores, totals, elapsed }
    }
}

/// Write the full report: per-function block, per-core block, global line.
pub fn write_report<W: Write>(out: &mut W, profile: &Profile) -> Result<(), ReportError> {
    write_function_block(out, profile)?;
    writeln!(out)?;
    write_core_block(out, profile)?;
    writeln!(out)?;
    write_global_line(out, profile)?;
    Ok(())
}

fn write_function_block<W: Write>(out: &mut W, profile: &Profile) -> Result<(), ReportError> {
    write!(out, "Function\tEnergy(J)\tTime(s)\tInstructions/J")?;
    for core in 0..profile.cores {
        write!(
            out,
            "\tCore{core} Energy(J)\tCore{core} Time(s)\tCore{core} Instructions/J\
             \tCore{core} %Energy\tCore{core} %Time\tCore{core} EffDev%"
        )?;
    }
    writeln!(out)?;

    for function in &profile.functions {
        let energy = function.totals.total_energy();
        let function_efficiency = efficiency(function.totals.instructions, energy);
        write!(
            out,
            "{}\t{:.6}\t{:.6}\t{:.3}",
            function.name,
            joules(energy),
            seconds(function.totals.time_us),
            function_efficiency,
        )?;
        for stats in &function.per_core {
            let core_energy = stats.total_energy();
            let core_efficiency = efficiency(stats.instructions, core_energy);
            write!(
                out,
                "\t{:.6}\t{:.6}\t{:.3}\t{:.2}\t{:.2}\t{:.2}",
                joules(core_energy),
                seconds(stats.time_us),
                core_efficiency,
                percent(core_energy, energy),
                percent(stats.time_us as f64, function.totals.time_us as f64),
                deviation(core_efficiency, function_efficiency),
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_core_block<W: Write>(out: &mut W, profile: &Profile) -> Result<(), ReportError> {
    let global_energy = profile.totals.total_energy();
    for core in 0..profile.cores {
        writeln!(out, "===CORE {core}")?;
        writeln!(out, "Function\tEnergy(J)\tTime(s)\t%Core Energy\t%Total Energy")?;

        let mut rows: Vec<(&FunctionProfile, &SampleStats)> = profile
            .functions
            .iter()
            .map(|function| (function, &function.per_core[core]))
            .filter(|(_, stats)| stats.time_us > 0 || stats.total_energy() > 0.0)
            .collect();
        let core_energy: f64 = rows.iter().map(|(_, stats)| stats.total_energy()).sum();
        rows.sort_by(|a, b| {
            b.1.total_energy()
                .partial_cmp(&a.1.total_energy())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.name.cmp(&b.0.name))
        });

        for (function, stats) in rows {
            writeln!(
                out,
                "{}\t{:.6}\t{:.6}\t{:.2}\t{:.2}",
                function.name,
                joules(stats.total_energy()),
                seconds(stats.time_us),
                percent(stats.total_energy(), core_energy),
                percent(stats.total_energy(), global_energy),
            )?;
        }
    }
    Ok(())
}

fn write_global_line<W: Write>(out: &mut W, profile: &Profile) -> Result<(), ReportError> {
    writeln!(out, "===GLOBAL")?;
    writeln!(out, "Processor(J)\tUncore(J)\tDRAM(J)\tTime(s)\tInstructions/J\tElapsed(s)")?;
    writeln!(
        out,
        "{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.3}\t{:.6}",
        joules(profile.totals.processor_energy),
        joules(profile.totals.uncore_energy),
        joules(profile.totals.dram_energy),
        seconds(profile.totals.time_us),
        efficiency(profile.totals.instructions, profile.totals.total_energy()),
        profile.elapsed.as_secs_f64(),
    )?;
    Ok(())
}

fn joules(microjoules: f64) -> f64 {
    microjoules * JOULES_PER_MICROJOULE
}

#[allow(clippy::cast_precision_loss)]
fn seconds(microseconds: u64) -> f64 {
    microseconds as f64 * SECONDS_PER_MICROSECOND
}

/// Instructions per joule; zero when no energy was attributed.
#[allow(clippy::cast_precision_loss)]
fn efficiency(instructions: u64, microjoules: f64) -> f64 {
    let joules = joules(microjoules);
    if joules == 0.0 {
        0.0
    } else {
        instructions as f64 / joules
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

/// Relative deviation of a core's efficiency from the function's overall
/// efficiency, in percent.
fn deviation(core_efficiency: f64, function_efficiency: f64) -> f64 {
    if function_efficiency == 0.0 {
        0.0
    } else {
        (core_efficiency - function_efficiency) / function_efficiency * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CoreId as Core;

    fn sample(processor: f64, time_us: u64, instructions: u64) -> SampleStats {
        SampleStats {
            processor_energy: processor,
            uncore_energy: 0.0,
            dram_energy: 0.0,
            time_us,
            instructions,
        }
    }

    #[test]
    fn test_functions_sorted_by_total_energy() {
        let mut table = AttributionTable::new();
        table.record(Core(0), 0x100, sample(10.0, 1_000, 100));
        table.record(Core(0), 0x200, sample(90.0, 1_000, 100));
        let names = HashMap::from([
            (0x100u64, "cold at a.c".to_string()),
            (0x200u64, "hot at b.c".to_string()),
        ]);

        let profile = Profile::build(&table, &names, 1, Duration::from_secs(1));
        assert_eq!(profile.functions[0].name, "hot at b.c");
        assert_eq!(profile.functions[1].name, "cold at a.c");
    }

    #[test]
    fn test_addresses_of_one_function_merge() {
        let mut table = AttributionTable::new();
        table.record(Core(0), 0x100, sample(10.0, 1_000, 100));
        table.record(Core(1), 0x108, sample(30.0, 3_000, 300));
        let names = HashMap::from([
            (0x100u64, "spin at hog.c".to_string()),
            (0x108u64, "spin at hog.c".to_string()),
        ]);

        let profile = Profile::build(&table, &names, 2, Duration::from_secs(2));
        assert_eq!(profile.functions.len(), 1);
        let spin = &profile.functions[0];
        assert_eq!(spin.totals.processor_energy, 40.0);
        assert_eq!(spin.totals.time_us, 4_000);
        assert_eq!(spin.per_core[0].time_us, 1_000);
        assert_eq!(spin.per_core[1].time_us, 3_000);
    }

    #[test]
    fn test_unnamed_address_falls_back_to_hex() {
        let mut table = AttributionTable::new();
        table.record(Core(0), 0xdead, sample(1.0, 1_000, 10));

        let profile = Profile::build(&table, &HashMap::new(), 1, Duration::ZERO);
        assert_eq!(profile.functions[0].name, "0xdead");
    }

    #[test]
    fn test_empty_run_writes_zero_global_row() {
        let table = AttributionTable::new();
        let profile = Profile::build(&table, &HashMap::new(), 0, Duration::ZERO);

        let mut buffer = Vec::new();
        write_report(&mut buffer, &profile).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.starts_with("Function\tEnergy(J)\tTime(s)\tInstructions/J\n"));
        assert!(text.contains("===GLOBAL"));
        let global_row = text.lines().last().unwrap();
        assert_eq!(global_row, "0.000000\t0.000000\t0.000000\t0.000000\t0.000\t0.000000");
    }

    #[test]
    fn test_report_has_per_core_sections() {
        let mut table = AttributionTable::new();
        table.record(Core(0), 0x100, sample(10.0, 1_000, 100));
        table.record(Core(1), 0x200, sample(20.0, 2_000, 200));
        let names = HashMap::from([
            (0x100u64, "alpha at a.c".to_string()),
            (0x200u64, "beta at b.c".to_string()),
        ]);
        let profile = Profile::build(&table, &names, 2, Duration::from_millis(3));

        let mut buffer = Vec::new();
        write_report(&mut buffer, &profile).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("===CORE 0"));
        assert!(text.contains("===CORE 1"));
        // A function idle on a core does not appear in that core's section.
        let core0 = text.split("===CORE 0").nth(1).unwrap().split("===CORE 1").next().unwrap();
        assert!(core0.contains("alpha at a.c"));
        assert!(!core0.contains("beta at b.c"));
    }

    #[test]
    fn test_percentages_of_function_totals() {
        let mut table = AttributionTable::new();
        table.record(Core(0), 0x100, sample(25.0, 1_000, 100));
        table.record(Core(1), 0x100, sample(75.0, 3_000, 300));
        let names = HashMap::from([(0x100u64, "spin at hog.c".to_string())]);
        let profile = Profile::build(&table, &names, 2, Duration::ZERO);

        let mut buffer = Vec::new();
        write_report(&mut buffer, &profile).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let row = text.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split('\t').collect();

        // Core 0 carries 25% of the energy and 25% of the time.
        assert_eq!(fields[7], "25.00");
        assert_eq!(fields[8], "25.00");
        // Core 1 carries the rest.
        assert_eq!(fields[13], "75.00");
        assert_eq!(fields[14], "75.00");
    }

    #[test]
    fn test_wild_core_entry_widens_profile_instead_of_panicking() {
        let mut table = AttributionTable::new();
        table.record(Core(3), 0x100, sample(1.0, 1_000, 10));
        let profile = Profile::build(&table, &HashMap::new(), 2, Duration::ZERO);
        assert_eq!(profile.cores, 4);
    }
}
