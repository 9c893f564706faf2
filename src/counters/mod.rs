//! Hardware-counter provider
//!
//! One logical counter set may span two hardware components: per-CPU
//! instruction/cycle/cache counters (perf) and package-scoped RAPL energy
//! domains (powercap). [`provider::CounterProvider::open`] partitions the
//! requested event names by component and presents a single merged
//! start/stop facade; `stop` returns values in the order the names were
//! given at `open`.
//!
//! Counter semantics:
//! - `start` records a baseline, `stop` returns the cumulative count since
//!   the most recent `start`; alternating `stop`/`start` yields per-tick
//!   deltas.
//! - RAPL counters wrap at `max_energy_range_uj`; the wrapped delta is
//!   computed against that bound. Perf counters are 64-bit and must not
//!   decrease; a decrease is a provider error.

pub mod perf;
pub mod provider;
pub mod rapl;

pub use provider::{ComponentSet, CounterProvider, CounterSet};
pub use rapl::wrapped_delta;

/// Retired instruction count, per CPU.
pub const EVENT_INSTRUCTIONS: &str = "instructions";
/// Unhalted cycle count, per CPU.
pub const EVENT_CYCLES: &str = "cycles";
/// Last-level cache references, per CPU.
pub const EVENT_CACHE_REFERENCES: &str = "cache-references";
/// Last-level cache misses, per CPU.
pub const EVENT_CACHE_MISSES: &str = "cache-misses";
/// Retired branch instructions, per CPU.
pub const EVENT_BRANCHES: &str = "branches";
/// Mispredicted branches, per CPU.
pub const EVENT_BRANCH_MISSES: &str = "branch-misses";
/// Package energy domain (whole socket).
pub const EVENT_ENERGY_PKG: &str = "energy-pkg";
/// Power-plane-0 energy domain (the cores).
pub const EVENT_ENERGY_CORES: &str = "energy-cores";
/// DRAM energy domain.
pub const EVENT_ENERGY_RAM: &str = "energy-ram";
