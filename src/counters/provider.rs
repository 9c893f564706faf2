//! Counter-set facade over the perf and RAPL components.

use perf_event::events::Hardware;

use super::perf::PerfSet;
use super::rapl::{RaplKind, RaplTopology};
use super::{
    EVENT_BRANCHES, EVENT_BRANCH_MISSES, EVENT_CACHE_MISSES, EVENT_CACHE_REFERENCES, EVENT_CYCLES,
    EVENT_ENERGY_CORES, EVENT_ENERGY_PKG, EVENT_ENERGY_RAM, EVENT_INSTRUCTIONS,
};
use crate::domain::{CoreId, CounterError};

/// One underlying set belonging to a single hardware component.
///
/// Implementations return their values in the order their events were
/// handed to them; the facade maps those back into `open` order.
pub trait ComponentSet {
    fn attach_to_core(&mut self, core: CoreId) -> Result<(), CounterError>;
    fn start(&mut self) -> Result<(), CounterError>;
    fn stop(&mut self) -> Result<Vec<u64>, CounterError>;
}

struct Part {
    set: Box<dyn ComponentSet>,
    /// Position in the `open` name order for each value this part returns.
    positions: Vec<usize>,
}

/// A logical counter set: named events, possibly spanning components.
pub struct CounterSet {
    names: Vec<String>,
    parts: Vec<Part>,
}

impl CounterSet {
    pub(crate) fn from_parts(
        names: Vec<String>,
        parts: Vec<(Box<dyn ComponentSet>, Vec<usize>)>,
    ) -> Self {
        let parts = parts.into_iter().map(|(set, positions)| Part { set, positions }).collect();
        Self { names, parts }
    }

    /// Event names in the order `stop` reports values.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of a named event within [`CounterSet::stop`] output.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Bind the set to one CPU. Must precede `start` for per-CPU events;
    /// package-scoped events ignore the binding.
    pub fn attach_to_core(&mut self, core: CoreId) -> Result<(), CounterError> {
        for part in &mut self.parts {
            part.set.attach_to_core(core)?;
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), CounterError> {
        for part in &mut self.parts {
            part.set.start()?;
        }
        Ok(())
    }

    /// Cumulative counts since the most recent `start`, in `open` order.
    pub fn stop(&mut self) -> Result<Vec<u64>, CounterError> {
        let mut values = vec![0u64; self.names.len()];
        for part in &mut self.parts {
            let part_values = part.set.stop()?;
            for (value, &position) in part_values.iter().zip(&part.positions) {
                values[position] = *value;
            }
        }
        Ok(values)
    }
}

#[derive(Debug)]
enum EventKind {
    Cpu(Hardware),
    Energy(RaplKind),
}

fn classify(name: &str) -> Result<EventKind, CounterError> {
    match name {
        EVENT_INSTRUCTIONS => Ok(EventKind::Cpu(Hardware::INSTRUCTIONS)),
        EVENT_CYCLES => Ok(EventKind::Cpu(Hardware::CPU_CYCLES)),
        EVENT_CACHE_REFERENCES => Ok(EventKind::Cpu(Hardware::CACHE_REFERENCES)),
        EVENT_CACHE_MISSES => Ok(EventKind::Cpu(Hardware::CACHE_MISSES)),
        EVENT_BRANCHES => Ok(EventKind::Cpu(Hardware::BRANCH_INSTRUCTIONS)),
        EVENT_BRANCH_MISSES => Ok(EventKind::Cpu(Hardware::BRANCH_MISSES)),
        EVENT_ENERGY_PKG => Ok(EventKind::Energy(RaplKind::Package)),
        EVENT_ENERGY_CORES => Ok(EventKind::Energy(RaplKind::Cores)),
        EVENT_ENERGY_RAM => Ok(EventKind::Energy(RaplKind::Ram)),
        other => Err(CounterError::UnknownEvent(other.to_string())),
    }
}

/// Entry point to the counter hardware. Discovers the RAPL topology once
/// and hands out logical counter sets.
pub struct CounterProvider {
    rapl: RaplTopology,
}

impl CounterProvider {
    pub fn new() -> Result<Self, CounterError> {
        Ok(Self { rapl: RaplTopology::discover() })
    }

    /// Whether a DRAM energy domain exists on this machine.
    pub fn has_dram_domain(&self) -> bool {
        self.rapl.supports(RaplKind::Ram)
    }

    /// Allocate a logical set over the named events.
    ///
    /// # Errors
    /// `UnknownEvent` for an unrecognized name, `AllocationFailed` when a
    /// named energy domain is absent from the powercap tree.
    pub fn open(&self, event_names: &[String]) -> Result<CounterSet, CounterError> {
        let mut perf_events = Vec::new();
        let mut perf_positions = Vec::new();
        let mut rapl_events = Vec::new();
        let mut rapl_positions = Vec::new();

        for (index, name) in event_names.iter().enumerate() {
            match classify(name)? {
                EventKind::Cpu(kind) => {
                    perf_events.push((name.clone(), kind));
                    perf_positions.push(index);
                }
                EventKind::Energy(kind) => {
                    rapl_events.push((name.clone(), kind));
                    rapl_positions.push(index);
                }
            }
        }

        let mut parts: Vec<(Box<dyn ComponentSet>, Vec<usize>)> = Vec::new();
        if !perf_events.is_empty() {
            parts.push((Box::new(PerfSet::new(perf_events)), perf_positions));
        }
        if !rapl_events.is_empty() {
            parts.push((Box::new(self.rapl.open(&rapl_events)?), rapl_positions));
        }

        Ok(CounterSet::from_parts(event_names.to_vec(), parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSet {
        values: Vec<u64>,
        started: bool,
    }

    impl ComponentSet for FixedSet {
        fn attach_to_core(&mut self, _core: CoreId) -> Result<(), CounterError> {
            Ok(())
        }
        fn start(&mut self) -> Result<(), CounterError> {
            self.started = true;
            Ok(())
        }
        fn stop(&mut self) -> Result<Vec<u64>, CounterError> {
            if !self.started {
                return Err(CounterError::NotAttached);
            }
            self.started = false;
            Ok(self.values.clone())
        }
    }

    #[test]
    fn test_stop_merges_values_in_open_order() {
        // Two components interleaved: names [a, b, c] where a and c come
        // from the first part and b from the second.
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let parts: Vec<(Box<dyn ComponentSet>, Vec<usize>)> = vec![
            (Box::new(FixedSet { values: vec![10, 30], started: false }), vec![0, 2]),
            (Box::new(FixedSet { values: vec![20], started: false }), vec![1]),
        ];
        let mut set = CounterSet::from_parts(names, parts);

        set.start().unwrap();
        assert_eq!(set.stop().unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_index_of_matches_open_order() {
        let names = vec!["instructions".to_string(), "cycles".to_string()];
        let set = CounterSet::from_parts(names, Vec::new());
        assert_eq!(set.index_of("cycles"), Some(1));
        assert_eq!(set.index_of("energy-pkg"), None);
    }

    #[test]
    fn test_classify_rejects_unknown_event() {
        let err = classify("bogus").unwrap_err();
        assert!(matches!(err, CounterError::UnknownEvent(name) if name == "bogus"));
    }
}
