//! Per-CPU hardware counters via the perf subsystem.
//!
//! Counters are created at attach time because the perf API fixes the
//! observed CPU when the counter is built. Each set watches every process
//! on its CPU, which requires CAP_PERFMON or a relaxed
//! `kernel.perf_event_paranoid`.

use perf_event::events::Hardware;
use perf_event::{Builder, Counter};

use super::provider::ComponentSet;
use crate::domain::{CoreId, CounterError};

struct PerfCounter {
    name: String,
    counter: Counter,
    baseline: u64,
}

pub struct PerfSet {
    events: Vec<(String, Hardware)>,
    counters: Vec<PerfCounter>,
}

impl PerfSet {
    pub fn new(events: Vec<(String, Hardware)>) -> Self {
        Self { events, counters: Vec::new() }
    }
}

impl ComponentSet for PerfSet {
    fn attach_to_core(&mut self, core: CoreId) -> Result<(), CounterError> {
        self.counters.clear();
        for (name, kind) in &self.events {
            let counter = Builder::new()
                .kind(*kind)
                .one_cpu(core.0)
                .any_pid()
                .build()
                .map_err(|source| CounterError::AttachRefused {
                    event: name.clone(),
                    core,
                    source,
                })?;
            self.counters.push(PerfCounter { name: name.clone(), counter, baseline: 0 });
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), CounterError> {
        if self.counters.is_empty() {
            return Err(CounterError::NotAttached);
        }
        for entry in &mut self.counters {
            entry.counter.enable().map_err(|source| CounterError::ReadFailed {
                operation: "enable",
                event: entry.name.clone(),
                source,
            })?;
            entry.baseline =
                entry.counter.read().map_err(|source| CounterError::ReadFailed {
                    operation: "read",
                    event: entry.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<u64>, CounterError> {
        let mut values = Vec::with_capacity(self.counters.len());
        for entry in &mut self.counters {
            entry.counter.disable().map_err(|source| CounterError::ReadFailed {
                operation: "disable",
                event: entry.name.clone(),
                source,
            })?;
            let current =
                entry.counter.read().map_err(|source| CounterError::ReadFailed {
                    operation: "read",
                    event: entry.name.clone(),
                    source,
                })?;
            // 64-bit counters never wrap in practice; a decrease means the
            // kernel handed us garbage.
            if current < entry.baseline {
                return Err(CounterError::Decreasing {
                    event: entry.name.clone(),
                    previous: entry.baseline,
                    current,
                });
            }
            values.push(current - entry.baseline);
        }
        Ok(values)
    }
}
