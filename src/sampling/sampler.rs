//! The main control loop.
//!
//! ```text
//! attach target, wait for its initial stop, enable clone/exit tracing
//! resume target, arm the clock
//! loop:
//!     event = tracer.wait_event()
//!     ThreadCreated  -> track child, resume parent and child
//!     ThreadExiting  -> untrack; empty set ends the run
//!     Signal         -> resume, passing the signal through
//!     TimerExpired   -> sample tick
//! ```
//!
//! A tick reads every counter delta before touching the attribution table,
//! so a failed read aborts the run without committing a partial sample.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{debug, trace, warn};
use nix::unistd::Pid;

use super::attribution::{AttributionTable, SampleStats};
use crate::clock::SamplingClock;
use crate::counters::{
    CounterProvider, CounterSet, EVENT_CYCLES, EVENT_ENERGY_CORES, EVENT_ENERGY_PKG,
    EVENT_ENERGY_RAM, EVENT_INSTRUCTIONS,
};
use crate::domain::CoreId;
use crate::model::{split_energy, EnergyModel};
use crate::tracer::{reinject_filter, ThreadState, TraceEvent, TrackedThread, Tracer};

/// Everything the sampler needs to know up front.
pub struct SamplerConfig {
    pub period_us: u64,
    pub physical_cores: usize,
    pub processor_model: Arc<EnergyModel>,
    pub uncore_model: Arc<EnergyModel>,
}

/// What a finished run hands to the report stage.
pub struct RunOutcome {
    pub table: AttributionTable,
    pub elapsed: Duration,
}

pub struct Sampler {
    config: SamplerConfig,
    tracer: Tracer,
    clock: SamplingClock,
    /// One per-core counter set, indexed by core id.
    core_sets: Vec<CounterSet>,
    global_set: CounterSet,
    /// Positions of each model's input metrics within the per-core sets.
    processor_inputs: Vec<usize>,
    uncore_inputs: Vec<usize>,
    instructions_index: usize,
    pkg_index: usize,
    pp0_index: usize,
    dram_index: Option<usize>,
    threads: BTreeMap<Pid, TrackedThread>,
    table: AttributionTable,
}

impl Sampler {
    pub fn new(
        config: SamplerConfig,
        provider: &CounterProvider,
        tracer: Tracer,
        clock: SamplingClock,
    ) -> Result<Self> {
        // Per-core events: the union of both models' inputs, plus the
        // instruction counter the attribution entries need.
        let mut events: Vec<String> = Vec::new();
        for name in config
            .processor_model
            .metric_names()
            .iter()
            .chain(config.uncore_model.metric_names())
        {
            if !events.iter().any(|e| e == name) {
                events.push(name.clone());
            }
        }
        if events.is_empty() {
            events.push(EVENT_INSTRUCTIONS.to_string());
            events.push(EVENT_CYCLES.to_string());
        } else if !events.iter().any(|e| e == EVENT_INSTRUCTIONS) {
            events.push(EVENT_INSTRUCTIONS.to_string());
        }

        let position = |name: &str| -> Result<usize> {
            events
                .iter()
                .position(|e| e == name)
                .ok_or_else(|| anyhow!("counter \"{name}\" missing from the per-core event set"))
        };
        let processor_inputs = config
            .processor_model
            .metric_names()
            .iter()
            .map(|name| position(name))
            .collect::<Result<Vec<usize>>>()?;
        let uncore_inputs = config
            .uncore_model
            .metric_names()
            .iter()
            .map(|name| position(name))
            .collect::<Result<Vec<usize>>>()?;
        let instructions_index = position(EVENT_INSTRUCTIONS)?;

        let mut core_sets = Vec::with_capacity(config.physical_cores);
        for core in 0..config.physical_cores {
            let mut set = provider
                .open(&events)
                .with_context(|| format!("failed to open counter set for core {core}"))?;
            set.attach_to_core(CoreId(core))?;
            set.start()?;
            core_sets.push(set);
        }

        let mut global_events = vec![EVENT_ENERGY_PKG.to_string(), EVENT_ENERGY_CORES.to_string()];
        if provider.has_dram_domain() {
            global_events.push(EVENT_ENERGY_RAM.to_string());
        } else {
            warn!("no DRAM energy domain on this machine; DRAM column will be zero");
        }
        let mut global_set =
            provider.open(&global_events).context("failed to open the global energy set")?;
        global_set.start()?;

        let pkg_index = global_set
            .index_of(EVENT_ENERGY_PKG)
            .ok_or_else(|| anyhow!("package energy event missing from the global set"))?;
        let pp0_index = global_set
            .index_of(EVENT_ENERGY_CORES)
            .ok_or_else(|| anyhow!("power-plane-0 energy event missing from the global set"))?;
        let dram_index = global_set.index_of(EVENT_ENERGY_RAM);

        Ok(Self {
            config,
            tracer,
            clock,
            core_sets,
            global_set,
            processor_inputs,
            uncore_inputs,
            instructions_index,
            pkg_index,
            pp0_index,
            dram_index,
            threads: BTreeMap::new(),
            table: AttributionTable::new(),
        })
    }

    /// Run the target to completion, sampling on every clock tick.
    pub fn run(mut self) -> Result<RunOutcome> {
        let root = self.tracer.root();
        let mut thread = TrackedThread::new(root);
        thread.state = ThreadState::Traced;
        self.threads.insert(root, thread);

        let started = Instant::now();
        self.tracer.resume(root, None)?;
        self.clock.arm();

        loop {
            match self.tracer.wait_event(&self.clock)? {
                TraceEvent::ThreadCreated { parent, child } => {
                    debug!("thread {child} created by {parent}");
                    self.threads.entry(child).or_insert_with(|| TrackedThread::new(child));
                    self.tracer.resume(parent, None)?;
                    self.tracer.resume(child, None)?;
                }
                TraceEvent::ThreadExiting { tid } => {
                    debug!("thread {tid} exiting ({} left)", self.threads.len().saturating_sub(1));
                    self.threads.remove(&tid);
                    self.tracer.resume(tid, None)?;
                    if self.threads.is_empty() {
                        break;
                    }
                }
                TraceEvent::Signal { tid, signal } => {
                    trace!("thread {tid} stopped by {signal}");
                    if let Some(thread) = self.threads.get_mut(&tid) {
                        thread.state = ThreadState::Traced;
                    }
                    self.tracer.resume(tid, reinject_filter(signal))?;
                }
                TraceEvent::TimerExpired => self.sample_tick()?,
                TraceEvent::AllExited => break,
            }
        }

        self.clock.disarm();
        Ok(RunOutcome { table: self.table, elapsed: started.elapsed() })
    }

    /// One atomic sample: stop the world, read, attribute, resume.
    fn sample_tick(&mut self) -> Result<()> {
        self.clock.disarm();

        let tids: Vec<Pid> = self.threads.keys().copied().collect();
        let outcome = self.tracer.stop_all(&tids)?;
        for tid in &outcome.sampleable {
            if let Some(thread) = self.threads.get_mut(tid) {
                thread.state = ThreadState::Stopped;
            }
        }

        // Placement of every quiescent thread, before any counter is read.
        let mut placements = Vec::with_capacity(outcome.sampleable.len());
        for tid in &outcome.sampleable {
            let Some(thread) = self.threads.get_mut(tid) else { continue };
            placements.push((*tid, thread.current_core()?));
        }

        // All counter deltas are read before the table is touched; a
        // failure here aborts the run with the table uncommitted.
        let mut core_values = Vec::with_capacity(self.core_sets.len());
        for set in &mut self.core_sets {
            let values = set.stop()?;
            set.start()?;
            core_values.push(values);
        }
        let global_values = self.global_set.stop()?;
        self.global_set.start()?;

        #[allow(clippy::cast_precision_loss)]
        let pkg = global_values[self.pkg_index] as f64;
        #[allow(clippy::cast_precision_loss)]
        let pp0 = global_values[self.pp0_index] as f64;
        #[allow(clippy::cast_precision_loss)]
        let dram = self.dram_index.map_or(0.0, |i| global_values[i] as f64);
        let uncore = (pkg - pp0).max(0.0);

        #[allow(clippy::cast_precision_loss)]
        let model_inputs = |values: &[u64], indices: &[usize]| -> Vec<f64> {
            indices.iter().map(|&i| values[i] as f64).collect()
        };
        let processor_scores: Vec<f64> = core_values
            .iter()
            .map(|values| {
                self.config
                    .processor_model
                    .evaluate(&model_inputs(values, &self.processor_inputs))
            })
            .collect();
        let uncore_scores: Vec<f64> = core_values
            .iter()
            .map(|values| {
                self.config.uncore_model.evaluate(&model_inputs(values, &self.uncore_inputs))
            })
            .collect();

        let processor_shares = split_energy(pp0, &processor_scores);
        let uncore_shares = split_energy(uncore, &uncore_scores);
        // DRAM splits evenly across cores.
        #[allow(clippy::cast_precision_loss)]
        let dram_shares =
            vec![dram / self.config.physical_cores as f64; self.config.physical_cores];

        let instructions: Vec<u64> =
            core_values.iter().map(|values| values[self.instructions_index]).collect();

        for (tid, core) in placements {
            let Some(delta) = tick_delta(
                &processor_shares,
                &uncore_shares,
                &dram_shares,
                &instructions,
                self.config.period_us,
                core,
            ) else {
                trace!("thread {tid} seen on {core}, outside the physical range; discarded");
                continue;
            };
            let ip = self.tracer.read_ip(tid)?;
            self.table.record(core, ip, delta);
        }

        self.tracer.resume_all(&outcome)?;
        for tid in &outcome.sampleable {
            if let Some(thread) = self.threads.get_mut(tid) {
                thread.state = ThreadState::Traced;
            }
        }

        self.clock.arm();
        Ok(())
    }
}

/// Build the sample delta for a thread observed on `core`.
///
/// Returns `None` when the placement falls outside the physical-core
/// range: hyper-thread siblings are discarded rather than merged. When
/// two threads genuinely share a core, each one receives the core's full
/// delta for the tick.
fn tick_delta(
    processor_shares: &[f64],
    uncore_shares: &[f64],
    dram_shares: &[f64],
    instructions: &[u64],
    period_us: u64,
    core: CoreId,
) -> Option<SampleStats> {
    let index = core.0;
    if index >= processor_shares.len() {
        return None;
    }
    Some(SampleStats {
        processor_energy: processor_shares[index],
        uncore_energy: uncore_shares[index],
        dram_energy: dram_shares[index],
        time_us: period_us,
        instructions: instructions[index],
    })
}
