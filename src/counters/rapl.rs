//! RAPL energy domains via the powercap sysfs tree.
//!
//! Each zone under `/sys/class/powercap` exposes a cumulative `energy_uj`
//! counter and its wrap bound `max_energy_range_uj`. Only the first
//! package and its child domains are used; values are microjoules.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::provider::ComponentSet;
use crate::domain::{CoreId, CounterError};

const POWERCAP_ROOT: &str = "/sys/class/powercap";

/// Energy domains this provider recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaplKind {
    /// Whole-socket energy (`package-0`).
    Package,
    /// Power plane 0, the cores (`core`).
    Cores,
    /// Memory controller plane (`dram`).
    Ram,
}

#[derive(Debug, Clone)]
struct RaplDomain {
    kind: RaplKind,
    energy_path: PathBuf,
    /// Wrap modulus: one past the largest value `energy_uj` can report.
    modulus: u64,
}

/// The set of energy domains present on this machine.
pub struct RaplTopology {
    domains: Vec<RaplDomain>,
}

impl RaplTopology {
    /// Scan the powercap tree. A machine without RAPL yields an empty
    /// topology; per-CPU counters remain usable.
    pub fn discover() -> Self {
        match Self::discover_in(Path::new(POWERCAP_ROOT)) {
            Ok(topology) => topology,
            Err(err) => {
                warn!("no RAPL domains: failed to scan {POWERCAP_ROOT}: {err}");
                Self { domains: Vec::new() }
            }
        }
    }

    fn discover_in(root: &Path) -> io::Result<Self> {
        let mut domains = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let zone = entry.file_name().to_string_lossy().into_owned();
            // First package only; other sockets and psys are out of scope.
            if zone != "intel-rapl:0" && !zone.starts_with("intel-rapl:0:") {
                continue;
            }
            let path = entry.path();
            let name = match fs::read_to_string(path.join("name")) {
                Ok(name) => name.trim().to_string(),
                Err(_) => continue,
            };
            let kind = if name.starts_with("package") {
                RaplKind::Package
            } else if name == "core" {
                RaplKind::Cores
            } else if name == "dram" {
                RaplKind::Ram
            } else {
                continue;
            };
            if domains.iter().any(|d: &RaplDomain| d.kind == kind) {
                continue;
            }
            let max: u64 = fs::read_to_string(path.join("max_energy_range_uj"))?
                .trim()
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            debug!("RAPL domain {name} at {} (max {max} uJ)", path.display());
            domains.push(RaplDomain {
                kind,
                energy_path: path.join("energy_uj"),
                modulus: max + 1,
            });
        }
        Ok(Self { domains })
    }

    pub fn supports(&self, kind: RaplKind) -> bool {
        self.domains.iter().any(|d| d.kind == kind)
    }

    /// Build a component set over the named domains.
    pub fn open(&self, events: &[(String, RaplKind)]) -> Result<RaplSet, CounterError> {
        let mut readers = Vec::with_capacity(events.len());
        for (name, kind) in events {
            let domain = self.domains.iter().find(|d| d.kind == *kind).ok_or_else(|| {
                CounterError::AllocationFailed {
                    event: name.clone(),
                    source: io::Error::new(
                        io::ErrorKind::NotFound,
                        "no matching powercap domain",
                    ),
                }
            })?;
            readers.push(RaplReader {
                event: name.clone(),
                energy_path: domain.energy_path.clone(),
                modulus: domain.modulus,
                baseline: 0,
            });
        }
        Ok(RaplSet { readers })
    }
}

#[derive(Debug)]
struct RaplReader {
    event: String,
    energy_path: PathBuf,
    modulus: u64,
    baseline: u64,
}

impl RaplReader {
    fn read_raw(&self) -> Result<u64, CounterError> {
        let text = fs::read_to_string(&self.energy_path).map_err(|source| {
            CounterError::ReadFailed { operation: "read", event: self.event.clone(), source }
        })?;
        text.trim().parse().map_err(|err| CounterError::ReadFailed {
            operation: "parse",
            event: self.event.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, err),
        })
    }
}

#[derive(Debug)]
pub struct RaplSet {
    readers: Vec<RaplReader>,
}

impl ComponentSet for RaplSet {
    fn attach_to_core(&mut self, _core: CoreId) -> Result<(), CounterError> {
        // Energy domains are package-scoped; there is nothing narrower to
        // bind to.
        Ok(())
    }

    fn start(&mut self) -> Result<(), CounterError> {
        for reader in &mut self.readers {
            reader.baseline = reader.read_raw()?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<u64>, CounterError> {
        let mut values = Vec::with_capacity(self.readers.len());
        for reader in &self.readers {
            let current = reader.read_raw()?;
            values.push(wrapped_delta(reader.baseline, current, reader.modulus));
        }
        Ok(values)
    }
}

/// Delta between two raw reads of a counter that wraps at `modulus`.
pub fn wrapped_delta(previous: u64, current: u64, modulus: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        (modulus - previous) + current
    }
}
