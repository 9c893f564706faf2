//! Structured error types for eaudit
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every fatal error names the operation that failed and carries the
//! underlying OS or parse error.

use super::types::CoreId;
use nix::errno::Errno;
use nix::unistd::Pid;
use std::path::PathBuf;
use thiserror::Error;

/// Rejected before any target process is created.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("sample period {requested} us is below the {floor} us floor")]
    PeriodTooShort { requested: u64, floor: u64 },

    #[error("no target executable given")]
    MissingTarget,

    #[error("failed to read model file {}: {source}", path.display())]
    ModelUnreadable { path: PathBuf, source: std::io::Error },

    #[error("malformed model file {}: {source}", path.display())]
    MalformedModel { path: PathBuf, source: ModelError },
}

/// Hardware-counter provider failures.
#[derive(Error, Debug)]
pub enum CounterError {
    #[error("unknown counter event \"{0}\"")]
    UnknownEvent(String),

    #[error("failed to allocate counter \"{event}\": {source}")]
    AllocationFailed { event: String, source: std::io::Error },

    #[error("failed to attach counter \"{event}\" to {core}: {source}")]
    AttachRefused { event: String, core: CoreId, source: std::io::Error },

    #[error("counter set started before attach_to_core")]
    NotAttached,

    #[error("failed to {operation} counter \"{event}\": {source}")]
    ReadFailed { operation: &'static str, event: String, source: std::io::Error },

    #[error("counter \"{event}\" went backwards: {previous} -> {current}")]
    Decreasing { event: String, previous: u64, current: u64 },
}

/// Process-tracing failures. All of these are fatal; the exit-on-kill
/// ptrace option guarantees the target does not outlive the profiler.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to spawn target \"{command}\": {source}")]
    SpawnFailed { command: String, source: Errno },

    #[error("target \"{command}\" did not reach its initial stop")]
    NoInitialStop { command: String },

    #[error("failed to set ptrace options on thread {tid}: {source}")]
    OptionsFailed { tid: Pid, source: Errno },

    #[error("wait for thread events failed: {0}")]
    WaitFailed(Errno),

    #[error("failed to stop thread {tid}: {source}")]
    StopFailed { tid: Pid, source: Errno },

    #[error("failed to resume thread {tid}: {source}")]
    ResumeFailed { tid: Pid, source: Errno },

    #[error("failed to read registers of thread {tid}: {source}")]
    RegisterReadFailed { tid: Pid, source: Errno },

    #[error("failed to read clone payload from thread {tid}: {source}")]
    CloneEventFailed { tid: Pid, source: Errno },

    #[error("failed to read /proc/{tid}/stat: {source}")]
    ProcStatUnreadable { tid: Pid, source: std::io::Error },

    #[error("malformed /proc/{tid}/stat")]
    ProcStatMalformed { tid: Pid },

    #[error("failed to install SIGALRM handler: {0}")]
    SignalSetupFailed(Errno),
}

/// Regression-model load failures. The evaluator itself cannot fail once
/// a model has loaded.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to parse model: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("model has no clusters")]
    NoClusters,

    #[error("rotation matrix must have one row per input metric ({metrics}), got {rows}")]
    RotationRowMismatch { metrics: usize, rows: usize },

    #[error("rotation matrix rows have inconsistent lengths")]
    RotationRagged,

    #[error("{field} must have length {expected}, got {actual}")]
    LengthMismatch { field: &'static str, expected: usize, actual: usize },

    #[error("basis function index {index} out of range for {dims} projected dimensions")]
    IndexOutOfRange { index: usize, dims: usize },
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_error_display() {
        let err = ConfigError::PeriodTooShort { requested: 100, floor: 500 };
        assert_eq!(err.to_string(), "sample period 100 us is below the 500 us floor");
    }

    #[test]
    fn test_unknown_event_display() {
        let err = CounterError::UnknownEvent("bogus-event".to_string());
        assert!(err.to_string().contains("bogus-event"));
    }

    #[test]
    fn test_decreasing_counter_display() {
        let err = CounterError::Decreasing {
            event: "instructions".to_string(),
            previous: 100,
            current: 50,
        };
        assert!(err.to_string().contains("instructions"));
        assert!(err.to_string().contains("100 -> 50"));
    }

    #[test]
    fn test_trace_error_carries_tid() {
        let err = TraceError::RegisterReadFailed { tid: Pid::from_raw(4321), source: Errno::ESRCH };
        assert!(err.to_string().contains("4321"));
    }
}
