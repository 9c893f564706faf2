//! The ptrace-based thread tracer.
//!
//! Owns the target process tree. The target is forked with `TRACEME`, stops
//! itself, and execs; clone- and exit-tracing options then turn every
//! thread creation and exit into a wait event. Between sample ticks the
//! tracer blocks in `waitpid`; the sampling clock's SIGALRM interrupts the
//! wait, which surfaces as [`TraceEvent::TimerExpired`].
//!
//! ## Per-thread lifecycle
//!
//! ```text
//! CREATED ──first stop──▶ TRACED ◀──stop_all/resume_all──▶ STOPPED
//!    │                      │
//!    └──────exit event──────┴─▶ EXITING ──▶ removed from the tracked set
//! ```
//!
//! `stop_all` brings every tracked thread to quiescence before a tick and
//! must not lose events: clone/exit notifications that surface while
//! threads are being stopped are queued and handed out by `wait_event`
//! after the tick resumes the target.

pub mod proc_stat;

use std::collections::VecDeque;
use std::ffi::CString;

use log::debug;
use nix::errno::Errno;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::clock::SamplingClock;
use crate::domain::{CoreId, TraceError};

/// How many ticks a thread's core id is re-read from the kernel before the
/// cached value is trusted. Threads pinned by the workload stop moving
/// almost immediately.
pub const CORE_CACHE_READS: u8 = 5;

/// Lifecycle state of a tracked thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Clone observed, first stop not yet seen.
    Created,
    /// Running between ticks.
    Traced,
    /// Quiescent inside a tick.
    Stopped,
    /// Exit event consumed; about to leave the tracked set.
    Exiting,
}

/// A thread of the target and its cached scheduling placement.
#[derive(Debug)]
pub struct TrackedThread {
    pub tid: Pid,
    pub state: ThreadState,
    last_core: Option<CoreId>,
    core_reads_left: u8,
}

impl TrackedThread {
    pub fn new(tid: Pid) -> Self {
        Self { tid, state: ThreadState::Created, last_core: None, core_reads_left: CORE_CACHE_READS }
    }

    /// Core the thread last ran on, re-read from the kernel until the
    /// cache budget is spent.
    pub fn current_core(&mut self) -> Result<CoreId, TraceError> {
        if self.core_reads_left == 0 {
            if let Some(core) = self.last_core {
                return Ok(core);
            }
        }
        let core = proc_stat::core_of(self.tid)?;
        self.last_core = Some(core);
        self.core_reads_left = self.core_reads_left.saturating_sub(1);
        Ok(core)
    }
}

/// An observation from the target process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    ThreadCreated { parent: Pid, child: Pid },
    ThreadExiting { tid: Pid },
    Signal { tid: Pid, signal: Signal },
    TimerExpired,
    AllExited,
}

/// Threads brought to quiescence by [`Tracer::stop_all`].
#[derive(Debug, Default)]
pub struct StopOutcome {
    /// Stopped at a plain signal stop: registers and `/proc` placement are
    /// safe to sample.
    pub sampleable: Vec<Pid>,
    /// Everything that must be resumed, with the signal to re-inject.
    resume: Vec<(Pid, Option<Signal>)>,
}

fn trace_options() -> Options {
    Options::PTRACE_O_EXITKILL | Options::PTRACE_O_TRACECLONE | Options::PTRACE_O_TRACEEXIT
}

/// The signal to hand back on resume. Stops and traps belong to the
/// tracing machinery; everything else passes through to the target.
pub fn reinject_filter(signal: Signal) -> Option<Signal> {
    match signal {
        Signal::SIGSTOP | Signal::SIGTRAP => None,
        other => Some(other),
    }
}

pub struct Tracer {
    root: Pid,
    pending: VecDeque<TraceEvent>,
}

impl Tracer {
    /// Fork and exec the target, leaving it stopped with clone/exit
    /// tracing enabled. The child inherits the profiler's environment.
    pub fn spawn(command: &[String]) -> Result<Self, TraceError> {
        let program = CString::new(command[0].as_str())
            .map_err(|_| TraceError::SpawnFailed { command: command[0].clone(), source: Errno::EINVAL })?;
        let args: Vec<CString> = command
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<_, _>>()
            .map_err(|_| TraceError::SpawnFailed { command: command[0].clone(), source: Errno::EINVAL })?;

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // No return path from here: announce tracing, stop, exec.
                if ptrace::traceme().is_err() {
                    unsafe { libc::_exit(126) };
                }
                let _ = signal::raise(Signal::SIGSTOP);
                let _ = nix::unistd::execvp(&program, &args);
                eprintln!("eaudit: failed to exec {}", command[0]);
                unsafe { libc::_exit(127) };
            }
            Ok(ForkResult::Parent { child }) => {
                match waitpid(child, Some(WaitPidFlag::__WALL)) {
                    Ok(WaitStatus::Stopped(_, _)) => {}
                    Ok(_) => {
                        return Err(TraceError::NoInitialStop { command: command[0].clone() })
                    }
                    Err(source) => return Err(TraceError::WaitFailed(source)),
                }
                ptrace::setoptions(child, trace_options())
                    .map_err(|source| TraceError::OptionsFailed { tid: child, source })?;
                debug!("target {child} spawned and traced");
                Ok(Self { root: child, pending: VecDeque::new() })
            }
            Err(source) => Err(TraceError::SpawnFailed { command: command[0].clone(), source }),
        }
    }

    pub fn root(&self) -> Pid {
        self.root
    }

    /// Let one thread run, optionally delivering a signal.
    ///
    /// A thread that died between the event and the resume is not an
    /// error: resumption is idempotent from the caller's view.
    pub fn resume(&self, tid: Pid, signal: Option<Signal>) -> Result<(), TraceError> {
        match ptrace::cont(tid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(TraceError::ResumeFailed { tid, source }),
        }
    }

    /// Block until the target produces an event or the sampling clock
    /// fires. Queued events from a previous `stop_all` drain first.
    pub fn wait_event(&mut self, clock: &SamplingClock) -> Result<TraceEvent, TraceError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            match waitpid(None, Some(WaitPidFlag::__WALL)) {
                Ok(status) => {
                    if let Some(event) = self.classify(status)? {
                        return Ok(event);
                    }
                }
                Err(Errno::EINTR) => {
                    if clock.take_expired() {
                        return Ok(TraceEvent::TimerExpired);
                    }
                }
                Err(Errno::ECHILD) => return Ok(TraceEvent::AllExited),
                Err(source) => return Err(TraceError::WaitFailed(source)),
            }
        }
    }

    fn classify(&mut self, status: WaitStatus) -> Result<Option<TraceEvent>, TraceError> {
        match status {
            WaitStatus::PtraceEvent(tid, _, event) if event == libc::PTRACE_EVENT_CLONE => {
                let child = self.clone_child(tid)?;
                Ok(Some(TraceEvent::ThreadCreated { parent: tid, child }))
            }
            WaitStatus::PtraceEvent(tid, _, event) if event == libc::PTRACE_EVENT_EXIT => {
                Ok(Some(TraceEvent::ThreadExiting { tid }))
            }
            WaitStatus::PtraceEvent(tid, _, _) => {
                // Event we did not subscribe to; let the thread continue.
                self.resume(tid, None)?;
                Ok(None)
            }
            WaitStatus::Stopped(tid, signal) => Ok(Some(TraceEvent::Signal { tid, signal })),
            // Terminal statuses arrive after the exit event was already
            // consumed; the thread has left the tracked set by now.
            WaitStatus::Exited(_, _) | WaitStatus::Signaled(_, _, _) => Ok(None),
            _ => Ok(None),
        }
    }

    fn clone_child(&self, tid: Pid) -> Result<Pid, TraceError> {
        let raw = ptrace::getevent(tid)
            .map_err(|source| TraceError::CloneEventFailed { tid, source })?;
        #[allow(clippy::cast_possible_truncation)]
        let child = raw as libc::pid_t;
        Ok(Pid::from_raw(child))
    }

    /// Bring every listed thread to quiescence.
    ///
    /// Threads stopped at a clone event are still sampleable (they are
    /// stopped at a known instruction); threads caught at their exit event
    /// are not sampled but are resumed so they can finish dying. Either
    /// way the lifecycle notification is queued for after the tick.
    pub fn stop_all(&mut self, tids: &[Pid]) -> Result<StopOutcome, TraceError> {
        let mut outcome = StopOutcome::default();
        for &tid in tids {
            match signal::kill(tid, Signal::SIGSTOP) {
                Ok(()) => {}
                Err(Errno::ESRCH) => {
                    self.pending.push_back(TraceEvent::ThreadExiting { tid });
                    continue;
                }
                Err(source) => return Err(TraceError::StopFailed { tid, source }),
            }
            loop {
                match waitpid(tid, Some(WaitPidFlag::__WALL)) {
                    Ok(WaitStatus::Stopped(_, signal)) => {
                        outcome.sampleable.push(tid);
                        outcome.resume.push((tid, reinject_filter(signal)));
                        break;
                    }
                    Ok(WaitStatus::PtraceEvent(pid, _, event))
                        if event == libc::PTRACE_EVENT_CLONE =>
                    {
                        let child = self.clone_child(pid)?;
                        self.pending.push_back(TraceEvent::ThreadCreated { parent: pid, child });
                        outcome.sampleable.push(tid);
                        outcome.resume.push((tid, None));
                        break;
                    }
                    Ok(WaitStatus::PtraceEvent(pid, _, event))
                        if event == libc::PTRACE_EVENT_EXIT =>
                    {
                        self.pending.push_back(TraceEvent::ThreadExiting { tid: pid });
                        outcome.resume.push((tid, None));
                        break;
                    }
                    Ok(WaitStatus::PtraceEvent(_, _, _)) => {
                        outcome.resume.push((tid, None));
                        break;
                    }
                    Ok(WaitStatus::Exited(_, _)) | Ok(WaitStatus::Signaled(_, _, _)) => {
                        self.pending.push_back(TraceEvent::ThreadExiting { tid });
                        break;
                    }
                    Ok(_) => {}
                    // A timer edge inside the tick changes nothing; the
                    // tick being serviced is the one it asked for.
                    Err(Errno::EINTR) => {}
                    Err(Errno::ECHILD) => {
                        self.pending.push_back(TraceEvent::ThreadExiting { tid });
                        break;
                    }
                    Err(source) => return Err(TraceError::WaitFailed(source)),
                }
            }
        }
        Ok(outcome)
    }

    /// Resume everything `stop_all` stopped, re-injecting deferred
    /// signals. Idempotent: threads that finished exiting are skipped.
    pub fn resume_all(&self, outcome: &StopOutcome) -> Result<(), TraceError> {
        for &(tid, signal) in &outcome.resume {
            self.resume(tid, signal)?;
        }
        Ok(())
    }

    /// Architectural instruction pointer of a stopped thread.
    pub fn read_ip(&self, tid: Pid) -> Result<u64, TraceError> {
        let regs = ptrace::getregs(tid)
            .map_err(|source| TraceError::RegisterReadFailed { tid, source })?;
        Ok(regs.rip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reinject_filter_suppresses_tracing_signals() {
        assert_eq!(reinject_filter(Signal::SIGSTOP), None);
        assert_eq!(reinject_filter(Signal::SIGTRAP), None);
        assert_eq!(reinject_filter(Signal::SIGUSR1), Some(Signal::SIGUSR1));
        assert_eq!(reinject_filter(Signal::SIGTERM), Some(Signal::SIGTERM));
    }

    #[test]
    fn test_core_cache_trusts_after_budget() {
        // Use our own tid so /proc lookups succeed without a target.
        #[allow(clippy::cast_possible_wrap)]
        let tid = Pid::from_raw(unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t);
        let mut thread = TrackedThread::new(tid);

        for _ in 0..CORE_CACHE_READS {
            thread.current_core().unwrap();
        }
        assert_eq!(thread.core_reads_left, 0);
        let cached = thread.last_core;
        // Budget exhausted: the cached placement is returned as-is.
        assert_eq!(thread.current_core().ok(), cached);
    }

    #[test]
    fn test_new_thread_starts_created_with_full_budget() {
        let thread = TrackedThread::new(Pid::from_raw(1));
        assert_eq!(thread.state, ThreadState::Created);
        assert_eq!(thread.core_reads_left, CORE_CACHE_READS);
        assert!(thread.last_core.is_none());
    }
}
