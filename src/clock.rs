//! The periodic sampling clock.
//!
//! A real-time interval timer delivers SIGALRM; the handler only sets an
//! atomic flag (it must stay async-signal-safe). The interesting effect is
//! the side channel: the signal interrupts the tracer's blocking `waitpid`,
//! which turns the `EINTR` plus a raised flag into a timer-expired event.
//! The handler is installed without `SA_RESTART` for exactly that reason.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::domain::TraceError;

static TIMER_EXPIRED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(_signal: libc::c_int) {
    TIMER_EXPIRED.store(true, Ordering::Relaxed);
}

pub struct SamplingClock {
    period_us: u64,
}

impl SamplingClock {
    /// Install the SIGALRM handler. The timer stays disarmed until
    /// [`SamplingClock::arm`].
    pub fn new(period_us: u64) -> Result<Self, TraceError> {
        let action =
            SigAction::new(SigHandler::Handler(on_alarm), SaFlags::empty(), SigSet::empty());
        unsafe { sigaction(Signal::SIGALRM, &action) }
            .map_err(TraceError::SignalSetupFailed)?;
        Ok(Self { period_us })
    }

    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    /// Start (or restart) periodic expiry. Ticks disarm before sampling and
    /// rearm after, so edges never overlap.
    pub fn arm(&self) {
        set_interval(self.period_us);
    }

    pub fn disarm(&self) {
        set_interval(0);
    }

    /// Consume the expiry edge. Returns true at most once per expiry.
    pub fn take_expired(&self) -> bool {
        TIMER_EXPIRED.swap(false, Ordering::Relaxed)
    }
}

fn set_interval(period_us: u64) {
    #[allow(clippy::cast_possible_wrap)]
    let tv = libc::timeval {
        tv_sec: (period_us / 1_000_000) as libc::time_t,
        tv_usec: (period_us % 1_000_000) as libc::suseconds_t,
    };
    let timer = libc::itimerval { it_interval: tv, it_value: tv };
    // setitimer only fails for invalid timer ids or unmapped pointers,
    // neither of which can happen here.
    unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut()) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_edge_is_consumed_once() {
        // The flag is process-global, so this single test owns the whole
        // set/consume cycle.
        while TIMER_EXPIRED.swap(false, Ordering::Relaxed) {}

        let clock = SamplingClock::new(1_000).unwrap();
        assert!(!clock.take_expired());

        on_alarm(libc::SIGALRM);
        assert!(clock.take_expired());
        assert!(!clock.take_expired());
    }
}
