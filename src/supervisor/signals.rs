//! Signal dispositions used while a lock is being acquired or held.
//!
//! Every guard here restores the dispositions it replaced when dropped.

use crate::error::{LockError, Result};
use crate::lockfile::Interrupt;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, raise, sigaction};
use nix::unistd::alarm;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Signals that would normally end the process.
pub const TERMINATION: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGHUP,
    Signal::SIGTERM,
];

static CAUGHT: AtomicI32 = AtomicI32::new(0);
static ALARM_FIRED: AtomicBool = AtomicBool::new(false);
static ALARM_SECS: AtomicU32 = AtomicU32::new(0);
static ALARM_WAITER: AtomicUsize = AtomicUsize::new(0);

extern "C" fn record_signal(signal: libc::c_int) {
    CAUGHT.store(signal, Ordering::SeqCst);
}

extern "C" fn record_alarm(signal: libc::c_int) {
    // The kernel may pick any thread; only the waiting one gets EINTR.
    let waiter = ALARM_WAITER.load(Ordering::SeqCst);
    let me = unsafe { libc::pthread_self() } as usize;
    if waiter != 0 && waiter != me {
        unsafe {
            libc::pthread_kill(waiter as libc::pthread_t, signal);
        }
        return;
    }

    ALARM_FIRED.store(true, Ordering::SeqCst);
    // Re-arming here keeps the period even if the flag is noticed late.
    unsafe {
        libc::alarm(ALARM_SECS.load(Ordering::SeqCst));
    }
}

/// Dispositions replaced by a guard, restored on drop.
struct Replaced(Vec<(Signal, SigAction)>);

impl Replaced {
    fn install(signals: &[Signal], handler: SigHandler) -> Result<Self> {
        // No SA_RESTART: a blocking wait must return EINTR.
        let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
        let mut replaced = Replaced(Vec::with_capacity(signals.len()));
        for &signal in signals {
            // SAFETY: the handlers only touch atomics, alarm(2) and pthread_kill(3).
            let previous = unsafe { sigaction(signal, &action) }
                .map_err(|e| LockError::fatal(format!("sigaction({})", signal), e.into()))?;
            replaced.0.push((signal, previous));
        }
        Ok(replaced)
    }
}

impl Drop for Replaced {
    fn drop(&mut self) {
        for (signal, previous) in self.0.drain(..).rev() {
            // SAFETY: reinstates a disposition that was in effect before.
            if let Err(e) = unsafe { sigaction(signal, &previous) } {
                tracing::warn!(%signal, error = %e, "failed to restore signal disposition");
            }
        }
    }
}

/// Turns termination signals into a cancellation request while a lock
/// attempt may leave files behind.
pub struct CancelGuard {
    _replaced: Replaced,
}

impl CancelGuard {
    pub fn install() -> Result<Self> {
        CAUGHT.store(0, Ordering::SeqCst);
        let replaced = Replaced::install(&TERMINATION, SigHandler::Handler(record_signal))?;
        Ok(Self {
            _replaced: replaced,
        })
    }

    /// The last termination signal received, if any.
    pub fn caught(&self) -> Option<i32> {
        match CAUGHT.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }
}

impl Interrupt for CancelGuard {
    fn pending(&self) -> Option<i32> {
        self.caught()
    }
}

/// Ignores termination signals in the supervisor while its child runs.
pub struct IgnoredSignals {
    _replaced: Replaced,
}

impl IgnoredSignals {
    pub fn install() -> Result<Self> {
        Ok(Self {
            _replaced: Replaced::install(&TERMINATION, SigHandler::SigIgn)?,
        })
    }
}

/// A periodic SIGALRM that interrupts blocking waits of the thread that
/// started it.
pub struct HeartbeatTimer {
    _replaced: Replaced,
}

impl HeartbeatTimer {
    pub fn start(interval: Duration) -> Result<Self> {
        let secs = u32::try_from(interval.as_secs()).unwrap_or(u32::MAX).max(1);
        ALARM_FIRED.store(false, Ordering::SeqCst);
        ALARM_SECS.store(secs, Ordering::SeqCst);
        ALARM_WAITER.store(unsafe { libc::pthread_self() } as usize, Ordering::SeqCst);
        let replaced = Replaced::install(&[Signal::SIGALRM], SigHandler::Handler(record_alarm))?;
        alarm::set(secs);
        Ok(Self {
            _replaced: replaced,
        })
    }

    /// Whether the timer expired since the last call.
    pub fn take_fired(&self) -> bool {
        ALARM_FIRED.swap(false, Ordering::SeqCst)
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        ALARM_SECS.store(0, Ordering::SeqCst);
        alarm::cancel();
        ALARM_WAITER.store(0, Ordering::SeqCst);
    }
}

/// Die from `signal` the way we would have without catching it.
pub fn reraise(signal: i32) -> Result<()> {
    let signal = Signal::try_from(signal)
        .map_err(|e| LockError::fatal(format!("signal {}", signal), e.into()))?;
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: resetting to the default disposition installs no handler.
    unsafe { sigaction(signal, &default) }
        .map_err(|e| LockError::fatal(format!("sigaction({})", signal), e.into()))?;
    raise(signal).map_err(|e| LockError::fatal(format!("raise({})", signal), e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(signals)]
    fn cancel_guard_records_a_termination_signal() {
        let guard = CancelGuard::install().unwrap();
        assert_eq!(guard.pending(), None);

        raise(Signal::SIGHUP).unwrap();
        assert_eq!(guard.pending(), Some(libc::SIGHUP));
    }

    #[test]
    #[serial(signals)]
    fn dispositions_are_restored_on_drop() {
        let before = unsafe {
            sigaction(
                Signal::SIGQUIT,
                &SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty()),
            )
        }
        .unwrap();
        unsafe { sigaction(Signal::SIGQUIT, &before) }.unwrap();

        {
            let _ignored = IgnoredSignals::install().unwrap();
            // Ignored: the test process survives.
            raise(Signal::SIGQUIT).unwrap();
        }

        let after = unsafe { sigaction(Signal::SIGQUIT, &before) }.unwrap();
        assert_eq!(after.handler(), before.handler());
    }

    #[test]
    #[serial(signals)]
    fn heartbeat_timer_fires() {
        let timer = HeartbeatTimer::start(Duration::from_secs(1)).unwrap();
        assert!(!timer.take_fired());
        std::thread::sleep(Duration::from_millis(1500));
        assert!(timer.take_fired());
        assert!(!timer.take_fired());
    }
}
