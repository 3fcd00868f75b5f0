use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;
use tracing::warn;
use wasmtime::Engine;

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const FIRED: u8 = 2;

/// The completion flag shared between a store and its watchdog.
///
/// Exactly one transition out of `RUNNING` happens: either the call completes first or the
/// watchdog fires first. Once fired, the call is terminated regardless of what it returns.
#[derive(Clone, Debug, Default)]
pub(crate) struct DeadlineFlag(Arc<AtomicU8>);

impl DeadlineFlag {
    /// Returns `true` once the watchdog has fired.
    pub(crate) fn fired(&self) -> bool {
        self.0.load(Ordering::Acquire) == FIRED
    }

    fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire) == RUNNING
    }

    fn try_fire(&self) -> bool {
        self.0.compare_exchange(RUNNING, FIRED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn try_complete(&self) -> bool {
        self.0.compare_exchange(RUNNING, COMPLETED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

/// A deadline armed on the timer thread.
struct Deadline {
    at: Instant,
    limit: Duration,
    flag: DeadlineFlag,
    engine: Engine,
}

enum TimerCommand {
    Arm(Deadline),
    /// Drops deadlines whose call has completed.
    Prune,
}

/// The process-wide timer thread serving every watchdog.
static TIMER: Lazy<mpsc::Sender<TimerCommand>> = Lazy::new(|| {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("sandbox-watchdog".to_string())
        .spawn(move || run_timer(&rx))
        .map_err(|err| warn!(%err, "Failed to spawn the watchdog timer thread"))
        .ok();
    tx
});

fn run_timer(rx: &mpsc::Receiver<TimerCommand>) {
    let mut deadlines: Vec<Deadline> = Vec::new();
    loop {
        let received = match deadlines.iter().map(|deadline| deadline.at).min() {
            Some(next) => rx.recv_timeout(next.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(TimerCommand::Arm(deadline)) => deadlines.push(deadline),
            Ok(TimerCommand::Prune) | Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }

        let now = Instant::now();
        deadlines.retain(|deadline| {
            if !deadline.flag.is_running() {
                return false;
            }
            if deadline.at > now {
                return true;
            }
            if deadline.flag.try_fire() {
                warn!(limit = ?deadline.limit, "Execution deadline reached, interrupting");
                deadline.engine.increment_epoch();
            }
            false
        });
    }
}

/// A wall-clock watchdog racing one invocation.
///
/// All watchdogs share one timer thread. When the limit elapses before [`Watchdog::finish`] is
/// called, the timer marks the flag and bumps the engine epoch, so the store traps at its next
/// epoch checkpoint. The interrupt is cooperative: code blocked inside a host call is not stopped
/// until it returns to the guest.
pub(crate) struct Watchdog {
    flag: DeadlineFlag,
}

impl Watchdog {
    /// Starts a watchdog for `limit` on `engine`, reporting through `flag`.
    pub(crate) fn start(engine: &Engine, limit: Duration, flag: DeadlineFlag) -> Self {
        // A limit past the end of the clock never fires.
        if let Some(at) = Instant::now().checked_add(limit) {
            let deadline = Deadline { at, limit, flag: flag.clone(), engine: engine.clone() };
            if TIMER.send(TimerCommand::Arm(deadline)).is_err() {
                warn!("Watchdog timer is not running, the call has no wall-clock limit");
            }
        }
        Self { flag }
    }

    /// Marks the call as completed and stops the watchdog.
    ///
    /// Returns `true` if the watchdog fired before completion, in which case the call must be
    /// reported as timed out.
    pub(crate) fn finish(self) -> bool {
        !self.flag.try_complete()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.flag.try_complete();
        let _ = TIMER.send(TimerCommand::Prune);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::new_engine;

    #[test]
    fn test_completion_wins() {
        let engine = new_engine().unwrap();
        let flag = DeadlineFlag::default();
        let watchdog = Watchdog::start(&engine, Duration::from_secs(10), flag.clone());
        assert!(!watchdog.finish());
        assert!(!flag.fired());
    }

    #[test]
    fn test_deadline_wins() {
        let engine = new_engine().unwrap();
        let flag = DeadlineFlag::default();
        let watchdog = Watchdog::start(&engine, Duration::from_millis(1), flag.clone());
        std::thread::sleep(Duration::from_millis(50));
        assert!(flag.fired());
        assert!(watchdog.finish());
    }

    #[test]
    fn test_many_sequential_watchdogs() {
        let engine = new_engine().unwrap();
        for _ in 0..200 {
            let flag = DeadlineFlag::default();
            let watchdog = Watchdog::start(&engine, Duration::from_secs(10), flag.clone());
            assert!(!watchdog.finish());
            assert!(!flag.fired());
        }

        // The shared timer still serves deadlines after many completed calls.
        let flag = DeadlineFlag::default();
        let watchdog = Watchdog::start(&engine, Duration::from_millis(1), flag.clone());
        std::thread::sleep(Duration::from_millis(50));
        assert!(flag.fired());
        assert!(watchdog.finish());
    }
}
