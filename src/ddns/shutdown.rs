//! Process-wide cancellation
//!
//! One `Shutdown` handle is created at startup and threaded into every
//! long-running loop (HTTP serve loop, trigger sources, the agent's
//! reconciliation loop). SIGINT and SIGTERM flip a process-global flag that
//! every handle observes; `cancel` flips a per-handle flag so tests can
//! cancel without touching process state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static SIGNALLED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_signal(_signal: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

pub struct Shutdown {
    cancelled: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Arc<Shutdown> {
        Arc::new(Shutdown {
            cancelled: AtomicBool::new(false),
        })
    }

    /// Route SIGINT and SIGTERM into the cancellation flag.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) {
        unsafe {
            libc::signal(libc::SIGINT, handle_signal as usize);
            libc::signal(libc::SIGTERM, handle_signal as usize);
        }
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) {}

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || SIGNALLED.load(Ordering::SeqCst)
    }

    /// Sleep for up to `duration`, waking early on cancellation. Returns
    /// whether cancellation was observed.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_observed() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_cancelled());
        shutdown.cancel();
        assert!(shutdown.is_cancelled());
    }

    #[test]
    fn test_wait_timeout_expires_without_cancel() {
        let shutdown = Shutdown::new();
        let started = Instant::now();
        assert!(!shutdown.wait_timeout(Duration::from_millis(50)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_timeout_returns_early_on_cancel() {
        let shutdown = Shutdown::new();
        let waiter = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        shutdown.cancel();
        assert!(handle.join().unwrap());
    }
}
