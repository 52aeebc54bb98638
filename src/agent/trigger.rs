//! Tick sources and debouncing
//!
//! A tick means "consider reconciling". On Linux ticks come from a netlink
//! route socket subscribed to link and address change groups; everywhere a
//! non-zero trigger duration is configured, from a plain timer. The channel
//! is small and sends never block: a burst of kernel events collapses into
//! however many ticks fit, and the debouncer drains the rest.
//!
//! One tick is always emitted at startup so state converges before the
//! first external event.

use std::io;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::ddns::shutdown::Shutdown;

/// How long the debouncer waits for the tick stream to go quiet before
/// firing one reconciliation.
pub const QUIET_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum TriggerError {
    /// No timer duration configured and the platform has no event source.
    NoTrigger,
    Io(io::Error),
}

impl std::fmt::Display for TriggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerError::NoTrigger => write!(f, "no trigger specified"),
            TriggerError::Io(e) => write!(f, "starting trigger failed: {}", e),
        }
    }
}

impl std::error::Error for TriggerError {}

impl From<io::Error> for TriggerError {
    fn from(err: io::Error) -> Self {
        TriggerError::Io(err)
    }
}

/// Start the tick source for this configuration: a timer when
/// `trigger_secs` is non-zero, kernel address events otherwise.
pub fn spawn(
    shutdown: Arc<Shutdown>,
    trigger_secs: u64,
    tx: SyncSender<()>,
) -> Result<thread::JoinHandle<()>, TriggerError> {
    // Initial tick: converge before the first external event.
    let _ = tx.try_send(());

    if trigger_secs != 0 {
        let period = Duration::from_secs(trigger_secs);
        let handle = thread::Builder::new()
            .name("trigger-timer".to_string())
            .spawn(move || timer_notify(&shutdown, period, &tx))?;
        return Ok(handle);
    }

    spawn_event_source(shutdown, tx)
}

#[cfg(target_os = "linux")]
fn spawn_event_source(
    shutdown: Arc<Shutdown>,
    tx: SyncSender<()>,
) -> Result<thread::JoinHandle<()>, TriggerError> {
    let handle = thread::Builder::new()
        .name("trigger-netlink".to_string())
        .spawn(move || netlink_notify(&shutdown, &tx))?;
    Ok(handle)
}

#[cfg(not(target_os = "linux"))]
fn spawn_event_source(
    _shutdown: Arc<Shutdown>,
    _tx: SyncSender<()>,
) -> Result<thread::JoinHandle<()>, TriggerError> {
    Err(TriggerError::NoTrigger)
}

fn timer_notify(shutdown: &Shutdown, period: Duration, tx: &SyncSender<()>) {
    loop {
        if shutdown.wait_timeout(period) {
            return;
        }
        let _ = tx.try_send(());
    }
}

/// Listen on a netlink route socket for link and address changes, emitting
/// one tick per received message batch.
#[cfg(target_os = "linux")]
fn netlink_notify(shutdown: &Shutdown, tx: &SyncSender<()>) {
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            libc::NETLINK_ROUTE,
        )
    };
    if fd < 0 {
        log::error!(
            "Opening netlink socket failed: {}",
            io::Error::last_os_error()
        );
        return;
    }

    let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_groups =
        (libc::RTMGRP_LINK | libc::RTMGRP_IPV4_IFADDR | libc::RTMGRP_IPV6_IFADDR) as u32;

    let bound = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if bound < 0 {
        log::error!(
            "Binding netlink socket failed: {}",
            io::Error::last_os_error()
        );
        unsafe { libc::close(fd) };
        return;
    }

    let mut buf = [0u8; 4096];
    while !shutdown.is_cancelled() {
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pollfd, 1, 500) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("Polling netlink socket failed: {}", err);
            break;
        }
        if ready == 0 {
            continue;
        }

        let received = unsafe {
            libc::recv(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if received <= 0 {
            continue;
        }

        let _ = tx.try_send(());
    }

    unsafe { libc::close(fd) };
}

/// Consume ticks until the stream has been quiet for the whole window.
/// The caller has already taken the first tick of the burst.
pub fn debounce(ticks: &Receiver<()>, quiet: Duration) {
    while ticks.recv_timeout(quiet).is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_spawn_emits_initial_tick() {
        let shutdown = Shutdown::new();
        let (tx, rx) = mpsc::sync_channel(8);
        let handle = spawn(Arc::clone(&shutdown), 3600, tx).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_ok());

        shutdown.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_timer_emits_ticks_until_cancelled() {
        let shutdown = Shutdown::new();
        let (tx, rx) = mpsc::sync_channel(8);

        let waiter = Arc::clone(&shutdown);
        let handle =
            thread::spawn(move || timer_notify(&waiter, Duration::from_millis(10), &tx));

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_ok());

        shutdown.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_full_channel_does_not_block_the_source() {
        let shutdown = Shutdown::new();
        let (tx, rx) = mpsc::sync_channel(1);

        let waiter = Arc::clone(&shutdown);
        let handle =
            thread::spawn(move || timer_notify(&waiter, Duration::from_millis(5), &tx));

        // Do not consume: the source must keep running and drop ticks.
        thread::sleep(Duration::from_millis(100));
        shutdown.cancel();
        handle.join().unwrap();

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_debounce_drains_a_burst() {
        let (tx, rx) = mpsc::sync_channel(8);
        for _ in 0..3 {
            tx.try_send(()).unwrap();
        }

        debounce(&rx, Duration::from_millis(20));
        assert!(rx.try_recv().is_err());
    }
}
