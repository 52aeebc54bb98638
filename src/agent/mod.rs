//! Client agent
//!
//! The agent turns kernel address events (or a timer) into debounced
//! reconciliation cycles: evaluate every configured address set, diff the
//! result against the last pushed state, and submit update batches per zone
//! when something changed.
//!
//! * `config` - The agent's JSON configuration
//! * `ifaddr` - Interface address enumeration
//! * `addrset` - Rule-based address filtering
//! * `trigger` - Tick sources and debouncing
//! * `submit` - Reconciliation and HTTP submission

pub mod addrset;
pub mod config;
pub mod ifaddr;
pub mod submit;
pub mod trigger;

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::ddns::shutdown::Shutdown;

use self::submit::{AgentError, Reconciler};

/// Run the agent until cancellation: spawn the trigger source, then serve
/// one reconciliation per debounced burst of ticks.
pub fn run(config_path: PathBuf, trigger_secs: u64, shutdown: Arc<Shutdown>) -> Result<(), AgentError> {
    let (tx, rx) = mpsc::sync_channel(8);
    let trigger_handle = trigger::spawn(Arc::clone(&shutdown), trigger_secs, tx)?;

    let mut reconciler = Reconciler::new(config_path);

    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if shutdown.is_cancelled() {
                    break;
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        trigger::debounce(&rx, trigger::QUIET_WINDOW);
        if shutdown.is_cancelled() {
            break;
        }

        if let Err(e) = reconciler.run_cycle() {
            log::error!("Reconciliation failed: {}", e);
        }
    }

    let _ = trigger_handle.join();
    Ok(())
}
