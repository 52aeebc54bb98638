//! Vane DDNS client agent
//!
//! Watches local interfaces and keeps the configured zones converged with
//! the addresses they currently hold.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use vane::agent;
use vane::ddns::shutdown::Shutdown;

/// Vane DDNS agent - push local address changes to a Vane server
#[derive(Parser)]
#[command(name = "vane-agent")]
#[command(version)]
#[command(about = "Vane DDNS client agent", long_about = None)]
struct Cli {
    /// Agent configuration file
    #[arg(short, long, env = "VANE_AGENT_CONFIG")]
    config: PathBuf,

    /// Reconcile every SECONDS on a timer instead of listening for kernel
    /// address events (required on platforms without netlink)
    #[arg(short = 't', long, value_name = "SECONDS", default_value_t = 0)]
    trigger_time: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    simple_logger::init_with_level(level).expect("Failed to initialize logger");

    let shutdown = Shutdown::new();
    shutdown.install_signal_handlers();

    if let Err(e) = agent::run(cli.config, cli.trigger_time, shutdown) {
        log::error!("{}", e);
        process::exit(1);
    }
}
