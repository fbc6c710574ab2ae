//! Standalone switchboard server over TCP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchboard_server::{Controller, ControllerConfig, TcpTransport};

/// Message-routing fabric server.
#[derive(Debug, Parser)]
#[command(name = "switchboard-server", version, about)]
struct Args {
    /// Address to listen on for TCP connections.
    #[arg(long, default_value = "0.0.0.0:12345", env = "SWITCHBOARD_LISTEN")]
    listen: String,

    /// Number of router worker threads.
    #[arg(long, default_value_t = 2, env = "SWITCHBOARD_ROUTERS")]
    routers: usize,

    /// Default idle timeout for client connections, in seconds.
    #[arg(long, default_value_t = 60, env = "SWITCHBOARD_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: u64,

    /// Controller sweep interval, in milliseconds.
    #[arg(long, default_value_t = 10, env = "SWITCHBOARD_SWEEP_INTERVAL_MS")]
    sweep_interval_ms: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ControllerConfig {
        router_count: args.routers.max(1),
        default_idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        sweep_interval: Duration::from_millis(args.sweep_interval_ms.max(1)),
        ..ControllerConfig::default()
    };

    let controller = Arc::new(Controller::new(config));

    // Bind before spawning anything: failure to listen is the one fatal
    // startup error.
    let transport = TcpTransport::bind(Arc::clone(&controller), &args.listen)
        .with_context(|| format!("cannot listen on {}", args.listen))?;
    info!(addr = %transport.local_addr(), "accepting connections");

    controller.start();
    controller.register_interface(Box::new(transport), true);

    // Funnel termination signals into the cooperative stop flag.
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handler")?;
    {
        let controller = Arc::clone(&controller);
        std::thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "termination signal received");
                controller.stop();
            }
        });
    }

    controller.join();
    Ok(())
}
