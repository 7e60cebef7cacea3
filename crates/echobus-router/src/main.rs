// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! echobus router daemon
//!
//! Runs a [`Router`] on a single-threaded reactor until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Listen on $ECHOLIB_SOCKET, or /tmp/echo.sock
//! echobus-router
//!
//! # TCP listener with larger router queues
//! echobus-router --address 0.0.0.0:7700 --queue-capacity 50000
//!
//! # Using a configuration file
//! echobus-router --config router.json
//!
//! # Write the default configuration
//! echobus-router gen-config --output router.json
//! ```

use clap::{Parser, Subcommand};
use echobus::{Reactor, Router};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

pub use config::{ConfigError, RouterConfig};

/// Reactor wake-up period used to check the stop flag and statistics timer.
const TICK: Duration = Duration::from_secs(1);

/// echobus message router
#[derive(Parser, Debug)]
#[command(name = "echobus-router")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address: a Unix socket path or host:port
    #[arg(short, long)]
    address: Option<String>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Outgoing queue capacity per connection (0 = unbounded)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Largest accepted frame payload in bytes
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "router.json")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => {
                RouterConfig::default().to_file(&output)?;
                println!("Configuration written to {}", output.display());
                Ok(())
            }
            Commands::Validate { config } => {
                RouterConfig::from_file(&config)?.validate()?;
                println!("{}: OK", config.display());
                Ok(())
            }
        };
    }

    let config = build_config(&args)?;

    // Library crates log through `log`; tracing-subscriber bridges those records.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "echobus_router={0},echobus={0}",
                config.log_level
            ))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| e as Box<dyn std::error::Error>)?;

    let router = Router::bind(&config.address, config.transport.clone())?;
    let mut reactor = Reactor::new()?;
    reactor.add_handler(router.clone())?;

    info!("+----------------------------------------------------+");
    info!(
        "|       echobus router v{}                        |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Address: {:40} |", router.endpoint().to_string());
    info!(
        "|  Queue:   {:40} |",
        format!("{} messages", config.transport.router_queue_capacity)
    );
    info!(
        "|  Frames:  {:40} |",
        format!("max {} bytes", config.transport.max_message_size)
    );
    info!("+----------------------------------------------------+");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        let waker = reactor.waker();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
            let _ = waker.wake();
        })?;
    }

    let stats_interval = config.stats_interval();
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        if !reactor.wait(Some(TICK))? {
            warn!("Listener closed, stopping");
            break;
        }
        if let Some(interval) = stats_interval {
            if last_report.elapsed() >= interval {
                report(&router);
                last_report = Instant::now();
            }
        }
    }

    info!("Shutdown signal received, stopping router...");
    report(&router);
    info!("Router stopped");
    Ok(())
}

/// Merge the configuration file (if any) with command-line overrides.
fn build_config(args: &Args) -> Result<RouterConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => RouterConfig::from_file(path)?,
        None => RouterConfig::default(),
    };

    if let Some(address) = &args.address {
        config.address.clone_from(address);
    }
    if let Some(level) = &args.log_level {
        config.log_level.clone_from(level);
    }
    if let Some(capacity) = args.queue_capacity {
        config.transport.router_queue_capacity = capacity;
    }
    if let Some(size) = args.max_message_size {
        config.transport.max_message_size = size;
    }
    if let Some(interval) = args.stats_interval {
        config.stats_interval_secs = interval;
    }

    config.validate()?;
    Ok(config)
}

fn report(router: &Router) {
    let stats = router.statistics();
    let totals = stats.totals();
    info!(
        "Statistics: {} connections ({} accepted), {} channels",
        stats.connections.len(),
        stats.accepted,
        stats.channels
    );
    info!(
        "  received {} messages / {} bytes, sent {} messages / {} bytes, dropped {}",
        totals.messages_received,
        totals.bytes_received,
        totals.messages_sent,
        totals.bytes_sent,
        totals.messages_dropped
    );
    for connection in &stats.connections {
        info!(
            "  [{}] {:?} {} queued={} dropped={}",
            connection.id,
            connection.name,
            connection.peer,
            connection.queued,
            connection.stats.messages_dropped
        );
    }
}
