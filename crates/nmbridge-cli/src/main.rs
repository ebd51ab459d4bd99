//! nmbridge CLI
//!
//! Zero-copy packet forwarding between netmap ports.

mod config;
mod forward;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nmbridge_ring::{HexDump, NetmapContext, PortConfig, mac_address};

use config::Config;

/// nmbridge - forward packets between netmap rings without copying
#[derive(Parser)]
#[command(name = "nmbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward packets according to a configuration file
    Forward {
        /// Configuration file path
        #[arg(short, long, default_value = "nmbridge.toml")]
        config: PathBuf,
    },

    /// Show ring and slot counts of an interface
    Info {
        /// Interface name
        port: String,
    },

    /// Show the link-layer address of an interface
    Mac {
        /// Interface name
        ifname: String,
    },

    /// Print received packets as hex
    Dump {
        /// Interface name
        port: String,

        /// Receive rings to bind (default: all rings of the interface)
        #[arg(short, long)]
        queues: Option<u16>,

        /// Ring to read from
        #[arg(short, long, default_value_t = 0)]
        ring: u16,

        /// Stop after this many packets
        #[arg(short = 'n', long, default_value_t = 10)]
        packets: u32,

        /// Bytes shown per packet
        #[arg(short, long, default_value_t = 64)]
        bytes: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            tracing::info!("Shutdown requested");
            stop.store(true, Ordering::Relaxed);
        })
        .context("Failed to install signal handler")?;
    }

    let ctx = NetmapContext::global();

    match cli.command {
        Commands::Forward { config } => {
            let config = Config::load(&config)?;
            config.validate()?;
            let forwarded = forward::run(ctx, &config, stop)?;
            tracing::info!(forwarded, "Forwarding stopped");
        }
        Commands::Info { port } => show_info(ctx, &port)?,
        Commands::Mac { ifname } => {
            let mac = mac_address(&ifname)?;
            println!("{ifname}: {mac}");
        }
        Commands::Dump {
            port,
            queues,
            ring,
            packets,
            bytes,
        } => dump(ctx, &port, queues, ring, packets, bytes, &stop)?,
    }

    Ok(())
}

fn show_info(ctx: &NetmapContext, port: &str) -> anyhow::Result<()> {
    let info = ctx
        .port_info(port)
        .with_context(|| format!("Failed to query {port}"))?;

    println!("Interface:  {}", info.name);
    println!("TX rings:   {} x {} slots", info.tx_rings, info.tx_slots);
    println!("RX rings:   {} x {} slots", info.rx_rings, info.rx_slots);
    println!("Memory:     {} bytes", info.memsize);
    Ok(())
}

fn dump(
    ctx: &NetmapContext,
    port: &str,
    queues: Option<u16>,
    ring: u16,
    packets: u32,
    bytes: usize,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let queues = match queues {
        Some(q) => q,
        None => ctx.port_info(port)?.rx_rings,
    };
    if ring >= queues {
        anyhow::bail!("{port} has no receive ring {ring} ({queues} bound)");
    }

    let port = ctx.configure(&PortConfig::new(port, 0, queues))?;
    let mut handle = port.take_ring(ring)?;
    let mut seen = 0;

    while seen < packets && !stop.load(Ordering::Relaxed) {
        handle.rx_sync()?;
        let rx = handle.rx()?;
        let n = rx.space().min(packets - seen);
        if n == 0 {
            thread::sleep(Duration::from_millis(1));
            continue;
        }

        let head = rx.head();
        handle.rx_drain(head, n)?;

        let rx = handle.rx_mut()?;
        let mut i = head;
        for _ in 0..n {
            match rx.payload(i) {
                Some(data) => {
                    println!("{} ring {} slot {}: {} bytes", port.name(), ring, i, data.len());
                    print!("{}", HexDump(&data[..data.len().min(bytes)]));
                }
                None => tracing::warn!(slot = i, "Slot has no buffer"),
            }
            i = rx.view().next(i);
        }
        rx.view_mut().publish(i);
        seen += n;
    }

    port.return_ring(handle)?;
    Ok(())
}
