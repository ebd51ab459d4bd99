//! Forwarding workers and the statistics reporter.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use nmbridge_ring::{NetmapContext, Port, Ring, swap_bufs, swap_bufs_within};

use crate::config::{Config, Route};

const STOP_POLL: Duration = Duration::from_millis(100);

/// Move up to `batch` received packets of `rx` out through `tx`
///
/// Returns the number of packets forwarded.
fn forward_batch(rx: &mut Ring, tx: &mut Ring, batch: u32) -> nmbridge_ring::Result<u32> {
    rx.rx_sync()?;
    let n = rx.rx()?.space().min(tx.tx()?.space()).min(batch);
    if n == 0 {
        // Reclaim completed transmit slots while idle.
        tx.tx_sync()?;
        return Ok(0);
    }

    let head = rx.rx()?.head();
    rx.rx_drain(head, n)?;
    swap_bufs(n, tx, rx)?;
    tx.tx_sync()?;
    Ok(n)
}

/// Same as [`forward_batch`] with both ends on one ring
fn reflect_batch(ring: &mut Ring, batch: u32) -> nmbridge_ring::Result<u32> {
    ring.rx_sync()?;
    let n = ring.rx()?.space().min(ring.tx()?.space()).min(batch);
    if n == 0 {
        ring.tx_sync()?;
        return Ok(0);
    }

    let head = ring.rx()?.head();
    ring.rx_drain(head, n)?;
    swap_bufs_within(n, ring)?;
    ring.tx_sync()?;
    Ok(n)
}

fn take(port: &Port, ring: u16) -> anyhow::Result<Ring> {
    port.take_ring(ring)
        .with_context(|| format!("Cannot start worker on {} ring {}", port.name(), ring))
}

fn give_back(port: &Port, ring: Ring) {
    if let Err(e) = port.return_ring(ring) {
        tracing::warn!("Failed to return ring to {}: {e}", port.name());
    }
}

fn spawn_worker(
    route: Route,
    from: Arc<Port>,
    to: Arc<Port>,
    batch: u32,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<anyhow::Result<u64>>> {
    let name = format!("fwd-{}-{}-{}", route.from, route.to, route.ring);

    let worker = move || -> anyhow::Result<u64> {
        let mut forwarded = 0u64;

        if route.is_hairpin() {
            let mut ring = take(&from, route.ring)?;
            let result = (|| {
                while !stop.load(Ordering::Relaxed) {
                    let n = reflect_batch(&mut ring, batch)?;
                    forwarded += u64::from(n);
                    if n == 0 {
                        thread::yield_now();
                    }
                }
                Ok::<_, nmbridge_ring::NetmapError>(())
            })();
            give_back(&from, ring);
            result?;
        } else {
            let mut a = take(&from, route.ring)?;
            let mut b = match take(&to, route.ring) {
                Ok(ring) => ring,
                Err(e) => {
                    give_back(&from, a);
                    return Err(e);
                }
            };

            let result = (|| {
                while !stop.load(Ordering::Relaxed) {
                    let mut n = forward_batch(&mut a, &mut b, batch)?;
                    if route.bidirectional {
                        n += forward_batch(&mut b, &mut a, batch)?;
                    }
                    forwarded += u64::from(n);
                    if n == 0 {
                        thread::yield_now();
                    }
                }
                Ok::<_, nmbridge_ring::NetmapError>(())
            })();
            give_back(&from, a);
            give_back(&to, b);
            result?;
        }

        tracing::debug!(forwarded, "Worker stopped");
        Ok(forwarded)
    };

    thread::Builder::new()
        .name(name.clone())
        .spawn(worker)
        .with_context(|| format!("Failed to spawn worker {name}"))
}

fn report(ports: &[Arc<Port>], elapsed: f64) {
    for port in ports {
        let snap = port.drain_stats();
        tracing::info!(
            port = port.name(),
            rx_pps = snap.rx_pps(elapsed).round(),
            tx_pps = snap.tx_pps(elapsed).round(),
            rx_mbps = snap.rx_bps(elapsed) / 1e6,
            tx_mbps = snap.tx_bps(elapsed) / 1e6,
            "Port statistics"
        );
    }
}

/// Configure every port, run one worker per route until `stop` is set
///
/// Returns the number of packets forwarded by all workers.
pub fn run(ctx: &NetmapContext, config: &Config, stop: Arc<AtomicBool>) -> anyhow::Result<u64> {
    let ports = config
        .ports
        .iter()
        .map(|p| {
            ctx.configure(p)
                .with_context(|| format!("Failed to configure port {}", p.port))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let lookup = |name: &str| {
        ctx.get(name)
            .ok_or_else(|| anyhow!("Port '{name}' is not configured"))
    };

    let mut workers = Vec::with_capacity(config.routes.len());
    for route in &config.routes {
        let from = lookup(&route.from)?;
        let to = lookup(&route.to)?;
        tracing::info!(
            from = %route.from,
            to = %route.to,
            ring = route.ring,
            bidirectional = route.bidirectional,
            "Starting forwarding worker"
        );
        match spawn_worker(route.clone(), from, to, config.batch_size, Arc::clone(&stop)) {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                stop.store(true, Ordering::Relaxed);
                join_all(workers);
                return Err(e);
            }
        }
    }

    let interval = Duration::from_secs(config.stats_interval_secs);
    let mut last = Instant::now();
    while !stop.load(Ordering::Relaxed) && !workers.iter().all(JoinHandle::is_finished) {
        thread::sleep(STOP_POLL);
        if !interval.is_zero() && last.elapsed() >= interval {
            report(&ports, last.elapsed().as_secs_f64());
            last = Instant::now();
        }
    }

    stop.store(true, Ordering::Relaxed);
    join_all(workers)
}

fn join_all(workers: Vec<JoinHandle<anyhow::Result<u64>>>) -> anyhow::Result<u64> {
    let mut total = 0;
    let mut first_err = None;
    for worker in workers {
        match worker.join() {
            Ok(Ok(n)) => total += n,
            Ok(Err(e)) => {
                tracing::error!("Worker failed: {e:#}");
                first_err.get_or_insert(e);
            }
            Err(_) => {
                first_err.get_or_insert(anyhow!("Worker panicked"));
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(total),
    }
}
