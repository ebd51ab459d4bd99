//! Per-port traffic counters.
//!
//! Counters are written from the hot path of every ring of a port with
//! relaxed atomics. Only the totals matter; there is no ordering between the
//! four counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Port statistics
#[derive(Debug, Default)]
pub struct PortStats {
    /// Packets transmitted
    tx_packets: AtomicU64,
    /// Packets received
    rx_packets: AtomicU64,
    /// Bytes transmitted
    tx_bytes: AtomicU64,
    /// Bytes received
    rx_bytes: AtomicU64,
}

impl PortStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record received packets
    #[inline(always)]
    pub fn record_rx(&self, count: u64, bytes: u64) {
        self.rx_packets.fetch_add(count, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record transmitted packets
    #[inline(always)]
    pub fn record_tx(&self, count: u64, bytes: u64) {
        self.tx_packets.fetch_add(count, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Transmitted packets since the previous fetch; resets the counter
    pub fn fetch_tx_packets(&self) -> u64 {
        self.tx_packets.swap(0, Ordering::Relaxed)
    }

    /// Received packets since the previous fetch; resets the counter
    pub fn fetch_rx_packets(&self) -> u64 {
        self.rx_packets.swap(0, Ordering::Relaxed)
    }

    /// Transmitted bytes since the previous fetch; resets the counter
    pub fn fetch_tx_bytes(&self) -> u64 {
        self.tx_bytes.swap(0, Ordering::Relaxed)
    }

    /// Received bytes since the previous fetch; resets the counter
    pub fn fetch_rx_bytes(&self) -> u64 {
        self.rx_bytes.swap(0, Ordering::Relaxed)
    }

    /// Fetch and reset all four counters
    ///
    /// Each counter is cleared atomically on its own; a packet recorded while
    /// draining lands either in this window or the next, never in both.
    pub fn drain(&self) -> PortStatsSnapshot {
        PortStatsSnapshot {
            tx_packets: self.fetch_tx_packets(),
            rx_packets: self.fetch_rx_packets(),
            tx_bytes: self.fetch_tx_bytes(),
            rx_bytes: self.fetch_rx_bytes(),
        }
    }

    /// Read all counters without resetting them
    pub fn snapshot(&self) -> PortStatsSnapshot {
        PortStatsSnapshot {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Non-atomic copy of port statistics for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStatsSnapshot {
    /// Packets transmitted
    pub tx_packets: u64,
    /// Packets received
    pub rx_packets: u64,
    /// Bytes transmitted
    pub tx_bytes: u64,
    /// Bytes received
    pub rx_bytes: u64,
}

impl PortStatsSnapshot {
    /// RX packet rate (packets per second)
    pub fn rx_pps(&self, duration_secs: f64) -> f64 {
        rate(self.rx_packets as f64, duration_secs)
    }

    /// TX packet rate (packets per second)
    pub fn tx_pps(&self, duration_secs: f64) -> f64 {
        rate(self.tx_packets as f64, duration_secs)
    }

    /// RX throughput (bits per second)
    pub fn rx_bps(&self, duration_secs: f64) -> f64 {
        rate(self.rx_bytes as f64 * 8.0, duration_secs)
    }

    /// TX throughput (bits per second)
    pub fn tx_bps(&self, duration_secs: f64) -> f64 {
        rate(self.tx_bytes as f64 * 8.0, duration_secs)
    }
}

fn rate(value: f64, duration_secs: f64) -> f64 {
    if duration_secs > 0.0 {
        value / duration_secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fetch_and_clear() {
        let stats = PortStats::new();
        stats.record_rx(4, 960);
        stats.record_tx(2, 128);

        assert_eq!(stats.fetch_rx_packets(), 4);
        assert_eq!(stats.fetch_rx_bytes(), 960);
        assert_eq!(stats.fetch_tx_packets(), 2);
        assert_eq!(stats.fetch_tx_bytes(), 128);

        assert_eq!(stats.fetch_rx_packets(), 0);
        assert_eq!(stats.fetch_rx_bytes(), 0);
        assert_eq!(stats.fetch_tx_packets(), 0);
        assert_eq!(stats.fetch_tx_bytes(), 0);
    }

    #[test]
    fn test_snapshot_does_not_clear() {
        let stats = PortStats::new();
        stats.record_rx(1, 64);
        assert_eq!(stats.snapshot().rx_packets, 1);
        assert_eq!(stats.snapshot().rx_bytes, 64);
        assert_eq!(stats.drain().rx_packets, 1);
        assert_eq!(stats.snapshot(), PortStatsSnapshot::default());
    }

    #[test]
    fn test_rates() {
        let snap = PortStatsSnapshot {
            tx_packets: 1000,
            rx_packets: 2000,
            tx_bytes: 125_000,
            rx_bytes: 250_000,
        };
        assert_eq!(snap.tx_pps(2.0), 500.0);
        assert_eq!(snap.rx_pps(2.0), 1000.0);
        assert_eq!(snap.tx_bps(1.0), 1_000_000.0);
        assert_eq!(snap.rx_bps(1.0), 2_000_000.0);
        assert_eq!(snap.rx_pps(0.0), 0.0);
    }

    #[test]
    fn test_concurrent_windows_do_not_overlap() {
        let stats = Arc::new(PortStats::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        stats.record_rx(1, 64);
                    }
                })
            })
            .collect();

        let mut packets = 0;
        let mut bytes = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            packets += stats.fetch_rx_packets();
            bytes += stats.fetch_rx_bytes();
        }
        for w in writers {
            w.join().unwrap();
        }
        packets += stats.fetch_rx_packets();
        bytes += stats.fetch_rx_bytes();

        assert_eq!(packets, 40_000);
        assert_eq!(bytes, 40_000 * 64);
    }
}
