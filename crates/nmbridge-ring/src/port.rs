//! Registered ports.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{NetmapError, Result};
use crate::layout::{IFNAMSIZ, NETMAP_RING_MASK};
use crate::ring::Ring;
use crate::stats::{PortStats, PortStatsSnapshot};

fn default_queues() -> u16 {
    1
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortConfig {
    /// Interface name
    pub port: String,

    /// Transmit rings to bind
    #[serde(default = "default_queues")]
    pub tx_queues: u16,

    /// Receive rings to bind
    #[serde(default = "default_queues")]
    pub rx_queues: u16,
}

impl PortConfig {
    /// Create a configuration for `port`
    pub fn new(port: impl Into<String>, tx_queues: u16, rx_queues: u16) -> Self {
        Self {
            port: port.into(),
            tx_queues,
            rx_queues,
        }
    }

    /// Rings to register: one per id up to the larger queue count
    pub fn rings(&self) -> u16 {
        self.tx_queues.max(self.rx_queues)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(NetmapError::InvalidConfig(
                "Interface name cannot be empty".into(),
            ));
        }

        if self.port.len() > IFNAMSIZ {
            return Err(NetmapError::InvalidConfig(format!(
                "Interface name '{}' exceeds {} bytes",
                self.port, IFNAMSIZ
            )));
        }

        if self.port.as_bytes().contains(&0) {
            return Err(NetmapError::InvalidConfig(
                "Interface name contains a NUL byte".into(),
            ));
        }

        if self.rings() == 0 {
            return Err(NetmapError::InvalidConfig(format!(
                "Port '{}' needs at least one queue",
                self.port
            )));
        }

        if self.rings() > NETMAP_RING_MASK + 1 {
            return Err(NetmapError::InvalidConfig(format!(
                "Port '{}' requests {} rings (max {})",
                self.port,
                self.rings(),
                NETMAP_RING_MASK + 1
            )));
        }

        Ok(())
    }
}

/// A configured interface
///
/// Owns one [`Ring`] per registered ring id until a worker takes it.
pub struct Port {
    name: Arc<str>,
    config: PortConfig,
    tx_rings: u16,
    rx_rings: u16,
    rings: Mutex<Vec<Option<Ring>>>,
    stats: Arc<PortStats>,
}

impl Port {
    pub(crate) fn new(
        name: Arc<str>,
        config: PortConfig,
        (tx_rings, rx_rings): (u16, u16),
        rings: Vec<Ring>,
        stats: Arc<PortStats>,
    ) -> Self {
        Self {
            name,
            config,
            tx_rings,
            rx_rings,
            rings: Mutex::new(rings.into_iter().map(Some).collect()),
            stats,
        }
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the port was created with
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Transmit rings reported by the kernel
    pub fn tx_rings(&self) -> u16 {
        self.tx_rings
    }

    /// Receive rings reported by the kernel
    pub fn rx_rings(&self) -> u16 {
        self.rx_rings
    }

    /// Registered ring ids
    pub fn num_rings(&self) -> u16 {
        self.rings.lock().len() as u16
    }

    /// Take ring `id` for exclusive use
    pub fn take_ring(&self, id: u16) -> Result<Ring> {
        self.rings
            .lock()
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or_else(|| NetmapError::RingUnavailable {
                port: self.name.to_string(),
                ring: id,
            })
    }

    /// Hand a ring taken with [`Port::take_ring`] back
    pub fn return_ring(&self, ring: Ring) -> Result<()> {
        if ring.port() != self.name() {
            return Err(NetmapError::InvalidConfig(format!(
                "Ring {} of {} returned to {}",
                ring.id(),
                ring.port(),
                self.name
            )));
        }

        let mut rings = self.rings.lock();
        match rings.get_mut(ring.id() as usize) {
            Some(entry @ None) => {
                *entry = Some(ring);
                Ok(())
            }
            _ => Err(NetmapError::InvalidConfig(format!(
                "Ring {} of {} was not taken",
                ring.id(),
                self.name
            ))),
        }
    }

    /// Port counters
    pub fn stats(&self) -> &Arc<PortStats> {
        &self.stats
    }

    /// Transmitted packets since the previous fetch
    pub fn fetch_tx_packets(&self) -> u64 {
        self.stats.fetch_tx_packets()
    }

    /// Received packets since the previous fetch
    pub fn fetch_rx_packets(&self) -> u64 {
        self.stats.fetch_rx_packets()
    }

    /// Transmitted bytes since the previous fetch
    pub fn fetch_tx_bytes(&self) -> u64 {
        self.stats.fetch_tx_bytes()
    }

    /// Received bytes since the previous fetch
    pub fn fetch_rx_bytes(&self) -> u64 {
        self.stats.fetch_rx_bytes()
    }

    /// Fetch and reset all counters
    pub fn drain_stats(&self) -> PortStatsSnapshot {
        self.stats.drain()
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("tx_rings", &self.tx_rings)
            .field("rx_rings", &self.rx_rings)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
