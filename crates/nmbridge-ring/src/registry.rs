//! Port registration and the process-wide port registry.
//!
//! [`NetmapContext::configure`] binds one device handle per ring id of a port,
//! validates the ring counts the kernel negotiated, maps the shared region the
//! first time any ring is registered, and resolves every ring and its shadow
//! descriptors. A port enters the registry only once all of that succeeded.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Serialize;

use crate::accessor::Direction;
use crate::error::{NetmapError, Result};
use crate::layout::{NETMAP_NO_TX_POLL, NmReq};
use crate::port::{Port, PortConfig};
use crate::ring::{Queue, Ring};
use crate::shm::{MappingCell, SharedMemory};
use crate::stats::PortStats;
use crate::transport::{DevNetmap, NetmapTransport};

/// Interface information reported by `NIOCGINFO`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Interface name
    pub name: String,
    /// Hardware transmit rings
    pub tx_rings: u16,
    /// Hardware receive rings
    pub rx_rings: u16,
    /// Slots per transmit ring
    pub tx_slots: u32,
    /// Slots per receive ring
    pub rx_slots: u32,
    /// Size of the shared region
    pub memsize: u32,
}

/// Registration context: transport, shared mapping and configured ports
pub struct NetmapContext {
    transport: Arc<dyn NetmapTransport>,
    mapping: MappingCell,
    ports: Mutex<Vec<Arc<Port>>>,
    /// Serializes configuration so a name is never registered twice
    setup: Mutex<()>,
}

impl NetmapContext {
    /// Create an empty context on top of `transport`
    pub fn new(transport: Arc<dyn NetmapTransport>) -> Self {
        Self {
            transport,
            mapping: MappingCell::new(),
            ports: Mutex::new(Vec::new()),
            setup: Mutex::new(()),
        }
    }

    /// The process-wide context backed by `/dev/netmap`
    pub fn global() -> &'static NetmapContext {
        static GLOBAL: OnceLock<NetmapContext> = OnceLock::new();
        GLOBAL.get_or_init(|| NetmapContext::new(Arc::new(DevNetmap::new())))
    }

    /// The shared region, once the first ring has been registered
    pub fn mapping(&self) -> Option<Arc<SharedMemory>> {
        self.mapping.get()
    }

    /// Look up a configured port by name
    pub fn get(&self, name: &str) -> Option<Arc<Port>> {
        self.ports
            .lock()
            .iter()
            .find(|port| port.name() == name)
            .cloned()
    }

    /// All configured ports, in configuration order
    pub fn ports(&self) -> Vec<Arc<Port>> {
        self.ports.lock().clone()
    }

    /// Configure a port, or return the existing one with the same name
    pub fn configure(&self, config: &PortConfig) -> Result<Arc<Port>> {
        config.validate()?;
        let _setup = self.setup.lock();

        if let Some(port) = self.get(&config.port) {
            tracing::info!(port = %config.port, "Port is already configured");
            return Ok(port);
        }

        let request = NmReq::for_port(&config.port, config.tx_queues, config.rx_queues)
            .ok_or_else(|| {
                NetmapError::InvalidConfig(format!("Invalid interface name '{}'", config.port))
            })?;
        let name: Arc<str> = Arc::from(config.port.as_str());
        let stats = Arc::new(PortStats::new());

        let mut rings = Vec::with_capacity(config.rings() as usize);
        let mut negotiated = (0, 0);
        for id in 0..config.rings() {
            let (ring, reply) = self
                .register_ring(config, &name, &request, id, &stats)
                .inspect_err(|e| {
                    tracing::error!(port = %config.port, ring = id, "Failed to register ring: {e}")
                })?;
            negotiated = (reply.nr_tx_rings, reply.nr_rx_rings);
            rings.push(ring);
        }

        check_ring_counts(config, negotiated.0, negotiated.1)?;

        let port = Arc::new(Port::new(name, config.clone(), negotiated, rings, stats));
        self.ports.lock().push(Arc::clone(&port));

        tracing::info!(
            port = %config.port,
            tx_queues = config.tx_queues,
            rx_queues = config.rx_queues,
            tx_rings = negotiated.0,
            rx_rings = negotiated.1,
            "Configured port"
        );
        Ok(port)
    }

    fn register_ring(
        &self,
        config: &PortConfig,
        name: &Arc<str>,
        request: &NmReq,
        id: u16,
        stats: &Arc<PortStats>,
    ) -> Result<(Ring, NmReq)> {
        let mut device = self
            .transport
            .open()
            .map_err(|source| NetmapError::DeviceUnavailable {
                port: config.port.clone(),
                ring: id,
                source,
            })?;

        let transport_err = |source| NetmapError::Transport {
            port: config.port.clone(),
            ring: id,
            source,
        };

        let mut reply = NmReq {
            nr_ringid: id | NETMAP_NO_TX_POLL,
            ..*request
        };
        device.register(&mut reply).map_err(transport_err)?;
        check_ring_counts(config, reply.nr_tx_rings, reply.nr_rx_rings)?;

        let region = self
            .mapping
            .get_or_try_map(|| device.map(reply.nr_memsize as usize))
            .map_err(transport_err)?;
        let nifp = region.interface(reply.nr_offset)?;

        let tx = if id < config.tx_queues {
            Some(Queue::new(Arc::clone(name), id, nifp.ring(id, Direction::Tx)?))
        } else {
            None
        };
        let rx = if id < config.rx_queues {
            Some(Queue::new(Arc::clone(name), id, nifp.ring(id, Direction::Rx)?))
        } else {
            None
        };

        tracing::debug!(
            port = %config.port,
            ring = id,
            tx_slots = tx.as_ref().map_or(0, Queue::num_slots),
            rx_slots = rx.as_ref().map_or(0, Queue::num_slots),
            nifp = reply.nr_offset,
            "Registered ring"
        );

        let ring = Ring::new(Arc::clone(name), id, device, nifp, tx, rx, Arc::clone(stats));
        Ok((ring, reply))
    }

    /// Query ring and slot counts of `name` without registering it
    pub fn port_info(&self, name: &str) -> Result<PortInfo> {
        let mut req = NmReq::for_port(name, 0, 0)
            .ok_or_else(|| NetmapError::InvalidConfig(format!("Invalid interface name '{name}'")))?;

        let mut device = self
            .transport
            .open()
            .map_err(|source| NetmapError::DeviceUnavailable {
                port: name.to_string(),
                ring: 0,
                source,
            })?;
        device
            .get_info(&mut req)
            .map_err(|source| NetmapError::Transport {
                port: name.to_string(),
                ring: 0,
                source,
            })?;

        Ok(PortInfo {
            name: name.to_string(),
            tx_rings: req.nr_tx_rings,
            rx_rings: req.nr_rx_rings,
            tx_slots: req.nr_tx_slots,
            rx_slots: req.nr_rx_slots,
            memsize: req.nr_memsize,
        })
    }
}

impl std::fmt::Debug for NetmapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetmapContext")
            .field("mapping", &self.mapping)
            .field("ports", &self.ports.lock().len())
            .finish_non_exhaustive()
    }
}

/// The kernel must grant at least the requested transmit rings and exactly
/// the requested receive rings
fn check_ring_counts(config: &PortConfig, tx_rings: u16, rx_rings: u16) -> Result<()> {
    if tx_rings < config.tx_queues || rx_rings != config.rx_queues {
        tracing::warn!(
            port = %config.port,
            requested_tx = config.tx_queues,
            requested_rx = config.rx_queues,
            configured_tx = tx_rings,
            configured_rx = rx_rings,
            "Ring count mismatch; set it with ethtool"
        );
        return Err(NetmapError::RingCountMismatch {
            port: config.port.clone(),
            requested_tx: config.tx_queues,
            requested_rx: config.rx_queues,
            configured_tx: tx_rings,
            configured_rx: rx_rings,
        });
    }
    Ok(())
}
