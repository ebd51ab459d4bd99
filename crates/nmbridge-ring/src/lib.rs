//! # nmbridge ring engine
//!
//! Zero-copy packet movement over netmap rings.
//!
//! This crate provides:
//! - Kernel-identical layouts of the netmap interface, ring and slot structures
//! - Port registration with ring count negotiation and a single shared mapping
//! - Bounds-checked ring and buffer resolution inside the shared region
//! - Shadow packet descriptors kept in step with ring slots
//! - Slot synchronization routines for transmit and receive runs
//! - NIC-to-NIC forwarding by swapping buffer indices between rings
//! - Lock-free per-port traffic counters
//! - A `/dev/netmap` transport and an in-memory mock (feature `mock`)
//! - Link-layer address lookup and a diagnostic hex dump
//!
//! ## Threading
//!
//! The crate spawns no threads. A worker takes a [`Ring`] out of its [`Port`]
//! and is then the only writer of that ring's slots and cursors. Counters are
//! the only state shared between workers.
//!
//! ```no_run
//! use nmbridge_ring::{NetmapContext, PortConfig, swap_bufs};
//!
//! # fn main() -> Result<(), nmbridge_ring::NetmapError> {
//! let ctx = NetmapContext::global();
//! let eth0 = ctx.configure(&PortConfig::new("eth0", 1, 1))?;
//! let eth1 = ctx.configure(&PortConfig::new("eth1", 1, 1))?;
//!
//! let mut rx = eth0.take_ring(0)?;
//! let mut tx = eth1.take_ring(0)?;
//! loop {
//!     rx.rx_sync()?;
//!     let n = rx.rx()?.space().min(tx.tx()?.space());
//!     let head = rx.rx()?.head();
//!     rx.rx_drain(head, n)?;
//!     swap_bufs(n, &mut tx, &mut rx)?;
//!     tx.tx_sync()?;
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Shared memory layout and address arithmetic
pub mod accessor;
pub mod layout;
pub mod shm;

// Ports and rings
pub mod packet;
pub mod port;
pub mod registry;
pub mod ring;
pub mod stats;

// Hot path
pub mod prefetch;
pub mod swap;
pub mod sync;

// Kernel transport
pub mod transport;

// Utilities
pub mod error;
pub mod hexdump;
pub mod mac;

pub use accessor::{Direction, InterfaceRef, RingView, ring_next, ring_space};
pub use error::{LayoutError, NetmapError, Result, TransportError};
pub use hexdump::HexDump;
pub use mac::{MacAddr, MacError, mac_address};
pub use packet::PacketBuf;
pub use port::{Port, PortConfig};
pub use registry::{NetmapContext, PortInfo};
pub use ring::{Queue, Ring};
pub use shm::{MappingCell, SharedMemory};
pub use stats::{PortStats, PortStatsSnapshot};
pub use swap::{swap_bufs, swap_bufs_within, swap_queues};
