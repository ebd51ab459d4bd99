//! Kernel registration transport.
//!
//! The engine never issues system calls directly. Opening the device,
//! registering rings, mapping the shared region and the sync calls go through
//! [`NetmapTransport`] / [`DeviceHandle`], so the whole setup path can run
//! against [`mock::MockTransport`] in tests.

mod dev;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use dev::{DevNetmap, NETMAP_DEVICE};

use crate::error::TransportError;
use crate::layout::NmReq;
use crate::shm::SharedMemory;

/// An open handle on the netmap device
///
/// One handle is opened per registered ring and stays with that ring for its
/// lifetime; sync calls act on the ring bound by [`DeviceHandle::register`].
pub trait DeviceHandle: Send {
    /// Query interface information without binding (`NIOCGINFO`)
    fn get_info(&mut self, req: &mut NmReq) -> Result<(), TransportError>;

    /// Bind the handle to the ring selected by `req` (`NIOCREGIF`)
    ///
    /// On return `req` carries the negotiated ring counts, the slot counts,
    /// the region size and the interface descriptor offset.
    fn register(&mut self, req: &mut NmReq) -> Result<(), TransportError>;

    /// Map `size` bytes of the shared region
    fn map(&self, size: usize) -> Result<SharedMemory, TransportError>;

    /// Hand transmitted slots to the kernel (`NIOCTXSYNC`)
    fn tx_sync(&self) -> Result<(), TransportError>;

    /// Collect received slots from the kernel (`NIOCRXSYNC`)
    fn rx_sync(&self) -> Result<(), TransportError>;
}

/// Factory for device handles
pub trait NetmapTransport: Send + Sync {
    /// Open a fresh device handle
    fn open(&self) -> Result<Box<dyn DeviceHandle>, TransportError>;
}
