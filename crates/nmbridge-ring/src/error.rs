//! Error types for port setup and the kernel transport.
//!
//! A corrupted ring (a shadow descriptor without a data pointer) is not an
//! error value: it takes the fatal path in [`crate::swap`].

use std::io;
use thiserror::Error;

use crate::accessor::Direction;

/// Errors raised while configuring ports or driving rings
#[derive(Debug, Error)]
pub enum NetmapError {
    /// Invalid port configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The netmap device could not be opened
    #[error("Could not open netmap device for {port} ring {ring}: {source}")]
    DeviceUnavailable {
        /// Interface name
        port: String,
        /// Ring being registered
        ring: u16,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// A registration, mapping or sync request failed
    #[error("Netmap request failed on {port} ring {ring}: {source}")]
    Transport {
        /// Interface name
        port: String,
        /// Ring the request was issued for
        ring: u16,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// The kernel did not grant the requested ring counts
    #[error(
        "Could not configure the ring count of {port} (requested tx={requested_tx} rx={requested_rx}, \
         configured tx={configured_tx} rx={configured_rx}); set it with ethtool"
    )]
    RingCountMismatch {
        /// Interface name
        port: String,
        /// Requested transmit rings
        requested_tx: u16,
        /// Requested receive rings
        requested_rx: u16,
        /// Transmit rings granted by the kernel
        configured_tx: u16,
        /// Receive rings granted by the kernel
        configured_rx: u16,
    },

    /// The shared region does not hold a valid netmap layout at the given offset
    #[error("Invalid shared memory layout: {0}")]
    Layout(#[from] LayoutError),

    /// The ring handle does not exist or is held by another worker
    #[error("Ring {ring} of {port} is not available")]
    RingUnavailable {
        /// Interface name
        port: String,
        /// Ring id
        ring: u16,
    },

    /// The ring handle has no queue in the requested direction
    #[error("Ring {ring} of {port} has no {dir} queue")]
    NoSuchQueue {
        /// Interface name
        port: String,
        /// Ring id
        ring: u16,
        /// Missing direction
        dir: Direction,
    },
}

/// Failures of the registration transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the device failed
    #[error("Failed to open {path}: {source}")]
    Open {
        /// Device path
        path: String,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// An ioctl request failed
    #[error("{request} failed: {source}")]
    Ioctl {
        /// Request name (NIOCREGIF, ...)
        request: &'static str,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// Mapping the shared region failed
    #[error("Failed to map {size} bytes of shared memory: {source}")]
    Map {
        /// Requested mapping size
        size: usize,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// The kernel does not know the interface
    #[error("Interface '{0}' is not known to netmap")]
    UnknownInterface(String),

    /// Netmap is not available on this platform
    #[error("Netmap is only supported on Linux")]
    Unsupported,
}

/// Invalid offsets or sizes found while resolving the shared layout
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// An offset points outside of the mapped region
    #[error("{what} at offset {offset} ({size} bytes) exceeds region of {region} bytes")]
    OutOfBounds {
        /// Structure being resolved
        what: &'static str,
        /// Byte offset from the region base
        offset: i64,
        /// Size of the structure
        size: usize,
        /// Size of the region
        region: usize,
    },

    /// A structure is not aligned the way the kernel lays it out
    #[error("{what} at offset {offset} is not {align}-byte aligned")]
    Misaligned {
        /// Structure being resolved
        what: &'static str,
        /// Byte offset from the region base
        offset: usize,
        /// Required alignment
        align: usize,
    },

    /// The ring id exceeds the interface's ring count
    #[error("No {dir} ring {ring} (interface has {available})")]
    NoSuchRing {
        /// Requested direction
        dir: Direction,
        /// Requested ring id
        ring: u16,
        /// Rings of that direction on the interface
        available: u32,
    },

    /// A ring descriptor carries impossible geometry
    #[error("Ring has {num_slots} slots of {buf_size} bytes")]
    BadGeometry {
        /// Slot count
        num_slots: u32,
        /// Buffer size
        buf_size: u32,
    },
}

/// Result type for port and ring operations
pub type Result<T> = std::result::Result<T, NetmapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_count_mismatch_message() {
        let err = NetmapError::RingCountMismatch {
            port: "eth0".into(),
            requested_tx: 4,
            requested_rx: 4,
            configured_tx: 2,
            configured_rx: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("requested tx=4 rx=4"));
        assert!(msg.contains("configured tx=2 rx=4"));
    }

    #[test]
    fn test_layout_error_converts() {
        let err: NetmapError = LayoutError::BadGeometry {
            num_slots: 0,
            buf_size: 2048,
        }
        .into();
        assert!(matches!(err, NetmapError::Layout(_)));
    }
}
