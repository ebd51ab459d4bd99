//! Kernel-visible netmap structures (netmap API version 11).
//!
//! Everything in this module mirrors `net/netmap.h` byte for byte. The shared
//! region handed out by `/dev/netmap` contains, for every registered interface:
//!
//! ```text
//! ┌────────────────┐  nr_offset
//! │   netmap_if    │──── ring_ofs[0..tx]        ──► TX rings (+1 host ring)
//! │   ring_ofs[]   │──── ring_ofs[tx+1..tx+1+rx] ──► RX rings (+1 host ring)
//! └────────────────┘
//! ┌────────────────┐
//! │  netmap_ring   │  buf_ofs, num_slots, nr_buf_size, head/cur/tail
//! │  slot[0..n]    │  buf_idx, len, flags, ptr
//! └────────────────┘
//! ┌───────────────────────────────────────────────┐
//! │ buffer pool: buf 0 | buf 1 | ... | buf N       │  ring + buf_ofs + idx * nr_buf_size
//! └───────────────────────────────────────────────┘
//! ```

use std::mem::{offset_of, size_of};

/// Interface name length, including the terminating NUL when present
pub const IFNAMSIZ: usize = 16;

/// Netmap API version spoken by this crate
pub const NETMAP_API: u32 = 11;

/// `nr_flags` registration mode: bind a single hardware ring pair
pub const NR_REG_ONE_NIC: u32 = 4;

/// `nr_ringid` flag: do not txsync on poll()
pub const NETMAP_NO_TX_POLL: u16 = 0x1000;

/// `nr_ringid` mask selecting the ring number
pub const NETMAP_RING_MASK: u16 = 0x0fff;

/// Slot flag: the buffer index changed since the last sync
pub const NS_BUF_CHANGED: u16 = 0x0001;

/// Slot flag: ask the kernel to report completion of this slot
pub const NS_REPORT: u16 = 0x0002;

/// Offset of the slot array inside a ring descriptor
pub const RING_SLOTS_OFFSET: usize = size_of::<NetmapRing>();

/// Alignment the kernel uses for ring descriptors
pub const NM_CACHE_ALIGN: usize = 128;

const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | ((ty as u32) << 8) | nr as u32
}

/// Query interface information (`_IOWR('i', 145, struct nmreq)`)
pub const NIOCGINFO: u32 = ioc(IOC_READ | IOC_WRITE, b'i', 145, size_of::<NmReq>());

/// Register an interface ring (`_IOWR('i', 146, struct nmreq)`)
pub const NIOCREGIF: u32 = ioc(IOC_READ | IOC_WRITE, b'i', 146, size_of::<NmReq>());

/// Synchronize the transmit ring (`_IO('i', 148)`)
pub const NIOCTXSYNC: u32 = ioc(IOC_NONE, b'i', 148, 0);

/// Synchronize the receive ring (`_IO('i', 149)`)
pub const NIOCRXSYNC: u32 = ioc(IOC_NONE, b'i', 149, 0);

/// Registration request (matches struct nmreq in net/netmap.h)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NmReq {
    /// Interface name, NUL padded
    pub nr_name: [u8; IFNAMSIZ],
    /// API version (NETMAP_API)
    pub nr_version: u32,
    /// Offset of the netmap_if inside the shared region
    pub nr_offset: u32,
    /// Size of the shared region
    pub nr_memsize: u32,
    /// Slots per transmit ring
    pub nr_tx_slots: u32,
    /// Slots per receive ring
    pub nr_rx_slots: u32,
    /// Transmit rings
    pub nr_tx_rings: u16,
    /// Receive rings
    pub nr_rx_rings: u16,
    /// Ring to bind, plus NETMAP_* ring flags
    pub nr_ringid: u16,
    /// Command (unused here)
    pub nr_cmd: u16,
    /// Argument 1 (unused here)
    pub nr_arg1: u16,
    /// Argument 2 (unused here)
    pub nr_arg2: u16,
    /// Argument 3 (unused here)
    pub nr_arg3: u32,
    /// Registration mode (NR_REG_*)
    pub nr_flags: u32,
    /// Reserved
    pub spare2: [u32; 1],
}

impl NmReq {
    /// Build a request for `name` asking for the given ring counts.
    ///
    /// Returns `None` when the name does not fit in [`IFNAMSIZ`] bytes.
    pub fn for_port(name: &str, tx_rings: u16, rx_rings: u16) -> Option<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > IFNAMSIZ {
            return None;
        }

        let mut req = Self {
            nr_version: NETMAP_API,
            nr_flags: NR_REG_ONE_NIC,
            nr_tx_rings: tx_rings,
            nr_rx_rings: rx_rings,
            ..Default::default()
        };
        req.nr_name[..bytes.len()].copy_from_slice(bytes);
        Some(req)
    }

    /// Interface name up to the first NUL
    pub fn name(&self) -> &str {
        let end = self
            .nr_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(IFNAMSIZ);
        std::str::from_utf8(&self.nr_name[..end]).unwrap_or("")
    }

    /// Ring number selected by `nr_ringid`
    pub fn ring(&self) -> u16 {
        self.nr_ringid & NETMAP_RING_MASK
    }
}

/// Interface descriptor header (matches struct netmap_if)
///
/// The `ring_ofs[]` array of `i64` offsets follows immediately.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NetmapIf {
    /// Interface name
    pub ni_name: [u8; IFNAMSIZ],
    /// API version
    pub ni_version: u32,
    /// Interface properties
    pub ni_flags: u32,
    /// Hardware transmit rings
    pub ni_tx_rings: u32,
    /// Hardware receive rings
    pub ni_rx_rings: u32,
    /// Head of the extra buffer list
    pub ni_bufs_head: u32,
    /// Reserved
    pub ni_spare1: [u32; 5],
}

/// Offset of `ring_ofs[0]` from the start of a netmap_if
pub const NETMAP_IF_RING_OFS: usize = size_of::<NetmapIf>();

/// Kernel timestamp embedded in every ring
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NmTimeval {
    /// Seconds
    pub tv_sec: i64,
    /// Microseconds
    pub tv_usec: i64,
}

#[repr(C, align(128))]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct NmSem([u8; NM_CACHE_ALIGN]);

/// Ring descriptor header (matches struct netmap_ring)
///
/// The slot array starts at [`RING_SLOTS_OFFSET`].
#[repr(C)]
pub struct NetmapRing {
    /// Offset from this ring to buffer 0 of the pool
    pub buf_ofs: i64,
    /// Number of slots
    pub num_slots: u32,
    /// Size of every buffer in the pool
    pub nr_buf_size: u32,
    /// Ring id
    pub ringid: u16,
    /// 0 for transmit, 1 for receive
    pub dir: u16,
    /// First slot owned by userspace
    pub head: u32,
    /// Wakeup point
    pub cur: u32,
    /// First slot owned by the kernel
    pub tail: u32,
    /// Ring flags
    pub flags: u32,
    /// Time of last sync
    pub ts: NmTimeval,
    _sem: NmSem,
}

/// One ring entry (matches struct netmap_slot)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetmapSlot {
    /// Buffer index in the shared pool
    pub buf_idx: u32,
    /// Packet length
    pub len: u16,
    /// NS_* flags
    pub flags: u16,
    /// Indirect buffer pointer (unused here)
    pub ptr: u64,
}

const _: () = assert!(size_of::<NmReq>() == 60);
const _: () = assert!(size_of::<NetmapIf>() == 56);
const _: () = assert!(size_of::<NetmapSlot>() == 16);
const _: () = assert!(size_of::<NetmapRing>() == 256);
const _: () = assert!(offset_of!(NetmapRing, head) == 20);
const _: () = assert!(offset_of!(NetmapRing, ts) == 40);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_numbers() {
        assert_eq!(NIOCGINFO, 0xC03C_6991);
        assert_eq!(NIOCREGIF, 0xC03C_6992);
        assert_eq!(NIOCTXSYNC, 0x0000_6994);
        assert_eq!(NIOCRXSYNC, 0x0000_6995);
    }

    #[test]
    fn test_nmreq_for_port() {
        let req = NmReq::for_port("eth0", 2, 3).unwrap();
        assert_eq!(req.name(), "eth0");
        assert_eq!(req.nr_version, NETMAP_API);
        assert_eq!(req.nr_flags, NR_REG_ONE_NIC);
        assert_eq!(req.nr_tx_rings, 2);
        assert_eq!(req.nr_rx_rings, 3);
    }

    #[test]
    fn test_nmreq_name_limits() {
        // Exactly IFNAMSIZ bytes leaves no room for a NUL but still fits
        let req = NmReq::for_port("abcdefghijklmnop", 1, 1).unwrap();
        assert_eq!(req.name(), "abcdefghijklmnop");

        assert!(NmReq::for_port("abcdefghijklmnopq", 1, 1).is_none());
    }

    #[test]
    fn test_nmreq_ring_mask() {
        let req = NmReq {
            nr_ringid: 5 | NETMAP_NO_TX_POLL,
            ..Default::default()
        };
        assert_eq!(req.ring(), 5);
    }

    #[test]
    fn test_slot_array_offset() {
        assert_eq!(RING_SLOTS_OFFSET, 256);
        assert_eq!(std::mem::align_of::<NetmapRing>(), NM_CACHE_ALIGN);
    }
}
