//! In-memory stand-in for `/dev/netmap`.
//!
//! [`MockTransport`] builds a byte image laid out exactly like the kernel's
//! shared region: interface descriptors first, then every ring (hardware and
//! host, both directions), then one buffer pool shared by all rings. Mapping
//! copies that image into an anonymous region, so every accessor and ring
//! routine runs unchanged against it.

use std::fmt;
use std::io;
use std::mem::{offset_of, size_of};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{DeviceHandle, NetmapTransport};
use crate::accessor::Direction;
use crate::error::TransportError;
use crate::layout::{
    IFNAMSIZ, NETMAP_API, NETMAP_IF_RING_OFS, NM_CACHE_ALIGN, NetmapIf, NetmapRing, NetmapSlot,
    NmReq, RING_SLOTS_OFFSET,
};
use crate::shm::SharedMemory;

/// Default buffer size, as used by the kernel
pub const DEFAULT_BUF_SIZE: u32 = 2048;

/// Default slots per ring
pub const DEFAULT_SLOTS: u32 = 256;

/// Buffers 0 and 1 are reserved by the kernel
const FIRST_BUF_IDX: u32 = 2;

const POOL_ALIGN: usize = 4096;

#[derive(Debug, Clone)]
struct NicSpec {
    name: String,
    tx_rings: u16,
    rx_rings: u16,
}

#[derive(Debug, Clone, Copy)]
struct Corruption {
    nic: usize,
    dir: Direction,
    ring: u16,
    slot: u32,
}

/// Builder for [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    nics: Vec<NicSpec>,
    corrupt: Vec<(String, Direction, u16, u32)>,
    slots: u32,
    buf_size: u32,
    fail_open: bool,
}

impl MockTransportBuilder {
    /// Add an interface with the given hardware ring counts
    pub fn nic(mut self, name: &str, tx_rings: u16, rx_rings: u16) -> Self {
        assert!(name.len() <= IFNAMSIZ, "interface name too long");
        self.nics.push(NicSpec {
            name: name.to_string(),
            tx_rings,
            rx_rings,
        });
        self
    }

    /// Slots per ring
    pub fn slots(mut self, slots: u32) -> Self {
        assert!(slots > 0);
        self.slots = slots;
        self
    }

    /// Size of every pool buffer
    pub fn buf_size(mut self, buf_size: u32) -> Self {
        assert!(buf_size > 0);
        self.buf_size = buf_size;
        self
    }

    /// Point one slot at a buffer index outside the pool
    pub fn corrupt_slot(mut self, nic: &str, dir: Direction, ring: u16, slot: u32) -> Self {
        self.corrupt.push((nic.to_string(), dir, ring, slot));
        self
    }

    /// Make every `open()` fail
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Lay out the region image
    pub fn build(self) -> MockTransport {
        let corrupt = self
            .corrupt
            .iter()
            .map(|(name, dir, ring, slot)| {
                let nic = self
                    .nics
                    .iter()
                    .position(|n| &n.name == name)
                    .unwrap_or_else(|| panic!("corrupt_slot: unknown interface {name}"));
                Corruption {
                    nic,
                    dir: *dir,
                    ring: *ring,
                    slot: *slot,
                }
            })
            .collect::<Vec<_>>();

        let (image, nifp_offsets) = build_image(&self.nics, self.slots, self.buf_size, &corrupt);

        MockTransport {
            inner: Arc::new(MockInner {
                nics: self.nics,
                nifp_offsets,
                image,
                slots: self.slots,
                fail_open: self.fail_open,
                opens: AtomicUsize::new(0),
                registrations: AtomicUsize::new(0),
                maps: AtomicUsize::new(0),
                tx_syncs: AtomicUsize::new(0),
                rx_syncs: AtomicUsize::new(0),
            }),
        }
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

fn put(image: &mut [u8], at: usize, bytes: &[u8]) {
    image[at..at + bytes.len()].copy_from_slice(bytes);
}

struct RingPlan {
    nic: usize,
    dir: Direction,
    id: u16,
    offset: usize,
}

fn build_image(
    nics: &[NicSpec],
    slots: u32,
    buf_size: u32,
    corrupt: &[Corruption],
) -> (Vec<u8>, Vec<usize>) {
    let mut off = 0usize;

    let mut nifp_offsets = Vec::with_capacity(nics.len());
    for nic in nics {
        off = align_up(off, 64);
        nifp_offsets.push(off);
        let entries = nic.tx_rings as usize + nic.rx_rings as usize + 2;
        off += NETMAP_IF_RING_OFS + entries * size_of::<i64>();
    }

    // Hardware rings plus one host ring per direction; the host ring takes
    // the id just past the hardware ones.
    let ring_bytes = RING_SLOTS_OFFSET + slots as usize * size_of::<NetmapSlot>();
    let mut rings = Vec::new();
    for (n, nic) in nics.iter().enumerate() {
        for (dir, count) in [(Direction::Tx, nic.tx_rings), (Direction::Rx, nic.rx_rings)] {
            for id in 0..=count {
                off = align_up(off, NM_CACHE_ALIGN);
                rings.push(RingPlan {
                    nic: n,
                    dir,
                    id,
                    offset: off,
                });
                off += ring_bytes;
            }
        }
    }

    let pool = align_up(off, POOL_ALIGN);
    let bufs = FIRST_BUF_IDX as usize + rings.len() * slots as usize;
    let mut image = vec![0u8; pool + bufs * buf_size as usize];

    for (nic, &nifp) in nics.iter().zip(&nifp_offsets) {
        put(&mut image, nifp + offset_of!(NetmapIf, ni_name), nic.name.as_bytes());
        put(&mut image, nifp + offset_of!(NetmapIf, ni_version), &NETMAP_API.to_ne_bytes());
        put(
            &mut image,
            nifp + offset_of!(NetmapIf, ni_tx_rings),
            &u32::from(nic.tx_rings).to_ne_bytes(),
        );
        put(
            &mut image,
            nifp + offset_of!(NetmapIf, ni_rx_rings),
            &u32::from(nic.rx_rings).to_ne_bytes(),
        );
    }

    let mut next_buf = FIRST_BUF_IDX;
    for plan in &rings {
        let nic = &nics[plan.nic];
        let nifp = nifp_offsets[plan.nic];
        let entry = match plan.dir {
            Direction::Tx => plan.id as usize,
            Direction::Rx => plan.id as usize + nic.tx_rings as usize + 1,
        };
        let ring_ofs = plan.offset as i64 - nifp as i64;
        put(
            &mut image,
            nifp + NETMAP_IF_RING_OFS + entry * size_of::<i64>(),
            &ring_ofs.to_ne_bytes(),
        );

        let r = plan.offset;
        let buf_ofs = pool as i64 - r as i64;
        // TX rings start with every slot but one free; RX rings start empty.
        let (dir, tail) = match plan.dir {
            Direction::Tx => (0u16, slots - 1),
            Direction::Rx => (1u16, 0),
        };
        put(&mut image, r + offset_of!(NetmapRing, buf_ofs), &buf_ofs.to_ne_bytes());
        put(&mut image, r + offset_of!(NetmapRing, num_slots), &slots.to_ne_bytes());
        put(&mut image, r + offset_of!(NetmapRing, nr_buf_size), &buf_size.to_ne_bytes());
        put(&mut image, r + offset_of!(NetmapRing, ringid), &plan.id.to_ne_bytes());
        put(&mut image, r + offset_of!(NetmapRing, dir), &dir.to_ne_bytes());
        put(&mut image, r + offset_of!(NetmapRing, tail), &tail.to_ne_bytes());

        for s in 0..slots {
            let slot = r + RING_SLOTS_OFFSET + s as usize * size_of::<NetmapSlot>();
            let corrupted = corrupt.iter().any(|c| {
                c.nic == plan.nic && c.dir == plan.dir && c.ring == plan.id && c.slot == s
            });
            let idx = if corrupted { u32::MAX } else { next_buf };
            put(&mut image, slot + offset_of!(NetmapSlot, buf_idx), &idx.to_ne_bytes());
            next_buf += 1;
        }
    }

    (image, nifp_offsets)
}

struct MockInner {
    nics: Vec<NicSpec>,
    nifp_offsets: Vec<usize>,
    image: Vec<u8>,
    slots: u32,
    fail_open: bool,
    opens: AtomicUsize,
    registrations: AtomicUsize,
    maps: AtomicUsize,
    tx_syncs: AtomicUsize,
    rx_syncs: AtomicUsize,
}

impl MockInner {
    fn lookup(&self, req: &NmReq) -> Result<usize, TransportError> {
        self.nics
            .iter()
            .position(|n| n.name == req.name())
            .ok_or_else(|| TransportError::UnknownInterface(req.name().to_string()))
    }

    fn fill_reply(&self, nic: usize, req: &mut NmReq) {
        let spec = &self.nics[nic];
        req.nr_tx_rings = spec.tx_rings;
        req.nr_rx_rings = spec.rx_rings;
        req.nr_tx_slots = self.slots;
        req.nr_rx_slots = self.slots;
        req.nr_memsize = self.image.len() as u32;
        req.nr_offset = self.nifp_offsets[nic] as u32;
    }
}

fn invalid(request: &'static str, msg: &str) -> TransportError {
    TransportError::Ioctl {
        request,
        source: io::Error::new(io::ErrorKind::InvalidInput, msg.to_string()),
    }
}

/// Mock registration transport
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Start describing a mock device
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder {
            nics: Vec::new(),
            corrupt: Vec::new(),
            slots: DEFAULT_SLOTS,
            buf_size: DEFAULT_BUF_SIZE,
            fail_open: false,
        }
    }

    /// Size of the shared region
    pub fn memsize(&self) -> usize {
        self.inner.image.len()
    }

    /// Offset of an interface descriptor inside the region
    pub fn nifp_offset(&self, name: &str) -> Option<u32> {
        let nic = self.inner.nics.iter().position(|n| n.name == name)?;
        Some(self.inner.nifp_offsets[nic] as u32)
    }

    /// Map a fresh copy of the region without going through a device handle
    pub fn map_region(&self) -> Result<SharedMemory, TransportError> {
        let size = self.memsize();
        let region =
            SharedMemory::anonymous(size).map_err(|source| TransportError::Map { size, source })?;
        region.write_at(0, &self.inner.image);
        Ok(region)
    }

    /// Device handles opened so far
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::Relaxed)
    }

    /// Successful `NIOCREGIF` requests
    pub fn registrations(&self) -> usize {
        self.inner.registrations.load(Ordering::Relaxed)
    }

    /// Shared mappings created through device handles
    pub fn maps(&self) -> usize {
        self.inner.maps.load(Ordering::Relaxed)
    }

    /// `NIOCTXSYNC` requests
    pub fn tx_syncs(&self) -> usize {
        self.inner.tx_syncs.load(Ordering::Relaxed)
    }

    /// `NIOCRXSYNC` requests
    pub fn rx_syncs(&self) -> usize {
        self.inner.rx_syncs.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("nics", &self.inner.nics)
            .field("slots", &self.inner.slots)
            .field("memsize", &self.inner.image.len())
            .finish()
    }
}

impl NetmapTransport for MockTransport {
    fn open(&self) -> Result<Box<dyn DeviceHandle>, TransportError> {
        if self.inner.fail_open {
            return Err(TransportError::Open {
                path: "mock".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "mock device disabled"),
            });
        }
        self.inner.opens.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockHandle {
            inner: Arc::clone(&self.inner),
            bound: None,
        }))
    }
}

struct MockHandle {
    inner: Arc<MockInner>,
    bound: Option<usize>,
}

impl DeviceHandle for MockHandle {
    fn get_info(&mut self, req: &mut NmReq) -> Result<(), TransportError> {
        if req.nr_version != NETMAP_API {
            return Err(invalid("NIOCGINFO", "API version mismatch"));
        }
        let nic = self.inner.lookup(req)?;
        self.inner.fill_reply(nic, req);
        req.nr_offset = 0;
        Ok(())
    }

    fn register(&mut self, req: &mut NmReq) -> Result<(), TransportError> {
        if req.nr_version != NETMAP_API {
            return Err(invalid("NIOCREGIF", "API version mismatch"));
        }
        if self.bound.is_some() {
            return Err(invalid("NIOCREGIF", "handle already bound"));
        }
        let nic = self.inner.lookup(req)?;
        let spec = &self.inner.nics[nic];
        if req.ring() >= spec.tx_rings.max(spec.rx_rings) {
            return Err(invalid("NIOCREGIF", "ring id out of range"));
        }

        self.inner.fill_reply(nic, req);
        self.bound = Some(nic);
        self.inner.registrations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn map(&self, size: usize) -> Result<SharedMemory, TransportError> {
        if self.bound.is_none() || size > self.inner.image.len() {
            return Err(TransportError::Map {
                size,
                source: io::Error::new(io::ErrorKind::InvalidInput, "bad mapping request"),
            });
        }
        let region = SharedMemory::anonymous(self.inner.image.len())
            .map_err(|source| TransportError::Map { size, source })?;
        region.write_at(0, &self.inner.image);
        self.inner.maps.fetch_add(1, Ordering::Relaxed);
        Ok(region)
    }

    fn tx_sync(&self) -> Result<(), TransportError> {
        if self.bound.is_none() {
            return Err(invalid("NIOCTXSYNC", "handle not bound"));
        }
        self.inner.tx_syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rx_sync(&self) -> Result<(), TransportError> {
        if self.bound.is_none() {
            return Err(invalid("NIOCRXSYNC", "handle not bound"));
        }
        self.inner.rx_syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
