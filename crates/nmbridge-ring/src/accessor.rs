//! Address arithmetic over the shared region.
//!
//! These are the `NETMAP_IF`, `NETMAP_TXRING`/`NETMAP_RXRING`, `NETMAP_BUF`
//! and `NETMAP_BUF_IDX` computations. Interface and ring lookups are validated
//! once at resolution time against the region bounds; after that, per-slot
//! work only does index arithmetic. Buffer resolution has a checked form
//! ([`RingView::buf`]) and a branch-free trusted form
//! ([`RingView::buf_unchecked`]).

use std::fmt;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::LayoutError;
use crate::layout::{NETMAP_IF_RING_OFS, NetmapIf, NetmapRing, NetmapSlot, RING_SLOTS_OFFSET};
use crate::shm::SharedMemory;

/// Ring direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Transmit ring
    Tx,
    /// Receive ring
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => write!(f, "TX"),
            Self::Rx => write!(f, "RX"),
        }
    }
}

/// Next slot index, wrapping at `num_slots` (`nm_ring_next`)
#[inline(always)]
pub fn ring_next(num_slots: u32, i: u32) -> u32 {
    if i + 1 == num_slots { 0 } else { i + 1 }
}

/// Slots between `cur` and `tail`, modulo `num_slots` (`nm_ring_space`)
#[inline(always)]
pub fn ring_space(num_slots: u32, cur: u32, tail: u32) -> u32 {
    if tail >= cur {
        tail - cur
    } else {
        tail + num_slots - cur
    }
}

/// A resolved interface descriptor
pub struct InterfaceRef {
    region: Arc<SharedMemory>,
    nifp: NonNull<NetmapIf>,
    offset: usize,
    tx_rings: u32,
    rx_rings: u32,
}

impl InterfaceRef {
    /// Resolve the interface descriptor at `offset` inside `region`
    pub(crate) fn resolve(region: Arc<SharedMemory>, offset: u32) -> Result<Self, LayoutError> {
        let ptr = region.check(
            "netmap_if",
            i64::from(offset),
            NETMAP_IF_RING_OFS,
            align_of::<NetmapIf>(),
        )?;
        let nifp = ptr.cast::<NetmapIf>();
        // SAFETY: the header lies inside the mapping and is suitably aligned (checked).
        let (tx_rings, rx_rings) = unsafe {
            let nif = nifp.as_ref();
            (nif.ni_tx_rings, nif.ni_rx_rings)
        };

        // ring_ofs[] covers every hardware ring plus one host ring per direction.
        let entries = tx_rings as usize + rx_rings as usize + 2;
        region.check(
            "netmap_if ring_ofs",
            i64::from(offset) + NETMAP_IF_RING_OFS as i64,
            entries * size_of::<i64>(),
            align_of::<i64>(),
        )?;

        Ok(Self {
            region,
            nifp,
            offset: offset as usize,
            tx_rings,
            rx_rings,
        })
    }

    /// Offset of the descriptor inside the region
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Hardware transmit rings
    pub fn tx_rings(&self) -> u32 {
        self.tx_rings
    }

    /// Hardware receive rings
    pub fn rx_rings(&self) -> u32 {
        self.rx_rings
    }

    /// Rings available in `dir`
    pub fn rings(&self, dir: Direction) -> u32 {
        match dir {
            Direction::Tx => self.tx_rings,
            Direction::Rx => self.rx_rings,
        }
    }

    /// Interface name recorded by the kernel
    pub fn name(&self) -> String {
        // SAFETY: header validated at resolution.
        let raw = unsafe { self.nifp.as_ref().ni_name };
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    /// The shared region this descriptor lives in
    pub fn region(&self) -> &Arc<SharedMemory> {
        &self.region
    }

    /// Resolve ring `id` in direction `dir` (`NETMAP_TXRING` / `NETMAP_RXRING`)
    pub fn ring(&self, id: u16, dir: Direction) -> Result<RingView, LayoutError> {
        let available = self.rings(dir);
        if u32::from(id) >= available {
            return Err(LayoutError::NoSuchRing {
                dir,
                ring: id,
                available,
            });
        }

        let slot = match dir {
            Direction::Tx => id as usize,
            Direction::Rx => id as usize + self.tx_rings as usize + 1,
        };
        // SAFETY: ring_ofs[] was bounds checked for all tx + rx + 2 entries.
        let ring_ofs = unsafe {
            self.nifp
                .cast::<u8>()
                .add(NETMAP_IF_RING_OFS)
                .cast::<i64>()
                .add(slot)
                .read()
        };

        RingView::resolve(
            Arc::clone(&self.region),
            self.offset as i64 + ring_ofs,
            dir,
        )
    }
}

impl fmt::Debug for InterfaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceRef")
            .field("offset", &self.offset)
            .field("tx_rings", &self.tx_rings)
            .field("rx_rings", &self.rx_rings)
            .finish()
    }
}

// SAFETY: the interface descriptor is read-only from userspace and the region
// it points into is kept alive by the `Arc`.
unsafe impl Send for InterfaceRef {}
// SAFETY: see Send; no method mutates through the pointer.
unsafe impl Sync for InterfaceRef {}

#[derive(Clone, Copy)]
enum Cursor {
    Head,
    Cur,
    Tail,
}

/// A resolved ring descriptor with its slot array and buffer pool
///
/// Slot and cursor writes go straight into kernel-visible memory. A view is
/// `Send` but not `Sync`: exactly one thread drives a ring at a time.
pub struct RingView {
    region: Arc<SharedMemory>,
    ring: NonNull<NetmapRing>,
    slots: NonNull<NetmapSlot>,
    dir: Direction,
    num_slots: u32,
    buf_size: u32,
    /// Address of buffer 0 (`ring + buf_ofs`); may lie outside the region when corrupt
    pool: *mut u8,
    /// Number of buffers between `pool` and the end of the region
    pool_bufs: u64,
}

impl RingView {
    fn resolve(region: Arc<SharedMemory>, offset: i64, dir: Direction) -> Result<Self, LayoutError> {
        let ptr = region.check(
            "netmap_ring",
            offset,
            RING_SLOTS_OFFSET,
            align_of::<NetmapRing>(),
        )?;
        let ring = ptr.cast::<NetmapRing>();
        // SAFETY: header inside the mapping and aligned (checked above).
        let (num_slots, buf_size, buf_ofs) = unsafe {
            let r = ring.as_ref();
            (r.num_slots, r.nr_buf_size, r.buf_ofs)
        };

        if num_slots == 0 || buf_size == 0 {
            return Err(LayoutError::BadGeometry {
                num_slots,
                buf_size,
            });
        }

        region.check(
            "netmap_ring slots",
            offset + RING_SLOTS_OFFSET as i64,
            num_slots as usize * size_of::<NetmapSlot>(),
            align_of::<NetmapSlot>(),
        )?;

        // SAFETY: the slot array was bounds checked above.
        let slots = unsafe { ptr.add(RING_SLOTS_OFFSET) }.cast::<NetmapSlot>();

        let pool_offset = offset.saturating_add(buf_ofs);
        let pool_bufs = if pool_offset >= 0 && (pool_offset as u64) < region.len() as u64 {
            (region.len() as u64 - pool_offset as u64) / u64::from(buf_size)
        } else {
            0
        };
        let pool = region.base().as_ptr().wrapping_offset(pool_offset as isize);

        Ok(Self {
            region,
            ring,
            slots,
            dir,
            num_slots,
            buf_size,
            pool,
            pool_bufs,
        })
    }

    /// Ring direction
    pub fn dir(&self) -> Direction {
        self.dir
    }

    /// Number of slots
    #[inline(always)]
    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    /// Size of every buffer in the pool
    pub fn buf_size(&self) -> u32 {
        self.buf_size
    }

    /// Kernel ring id
    pub fn ring_id(&self) -> u16 {
        // SAFETY: header validated at resolution.
        unsafe { self.ring.as_ref().ringid }
    }

    /// The shared region this ring lives in
    pub fn region(&self) -> &Arc<SharedMemory> {
        &self.region
    }

    #[inline(always)]
    fn cursor(&self, which: Cursor) -> &AtomicU32 {
        let ring = self.ring.as_ptr();
        // SAFETY: `ring` is the header validated at resolution and stays mapped
        // while `self.region` is alive. The cursor fields are aligned u32s the
        // kernel also accesses concurrently, so they are only touched atomically.
        unsafe {
            let field = match which {
                Cursor::Head => ptr::addr_of_mut!((*ring).head),
                Cursor::Cur => ptr::addr_of_mut!((*ring).cur),
                Cursor::Tail => ptr::addr_of_mut!((*ring).tail),
            };
            AtomicU32::from_ptr(field)
        }
    }

    /// First slot owned by userspace
    #[inline(always)]
    pub fn head(&self) -> u32 {
        self.cursor(Cursor::Head).load(Ordering::Acquire)
    }

    /// Wakeup point
    #[inline(always)]
    pub fn cur(&self) -> u32 {
        self.cursor(Cursor::Cur).load(Ordering::Acquire)
    }

    /// First slot owned by the kernel
    #[inline(always)]
    pub fn tail(&self) -> u32 {
        self.cursor(Cursor::Tail).load(Ordering::Acquire)
    }

    /// Publish `pos` as the new `head` and `cur`
    #[inline(always)]
    pub fn publish(&mut self, pos: u32) {
        debug_assert!(pos < self.num_slots);
        self.cursor(Cursor::Cur).store(pos, Ordering::Release);
        self.cursor(Cursor::Head).store(pos, Ordering::Release);
    }

    /// Overwrite `tail`, the way the kernel does on sync
    #[cfg(any(test, feature = "mock"))]
    pub fn set_tail(&mut self, tail: u32) {
        assert!(tail < self.num_slots);
        self.cursor(Cursor::Tail).store(tail, Ordering::Release);
    }

    /// Next slot index, wrapping
    #[inline(always)]
    pub fn next(&self, i: u32) -> u32 {
        ring_next(self.num_slots, i)
    }

    /// Slots available to userspace from `cur` up to `tail`
    pub fn space(&self) -> u32 {
        ring_space(self.num_slots, self.cur(), self.tail())
    }

    /// Whether no slot is available to userspace
    pub fn is_empty(&self) -> bool {
        self.cur() == self.tail()
    }

    /// Raw pointer to slot `i`; `i` must be below `num_slots`
    #[inline(always)]
    pub(crate) fn slot_ptr(&self, i: u32) -> *mut NetmapSlot {
        debug_assert!(i < self.num_slots);
        // SAFETY: callers pass i < num_slots; the array was bounds checked.
        unsafe { self.slots.as_ptr().add(i as usize) }
    }

    /// Slot `i`
    ///
    /// # Panics
    /// Panics when `i >= num_slots`.
    #[inline]
    pub fn slot(&self, i: u32) -> &NetmapSlot {
        assert!(i < self.num_slots, "slot {i} out of range");
        // SAFETY: in range; the kernel does not touch slots in the user segment.
        unsafe { &*self.slot_ptr(i) }
    }

    /// Mutable slot `i`
    ///
    /// # Panics
    /// Panics when `i >= num_slots`.
    #[inline]
    pub fn slot_mut(&mut self, i: u32) -> &mut NetmapSlot {
        assert!(i < self.num_slots, "slot {i} out of range");
        // SAFETY: in range; `&mut self` guarantees no other reference from this view.
        unsafe { &mut *self.slot_ptr(i) }
    }

    /// Address of buffer `idx`, or `None` when it does not lie inside the region
    #[inline(always)]
    pub fn buf(&self, idx: u32) -> Option<NonNull<u8>> {
        if u64::from(idx) < self.pool_bufs {
            NonNull::new(self.buf_unchecked(idx))
        } else {
            None
        }
    }

    /// Address of buffer `idx` without validation (`NETMAP_BUF`)
    ///
    /// Computing the address is always safe; dereferencing it is only valid for
    /// indices the kernel handed out.
    #[inline(always)]
    pub fn buf_unchecked(&self, idx: u32) -> *mut u8 {
        self.pool
            .wrapping_add(idx as usize * self.buf_size as usize)
    }

    /// Buffer index of `buf` (`NETMAP_BUF_IDX`)
    #[inline(always)]
    pub fn buf_idx(&self, buf: *const u8) -> u32 {
        ((buf as usize).wrapping_sub(self.pool as usize) / self.buf_size as usize) as u32
    }

    /// Address of the buffer currently referenced by slot `i`
    pub fn slot_buf(&self, i: u32) -> Option<NonNull<u8>> {
        self.buf(self.slot(i).buf_idx)
    }
}

impl fmt::Debug for RingView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingView")
            .field("dir", &self.dir)
            .field("num_slots", &self.num_slots)
            .field("buf_size", &self.buf_size)
            .field("head", &self.head())
            .field("cur", &self.cur())
            .field("tail", &self.tail())
            .finish()
    }
}

// SAFETY: a view points into a region kept alive by its `Arc`. It may move to
// another worker thread, but it is not Sync: slot and cursor mutation needs a
// single owner.
unsafe impl Send for RingView {}
