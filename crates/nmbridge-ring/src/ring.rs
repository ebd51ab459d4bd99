//! Ring handles and their per-direction queues.

use std::fmt;
use std::sync::Arc;

use crate::accessor::{Direction, InterfaceRef, RingView};
use crate::error::{NetmapError, Result};
use crate::layout::NetmapSlot;
use crate::packet::PacketBuf;
use crate::stats::PortStats;
use crate::sync;
use crate::transport::DeviceHandle;

/// One direction of a registered ring: the kernel ring plus its shadow descriptors
pub struct Queue {
    port: Arc<str>,
    id: u16,
    pub(crate) view: RingView,
    pub(crate) shadows: Box<[PacketBuf]>,
}

impl Queue {
    /// Build the shadow descriptors for every slot of `view`
    pub(crate) fn new(port: Arc<str>, id: u16, view: RingView) -> Self {
        let shadows = (0..view.num_slots())
            .map(|i| {
                let slot = view.slot(i);
                PacketBuf::new(view.buf(slot.buf_idx), slot.len, view.buf_size())
            })
            .collect();

        Self {
            port,
            id,
            view,
            shadows,
        }
    }

    /// Owning interface
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Ring id
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Queue direction
    pub fn dir(&self) -> Direction {
        self.view.dir()
    }

    /// The kernel ring
    pub fn view(&self) -> &RingView {
        &self.view
    }

    /// Mutable kernel ring
    pub fn view_mut(&mut self) -> &mut RingView {
        &mut self.view
    }

    /// Number of slots
    #[inline(always)]
    pub fn num_slots(&self) -> u32 {
        self.view.num_slots()
    }

    /// First slot owned by userspace
    pub fn head(&self) -> u32 {
        self.view.head()
    }

    /// Wakeup point
    pub fn cur(&self) -> u32 {
        self.view.cur()
    }

    /// First slot owned by the kernel
    pub fn tail(&self) -> u32 {
        self.view.tail()
    }

    /// Slots available from `cur` up to `tail`
    pub fn space(&self) -> u32 {
        self.view.space()
    }

    /// Slot `i`
    pub fn slot(&self, i: u32) -> &NetmapSlot {
        self.view.slot(i)
    }

    /// Mutable slot `i`
    pub fn slot_mut(&mut self, i: u32) -> &mut NetmapSlot {
        self.view.slot_mut(i)
    }

    /// Shadow descriptor of slot `i`
    pub fn packet(&self, i: u32) -> &PacketBuf {
        &self.shadows[i as usize]
    }

    /// Mutable shadow descriptor of slot `i`
    pub fn packet_mut(&mut self, i: u32) -> &mut PacketBuf {
        &mut self.shadows[i as usize]
    }

    /// Packet bytes of slot `i` (`data_len` bytes), or `None` if the slot lost its buffer
    pub fn payload(&self, i: u32) -> Option<&[u8]> {
        let pkt = &self.shadows[i as usize];
        if pkt.is_null() {
            return None;
        }
        let len = u32::from(pkt.data_len()).min(pkt.buf_size()) as usize;
        // SAFETY: non-null shadow pointers are only ever derived from checked
        // buffer indices, so `buf_size` bytes lie inside the mapped pool.
        Some(unsafe { std::slice::from_raw_parts(pkt.data_ptr(), len) })
    }

    /// Whole buffer of slot `i` (`buf_size` bytes), or `None` if the slot lost its buffer
    pub fn payload_mut(&mut self, i: u32) -> Option<&mut [u8]> {
        let pkt = &self.shadows[i as usize];
        if pkt.is_null() {
            return None;
        }
        // SAFETY: see `payload`; `&mut self` makes this queue the only accessor
        // of buffers referenced by its user-owned slots.
        Some(unsafe { std::slice::from_raw_parts_mut(pkt.data_ptr(), pkt.buf_size() as usize) })
    }

    /// Re-derive the shadow data pointer of slot `i` from its buffer index
    #[inline(always)]
    pub(crate) fn rebind(&mut self, i: u32) {
        let data = self.view.buf(self.view.slot(i).buf_idx);
        self.shadows[i as usize].rebind(data);
    }

    /// First slot whose shadow descriptor has no data pointer
    pub fn first_null(&self) -> Option<u32> {
        self.shadows.iter().position(PacketBuf::is_null).map(|i| i as u32)
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("port", &self.port)
            .field("id", &self.id)
            .field("view", &self.view)
            .finish()
    }
}

fn no_queue(port: &str, ring: u16, dir: Direction) -> NetmapError {
    NetmapError::NoSuchQueue {
        port: port.to_string(),
        ring,
        dir,
    }
}

/// A registered ring of a port
///
/// Holds the device handle bound to this ring id, the interface descriptor,
/// and one [`Queue`] per direction the port was configured for. A ring is
/// `Send` but neither `Sync` nor `Clone`: a worker takes it out of its
/// [`Port`](crate::Port), drives it, and hands it back.
pub struct Ring {
    port: Arc<str>,
    id: u16,
    device: Box<dyn DeviceHandle>,
    nifp: InterfaceRef,
    tx: Option<Queue>,
    rx: Option<Queue>,
    stats: Arc<PortStats>,
}

impl Ring {
    pub(crate) fn new(
        port: Arc<str>,
        id: u16,
        device: Box<dyn DeviceHandle>,
        nifp: InterfaceRef,
        tx: Option<Queue>,
        rx: Option<Queue>,
        stats: Arc<PortStats>,
    ) -> Self {
        Self {
            port,
            id,
            device,
            nifp,
            tx,
            rx,
            stats,
        }
    }

    /// Owning interface
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Ring id
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Interface descriptor this ring was resolved from
    pub fn interface(&self) -> &InterfaceRef {
        &self.nifp
    }

    /// Counters of the owning port
    pub fn stats(&self) -> &Arc<PortStats> {
        &self.stats
    }

    /// Whether the ring has a transmit queue
    pub fn has_tx(&self) -> bool {
        self.tx.is_some()
    }

    /// Whether the ring has a receive queue
    pub fn has_rx(&self) -> bool {
        self.rx.is_some()
    }

    /// Transmit queue
    pub fn tx(&self) -> Result<&Queue> {
        self.tx
            .as_ref()
            .ok_or_else(|| no_queue(&self.port, self.id, Direction::Tx))
    }

    /// Receive queue
    pub fn rx(&self) -> Result<&Queue> {
        self.rx
            .as_ref()
            .ok_or_else(|| no_queue(&self.port, self.id, Direction::Rx))
    }

    /// Mutable transmit queue
    pub fn tx_mut(&mut self) -> Result<&mut Queue> {
        self.tx
            .as_mut()
            .ok_or_else(|| no_queue(&self.port, self.id, Direction::Tx))
    }

    /// Mutable receive queue
    pub fn rx_mut(&mut self) -> Result<&mut Queue> {
        self.rx
            .as_mut()
            .ok_or_else(|| no_queue(&self.port, self.id, Direction::Rx))
    }

    /// Transmit queue together with the port counters
    pub(crate) fn tx_with_stats(&mut self) -> Result<(&mut Queue, &PortStats)> {
        match self.tx.as_mut() {
            Some(tx) => Ok((tx, &self.stats)),
            None => Err(no_queue(&self.port, self.id, Direction::Tx)),
        }
    }

    /// Both queues together with the port counters
    pub(crate) fn split(&mut self) -> Result<(&mut Queue, &mut Queue, &PortStats)> {
        match (self.tx.as_mut(), self.rx.as_mut()) {
            (Some(tx), Some(rx)) => Ok((tx, rx, &self.stats)),
            (None, _) => Err(no_queue(&self.port, self.id, Direction::Tx)),
            (_, None) => Err(no_queue(&self.port, self.id, Direction::Rx)),
        }
    }

    /// Stamp `len` on `count` transmit shadows starting at `start`
    pub fn tx_len_stamp(&mut self, start: u32, count: u32, len: u16) -> Result<()> {
        sync::tx_len_stamp(self.tx_mut()?, start, count, len);
        Ok(())
    }

    /// Pull slot lengths of `count` received slots into their shadows
    pub fn rx_drain(&mut self, start: u32, count: u32) -> Result<()> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| no_queue(&self.port, self.id, Direction::Rx))?;
        sync::rx_drain(rx, &self.stats, start, count);
        Ok(())
    }

    /// Push shadow lengths of `count` transmit slots and publish them
    pub fn tx_fill(&mut self, start: u32, count: u32) -> Result<()> {
        let (tx, stats) = self.tx_with_stats()?;
        sync::tx_fill(tx, stats, start, count);
        Ok(())
    }

    /// Hand published transmit slots to the kernel
    pub fn tx_sync(&self) -> Result<()> {
        self.device
            .tx_sync()
            .map_err(|source| NetmapError::Transport {
                port: self.port.to_string(),
                ring: self.id,
                source,
            })
    }

    /// Collect newly received slots from the kernel
    pub fn rx_sync(&self) -> Result<()> {
        self.device
            .rx_sync()
            .map_err(|source| NetmapError::Transport {
                port: self.port.to_string(),
                ring: self.id,
                source,
            })
    }
}

impl fmt::Debug for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("port", &self.port)
            .field("id", &self.id)
            .field("tx", &self.tx)
            .field("rx", &self.rx)
            .finish_non_exhaustive()
    }
}

/// Transmit and receive queue of ring 0 for each named interface, all
/// resolved from one mock region
#[cfg(test)]
pub(crate) fn mock_queues(nics: &[&str], slots: u32) -> Vec<(Queue, Queue)> {
    use crate::transport::mock::MockTransport;

    let mock = nics
        .iter()
        .fold(MockTransport::builder().slots(slots), |b, name| b.nic(name, 1, 1))
        .build();
    let region = Arc::new(mock.map_region().unwrap());
    nics.iter()
        .map(|&name| {
            let nifp = region.interface(mock.nifp_offset(name).unwrap()).unwrap();
            let port: Arc<str> = Arc::from(name);
            (
                Queue::new(Arc::clone(&port), 0, nifp.ring(0, Direction::Tx).unwrap()),
                Queue::new(port, 0, nifp.ring(0, Direction::Rx).unwrap()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NetmapTransport;
    use crate::transport::mock::MockTransport;

    fn ring(tx: bool, rx: bool) -> (Ring, MockTransport) {
        let mock = MockTransport::builder().nic("eth0", 1, 1).slots(16).build();
        let region = Arc::new(mock.map_region().unwrap());
        let nifp = region.interface(mock.nifp_offset("eth0").unwrap()).unwrap();
        let port: Arc<str> = Arc::from("eth0");
        let tx = tx.then(|| Queue::new(Arc::clone(&port), 0, nifp.ring(0, Direction::Tx).unwrap()));
        let rx = rx.then(|| Queue::new(Arc::clone(&port), 0, nifp.ring(0, Direction::Rx).unwrap()));

        let mut device = mock.open().unwrap();
        let mut req = crate::layout::NmReq::for_port("eth0", 1, 1).unwrap();
        device.register(&mut req).unwrap();

        let ring = Ring::new(port, 0, device, nifp, tx, rx, Arc::new(PortStats::new()));
        (ring, mock)
    }

    #[test]
    fn test_shadows_follow_slots() {
        let (ring, _mock) = ring(true, true);
        let tx = ring.tx().unwrap();
        assert_eq!(tx.first_null(), None);
        for i in 0..tx.num_slots() {
            assert_eq!(
                tx.packet(i).data_ptr(),
                tx.view().buf_unchecked(tx.slot(i).buf_idx)
            );
            assert_eq!(tx.packet(i).buf_size(), 2048);
        }
    }

    #[test]
    fn test_missing_queue() {
        let (mut ring, _mock) = ring(true, false);
        assert!(ring.has_tx());
        assert!(!ring.has_rx());
        assert!(matches!(
            ring.rx_drain(0, 1),
            Err(NetmapError::NoSuchQueue { dir: Direction::Rx, .. })
        ));
        assert!(matches!(
            ring.split(),
            Err(NetmapError::NoSuchQueue { dir: Direction::Rx, .. })
        ));
    }

    #[test]
    fn test_payload_views() {
        let (mut ring, _mock) = ring(true, true);
        let bytes = [0xde_u8, 0xad, 0xbe, 0xef];
        let tx = ring.tx_mut().unwrap();
        tx.payload_mut(3).unwrap()[..4].copy_from_slice(&bytes);
        tx.packet_mut(3).set_len(4);
        assert_eq!(tx.payload(3).unwrap(), &bytes[..]);
        assert_eq!(tx.payload_mut(3).unwrap().len(), 2048);
    }

    #[test]
    fn test_sync_goes_through_device() {
        let (ring, mock) = ring(true, true);
        ring.tx_sync().unwrap();
        ring.rx_sync().unwrap();
        ring.rx_sync().unwrap();
        assert_eq!(mock.tx_syncs(), 1);
        assert_eq!(mock.rx_syncs(), 2);
    }
}
