//! Shadow descriptor / slot synchronization over a contiguous run of slots.
//!
//! None of these routines call into the kernel. Each walks `count` slots from
//! `start`, wrapping at `num_slots`, and prefetches the next slot and shadow
//! descriptor one step ahead. Counters are summed locally and published once
//! per call.

use crate::layout::NS_REPORT;
use crate::prefetch::prefetch_write;
use crate::ring::Queue;
use crate::stats::PortStats;

#[inline(always)]
fn prefetch_next(queue: &Queue, next: u32) {
    prefetch_write(queue.view.slot_ptr(next));
    prefetch_write(&queue.shadows[next as usize]);
}

#[inline(always)]
fn check_run(queue: &Queue, start: u32, count: u32) {
    let num_slots = queue.num_slots();
    assert!(start < num_slots, "start slot {start} out of range ({num_slots} slots)");
    debug_assert!(count <= num_slots, "run of {count} exceeds ring of {num_slots}");
}

/// Set `pkt_len`/`data_len` of `count` transmit shadows to `len` and clear the slot flags
pub fn tx_len_stamp(queue: &mut Queue, start: u32, count: u32, len: u16) {
    check_run(queue, start, count);
    let mut i = start;
    for _ in 0..count {
        let next = queue.view.next(i);
        prefetch_next(queue, next);

        queue.shadows[i as usize].set_len(len);
        queue.view.slot_mut(i).flags = 0;
        i = next;
    }
}

/// Copy received slot lengths into their shadows and clear the slot flags
///
/// Adds `count` to the received packets and the summed lengths to the
/// received bytes of `stats`.
pub fn rx_drain(queue: &mut Queue, stats: &PortStats, start: u32, count: u32) {
    check_run(queue, start, count);
    let mut bytes = 0u64;
    let mut i = start;
    for _ in 0..count {
        let next = queue.view.next(i);
        prefetch_next(queue, next);

        let slot = queue.view.slot_mut(i);
        let len = slot.len;
        slot.flags = 0;
        queue.shadows[i as usize].set_len(len);
        bytes += u64::from(len);
        i = next;
    }
    stats.record_rx(u64::from(count), bytes);
}

/// Copy shadow lengths into `count` transmit slots and publish them
///
/// The last slot of the run gets [`NS_REPORT`]; `head` and `cur` move to the
/// slot after the run. Adds to the transmitted counters of `stats`. A run of
/// zero slots leaves the ring untouched.
pub fn tx_fill(queue: &mut Queue, stats: &PortStats, start: u32, count: u32) {
    check_run(queue, start, count);
    if count == 0 {
        return;
    }

    let mut bytes = 0u64;
    let mut last = start;
    let mut i = start;
    for _ in 0..count {
        let next = queue.view.next(i);
        prefetch_next(queue, next);

        let len = queue.shadows[i as usize].data_len();
        queue.view.slot_mut(i).len = len;
        bytes += u64::from(len);
        last = i;
        i = next;
    }

    queue.view.slot_mut(last).flags |= NS_REPORT;
    queue.view.publish(i);
    stats.record_tx(u64::from(count), bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::mock_queues;

    #[test]
    fn test_rx_drain_counts_lengths() {
        let (_tx, mut rx) = mock_queues(&["eth0"], 16).pop().unwrap();
        let stats = PortStats::new();
        for (i, len) in [64u16, 128, 256, 512].into_iter().enumerate() {
            let slot = rx.slot_mut(i as u32);
            slot.len = len;
            slot.flags = 0xff;
        }

        rx_drain(&mut rx, &stats, 0, 4);

        assert_eq!(stats.fetch_rx_packets(), 4);
        assert_eq!(stats.fetch_rx_bytes(), 960);
        assert_eq!(stats.fetch_rx_packets(), 0);
        for (i, len) in [64u16, 128, 256, 512].into_iter().enumerate() {
            assert_eq!(rx.packet(i as u32).data_len(), len);
            assert_eq!(rx.packet(i as u32).pkt_len(), u32::from(len));
            assert_eq!(rx.slot(i as u32).flags, 0);
        }
    }

    #[test]
    fn test_rx_drain_wraps() {
        let (_tx, mut rx) = mock_queues(&["eth0"], 8).pop().unwrap();
        let stats = PortStats::new();
        for i in [6u32, 7, 0, 1] {
            rx.slot_mut(i).len = 100;
        }
        rx_drain(&mut rx, &stats, 6, 4);
        assert_eq!(stats.fetch_rx_bytes(), 400);
        assert_eq!(rx.packet(1).data_len(), 100);
        assert_eq!(rx.packet(2).data_len(), 0);
    }

    #[test]
    fn test_tx_len_stamp() {
        let (mut tx, _rx) = mock_queues(&["eth0"], 8).pop().unwrap();
        tx.slot_mut(3).flags = 0xff;
        tx_len_stamp(&mut tx, 2, 3, 60);

        assert_eq!(tx.packet(1).data_len(), 0);
        for i in 2..5 {
            assert_eq!(tx.packet(i).data_len(), 60);
            assert_eq!(tx.packet(i).pkt_len(), 60);
            assert_eq!(tx.slot(i).flags, 0);
        }
        assert_eq!(tx.packet(5).data_len(), 0);
        // Stamping never touches the slot length or the cursors
        assert_eq!(tx.slot(2).len, 0);
        assert_eq!(tx.head(), 0);
    }

    #[test]
    fn test_tx_fill_publishes_and_reports_once() {
        let (mut tx, _rx) = mock_queues(&["eth0"], 8).pop().unwrap();
        let stats = PortStats::new();
        tx_len_stamp(&mut tx, 0, 5, 60);
        tx_fill(&mut tx, &stats, 0, 5);

        assert_eq!(tx.head(), 5);
        assert_eq!(tx.cur(), 5);
        for i in 0..5 {
            assert_eq!(tx.slot(i).len, 60);
        }
        let reported: Vec<u32> = (0..8)
            .filter(|&i| tx.slot(i).flags & NS_REPORT != 0)
            .collect();
        assert_eq!(reported, vec![4]);
        assert_eq!(stats.fetch_tx_packets(), 5);
        assert_eq!(stats.fetch_tx_bytes(), 300);
    }

    #[test]
    fn test_tx_fill_wraps_to_start() {
        let (mut tx, _rx) = mock_queues(&["eth0"], 8).pop().unwrap();
        let stats = PortStats::new();
        tx_fill(&mut tx, &stats, 6, 2);
        assert_eq!(tx.head(), 0);
        assert_eq!(tx.cur(), 0);
        assert_ne!(tx.slot(7).flags & NS_REPORT, 0);
    }

    #[test]
    fn test_tx_fill_empty_run() {
        let (mut tx, _rx) = mock_queues(&["eth0"], 8).pop().unwrap();
        let stats = PortStats::new();
        tx_fill(&mut tx, &stats, 3, 0);
        assert_eq!(tx.head(), 0);
        assert!((0..8).all(|i| tx.slot(i).flags == 0));
        assert_eq!(stats.fetch_tx_packets(), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_start_out_of_range() {
        let (mut tx, _rx) = mock_queues(&["eth0"], 8).pop().unwrap();
        tx_len_stamp(&mut tx, 8, 1, 60);
    }
}
