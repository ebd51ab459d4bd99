//! Zero-copy forwarding by buffer exchange.
//!
//! A receive slot and a transmit slot trade buffer indices: the received
//! packet's buffer moves to the transmit ring and the transmit ring's spare
//! buffer takes its place in the receive ring. No payload byte is copied.
//!
//! Every shadow descriptor of both rings is checked for a data pointer before
//! and after the exchange. A missing pointer means the ring no longer matches
//! its shadows, and there is no way to continue safely: the process goes down
//! through [`ring_violation`].

use crate::error::Result;
use crate::layout::{NS_BUF_CHANGED, NS_REPORT};
use crate::prefetch::prefetch_write;
use crate::ring::{Queue, Ring};
use crate::stats::PortStats;

/// Log and abort on a shadow descriptor without a data pointer
///
/// Never unwinds, whatever the panic strategy of the final binary.
#[cold]
#[inline(never)]
fn ring_violation(queue: &Queue, slot: u32, stage: &'static str) -> ! {
    let buf_idx = queue.slot(slot).buf_idx;
    tracing::error!(
        port = queue.port(),
        ring = queue.id(),
        dir = %queue.dir(),
        slot,
        buf_idx,
        stage,
        "Shadow descriptor has no data pointer"
    );
    eprintln!(
        "ring consistency violation: {} ring {} {} slot {} (buf_idx {}) has no data pointer {}",
        queue.port(),
        queue.id(),
        queue.dir(),
        slot,
        buf_idx,
        stage
    );
    std::process::abort();
}

#[inline]
fn assert_consistent(queue: &Queue, stage: &'static str) {
    if let Some(slot) = queue.first_null() {
        ring_violation(queue, slot, stage);
    }
}

/// Exchange `count` buffers between a transmit and a receive queue
///
/// Starts at each ring's `head`. Both rings must have `count` slots available
/// from there; this is only checked in debug builds. Afterwards both rings'
/// `head` and `cur` have advanced by `count`, the final exchanged slot of each
/// ring carries [`NS_REPORT`] and every exchanged slot carries
/// [`NS_BUF_CHANGED`]. The transmitted counters of `stats` grow by `count`
/// packets and the exchanged lengths.
///
/// # Aborts
/// Writes a "ring consistency violation" diagnostic to stderr and aborts the
/// process when a shadow descriptor of either ring has no data pointer,
/// before or after the exchange.
pub fn swap_queues(count: u32, tx: &mut Queue, rx: &mut Queue, stats: &PortStats) {
    assert_consistent(tx, "before swap");
    assert_consistent(rx, "before swap");
    if count == 0 {
        return;
    }
    debug_assert!(count <= tx.num_slots() && count <= rx.num_slots());
    debug_assert!(count <= tx.space() && count <= rx.space());

    let mut t = tx.view.head();
    let mut r = rx.view.head();
    let mut bytes = 0u64;

    for n in 0..count {
        let t_next = tx.view.next(t);
        let r_next = rx.view.next(r);
        prefetch_write(tx.view.slot_ptr(t_next));
        prefetch_write(rx.view.slot_ptr(r_next));
        prefetch_write(&rx.shadows[r_next as usize]);

        let tx_idx = tx.view.slot(t).buf_idx;
        let rx_idx = rx.view.slot(r).buf_idx;
        tx.view.slot_mut(t).buf_idx = rx_idx;
        rx.view.slot_mut(r).buf_idx = tx_idx;
        tx.rebind(t);
        rx.rebind(r);

        let len = rx.shadows[r as usize].data_len();
        tx.shadows[t as usize].set_len(len);
        let slot = tx.view.slot_mut(t);
        slot.len = len;
        slot.flags = NS_BUF_CHANGED;
        rx.view.slot_mut(r).flags = NS_BUF_CHANGED;
        bytes += u64::from(len);

        if n + 1 < count {
            t = t_next;
            r = r_next;
        }
    }

    tx.view.slot_mut(t).flags |= NS_REPORT;
    rx.view.slot_mut(r).flags |= NS_REPORT;
    t = tx.view.next(t);
    r = rx.view.next(r);

    // All slot writes of both rings happen before either cursor moves.
    tx.view.publish(t);
    rx.view.publish(r);

    stats.record_tx(u64::from(count), bytes);

    assert_consistent(tx, "after swap");
    assert_consistent(rx, "after swap");
}

/// Forward `count` packets from the receive queue of `rx_ring` to the
/// transmit queue of `tx_ring`
///
/// Transmitted counters are charged to the port owning `tx_ring`.
pub fn swap_bufs(count: u32, tx_ring: &mut Ring, rx_ring: &mut Ring) -> Result<()> {
    let (tx, stats) = tx_ring.tx_with_stats()?;
    let rx = rx_ring.rx_mut()?;
    swap_queues(count, tx, rx, stats);
    Ok(())
}

/// Send `count` received packets back out of the same ring
pub fn swap_bufs_within(count: u32, ring: &mut Ring) -> Result<()> {
    let (tx, rx, stats) = ring.split()?;
    swap_queues(count, tx, rx, stats);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::mock_queues;

    /// eth0 receives, eth1 transmits
    fn forward_pair(slots: u32) -> (Queue, Queue) {
        let mut queues = mock_queues(&["eth0", "eth1"], slots);
        let (eth1_tx, _) = queues.pop().unwrap();
        let (_, eth0_rx) = queues.pop().unwrap();
        (eth1_tx, eth0_rx)
    }

    fn receive(rx: &mut Queue, lens: &[u16]) {
        let stats = PortStats::new();
        let head = rx.head();
        let mut i = head;
        for &len in lens {
            rx.slot_mut(i).len = len;
            i = rx.view.next(i);
        }
        rx.view_mut().set_tail(i);
        crate::sync::rx_drain(rx, &stats, head, lens.len() as u32);
    }

    #[test]
    fn test_swap_exchanges_indices() {
        let (mut tx, mut rx) = forward_pair(16);
        let stats = PortStats::new();
        receive(&mut rx, &[60, 70, 80]);

        let tx_before: Vec<u32> = (0..3).map(|i| tx.slot(i).buf_idx).collect();
        let rx_before: Vec<u32> = (0..3).map(|i| rx.slot(i).buf_idx).collect();

        swap_queues(3, &mut tx, &mut rx, &stats);

        for i in 0..3u32 {
            assert_eq!(tx.slot(i).buf_idx, rx_before[i as usize]);
            assert_eq!(rx.slot(i).buf_idx, tx_before[i as usize]);
            assert_eq!(tx.packet(i).data_ptr(), tx.view().buf_unchecked(tx.slot(i).buf_idx));
            assert_eq!(rx.packet(i).data_ptr(), rx.view().buf_unchecked(rx.slot(i).buf_idx));
            assert_ne!(tx.slot(i).flags & NS_BUF_CHANGED, 0);
            assert_ne!(rx.slot(i).flags & NS_BUF_CHANGED, 0);
        }
        assert_eq!(tx.slot(0).len, 60);
        assert_eq!(tx.slot(2).len, 80);
        assert_eq!(tx.packet(1).data_len(), 70);
    }

    #[test]
    fn test_swap_moves_payload_without_copy() {
        let (mut tx, mut rx) = forward_pair(16);
        let stats = PortStats::new();
        receive(&mut rx, &[4]);
        rx.payload_mut(0).unwrap()[..4].copy_from_slice(b"ping");
        let rx_ptr = rx.packet(0).data_ptr();

        swap_queues(1, &mut tx, &mut rx, &stats);

        assert_eq!(tx.packet(0).data_ptr(), rx_ptr);
        assert_eq!(tx.payload(0).unwrap(), b"ping");
    }

    #[test]
    fn test_swap_advances_cursors_and_reports_final_slot() {
        let (mut tx, mut rx) = forward_pair(16);
        let stats = PortStats::new();
        receive(&mut rx, &[64; 5]);

        swap_queues(5, &mut tx, &mut rx, &stats);

        assert_eq!(tx.head(), 5);
        assert_eq!(tx.cur(), 5);
        assert_eq!(rx.head(), 5);
        assert_eq!(rx.cur(), 5);
        assert_eq!(tx.slot(4).flags, NS_BUF_CHANGED | NS_REPORT);
        assert_eq!(rx.slot(4).flags, NS_BUF_CHANGED | NS_REPORT);
        assert_eq!(tx.slot(3).flags, NS_BUF_CHANGED);
        assert_eq!(stats.fetch_tx_packets(), 5);
        assert_eq!(stats.fetch_tx_bytes(), 320);
    }

    #[test]
    fn test_swap_wraps() {
        let (mut tx, mut rx) = forward_pair(8);
        let stats = PortStats::new();
        tx.view_mut().publish(6);
        tx.view_mut().set_tail(5);
        rx.view_mut().publish(6);
        receive(&mut rx, &[10, 20, 30]);

        swap_queues(3, &mut tx, &mut rx, &stats);

        assert_eq!(tx.head(), 1);
        assert_eq!(rx.head(), 1);
        assert_eq!(tx.slot(0).len, 30);
        assert_ne!(tx.slot(0).flags & NS_REPORT, 0);
    }

    #[test]
    fn test_swap_zero_count() {
        let (mut tx, mut rx) = forward_pair(8);
        let stats = PortStats::new();
        swap_queues(0, &mut tx, &mut rx, &stats);
        assert_eq!(tx.head(), 0);
        assert_eq!(rx.head(), 0);
        assert_eq!(stats.fetch_tx_packets(), 0);
    }

    #[cfg(unix)]
    /// Set in the environment of a test binary re-run by [`rerun_aborting`]
    const FATAL_CHILD: &str = "NMBRIDGE_RING_FATAL_CHILD";

    #[cfg(unix)]
    /// Re-run the single test `name` in a child process and check that it
    /// aborted through the ring consistency path at `stage`
    fn rerun_aborting(name: &str, stage: &str) {
        use std::os::unix::process::ExitStatusExt;

        let out = std::process::Command::new(std::env::current_exe().unwrap())
            .args(["--exact", name, "--nocapture", "--test-threads=1"])
            .env(FATAL_CHILD, "1")
            .output()
            .unwrap();
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert_eq!(out.status.signal(), Some(libc::SIGABRT), "child did not abort: {stderr}");
        assert!(stderr.contains("ring consistency violation"), "{stderr}");
        assert!(stderr.contains(stage), "{stderr}");
    }

    #[test]
    #[cfg(unix)]
    fn test_swap_null_shadow_is_fatal() {
        if std::env::var_os(FATAL_CHILD).is_none() {
            rerun_aborting("swap::tests::test_swap_null_shadow_is_fatal", "before swap");
            return;
        }
        let (mut tx, mut rx) = forward_pair(8);
        let stats = PortStats::new();
        rx.packet_mut(5).rebind(None);
        swap_queues(1, &mut tx, &mut rx, &stats);
    }

    #[test]
    #[cfg(unix)]
    fn test_bad_index_in_batch_is_fatal_after_swap() {
        if std::env::var_os(FATAL_CHILD).is_none() {
            rerun_aborting(
                "swap::tests::test_bad_index_in_batch_is_fatal_after_swap",
                "after swap",
            );
            return;
        }
        let (mut tx, mut rx) = forward_pair(8);
        let stats = PortStats::new();
        receive(&mut rx, &[60, 60]);
        // Shadows still hold valid pointers; only the exchange exposes it.
        rx.slot_mut(1).buf_idx = u32::MAX;
        swap_queues(2, &mut tx, &mut rx, &stats);
    }
}
