//! Shared fixtures for nmbridge integration tests
//!
//! Everything here plays the kernel's part against a mock region: making
//! packets appear on receive rings and freeing transmit slots.

use std::sync::Arc;

use nmbridge_ring::transport::mock::MockTransport;
use nmbridge_ring::{NetmapContext, Ring};

/// A mock device with one entry per `(name, tx_rings, rx_rings)`
pub fn mock(nics: &[(&str, u16, u16)], slots: u32) -> MockTransport {
    nics.iter()
        .fold(MockTransport::builder().slots(slots), |b, &(name, tx, rx)| {
            b.nic(name, tx, rx)
        })
        .build()
}

/// A fresh registration context on top of `mock`
pub fn context(mock: &MockTransport) -> NetmapContext {
    NetmapContext::new(Arc::new(mock.clone()))
}

/// Make packets of the given lengths visible after the current tail of the
/// receive queue of `ring`
///
/// Returns the new tail.
pub fn inject(ring: &mut Ring, lens: &[u16]) -> u32 {
    let rx = ring.rx_mut().expect("ring has no receive queue");
    let mut i = rx.tail();
    for &len in lens {
        rx.slot_mut(i).len = len;
        i = rx.view().next(i);
    }
    rx.view_mut().set_tail(i);
    i
}

/// Hand every transmit slot but one back to userspace
pub fn reclaim_tx(ring: &mut Ring) {
    let tx = ring.tx_mut().expect("ring has no transmit queue");
    let n = tx.num_slots();
    let tail = (tx.head() + n - 1) % n;
    tx.view_mut().set_tail(tail);
}

/// Buffer indices of every slot of a ring's receive and transmit queues
pub fn buf_indices(ring: &Ring) -> Vec<u32> {
    let mut indices = Vec::new();
    for queue in [ring.tx(), ring.rx()].into_iter().flatten() {
        indices.extend((0..queue.num_slots()).map(|i| queue.slot(i).buf_idx));
    }
    indices
}

/// Set in the environment of a test binary re-run by [`assert_aborts`]
pub const FATAL_CHILD: &str = "NMBRIDGE_FATAL_CHILD";

/// Whether this process is a child started by [`assert_aborts`]
pub fn in_fatal_child() -> bool {
    std::env::var_os(FATAL_CHILD).is_some()
}

/// Re-run the single test `name` of this binary in a child process and check
/// that it died of `SIGABRT` after reporting a ring consistency violation at
/// `stage`
#[cfg(unix)]
pub fn assert_aborts(name: &str, stage: &str) {
    use std::os::unix::process::ExitStatusExt;

    let exe = std::env::current_exe().expect("test binary path");
    let out = std::process::Command::new(exe)
        .args(["--exact", name, "--nocapture", "--test-threads=1"])
        .env(FATAL_CHILD, "1")
        .output()
        .expect("failed to re-run test binary");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(
        out.status.signal(),
        Some(libc::SIGABRT),
        "{name} did not abort: {stderr}"
    );
    assert!(stderr.contains("ring consistency violation"), "{stderr}");
    assert!(stderr.contains(stage), "{stderr}");
}
