//! Integration tests for port registration
//!
//! Tests for:
//! - Idempotent configuration from many threads
//! - One shared mapping across ports
//! - Ring count negotiation failures
//! - Ring ownership hand-off between workers

use std::sync::Arc;
use std::thread;

use nmbridge_integration_tests::{context, mock};
use nmbridge_ring::{Direction, NetmapError, PortConfig, TransportError};

#[test]
fn test_concurrent_configure_registers_once() {
    let mock = mock(&[("eth0", 4, 4)], 64);
    let ctx = Arc::new(context(&mock));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || ctx.configure(&PortConfig::new("eth0", 4, 4)).unwrap())
        })
        .collect();
    let ports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for port in &ports[1..] {
        assert!(Arc::ptr_eq(&ports[0], port));
    }
    assert_eq!(ctx.ports().len(), 1);
    assert_eq!(mock.registrations(), 4);
    assert_eq!(mock.maps(), 1);
}

#[test]
fn test_ports_share_one_region() {
    let mock = mock(&[("eth0", 1, 1), ("eth1", 2, 2), ("eth2", 1, 1)], 32);
    let ctx = context(&mock);

    let eth0 = ctx.configure(&PortConfig::new("eth0", 1, 1)).unwrap();
    let eth1 = ctx.configure(&PortConfig::new("eth1", 2, 2)).unwrap();
    let eth2 = ctx.configure(&PortConfig::new("eth2", 1, 1)).unwrap();
    assert_eq!(mock.maps(), 1);

    let region = ctx.mapping().unwrap();
    for port in [&eth0, &eth1, &eth2] {
        let ring = port.take_ring(0).unwrap();
        assert!(Arc::ptr_eq(ring.interface().region(), &region));
        assert_eq!(ring.interface().name(), port.name());
        port.return_ring(ring).unwrap();
    }

    let names: Vec<_> = ctx.ports().iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, ["eth0", "eth1", "eth2"]);
}

#[test]
fn test_failed_port_does_not_block_others() {
    let mock = mock(&[("eth0", 2, 2), ("eth1", 1, 1)], 32);
    let ctx = context(&mock);

    let err = ctx.configure(&PortConfig::new("eth0", 1, 1)).unwrap_err();
    assert!(matches!(
        err,
        NetmapError::RingCountMismatch {
            configured_tx: 2,
            configured_rx: 2,
            ..
        }
    ));
    assert!(err.to_string().contains("eth0"));
    assert!(ctx.get("eth0").is_none());

    let eth1 = ctx.configure(&PortConfig::new("eth1", 1, 1)).unwrap();
    assert_eq!(eth1.num_rings(), 1);

    // The corrected request goes through on the same context
    let eth0 = ctx.configure(&PortConfig::new("eth0", 2, 2)).unwrap();
    assert_eq!(eth0.num_rings(), 2);
    assert_eq!(ctx.ports().len(), 2);
}

#[test]
fn test_unknown_interface_error_chain() {
    let mock = mock(&[("eth0", 1, 1)], 16);
    let ctx = context(&mock);

    let err = ctx.configure(&PortConfig::new("eth7", 1, 1)).unwrap_err();
    match err {
        NetmapError::Transport { port, ring, source } => {
            assert_eq!(port, "eth7");
            assert_eq!(ring, 0);
            assert!(matches!(source, TransportError::UnknownInterface(name) if name == "eth7"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_rings_move_between_threads() {
    let mock = mock(&[("eth0", 2, 2)], 32);
    let ctx = context(&mock);
    let port = ctx.configure(&PortConfig::new("eth0", 2, 2)).unwrap();

    let workers: Vec<_> = (0..2u16)
        .map(|id| {
            let port = Arc::clone(&port);
            thread::spawn(move || {
                let ring = port.take_ring(id).unwrap();
                assert_eq!(ring.id(), id);
                assert_eq!(ring.rx().unwrap().view().ring_id(), id);
                assert_eq!(ring.tx().unwrap().dir(), Direction::Tx);
                ring.rx_sync().unwrap();
                port.return_ring(ring).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(mock.rx_syncs(), 2);
    assert!(port.take_ring(0).is_ok());
    assert!(port.take_ring(1).is_ok());
}

#[test]
fn test_port_info_matches_registration() {
    let mock = mock(&[("eth0", 3, 2)], 128);
    let ctx = context(&mock);

    let info = ctx.port_info("eth0").unwrap();
    assert_eq!((info.tx_rings, info.rx_rings), (3, 2));
    assert_eq!((info.tx_slots, info.rx_slots), (128, 128));

    let port = ctx.configure(&PortConfig::new("eth0", 2, 2)).unwrap();
    assert_eq!(port.tx_rings(), info.tx_rings);
    assert_eq!(port.rx_rings(), info.rx_rings);
    assert_eq!(ctx.mapping().unwrap().len(), info.memsize as usize);
}
