//! Bandwidth limiter over real sockets.

use std::{
    net::UdpSocket,
    sync::Arc,
    time::{Duration, Instant},
};

use scene_shared::{
    bandwidth::{BandwidthLimiter, SendOutcome},
    logging,
};

#[test]
fn blocking_mode_paces_to_the_limit() -> anyhow::Result<()> {
    logging::init_for_tests();
    let tx = Arc::new(UdpSocket::bind("127.0.0.1:0")?);
    let rx = UdpSocket::bind("127.0.0.1:0")?;
    rx.set_read_timeout(Some(Duration::from_secs(2)))?;
    let dest = rx.local_addr()?;

    // 1000 bytes per 100ms window: one packet per window. Five seconds'
    // worth of traffic offered at once.
    let bytes_per_sec = 10_000u64;
    let limiter = BandwidthLimiter::new(bytes_per_sec, Duration::from_millis(100), None);
    limiter.start()?;
    let packet = [7u8; 1000];
    let n_packets = (5 * bytes_per_sec) as usize / packet.len();
    let start = Instant::now();
    for _ in 0..n_packets {
        assert_eq!(limiter.send_to(&tx, &packet, dest)?, SendOutcome::Sent(1000));
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(950), "took {elapsed:?}");

    let mut buf = [0u8; 2048];
    for _ in 0..n_packets {
        let (n, _) = rx.recv_from(&mut buf)?;
        assert_eq!(n, 1000);
    }
    limiter.stop();
    Ok(())
}

#[test]
fn queued_mode_returns_immediately() -> anyhow::Result<()> {
    logging::init_for_tests();
    let tx = Arc::new(UdpSocket::bind("127.0.0.1:0")?);
    let rx = UdpSocket::bind("127.0.0.1:0")?;
    rx.set_read_timeout(Some(Duration::from_secs(2)))?;
    let dest = rx.local_addr()?;

    let limiter = BandwidthLimiter::new(
        10_000,
        Duration::from_millis(100),
        Some(Duration::from_secs(1)),
    );
    limiter.start()?;
    let start = Instant::now();
    for _ in 0..5 {
        assert_eq!(limiter.send_to(&tx, &[1u8; 1000], dest)?, SendOutcome::Queued);
    }
    assert!(start.elapsed() < Duration::from_millis(100));

    let mut buf = [0u8; 2048];
    for _ in 0..5 {
        rx.recv_from(&mut buf)?;
    }
    assert!(start.elapsed() >= Duration::from_millis(350));
    assert_eq!(limiter.dropped(), 0);
    limiter.stop();
    Ok(())
}
