//! Outbound bandwidth governor for UDP senders.
//!
//! The limiter counts bytes sent in fixed time windows. Each window may carry
//! `limit × window` bytes; a send that would exceed the allowance waits for
//! the next window. A packet larger than a whole window's allowance is sent
//! alone at the start of a fresh window, so progress is always made.
//!
//! Two modes:
//! - blocking (default when a limit is set): `send_to` sleeps in the caller.
//! - queued (a maximum queueing delay is configured and `start()` was
//!   called): `send_to` enqueues and returns at once; a drain thread sends
//!   while honoring the windows. Packets whose projected queueing delay is
//!   above the maximum are dropped.
//!
//! The limiter is shared by cloning; a disabled limiter sends directly.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, trace, warn};

use crate::{config::SyncConfig, endpoint::Endpoint, sync::SharedQueue};

/// Result of handing a packet to the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(usize),
    Queued,
    Dropped,
}

#[derive(Debug, Clone, Default)]
pub struct BandwidthLimiter {
    inner: Option<Arc<Inner>>,
}

#[derive(Debug)]
struct Inner {
    bytes_per_sec: u64,
    window: Duration,
    max_queueing_delay: Option<Duration>,
    state: Mutex<WindowState>,
    queue: SharedQueue<QueuedPacket>,
    queued_bytes: AtomicU64,
    dropped: AtomicU64,
    drain: Mutex<Option<Endpoint>>,
}

#[derive(Debug)]
struct WindowState {
    start: Instant,
    used: u64,
}

#[derive(Debug)]
struct QueuedPacket {
    socket: Arc<UdpSocket>,
    data: Vec<u8>,
    dest: SocketAddr,
}

impl BandwidthLimiter {
    /// A limiter that never throttles.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(bytes_per_sec: u64, window: Duration, max_queueing_delay: Option<Duration>) -> Self {
        if bytes_per_sec == 0 || window.is_zero() {
            return Self::disabled();
        }
        Self {
            inner: Some(Arc::new(Inner {
                bytes_per_sec,
                window,
                max_queueing_delay,
                state: Mutex::new(WindowState {
                    start: Instant::now(),
                    used: 0,
                }),
                queue: SharedQueue::new(),
                queued_bytes: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                drain: Mutex::new(None),
            })),
        }
    }

    pub fn from_config(cfg: &SyncConfig) -> Self {
        match cfg.bandwidth_limit {
            Some(limit) => Self::new(limit, cfg.bandwidth_window(), cfg.max_queueing_delay()),
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Bytes allowed per window.
    pub fn allowance(&self) -> Option<u64> {
        self.inner.as_ref().map(|i| i.allowance())
    }

    /// Packets dropped in queued mode.
    pub fn dropped(&self) -> u64 {
        self.inner
            .as_ref()
            .map_or(0, |i| i.dropped.load(Ordering::Relaxed))
    }

    /// Starts the drain thread when queued mode is configured. Idempotent.
    pub fn start(&self) -> anyhow::Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        if inner.max_queueing_delay.is_none() {
            return Ok(());
        }
        let mut drain = inner.drain.lock().unwrap_or_else(|e| e.into_inner());
        if drain.is_some() {
            return Ok(());
        }
        let worker = inner.clone();
        *drain = Some(Endpoint::spawn("bw-drain", move |live| {
            while live.is_alive() {
                let Some(pkt) = worker.queue.pop_timeout(Duration::from_millis(50)) else {
                    continue;
                };
                let len = pkt.data.len() as u64;
                worker.reserve(len);
                worker.queued_bytes.fetch_sub(len, Ordering::AcqRel);
                if let Err(e) = pkt.socket.send_to(&pkt.data, pkt.dest) {
                    warn!(error = %e, dest = %pkt.dest, "queued udp send failed");
                }
            }
            Ok(())
        })?);
        debug!(
            bytes_per_sec = inner.bytes_per_sec,
            window_ms = inner.window.as_millis() as u64,
            "bandwidth limiter started"
        );
        Ok(())
    }

    /// Stops the drain thread and discards anything still queued.
    pub fn stop(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        let drain = inner.drain.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut ep) = drain {
            ep.close();
            let pending = inner.queue.drain();
            inner.queued_bytes.store(0, Ordering::Release);
            debug!(discarded = pending.len(), "bandwidth limiter stopped");
        }
    }

    fn is_queued(&self) -> bool {
        self.inner.as_ref().is_some_and(|i| {
            i.drain
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_some()
        })
    }

    /// Sends `data` to `dest`, throttled according to the mode.
    pub fn send_to(
        &self,
        socket: &Arc<UdpSocket>,
        data: &[u8],
        dest: SocketAddr,
    ) -> io::Result<SendOutcome> {
        let Some(inner) = &self.inner else {
            return socket.send_to(data, dest).map(SendOutcome::Sent);
        };

        if self.is_queued() {
            let len = data.len() as u64;
            let ahead = inner.queued_bytes.load(Ordering::Acquire) + len;
            let projected = Duration::from_secs_f64(ahead as f64 / inner.bytes_per_sec as f64);
            if inner.max_queueing_delay.is_some_and(|max| projected > max) {
                inner.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(len, projected_ms = projected.as_millis() as u64, "udp packet dropped by limiter");
                return Ok(SendOutcome::Dropped);
            }
            inner.queued_bytes.fetch_add(len, Ordering::AcqRel);
            inner.queue.push(QueuedPacket {
                socket: socket.clone(),
                data: data.to_vec(),
                dest,
            });
            return Ok(SendOutcome::Queued);
        }

        inner.reserve(data.len() as u64);
        socket.send_to(data, dest).map(SendOutcome::Sent)
    }
}

impl Inner {
    fn allowance(&self) -> u64 {
        ((self.bytes_per_sec as f64 * self.window.as_secs_f64()) as u64).max(1)
    }

    /// Blocks until `len` bytes fit in the current window, then accounts them.
    fn reserve(&self, len: u64) {
        let allowance = self.allowance();
        loop {
            let wait = {
                let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                if now.duration_since(st.start) >= self.window {
                    st.start = now;
                    st.used = 0;
                }
                if st.used == 0 || st.used + len <= allowance {
                    st.used += len;
                    return;
                }
                (st.start + self.window).saturating_duration_since(now)
            };
            thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_pair() -> (Arc<UdpSocket>, UdpSocket) {
        let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        (Arc::new(tx), rx)
    }

    #[test]
    fn disabled_limiter_sends_directly() {
        let (tx, rx) = socket_pair();
        let limiter = BandwidthLimiter::disabled();
        let out = limiter
            .send_to(&tx, &[1, 2, 3], rx.local_addr().unwrap())
            .unwrap();
        assert_eq!(out, SendOutcome::Sent(3));
        assert_eq!(BandwidthLimiter::new(0, Duration::from_millis(100), None).allowance(), None);
    }

    #[test]
    fn allowance_scales_with_window() {
        let limiter = BandwidthLimiter::new(10_000, Duration::from_millis(100), None);
        assert_eq!(limiter.allowance(), Some(1_000));
    }

    #[test]
    fn window_blocks_when_allowance_is_used() {
        let limiter = BandwidthLimiter::new(10_000, Duration::from_millis(100), None);
        let inner = limiter.inner.as_ref().unwrap();
        let start = Instant::now();
        inner.reserve(600);
        inner.reserve(400);
        assert!(start.elapsed() < Duration::from_millis(90));
        inner.reserve(1);
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn oversized_packet_goes_alone() {
        let limiter = BandwidthLimiter::new(1_000, Duration::from_millis(50), None);
        let inner = limiter.inner.as_ref().unwrap();
        let start = Instant::now();
        inner.reserve(10_000);
        assert!(start.elapsed() < Duration::from_millis(40));
        inner.reserve(1);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn queued_mode_drops_beyond_max_delay() {
        let (tx, rx) = socket_pair();
        let limiter =
            BandwidthLimiter::new(1_000, Duration::from_millis(100), Some(Duration::from_millis(200)));
        limiter.start().unwrap();
        let dest = rx.local_addr().unwrap();
        let outcomes: Vec<_> = (0..10)
            .map(|_| limiter.send_to(&tx, &[0u8; 100], dest).unwrap())
            .collect();
        assert_eq!(outcomes[0], SendOutcome::Queued);
        assert!(outcomes.contains(&SendOutcome::Dropped));
        assert!(limiter.dropped() > 0);
        limiter.stop();
        assert!(!limiter.is_queued());
    }
}
