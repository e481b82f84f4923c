//! Test harness for driving a server over real loopback sockets.
//!
//! `ScriptedPeer` speaks the wire protocol frame by frame so tests can
//! assert the exact sequence the server produces, including the ACKs it
//! waits for.

use std::{
    io,
    net::{TcpStream, UdpSocket},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use scene_shared::{
    config::SyncConfig,
    tcp::{reliable_pair, ReliableReceiver, ReliableSender, ResourcePacket, TcpFrame, TcpMsg},
};

/// How long a scripted step waits before failing the test.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Defaults with timings short enough for tests.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 20,
        keepalive_check_ms: 50,
        keepalive_send_ms: 100,
        udp_send_interval_ms: 5,
        telemetry_interval_ms: 10,
        ack_timeout_ms: 2_000,
        ..SyncConfig::default()
    }
}

/// Polls `ready` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    ready()
}

/// A hand-driven client.
pub struct ScriptedPeer {
    tx: ReliableSender,
    rx: ReliableReceiver,
    udp: UdpSocket,
}

impl ScriptedPeer {
    /// Binds a loopback UDP socket and connects to the server's TCP port.
    pub fn connect(cfg: &SyncConfig) -> anyhow::Result<Self> {
        let udp = UdpSocket::bind("127.0.0.1:0").context("bind peer udp")?;
        let stream = TcpStream::connect(cfg.tcp_addr()).context("connect peer")?;
        let (tx, rx) = reliable_pair(stream, Duration::from_millis(20), cfg.max_frame_bytes)?;
        Ok(Self { tx, rx, udp })
    }

    pub fn udp_port(&self) -> anyhow::Result<u16> {
        Ok(self.udp.local_addr()?.port())
    }

    pub fn send(&self, msg: TcpMsg) -> anyhow::Result<()> {
        self.tx.send_msg(&msg)
    }

    pub fn ack(&self) -> anyhow::Result<()> {
        self.send(TcpMsg::RsrcExchangeAck)
    }

    /// Next frame, or `None` if nothing arrived within `timeout`.
    pub fn recv_frame_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<TcpFrame>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(frame) = self.rx.recv_frame(|| Instant::now() < deadline)? {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    pub fn recv_frame(&mut self) -> anyhow::Result<TcpFrame> {
        match self.recv_frame_timeout(STEP_TIMEOUT)? {
            Some(frame) => Ok(frame),
            None => bail!("no frame within {STEP_TIMEOUT:?}"),
        }
    }

    pub fn expect_msg(&mut self, want: TcpMsg) -> anyhow::Result<()> {
        match self.recv_frame()? {
            TcpFrame::Control(msg) if msg == want => Ok(()),
            other => bail!("expected {want:?}, got {other:?}"),
        }
    }

    pub fn expect_resource(&mut self) -> anyhow::Result<ResourcePacket> {
        match self.recv_frame()? {
            TcpFrame::Resource(packet) => Ok(packet),
            other => bail!("expected a resource frame, got {other:?}"),
        }
    }

    /// HELO → HELO_ACK → READY → READY. Returns the server's telemetry port.
    pub fn handshake(&mut self) -> anyhow::Result<u16> {
        self.send(TcpMsg::Helo {
            udp_port: self.udp_port()?,
        })?;
        self.expect_msg(TcpMsg::HeloAck)?;
        self.send(TcpMsg::Ready { udp_port: 0 })?;
        match self.recv_frame()? {
            TcpFrame::Control(TcpMsg::Ready { udp_port }) => Ok(udp_port),
            other => bail!("expected READY, got {other:?}"),
        }
    }

    /// Acknowledges a whole exchange: START, every resource, until END.
    pub fn accept_exchange(&mut self) -> anyhow::Result<Vec<ResourcePacket>> {
        self.expect_msg(TcpMsg::StartRsrcExchange)?;
        self.ack()?;
        let mut received = Vec::new();
        loop {
            match self.recv_frame()? {
                TcpFrame::Resource(packet) => {
                    received.push(packet);
                    self.ack()?;
                }
                TcpFrame::Control(TcpMsg::EndRsrcExchange) => return Ok(received),
                other => bail!("unexpected {other:?} inside an exchange"),
            }
        }
    }

    /// One datagram from the server's delta stream.
    pub fn recv_udp(&self, timeout: Duration) -> anyhow::Result<Option<Vec<u8>>> {
        self.udp.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0u8; 64 * 1024];
        match self.udp.recv_from(&mut buf) {
            Ok((n, _)) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// True once the server closed the connection or sent DISCONNECT.
    pub fn wait_dropped(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.recv_frame_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(Some(TcpFrame::Control(TcpMsg::Disconnect))) | Err(_) => return true,
                Ok(_) => {}
            }
        }
        false
    }
}
