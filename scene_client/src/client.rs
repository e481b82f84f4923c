//! Client implementation.
//!
//! The client maintains:
//! - the reliable channel to the server (handshake, resource exchanges,
//!   model requests, disconnect)
//! - one UDP socket, receiving the delta stream and sending telemetry
//! - a `ResourceSink` that receives everything decoded
//!
//! Threads:
//! - tcp-recv: resource frames (each one acknowledged), control messages
//! - keepalive: periodic KEEPALIVE
//! - udp-recv: delta packets, collecting serial ids of applied geometry
//! - udp-telemetry: camera pose and geometry ACKs

use std::{
    io,
    net::{SocketAddr, TcpStream, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use scene_shared::{
    config::SyncConfig,
    endpoint::{Endpoint, Liveness},
    resources::Camera,
    sync::{LatestSlot, SharedQueue, Signal},
    tcp::{reliable_pair, ChannelError, ReliableReceiver, ReliableSender, TcpFrame, TcpMsg},
    udp::{
        decode_packet, peek_header, Chunk, GenerationFilter, PacketWriter, ACK_HEADER_SIZE,
        CHUNK_TAG_SIZE, UDP_HEADER_SIZE,
    },
};
use tracing::{debug, info, trace, warn};

use crate::sink::ResourceSink;

/// State shared by the client threads.
struct ClientShared {
    cfg: SyncConfig,
    sink: Arc<dyn ResourceSink>,
    connected: AtomicBool,
    camera: LatestSlot<Camera>,
    /// Serial ids of applied geometry chunks, not yet acknowledged.
    acks: SharedQueue<u32>,
    wake: Signal,
}

impl ClientShared {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Marks the connection as gone. Only the first call notifies the sink.
    fn disconnect(&self, reason: &str) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(reason, "disconnected from server");
            self.sink.on_disconnect();
        }
        self.wake.notify();
    }
}

pub struct SceneClient {
    shared: Arc<ClientShared>,
    tx: ReliableSender,
    server_udp: SocketAddr,
    /// Closed in reverse order.
    endpoints: Vec<Endpoint>,
}

impl SceneClient {
    /// Connects to `cfg.tcp_addr()`, runs the handshake and starts the
    /// client threads.
    pub fn connect(cfg: &SyncConfig, sink: Arc<dyn ResourceSink>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", cfg.client_udp_port))
            .with_context(|| format!("bind udp socket on port {}", cfg.client_udp_port))?;
        socket
            .set_read_timeout(Some(cfg.poll_interval()))
            .context("udp read timeout")?;
        let udp_port = socket.local_addr()?.port();

        let addr = cfg.tcp_addr();
        let stream = TcpStream::connect(&addr).with_context(|| format!("connect to {addr}"))?;
        let server_ip = stream.peer_addr()?.ip();
        let (tx, mut rx) = reliable_pair(stream, cfg.poll_interval(), cfg.max_frame_bytes)?;

        let port = handshake(cfg, &tx, &mut rx, udp_port).context("handshake")?;
        let server_udp = SocketAddr::new(server_ip, if port == 0 { cfg.server_udp_port } else { port });
        info!(%addr, udp_port, %server_udp, "connected");

        let shared = Arc::new(ClientShared {
            cfg: cfg.clone(),
            sink,
            connected: AtomicBool::new(true),
            camera: LatestSlot::new(),
            acks: SharedQueue::new(),
            wake: Signal::new(),
        });
        let mut client = Self {
            shared,
            tx,
            server_udp,
            endpoints: Vec::new(),
        };
        client.start(rx, socket)?;
        Ok(client)
    }

    fn start(&mut self, rx: ReliableReceiver, socket: UdpSocket) -> anyhow::Result<()> {
        let send_socket = socket.try_clone().context("clone udp socket")?;
        self.endpoints
            .push(spawn_tcp_recv(self.shared.clone(), rx, self.tx.clone())?);
        self.endpoints
            .push(spawn_keepalive(self.shared.clone(), self.tx.clone())?);
        self.endpoints.push(spawn_udp_recv(self.shared.clone(), socket)?);
        self.endpoints.push(spawn_telemetry(
            self.shared.clone(),
            send_socket,
            self.server_udp,
        )?);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Asks the server to load and send the catalog model at `index`.
    pub fn request_model(&self, index: u16) -> anyhow::Result<()> {
        if !self.is_connected() {
            bail!("not connected");
        }
        self.tx.send_msg(&TcpMsg::ReqModel { index })
    }

    /// Sets the pose reported in the next telemetry packets.
    pub fn set_camera(&self, camera: Camera) {
        self.shared.camera.put(camera);
    }

    /// Address the telemetry is sent to.
    pub fn server_udp_addr(&self) -> SocketAddr {
        self.server_udp
    }

    /// Sends DISCONNECT (if still connected) and stops every thread.
    pub fn disconnect(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.shared.is_connected() {
            let _ = self.tx.send_msg(&TcpMsg::Disconnect);
        }
        self.shared.disconnect("client closed");
        while let Some(mut ep) = self.endpoints.pop() {
            debug!(endpoint = ep.name(), "closing");
            ep.close();
        }
        self.tx.shutdown();
    }
}

impl Drop for SceneClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn recv_control(rx: &mut ReliableReceiver, timeout: Duration) -> anyhow::Result<TcpMsg> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.recv_frame(|| Instant::now() < deadline)? {
            Some(TcpFrame::Control(TcpMsg::Keepalive)) => {}
            Some(TcpFrame::Control(msg)) => return Ok(msg),
            Some(TcpFrame::Resource(r)) => bail!("unexpected {:?} frame", r.kind()),
            None if Instant::now() >= deadline => bail!("timed out"),
            None => {}
        }
    }
}

/// HELO → HELO_ACK → READY → READY. Returns the server's UDP port.
fn handshake(cfg: &SyncConfig, tx: &ReliableSender, rx: &mut ReliableReceiver, udp_port: u16) -> anyhow::Result<u16> {
    let timeout = cfg.keepalive_timeout();
    tx.send_msg(&TcpMsg::Helo { udp_port })?;
    match recv_control(rx, timeout).context("waiting for HELO_ACK")? {
        TcpMsg::HeloAck => {}
        other => bail!("expected HELO_ACK, got {other:?}"),
    }
    tx.send_msg(&TcpMsg::Ready { udp_port: 0 })?;
    match recv_control(rx, timeout).context("waiting for READY")? {
        TcpMsg::Ready { udp_port } => Ok(udp_port),
        other => bail!("expected READY, got {other:?}"),
    }
}

/// Hands resources to the sink and acknowledges each one after it was
/// stored.
fn spawn_tcp_recv(
    shared: Arc<ClientShared>,
    mut rx: ReliableReceiver,
    tx: ReliableSender,
) -> anyhow::Result<Endpoint> {
    let waker_tx = tx.clone();
    let max_failures = shared.cfg.max_recv_failures.max(1);
    let ep = Endpoint::spawn("tcp-recv", move |live: Liveness| {
        let mut failures = 0u32;
        while live.is_alive() && shared.is_connected() {
            let frame = match rx.recv_frame(|| live.is_alive()) {
                Ok(None) => continue,
                Ok(Some(frame)) => frame,
                Err(ChannelError::Io(e)) => {
                    failures += 1;
                    warn!(error = %e, failures, "tcp receive failed");
                    if failures >= max_failures {
                        shared.disconnect("too many receive failures");
                    }
                    continue;
                }
                Err(ChannelError::Aborted) => break,
                Err(e) => {
                    debug!(error = %e, "tcp receive ended");
                    shared.disconnect("connection lost");
                    break;
                }
            };
            failures = 0;
            let needs_ack = match frame {
                TcpFrame::Control(TcpMsg::StartRsrcExchange) => {
                    debug!("resource exchange started");
                    true
                }
                TcpFrame::Resource(packet) => {
                    shared.sink.on_resource(packet);
                    true
                }
                TcpFrame::Control(TcpMsg::EndRsrcExchange) => {
                    debug!("resource exchange ended");
                    shared.sink.on_exchange_end();
                    false
                }
                TcpFrame::Control(TcpMsg::Disconnect) => {
                    shared.disconnect("server sent DISCONNECT");
                    false
                }
                TcpFrame::Control(msg) => {
                    debug!(?msg, "ignored control message");
                    false
                }
            };
            if needs_ack {
                if let Err(e) = tx.send_msg(&TcpMsg::RsrcExchangeAck) {
                    warn!(error = %format!("{e:#}"), "ack send failed");
                    shared.disconnect("ack send failed");
                }
            }
        }
        Ok(())
    })?;
    Ok(ep.with_waker(move || waker_tx.shutdown()))
}

fn spawn_keepalive(shared: Arc<ClientShared>, tx: ReliableSender) -> anyhow::Result<Endpoint> {
    let period = shared.cfg.keepalive_send();
    let waker = shared.clone();
    let ep = Endpoint::spawn("keepalive", move |live: Liveness| {
        while live.is_alive() && shared.is_connected() {
            if shared
                .wake
                .wait_until(period, || !live.is_alive() || !shared.is_connected())
            {
                break;
            }
            if let Err(e) = tx.send_msg(&TcpMsg::Keepalive) {
                warn!(error = %format!("{e:#}"), "keepalive failed");
                shared.disconnect("keepalive send failed");
            }
        }
        Ok(())
    })?;
    Ok(ep.with_waker(move || waker.wake.notify()))
}

fn spawn_udp_recv(shared: Arc<ClientShared>, socket: UdpSocket) -> anyhow::Result<Endpoint> {
    Endpoint::spawn("udp-recv", move |live: Liveness| {
        let mut filter = GenerationFilter::new();
        let mut buf = vec![0u8; shared.cfg.packet_size.max(64)];
        let mut failures = 0u32;
        while live.is_alive() && shared.is_connected() {
            let n = match socket.recv_from(&mut buf) {
                Ok((n, _from)) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "udp receive failed");
                    if failures >= shared.cfg.max_recv_failures.max(1) {
                        break;
                    }
                    continue;
                }
            };
            failures = 0;
            handle_datagram(&shared, &mut filter, &buf[..n]);
        }
        Ok(())
    })
}

fn handle_datagram(shared: &ClientShared, filter: &mut GenerationFilter, data: &[u8]) {
    let header = match peek_header(data) {
        Ok(h) => h,
        Err(e) => {
            debug!(error = %e, "bad delta packet");
            return;
        }
    };
    if !filter.accept(header.packet_gen) {
        trace!(generation = header.packet_gen, "stale delta packet");
        return;
    }
    let packet = match decode_packet(data) {
        Ok(p) => p,
        Err(e) => {
            debug!(generation = header.packet_gen, error = %e, "bad delta packet");
            return;
        }
    };
    for chunk in packet.chunks {
        match chunk {
            Chunk::Geom { header, payload } => {
                if shared.sink.on_geometry(&header, payload) {
                    shared.acks.push(header.serial_id);
                }
            }
            Chunk::PointLight(update) => shared.sink.on_light_update(&update),
            Chunk::Transform(update) => shared.sink.on_transform(&update),
            other => debug!(kind = ?other.msg_type(), "unexpected chunk from server"),
        }
    }
}

/// Sends the camera pose and pending ACKs every telemetry interval.
fn spawn_telemetry(shared: Arc<ClientShared>, socket: UdpSocket, dest: SocketAddr) -> anyhow::Result<Endpoint> {
    let interval = shared.cfg.telemetry_interval();
    let packet_size = shared.cfg.packet_size;
    let max_ids = (packet_size
        .saturating_sub(UDP_HEADER_SIZE + CHUNK_TAG_SIZE + ACK_HEADER_SIZE)
        / 4)
    .max(1);
    Endpoint::spawn("udp-telemetry", move |live: Liveness| {
        let mut writer = PacketWriter::new(packet_size, 0);
        let mut generation = 0u32;
        while live.is_alive() && shared.is_connected() {
            let tick = Instant::now();
            let camera = shared.camera.peek().unwrap_or_default();
            let acks = shared.acks.drain();
            if let Err(e) = send_telemetry(&socket, dest, &mut writer, &mut generation, camera, &acks, max_ids) {
                warn!(error = %e, "telemetry send failed");
            }
            if let Some(rest) = interval.checked_sub(tick.elapsed()) {
                thread::sleep(rest);
            }
        }
        Ok(())
    })
}

fn send_telemetry(
    socket: &UdpSocket,
    dest: SocketAddr,
    writer: &mut PacketWriter,
    generation: &mut u32,
    camera: Camera,
    acks: &[u32],
    max_ids: usize,
) -> io::Result<()> {
    writer.reset(*generation);
    let mut flush = |writer: &mut PacketWriter| -> io::Result<()> {
        socket.send_to(writer.as_bytes(), dest)?;
        *generation = generation.wrapping_add(1);
        writer.reset(*generation);
        Ok(())
    };
    writer.push(&Chunk::Camera(camera));
    for ids in acks.chunks(max_ids) {
        let chunk = Chunk::Ack(ids.to_vec());
        if writer.push(&chunk) == 0 {
            flush(writer)?;
            if writer.push(&chunk) == 0 {
                warn!(n = ids.len(), "ack chunk larger than a packet, dropped");
            }
        }
    }
    if !writer.is_empty() {
        flush(writer)?;
    }
    Ok(())
}
