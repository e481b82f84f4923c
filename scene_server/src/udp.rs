//! UDP endpoints of a connection.
//!
//! The active endpoint multiplexes pending light, transform and geometry
//! updates into fixed-size packets every send interval. Each datagram gets
//! the next generation number. When nothing is pending a header-only packet
//! is still sent as a carrier.
//!
//! The passive endpoint receives client telemetry (camera pose and geometry
//! ACKs), discarding stale generations.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::Arc,
    thread,
    time::Instant,
};

use anyhow::Context;
use scene_shared::{
    bandwidth::SendOutcome,
    endpoint::{Endpoint, Liveness},
    udp::{decode_packet, peek_header, Chunk, GenerationFilter, PacketWriter},
};
use tracing::{debug, trace, warn};

use crate::{
    geom_update::GeomUpdate,
    shared::{Connection, ServerShared},
};

/// Packs chunks into consecutive packets and hands full ones to the socket.
struct Multiplexer<'a> {
    shared: &'a ServerShared,
    socket: &'a Arc<UdpSocket>,
    dest: SocketAddr,
    writer: PacketWriter,
    generation: u32,
    sent: usize,
}

impl<'a> Multiplexer<'a> {
    fn flush(&mut self) -> io::Result<()> {
        let outcome = self
            .shared
            .limiter
            .send_to(self.socket, self.writer.as_bytes(), self.dest)?;
        if outcome == SendOutcome::Dropped {
            trace!(generation = self.generation, "packet dropped by limiter");
        }
        self.sent += 1;
        self.generation = self.generation.wrapping_add(1);
        self.writer.reset(self.generation);
        Ok(())
    }

    /// Appends `chunk`, flushing first if it does not fit. Returns false if
    /// the chunk can never fit a packet.
    fn push(&mut self, chunk: &Chunk<'_>) -> io::Result<bool> {
        if self.writer.push(chunk) > 0 {
            return Ok(true);
        }
        if !self.writer.fits_empty(chunk) {
            warn!(kind = ?chunk.msg_type(), len = chunk.encoded_len(), "chunk larger than a packet, dropped");
            return Ok(false);
        }
        self.flush()?;
        Ok(self.writer.push(chunk) > 0)
    }

    /// Whether the packet budget for this tick still allows a new packet.
    fn has_budget(&self, max_packets: usize) -> bool {
        self.sent + 1 < max_packets
    }
}

fn geom_chunk(update: &GeomUpdate) -> Chunk<'_> {
    Chunk::Geom {
        header: update.header,
        payload: &update.payload,
    }
}

/// Spawns the sender streaming updates to `dest`.
pub fn spawn_active(
    shared: Arc<ServerShared>,
    conn: Arc<Connection>,
    dest: SocketAddr,
) -> anyhow::Result<Endpoint> {
    let socket = UdpSocket::bind((shared.cfg.server_ip.as_str(), 0))
        .with_context(|| format!("bind udp active socket on {}", shared.cfg.server_ip))?;
    let socket = Arc::new(socket);
    debug!(local = %socket.local_addr()?, %dest, "udp active endpoint");
    shared.limiter.start()?;

    Endpoint::spawn("udp-active", move |live: Liveness| {
        let interval = shared.cfg.udp_send_interval();
        let max_packets = shared.cfg.max_packets_per_tick.max(1);
        let mut mux = Multiplexer {
            shared: &shared,
            socket: &socket,
            dest,
            writer: PacketWriter::new(shared.cfg.packet_size, 0),
            generation: 0,
            sent: 0,
        };

        while live.is_alive() && conn.is_connected() {
            let tick = Instant::now();
            mux.sent = 0;
            if let Err(e) = send_tick(&mut mux, max_packets) {
                warn!(error = %e, "udp send failed");
            }
            if let Some(rest) = interval.checked_sub(tick.elapsed()) {
                thread::sleep(rest);
            }
        }
        shared.limiter.stop();
        Ok(())
    })
}

fn send_tick(mux: &mut Multiplexer<'_>, max_packets: usize) -> io::Result<()> {
    let shared = mux.shared;
    let to_client = &shared.to_client;
    for update in to_client.take_lights() {
        mux.push(&Chunk::PointLight(update))?;
    }
    for update in to_client.take_transforms() {
        mux.push(&Chunk::Transform(update))?;
    }

    while let Some(update) = to_client.pop_geom() {
        let chunk = geom_chunk(&update);
        if mux.writer.remaining() < chunk.encoded_len() && !mux.has_budget(max_packets) {
            to_client.requeue_geom_front(update);
            break;
        }
        mux.push(&chunk)?;
    }

    // Always emit at least one packet per tick.
    if !mux.writer.is_empty() || mux.sent == 0 {
        mux.flush()?;
    }
    Ok(())
}

/// Binds the telemetry socket and spawns its receiver. Returns the endpoint
/// and the bound local port.
pub fn spawn_passive(
    shared: Arc<ServerShared>,
    conn: Arc<Connection>,
) -> anyhow::Result<(Endpoint, u16)> {
    let addr = (shared.cfg.server_ip.as_str(), shared.cfg.server_udp_port);
    let socket = UdpSocket::bind(addr)
        .with_context(|| format!("bind udp passive socket on {}:{}", addr.0, addr.1))?;
    socket
        .set_read_timeout(Some(shared.cfg.poll_interval()))
        .context("udp read timeout")?;
    let port = socket.local_addr()?.port();
    debug!(port, "udp passive endpoint");

    let ep = Endpoint::spawn("udp-passive", move |live: Liveness| {
        let mut filter = GenerationFilter::new();
        let mut buf = vec![0u8; shared.cfg.packet_size.max(64)];
        let mut failures = 0u32;
        while live.is_alive() && conn.is_connected() {
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
    })?;
    Ok((ep, port))
}

fn handle_datagram(shared: &ServerShared, filter: &mut GenerationFilter, data: &[u8]) {
    let header = match peek_header(data) {
        Ok(h) => h,
        Err(e) => {
            debug!(error = %e, "bad telemetry packet");
            return;
        }
    };
    if !filter.accept(header.packet_gen) {
        trace!(generation = header.packet_gen, "stale telemetry packet");
        return;
    }
    let packet = match decode_packet(data) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "bad telemetry packet");
            return;
        }
    };
    for chunk in packet.chunks {
        match chunk {
            Chunk::Camera(camera) => shared.camera.put(camera),
            Chunk::Ack(serials) => {
                let pruned = shared.to_client.ack(&serials);
                trace!(n = serials.len(), pruned, "geometry acks");
            }
            other => debug!(kind = ?other.msg_type(), "unexpected chunk from client"),
        }
    }
}
