//! TCP control channel: accept, handshake, resource exchange, teardown.
//!
//! One client is served at a time. The control thread accepts a connection,
//! runs the handshake itself, then starts the per-connection threads (TCP
//! reader, keepalive monitor, UDP active/passive) and sleeps on the shared
//! signal until the client goes away or there is something to send.
//!
//! Resource exchanges are strictly one-in-flight: every frame waits for its
//! `RSRC_EXCHANGE_ACK` before the next one is sent.

use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use crossbeam_channel::RecvTimeoutError;
use scene_shared::{
    endpoint::{Endpoint, Liveness},
    id::ResourceId,
    math::Mat4,
    resources::Texture,
    tcp::{
        reliable_pair, ChannelError, ReliableReceiver, ReliableSender, ResourcePacket, TcpFrame,
        TcpMsg,
    },
};
use tracing::{debug, info, warn};

use crate::{
    batch::{ExchangeItem, ResourceBatch},
    scene::{NodeFlags, NodeType},
    shared::{lock, Connection, ServerShared},
    store::load_into,
    tcp_recv, udp,
};

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Spawns the control endpoint serving clients from `listener`.
pub fn spawn_control(shared: Arc<ServerShared>, listener: TcpListener) -> anyhow::Result<Endpoint> {
    listener
        .set_nonblocking(true)
        .context("set listener non-blocking")?;
    let wake = shared.wake.clone();
    let ep = Endpoint::spawn("tcp-control", move |live: Liveness| {
        info!(addr = %listener.local_addr()?, "listening");
        while live.is_alive() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!(%peer, "accepted connection");
                    serve_client(&shared, stream, peer, &live);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        Ok(())
    })?;
    Ok(ep.with_waker(move || wake.notify()))
}

fn serve_client(shared: &Arc<ServerShared>, stream: TcpStream, peer: SocketAddr, live: &Liveness) {
    let setup = stream
        .set_nonblocking(false)
        .context("set stream blocking")
        .and_then(|_| reliable_pair(stream, shared.cfg.poll_interval(), shared.cfg.max_frame_bytes));
    let (tx, mut rx) = match setup {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%peer, error = %format!("{e:#}"), "connection setup failed");
            return;
        }
    };

    let client_udp_port = match handshake(shared, &tx, &mut rx, live) {
        Ok(port) => port,
        Err(e) => {
            warn!(%peer, error = %format!("{e:#}"), "handshake failed");
            let _ = tx.send_msg(&TcpMsg::Disconnect);
            tx.shutdown();
            return;
        }
    };
    debug!(%peer, client_udp_port, "handshake done");

    let conn = Arc::new(Connection::new(peer, shared.wake.clone()));
    shared.set_connection(Some(conn.clone()));
    let mut session = Session {
        shared: shared.clone(),
        conn,
        tx,
        live: live.clone(),
        deferred: Vec::new(),
        endpoints: Vec::new(),
    };
    match session.run(rx, client_udp_port) {
        Ok(()) => info!(%peer, "session ended"),
        Err(e) => info!(%peer, reason = %format!("{e:#}"), "session ended"),
    }
    session.drop_client();
}

/// Reads the next control message, skipping keepalives.
fn recv_control(rx: &mut ReliableReceiver, timeout: Duration, live: &Liveness) -> anyhow::Result<TcpMsg> {
    let deadline = Instant::now() + timeout;
    while live.is_alive() {
        match rx.recv_frame(|| live.is_alive())? {
            Some(TcpFrame::Control(TcpMsg::Keepalive)) => {}
            Some(TcpFrame::Control(msg)) => return Ok(msg),
            Some(TcpFrame::Resource(r)) => bail!("unexpected {:?} frame", r.kind()),
            None if Instant::now() >= deadline => bail!("timed out"),
            None => {}
        }
    }
    bail!("server shutting down")
}

/// HELO → HELO_ACK → READY. Returns the client's UDP receive port.
fn handshake(
    shared: &ServerShared,
    tx: &ReliableSender,
    rx: &mut ReliableReceiver,
    live: &Liveness,
) -> anyhow::Result<u16> {
    let timeout = shared.cfg.keepalive_timeout();
    let udp_port = match recv_control(rx, timeout, live).context("waiting for HELO")? {
        TcpMsg::Helo { udp_port } => udp_port,
        other => bail!("expected HELO, got {other:?}"),
    };
    tx.send_msg(&TcpMsg::HeloAck)?;
    match recv_control(rx, timeout, live).context("waiting for READY")? {
        TcpMsg::Ready { .. } => Ok(udp_port),
        other => bail!("expected READY, got {other:?}"),
    }
}

struct Session {
    shared: Arc<ServerShared>,
    conn: Arc<Connection>,
    tx: ReliableSender,
    live: Liveness,
    /// REQ_MODEL indices received while waiting for an ACK.
    deferred: Vec<u16>,
    /// Closed in reverse order on drop.
    endpoints: Vec<Endpoint>,
}

impl Session {
    fn run(&mut self, rx: ReliableReceiver, client_udp_port: u16) -> anyhow::Result<()> {
        let shared = &self.shared;
        self.endpoints.push(tcp_recv::spawn_receiver(
            shared.clone(),
            self.conn.clone(),
            rx,
            self.tx.clone(),
        )?);
        self.endpoints
            .push(tcp_recv::spawn_keepalive(shared.clone(), self.conn.clone())?);

        let port = match client_udp_port {
            0 => shared.cfg.client_udp_port,
            p => p,
        };
        let dest = SocketAddr::new(self.conn.peer.ip(), port);
        self.endpoints
            .push(udp::spawn_active(shared.clone(), self.conn.clone(), dest)?);
        let (passive, passive_port) = udp::spawn_passive(shared.clone(), self.conn.clone())?;
        self.endpoints.push(passive);

        let dirty = {
            let store = shared.read_store();
            let sent = lock(&shared.sent);
            ResourceBatch::collect_dirty(&store, &sent)
        };
        lock(&shared.batch).merge(dirty);

        self.tx.send_msg(&TcpMsg::Ready {
            udp_port: passive_port,
        })?;
        info!(peer = %self.conn.peer, udp_dest = %dest, passive_port, "client ready");

        self.msg_loop()
    }

    fn msg_loop(&mut self) -> anyhow::Result<()> {
        let poll = self.shared.cfg.poll_interval();
        while self.live.is_alive() {
            self.shared.wake.wait_until(poll, || {
                !self.live.is_alive()
                    || !self.conn.is_connected()
                    || self.conn.has_inbound()
                    || !self.deferred.is_empty()
                    || !lock(&self.shared.batch).is_empty()
            });
            if !self.conn.is_connected() {
                bail!("client disconnected");
            }

            while let Some(msg) = self.conn.try_recv_inbound() {
                match msg {
                    TcpMsg::ReqModel { index } => self.deferred.push(index),
                    TcpMsg::RsrcExchangeAck => debug!("stray RSRC_EXCHANGE_ACK ignored"),
                    other => bail!("unexpected {other:?} outside a resource exchange"),
                }
            }
            for index in std::mem::take(&mut self.deferred) {
                self.load_and_enqueue(index);
            }

            let batch = std::mem::take(&mut *lock(&self.shared.batch));
            if !batch.is_empty() {
                self.send_batch(&batch).context("resource exchange")?;
            }
        }
        Ok(())
    }

    fn load_and_enqueue(&self, index: u16) {
        let loaded = {
            let mut store = self.shared.write_store();
            load_into(&mut store, &*self.shared.loader, &self.shared.catalog, index)
        };
        match loaded {
            Ok(Some(id)) => {
                if self.shared.enqueue_model(id) {
                    info!(index, model = %id, "requested model queued");
                } else {
                    debug!(index, model = %id, "requested model already sent or queued");
                }
            }
            Ok(None) => warn!(index, "requested model index out of range"),
            Err(e) => warn!(index, error = %format!("{e:#}"), "failed to load requested model"),
        }
    }

    fn send_batch(&mut self, batch: &ResourceBatch) -> anyhow::Result<()> {
        let plan = {
            let store = self.shared.read_store();
            let sent = lock(&self.shared.sent);
            batch.plan(&store, &sent)
        };
        if plan.is_empty() {
            return Ok(());
        }
        info!(items = plan.len(), "starting resource exchange");
        self.tx.send_msg(&TcpMsg::StartRsrcExchange)?;
        self.expect_ack()?;

        let mut total = 0usize;
        for item in plan {
            let Some(packet) = self.packet_for(item) else {
                continue;
            };
            total += match self.tx.send_resource(&packet) {
                Ok(n) => n,
                Err(ChannelError::Wire(e)) => {
                    warn!(
                        kind = ?packet.kind(),
                        id = %item.id(),
                        error = %e,
                        "resource cannot be encoded, skipped"
                    );
                    continue;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("send {:?} {}", packet.kind(), item.id())));
                }
            };
            self.expect_ack()
                .with_context(|| format!("ack for {:?} {}", packet.kind(), item.id()))?;
            lock(&self.shared.sent).insert(item.id());
            debug!(kind = ?packet.kind(), id = %item.id(), "resource acknowledged");
            self.on_acked(item);
        }

        self.tx.send_msg(&TcpMsg::EndRsrcExchange)?;
        info!(bytes = total, "resource exchange done");
        Ok(())
    }

    fn packet_for(&self, item: ExchangeItem) -> Option<ResourcePacket> {
        let store = self.shared.read_store();
        Some(match item {
            ExchangeItem::Model(id) => ResourcePacket::Model(store.model(id)?.info()),
            ExchangeItem::Material(id) => ResourcePacket::Material(*store.material(id)?),
            ExchangeItem::Texture(id, format) => ResourcePacket::Texture(Texture {
                format,
                ..store.texture(id)?.clone()
            }),
            ExchangeItem::PointLight(id) => ResourcePacket::PointLight(*store.point_light(id)?),
            ExchangeItem::Shader(id) => ResourcePacket::Shader(store.shader(id)?.clone()),
        })
    }

    /// Schedules geometry and scene nodes for acknowledged models and lights.
    fn on_acked(&self, item: ExchangeItem) {
        match item {
            ExchangeItem::Model(id) => {
                let n = self.shared.schedule_geometry(id);
                debug!(model = %id, updates = n, "geometry scheduled");
                self.add_node(id, NodeType::Model, Mat4::IDENTITY);
            }
            ExchangeItem::PointLight(id) => {
                let position = self
                    .shared
                    .read_store()
                    .point_light(id)
                    .map(|l| l.position);
                if let Some(position) = position {
                    self.add_node(id, NodeType::PointLight, Mat4::from_translation(position));
                }
            }
            _ => {}
        }
    }

    fn add_node(&self, id: ResourceId, kind: NodeType, transform: Mat4) {
        let mut scene = lock(&self.shared.scene);
        let node = scene.add_node(id, kind, transform);
        if self.shared.static_models.contains(&id) {
            node.flags |= NodeFlags::STATIC;
        }
    }

    fn expect_ack(&mut self) -> anyhow::Result<()> {
        let poll = self.shared.cfg.poll_interval();
        let deadline = Instant::now() + self.shared.cfg.ack_timeout();
        loop {
            if !self.live.is_alive() {
                bail!("server shutting down");
            }
            if !self.conn.is_connected() {
                bail!("client disconnected");
            }
            let now = Instant::now();
            if now >= deadline {
                bail!("timed out waiting for RSRC_EXCHANGE_ACK");
            }
            match self.conn.recv_inbound_timeout(poll.min(deadline - now)) {
                Ok(TcpMsg::RsrcExchangeAck) => return Ok(()),
                Ok(TcpMsg::ReqModel { index }) => {
                    debug!(index, "REQ_MODEL deferred until exchange ends");
                    self.deferred.push(index);
                }
                Ok(other) => bail!("expected RSRC_EXCHANGE_ACK, got {other:?}"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => bail!("inbound queue closed"),
            }
        }
    }

    /// Tears down every per-connection thread and clears connection state.
    fn drop_client(mut self) {
        info!(peer = %self.conn.peer, "dropping client");
        let _ = self.tx.send_msg(&TcpMsg::Disconnect);
        self.conn.disconnect("dropped by server");
        while let Some(mut ep) = self.endpoints.pop() {
            debug!(endpoint = ep.name(), "closing");
            ep.close();
        }
        self.tx.shutdown();
        self.shared.reset_connection_state();
    }
}
