//! Per-connection TCP reader and keepalive monitor.

use std::sync::Arc;

use scene_shared::{
    endpoint::{Endpoint, Liveness},
    tcp::{ChannelError, ReliableReceiver, ReliableSender, TcpFrame, TcpMsg},
};
use tracing::{debug, error, trace, warn};

use crate::shared::{Connection, ServerShared};

/// Spawns the reader: keepalives refresh `last_seen`, DISCONNECT and read
/// failures drop the client, other control messages go to the inbound queue.
pub fn spawn_receiver(
    shared: Arc<ServerShared>,
    conn: Arc<Connection>,
    mut rx: ReliableReceiver,
    tx: ReliableSender,
) -> anyhow::Result<Endpoint> {
    let max_failures = shared.cfg.max_recv_failures.max(1);
    let ep = Endpoint::spawn("tcp-recv", move |live: Liveness| {
        let mut failures = 0u32;
        while live.is_alive() && conn.is_connected() {
            let frame = match rx.recv_frame(|| live.is_alive() && conn.is_connected()) {
                Ok(None) => continue,
                Ok(Some(frame)) => frame,
                Err(ChannelError::Io(e)) => {
                    failures += 1;
                    warn!(error = %e, failures, "tcp receive failed");
                    if failures >= max_failures {
                        conn.disconnect("too many receive failures");
                    }
                    continue;
                }
                Err(ChannelError::Aborted) => break,
                Err(e) => {
                    debug!(error = %e, "tcp receive ended");
                    conn.disconnect("connection lost");
                    break;
                }
            };
            failures = 0;
            conn.touch();
            match frame {
                TcpFrame::Control(TcpMsg::Keepalive) => trace!("keepalive"),
                TcpFrame::Control(TcpMsg::Disconnect) => {
                    conn.disconnect("client sent DISCONNECT");
                }
                TcpFrame::Control(msg) => {
                    trace!(?msg, "control message");
                    conn.push_inbound(msg);
                }
                TcpFrame::Resource(r) => {
                    warn!(kind = ?r.kind(), "client sent a resource frame");
                    conn.disconnect("protocol violation");
                }
            }
        }
        Ok(())
    })?;
    Ok(ep.with_waker(move || tx.shutdown()))
}

/// Spawns the monitor that drops the client when no traffic was seen for
/// longer than the keepalive timeout.
pub fn spawn_keepalive(shared: Arc<ServerShared>, conn: Arc<Connection>) -> anyhow::Result<Endpoint> {
    let timeout = shared.cfg.keepalive_timeout();
    let check = shared.cfg.keepalive_check();
    let wake = shared.wake.clone();
    let ep = Endpoint::spawn("keepalive", move |live: Liveness| {
        while live.is_alive() && conn.is_connected() {
            if conn.wait_disconnected(check) {
                break;
            }
            let silent = conn.since_last_seen();
            if silent > timeout {
                error!(silent_ms = silent.as_millis() as u64, "keepalive timeout");
                conn.disconnect("keepalive timeout");
                break;
            }
        }
        Ok(())
    })?;
    Ok(ep.with_waker(move || wake.notify()))
}
