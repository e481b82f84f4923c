//! State shared between the server's threads.
//!
//! - `ServerShared`: process-wide resources plus the connection-scoped
//!   batch, sent set, scene and outbound update queues (cleared on drop).
//! - `ToClient`: pending UDP updates. Geometry is queued redundantly and
//!   pruned by client ACKs; lights and transforms keep only the newest value
//!   per object.
//! - `Connection`: liveness of the current client and its inbound control
//!   queue.

use std::{
    collections::{BTreeMap, HashSet},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use scene_shared::{
    bandwidth::BandwidthLimiter,
    config::SyncConfig,
    id::ResourceId,
    resources::Camera,
    sync::{LatestSlot, SharedQueue, Signal},
    tcp::TcpMsg,
    udp::{GeomDataType, PointLightUpdate, TransformUpdate},
};
use tracing::{debug, info, warn};

use crate::{
    batch::{ResourceBatch, SentSet},
    geom_update::{build_geom_updates, build_slice_updates, GeomUpdate, SerialSource},
    scene::Scene,
    store::{ModelCatalog, ModelLoader, ResourceStore},
};

/// Capacity of the inbound control message queue.
pub const INBOUND_QUEUE_LEN: usize = 64;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct ToClient {
    geom: SharedQueue<GeomUpdate>,
    lights: Mutex<BTreeMap<ResourceId, PointLightUpdate>>,
    transforms: Mutex<BTreeMap<ResourceId, TransformUpdate>>,
}

impl ToClient {
    /// Queues `redundancy` rounds of `updates`, one full round after another
    /// so copies of one slice land in different packets.
    pub fn enqueue_geom(&self, updates: &[GeomUpdate], redundancy: u32) {
        let rounds = redundancy.max(1) as usize;
        let mut q = self.geom.lock();
        for _ in 0..rounds {
            q.extend(updates.iter().cloned());
        }
        drop(q);
        self.geom.notify();
    }

    pub fn pop_geom(&self) -> Option<GeomUpdate> {
        self.geom.lock().pop_front()
    }

    /// Puts back an update that did not make it into this tick.
    pub fn requeue_geom_front(&self, update: GeomUpdate) {
        self.geom.lock().push_front(update);
    }

    pub fn pending_geom(&self) -> usize {
        self.geom.len()
    }

    /// Drops every queued copy of the acknowledged serials. Nothing is
    /// remembered afterwards; a copy already popped for the current tick
    /// may still go out once.
    pub fn ack(&self, serials: &[u32]) -> usize {
        if serials.is_empty() {
            return 0;
        }
        let acked: HashSet<u32> = serials.iter().copied().collect();
        let mut q = self.geom.lock();
        let before = q.len();
        q.retain(|u| !acked.contains(&u.header.serial_id));
        before - q.len()
    }

    pub fn push_light(&self, update: PointLightUpdate) {
        lock(&self.lights).insert(update.light_id, update);
    }

    pub fn push_transform(&self, update: TransformUpdate) {
        lock(&self.transforms).insert(update.object_id, update);
    }

    pub fn take_lights(&self) -> Vec<PointLightUpdate> {
        std::mem::take(&mut *lock(&self.lights)).into_values().collect()
    }

    pub fn take_transforms(&self) -> Vec<TransformUpdate> {
        std::mem::take(&mut *lock(&self.transforms))
            .into_values()
            .collect()
    }

    pub fn clear(&self) {
        self.geom.clear();
        lock(&self.lights).clear();
        lock(&self.transforms).clear();
    }
}

/// Liveness and inbound queue of the connected client.
#[derive(Debug)]
pub struct Connection {
    pub peer: SocketAddr,
    connected: AtomicBool,
    last_seen: Mutex<Instant>,
    inbound_tx: Sender<TcpMsg>,
    inbound_rx: Receiver<TcpMsg>,
    wake: Arc<Signal>,
}

impl Connection {
    pub fn new(peer: SocketAddr, wake: Arc<Signal>) -> Self {
        let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(INBOUND_QUEUE_LEN);
        Self {
            peer,
            connected: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
            inbound_tx,
            inbound_rx,
            wake,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Marks the client as gone and wakes the control thread.
    pub fn disconnect(&self, reason: &str) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(peer = %self.peer, reason, "client disconnected");
        }
        self.wake.notify();
    }

    /// Any inbound traffic counts as a sign of life.
    pub fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    pub fn since_last_seen(&self) -> Duration {
        lock(&self.last_seen).elapsed()
    }

    /// Queues an inbound control message for the control thread. Returns
    /// false if the queue is full (the message is dropped).
    pub fn push_inbound(&self, msg: TcpMsg) -> bool {
        let ok = match self.inbound_tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!(peer = %self.peer, ?msg, "inbound control queue full, dropping");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        };
        self.wake.notify();
        ok
    }

    pub fn try_recv_inbound(&self) -> Option<TcpMsg> {
        self.inbound_rx.try_recv().ok()
    }

    pub fn recv_inbound_timeout(&self, timeout: Duration) -> Result<TcpMsg, RecvTimeoutError> {
        self.inbound_rx.recv_timeout(timeout)
    }

    pub fn has_inbound(&self) -> bool {
        !self.inbound_rx.is_empty()
    }

    /// Waits up to `timeout` for a disconnect; returns true if disconnected.
    pub fn wait_disconnected(&self, timeout: Duration) -> bool {
        self.wake.wait_until(timeout, || !self.is_connected())
    }
}

pub struct ServerShared {
    pub cfg: SyncConfig,
    pub store: RwLock<ResourceStore>,
    pub loader: Arc<dyn ModelLoader>,
    pub catalog: ModelCatalog,
    pub limiter: BandwidthLimiter,
    pub batch: Mutex<ResourceBatch>,
    pub sent: Mutex<SentSet>,
    pub to_client: ToClient,
    /// Freshest client camera, written by the UDP passive endpoint.
    pub camera: LatestSlot<Camera>,
    pub scene: Mutex<Scene>,
    pub serials: SerialSource,
    /// Models whose scene nodes are created `STATIC`.
    pub static_models: HashSet<ResourceId>,
    /// Wakes the control thread.
    pub wake: Arc<Signal>,
    current: Mutex<Option<Arc<Connection>>>,
}

impl ServerShared {
    pub fn new(
        cfg: SyncConfig,
        store: ResourceStore,
        loader: Arc<dyn ModelLoader>,
        catalog: ModelCatalog,
        static_models: HashSet<ResourceId>,
    ) -> Self {
        let limiter = BandwidthLimiter::from_config(&cfg);
        Self {
            cfg,
            store: RwLock::new(store),
            loader,
            catalog,
            limiter,
            batch: Mutex::new(ResourceBatch::new()),
            sent: Mutex::new(SentSet::new()),
            to_client: ToClient::default(),
            camera: LatestSlot::new(),
            scene: Mutex::new(Scene::new()),
            serials: SerialSource::new(),
            static_models,
            wake: Arc::new(Signal::new()),
            current: Mutex::new(None),
        }
    }

    pub fn read_store(&self) -> RwLockReadGuard<'_, ResourceStore> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write_store(&self) -> RwLockWriteGuard<'_, ResourceStore> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        lock(&self.current).clone()
    }

    pub fn is_client_connected(&self) -> bool {
        self.connection().is_some_and(|c| c.is_connected())
    }

    pub(crate) fn set_connection(&self, conn: Option<Arc<Connection>>) {
        *lock(&self.current) = conn;
    }

    /// Queues a model for the current client unless it was already sent or
    /// queued. Returns true if it was added.
    pub fn enqueue_model(&self, id: ResourceId) -> bool {
        if id.is_none() || lock(&self.sent).contains(id) {
            return false;
        }
        let added = lock(&self.batch).add_model(id);
        if added {
            debug!(model = %id, "model queued");
            self.wake.notify();
        }
        added
    }

    /// Builds full geometry updates for an acknowledged model and queues them.
    pub fn schedule_geometry(&self, model_id: ResourceId) -> usize {
        let updates = {
            let store = self.read_store();
            let Some(model) = store.model(model_id) else {
                return 0;
            };
            build_geom_updates(model_id, model, self.cfg.packet_size, &self.serials)
        };
        self.to_client
            .enqueue_geom(&updates, self.cfg.geom_redundancy);
        updates.len()
    }

    /// Queues updates for one edited slice, if the client already has the
    /// model.
    pub fn schedule_slice(&self, model_id: ResourceId, data_type: GeomDataType, start: u32, len: u32) -> usize {
        if !lock(&self.sent).contains(model_id) {
            return 0;
        }
        let updates = {
            let store = self.read_store();
            let Some(model) = store.model(model_id) else {
                return 0;
            };
            build_slice_updates(
                model_id,
                model,
                data_type,
                start,
                len,
                self.cfg.packet_size,
                &self.serials,
            )
        };
        self.to_client
            .enqueue_geom(&updates, self.cfg.geom_redundancy);
        updates.len()
    }

    /// Clears everything scoped to the dropped connection.
    pub(crate) fn reset_connection_state(&self) {
        lock(&self.batch).clear();
        lock(&self.sent).clear();
        lock(&self.scene).clear();
        self.to_client.clear();
        self.camera.clear();
        self.set_connection(None);
    }
}
