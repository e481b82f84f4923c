//! Server implementation.
//!
//! `Server` owns the listening socket and the initial resource store;
//! `start()` spawns the control endpoint (and optionally the demo
//! simulation) and returns a `ServerHandle` used to feed resources and
//! geometry edits to the connected client.
//!
//! Threads per connection:
//! - tcp-control: accept, handshake, resource exchanges, teardown
//! - tcp-recv: inbound control messages
//! - keepalive: timeout monitor
//! - udp-active / udp-passive: delta stream out, telemetry in

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use scene_shared::{
    config::SyncConfig,
    endpoint::Endpoint,
    id::ResourceId,
    resources::{Camera, Index, PointLight, Vertex},
    udp::GeomDataType,
};
use tracing::info;

use crate::{
    scene::Node,
    shared::{lock, ServerShared},
    sim::{SimOptions, Simulation},
    store::{LoadedModel, ModelCatalog, ModelLoader, ResourceStore},
    tcp,
};

/// Simulation tick period when enabled.
const SIM_PERIOD: Duration = Duration::from_millis(16);

/// In-place change to a model's geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum GeomEdit {
    Vertices { start: u32, data: Vec<Vertex> },
    Indices { start: u32, data: Vec<Index> },
}

pub struct Server {
    cfg: SyncConfig,
    listener: TcpListener,
    store: ResourceStore,
    loader: Arc<dyn ModelLoader>,
    catalog: ModelCatalog,
    static_models: HashSet<ResourceId>,
    sim: Option<SimOptions>,
}

impl Server {
    /// Binds the TCP listener on `server_ip:tcp_port`.
    pub fn new(cfg: SyncConfig, store: ResourceStore, loader: Arc<dyn ModelLoader>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((cfg.server_ip.as_str(), cfg.tcp_port))
            .with_context(|| format!("bind tcp listener on {}", cfg.tcp_addr()))?;
        Ok(Self {
            cfg,
            listener,
            store,
            loader,
            catalog: ModelCatalog::default(),
            static_models: HashSet::new(),
            sim: None,
        })
    }

    /// Models clients may request with `REQ_MODEL`.
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Scene nodes of these models never move.
    pub fn with_static_models(mut self, ids: impl IntoIterator<Item = ResourceId>) -> Self {
        self.static_models.extend(ids);
        self
    }

    /// Runs the demo simulation while a client is connected.
    pub fn with_simulation(mut self, opts: SimOptions) -> Self {
        self.sim = Some(opts);
        self
    }

    pub fn local_tcp_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self) -> anyhow::Result<ServerHandle> {
        let tcp_addr = self.local_tcp_addr()?;
        let shared = Arc::new(ServerShared::new(
            self.cfg,
            self.store,
            self.loader,
            self.catalog,
            self.static_models,
        ));
        let control = tcp::spawn_control(shared.clone(), self.listener)?;
        let sim = match self.sim {
            Some(opts) => Some(Simulation::new(shared.clone(), opts).spawn(SIM_PERIOD)?),
            None => None,
        };
        info!(%tcp_addr, limiter = shared.limiter.is_enabled(), "server started");
        Ok(ServerHandle {
            shared,
            control,
            sim,
            tcp_addr,
        })
    }
}

pub struct ServerHandle {
    shared: Arc<ServerShared>,
    control: Endpoint,
    sim: Option<Endpoint>,
    tcp_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.cfg
    }

    pub fn is_client_connected(&self) -> bool {
        self.shared.is_client_connected()
    }

    /// Adds a model (with its materials and textures) to the store.
    pub fn add_model(&self, loaded: LoadedModel) -> ResourceId {
        self.shared.write_store().add_loaded(loaded)
    }

    /// Queues a stored model for the connected client. Returns false if it
    /// was already sent or queued.
    pub fn enqueue_model(&self, id: ResourceId) -> bool {
        self.shared.enqueue_model(id)
    }

    /// Adds a light to the store and queues it for the connected client.
    pub fn add_point_light(&self, light: PointLight) -> ResourceId {
        let id = self.shared.write_store().add_point_light(light);
        if !lock(&self.shared.sent).contains(id) && lock(&self.shared.batch).add_point_light(id) {
            self.shared.wake.notify();
        }
        id
    }

    /// Ids delivered and acknowledged on the current connection.
    pub fn sent_ids(&self) -> HashSet<ResourceId> {
        lock(&self.shared.sent).ids()
    }

    /// Freshest camera pose reported by the client, unless the simulation
    /// already consumed it.
    pub fn client_camera(&self) -> Option<Camera> {
        self.shared.camera.peek()
    }

    pub fn scene_nodes(&self) -> Vec<Node> {
        lock(&self.shared.scene).nodes().to_vec()
    }

    /// Geometry updates waiting for the UDP sender (redundant copies
    /// included).
    pub fn pending_geometry(&self) -> usize {
        self.shared.to_client.pending_geom()
    }

    /// Applies `edit` to the stored model and streams the changed slice if
    /// the client already has the model. Returns the updates queued.
    pub fn push_geometry_edit(&self, model_id: ResourceId, edit: GeomEdit) -> anyhow::Result<usize> {
        let (data_type, start, len) = {
            let mut store = self.shared.write_store();
            let Some(model) = store.models.get_mut(model_id) else {
                bail!("no model {model_id}");
            };
            match edit {
                GeomEdit::Vertices { start, data } => {
                    let range = start as usize..start as usize + data.len();
                    let Some(dst) = model.vertices.get_mut(range) else {
                        bail!("vertex edit out of range for model {model_id}");
                    };
                    dst.copy_from_slice(&data);
                    (GeomDataType::Vertex, start, data.len() as u32)
                }
                GeomEdit::Indices { start, data } => {
                    let range = start as usize..start as usize + data.len();
                    let Some(dst) = model.indices.get_mut(range) else {
                        bail!("index edit out of range for model {model_id}");
                    };
                    dst.copy_from_slice(&data);
                    (GeomDataType::Index, start, data.len() as u32)
                }
            }
        };
        Ok(self.shared.schedule_slice(model_id, data_type, start, len))
    }

    /// Stops the simulation and the control endpoint, dropping any client.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(mut sim) = self.sim.take() {
            sim.close();
        }
        self.control.close();
        self.shared.limiter.stop();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Helper for tests: binds on loopback with ephemeral TCP/UDP ports and
/// returns the server plus the config a client should use to reach it.
pub fn bind_ephemeral(
    mut cfg: SyncConfig,
    store: ResourceStore,
    loader: Arc<dyn ModelLoader>,
) -> anyhow::Result<(Server, SyncConfig)> {
    cfg.server_ip = IpAddr::V4(Ipv4Addr::LOCALHOST).to_string();
    cfg.tcp_port = 0;
    cfg.server_udp_port = 0;
    cfg.client_udp_port = 0;
    let server = Server::new(cfg.clone(), store, loader)?;
    cfg.tcp_port = server.local_tcp_addr()?.port();
    Ok((server, cfg))
}
