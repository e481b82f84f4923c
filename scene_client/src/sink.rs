//! Where decoded resources and updates go.
//!
//! `ResourceSink` is the seam between the network threads and whatever owns
//! client-side copies (a renderer, in a full client). `ClientResources` is
//! the headless implementation: it keeps every resource in memory, applies
//! geometry slices to per-model buffers and lets callers wait for a state.

use std::{
    collections::HashMap,
    sync::{Condvar, Mutex, MutexGuard},
    time::Duration,
};

use bytes::Buf;
use scene_shared::{
    config::SyncConfig,
    id::ResourceId,
    math::Mat4,
    resources::{Index, Material, ModelInfo, PointLight, SpirvShader, Texture, Vertex, INDEX_SIZE},
    tcp::ResourcePacket,
    udp::{GeomDataType, GeomUpdateHeader, PointLightUpdate, TransformUpdate},
};
use tracing::{debug, warn};

/// Receives everything the client decodes. Called from network threads.
pub trait ResourceSink: Send + Sync {
    fn on_resource(&self, packet: ResourcePacket);

    fn on_exchange_end(&self) {}

    /// Returns true if the slice was applied.
    fn on_geometry(&self, header: &GeomUpdateHeader, payload: &[u8]) -> bool;

    fn on_light_update(&self, update: &PointLightUpdate);

    fn on_transform(&self, update: &TransformUpdate);

    fn on_disconnect(&self) {}
}

/// Client-side model: what arrived over TCP plus the streamed geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientModel {
    pub info: ModelInfo,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
}

#[derive(Debug, Default)]
pub struct ClientState {
    pub models: HashMap<ResourceId, ClientModel>,
    pub materials: HashMap<ResourceId, Material>,
    pub textures: HashMap<ResourceId, Texture>,
    pub lights: HashMap<ResourceId, PointLight>,
    pub shaders: HashMap<ResourceId, SpirvShader>,
    pub transforms: HashMap<ResourceId, Mat4>,
    /// Resource ids in arrival order.
    pub received: Vec<ResourceId>,
    pub exchanges_completed: usize,
    pub geometry_applied: usize,
    pub disconnected: bool,
}

/// In-memory `ResourceSink`.
#[derive(Debug)]
pub struct ClientResources {
    state: Mutex<ClientState>,
    changed: Condvar,
    max_model_elements: u32,
}

impl Default for ClientResources {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl ClientResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Models whose vertex or index count exceeds `cfg.max_model_elements`
    /// are refused instead of allocated.
    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self {
            state: Mutex::default(),
            changed: Condvar::new(),
            max_model_elements: cfg.max_model_elements,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut ClientState)) {
        f(&mut self.lock());
        self.changed.notify_all();
    }

    /// Blocks until `ready` holds for the state or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration, mut ready: impl FnMut(&ClientState) -> bool) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |s| !ready(s))
            .unwrap_or_else(|e| e.into_inner());
        ready(&guard)
    }

    pub fn model(&self, id: ResourceId) -> Option<ClientModel> {
        self.lock().models.get(&id).cloned()
    }

    pub fn light(&self, id: ResourceId) -> Option<PointLight> {
        self.lock().lights.get(&id).copied()
    }

    pub fn transform(&self, id: ResourceId) -> Option<Mat4> {
        self.lock().transforms.get(&id).copied()
    }

    pub fn received(&self) -> Vec<ResourceId> {
        self.lock().received.clone()
    }
}

fn write_slice<T: Copy>(
    dst: &mut [T],
    start: usize,
    len: usize,
    mut read: impl FnMut() -> Option<T>,
) -> bool {
    let Some(slots) = dst.get_mut(start..start + len) else {
        return false;
    };
    for slot in slots {
        match read() {
            Some(v) => *slot = v,
            None => return false,
        }
    }
    true
}

impl ResourceSink for ClientResources {
    fn on_resource(&self, packet: ResourcePacket) {
        let id = packet.id();
        debug!(kind = ?packet.kind(), %id, "resource received");
        if let ResourcePacket::Model(info) = &packet {
            let limit = self.max_model_elements;
            if info.n_vertices > limit || info.n_indices > limit {
                warn!(
                    model = %id,
                    n_vertices = info.n_vertices,
                    n_indices = info.n_indices,
                    limit,
                    "model too large, refused"
                );
                return;
            }
        }
        self.update(|s| {
            s.received.push(id);
            match packet {
                ResourcePacket::Texture(t) => {
                    s.textures.insert(id, t);
                }
                ResourcePacket::Material(m) => {
                    s.materials.insert(id, m);
                }
                ResourcePacket::Model(info) => {
                    let model = ClientModel {
                        vertices: vec![Vertex::default(); info.n_vertices as usize],
                        indices: vec![0; info.n_indices as usize],
                        info,
                    };
                    s.models.insert(id, model);
                }
                ResourcePacket::PointLight(l) => {
                    s.lights.insert(id, l);
                }
                ResourcePacket::Shader(sh) => {
                    s.shaders.insert(id, sh);
                }
            }
        });
    }

    fn on_exchange_end(&self) {
        self.update(|s| s.exchanges_completed += 1);
    }

    fn on_geometry(&self, header: &GeomUpdateHeader, payload: &[u8]) -> bool {
        let mut applied = false;
        self.update(|s| {
            let Some(model) = s.models.get_mut(&header.model_id) else {
                debug!(model = %header.model_id, "geometry for unknown model");
                return;
            };
            let (start, len) = (header.start as usize, header.len as usize);
            let mut src = payload;
            applied = match header.data_type {
                GeomDataType::Vertex => write_slice(&mut model.vertices, start, len, || {
                    Vertex::get(&mut src).ok()
                }),
                GeomDataType::Index => write_slice(&mut model.indices, start, len, || {
                    (src.remaining() >= INDEX_SIZE).then(|| src.get_u32_le())
                }),
            };
            if applied {
                s.geometry_applied += 1;
            } else {
                warn!(model = %header.model_id, start, len, "geometry slice out of range");
            }
        });
        applied
    }

    fn on_light_update(&self, update: &PointLightUpdate) {
        self.update(|s| {
            if let Some(light) = s.lights.get_mut(&update.light_id) {
                update.apply(light);
            }
        });
    }

    fn on_transform(&self, update: &TransformUpdate) {
        self.update(|s| {
            s.transforms.insert(update.object_id, update.transform);
        });
    }

    fn on_disconnect(&self) {
        self.update(|s| s.disconnected = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use scene_shared::{math::Vec3, resources::LightDynMask};

    fn model_info(n_vertices: u32, n_indices: u32) -> ModelInfo {
        ModelInfo {
            name: ResourceId::from_name("quad"),
            n_vertices,
            n_indices,
            materials: vec![],
            meshes: vec![],
        }
    }

    #[test]
    fn geometry_slices_fill_buffers() {
        let sink = ClientResources::new();
        sink.on_resource(ResourcePacket::Model(model_info(4, 6)));

        let mut payload = Vec::new();
        for i in [0u32, 1, 2] {
            payload.put_u32_le(i + 10);
        }
        let header = GeomUpdateHeader {
            serial_id: 1,
            model_id: ResourceId::from_name("quad"),
            data_type: GeomDataType::Index,
            start: 3,
            len: 3,
        };
        assert!(sink.on_geometry(&header, &payload));
        let model = sink.model(ResourceId::from_name("quad")).unwrap();
        assert_eq!(model.indices, vec![0, 0, 0, 10, 11, 12]);

        let out_of_range = GeomUpdateHeader { start: 5, ..header };
        assert!(!sink.on_geometry(&out_of_range, &payload));
        assert_eq!(sink.lock().geometry_applied, 1);
    }

    #[test]
    fn oversized_model_is_refused() {
        let cfg = SyncConfig {
            max_model_elements: 1_000,
            ..SyncConfig::default()
        };
        let sink = ClientResources::from_config(&cfg);
        sink.on_resource(ResourcePacket::Model(model_info(u32::MAX, 6)));
        assert!(sink.model(ResourceId::from_name("quad")).is_none());

        let header = GeomUpdateHeader {
            serial_id: 1,
            model_id: ResourceId::from_name("quad"),
            data_type: GeomDataType::Index,
            start: 0,
            len: 1,
        };
        assert!(!sink.on_geometry(&header, &[0; INDEX_SIZE]));

        sink.on_resource(ResourcePacket::Model(model_info(1_000, 1_000)));
        let model = sink.model(ResourceId::from_name("quad")).unwrap();
        assert_eq!(model.vertices.len(), 1_000);
        assert!(sink.on_geometry(&header, &[0; INDEX_SIZE]));
    }

    #[test]
    fn light_update_touches_only_dynamic_fields() {
        let sink = ClientResources::new();
        let id = ResourceId::from_name("Light 0");
        sink.on_resource(ResourcePacket::PointLight(PointLight::new(id)));
        sink.on_light_update(&PointLightUpdate {
            light_id: id,
            mask: LightDynMask::COLOR,
            position: Vec3::new(9.0, 9.0, 9.0),
            color: Vec3::new(1.0, 0.0, 0.0),
            intensity: 3.0,
        });
        let light = sink.light(id).unwrap();
        assert_eq!(light.color, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(light.position, Vec3::ZERO);
        assert_eq!(light.attenuation, 0.5);
    }

    #[test]
    fn wait_for_sees_later_update() {
        let sink = std::sync::Arc::new(ClientResources::new());
        let writer = {
            let sink = sink.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                sink.on_exchange_end();
            })
        };
        assert!(sink.wait_for(Duration::from_secs(5), |s| s.exchanges_completed == 1));
        writer.join().unwrap();
    }
}
