//! Resource batches and the per-connection sent set.
//!
//! A batch lists the top-level resources (models, lights, shaders) queued
//! for one client. `plan` expands it into the ordered list of frames a
//! resource exchange sends: each model is followed by its materials, then all
//! referenced textures, then lights, then shaders. Anything already in the
//! sent set, or already planned, is skipped.

use std::collections::HashSet;

use scene_shared::{id::ResourceId, resources::TextureFormat};

use crate::store::ResourceStore;

/// Ids already delivered and acknowledged on the current connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentSet {
    ids: HashSet<ResourceId>,
}

impl SentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.ids.contains(&id)
    }

    /// Returns false if `id` was already present.
    pub fn insert(&mut self, id: ResourceId) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn ids(&self) -> HashSet<ResourceId> {
        self.ids.clone()
    }
}

/// One frame of a resource exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeItem {
    Model(ResourceId),
    Material(ResourceId),
    Texture(ResourceId, TextureFormat),
    PointLight(ResourceId),
    Shader(ResourceId),
}

impl ExchangeItem {
    pub fn id(&self) -> ResourceId {
        match *self {
            ExchangeItem::Model(id)
            | ExchangeItem::Material(id)
            | ExchangeItem::Texture(id, _)
            | ExchangeItem::PointLight(id)
            | ExchangeItem::Shader(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceBatch {
    pub models: Vec<ResourceId>,
    pub point_lights: Vec<ResourceId>,
    pub shaders: Vec<ResourceId>,
}

fn push_unique(list: &mut Vec<ResourceId>, id: ResourceId) -> bool {
    if id.is_none() || list.contains(&id) {
        return false;
    }
    list.push(id);
    true
}

impl ResourceBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every store entry not yet in `sent`.
    pub fn collect_dirty(store: &ResourceStore, sent: &SentSet) -> Self {
        let dirty = |id: &ResourceId| !sent.contains(*id);
        Self {
            models: store.models.ids().filter(dirty).collect(),
            point_lights: store.point_lights.ids().filter(dirty).collect(),
            shaders: store.shaders.ids().filter(dirty).collect(),
        }
    }

    /// Returns false if the model is already queued.
    pub fn add_model(&mut self, id: ResourceId) -> bool {
        push_unique(&mut self.models, id)
    }

    pub fn add_point_light(&mut self, id: ResourceId) -> bool {
        push_unique(&mut self.point_lights, id)
    }

    pub fn add_shader(&mut self, id: ResourceId) -> bool {
        push_unique(&mut self.shaders, id)
    }

    /// Adds everything from `other` that is not queued yet.
    pub fn merge(&mut self, other: ResourceBatch) {
        for id in other.models {
            self.add_model(id);
        }
        for id in other.point_lights {
            self.add_point_light(id);
        }
        for id in other.shaders {
            self.add_shader(id);
        }
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.models.contains(&id) || self.point_lights.contains(&id) || self.shaders.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.models.len() + self.point_lights.len() + self.shaders.len()
    }

    pub fn clear(&mut self) {
        self.models.clear();
        self.point_lights.clear();
        self.shaders.clear();
    }

    /// Expands the batch into exchange order. Ids missing from the store are
    /// skipped.
    pub fn plan(&self, store: &ResourceStore, sent: &SentSet) -> Vec<ExchangeItem> {
        let mut seen: HashSet<ResourceId> = HashSet::new();
        let mut fresh = |id: ResourceId| !id.is_none() && !sent.contains(id) && seen.insert(id);

        let mut items = Vec::new();
        let mut textures = Vec::new();
        for &model_id in &self.models {
            let Some(model) = store.model(model_id) else {
                continue;
            };
            if !fresh(model_id) {
                continue;
            }
            items.push(ExchangeItem::Model(model_id));
            for &mat_id in &model.materials {
                let Some(mat) = store.material(mat_id) else {
                    continue;
                };
                if !fresh(mat_id) {
                    continue;
                }
                items.push(ExchangeItem::Material(mat_id));
                textures.extend(mat.textures());
            }
        }
        for (tex_id, format) in textures {
            if store.texture(tex_id).is_some() && fresh(tex_id) {
                items.push(ExchangeItem::Texture(tex_id, format));
            }
        }
        for &light_id in &self.point_lights {
            if store.point_light(light_id).is_some() && fresh(light_id) {
                items.push(ExchangeItem::PointLight(light_id));
            }
        }
        for &shader_id in &self.shaders {
            if store.shader(shader_id).is_some() && fresh(shader_id) {
                items.push(ExchangeItem::Shader(shader_id));
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use scene_shared::resources::{Material, Model, PointLight, Texture};

    fn textured_store() -> ResourceStore {
        let mut store = ResourceStore::new();
        let diffuse = ResourceId::from_name("brick.png");
        let normal = ResourceId::from_name("brick_n.png");
        let mat = ResourceId::from_name("brick");
        for name in [diffuse, normal] {
            store.add_texture(Texture {
                name,
                format: TextureFormat::Unknown,
                data: Bytes::from_static(&[0; 16]),
            });
        }
        store.add_material(Material {
            name: mat,
            diffuse_tex: diffuse,
            specular_tex: ResourceId::NONE,
            normal_tex: normal,
        });
        for name in ["wall", "floor"] {
            store.add_model(Model {
                name: ResourceId::from_name(name),
                materials: vec![mat],
                ..Model::default()
            });
        }
        store.add_point_light(PointLight::new(ResourceId::from_name("Light 0")));
        store
    }

    #[test]
    fn collect_dirty_skips_sent() {
        let store = textured_store();
        let mut sent = SentSet::new();
        sent.insert(ResourceId::from_name("wall"));
        let batch = ResourceBatch::collect_dirty(&store, &sent);
        assert_eq!(batch.models, vec![ResourceId::from_name("floor")]);
        assert_eq!(batch.point_lights, vec![ResourceId::from_name("Light 0")]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn plan_orders_and_dedups_shared_dependencies() {
        let store = textured_store();
        let batch = ResourceBatch::collect_dirty(&store, &SentSet::new());
        let plan = batch.plan(&store, &SentSet::new());
        assert_eq!(
            plan,
            vec![
                ExchangeItem::Model(ResourceId::from_name("wall")),
                ExchangeItem::Material(ResourceId::from_name("brick")),
                ExchangeItem::Model(ResourceId::from_name("floor")),
                ExchangeItem::Texture(ResourceId::from_name("brick.png"), TextureFormat::Rgba),
                ExchangeItem::Texture(ResourceId::from_name("brick_n.png"), TextureFormat::Rgba),
                ExchangeItem::PointLight(ResourceId::from_name("Light 0")),
            ]
        );
    }

    #[test]
    fn adding_twice_queues_once() {
        let mut batch = ResourceBatch::new();
        let id = ResourceId::from_name("wall");
        assert!(batch.add_model(id));
        assert!(!batch.add_model(id));
        assert!(!batch.add_model(ResourceId::NONE));
        assert_eq!(batch.len(), 1);
        batch.clear();
        assert!(batch.is_empty());
    }

    #[test]
    fn plan_is_empty_when_everything_was_sent() {
        let store = textured_store();
        let batch = ResourceBatch::collect_dirty(&store, &SentSet::new());
        let mut sent = SentSet::new();
        for item in batch.plan(&store, &sent) {
            sent.insert(item.id());
        }
        assert!(batch.plan(&store, &sent).is_empty());
        assert!(ResourceBatch::collect_dirty(&store, &sent).is_empty());
    }
}
