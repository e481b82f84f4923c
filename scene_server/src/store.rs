//! Server-side resource store.
//!
//! Owns every model, material, texture, light and shader the server can send.
//! Entries are keyed by `ResourceId` and remember insertion order so batches
//! built from the store are deterministic.

use std::collections::HashMap;

use anyhow::Context;
use scene_shared::{
    id::ResourceId,
    resources::{Material, Model, PointLight, SpirvShader, Texture},
};

/// Insertion-ordered map keyed by resource id.
#[derive(Debug, Clone)]
pub struct Table<T> {
    items: HashMap<ResourceId, T>,
    order: Vec<ResourceId>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T> Table<T> {
    /// Inserts or replaces; replacing keeps the original position.
    pub fn insert(&mut self, id: ResourceId, item: T) {
        if self.items.insert(id, item).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: ResourceId) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.order.iter().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &T)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id).map(|item| (*id, item)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    pub models: Table<Model>,
    pub materials: Table<Material>,
    pub textures: Table<Texture>,
    pub point_lights: Table<PointLight>,
    pub shaders: Table<SpirvShader>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, model: Model) -> ResourceId {
        let id = model.name;
        self.models.insert(id, model);
        id
    }

    pub fn add_material(&mut self, material: Material) -> ResourceId {
        let id = material.name;
        self.materials.insert(id, material);
        id
    }

    pub fn add_texture(&mut self, texture: Texture) -> ResourceId {
        let id = texture.name;
        self.textures.insert(id, texture);
        id
    }

    pub fn add_point_light(&mut self, light: PointLight) -> ResourceId {
        let id = light.name;
        self.point_lights.insert(id, light);
        id
    }

    pub fn add_shader(&mut self, shader: SpirvShader) -> ResourceId {
        let id = shader.name;
        self.shaders.insert(id, shader);
        id
    }

    /// Adds a loaded model together with the materials and textures it uses.
    pub fn add_loaded(&mut self, loaded: LoadedModel) -> ResourceId {
        for mat in loaded.materials {
            self.add_material(mat);
        }
        for tex in loaded.textures {
            self.add_texture(tex);
        }
        self.add_model(loaded.model)
    }

    pub fn model(&self, id: ResourceId) -> Option<&Model> {
        self.models.get(id)
    }

    pub fn material(&self, id: ResourceId) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn texture(&self, id: ResourceId) -> Option<&Texture> {
        self.textures.get(id)
    }

    pub fn point_light(&self, id: ResourceId) -> Option<&PointLight> {
        self.point_lights.get(id)
    }

    pub fn shader(&self, id: ResourceId) -> Option<&SpirvShader> {
        self.shaders.get(id)
    }
}

/// A model plus everything it references.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model: Model,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
}

/// Loads models on demand (for `REQ_MODEL`).
pub trait ModelLoader: Send + Sync {
    fn load_model(&self, name: &str) -> anyhow::Result<LoadedModel>;
}

/// Ordered list of model names a client may request by index.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    names: Vec<String>,
}

impl ModelCatalog {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn get(&self, index: u16) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Resolves a catalog index and loads the model into `store`, unless it is
/// already there.
pub fn load_into(
    store: &mut ResourceStore,
    loader: &dyn ModelLoader,
    catalog: &ModelCatalog,
    index: u16,
) -> anyhow::Result<Option<ResourceId>> {
    let Some(name) = catalog.get(index) else {
        return Ok(None);
    };
    let id = ResourceId::from_name(name);
    if store.models.contains(id) {
        return Ok(Some(id));
    }
    let loaded = loader
        .load_model(name)
        .with_context(|| format!("load model {name}"))?;
    Ok(Some(store.add_loaded(loaded)))
}
