//! Procedural demo content: a few generated models, their textures and a
//! ring of dynamic point lights. Used by the `server` binary and the tests
//! in place of on-disk assets.

use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};
use scene_shared::{
    id::ResourceId,
    math::Vec3,
    resources::{
        LightDynMask, Material, Mesh, Model, PointLight, ShaderStage, SpirvShader, Texture,
        TextureFormat, Vertex,
    },
};

use crate::store::{LoadedModel, ModelCatalog, ModelLoader, ResourceStore};

/// Models a client may request, by index.
pub const DEMO_MODELS: [&str; 3] = ["cube", "grid", "quad"];

const TEX_SIDE: usize = 16;

pub fn demo_catalog() -> ModelCatalog {
    ModelCatalog::new(DEMO_MODELS)
}

/// Generates models by catalog name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoLoader;

impl ModelLoader for DemoLoader {
    fn load_model(&self, name: &str) -> anyhow::Result<LoadedModel> {
        let (vertices, indices) = match name {
            "cube" => cube(),
            "grid" => grid(16, 8.0),
            "quad" => grid(1, 2.0),
            other => bail!("no demo model named {other:?}"),
        };
        let (material, textures) = material_for(name);
        let n_indices = indices.len() as u32;
        Ok(LoadedModel {
            model: Model {
                name: ResourceId::from_name(name),
                vertices,
                indices,
                materials: vec![material.name],
                meshes: vec![Mesh {
                    offset: 0,
                    len: n_indices,
                    material: Some(0),
                }],
            },
            materials: vec![material],
            textures,
        })
    }
}

/// Store holding the first catalog model, `n_lights` lights and a shader pair.
pub fn demo_store(n_lights: usize) -> anyhow::Result<ResourceStore> {
    let mut store = ResourceStore::new();
    store.add_loaded(DemoLoader.load_model(DEMO_MODELS[0])?);
    for light in demo_lights(n_lights) {
        store.add_point_light(light);
    }
    for (name, stage) in [
        ("shaders/gbuffer.vert.spv", ShaderStage::Vertex),
        ("shaders/gbuffer.frag.spv", ShaderStage::Fragment),
    ] {
        store.add_shader(SpirvShader {
            name: ResourceId::from_name(name),
            pass_number: 0,
            stage,
            code: spirv_stub(stage),
        });
    }
    Ok(store)
}

/// Lights named `Light i`, white, attenuation 0.5, placed on a ring.
pub fn demo_lights(n: usize) -> Vec<PointLight> {
    (0..n)
        .map(|i| {
            let angle = i as f32 / n.max(1) as f32 * std::f32::consts::TAU;
            PointLight {
                position: Vec3::new(4.0 * angle.cos(), 2.0, 4.0 * angle.sin()),
                dyn_mask: LightDynMask::POSITION | LightDynMask::COLOR | LightDynMask::INTENSITY,
                ..PointLight::new(ResourceId::from_name(&format!("Light {i}")))
            }
        })
        .collect()
}

fn material_for(model: &str) -> (Material, Vec<Texture>) {
    let diffuse = ResourceId::from_name(&format!("{model}_diffuse.png"));
    let normal = ResourceId::from_name(&format!("{model}_normal.png"));
    let material = Material {
        name: ResourceId::from_name(&format!("{model}_material")),
        diffuse_tex: diffuse,
        specular_tex: ResourceId::NONE,
        normal_tex: normal,
    };
    let textures = vec![
        Texture {
            name: diffuse,
            format: TextureFormat::Rgba,
            data: checker(),
        },
        Texture {
            name: normal,
            format: TextureFormat::Rgba,
            data: flat_normals(),
        },
    ];
    (material, textures)
}

fn checker() -> Bytes {
    let mut buf = BytesMut::with_capacity(TEX_SIDE * TEX_SIDE * 4);
    for y in 0..TEX_SIDE {
        for x in 0..TEX_SIDE {
            let v = if (x / 4 + y / 4) % 2 == 0 { 0xff } else { 0x40 };
            buf.put_slice(&[v, v, v, 0xff]);
        }
    }
    buf.freeze()
}

fn flat_normals() -> Bytes {
    let mut buf = BytesMut::with_capacity(TEX_SIDE * TEX_SIDE * 4);
    for _ in 0..TEX_SIDE * TEX_SIDE {
        buf.put_slice(&[0x80, 0x80, 0xff, 0xff]);
    }
    buf.freeze()
}

/// SPIR-V magic number followed by a stage marker.
fn spirv_stub(stage: ShaderStage) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32_le(0x0723_0203);
    buf.put_u32_le(stage as u32);
    buf.freeze()
}

fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, tangent u, tangent v) per face
    let faces = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = |i: usize| 0.5 * (n[i] + su * u[i] + sv * v[i]);
            vertices.push(Vertex {
                pos: Vec3::new(p(0), p(1), p(2)),
                norm: Vec3::new(n[0], n[1], n[2]),
                uv: [(su + 1.0) / 2.0, (sv + 1.0) / 2.0],
            });
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Flat `cells × cells` grid of side `size` in the XZ plane.
fn grid(cells: u32, size: f32) -> (Vec<Vertex>, Vec<u32>) {
    let side = cells + 1;
    let mut vertices = Vec::with_capacity((side * side) as usize);
    for z in 0..side {
        for x in 0..side {
            let (fx, fz) = (x as f32 / cells as f32, z as f32 / cells as f32);
            vertices.push(Vertex {
                pos: Vec3::new((fx - 0.5) * size, 0.0, (fz - 0.5) * size),
                norm: Vec3::new(0.0, 1.0, 0.0),
                uv: [fx, fz],
            });
        }
    }
    let mut indices = Vec::with_capacity((cells * cells * 6) as usize);
    for z in 0..cells {
        for x in 0..cells {
            let i = z * side + x;
            indices.extend([i, i + side, i + 1, i + 1, i + side, i + side + 1]);
        }
    }
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_models_are_consistent() {
        for name in DEMO_MODELS {
            let loaded = DemoLoader.load_model(name).unwrap();
            let m = &loaded.model;
            assert!(m.indices.iter().all(|&i| (i as usize) < m.vertices.len()));
            assert_eq!(m.meshes[0].len as usize, m.indices.len());
            assert_eq!(loaded.textures.len(), 2);
        }
        assert_eq!(DemoLoader.load_model("cube").unwrap().model.vertices.len(), 24);
        assert!(DemoLoader.load_model("teapot").is_err());
    }

    #[test]
    fn demo_store_contents() {
        let store = demo_store(3).unwrap();
        assert_eq!(store.models.len(), 1);
        assert_eq!(store.materials.len(), 1);
        assert_eq!(store.textures.len(), 2);
        assert_eq!(store.point_lights.len(), 3);
        assert_eq!(store.shaders.len(), 2);
        assert!(store.point_light(ResourceId::from_name("Light 2")).is_some());
    }
}
