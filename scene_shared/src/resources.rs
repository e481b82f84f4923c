//! Resource data model.
//!
//! These are the values the server owns in its resource store and the client
//! reconstructs on receipt. Wire layouts live in `tcp` (reliable resource
//! frames) and `udp` (delta chunks); this module only knows how a single
//! vertex/index is laid out, since geometry slices are streamed raw.

use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    id::ResourceId,
    math::Vec3,
    wire::{self, WireError},
};

/// Encoded size of one `Vertex`.
pub const VERTEX_SIZE: usize = 32;
/// Encoded size of one `Index`.
pub const INDEX_SIZE: usize = 4;

pub type Index = u32;

/// A mesh vertex: position, normal, texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vertex {
    pub pos: Vec3,
    pub norm: Vec3,
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn put(&self, dst: &mut impl BufMut) {
        for v in self.pos.to_array().into_iter().chain(self.norm.to_array()) {
            dst.put_f32_le(v);
        }
        dst.put_f32_le(self.uv[0]);
        dst.put_f32_le(self.uv[1]);
    }

    pub fn get(src: &mut impl Buf) -> Result<Self, WireError> {
        wire::ensure(&*src, VERTEX_SIZE, "vertex")?;
        let [px, py, pz] = wire::get_vec3(src);
        let [nx, ny, nz] = wire::get_vec3(src);
        Ok(Self {
            pos: Vec3::new(px, py, pz),
            norm: Vec3::new(nx, ny, nz),
            uv: [src.get_f32_le(), src.get_f32_le()],
        })
    }
}

/// Pixel format hint for texture creation on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TextureFormat {
    Rgba = 0,
    Grey = 1,
    Unknown = 2,
}

impl TextureFormat {
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(Self::Rgba),
            1 => Ok(Self::Grey),
            2 => Ok(Self::Unknown),
            _ => Err(WireError::InvalidValue {
                what: "texture format",
                value: u64::from(v),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ShaderStage {
    Vertex = 0,
    Fragment = 1,
    Geometry = 2,
    Unknown = 3,
}

impl ShaderStage {
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(Self::Vertex),
            1 => Ok(Self::Fragment),
            2 => Ok(Self::Geometry),
            3 => Ok(Self::Unknown),
            _ => Err(WireError::InvalidValue {
                what: "shader stage",
                value: u64::from(v),
            }),
        }
    }
}

/// Raw texture payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub name: ResourceId,
    pub format: TextureFormat,
    pub data: Bytes,
}

impl Texture {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A material references up to three textures; `ResourceId::NONE` marks a
/// missing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Material {
    pub name: ResourceId,
    pub diffuse_tex: ResourceId,
    pub specular_tex: ResourceId,
    pub normal_tex: ResourceId,
}

impl Material {
    /// Non-none texture slots with the format each one is uploaded as.
    pub fn textures(&self) -> impl Iterator<Item = (ResourceId, TextureFormat)> {
        [
            (self.diffuse_tex, TextureFormat::Rgba),
            (self.specular_tex, TextureFormat::Grey),
            (self.normal_tex, TextureFormat::Rgba),
        ]
        .into_iter()
        .filter(|(id, _)| !id.is_none())
    }
}

/// A group of indices into the parent model that share one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mesh {
    /// Offset into the parent model's indices.
    pub offset: u32,
    /// Amount of indices.
    pub len: u32,
    /// Index into the parent model's material list.
    pub material: Option<u16>,
}

/// Server-side model: header data plus the mutable geometry arrays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    pub name: ResourceId,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
    pub materials: Vec<ResourceId>,
    pub meshes: Vec<Mesh>,
}

impl Model {
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name,
            n_vertices: self.vertices.len() as u32,
            n_indices: self.indices.len() as u32,
            materials: self.materials.clone(),
            meshes: self.meshes.clone(),
        }
    }
}

/// What the client learns about a model over TCP; geometry follows over UDP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: ResourceId,
    pub n_vertices: u32,
    pub n_indices: u32,
    pub materials: Vec<ResourceId>,
    pub meshes: Vec<Mesh>,
}

bitflags::bitflags! {
    /// Which light fields change over time. Fixed fields are delivered once
    /// with the light itself and never appear in delta updates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LightDynMask: u8 {
        const POSITION = 1 << 0;
        const COLOR = 1 << 1;
        const INTENSITY = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub name: ResourceId,
    pub position: Vec3,
    pub color: Vec3,
    pub attenuation: f32,
    pub dyn_mask: LightDynMask,
}

impl PointLight {
    pub fn new(name: ResourceId) -> Self {
        Self {
            name,
            position: Vec3::ZERO,
            color: Vec3::ONE,
            attenuation: 0.5,
            dyn_mask: LightDynMask::empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpirvShader {
    pub name: ResourceId,
    /// Which subpass (pipeline) uses this shader.
    pub pass_number: u8,
    pub stage: ShaderStage,
    pub code: Bytes,
}

/// Client camera pose, sent to the server as telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_packed() {
        let v = Vertex {
            pos: Vec3::new(1.0, 2.0, 3.0),
            norm: Vec3::new(0.0, 1.0, 0.0),
            uv: [0.25, 0.75],
        };
        let mut buf = Vec::new();
        v.put(&mut buf);
        assert_eq!(buf.len(), VERTEX_SIZE);
        assert_eq!(Vertex::get(&mut &buf[..]).unwrap(), v);
    }

    #[test]
    fn material_skips_missing_textures() {
        let mat = Material {
            name: ResourceId::from_name("mat"),
            diffuse_tex: ResourceId::from_name("diffuse.png"),
            specular_tex: ResourceId::NONE,
            normal_tex: ResourceId::from_name("normal.png"),
        };
        let tex: Vec<_> = mat.textures().collect();
        assert_eq!(
            tex,
            vec![
                (ResourceId::from_name("diffuse.png"), TextureFormat::Rgba),
                (ResourceId::from_name("normal.png"), TextureFormat::Rgba),
            ]
        );
    }
}
