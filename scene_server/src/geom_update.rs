//! Splitting model geometry into packet-sized UDP updates.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use scene_shared::{
    id::ResourceId,
    resources::{Model, INDEX_SIZE},
    udp::{max_geom_elements, GeomDataType, GeomUpdateHeader},
};

/// Hands out serial ids for geometry updates. Never yields 0.
#[derive(Debug, Default)]
pub struct SerialSource(AtomicU32);

impl SerialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u32 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }
}

/// A geometry slice with its encoded payload, ready to be packed.
#[derive(Debug, Clone, PartialEq)]
pub struct GeomUpdate {
    pub header: GeomUpdateHeader,
    pub payload: Bytes,
}

/// Updates covering the whole vertex and index arrays of `model`.
pub fn build_geom_updates(
    model_id: ResourceId,
    model: &Model,
    packet_size: usize,
    serials: &SerialSource,
) -> Vec<GeomUpdate> {
    let mut out = build_slice_updates(
        model_id,
        model,
        GeomDataType::Vertex,
        0,
        model.vertices.len() as u32,
        packet_size,
        serials,
    );
    out.extend(build_slice_updates(
        model_id,
        model,
        GeomDataType::Index,
        0,
        model.indices.len() as u32,
        packet_size,
        serials,
    ));
    out
}

/// Updates covering `len` elements starting at `start`, clamped to the
/// model's arrays.
pub fn build_slice_updates(
    model_id: ResourceId,
    model: &Model,
    data_type: GeomDataType,
    start: u32,
    len: u32,
    packet_size: usize,
    serials: &SerialSource,
) -> Vec<GeomUpdate> {
    let total = match data_type {
        GeomDataType::Vertex => model.vertices.len(),
        GeomDataType::Index => model.indices.len(),
    };
    let start = (start as usize).min(total);
    let end = (start + len as usize).min(total);
    let per_chunk = max_geom_elements(packet_size, data_type);
    if per_chunk == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity((end - start).div_ceil(per_chunk));
    let mut offset = start;
    while offset < end {
        let n = per_chunk.min(end - offset);
        let mut payload = BytesMut::with_capacity(n * data_type.element_size());
        match data_type {
            GeomDataType::Vertex => {
                for v in &model.vertices[offset..offset + n] {
                    v.put(&mut payload);
                }
            }
            GeomDataType::Index => {
                for &i in &model.indices[offset..offset + n] {
                    payload.put_u32_le(i);
                }
                debug_assert_eq!(payload.len(), n * INDEX_SIZE);
            }
        }
        out.push(GeomUpdate {
            header: GeomUpdateHeader {
                serial_id: serials.next(),
                model_id,
                data_type,
                start: offset as u32,
                len: n as u32,
            },
            payload: payload.freeze(),
        });
        offset += n;
    }
    out
}
