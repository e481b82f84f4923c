//! UDP chunk multiplexing.
//!
//! A packet is a fixed-size datagram:
//!
//! ```text
//! [UdpHeader: packet_gen u32 | size u32]
//! [chunk0 tag u8][chunk0 header][chunk0 payload?]
//! [chunk1 tag u8]...
//! [zero padding up to packet_size]
//! ```
//!
//! `size` is always the exact number of chunk bytes written after the header.
//! Chunks are never split across packets: `PacketWriter::push` either writes
//! the whole chunk or nothing.

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    id::ResourceId,
    math::{Mat4, Vec3},
    resources::{Camera, LightDynMask, PointLight, INDEX_SIZE, VERTEX_SIZE},
    wire::{self, WireError},
};

pub const UDP_HEADER_SIZE: usize = 8;
pub const CHUNK_TAG_SIZE: usize = 1;
pub const GEOM_HEADER_SIZE: usize = 17;
pub const LIGHT_HEADER_SIZE: usize = 5;
pub const TRANSFORM_HEADER_SIZE: usize = 4 + 16 * 4;
pub const CAMERA_HEADER_SIZE: usize = 5 * 4;
pub const ACK_HEADER_SIZE: usize = 4;

/// Chunk type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UdpMsgType {
    /// Modifies a slice of a model's vertices or indices.
    GeomUpdate = 0x01,
    /// Modifies the dynamic fields of a point light.
    PointLightUpdate = 0x02,
    /// Replaces an object's transform.
    TransformUpdate = 0x03,
    /// Client camera pose (client -> server).
    Camera = 0x10,
    /// Geometry serial ids applied by the client (client -> server).
    Ack = 0x20,
}

impl TryFrom<u8> for UdpMsgType {
    type Error = WireError;

    fn try_from(tag: u8) -> Result<Self, WireError> {
        match tag {
            0x01 => Ok(Self::GeomUpdate),
            0x02 => Ok(Self::PointLightUpdate),
            0x03 => Ok(Self::TransformUpdate),
            0x10 => Ok(Self::Camera),
            0x20 => Ok(Self::Ack),
            _ => Err(WireError::UnknownTag { what: "udp chunk", tag }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GeomDataType {
    Vertex = 0,
    Index = 1,
}

impl GeomDataType {
    pub fn element_size(self) -> usize {
        match self {
            Self::Vertex => VERTEX_SIZE,
            Self::Index => INDEX_SIZE,
        }
    }

    fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(Self::Vertex),
            1 => Ok(Self::Index),
            _ => Err(WireError::InvalidValue {
                what: "geometry data type",
                value: u64::from(v),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UdpHeader {
    /// Sequential packet generation, used to discard stale packets.
    pub packet_gen: u32,
    /// Bytes of chunk data following the header.
    pub size: u32,
}

impl UdpHeader {
    pub fn get(src: &mut impl Buf) -> Result<Self, WireError> {
        wire::ensure(&*src, UDP_HEADER_SIZE, "udp header")?;
        Ok(Self {
            packet_gen: src.get_u32_le(),
            size: src.get_u32_le(),
        })
    }
}

/// One contiguous slice of a model's vertex or index array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeomUpdateHeader {
    /// Unique id of this update, echoed back in ACK chunks.
    pub serial_id: u32,
    pub model_id: ResourceId,
    pub data_type: GeomDataType,
    /// First vertex/index to modify.
    pub start: u32,
    /// Amount of vertices/indices to modify.
    pub len: u32,
}

impl GeomUpdateHeader {
    pub fn payload_len(&self) -> usize {
        self.len as usize * self.data_type.element_size()
    }
}

/// Largest `len` a single geometry chunk may carry in a packet of `packet_size`.
pub fn max_geom_elements(packet_size: usize, data_type: GeomDataType) -> usize {
    packet_size.saturating_sub(UDP_HEADER_SIZE + CHUNK_TAG_SIZE + GEOM_HEADER_SIZE)
        / data_type.element_size()
}

/// Dynamic fields of a point light. Only fields in `mask` are on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLightUpdate {
    pub light_id: ResourceId,
    pub mask: LightDynMask,
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl PointLightUpdate {
    /// Returns `None` for fully fixed lights: they never produce deltas.
    pub fn from_light(light: &PointLight) -> Option<Self> {
        if light.dyn_mask.is_empty() {
            return None;
        }
        Some(Self {
            light_id: light.name,
            mask: light.dyn_mask,
            position: light.position,
            color: light.color,
            intensity: light.attenuation,
        })
    }

    pub fn payload_len(&self) -> usize {
        light_payload_len(self.mask)
    }

    /// Copies the masked fields into `light`.
    pub fn apply(&self, light: &mut PointLight) {
        if self.mask.contains(LightDynMask::POSITION) {
            light.position = self.position;
        }
        if self.mask.contains(LightDynMask::COLOR) {
            light.color = self.color;
        }
        if self.mask.contains(LightDynMask::INTENSITY) {
            light.attenuation = self.intensity;
        }
    }
}

fn light_payload_len(mask: LightDynMask) -> usize {
    let mut n = 0;
    if mask.contains(LightDynMask::POSITION) {
        n += 12;
    }
    if mask.contains(LightDynMask::COLOR) {
        n += 12;
    }
    if mask.contains(LightDynMask::INTENSITY) {
        n += 4;
    }
    n
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformUpdate {
    pub object_id: ResourceId,
    pub transform: Mat4,
}

/// A typed unit inside a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk<'a> {
    Geom {
        header: GeomUpdateHeader,
        payload: &'a [u8],
    },
    PointLight(PointLightUpdate),
    Transform(TransformUpdate),
    Camera(Camera),
    Ack(Vec<u32>),
}

impl<'a> Chunk<'a> {
    pub fn msg_type(&self) -> UdpMsgType {
        match self {
            Chunk::Geom { .. } => UdpMsgType::GeomUpdate,
            Chunk::PointLight(_) => UdpMsgType::PointLightUpdate,
            Chunk::Transform(_) => UdpMsgType::TransformUpdate,
            Chunk::Camera(_) => UdpMsgType::Camera,
            Chunk::Ack(_) => UdpMsgType::Ack,
        }
    }

    /// A geometry chunk must carry exactly `len` elements of payload.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Chunk::Geom { header, payload } => payload.len() == header.payload_len(),
            _ => true,
        }
    }

    /// Total bytes this chunk occupies, tag included.
    pub fn encoded_len(&self) -> usize {
        CHUNK_TAG_SIZE
            + match self {
                Chunk::Geom { header, .. } => GEOM_HEADER_SIZE + header.payload_len(),
                Chunk::PointLight(u) => LIGHT_HEADER_SIZE + u.payload_len(),
                Chunk::Transform(_) => TRANSFORM_HEADER_SIZE,
                Chunk::Camera(_) => CAMERA_HEADER_SIZE,
                Chunk::Ack(ids) => ACK_HEADER_SIZE + ids.len() * 4,
            }
    }

    fn put(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.msg_type() as u8);
        match self {
            Chunk::Geom { header, payload } => {
                dst.put_u32_le(header.serial_id);
                dst.put_u32_le(header.model_id.0);
                dst.put_u8(header.data_type as u8);
                dst.put_u32_le(header.start);
                dst.put_u32_le(header.len);
                dst.put_slice(payload);
            }
            Chunk::PointLight(u) => {
                dst.put_u32_le(u.light_id.0);
                dst.put_u8(u.mask.bits());
                if u.mask.contains(LightDynMask::POSITION) {
                    put_vec3(dst, u.position);
                }
                if u.mask.contains(LightDynMask::COLOR) {
                    put_vec3(dst, u.color);
                }
                if u.mask.contains(LightDynMask::INTENSITY) {
                    dst.put_f32_le(u.intensity);
                }
            }
            Chunk::Transform(u) => {
                dst.put_u32_le(u.object_id.0);
                for col in &u.transform.m {
                    for v in col {
                        dst.put_f32_le(*v);
                    }
                }
            }
            Chunk::Camera(c) => {
                put_vec3(dst, c.position);
                dst.put_f32_le(c.yaw);
                dst.put_f32_le(c.pitch);
            }
            Chunk::Ack(ids) => {
                dst.put_u32_le(ids.len() as u32);
                for id in ids {
                    dst.put_u32_le(*id);
                }
            }
        }
    }

    /// Decodes one chunk from the front of `src`, borrowing geometry payloads.
    fn get(src: &mut &'a [u8]) -> Result<Self, WireError> {
        wire::ensure(&*src, CHUNK_TAG_SIZE, "chunk tag")?;
        let ty = UdpMsgType::try_from(src.get_u8())?;
        match ty {
            UdpMsgType::GeomUpdate => {
                wire::ensure(&*src, GEOM_HEADER_SIZE, "geometry header")?;
                let serial_id = src.get_u32_le();
                let model_id = ResourceId(src.get_u32_le());
                let data_type = GeomDataType::from_u8(src.get_u8())?;
                let header = GeomUpdateHeader {
                    serial_id,
                    model_id,
                    data_type,
                    start: src.get_u32_le(),
                    len: src.get_u32_le(),
                };
                let n = header.payload_len();
                wire::ensure(&*src, n, "geometry payload")?;
                let rest: &'a [u8] = *src;
                let payload = &rest[..n];
                src.advance(n);
                Ok(Chunk::Geom { header, payload })
            }
            UdpMsgType::PointLightUpdate => {
                wire::ensure(&*src, LIGHT_HEADER_SIZE, "light header")?;
                let light_id = ResourceId(src.get_u32_le());
                let bits = src.get_u8();
                let mask = LightDynMask::from_bits(bits).ok_or(WireError::InvalidValue {
                    what: "light mask",
                    value: u64::from(bits),
                })?;
                wire::ensure(&*src, light_payload_len(mask), "light payload")?;
                let mut u = PointLightUpdate {
                    light_id,
                    mask,
                    position: Vec3::ZERO,
                    color: Vec3::ZERO,
                    intensity: 0.0,
                };
                if mask.contains(LightDynMask::POSITION) {
                    u.position = get_vec3(src);
                }
                if mask.contains(LightDynMask::COLOR) {
                    u.color = get_vec3(src);
                }
                if mask.contains(LightDynMask::INTENSITY) {
                    u.intensity = src.get_f32_le();
                }
                Ok(Chunk::PointLight(u))
            }
            UdpMsgType::TransformUpdate => {
                wire::ensure(&*src, TRANSFORM_HEADER_SIZE, "transform header")?;
                let object_id = ResourceId(src.get_u32_le());
                let mut transform = Mat4::IDENTITY;
                for col in transform.m.iter_mut() {
                    for v in col.iter_mut() {
                        *v = src.get_f32_le();
                    }
                }
                Ok(Chunk::Transform(TransformUpdate {
                    object_id,
                    transform,
                }))
            }
            UdpMsgType::Camera => {
                wire::ensure(&*src, CAMERA_HEADER_SIZE, "camera")?;
                Ok(Chunk::Camera(Camera {
                    position: get_vec3(src),
                    yaw: src.get_f32_le(),
                    pitch: src.get_f32_le(),
                }))
            }
            UdpMsgType::Ack => {
                wire::ensure(&*src, ACK_HEADER_SIZE, "ack header")?;
                let n = src.get_u32_le() as usize;
                wire::ensure(&*src, n.saturating_mul(4), "ack payload")?;
                Ok(Chunk::Ack((0..n).map(|_| src.get_u32_le()).collect()))
            }
        }
    }
}

fn put_vec3(dst: &mut impl BufMut, v: Vec3) {
    dst.put_f32_le(v.x);
    dst.put_f32_le(v.y);
    dst.put_f32_le(v.z);
}

fn get_vec3(src: &mut impl Buf) -> Vec3 {
    let [x, y, z] = wire::get_vec3(src);
    Vec3::new(x, y, z)
}

/// Bounds-checked builder for one fixed-size packet.
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
    /// Write cursor; `offset - UDP_HEADER_SIZE` is always `header.size`.
    offset: usize,
    generation: u32,
}

impl PacketWriter {
    /// Starts a packet with the given generation and zero size.
    pub fn new(packet_size: usize, generation: u32) -> Self {
        let mut w = Self {
            buf: BytesMut::zeroed(packet_size.max(UDP_HEADER_SIZE)),
            offset: UDP_HEADER_SIZE,
            generation,
        };
        w.write_header();
        w
    }

    /// Clears the packet and restarts it with a new generation.
    pub fn reset(&mut self, generation: u32) {
        self.buf.fill(0);
        self.offset = UDP_HEADER_SIZE;
        self.generation = generation;
        self.write_header();
    }

    fn write_header(&mut self) {
        let size = (self.offset - UDP_HEADER_SIZE) as u32;
        let mut dst = &mut self.buf[..UDP_HEADER_SIZE];
        dst.put_u32_le(self.generation);
        dst.put_u32_le(size);
    }

    /// Appends `chunk` if it fits entirely. Returns the bytes written, 0 if it
    /// did not fit (the packet is left untouched).
    pub fn push(&mut self, chunk: &Chunk<'_>) -> usize {
        let len = chunk.encoded_len();
        if len > self.remaining() || !chunk.is_well_formed() {
            return 0;
        }
        let mut dst = &mut self.buf[self.offset..self.offset + len];
        chunk.put(&mut dst);
        debug_assert!(dst.is_empty(), "chunk encoded_len mismatch");
        self.offset += len;
        self.write_header();
        len
    }

    /// Whether `chunk` could ever fit, even in an empty packet.
    pub fn fits_empty(&self, chunk: &Chunk<'_>) -> bool {
        chunk.is_well_formed() && chunk.encoded_len() <= self.capacity()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Chunk bytes written so far (the header's `size` field).
    pub fn size(&self) -> u32 {
        (self.offset - UDP_HEADER_SIZE) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.offset == UDP_HEADER_SIZE
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Chunk capacity of an empty packet.
    pub fn capacity(&self) -> usize {
        self.buf.len() - UDP_HEADER_SIZE
    }

    /// The whole fixed-size datagram, zero padded.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// A decoded datagram. Chunks borrow geometry payloads from the input.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket<'a> {
    pub header: UdpHeader,
    pub chunks: Vec<Chunk<'a>>,
}

/// Decodes a whole packet. Any malformed chunk fails the packet as a whole so
/// the caller never applies a partial packet.
pub fn decode_packet(data: &[u8]) -> Result<DecodedPacket<'_>, WireError> {
    let mut src = data;
    let header = UdpHeader::get(&mut src)?;
    let size = header.size as usize;
    wire::ensure(&src, size, "udp payload")?;
    let mut body = &src[..size];
    let mut chunks = Vec::new();
    while body.has_remaining() {
        chunks.push(Chunk::get(&mut body)?);
    }
    Ok(DecodedPacket { header, chunks })
}

/// Reads only the generation/size header.
pub fn peek_header(data: &[u8]) -> Result<UdpHeader, WireError> {
    UdpHeader::get(&mut &data[..])
}

/// Accepts strictly increasing generations; stale or duplicate ones are
/// rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationFilter {
    latest: Option<u32>,
}

impl GenerationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, generation: u32) -> bool {
        match self.latest {
            Some(latest) if generation <= latest => false,
            _ => {
                self.latest = Some(generation);
                true
            }
        }
    }

    pub fn latest(&self) -> Option<u32> {
        self.latest
    }

    pub fn reset(&mut self) {
        self.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom(serial_id: u32, len: u32) -> GeomUpdateHeader {
        GeomUpdateHeader {
            serial_id,
            model_id: ResourceId::from_name("model"),
            data_type: GeomDataType::Index,
            start: 10,
            len,
        }
    }

    fn light() -> PointLightUpdate {
        PointLightUpdate {
            light_id: ResourceId::from_name("Light 0"),
            mask: LightDynMask::COLOR | LightDynMask::INTENSITY,
            position: Vec3::ZERO,
            color: Vec3::new(0.5, 0.25, 1.0),
            intensity: 0.75,
        }
    }

    #[test]
    fn geometry_chunk_decodes_unchanged() {
        let header = geom(7, 3);
        let payload: Vec<u8> = (0..12).collect();
        let mut w = PacketWriter::new(128, 42);
        let written = w.push(&Chunk::Geom {
            header,
            payload: &payload,
        });
        assert_eq!(written, 1 + GEOM_HEADER_SIZE + 12);

        let pkt = decode_packet(w.as_bytes()).unwrap();
        assert_eq!(pkt.header.packet_gen, 42);
        assert_eq!(pkt.header.size as usize, written);
        assert_eq!(
            pkt.chunks,
            vec![Chunk::Geom {
                header,
                payload: &payload
            }]
        );
    }

    #[test]
    fn light_chunk_carries_only_dynamic_fields() {
        let u = light();
        let chunk = Chunk::PointLight(u);
        assert_eq!(chunk.encoded_len(), 1 + LIGHT_HEADER_SIZE + 12 + 4);

        let mut w = PacketWriter::new(64, 0);
        w.push(&chunk);
        let pkt = decode_packet(w.as_bytes()).unwrap();
        assert_eq!(pkt.chunks, vec![Chunk::PointLight(u)]);
    }

    #[test]
    fn transform_and_mixed_chunks() {
        let t = TransformUpdate {
            object_id: ResourceId::from_name("cube"),
            transform: Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
        };
        let payload = [9u8; 8];
        let mut w = PacketWriter::new(512, 1);
        w.push(&Chunk::Transform(t));
        w.push(&Chunk::PointLight(light()));
        w.push(&Chunk::Geom {
            header: geom(1, 2),
            payload: &payload,
        });
        let pkt = decode_packet(w.as_bytes()).unwrap();
        assert_eq!(pkt.chunks.len(), 3);
        assert_eq!(pkt.chunks[0], Chunk::Transform(t));
        assert_eq!(pkt.header.size, w.size());
    }

    #[test]
    fn push_fails_closed_when_full() {
        let mut w = PacketWriter::new(UDP_HEADER_SIZE + 30, 0);
        let payload = [0u8; 8];
        let chunk = Chunk::Geom {
            header: geom(1, 2),
            payload: &payload,
        };
        assert_eq!(w.push(&chunk), 26);
        let before = w.as_bytes().to_vec();
        assert_eq!(w.push(&chunk), 0);
        assert_eq!(w.as_bytes(), &before[..]);
        assert_eq!(w.size(), 26);
    }

    #[test]
    fn size_matches_written_chunks_for_any_sequence() {
        let payload = [1u8; 64];
        let mut w = PacketWriter::new(256, 0);
        let mut total = 0;
        for i in 0..50u32 {
            let len = (i % 16) + 1;
            let chunk = match i % 3 {
                0 => Chunk::Geom {
                    header: geom(i, len),
                    payload: &payload[..len as usize * 4],
                },
                1 => Chunk::PointLight(light()),
                _ => Chunk::Ack(vec![i; (i % 5) as usize]),
            };
            let n = w.push(&chunk);
            if n == 0 {
                assert_eq!(w.size() as usize, total);
                assert!(w.as_bytes().len() == 256);
                w.reset(i);
                total = 0;
                total += w.push(&chunk);
            } else {
                total += n;
            }
            assert_eq!(w.size() as usize, total);
            assert!(UDP_HEADER_SIZE + total <= 256);
            assert_eq!(peek_header(w.as_bytes()).unwrap().size as usize, total);
        }
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let mut w = PacketWriter::new(64, 3);
        w.push(&Chunk::Camera(Camera::default()));
        let mut bytes = w.as_bytes().to_vec();
        // Claim more chunk bytes than the datagram holds.
        bytes[4..8].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            decode_packet(&bytes),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn unknown_chunk_tag_is_rejected() {
        let mut bytes = vec![0u8; 16];
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
        bytes[8] = 0x7f;
        assert_eq!(
            decode_packet(&bytes),
            Err(WireError::UnknownTag {
                what: "udp chunk",
                tag: 0x7f
            })
        );
    }

    #[test]
    fn generation_filter_drops_stale_and_duplicates() {
        let mut filter = GenerationFilter::new();
        let accepted: Vec<u32> = [5, 3, 7, 7, 9]
            .into_iter()
            .filter(|g| filter.accept(*g))
            .collect();
        assert_eq!(accepted, vec![5, 7, 9]);
        assert_eq!(filter.latest(), Some(9));
    }

    #[test]
    fn max_geom_elements_fit_a_packet() {
        for ty in [GeomDataType::Vertex, GeomDataType::Index] {
            let n = max_geom_elements(1024, ty);
            let header = GeomUpdateHeader {
                data_type: ty,
                len: n as u32,
                ..geom(0, 0)
            };
            let payload = vec![0u8; header.payload_len()];
            let mut w = PacketWriter::new(1024, 0);
            assert!(w.push(&Chunk::Geom {
                header,
                payload: &payload
            }) > 0);
        }
    }
}
