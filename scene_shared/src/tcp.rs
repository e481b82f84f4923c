//! Reliable channel: control messages and resource frames over TCP.
//!
//! Every frame starts with a one-byte tag. Control messages carry a small
//! fixed payload (possibly empty); resource frames carry a `u32` body length
//! followed by a byte-packed resource struct and its raw payload.
//!
//! Reads use a short socket timeout so receiver threads can observe their
//! termination flags between frames; a timeout in the middle of a frame just
//! resumes reading.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{
    id::ResourceId,
    math::Vec3,
    resources::{
        LightDynMask, Material, Mesh, ModelInfo, PointLight, ShaderStage, SpirvShader, Texture,
        TextureFormat,
    },
    wire::{self, WireError},
};

/// Control message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TcpMsgType {
    Helo = 0x01,
    HeloAck = 0x02,
    Ready = 0x03,
    StartRsrcExchange = 0x04,
    EndRsrcExchange = 0x05,
    RsrcExchangeAck = 0x06,
    Keepalive = 0x07,
    Disconnect = 0x08,
    ReqModel = 0x09,
}

impl TcpMsgType {
    fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => Self::Helo,
            0x02 => Self::HeloAck,
            0x03 => Self::Ready,
            0x04 => Self::StartRsrcExchange,
            0x05 => Self::EndRsrcExchange,
            0x06 => Self::RsrcExchangeAck,
            0x07 => Self::Keepalive,
            0x08 => Self::Disconnect,
            0x09 => Self::ReqModel,
            _ => return None,
        })
    }

    /// Size of the fixed payload following the tag.
    fn payload_len(self) -> usize {
        match self {
            Self::Helo | Self::Ready | Self::ReqModel => 2,
            _ => 0,
        }
    }
}

/// A control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpMsg {
    /// Client greeting; carries the client's UDP receive port (0 = default).
    Helo { udp_port: u16 },
    HeloAck,
    /// Sent by both sides; carries the sender's UDP receive port (0 = none/default).
    Ready { udp_port: u16 },
    StartRsrcExchange,
    EndRsrcExchange,
    RsrcExchangeAck,
    Keepalive,
    Disconnect,
    /// Client asks the server to load and send the model at `index`.
    ReqModel { index: u16 },
}

impl TcpMsg {
    pub fn msg_type(&self) -> TcpMsgType {
        match self {
            TcpMsg::Helo { .. } => TcpMsgType::Helo,
            TcpMsg::HeloAck => TcpMsgType::HeloAck,
            TcpMsg::Ready { .. } => TcpMsgType::Ready,
            TcpMsg::StartRsrcExchange => TcpMsgType::StartRsrcExchange,
            TcpMsg::EndRsrcExchange => TcpMsgType::EndRsrcExchange,
            TcpMsg::RsrcExchangeAck => TcpMsgType::RsrcExchangeAck,
            TcpMsg::Keepalive => TcpMsgType::Keepalive,
            TcpMsg::Disconnect => TcpMsgType::Disconnect,
            TcpMsg::ReqModel { .. } => TcpMsgType::ReqModel,
        }
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.msg_type() as u8);
        match *self {
            TcpMsg::Helo { udp_port } | TcpMsg::Ready { udp_port } => dst.put_u16_le(udp_port),
            TcpMsg::ReqModel { index } => dst.put_u16_le(index),
            _ => {}
        }
    }

    fn decode(ty: TcpMsgType, mut payload: &[u8]) -> Result<Self, WireError> {
        wire::ensure(&payload, ty.payload_len(), "control payload")?;
        Ok(match ty {
            TcpMsgType::Helo => TcpMsg::Helo {
                udp_port: payload.get_u16_le(),
            },
            TcpMsgType::HeloAck => TcpMsg::HeloAck,
            TcpMsgType::Ready => TcpMsg::Ready {
                udp_port: payload.get_u16_le(),
            },
            TcpMsgType::StartRsrcExchange => TcpMsg::StartRsrcExchange,
            TcpMsgType::EndRsrcExchange => TcpMsg::EndRsrcExchange,
            TcpMsgType::RsrcExchangeAck => TcpMsg::RsrcExchangeAck,
            TcpMsgType::Keepalive => TcpMsg::Keepalive,
            TcpMsgType::Disconnect => TcpMsg::Disconnect,
            TcpMsgType::ReqModel => TcpMsg::ReqModel {
                index: payload.get_u16_le(),
            },
        })
    }
}

/// Resource frame tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceKind {
    Texture = 0x11,
    Material = 0x12,
    Model = 0x13,
    PointLight = 0x14,
    Shader = 0x15,
}

impl ResourceKind {
    fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0x11 => Self::Texture,
            0x12 => Self::Material,
            0x13 => Self::Model,
            0x14 => Self::PointLight,
            0x15 => Self::Shader,
            _ => return None,
        })
    }
}

/// A resource as delivered through the reliable channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourcePacket {
    Texture(Texture),
    Material(Material),
    Model(ModelInfo),
    PointLight(PointLight),
    Shader(SpirvShader),
}

impl ResourcePacket {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourcePacket::Texture(_) => ResourceKind::Texture,
            ResourcePacket::Material(_) => ResourceKind::Material,
            ResourcePacket::Model(_) => ResourceKind::Model,
            ResourcePacket::PointLight(_) => ResourceKind::PointLight,
            ResourcePacket::Shader(_) => ResourceKind::Shader,
        }
    }

    pub fn id(&self) -> ResourceId {
        match self {
            ResourcePacket::Texture(t) => t.name,
            ResourcePacket::Material(m) => m.name,
            ResourcePacket::Model(m) => m.name,
            ResourcePacket::PointLight(l) => l.name,
            ResourcePacket::Shader(s) => s.name,
        }
    }

    /// Writes tag, body length and body. Nothing is written to `dst` if a
    /// count or index does not fit its wire field.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), WireError> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        let len = u32::try_from(body.len()).map_err(|_| WireError::InvalidValue {
            what: "resource body length",
            value: body.len() as u64,
        })?;
        dst.reserve(5 + body.len());
        dst.put_u8(self.kind() as u8);
        dst.put_u32_le(len);
        dst.extend_from_slice(&body);
        Ok(())
    }

    fn encode_body(&self, dst: &mut BytesMut) -> Result<(), WireError> {
        match self {
            ResourcePacket::Texture(t) => {
                dst.put_u32_le(t.name.0);
                dst.put_u8(t.format as u8);
                dst.put_u64_le(t.size());
                dst.extend_from_slice(&t.data);
            }
            ResourcePacket::Material(m) => {
                for id in [m.name, m.diffuse_tex, m.specular_tex, m.normal_tex] {
                    dst.put_u32_le(id.0);
                }
            }
            ResourcePacket::Model(m) => {
                dst.put_u32_le(m.name.0);
                dst.put_u32_le(m.n_vertices);
                dst.put_u32_le(m.n_indices);
                dst.put_u8(count_u8(m.materials.len(), "model material count")?);
                dst.put_u8(count_u8(m.meshes.len(), "model mesh count")?);
                for id in &m.materials {
                    dst.put_u32_le(id.0);
                }
                for mesh in &m.meshes {
                    let material = match mesh.material {
                        None => -1,
                        Some(i) => i16::try_from(i).map_err(|_| WireError::InvalidValue {
                            what: "mesh material index",
                            value: u64::from(i),
                        })?,
                    };
                    dst.put_u32_le(mesh.offset);
                    dst.put_u32_le(mesh.len);
                    dst.put_i16_le(material);
                }
            }
            ResourcePacket::PointLight(l) => {
                dst.put_u32_le(l.name.0);
                dst.put_f32_le(l.color.x);
                dst.put_f32_le(l.color.y);
                dst.put_f32_le(l.color.z);
                dst.put_f32_le(l.attenuation);
                dst.put_f32_le(l.position.x);
                dst.put_f32_le(l.position.y);
                dst.put_f32_le(l.position.z);
                dst.put_u8(l.dyn_mask.bits());
            }
            ResourcePacket::Shader(s) => {
                dst.put_u32_le(s.name.0);
                dst.put_u8(s.pass_number);
                dst.put_u8(s.stage as u8);
                dst.put_u64_le(s.code.len() as u64);
                dst.extend_from_slice(&s.code);
            }
        }
        Ok(())
    }

    pub fn decode(kind: ResourceKind, mut body: Bytes) -> Result<Self, WireError> {
        let packet = match kind {
            ResourceKind::Texture => {
                wire::ensure(&body, 13, "texture info")?;
                let name = ResourceId(body.get_u32_le());
                let format = TextureFormat::from_u8(body.get_u8())?;
                let size = body.get_u64_le() as usize;
                wire::ensure(&body, size, "texture data")?;
                ResourcePacket::Texture(Texture {
                    name,
                    format,
                    data: body.split_to(size),
                })
            }
            ResourceKind::Material => {
                wire::ensure(&body, 16, "material")?;
                ResourcePacket::Material(Material {
                    name: ResourceId(body.get_u32_le()),
                    diffuse_tex: ResourceId(body.get_u32_le()),
                    specular_tex: ResourceId(body.get_u32_le()),
                    normal_tex: ResourceId(body.get_u32_le()),
                })
            }
            ResourceKind::Model => {
                wire::ensure(&body, 14, "model")?;
                let name = ResourceId(body.get_u32_le());
                let n_vertices = body.get_u32_le();
                let n_indices = body.get_u32_le();
                let n_materials = body.get_u8() as usize;
                let n_meshes = body.get_u8() as usize;
                wire::ensure(&body, n_materials * 4 + n_meshes * 10, "model payload")?;
                let materials = (0..n_materials)
                    .map(|_| ResourceId(body.get_u32_le()))
                    .collect();
                let meshes = (0..n_meshes)
                    .map(|_| {
                        let offset = body.get_u32_le();
                        let len = body.get_u32_le();
                        let material = body.get_i16_le();
                        Mesh {
                            offset,
                            len,
                            material: u16::try_from(material).ok(),
                        }
                    })
                    .collect();
                ResourcePacket::Model(ModelInfo {
                    name,
                    n_vertices,
                    n_indices,
                    materials,
                    meshes,
                })
            }
            ResourceKind::PointLight => {
                wire::ensure(&body, 33, "point light")?;
                let name = ResourceId(body.get_u32_le());
                let [r, g, b] = wire::get_vec3(&mut body);
                let attenuation = body.get_f32_le();
                let [x, y, z] = wire::get_vec3(&mut body);
                let bits = body.get_u8();
                let dyn_mask = LightDynMask::from_bits(bits).ok_or(WireError::InvalidValue {
                    what: "light mask",
                    value: u64::from(bits),
                })?;
                ResourcePacket::PointLight(PointLight {
                    name,
                    position: Vec3::new(x, y, z),
                    color: Vec3::new(r, g, b),
                    attenuation,
                    dyn_mask,
                })
            }
            ResourceKind::Shader => {
                wire::ensure(&body, 14, "shader info")?;
                let name = ResourceId(body.get_u32_le());
                let pass_number = body.get_u8();
                let stage = ShaderStage::from_u8(body.get_u8())?;
                let size = body.get_u64_le() as usize;
                wire::ensure(&body, size, "shader code")?;
                ResourcePacket::Shader(SpirvShader {
                    name,
                    pass_number,
                    stage,
                    code: body.split_to(size),
                })
            }
        };
        Ok(packet)
    }
}

fn count_u8(n: usize, what: &'static str) -> Result<u8, WireError> {
    u8::try_from(n).map_err(|_| WireError::InvalidValue {
        what,
        value: n as u64,
    })
}

/// Anything that can arrive on the reliable channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TcpFrame {
    Control(TcpMsg),
    Resource(ResourcePacket),
}

/// Reliable channel failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection closed by peer")]
    Closed,

    #[error("receive aborted")]
    Aborted,

    #[error("tcp i/o: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Wire(#[from] WireError),
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Splits a connected stream into a shareable sender and a receiver.
pub fn reliable_pair(
    stream: TcpStream,
    poll_interval: Duration,
    max_frame: usize,
) -> anyhow::Result<(ReliableSender, ReliableReceiver)> {
    stream.set_nodelay(true).context("tcp nodelay")?;
    stream
        .set_read_timeout(Some(poll_interval))
        .context("tcp read timeout")?;
    let read_half = stream.try_clone().context("tcp clone")?;
    Ok((
        ReliableSender {
            stream: Arc::new(Mutex::new(stream)),
        },
        ReliableReceiver {
            stream: read_half,
            max_frame,
        },
    ))
}

/// Write side of the reliable channel. Clones share the same socket; each
/// frame is written under the lock so frames never interleave.
#[derive(Debug, Clone)]
pub struct ReliableSender {
    stream: Arc<Mutex<TcpStream>>,
}

impl ReliableSender {
    pub fn send_msg(&self, msg: &TcpMsg) -> anyhow::Result<()> {
        let mut buf = BytesMut::with_capacity(3);
        msg.encode(&mut buf);
        self.write_frame(&buf)
            .with_context(|| format!("send {:?}", msg.msg_type()))
    }

    /// Sends one resource frame; returns the bytes written.
    ///
    /// A resource that cannot be encoded fails with `ChannelError::Wire`
    /// before anything reaches the socket.
    pub fn send_resource(&self, packet: &ResourcePacket) -> Result<usize, ChannelError> {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf)?;
        self.write_frame(&buf)?;
        Ok(buf.len())
    }

    fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        stream.write_all(frame)?;
        stream.flush()
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        let stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        Ok(stream.peer_addr()?)
    }

    /// Shuts both directions down, unblocking any pending read.
    pub fn shutdown(&self) {
        let stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        let _ = stream.shutdown(Shutdown::Both);
    }
}

/// Read side of the reliable channel, owned by a single receiver thread.
#[derive(Debug)]
pub struct ReliableReceiver {
    stream: TcpStream,
    max_frame: usize,
}

impl ReliableReceiver {
    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` if no frame started within the poll interval. Once a
    /// frame has started, timeouts are absorbed until it is complete or
    /// `keep_going` turns false.
    pub fn recv_frame(
        &mut self,
        keep_going: impl Fn() -> bool,
    ) -> Result<Option<TcpFrame>, ChannelError> {
        let mut tag = [0u8; 1];
        match self.stream.read(&mut tag) {
            Ok(0) => return Err(ChannelError::Closed),
            Ok(_) => {}
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        if let Some(ty) = TcpMsgType::from_u8(tag[0]) {
            let mut payload = [0u8; 2];
            let payload = &mut payload[..ty.payload_len()];
            self.read_full(payload, &keep_going)?;
            return Ok(Some(TcpFrame::Control(TcpMsg::decode(ty, payload)?)));
        }

        let kind = ResourceKind::from_u8(tag[0]).ok_or(WireError::UnknownTag {
            what: "tcp frame",
            tag: tag[0],
        })?;
        let mut len = [0u8; 4];
        self.read_full(&mut len, &keep_going)?;
        let len = u32::from_le_bytes(len) as usize;
        if len > self.max_frame {
            return Err(WireError::Oversize {
                len,
                max: self.max_frame,
            }
            .into());
        }
        let mut body = vec![0u8; len];
        self.read_full(&mut body, &keep_going)?;
        Ok(Some(TcpFrame::Resource(ResourcePacket::decode(
            kind,
            Bytes::from(body),
        )?)))
    }

    fn read_full(&mut self, mut buf: &mut [u8], keep_going: &impl Fn() -> bool) -> Result<(), ChannelError> {
        while !buf.is_empty() {
            match self.stream.read(buf) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => buf = &mut buf[n..],
                Err(e) if is_timeout(&e) => {
                    if !keep_going() {
                        return Err(ChannelError::Aborted);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn decode_frame(bytes: &[u8]) -> TcpFrame {
        if let Some(ty) = TcpMsgType::from_u8(bytes[0]) {
            return TcpFrame::Control(TcpMsg::decode(ty, &bytes[1..]).unwrap());
        }
        let kind = ResourceKind::from_u8(bytes[0]).unwrap();
        let len = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
        assert_eq!(bytes.len(), 5 + len);
        TcpFrame::Resource(ResourcePacket::decode(kind, Bytes::copy_from_slice(&bytes[5..])).unwrap())
    }

    #[test]
    fn control_messages_have_fixed_sizes() {
        for (msg, len) in [
            (TcpMsg::Helo { udp_port: 1235 }, 3),
            (TcpMsg::HeloAck, 1),
            (TcpMsg::Ready { udp_port: 0 }, 3),
            (TcpMsg::Keepalive, 1),
            (TcpMsg::ReqModel { index: 2 }, 3),
        ] {
            let mut buf = BytesMut::new();
            msg.encode(&mut buf);
            assert_eq!(buf.len(), len);
            assert_eq!(decode_frame(&buf), TcpFrame::Control(msg));
        }
    }

    #[test]
    fn model_frame_keeps_meshes_and_materials() {
        let model = ModelInfo {
            name: ResourceId::from_name("cube"),
            n_vertices: 24,
            n_indices: 36,
            materials: vec![ResourceId::from_name("mat")],
            meshes: vec![
                Mesh {
                    offset: 0,
                    len: 30,
                    material: Some(0),
                },
                Mesh {
                    offset: 30,
                    len: 6,
                    material: None,
                },
            ],
        };
        let mut buf = BytesMut::new();
        ResourcePacket::Model(model.clone()).encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 5 + 14 + 4 + 2 * 10);
        assert_eq!(decode_frame(&buf), TcpFrame::Resource(ResourcePacket::Model(model)));
    }

    #[test]
    fn model_counts_beyond_wire_fields_are_rejected() {
        let base = ModelInfo {
            name: ResourceId::from_name("big"),
            n_vertices: 3,
            n_indices: 3,
            materials: vec![],
            meshes: vec![],
        };
        let mesh = Mesh {
            offset: 0,
            len: 3,
            material: Some(0),
        };

        let too_many_materials = ModelInfo {
            materials: (0..256).map(|i| ResourceId(i + 1)).collect(),
            meshes: vec![mesh],
            ..base.clone()
        };
        let mut buf = BytesMut::new();
        assert_eq!(
            ResourcePacket::Model(too_many_materials).encode(&mut buf),
            Err(WireError::InvalidValue {
                what: "model material count",
                value: 256,
            })
        );
        assert!(buf.is_empty());

        let too_many_meshes = ModelInfo {
            meshes: vec![mesh; 300],
            ..base.clone()
        };
        assert_eq!(
            ResourcePacket::Model(too_many_meshes).encode(&mut buf),
            Err(WireError::InvalidValue {
                what: "model mesh count",
                value: 300,
            })
        );

        let wide_index = ModelInfo {
            meshes: vec![Mesh {
                material: Some(40_000),
                ..mesh
            }],
            ..base.clone()
        };
        assert_eq!(
            ResourcePacket::Model(wide_index).encode(&mut buf),
            Err(WireError::InvalidValue {
                what: "mesh material index",
                value: 40_000,
            })
        );
        assert!(buf.is_empty());

        // The largest counts that fit still decode to the same model.
        let at_limit = ModelInfo {
            materials: (0..255).map(|i| ResourceId(i + 1)).collect(),
            meshes: vec![
                Mesh {
                    material: Some(254),
                    ..mesh
                };
                255
            ],
            ..base
        };
        ResourcePacket::Model(at_limit.clone()).encode(&mut buf).unwrap();
        assert_eq!(decode_frame(&buf), TcpFrame::Resource(ResourcePacket::Model(at_limit)));
    }

    #[test]
    fn texture_frame_rejects_short_payload() {
        let tex = Texture {
            name: ResourceId::from_name("tex.png"),
            format: TextureFormat::Grey,
            data: Bytes::from_static(&[1, 2, 3, 4]),
        };
        let mut buf = BytesMut::new();
        ResourcePacket::Texture(tex).encode(&mut buf).unwrap();
        let body = Bytes::copy_from_slice(&buf[5..buf.len() - 1]);
        assert!(matches!(
            ResourcePacket::decode(ResourceKind::Texture, body),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn frames_cross_a_real_socket() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let client = TcpStream::connect(addr)?;
        let (server, _) = listener.accept()?;

        let poll = Duration::from_millis(20);
        let (tx, _rx) = reliable_pair(client, poll, 1 << 20)?;
        let (_stx, mut rx) = reliable_pair(server, poll, 1 << 20)?;

        let light = PointLight {
            dyn_mask: LightDynMask::COLOR,
            ..PointLight::new(ResourceId::from_name("Light 0"))
        };
        tx.send_msg(&TcpMsg::Helo { udp_port: 4000 })?;
        tx.send_resource(&ResourcePacket::PointLight(light))?;

        let mut frames = Vec::new();
        while frames.len() < 2 {
            if let Some(f) = rx.recv_frame(|| true)? {
                frames.push(f);
            }
        }
        assert_eq!(frames[0], TcpFrame::Control(TcpMsg::Helo { udp_port: 4000 }));
        assert_eq!(frames[1], TcpFrame::Resource(ResourcePacket::PointLight(light)));

        tx.shutdown();
        let mut closed = false;
        for _ in 0..50 {
            match rx.recv_frame(|| true) {
                Err(ChannelError::Closed) => {
                    closed = true;
                    break;
                }
                Ok(None) => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(closed);
        Ok(())
    }

    #[test]
    fn oversize_resource_frame_is_rejected() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let client = TcpStream::connect(listener.local_addr()?)?;
        let (server, _) = listener.accept()?;
        let (tx, _rx) = reliable_pair(client, Duration::from_millis(20), 1 << 20)?;
        let (_stx, mut rx) = reliable_pair(server, Duration::from_millis(20), 8)?;

        tx.send_resource(&ResourcePacket::Material(Material {
            name: ResourceId::from_name("mat"),
            diffuse_tex: ResourceId::NONE,
            specular_tex: ResourceId::NONE,
            normal_tex: ResourceId::NONE,
        }))?;
        loop {
            match rx.recv_frame(|| true) {
                Ok(None) => continue,
                Err(ChannelError::Wire(WireError::Oversize { len: 16, max: 8 })) => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        Ok(())
    }
}
