//! `scene_client`
//!
//! Client-side systems:
//! - Handshake and resource exchange acknowledgement over TCP
//! - Delta stream decoding (geometry, lights, transforms) over UDP
//! - Camera telemetry and geometry ACKs back to the server
//! - `ResourceSink` seam with an in-memory recording implementation

pub mod client;
pub mod sink;

pub use client::SceneClient;
pub use sink::{ClientResources, ResourceSink};
