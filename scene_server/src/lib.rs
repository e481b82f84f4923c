//! `scene_server`
//!
//! Server-side systems:
//! - Resource store and per-connection resource batches
//! - TCP control channel (handshake, one-in-flight resource exchange)
//! - UDP delta streaming with redundant geometry and ACK pruning
//! - Demo content and simulation tick
//!
//! Networking model:
//! - TCP: handshake/control plane and resource delivery
//! - UDP: geometry/light/transform deltas out, camera and ACKs in

pub mod batch;
pub mod demo;
pub mod geom_update;
pub mod scene;
pub mod server;
pub mod shared;
pub mod sim;
pub mod store;
pub mod tcp;
pub mod tcp_recv;
pub mod udp;

pub use server::{bind_ephemeral, GeomEdit, Server, ServerHandle};
