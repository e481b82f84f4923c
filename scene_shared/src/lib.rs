//! `scene_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Explicit wire layouts: every encoder writes through a bounds-checked
//!   cursor and every decoder reports truncation instead of panicking.
//! - Clear separation of concerns (ids, resources, wire codecs, threads).
//! - One OS thread per long-lived duty, stopped through a shared flag.
//! - No `unsafe`.

pub mod bandwidth;
pub mod config;
pub mod endpoint;
pub mod id;
pub mod logging;
pub mod math;
pub mod resources;
pub mod sync;
pub mod tcp;
pub mod udp;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::bandwidth::{BandwidthLimiter, SendOutcome};
    pub use crate::config::*;
    pub use crate::endpoint::{Endpoint, Liveness};
    pub use crate::id::ResourceId;
    pub use crate::math::*;
    pub use crate::resources::*;
    pub use crate::sync::{LatestSlot, SharedQueue, Signal};
}
