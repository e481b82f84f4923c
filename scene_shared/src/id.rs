//! Resource identifiers.
//!
//! Every named entity (model, material, texture, light, shader) is keyed by a
//! stable hash of its name. The hash is the only identity that crosses the
//! wire; collisions are not resolved.

use std::fmt;

use serde::{Deserialize, Serialize};

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Content-derived resource key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

impl ResourceId {
    /// Reserved "no resource" value (e.g. a material without a normal map).
    pub const NONE: Self = ResourceId(0);

    /// Hashes a name with 32-bit FNV-1a.
    pub fn from_name(name: &str) -> Self {
        let mut hash = FNV_OFFSET;
        for b in name.as_bytes() {
            hash ^= u32::from(*b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        // 0 means "none" on the wire.
        if hash == 0 {
            hash = 1;
        }
        ResourceId(hash)
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_id() {
        assert_eq!(ResourceId::from_name("cube"), ResourceId::from_name("cube"));
        assert_ne!(ResourceId::from_name("cube"), ResourceId::from_name("cube2"));
    }

    #[test]
    fn empty_name_is_not_none() {
        // FNV-1a of "" is the offset basis.
        assert_eq!(ResourceId::from_name(""), ResourceId(FNV_OFFSET));
        assert!(!ResourceId::from_name("").is_none());
    }
}
