//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! Rendering math lives with the renderer; only what the wire needs is here.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const ONE: Self = Self {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// 4x4 matrix (column-major).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat4 {
    pub m: [[f32; 4]; 4],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn from_translation(t: Vec3) -> Self {
        let mut out = Self::IDENTITY;
        out.m[3] = [t.x, t.y, t.z, 1.0];
        out
    }

    /// Rotation of `angle` radians around the Y axis, keeping the translation.
    pub fn rotated_y(self, angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let rot = Self {
            m: [
                [c, 0.0, -s, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [s, 0.0, c, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        };
        let mut out = self.mul(&rot);
        out.m[3] = self.m[3];
        out
    }

    pub fn mul(&self, rhs: &Self) -> Self {
        let mut out = [[0.0f32; 4]; 4];
        for (c, col) in out.iter_mut().enumerate() {
            for (r, v) in col.iter_mut().enumerate() {
                *v = (0..4).map(|k| self.m[k][r] * rhs.m[c][k]).sum();
            }
        }
        Self { m: out }
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.m[3][0], self.m[3][1], self.m[3][2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_translation() {
        let t = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let r = t.rotated_y(0.5);
        assert_eq!(r.translation(), Vec3::new(1.0, 2.0, 3.0));
        assert_ne!(r, t);
    }

    #[test]
    fn identity_mul() {
        let t = Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(Mat4::IDENTITY.mul(&t), t);
    }
}
