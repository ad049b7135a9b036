//! 3D position used for distance-based voice eviction

use serde::{Deserialize, Serialize};

/// 3D position in world space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position3D {
    /// Create new position
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Origin position
    pub fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Squared distance to another position (no sqrt, ordering only)
    #[inline]
    pub fn distance_squared(&self, other: &Position3D) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_squared() {
        let a = Position3D::origin();
        let b = Position3D::new(1.0, 2.0, 2.0);
        assert_eq!(a.distance_squared(&b), 9.0);
        assert_eq!(b.distance_squared(&a), 9.0);
    }
}
