use derive_more::{Add, Sub};
use serde::{Deserialize, Serialize};

use crate::tensor::VectorXYZ;

/// A point in the global frame: X east, Y north, Z up
/// (`Depth = -Z`). Value type, copied on pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Add, Sub)]
pub struct PointXYZ {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PointXYZ {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        PointXYZ { x, y, z }
    }

    pub fn depth(&self) -> f64 {
        -self.z
    }

    pub fn to_vector(&self) -> VectorXYZ {
        VectorXYZ::new(self.x, self.y, self.z)
    }

    pub fn distance_to(&self, other: &PointXYZ) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }
}

/// A point in a fracture-set-local frame: `I` parallel
/// to strike, `J` perpendicular (positive on one chosen side), `K` vertical
/// relative to the layer mid-plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Add, Sub)]
pub struct PointIJK {
    pub i: f64,
    pub j: f64,
    pub k: f64,
}

impl PointIJK {
    pub fn new(i: f64, j: f64, k: f64) -> Self {
        PointIJK { i, j, k }
    }

    /// Rotate a global-frame offset into the IJK frame given the set's
    /// strike azimuth (radians, measured from north/Y toward east/X).
    pub fn from_xy_offset(dx: f64, dy: f64, k: f64, strike_azimuth: f64) -> Self {
        let (s, c) = strike_azimuth.sin_cos();
        // I is parallel to strike, J perpendicular.
        let i = dx * s + dy * c;
        let j = dx * c - dy * s;
        PointIJK { i, j, k }
    }

    pub fn to_xy_offset(&self, strike_azimuth: f64) -> (f64, f64) {
        let (s, c) = strike_azimuth.sin_cos();
        let dx = self.i * s + self.j * c;
        let dy = self.i * c - self.j * s;
        (dx, dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ijk_round_trips_through_strike_rotation() {
        let strike = 0.73_f64;
        let p = PointIJK::from_xy_offset(3.0, -2.0, 0.5, strike);
        let (dx, dy) = p.to_xy_offset(strike);
        assert!((dx - 3.0).abs() < 1e-9);
        assert!((dy - (-2.0)).abs() < 1e-9);
    }
}
