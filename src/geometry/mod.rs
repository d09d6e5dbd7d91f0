//! Geometry primitives: point frames, gridblock trilinear
//! coordinates, and random sampling.

mod gridblock_geom;
mod point;

pub use gridblock_geom::{GridblockGeometry, UVW};
pub use point::{PointIJK, PointXYZ};
