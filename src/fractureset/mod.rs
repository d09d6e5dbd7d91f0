//! A gridblock fracture set: one strike azimuth, one or more dipsets, and
//! the geometric queries that drive both the implicit and explicit
//! drivers.

use serde::{Deserialize, Serialize};

use crate::dipset::FractureDipSet;
use crate::geometry::PointIJK;

/// How densities are distributed spatially within the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractureDistributionMode {
    EvenlyDistributedStress,
    StressShadow,
    DuctileBoundary,
}

/// A macrofracture segment local to one gridblock, reduced to what the
/// geometric queries in this module need: its propagating node and
/// half-shadow width. The full segment record lives in [`crate::explicit`];
/// this is the read-only view the fracture set's spatial queries act on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentView {
    pub non_propagating_node: PointIJK,
    pub propagating_node: PointIJK,
    pub half_shadow_width: f64,
}

impl SegmentView {
    fn direction(&self) -> (f64, f64) {
        let di = self.propagating_node.i - self.non_propagating_node.i;
        let dj = self.propagating_node.j - self.non_propagating_node.j;
        let len = (di * di + dj * dj).sqrt();
        if len == 0.0 {
            (0.0, 0.0)
        } else {
            (di / len, dj / len)
        }
    }

    /// Signed perpendicular distance from `p` (projected to the I-J plane)
    /// to the infinite line through this segment.
    fn perpendicular_distance(&self, p: PointIJK) -> f64 {
        let (dx, dy) = self.direction();
        let vx = p.i - self.non_propagating_node.i;
        let vy = p.j - self.non_propagating_node.j;
        vx * (-dy) + vy * dx
    }

    /// Distance along the segment's own direction, clamped to `[0, len]`
    /// meaning "within the drawn segment".
    fn along_segment(&self, p: PointIJK) -> Option<f64> {
        let (dx, dy) = self.direction();
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        let len = self.non_propagating_node.distance_ij(&self.propagating_node);
        let vx = p.i - self.non_propagating_node.i;
        let vy = p.j - self.non_propagating_node.j;
        let along = vx * dx + vy * dy;
        if (0.0..=len).contains(&along) {
            Some(along)
        } else {
            None
        }
    }
}

impl PointIJK {
    fn distance_ij(&self, other: &PointIJK) -> f64 {
        ((self.i - other.i).powi(2) + (self.j - other.j).powi(2)).sqrt()
    }
}

/// One gridblock's fracture set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridblockFractureSet {
    pub strike_azimuth: f64,
    pub dipsets: Vec<FractureDipSet>,
    pub distribution_mode: FractureDistributionMode,
    pub segments: Vec<SegmentView>,
}

impl GridblockFractureSet {
    pub fn new(strike_azimuth: f64, dipsets: Vec<FractureDipSet>, distribution_mode: FractureDistributionMode) -> Self {
        GridblockFractureSet {
            strike_azimuth,
            dipsets,
            distribution_mode,
            segments: Vec::new(),
        }
    }

    /// True iff `point` falls within half the stress-shadow width of any
    /// segment currently held by this set.
    pub fn in_stress_shadow(&self, point: PointIJK) -> bool {
        self.segments.iter().any(|seg| {
            seg.along_segment(point).is_some() && seg.perpendicular_distance(point).abs() <= seg.half_shadow_width
        })
    }

    /// Same as [`in_stress_shadow`](Self::in_stress_shadow) but the
    /// per-segment half-width is expanded by `w_other / 2` — the
    /// propagating fracture's own half-shadow projected onto this set.
    pub fn in_exclusion_zone(&self, point: PointIJK, w_other: f64) -> bool {
        self.segments.iter().any(|seg| {
            seg.along_segment(point).is_some()
                && seg.perpendicular_distance(point).abs() <= seg.half_shadow_width + w_other / 2.0
        })
    }

    /// Nearest 2D line-crossing along `propagation_dir` from `origin`,
    /// clipping `max_prop` if a crossing is found within budget. Returns `true` iff `max_prop` was clipped.
    pub fn check_intersection(&self, origin: PointIJK, propagation_dir: (f64, f64), max_prop: &mut f64) -> bool {
        self.check_crossing(origin, propagation_dir, 0.0, max_prop)
    }

    /// Same as [`check_intersection`](Self::check_intersection) but the
    /// crossing boundary is the segment's shadow envelope, offset
    /// perpendicular by `width / 2`.
    pub fn check_stress_shadow_interaction(
        &self,
        origin: PointIJK,
        propagation_dir: (f64, f64),
        max_prop: &mut f64,
    ) -> bool {
        let mut clipped = false;
        for seg in &self.segments {
            if self.check_crossing_against(seg, origin, propagation_dir, seg.half_shadow_width, max_prop) {
                clipped = true;
            }
        }
        clipped
    }

    fn check_crossing(&self, origin: PointIJK, propagation_dir: (f64, f64), offset: f64, max_prop: &mut f64) -> bool {
        let mut clipped = false;
        for seg in &self.segments {
            if self.check_crossing_against(seg, origin, propagation_dir, offset, max_prop) {
                clipped = true;
            }
        }
        clipped
    }

    /// Line-line crossing between the ray `origin + t * propagation_dir`
    /// (`t >= 0`) and `seg`'s own line, offset perpendicular by `offset`.
    fn check_crossing_against(
        &self,
        seg: &SegmentView,
        origin: PointIJK,
        propagation_dir: (f64, f64),
        offset: f64,
        max_prop: &mut f64,
    ) -> bool {
        let (sdx, sdy) = seg.direction();
        if sdx == 0.0 && sdy == 0.0 {
            return false;
        }
        let (pdx, pdy) = propagation_dir;
        let denom = pdx * sdy - pdy * sdx;
        if denom.abs() < 1e-14 {
            return false; // parallel
        }
        // Solve origin + t*p = seg.non_propagating_node + offset*normal + s*sdir
        let nx = -sdy;
        let ny = sdx;
        let ox = seg.non_propagating_node.i + offset * nx - origin.i;
        let oy = seg.non_propagating_node.j + offset * ny - origin.j;
        let t = (ox * sdy - oy * sdx) / denom;
        let s = (ox * pdy - oy * pdx) / denom;
        let seg_len = seg.non_propagating_node.distance_ij(&seg.propagating_node);
        if t >= 0.0 && t <= *max_prop && s >= 0.0 && s <= seg_len {
            *max_prop = t;
            return true;
        }
        false
    }

    /// Fraction of gridblock volume not within distance `w` of any
    /// macrofracture in this set, modelled from the mean fracture spacing
    /// implied by the active P32 density: a Poisson-plane approximation
    /// `exp(-P32 · w)`.
    pub fn clear_zone_volume(&self, width: f64) -> f64 {
        let p32_active: f64 = self.dipsets.iter().map(|d| d.p32_active).sum();
        (-p32_active * width).exp()
    }

    /// Complement used for "any point outside the shadow-widened zone".
    pub fn inverse_proximity_zone_volume(&self, width: f64) -> f64 {
        1.0 - self.clear_zone_volume(width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dipset::{DipDirection, DipSetParameters, DisplacementSense, FractureMode};

    fn empty_dipset() -> FractureDipSet {
        FractureDipSet::new(DipSetParameters {
            dip: std::f64::consts::FRAC_PI_2,
            mode: FractureMode::Mode1,
            dip_direction: DipDirection::JPlus,
            displacement_sense: DisplacementSense::Normal,
            displacement_pitch: 0.0,
            initial_density_b: 1.0,
            initial_density_c: 2.0,
        })
    }

    #[test]
    fn in_stress_shadow_detects_nearby_segment() {
        let mut fs = GridblockFractureSet::new(0.0, vec![empty_dipset()], FractureDistributionMode::StressShadow);
        fs.segments.push(SegmentView {
            non_propagating_node: PointIJK::new(0.0, 0.0, 0.0),
            propagating_node: PointIJK::new(1.0, 0.0, 0.0),
            half_shadow_width: 0.1,
        });
        assert!(fs.in_stress_shadow(PointIJK::new(0.5, 0.05, 0.0)));
        assert!(!fs.in_stress_shadow(PointIJK::new(0.5, 0.5, 0.0)));
    }

    #[test]
    fn check_intersection_clips_max_prop_at_crossing_segment() {
        let mut fs = GridblockFractureSet::new(0.0, vec![empty_dipset()], FractureDistributionMode::StressShadow);
        fs.segments.push(SegmentView {
            non_propagating_node: PointIJK::new(1.0, -1.0, 0.0),
            propagating_node: PointIJK::new(1.0, 1.0, 0.0),
            half_shadow_width: 0.0,
        });
        let mut max_prop = 10.0;
        let clipped = fs.check_intersection(PointIJK::new(0.0, 0.0, 0.0), (1.0, 0.0), &mut max_prop);
        assert!(clipped);
        assert!((max_prop - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clear_zone_volume_shrinks_with_density() {
        let mut fs = GridblockFractureSet::new(0.0, vec![empty_dipset()], FractureDistributionMode::StressShadow);
        assert_eq!(fs.clear_zone_volume(1.0), 1.0);
        fs.dipsets[0].p32_active = 2.0;
        assert!(fs.clear_zone_volume(1.0) < 1.0);
    }
}
