use rand::Rng;
use serde::{Deserialize, Serialize};

use super::point::PointXYZ;

/// A `(u, v, w)` trilinear coordinate inside a gridblock. `w=0` is the
/// bottom surface, `w=1` the top; `u, v` parametrize the (possibly skewed)
/// horizontal quad.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UVW {
    pub u: f64,
    pub v: f64,
    pub w: f64,
}

/// Bilinear/trilinear geometry of one gridblock prism. Corner
/// pillars are assumed vertical, so `(X, Y)` at any point depend only on
/// `(u, v)`, not `w`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridblockGeometry {
    /// Corner order: SW, NW, NE, SE.
    top: [PointXYZ; 4],
    bottom: [PointXYZ; 4],
    // Cached invariants, relative to the SW top corner, recomputed on every
    // corner change.
    x2: f64,
    y2: f64,
    x3: f64,
    y3: f64,
    x4: f64,
    y4: f64,
    side_lengths: [f64; 4],
    sw_corner_angle: f64,
    ne_corner_angle: f64,
    area: f64,
}

impl GridblockGeometry {
    /// Builds from top corners only; bottom corners are derived by
    /// dropping each top corner straight down by `thickness`.
    pub fn set_corners(sw: PointXYZ, nw: PointXYZ, ne: PointXYZ, se: PointXYZ, thickness: f64) -> Self {
        let drop = |p: PointXYZ| PointXYZ::new(p.x, p.y, p.z - thickness);
        Self::set_corners_with_bottom(sw, nw, ne, se, drop(sw), drop(nw), drop(ne), drop(se))
    }

    /// Builds from top and bottom corners given independently.
    pub fn set_corners_with_bottom(
        sw: PointXYZ,
        nw: PointXYZ,
        ne: PointXYZ,
        se: PointXYZ,
        sw_b: PointXYZ,
        nw_b: PointXYZ,
        ne_b: PointXYZ,
        se_b: PointXYZ,
    ) -> Self {
        let mut g = GridblockGeometry {
            top: [sw, nw, ne, se],
            bottom: [sw_b, nw_b, ne_b, se_b],
            x2: 0.0,
            y2: 0.0,
            x3: 0.0,
            y3: 0.0,
            x4: 0.0,
            y4: 0.0,
            side_lengths: [0.0; 4],
            sw_corner_angle: 0.0,
            ne_corner_angle: 0.0,
            area: 0.0,
        };
        g.recompute_invariants();
        g
    }

    fn recompute_invariants(&mut self) {
        let sw = self.top[0];
        self.x2 = self.top[1].x - sw.x;
        self.y2 = self.top[1].y - sw.y;
        self.x3 = self.top[2].x - sw.x;
        self.y3 = self.top[2].y - sw.y;
        self.x4 = self.top[3].x - sw.x;
        self.y4 = self.top[3].y - sw.y;

        for k in 0..4 {
            let a = self.top[k];
            let b = self.top[(k + 1) % 4];
            self.side_lengths[k] = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
        }

        self.sw_corner_angle = corner_angle(self.top[3], self.top[0], self.top[1]);
        self.ne_corner_angle = corner_angle(self.top[1], self.top[2], self.top[3]);

        // Shoelace formula for the horizontal-projected area.
        let mut area2 = 0.0;
        for k in 0..4 {
            let a = self.top[k];
            let b = self.top[(k + 1) % 4];
            area2 += a.x * b.y - b.x * a.y;
        }
        self.area = area2.abs() / 2.0;
    }

    pub fn top_corners(&self) -> [PointXYZ; 4] {
        self.top
    }

    pub fn bottom_corners(&self) -> [PointXYZ; 4] {
        self.bottom
    }

    pub fn horizontal_area(&self) -> f64 {
        self.area
    }

    pub fn side_lengths(&self) -> [f64; 4] {
        self.side_lengths
    }

    /// Mean layer thickness, sampled at the four corners.
    pub fn mean_thickness(&self) -> f64 {
        self.top
            .iter()
            .zip(self.bottom.iter())
            .map(|(t, b)| t.z - b.z)
            .sum::<f64>()
            / 4.0
    }

    fn bilinear_xy(corners: &[PointXYZ; 4], u: f64, v: f64) -> (f64, f64) {
        let sw = corners[0];
        let x2 = corners[1].x - sw.x;
        let y2 = corners[1].y - sw.y;
        let x4 = corners[3].x - sw.x;
        let y4 = corners[3].y - sw.y;
        let x34 = (corners[2].x - sw.x) - x2 - x4;
        let y34 = (corners[2].y - sw.y) - y2 - y4;
        let x = sw.x + u * x2 + v * x4 + u * v * x34;
        let y = sw.y + u * y2 + v * y4 + u * v * y34;
        (x, y)
    }

    fn bilinear_z(corners: &[PointXYZ; 4], u: f64, v: f64) -> f64 {
        let z1 = corners[0].z;
        let z2 = corners[1].z - z1;
        let z4 = corners[3].z - z1;
        let z34 = (corners[2].z - z1) - z2 - z4;
        z1 + u * z2 + v * z4 + u * v * z34
    }

    /// Forward mapping `(u,v,w) -> (X,Y,Z)`: bilinear on the
    /// top/bottom surfaces, linear blend in `w` (vertical pillars mean
    /// `X,Y` don't depend on `w`).
    pub fn absolute(&self, uvw: UVW) -> PointXYZ {
        let (x, y) = Self::bilinear_xy(&self.top, uvw.u, uvw.v);
        let z_top = Self::bilinear_z(&self.top, uvw.u, uvw.v);
        let z_bottom = Self::bilinear_z(&self.bottom, uvw.u, uvw.v);
        let z = z_bottom + uvw.w * (z_top - z_bottom);
        PointXYZ::new(x, y, z)
    }

    /// Inverse mapping `(X,Y) -> (u,v)`: solves the bilinear
    /// quadratic, picks the root whose companion `v` is closest to
    /// `[0,1]`. Returns `None` when both roots are complex (only possible
    /// for a self-intersecting base quad).
    pub fn inverse_uv(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let sw = self.top[0];
        let (dx, dy) = (x - sw.x, y - sw.y);
        let x34 = self.x3 - self.x2 - self.x4;
        let y34 = self.y3 - self.y2 - self.y4;

        // Eliminating v from dx = u*x2 + v*x4 + u*v*x34, dy = u*y2 + v*y4 +
        // u*v*y34 gives a quadratic a_u*u^2 + b_u*u + c_u = 0.
        let a_u = self.y2 * x34 - self.x2 * y34;
        let b_u = dx * y34 - self.x2 * self.y4 - dy * x34 + self.y2 * self.x4;
        let c_u = dx * self.y4 - dy * self.x4;

        let companion_v = |u: f64| -> Option<f64> {
            let denom = self.x4 + u * x34;
            if denom.abs() < 1e-14 {
                let denom2 = self.y4 + u * y34;
                if denom2.abs() < 1e-14 {
                    None
                } else {
                    Some((dy - u * self.y2) / denom2)
                }
            } else {
                Some((dx - u * self.x2) / denom)
            }
        };

        let candidates: Vec<f64> = if a_u.abs() < 1e-14 {
            if b_u.abs() < 1e-14 {
                return None;
            }
            vec![-c_u / b_u]
        } else {
            let disc = b_u * b_u - 4.0 * a_u * c_u;
            if disc < 0.0 {
                return None;
            }
            let sq = disc.sqrt();
            vec![(-b_u + sq) / (2.0 * a_u), (-b_u - sq) / (2.0 * a_u)]
        };

        let mut best: Option<(f64, f64, f64)> = None; // (u, v, distance-to-[0,1])
        for u in candidates {
            if let Some(v) = companion_v(u) {
                let dist = distance_to_unit_interval(v);
                if best.map(|(_, _, d)| dist < d).unwrap_or(true) {
                    best = Some((u, v, dist));
                }
            }
        }
        best.map(|(u, v, _)| (u, v))
    }

    /// Full inverse `(X,Y,Z) -> (u,v,w)`.
    pub fn inverse(&self, p: PointXYZ) -> Option<UVW> {
        let (u, v) = self.inverse_uv(p.x, p.y)?;
        let z_top = Self::bilinear_z(&self.top, u, v);
        let z_bottom = Self::bilinear_z(&self.bottom, u, v);
        let span = z_top - z_bottom;
        let w = if span.abs() < 1e-14 { 0.5 } else { (p.z - z_bottom) / span };
        Some(UVW { u, v, w })
    }

    /// True iff `p` maps to `(u,v,w)` all within `[0,1]`; degrades
    /// gracefully (returns `false`) when the inverse mapping fails.
    pub fn contains(&self, p: PointXYZ) -> bool {
        match self.inverse(p) {
            Some(uvw) => in_unit(uvw.u) && in_unit(uvw.v) && in_unit(uvw.w),
            None => false,
        }
    }

    /// "Quick" sampler: draw uniform `(u,v,w)` and map forward.
    /// Biased for non-parallelepiped cells, but always produces a point
    /// inside the gridblock.
    pub fn sample_quick<R: Rng + ?Sized>(&self, rng: &mut R) -> PointXYZ {
        let uvw = UVW {
            u: rng.gen_range(0.0..1.0),
            v: rng.gen_range(0.0..1.0),
            w: rng.gen_range(0.0..1.0),
        };
        self.absolute(uvw)
    }

    /// "Slow" sampler: draw uniform `(X,Y,Z)` in the AABB and
    /// reject; after 1000 rejections falls back to [`sample_quick`](Self::sample_quick).
    pub fn sample_slow<R: Rng + ?Sized>(&self, rng: &mut R) -> PointXYZ {
        let (x_min, x_max, y_min, y_max, z_min, z_max) = self.aabb();
        for _ in 0..1000 {
            let candidate = PointXYZ::new(
                rng.gen_range(x_min..=x_max),
                rng.gen_range(y_min..=y_max),
                rng.gen_range(z_min..=z_max),
            );
            if self.contains(candidate) {
                return candidate;
            }
        }
        self.sample_quick(rng)
    }

    fn aabb(&self) -> (f64, f64, f64, f64, f64, f64) {
        let mut x_min = f64::INFINITY;
        let mut x_max = f64::NEG_INFINITY;
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;
        let mut z_min = f64::INFINITY;
        let mut z_max = f64::NEG_INFINITY;
        for p in self.top.iter().chain(self.bottom.iter()) {
            x_min = x_min.min(p.x);
            x_max = x_max.max(p.x);
            y_min = y_min.min(p.y);
            y_max = y_max.max(p.y);
            z_min = z_min.min(p.z);
            z_max = z_max.max(p.z);
        }
        (x_min, x_max, y_min, y_max, z_min, z_max)
    }
}

fn distance_to_unit_interval(v: f64) -> f64 {
    if v < 0.0 {
        -v
    } else if v > 1.0 {
        v - 1.0
    } else {
        0.0
    }
}

fn in_unit(x: f64) -> bool {
    (0.0..=1.0).contains(&x)
}

fn corner_angle(prev: PointXYZ, corner: PointXYZ, next: PointXYZ) -> f64 {
    let v1 = (prev.x - corner.x, prev.y - corner.y);
    let v2 = (next.x - corner.x, next.y - corner.y);
    let dot = v1.0 * v2.0 + v1.1 * v2.1;
    let len1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let len2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    if len1 == 0.0 || len2 == 0.0 {
        0.0
    } else {
        (dot / (len1 * len2)).clamp(-1.0, 1.0).acos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn unit_cube() -> GridblockGeometry {
        GridblockGeometry::set_corners(
            PointXYZ::new(0.0, 0.0, -1000.0),
            PointXYZ::new(0.0, 1.0, -1000.0),
            PointXYZ::new(1.0, 1.0, -1000.0),
            PointXYZ::new(1.0, 0.0, -1000.0),
            1.0,
        )
    }

    #[test]
    fn forward_inverse_round_trip_on_unit_cube() {
        let g = unit_cube();
        for &(u, v, w) in &[(0.1, 0.2, 0.3), (0.9, 0.05, 0.75), (0.5, 0.5, 0.5)] {
            let p = g.absolute(UVW { u, v, w });
            let back = g.inverse(p).expect("non-degenerate");
            assert!((back.u - u).abs() < 1e-9, "u mismatch: {} vs {}", back.u, u);
            assert!((back.v - v).abs() < 1e-9, "v mismatch: {} vs {}", back.v, v);
            assert!((back.w - w).abs() < 1e-9, "w mismatch: {} vs {}", back.w, w);
        }
    }

    #[test]
    fn skewed_quad_inverse_matches_a_hand_checked_point() {
        // SW=(0,0), NW=(0,1), NE=(2,1.5), SE=(1,0).
        let g = GridblockGeometry::set_corners(
            PointXYZ::new(0.0, 0.0, 0.0),
            PointXYZ::new(0.0, 1.0, 0.0),
            PointXYZ::new(2.0, 1.5, 0.0),
            PointXYZ::new(1.0, 0.0, 0.0),
            1.0,
        );
        let (u, v) = g.inverse_uv(1.0, 0.75).expect("non-degenerate");
        let p = g.absolute(UVW { u, v, w: 0.5 });
        assert!((p.x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn quick_sample_is_always_inside() {
        let g = unit_cube();
        let mut rng = Pcg64::seed_from_u64(7);
        for _ in 0..200 {
            let p = g.sample_quick(&mut rng);
            assert!(g.contains(p));
        }
    }
}
