use derive_more::{Add, AddAssign, Div, Mul, Neg, Sub};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::Mul as StdMul;

use super::ALL_COMPONENTS;

/// Enum index into the six independent components of a symmetric
/// second-order tensor. Matrix-style `(i,j)` indexing collapses onto these
/// via [`Tensor2SComponent::from_ij`] (`XY`→`XY`, `YX`→`XY`, `ZX`→`ZX`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tensor2SComponent {
    XX,
    YY,
    ZZ,
    XY,
    YZ,
    ZX,
}

impl Tensor2SComponent {
    pub fn index(self) -> usize {
        match self {
            Tensor2SComponent::XX => 0,
            Tensor2SComponent::YY => 1,
            Tensor2SComponent::ZZ => 2,
            Tensor2SComponent::XY => 3,
            Tensor2SComponent::YZ => 4,
            Tensor2SComponent::ZX => 5,
        }
    }

    /// Matrix-style axis pair, 0=X, 1=Y, 2=Z.
    pub fn from_ij(i: usize, j: usize) -> Tensor2SComponent {
        use Tensor2SComponent::*;
        match (i.min(j), i.max(j)) {
            (0, 0) => XX,
            (1, 1) => YY,
            (2, 2) => ZZ,
            (0, 1) => XY,
            (1, 2) => YZ,
            (0, 2) => ZX,
            _ => unreachable!("axis indices must be in 0..3"),
        }
    }

    /// Whether this component lies on the tensor's main diagonal.
    pub fn is_diagonal(self) -> bool {
        matches!(
            self,
            Tensor2SComponent::XX | Tensor2SComponent::YY | Tensor2SComponent::ZZ
        )
    }
}

/// A symmetric second-order tensor, stored as its six independent
/// components. Value semantics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Add, Sub, Neg, Mul, Div, AddAssign)]
pub struct Tensor2S {
    pub xx: f64,
    pub yy: f64,
    pub zz: f64,
    pub xy: f64,
    pub yz: f64,
    pub zx: f64,
}

impl Tensor2S {
    pub const ZERO: Tensor2S = Tensor2S {
        xx: 0.0,
        yy: 0.0,
        zz: 0.0,
        xy: 0.0,
        yz: 0.0,
        zx: 0.0,
    };

    pub fn new(xx: f64, yy: f64, zz: f64, xy: f64, yz: f64, zx: f64) -> Self {
        Tensor2S { xx, yy, zz, xy, yz, zx }
    }

    pub fn isotropic(value: f64) -> Self {
        Tensor2S::new(value, value, value, 0.0, 0.0, 0.0)
    }

    pub fn get(&self, c: Tensor2SComponent) -> f64 {
        match c {
            Tensor2SComponent::XX => self.xx,
            Tensor2SComponent::YY => self.yy,
            Tensor2SComponent::ZZ => self.zz,
            Tensor2SComponent::XY => self.xy,
            Tensor2SComponent::YZ => self.yz,
            Tensor2SComponent::ZX => self.zx,
        }
    }

    pub fn set(&mut self, c: Tensor2SComponent, value: f64) {
        match c {
            Tensor2SComponent::XX => self.xx = value,
            Tensor2SComponent::YY => self.yy = value,
            Tensor2SComponent::ZZ => self.zz = value,
            Tensor2SComponent::XY => self.xy = value,
            Tensor2SComponent::YZ => self.yz = value,
            Tensor2SComponent::ZX => self.zx = value,
        }
    }

    /// Matrix-style `(i,j)` indexing, `i,j` in `0..3`.
    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.get(Tensor2SComponent::from_ij(i, j))
    }

    pub fn trace(&self) -> f64 {
        self.xx + self.yy + self.zz
    }

    /// Second invariant `I2 = XX·YY + YY·ZZ + ZZ·XX - XY² - YZ² - ZX²`.
    pub fn second_invariant(&self) -> f64 {
        self.xx * self.yy + self.yy * self.zz + self.zz * self.xx
            - self.xy * self.xy
            - self.yz * self.yz
            - self.zx * self.zx
    }

    /// Determinant by cofactor expansion along the first row.
    pub fn determinant(&self) -> f64 {
        self.xx * (self.yy * self.zz - self.yz * self.yz)
            - self.xy * (self.xy * self.zz - self.yz * self.zx)
            + self.zx * (self.xy * self.yz - self.yy * self.zx)
    }

    /// Inverse, or `None` if the determinant is (float-)zero.
    pub fn inverse(&self) -> Option<Tensor2S> {
        let det = self.determinant();
        if det == 0.0 {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(Tensor2S::new(
            (self.yy * self.zz - self.yz * self.yz) * inv_det,
            (self.xx * self.zz - self.zx * self.zx) * inv_det,
            (self.xx * self.yy - self.xy * self.xy) * inv_det,
            (self.zx * self.yz - self.xy * self.zz) * inv_det,
            (self.xy * self.zx - self.xx * self.yz) * inv_det,
            (self.xy * self.yz - self.zx * self.yy) * inv_det,
        ))
    }

    /// Sorted-ascending eigenvalues via Cardano's formula on the
    /// characteristic cubic.
    pub fn eigenvalues(&self) -> [f64; 3] {
        let i1 = self.trace();
        let alpha = i1 / 3.0;
        let shifted = *self - Tensor2S::isotropic(alpha);
        // c = det(shifted); for a traceless symmetric matrix the
        // characteristic cubic is lambda^3 + p*lambda + q = 0 with
        // p = -I2(shifted), q = -det(shifted).
        let p = shifted.second_invariant();
        let q = -shifted.determinant();

        if p.abs() < 1e-14 {
            // isotropic (or numerically so): triple root at alpha
            return [alpha, alpha, alpha];
        }

        let gamma = (-4.0 * p / 3.0).sqrt();
        // lambda = gamma * cos(theta) solves lambda^3 + p*lambda + q = 0
        // when cos(3 theta) = -4q / gamma^3 (three real roots, guaranteed
        // for symmetric tensors).
        let arg = (-4.0 * q / (gamma * gamma * gamma)).clamp(-1.0, 1.0);
        let theta = arg.acos() / 3.0;

        let mut roots = [
            alpha + gamma * theta.cos(),
            alpha + gamma * (theta + 2.0 * PI / 3.0).cos(),
            alpha + gamma * (theta - 2.0 * PI / 3.0).cos(),
        ];
        roots.sort_by(|a, b| a.partial_cmp(b).unwrap());
        roots
    }

    /// Unit eigenvector for a given eigenvalue. Picks the diagonal entry of
    /// the shifted (singular) tensor with smallest magnitude as the
    /// "solved-for" index, to avoid a near-singular 2×2 sub-problem.
    pub fn eigenvector(&self, eigenvalue: f64) -> VectorXYZEigen {
        let shifted = Tensor2S::new(
            self.xx - eigenvalue,
            self.yy - eigenvalue,
            self.zz - eigenvalue,
            self.xy,
            self.yz,
            self.zx,
        );

        let diag = [shifted.xx, shifted.yy, shifted.zz];
        let solved_for = diag
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
            .map(|(i, _)| i)
            .unwrap();

        let others: Vec<usize> = (0..3).filter(|&i| i != solved_for).collect();
        let (i, j) = (others[0], others[1]);

        // Solve the 2x2 system for the two "free" components, fixing the
        // remaining one to 1, then normalize.
        let m_ii = shifted.at(i, i);
        let m_ij = shifted.at(i, j);
        let m_ji = shifted.at(j, i);
        let m_jj = shifted.at(j, j);
        let m_is = shifted.at(i, solved_for);
        let m_js = shifted.at(j, solved_for);

        let mut v = [0.0; 3];
        v[solved_for] = 1.0;

        let det2 = m_ii * m_jj - m_ij * m_ji;
        if det2.abs() > 1e-14 {
            v[i] = (-m_is * m_jj + m_js * m_ij) / det2;
            v[j] = (-m_ii * m_js + m_ji * m_is) / det2;
        } else {
            // degenerate 2x2 as well: fall back to a component orthogonal
            // to both rows used so far.
            v[i] = 1.0;
            v[j] = 0.0;
        }

        let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if len > 0.0 {
            v[0] /= len;
            v[1] /= len;
            v[2] /= len;
        }
        VectorXYZEigen { v }
    }

    /// `(pi + atan2(2·XY, YY-XX)) / 2`; the isotropic case (`XY == 0 &&
    /// XX == YY`) returns `NaN` — callers must substitute zero explicitly.
    pub fn minimum_horizontal_azimuth(&self) -> f64 {
        if self.xy == 0.0 && (self.yy - self.xx) == 0.0 {
            return f64::NAN;
        }
        (PI + (2.0 * self.xy).atan2(self.yy - self.xx)) / 2.0
    }

    /// Traction vector `T = self · v` (standard continuum-mechanics
    /// contraction, used to resolve a stress tensor onto a fracture plane
    /// normal).
    pub fn contract_vector(&self, v: super::VectorXYZ) -> super::VectorXYZ {
        super::VectorXYZ::new(
            self.at(0, 0) * v.x + self.at(0, 1) * v.y + self.at(0, 2) * v.z,
            self.at(1, 0) * v.x + self.at(1, 1) * v.y + self.at(1, 2) * v.z,
            self.at(2, 0) * v.x + self.at(2, 1) * v.y + self.at(2, 2) * v.z,
        )
    }

    /// Iterate the six independent components in fixed layout order.
    pub fn components(&self) -> [(Tensor2SComponent, f64); 6] {
        let mut out = [(Tensor2SComponent::XX, 0.0); 6];
        for (slot, c) in out.iter_mut().zip(ALL_COMPONENTS.iter()) {
            *slot = (*c, self.get(*c));
        }
        out
    }
}

/// A unit eigenvector, wrapped so call sites don't confuse it with a plain
/// displacement vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorXYZEigen {
    pub v: [f64; 3],
}

impl VectorXYZEigen {
    pub fn dot(&self, other: &VectorXYZEigen) -> f64 {
        self.v[0] * other.v[0] + self.v[1] * other.v[1] + self.v[2] * other.v[2]
    }
}

/// Tensor·Tensor multiplication returns only the **symmetric part** of the
/// matrix product — a deliberate modelling choice: the non-symmetric part
/// is silently discarded, and downstream callers may implicitly depend on
/// that.
impl StdMul for Tensor2S {
    type Output = Tensor2S;

    fn mul(self, rhs: Tensor2S) -> Tensor2S {
        let mut out = Tensor2S::ZERO;
        for i in 0..3 {
            for j in i..3 {
                let mut sum = 0.0;
                for k in 0..3 {
                    // symmetric part: 0.5 * (A_ik B_kj + A_jk B_ki)
                    sum += 0.5 * (self.at(i, k) * rhs.at(k, j) + self.at(j, k) * rhs.at(k, i));
                }
                out.set(Tensor2SComponent::from_ij(i, j), sum);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn inverse_is_involution() {
        let t = Tensor2S::new(4.0, 5.0, 6.0, 1.0, 0.5, -0.3);
        let inv = t.inverse().expect("nonsingular");
        let inv_inv = inv.inverse().expect("nonsingular");
        assert!(approx_eq(inv_inv.xx, t.xx, 1e-9));
        assert!(approx_eq(inv_inv.yy, t.yy, 1e-9));
        assert!(approx_eq(inv_inv.zz, t.zz, 1e-9));
        assert!(approx_eq(inv_inv.xy, t.xy, 1e-9));
        assert!(approx_eq(inv_inv.yz, t.yz, 1e-9));
        assert!(approx_eq(inv_inv.zx, t.zx, 1e-9));
    }

    #[test]
    fn singular_inverse_returns_none() {
        let t = Tensor2S::new(1.0, 1.0, 1.0, 1.0, 1.0, 1.0);
        assert!(t.inverse().is_none());
    }

    #[test]
    fn eigenvalues_cardano_example() {
        // T = diag(3,2,1) + off-diag(XY=0.5). Since
        // YZ=ZX=0 the Z axis decouples exactly, so the eigenvalues reduce
        // to {1} union the eigenvalues of the 2x2 block [[3,0.5],[0.5,2]]
        // = 2.5 +/- sqrt(0.5): {1, 1.79289, 3.20711}.
        let t = Tensor2S::new(3.0, 2.0, 1.0, 0.5, 0.0, 0.0);
        let ev = t.eigenvalues();
        assert!(approx_eq(ev[0], 1.0, 1e-3));
        assert!(approx_eq(ev[1], 1.792_89, 1e-3));
        assert!(approx_eq(ev[2], 3.207_11, 1e-3));
    }

    #[test]
    fn eigenvectors_orthonormal_for_distinct_eigenvalues() {
        let t = Tensor2S::new(3.0, 2.0, 1.0, 0.5, 0.0, 0.0);
        let ev = t.eigenvalues();
        let v0 = t.eigenvector(ev[0]);
        let v1 = t.eigenvector(ev[1]);
        let v2 = t.eigenvector(ev[2]);

        for v in [&v0, &v1, &v2] {
            let len2 = v.v[0] * v.v[0] + v.v[1] * v.v[1] + v.v[2] * v.v[2];
            assert!(approx_eq(len2, 1.0, 1e-6));
        }
        assert!(v0.dot(&v1).abs() < 1e-6);
        assert!(v1.dot(&v2).abs() < 1e-6);
        assert!(v0.dot(&v2).abs() < 1e-6);
    }

    #[test]
    fn minimum_horizontal_azimuth_isotropic_is_nan() {
        let t = Tensor2S::new(5.0, 5.0, 1.0, 0.0, 0.0, 0.0);
        assert!(t.minimum_horizontal_azimuth().is_nan());
    }

    #[test]
    fn product_keeps_only_symmetric_part() {
        let a = Tensor2S::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);
        let b = Tensor2S::new(1.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        let prod = a * b;
        // (a*b)_01 should equal the average of (AB)_01 and (AB)_10
        assert!(approx_eq(prod.xy, 0.5, 1e-12));
    }
}
