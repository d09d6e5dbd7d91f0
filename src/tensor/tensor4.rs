use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::errors::{ErrorKind, Result};

use super::{Tensor2S, Tensor2SComponent, ALL_COMPONENTS};

/// A fourth-order "two-symmetric-indices" tensor: a 6×6 matrix relating two
/// [`Tensor2S`] quantities, e.g. strain→stress via
/// a stiffness tensor, or stress→strain via a compliance tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tensor4_2Sx2S {
    m: [[f64; 6]; 6],
}

impl Tensor4_2Sx2S {
    pub const ZERO: Tensor4_2Sx2S = Tensor4_2Sx2S { m: [[0.0; 6]; 6] };

    pub fn get(&self, row: Tensor2SComponent, col: Tensor2SComponent) -> f64 {
        self.m[row.index()][col.index()]
    }

    pub fn set(&mut self, row: Tensor2SComponent, col: Tensor2SComponent, value: f64) {
        self.m[row.index()][col.index()] = value;
    }

    /// Build an isotropic compliance tensor `S` from Young's modulus `E`
    /// and Poisson's ratio `ν`, in the tensor-strain convention (off
    /// diagonal shear entries relate `eps_ij` directly to `sigma_ij`, not
    /// the doubled engineering shear strain).
    pub fn isotropic_compliance(e: f64, nu: f64) -> Tensor4_2Sx2S {
        let mut t = Tensor4_2Sx2S::ZERO;
        use Tensor2SComponent::*;
        let normals = [XX, YY, ZZ];
        for &a in &normals {
            for &b in &normals {
                let v = if a.index() == b.index() { 1.0 / e } else { -nu / e };
                t.set(a, b, v);
            }
        }
        let shear_compliance = (1.0 + nu) / e;
        for &s in &[XY, YZ, ZX] {
            t.set(s, s, shear_compliance);
        }
        t
    }

    /// Build an isotropic stiffness tensor `C` from `E`, `ν`, consistent
    /// with [`Tensor4_2Sx2S::isotropic_compliance`] — `C = S^-1`.
    pub fn isotropic_stiffness(e: f64, nu: f64) -> Tensor4_2Sx2S {
        let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let mu = e / (2.0 * (1.0 + nu));
        let mut t = Tensor4_2Sx2S::ZERO;
        use Tensor2SComponent::*;
        let normals = [XX, YY, ZZ];
        for &a in &normals {
            for &b in &normals {
                let v = if a.index() == b.index() { lambda + 2.0 * mu } else { lambda };
                t.set(a, b, v);
            }
        }
        for &s in &[XY, YZ, ZX] {
            t.set(s, s, 2.0 * mu);
        }
        t
    }

    /// True when no YZ/ZX component couples to anything else.
    fn is_horizontal_symmetric(&self) -> bool {
        for &c in &[Tensor2SComponent::YZ, Tensor2SComponent::ZX] {
            for &other in ALL_COMPONENTS.iter() {
                if other.index() == c.index() {
                    continue;
                }
                if self.get(c, other) != 0.0 || self.get(other, c) != 0.0 {
                    return false;
                }
            }
        }
        true
    }

    /// True when additionally XY decouples from the normal components.
    fn is_orthotropic(&self) -> bool {
        if !self.is_horizontal_symmetric() {
            return false;
        }
        use Tensor2SComponent::*;
        for &other in &[XX, YY, ZZ] {
            if self.get(XY, other) != 0.0 || self.get(other, XY) != 0.0 {
                return false;
            }
        }
        true
    }

    /// The reduced index list over which the partial inverse below
    /// 36/25-entry inversion has to actually be solved.
    fn reduced_active(&self) -> Vec<Tensor2SComponent> {
        use Tensor2SComponent::*;
        let horiz = self.is_horizontal_symmetric();
        let ortho = self.is_orthotropic();
        let mut active = vec![XX, YY];
        if !ortho {
            active.push(XY);
        }
        if !horiz {
            active.push(YZ);
            active.push(ZX);
        }
        active
    }

    /// Given `a_known` with `XX, YY, XY, YZ, ZX` populated (its `ZZ` is
    /// ignored) and `b_zz` (the known `ZZ` of `B`), solves `A = C·B` for
    /// the remaining components of `A` and `B`, returning `(A, B)` fully
    /// populated.
    pub fn partial_inverse(&self, a_known: Tensor2S, b_zz: f64) -> Result<(Tensor2S, Tensor2S)> {
        use Tensor2SComponent::*;
        let reduced = self.reduced_active();
        let removed: Vec<Tensor2SComponent> = [XY, YZ, ZX]
            .into_iter()
            .filter(|c| !reduced.contains(c))
            .collect();

        let mut b = Tensor2S::ZERO;
        b.set(ZZ, b_zz);

        // Step 4 (done first here): removed diagonal components restore
        // directly as reciprocals.
        for &c in &removed {
            let diag = self.get(c, c);
            if diag == 0.0 {
                return Err(ErrorKind::SingularCompliance(format!(
                    "decoupled diagonal component {:?} has zero compliance",
                    c
                ))
                .into());
            }
            b.set(c, a_known.get(c) / diag);
        }

        // Step 5: A' = A - C_ij,ZZ * B_ZZ for each active ij.
        let a_prime: Vec<f64> = reduced
            .iter()
            .map(|&c| a_known.get(c) - self.get(c, ZZ) * b_zz)
            .collect();

        // Build the reduced matrix and invert it via recursive
        // cofactor/determinant expansion.
        let n = reduced.len();
        let mut sub = vec![vec![0.0; n]; n];
        for (i, &ci) in reduced.iter().enumerate() {
            for (j, &cj) in reduced.iter().enumerate() {
                sub[i][j] = self.get(ci, cj);
            }
        }
        let det = determinant(&sub);
        if det == 0.0 {
            return Err(ErrorKind::SingularCompliance(format!(
                "reduced {}x{} sub-matrix has zero determinant",
                n, n
            ))
            .into());
        }
        let inv = cofactor_inverse(&sub, det);

        let mut b_active = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..n {
                sum += inv[i][j] * a_prime[j];
            }
            b_active[i] = sum;
        }
        for (i, &c) in reduced.iter().enumerate() {
            b.set(c, b_active[i]);
        }

        // A.ZZ = sum_j C[ZZ,j] * B[j] over all six components, so the ZZ
        // row of A = C*B holds exactly too.
        let mut a = a_known;
        let mut azz = 0.0;
        for &c in ALL_COMPONENTS.iter() {
            azz += self.get(ZZ, c) * b.get(c);
        }
        a.set(ZZ, azz);

        Ok((a, b))
    }

    /// Full contraction `A = C·B`, treating `self` as the fourth-order
    /// tensor and `b` as the known second-order quantity.
    pub fn apply(&self, b: Tensor2S) -> Tensor2S {
        let mut a = Tensor2S::ZERO;
        for &row in ALL_COMPONENTS.iter() {
            let mut sum = 0.0;
            for &col in ALL_COMPONENTS.iter() {
                sum += self.get(row, col) * b.get(col);
            }
            a.set(row, sum);
        }
        a
    }

    /// Full 6×6 inverse of the tensor, independent of the reduced
    /// partial-inverse path in [`Tensor4_2Sx2S::partial_inverse`].
    pub fn full_inverse(&self) -> Result<Tensor4_2Sx2S> {
        let n = 6;
        let mut sub = vec![vec![0.0; n]; n];
        for (i, &ci) in ALL_COMPONENTS.iter().enumerate() {
            for (j, &cj) in ALL_COMPONENTS.iter().enumerate() {
                sub[i][j] = self.get(ci, cj);
            }
        }
        let det = determinant(&sub);
        if det == 0.0 {
            return Err(ErrorKind::SingularCompliance("6x6 matrix has zero determinant".into()).into());
        }
        let inv = cofactor_inverse(&sub, det);
        let mut out = Tensor4_2Sx2S::ZERO;
        for (i, &ci) in ALL_COMPONENTS.iter().enumerate() {
            for (j, &cj) in ALL_COMPONENTS.iter().enumerate() {
                out.set(ci, cj, inv[i][j]);
            }
        }
        Ok(out)
    }
}

/// Recursive Laplace-expansion determinant over an explicit square matrix,
/// with closed-form 1×1/2×2/3×3 bases.
fn determinant(m: &[Vec<f64>]) -> f64 {
    let n = m.len();
    if n == 1 {
        return m[0][0];
    }
    if n == 2 {
        return m[0][0] * m[1][1] - m[0][1] * m[1][0];
    }
    if n == 3 {
        return m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    }
    let mut det = 0.0;
    for i in 0..n {
        let minor = minor_matrix(m, i, 0);
        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
        det += sign * m[i][0] * determinant(&minor);
    }
    det
}

fn minor_matrix(m: &[Vec<f64>], skip_row: usize, skip_col: usize) -> Vec<Vec<f64>> {
    m.iter()
        .enumerate()
        .filter(|(i, _)| *i != skip_row)
        .map(|(_, row)| {
            row.iter()
                .enumerate()
                .filter(|(j, _)| *j != skip_col)
                .map(|(_, &v)| v)
                .collect()
        })
        .collect()
}

/// Inverse via the adjugate (transpose of the cofactor matrix) over `det`.
fn cofactor_inverse(m: &[Vec<f64>], det: f64) -> Vec<Vec<f64>> {
    let n = m.len();
    let mut inv = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            let minor = minor_matrix(m, i, j);
            let sign = if (i + j) % 2 == 0 { 1.0 } else { -1.0 };
            // adjugate transpose: inv[j][i] = cofactor(i,j)/det
            inv[j][i] = sign * determinant(&minor) / det;
        }
    }
    inv
}

impl Add for Tensor4_2Sx2S {
    type Output = Tensor4_2Sx2S;
    fn add(self, rhs: Tensor4_2Sx2S) -> Tensor4_2Sx2S {
        let mut out = self;
        for i in 0..6 {
            for j in 0..6 {
                out.m[i][j] += rhs.m[i][j];
            }
        }
        out
    }
}

impl Sub for Tensor4_2Sx2S {
    type Output = Tensor4_2Sx2S;
    fn sub(self, rhs: Tensor4_2Sx2S) -> Tensor4_2Sx2S {
        let mut out = self;
        for i in 0..6 {
            for j in 0..6 {
                out.m[i][j] -= rhs.m[i][j];
            }
        }
        out
    }
}

impl Neg for Tensor4_2Sx2S {
    type Output = Tensor4_2Sx2S;
    fn neg(self) -> Tensor4_2Sx2S {
        let mut out = self;
        for i in 0..6 {
            for j in 0..6 {
                out.m[i][j] = -out.m[i][j];
            }
        }
        out
    }
}

impl Mul<f64> for Tensor4_2Sx2S {
    type Output = Tensor4_2Sx2S;
    fn mul(self, rhs: f64) -> Tensor4_2Sx2S {
        let mut out = self;
        for i in 0..6 {
            for j in 0..6 {
                out.m[i][j] *= rhs;
            }
        }
        out
    }
}

impl Div<f64> for Tensor4_2Sx2S {
    type Output = Tensor4_2Sx2S;
    fn div(self, rhs: f64) -> Tensor4_2Sx2S {
        let mut out = self;
        for i in 0..6 {
            for j in 0..6 {
                out.m[i][j] /= rhs;
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
    fn isotropic_compliance_inverse_is_isotropic_stiffness() {
        let e = 30e9;
        let nu = 0.25;
        let s = Tensor4_2Sx2S::isotropic_compliance(e, nu);
        let c = s.full_inverse().expect("nonsingular");
        let expected = Tensor4_2Sx2S::isotropic_stiffness(e, nu);
        for &row in ALL_COMPONENTS.iter() {
            for &col in ALL_COMPONENTS.iter() {
                assert!(approx_eq(c.get(row, col), expected.get(row, col), 1e-6));
            }
        }
    }

    #[test]
    fn apply_reproduces_stress_rate_scenario() {
        // orthotropic isotropic compliance, zero applied horizontal
        // stress, sigma_ZZ rate = 1 Pa/s for 1000s.
        let e = 30e9;
        let nu = 0.25;
        let s = Tensor4_2Sx2S::isotropic_compliance(e, nu);

        let sigma_zz = 1.0 * 1000.0;
        let sigma = Tensor2S::new(0.0, 0.0, sigma_zz, 0.0, 0.0, 0.0);
        let eps = s.apply(sigma);

        let expected_ezz = sigma_zz / e;
        let expected_exx = -nu * expected_ezz;
        assert!(approx_eq(eps.zz, expected_ezz, 1e-9));
        assert!(approx_eq(eps.xx, expected_exx, 1e-9));
        assert!(approx_eq(eps.yy, expected_exx, 1e-9));
    }

    #[test]
    fn partial_inverse_round_trips_a_full_solution() {
        let e = 20e9;
        let nu = 0.22;
        let s = Tensor4_2Sx2S::isotropic_compliance(e, nu);

        let sigma = Tensor2S::new(1.2e6, -3.4e5, 8.0e5, 1.0e5, -2.0e4, 5.0e4);
        let eps = s.apply(sigma);

        let (a, b) = s.partial_inverse(eps, sigma.zz).expect("nonsingular");
        assert!(approx_eq(a.zz, eps.zz, 1e-6));
        for &c in ALL_COMPONENTS.iter() {
            assert!(approx_eq(b.get(c), sigma.get(c), 1e-6));
        }
    }

    #[test]
    fn reduce_unreduce_round_trip() {
        let e = 10e9;
        let nu = 0.2;
        let s = Tensor4_2Sx2S::isotropic_compliance(e, nu);
        let c = s.full_inverse().expect("nonsingular");
        let s2 = c.full_inverse().expect("nonsingular");
        for &row in ALL_COMPONENTS.iter() {
            for &col in ALL_COMPONENTS.iter() {
                assert!(approx_eq(s.get(row, col), s2.get(row, col), 1e-9));
            }
        }
    }
}
