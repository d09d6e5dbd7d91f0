//! Cross-set stress-shadow coupling: the `Faa`/`Fas` projection
//! matrices and the isotropic/anisotropic algorithms that apply them.

use crate::fractureset::GridblockFractureSet;

/// `Faa(I,J)`/`Fas(I,J)`, pure functions of the strike difference between
/// sets `I` and `J`. Built once per grid and shared across
/// timesteps since strikes don't change during a run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CrossSetMatrices {
    /// `faa[i][j]`.
    pub faa: Vec<Vec<f64>>,
    /// `fas[i][j]`.
    pub fas: Vec<Vec<f64>>,
}

impl CrossSetMatrices {
    /// Builds both matrices from the sets' strike azimuths:
    /// `Faa(I,J) = cos²(strike_I - strike_J)` (resolved-normal projection),
    /// `Fas(I,J) = |sin(strike_I - strike_J) · cos(strike_I - strike_J)|`
    /// (the analogous shear projection).
    pub fn build(strikes: &[f64]) -> Self {
        let n = strikes.len();
        let mut faa = vec![vec![0.0; n]; n];
        let mut fas = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                let d = strikes[i] - strikes[j];
                faa[i][j] = d.cos().powi(2);
                fas[i][j] = (d.sin() * d.cos()).abs();
            }
        }
        CrossSetMatrices { faa, fas }
    }
}

/// Ratio of anisotropic to isotropic total P32 that selects which
/// cross-shadow algorithm is used for a gridblock at a given timestep.
pub fn p32_anisotropy_index(sets: &[GridblockFractureSet]) -> f64 {
    let totals: Vec<f64> = sets
        .iter()
        .map(|s| s.dipsets.iter().map(|d| d.p32_active).sum::<f64>())
        .collect();
    let mean = totals.iter().sum::<f64>() / totals.len().max(1) as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = totals.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / totals.len().max(1) as f64;
    variance.sqrt() / mean
}

/// Applies cross-set stress-shadow coupling to every dipset in `sets`,
/// writing `other_fs_stress_shadow_volume` / `other_fs_exclusion_zone_volume`
/// back. Dispatches on `anisotropy_index <= anisotropy_cutoff`.
pub fn apply_cross_set_coupling(
    sets: &mut [GridblockFractureSet],
    matrices: &CrossSetMatrices,
    anisotropy_cutoff: f64,
    mfp30_per_set: &[f64],
    half_thickness: f64,
) {
    let anisotropy_index = p32_anisotropy_index(sets);
    if anisotropy_index <= anisotropy_cutoff {
        apply_isotropic(sets, matrices);
    } else {
        apply_anisotropic(sets, matrices, mfp30_per_set, half_thickness);
    }
}

/// Isotropic regime: accumulate `∏_I (1 − ψ_I)` (total shadow
/// volume seen by set K) and the per-dipset clear-zone product.
fn apply_isotropic(sets: &mut [GridblockFractureSet], matrices: &CrossSetMatrices) {
    let n = sets.len();
    let shadow_widths: Vec<Vec<f64>> = sets
        .iter()
        .map(|s| s.dipsets.iter().map(|d| d.w_aa.max(d.w_as)).collect())
        .collect();

    for k in 0..n {
        let mut shadow_product = 1.0;
        let mut clear_zone_product = 1.0;
        for i in 0..n {
            if i == k {
                continue;
            }
            let faa = matrices.faa[i][k];
            let fas = matrices.fas[i][k];
            for (m, dipset) in sets[i].dipsets.iter().enumerate() {
                let w = dipset.projected_shadow_width(faa, fas);
                let psi = 1.0 - (-w.max(0.0)).exp();
                shadow_product *= 1.0 - psi;
                let _ = shadow_widths[i][m];
                clear_zone_product *= sets[i].clear_zone_volume(w);
            }
        }
        for dipset in sets[k].dipsets.iter_mut() {
            dipset.other_fs_stress_shadow_volume = 1.0 - shadow_product;
            dipset.other_fs_exclusion_zone_volume = 1.0 - clear_zone_product;
        }
    }
}

/// Anisotropic regime: a tip-overlap matrix scaled by
/// `sIJ_MFP30 · h / (|sin(strike_I - strike_J)| · IMFP32)`, used to adjust
/// each set's stress-shadow volume contribution.
fn apply_anisotropic(
    sets: &mut [GridblockFractureSet],
    matrices: &CrossSetMatrices,
    mfp30_per_set: &[f64],
    half_thickness: f64,
) {
    let n = sets.len();
    let thickness = 2.0 * half_thickness;
    for i in 0..n {
        let mut overlap_sum = 0.0;
        for j in 0..n {
            if i == j {
                continue;
            }
            let d = matrices.fas[i][j].max(1e-6);
            let i_mfp32: f64 = sets[i].dipsets.iter().map(|ds| ds.p32_active).sum::<f64>().max(1e-12);
            let overlap = (mfp30_per_set[j] * thickness) / (d * i_mfp32);
            let w_j: f64 = sets[j].dipsets.iter().map(|ds| ds.w_aa.max(ds.w_as)).fold(0.0, f64::max);
            overlap_sum += overlap * w_j / 2.0;
        }
        let correction = (1.0 - overlap_sum.min(1.0)).max(0.0);
        let p32_active_i: f64 = sets[i].dipsets.iter().map(|d| d.p32_active).sum();
        for dipset in sets[i].dipsets.iter_mut() {
            let w = dipset.w_aa.max(dipset.w_as);
            dipset.other_fs_stress_shadow_volume = 1.0 - correction;
            dipset.other_fs_exclusion_zone_volume = 1.0 - correction * (-p32_active_i * w).exp();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dipset::{DipDirection, DipSetParameters, DisplacementSense, FractureDipSet, FractureMode};
    use crate::fractureset::FractureDistributionMode;

    fn dipset() -> FractureDipSet {
        let mut d = FractureDipSet::new(DipSetParameters {
            dip: std::f64::consts::FRAC_PI_2,
            mode: FractureMode::Mode1,
            dip_direction: DipDirection::JPlus,
            displacement_sense: DisplacementSense::Normal,
            displacement_pitch: 0.0,
            initial_density_b: 1.0,
            initial_density_c: 2.0,
        });
        d.w_aa = 0.1;
        d.p32_active = 0.5;
        d
    }

    #[test]
    fn faa_is_one_for_parallel_sets() {
        let m = CrossSetMatrices::build(&[0.0, std::f64::consts::FRAC_PI_2]);
        assert!((m.faa[0][0] - 1.0).abs() < 1e-12);
        assert!(m.faa[0][1].abs() < 1e-9);
    }

    #[test]
    fn isotropic_regime_writes_nonzero_shadow_volume() {
        let mut sets = vec![
            GridblockFractureSet::new(0.0, vec![dipset()], FractureDistributionMode::StressShadow),
            GridblockFractureSet::new(std::f64::consts::FRAC_PI_4, vec![dipset()], FractureDistributionMode::StressShadow),
        ];
        let strikes: Vec<f64> = sets.iter().map(|s| s.strike_azimuth).collect();
        let matrices = CrossSetMatrices::build(&strikes);
        apply_cross_set_coupling(&mut sets, &matrices, 2.0, &[1.0, 1.0], 0.5);
        assert!(sets[0].dipsets[0].other_fs_stress_shadow_volume > 0.0);
    }
}
