//! Per-gridblock material properties and stress/strain state.

use serde::{Deserialize, Serialize};

use crate::tensor::{Tensor2S, Tensor4_2Sx2S};

/// Elastic and thermo-poro-elastic parameters of a gridblock's intact rock,
/// plus the microfracture initiation law shared by every dipset it owns.
/// Immutable during a deformation episode; created at gridblock
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MechanicalProperties {
    pub youngs_modulus: f64,
    pub poissons_ratio: f64,
    pub biot_coefficient: f64,
    pub bulk_modulus: f64,
    pub thermal_expansion_coefficient: f64,
    pub friction_coefficient: f64,
    pub cohesion: f64,
    /// Subcritical-growth exponent.
    pub subcritical_growth_exponent_b: f64,
    /// Subcritical-growth pre-factor `A`.
    pub subcritical_growth_prefactor_a: f64,
    /// Initial microfracture density law coefficient `B`.
    pub initial_density_b: f64,
    /// Initial microfracture density law exponent `c`.
    pub initial_density_c: f64,
    /// Rock relaxation time constant `t_r`.
    pub relaxation_time_rock: f64,
    /// Fracture-only relaxation time constant `t_f`.
    pub relaxation_time_fracture: f64,
}

impl MechanicalProperties {
    /// `β = b / (b − 2)`; the caller must special-case `b == 2` separately
    /// wherever this value feeds a power-law formula.
    pub fn beta(&self) -> f64 {
        self.subcritical_growth_exponent_b / (self.subcritical_growth_exponent_b - 2.0)
    }

    pub fn is_logarithmic_growth_law(&self) -> bool {
        (self.subcritical_growth_exponent_b - 2.0).abs() < 1e-12
    }

    /// Intact-rock compliance tensor `S_r`, isotropic Hooke's law.
    pub fn intact_compliance(&self) -> Tensor4_2Sx2S {
        Tensor4_2Sx2S::isotropic_compliance(self.youngs_modulus, self.poissons_ratio)
    }

    /// Initial microfracture density with radius ≥ r: `B · V · r^(−c)`.
    pub fn initial_density_ge_radius(&self, volume: f64, radius: f64) -> f64 {
        self.initial_density_b * volume * radius.powf(-self.initial_density_c)
    }
}

/// Current total strain split into its elastic and fracture-relaxed parts,
/// plus the current effective stress. Owned
/// by a gridblock; reset to lithostatic at simulation start and evolved by
/// the implicit driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressStrainState {
    pub total_strain: Tensor2S,
    pub elastic_strain: Tensor2S,
    pub elastic_strain_compactional: Tensor2S,
    /// Strain relaxed onto fractures, `ε_rel_f`.
    pub relaxed_strain_fractures: Tensor2S,
    pub effective_stress: Tensor2S,
    pub strain_rate: Tensor2S,
    pub stress_rate: Tensor2S,
    pub depth: f64,
    pub thickness: f64,
    pub fluid_overpressure_rate: f64,
    pub geothermal_gradient: f64,
}

impl StressStrainState {
    /// Lithostatic start-of-run state.
    pub fn lithostatic(depth: f64, thickness: f64, overburden_stress: Tensor2S) -> Self {
        StressStrainState {
            total_strain: Tensor2S::ZERO,
            elastic_strain: Tensor2S::ZERO,
            elastic_strain_compactional: Tensor2S::ZERO,
            relaxed_strain_fractures: Tensor2S::ZERO,
            effective_stress: overburden_stress,
            strain_rate: Tensor2S::ZERO,
            stress_rate: Tensor2S::ZERO,
            depth,
            thickness,
            fluid_overpressure_rate: 0.0,
            geothermal_gradient: 0.0,
        }
    }

    /// Non-compactional part of the elastic strain, used by the strain
    /// relaxation models.
    pub fn elastic_strain_non_compactional(&self) -> Tensor2S {
        self.elastic_strain - self.elastic_strain_compactional
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beta_matches_definition() {
        let props = MechanicalProperties {
            youngs_modulus: 30e9,
            poissons_ratio: 0.25,
            biot_coefficient: 1.0,
            bulk_modulus: 20e9,
            thermal_expansion_coefficient: 1e-5,
            friction_coefficient: 0.6,
            cohesion: 0.0,
            subcritical_growth_exponent_b: 34.0,
            subcritical_growth_prefactor_a: 1e-9,
            initial_density_b: 1.0,
            initial_density_c: 2.0,
            relaxation_time_rock: 1e10,
            relaxation_time_fracture: 1e9,
        };
        assert!(!props.is_logarithmic_growth_law());
        assert!((props.beta() - 34.0 / 32.0).abs() < 1e-12);
    }

    #[test]
    fn b_equals_two_switches_to_logarithmic() {
        let mut props_b2 = MechanicalProperties {
            youngs_modulus: 30e9,
            poissons_ratio: 0.25,
            biot_coefficient: 1.0,
            bulk_modulus: 20e9,
            thermal_expansion_coefficient: 1e-5,
            friction_coefficient: 0.6,
            cohesion: 0.0,
            subcritical_growth_exponent_b: 2.0,
            subcritical_growth_prefactor_a: 1e-9,
            initial_density_b: 1.0,
            initial_density_c: 2.0,
            relaxation_time_rock: 1e10,
            relaxation_time_fracture: 1e9,
        };
        assert!(props_b2.is_logarithmic_growth_law());
        props_b2.subcritical_growth_exponent_b = 2.0 + 1e-13;
        assert!(props_b2.is_logarithmic_growth_law());
    }
}
