//! A population of co-oriented, co-dipping fractures: driving
//! stress, subcritical propagation, stress-shadow widths, evolution stage,
//! and the per-timestep density tape consumed by the explicit driver.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::mechanics::MechanicalProperties;
use crate::tensor::Tensor2S;

/// Failure mode of a dipset's fractures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractureMode {
    Mode1,
    Mode2,
    Mode3,
}

/// Which side of the strike plane a dipset dips toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DipDirection {
    JPlus,
    JMinus,
    /// Dip direction is resolved per-fracture.
    Biazimuthal,
}

/// Sense of slip on the fracture plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplacementSense {
    Normal,
    Reverse,
    StrikeSlip,
}

/// Lifecycle stage of a dipset within one deformation episode. Transitions are
/// monotone within an episode; a new episode may reactivate via
/// `NotActivated` if the driving-stress sign flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvolutionStage {
    NotActivated,
    Growing,
    ResidualActivity,
    Deactivated,
}

impl EvolutionStage {
    /// Rank used to assert monotonicity.
    fn rank(self) -> u8 {
        match self {
            EvolutionStage::NotActivated => 0,
            EvolutionStage::Growing => 1,
            EvolutionStage::ResidualActivity => 2,
            EvolutionStage::Deactivated => 3,
        }
    }
}

/// One row of the per-timestep history tape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapeRow {
    pub timestep: usize,
    pub time: f64,
    pub p30_active: f64,
    pub p30_static_i: f64,
    pub p30_static_j: f64,
    pub p32_active: f64,
    pub p32_total: f64,
    pub p33_active: f64,
    pub p33_total: f64,
    pub cum_gamma: f64,
    pub w_aa: f64,
    pub w_as: f64,
    pub stage: EvolutionStage,
    pub driving_stress: f64,
}

/// Parameters fixed for the lifetime of a dipset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DipSetParameters {
    pub dip: f64,
    pub mode: FractureMode,
    pub dip_direction: DipDirection,
    pub displacement_sense: DisplacementSense,
    pub displacement_pitch: f64,
    pub initial_density_b: f64,
    pub initial_density_c: f64,
}

impl DipSetParameters {
    /// `CapB = B · h^c`, the volumetric initial density cap.
    pub fn cap_b(&self, thickness: f64) -> f64 {
        self.initial_density_b * thickness.powf(self.initial_density_c)
    }
}

/// A single co-oriented, co-dipping fracture population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractureDipSet {
    pub parameters: DipSetParameters,
    pub stage: EvolutionStage,
    pub w_aa: f64,
    pub w_as: f64,
    pub cum_gamma: f64,
    pub cum_h_gamma: f64,
    pub p30_active: f64,
    pub p30_static_i: f64,
    pub p30_static_j: f64,
    pub p32_active: f64,
    pub p32_total: f64,
    pub p33_active: f64,
    pub p33_total: f64,
    /// Stress-shadow and exclusion-zone volumes written back by cross-set
    /// coupling.
    pub other_fs_stress_shadow_volume: f64,
    pub other_fs_exclusion_zone_volume: f64,
    pub tape: Vec<TapeRow>,
}

impl FractureDipSet {
    pub fn new(parameters: DipSetParameters) -> Self {
        FractureDipSet {
            parameters,
            stage: EvolutionStage::NotActivated,
            w_aa: 0.0,
            w_as: 0.0,
            cum_gamma: 0.0,
            cum_h_gamma: 0.0,
            p30_active: 0.0,
            p30_static_i: 0.0,
            p30_static_j: 0.0,
            p32_active: 0.0,
            p32_total: 0.0,
            p33_active: 0.0,
            p33_total: 0.0,
            other_fs_stress_shadow_volume: 0.0,
            other_fs_exclusion_zone_volume: 0.0,
            tape: Vec::new(),
        }
    }

    /// Driving stress resolved onto this dipset's slip system:
    /// the resolved normal stress for Mode 1, resolved shear minus
    /// friction × normal for Modes 2/3.
    pub fn driving_stress(&self, sigma_eff: &Tensor2S, props: &MechanicalProperties) -> f64 {
        let (normal, shear) = self.resolve_on_plane(sigma_eff);
        match self.parameters.mode {
            FractureMode::Mode1 => -normal,
            FractureMode::Mode2 | FractureMode::Mode3 => shear - props.friction_coefficient * (-normal).max(0.0),
        }
    }

    /// Resolves `sigma_eff` onto the dipset's plane, returning `(normal,
    /// shear)` in the plane's local frame. Dip is measured from horizontal;
    /// strike contribution is carried by the parent set, so only the dip
    /// rotation (about the strike axis, taken here as the tensor's X axis)
    /// is applied.
    fn resolve_on_plane(&self, sigma_eff: &Tensor2S) -> (f64, f64) {
        let (s, c) = self.parameters.dip.sin_cos();
        // Unit normal to a plane dipping by `dip` about the X (strike) axis.
        let n = crate::tensor::VectorXYZ::new(0.0, s, c);
        let traction = sigma_eff.contract_vector(n);
        let normal = traction.dot(&n);
        let shear_vec = traction - n * normal;
        let shear = shear_vec.length();
        (normal, shear)
    }

    /// Subcritical propagation rate of a macrofracture tip:
    /// `2·A·σ_d^b · (h/2)^(b/2)`.
    pub fn propagation_rate(&self, sigma_d: f64, half_thickness: f64, props: &MechanicalProperties) -> f64 {
        if sigma_d <= 0.0 {
            return 0.0;
        }
        2.0 * props.subcritical_growth_prefactor_a * sigma_d.powf(props.subcritical_growth_exponent_b)
            * half_thickness.powf(props.subcritical_growth_exponent_b / 2.0)
    }

    /// Solves the nucleation law `N = B·V·(CumΓ + LTime/(β·(h/2)^(b/2)))^(−β·c)`
    /// for the weighted nucleation time of the N-th fracture.
    /// The `b=2` branch substitutes the logarithmic limit of the same
    /// relation (β diverges as `b → 2`).
    pub fn nucleation_ltime(&self, n: f64, volume: f64, half_thickness: f64, props: &MechanicalProperties) -> f64 {
        let bv = props.initial_density_b * volume;
        if props.is_logarithmic_growth_law() {
            let exponent = -1.0 / props.initial_density_c;
            half_thickness * ((n / bv).powf(exponent) - self.cum_gamma).max(0.0)
        } else {
            let beta = props.beta();
            let exponent = -1.0 / (beta * props.initial_density_c);
            let bracket = (n / bv).powf(exponent) - self.cum_gamma;
            beta * half_thickness.powf(props.subcritical_growth_exponent_b / 2.0) * bracket.max(0.0)
        }
    }

    /// Forward form of [`nucleation_ltime`](Self::nucleation_ltime): the
    /// expected count of fractures nucleated by the time the driving-stress
    /// integral reaches `cum_gamma` (the same relation evaluated at
    /// `LTime = 0`, solved for `N` instead of for the time).
    pub fn nucleated_count_at(cum_gamma: f64, volume: f64, props: &MechanicalProperties) -> f64 {
        let bv = props.initial_density_b * volume;
        let cum_gamma = cum_gamma.max(1e-300);
        if props.is_logarithmic_growth_law() {
            bv * cum_gamma.powf(-props.initial_density_c)
        } else {
            bv * cum_gamma.powf(-(props.beta() * props.initial_density_c))
        }
    }

    /// Advances `cum_gamma` (driving-stress integral) and `cum_h_gamma`
    /// over `delta_t` at constant driving stress `sigma_d`.
    pub fn accumulate_driving_stress(&mut self, sigma_d: f64, half_thickness: f64, delta_t: f64, props: &MechanicalProperties) {
        if sigma_d <= 0.0 {
            return;
        }
        let increment = 2.0 * props.subcritical_growth_prefactor_a * sigma_d.powf(props.subcritical_growth_exponent_b) * delta_t;
        self.cum_gamma += increment;
        self.cum_h_gamma += increment * half_thickness;
    }

    /// Stress-shadow width seen by a fracture in set `k` from this dipset,
    /// given the cross-set projection factors:
    /// `W = Faa·W_aa + Fas·W_as`.
    pub fn projected_shadow_width(&self, faa: f64, fas: f64) -> f64 {
        faa * self.w_aa + fas * self.w_as
    }

    /// Growing → ResidualActivity → Deactivated transitions.
    /// `NotActivated → Growing` is driven by [`driving_stress`](Self::driving_stress)
    /// becoming positive and is applied by the caller, since it requires
    /// the current stress state rather than dipset-local thresholds.
    pub fn update_stage(
        &mut self,
        sigma_d: f64,
        clear_zone_volume: f64,
        minimum_clear_zone_volume: f64,
        active_total_ratio_threshold: f64,
        residual_activity_cutoff: f64,
    ) {
        let next = match self.stage {
            EvolutionStage::NotActivated => {
                if sigma_d > 0.0 {
                    EvolutionStage::Growing
                } else {
                    EvolutionStage::NotActivated
                }
            }
            EvolutionStage::Growing => {
                let active_total_ratio = if self.p30_total() > 0.0 {
                    self.p30_active / self.p30_total()
                } else {
                    1.0
                };
                if clear_zone_volume < minimum_clear_zone_volume || active_total_ratio < active_total_ratio_threshold {
                    EvolutionStage::ResidualActivity
                } else {
                    EvolutionStage::Growing
                }
            }
            EvolutionStage::ResidualActivity => {
                let residual_fraction = if self.p32_total > 0.0 { self.p32_active / self.p32_total } else { 0.0 };
                if residual_fraction < residual_activity_cutoff {
                    EvolutionStage::Deactivated
                } else {
                    EvolutionStage::ResidualActivity
                }
            }
            EvolutionStage::Deactivated => EvolutionStage::Deactivated,
        };
        debug_assert!(next.rank() >= self.stage.rank(), "evolution stage must not revert within an episode");
        if next != self.stage {
            debug!("dipset stage {:?} -> {:?} (sigma_d={:.3e})", self.stage, next, sigma_d);
        }
        self.stage = next;
    }

    fn p30_total(&self) -> f64 {
        self.p30_active + self.p30_static_i + self.p30_static_j
    }

    pub fn push_tape_row(&mut self, timestep: usize, time: f64, driving_stress: f64) {
        self.tape.push(TapeRow {
            timestep,
            time,
            p30_active: self.p30_active,
            p30_static_i: self.p30_static_i,
            p30_static_j: self.p30_static_j,
            p32_active: self.p32_active,
            p32_total: self.p32_total,
            p33_active: self.p33_active,
            p33_total: self.p33_total,
            cum_gamma: self.cum_gamma,
            w_aa: self.w_aa,
            w_as: self.w_as,
            stage: self.stage,
            driving_stress,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor2SComponent;

    fn props() -> MechanicalProperties {
        MechanicalProperties {
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
        }
    }

    fn dipset(mode: FractureMode) -> FractureDipSet {
        FractureDipSet::new(DipSetParameters {
            dip: std::f64::consts::FRAC_PI_2,
            mode,
            dip_direction: DipDirection::JPlus,
            displacement_sense: DisplacementSense::Normal,
            displacement_pitch: 0.0,
            initial_density_b: 1.0,
            initial_density_c: 2.0,
        })
    }

    #[test]
    fn vertical_mode1_dipset_sees_xx_tension_as_driving_stress() {
        let ds = dipset(FractureMode::Mode1);
        let mut sigma = Tensor2S::ZERO;
        sigma.set(Tensor2SComponent::YY, 5.0);
        let sd = ds.driving_stress(&sigma, &props());
        assert!((sd - 5.0).abs() < 1e-9);
    }

    #[test]
    fn propagation_rate_is_zero_under_compression() {
        let ds = dipset(FractureMode::Mode1);
        assert_eq!(ds.propagation_rate(-1.0, 0.5, &props()), 0.0);
        assert!(ds.propagation_rate(1e6, 0.5, &props()) > 0.0);
    }

    #[test]
    fn stage_transitions_are_monotone() {
        let mut ds = dipset(FractureMode::Mode1);
        assert_eq!(ds.stage, EvolutionStage::NotActivated);
        ds.update_stage(1.0, 1.0, 0.1, 0.1, 0.1);
        assert_eq!(ds.stage, EvolutionStage::Growing);
        ds.p30_active = 1.0;
        ds.p30_static_i = 100.0;
        ds.update_stage(1.0, 1.0, 0.1, 0.5, 0.1);
        assert_eq!(ds.stage, EvolutionStage::ResidualActivity);
        ds.p32_active = 0.0;
        ds.p32_total = 1.0;
        ds.update_stage(1.0, 1.0, 0.1, 0.5, 0.5);
        assert_eq!(ds.stage, EvolutionStage::Deactivated);
    }
}
