//! Per-gridblock statistical timestep driver.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::coupling::{apply_cross_set_coupling, p32_anisotropy_index};
use crate::grid::{GridblockConfiguration, PropagationControl};
use crate::tensor::Tensor2S;

/// Strain-rate vs. stress-rate loading for one episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LoadType {
    StrainRate(Tensor2S),
    StressRate(Tensor2S),
}

/// The three strain-relaxation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrainRelaxationModel {
    NoStrainRelaxation,
    UniformStrainRelaxation,
    FractureOnlyStrainRelaxation,
}

/// One deformation episode. `duration =
/// None` means "run until all sets deactivated".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeformationEpisode {
    pub duration: Option<f64>,
    pub load: LoadType,
    pub relaxation_model: StrainRelaxationModel,
    pub stress_arching_factor: f64,
    pub overburden_stress_rate: f64,
}

/// Not an error: surfaced so the caller may append another
/// episode or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestepLimitHit {
    pub timesteps_run: usize,
}

/// Runs every episode in `control.deformation_episodes` in order. Returns `Err(TimestepLimitHit)` the moment any episode exhausts
/// `max_timesteps` without reaching its end time or full deactivation.
pub fn run_episodes(gridblock: &mut GridblockConfiguration, control: &PropagationControl, gridblock_id: usize) -> Result<(), TimestepLimitHit> {
    for (episode_index, episode) in control.deformation_episodes.iter().enumerate() {
        info!("gridblock {}: starting deformation episode {}", gridblock_id, episode_index);
        run_episode(gridblock, episode, control, gridblock_id, episode_index)?;
        info!("gridblock {}: deformation episode {} ended", gridblock_id, episode_index);
    }
    Ok(())
}

fn run_episode(
    gridblock: &mut GridblockConfiguration,
    episode: &DeformationEpisode,
    control: &PropagationControl,
    gridblock_id: usize,
    episode_index: usize,
) -> Result<(), TimestepLimitHit> {
    let mut elapsed = 0.0;
    let mut timestep_index = 0usize;

    loop {
        if timestep_index >= control.max_timesteps {
            error!(
                "gridblock {}: episode {} hit the {}-timestep limit at elapsed={:.3e}",
                gridblock_id, episode_index, control.max_timesteps, elapsed
            );
            return Err(TimestepLimitHit { timesteps_run: timestep_index });
        }
        if let Some(duration) = episode.duration {
            if elapsed >= duration {
                return Ok(());
            }
        }
        if all_sets_deactivated(gridblock) {
            return Ok(());
        }

        let remaining = episode.duration.map(|d| d - elapsed).unwrap_or(f64::INFINITY);
        let (delta_t, limiting_reason) = choose_timestep(gridblock, episode, control, remaining);
        if !delta_t.is_finite() || delta_t <= 0.0 {
            return Ok(());
        }
        debug!(
            "gridblock {}: timestep {} delta_t={:.3e} (limited by {})",
            gridblock_id, timestep_index, delta_t, limiting_reason
        );

        advance_one_timestep(gridblock, episode, control, delta_t, timestep_index, elapsed, gridblock_id);

        elapsed += delta_t;
        timestep_index += 1;
    }
}

fn all_sets_deactivated(gridblock: &GridblockConfiguration) -> bool {
    !gridblock.fracture_sets.is_empty()
        && gridblock
            .fracture_sets
            .iter()
            .all(|s| s.dipsets.iter().all(|d| d.stage == crate::dipset::EvolutionStage::Deactivated))
}

/// step 1: `Δt = min(time remaining, user max, per-dipset
/// optimal Δt giving ≤ max ΔMFP33 per step)`, further capped at
/// time-to-equilibrium under strain relaxation.
fn choose_timestep(
    gridblock: &GridblockConfiguration,
    episode: &DeformationEpisode,
    control: &PropagationControl,
    remaining: f64,
) -> (f64, &'static str) {
    let mut dt = control.max_timestep_duration.min(remaining);
    let mut reason = if remaining < control.max_timestep_duration {
        "episode end"
    } else {
        "user max_timestep_duration"
    };

    for set in &gridblock.fracture_sets {
        for dipset in &set.dipsets {
            if dipset.p33_active > 0.0 {
                let sigma_d = dipset.driving_stress(&gridblock.state.effective_stress, &gridblock.properties);
                let rate = dipset.propagation_rate(sigma_d, gridblock.state.thickness / 2.0, &gridblock.properties);
                if rate > 0.0 {
                    let optimal = control.max_ts_mfp33_increase * dipset.p33_active.max(1e-12) / rate;
                    if optimal < dt {
                        dt = optimal;
                        reason = "max MFP33 increase";
                    }
                }
            }
        }
    }

    if episode.relaxation_model != StrainRelaxationModel::NoStrainRelaxation
        && gridblock.properties.relaxation_time_rock > 0.0
        && gridblock.properties.relaxation_time_rock < dt
    {
        dt = gridblock.properties.relaxation_time_rock;
        reason = "strain relaxation time";
    }

    (dt, reason)
}

fn advance_one_timestep(
    gridblock: &mut GridblockConfiguration,
    episode: &DeformationEpisode,
    control: &PropagationControl,
    delta_t: f64,
    timestep_index: usize,
    elapsed: f64,
    gridblock_id: usize,
) {
    // Step 3: strain update per relaxation model, or direct stress
    // integration for stress-loaded episodes.
    match episode.load {
        LoadType::StressRate(rate) => {
            let sigma_new = gridblock.state.effective_stress + rate * delta_t;
            let compliance = gridblock.properties.intact_compliance();
            let strain = compliance.apply(sigma_new);
            gridblock.state.effective_stress = sigma_new;
            gridblock.state.elastic_strain = strain;
            gridblock.state.total_strain = strain;
            gridblock.state.stress_rate = rate;
            gridblock.state.strain_rate = Tensor2S::ZERO;
        }
        LoadType::StrainRate(rate) => {
            let applied = rate;
            let relaxed = match episode.relaxation_model {
                StrainRelaxationModel::NoStrainRelaxation => applied,
                StrainRelaxationModel::UniformStrainRelaxation => {
                    let non_comp = gridblock.state.elastic_strain_non_compactional();
                    applied - non_comp * (1.0 / gridblock.properties.relaxation_time_rock)
                }
                StrainRelaxationModel::FractureOnlyStrainRelaxation => {
                    let non_comp = gridblock.state.elastic_strain_non_compactional();
                    applied - non_comp * (1.0 / gridblock.properties.relaxation_time_fracture)
                }
            };
            let relaxed = snap_near_zero(relaxed);
            let compliance = gridblock.properties.intact_compliance();
            let sigma_zz_rate = episode.overburden_stress_rate * episode.stress_arching_factor;
            match compliance.partial_inverse(relaxed * delta_t, sigma_zz_rate * delta_t) {
                Ok((_a, sigma_increment)) => {
                    gridblock.state.effective_stress += sigma_increment;
                }
                Err(e) => {
                    warn!(
                        "gridblock {}: timestep {} singular compliance during strain-rate loading, stress left unchanged ({})",
                        gridblock_id, timestep_index, e
                    );
                }
            }
            gridblock.state.total_strain += applied * delta_t;
            gridblock.state.elastic_strain += relaxed * delta_t;
            gridblock.state.strain_rate = relaxed;
            gridblock.state.stress_rate = Tensor2S::ZERO;
        }
    }

    // Steps 4-5: refresh shadow volumes, pre-update deactivation checks.
    refresh_shadow_volumes(gridblock, control);
    update_evolution_stages(gridblock, control);

    // Steps 6-7: accumulate driving-stress integrals, advance densities.
    let half_thickness = gridblock.state.thickness / 2.0;
    let sigma_eff = gridblock.state.effective_stress;
    for set in &mut gridblock.fracture_sets {
        for dipset in &mut set.dipsets {
            let sigma_d = dipset.driving_stress(&sigma_eff, &gridblock.properties);
            dipset.accumulate_driving_stress(sigma_d, half_thickness, delta_t, &gridblock.properties);
            if sigma_d > 0.0 {
                let rate = dipset.propagation_rate(sigma_d, half_thickness, &gridblock.properties);
                dipset.p32_active += rate * delta_t;
                dipset.p32_total += rate * delta_t;
                dipset.p33_active += rate * delta_t * half_thickness;
                dipset.p33_total += rate * delta_t * half_thickness;
            }
        }
    }

    // Steps 8-9: refresh shadow volumes again, re-check deactivation.
    refresh_shadow_volumes(gridblock, control);
    update_evolution_stages(gridblock, control);

    // Step 10: emit the timestep onto each dipset's tape.
    let sigma_eff = gridblock.state.effective_stress;
    let props = gridblock.properties;
    for set in &mut gridblock.fracture_sets {
        for dipset in &mut set.dipsets {
            let sigma_d = dipset.driving_stress(&sigma_eff, &props);
            dipset.push_tape_row(timestep_index, elapsed + delta_t, sigma_d);
        }
    }
}

fn snap_near_zero(t: Tensor2S) -> Tensor2S {
    let snap = |v: f64| if v.abs() < 1e-15 { 0.0 } else { v };
    Tensor2S::new(snap(t.xx), snap(t.yy), snap(t.zz), snap(t.xy), snap(t.yz), snap(t.zx))
}

fn refresh_shadow_volumes(gridblock: &mut GridblockConfiguration, control: &PropagationControl) {
    if gridblock.fracture_sets.len() < 2 {
        return;
    }
    let strikes: Vec<f64> = gridblock.fracture_sets.iter().map(|s| s.strike_azimuth).collect();
    let matrices = gridblock
        .cross_set_matrices
        .get_or_insert_with(|| crate::coupling::CrossSetMatrices::build(&strikes));
    let mfp30: Vec<f64> = gridblock
        .fracture_sets
        .iter()
        .map(|s| s.dipsets.iter().map(|d| d.p30_active).sum())
        .collect();
    let half_thickness = gridblock.state.thickness / 2.0;
    apply_cross_set_coupling(&mut gridblock.fracture_sets, matrices, control.anisotropy_cutoff, &mfp30, half_thickness);
    let _ = p32_anisotropy_index(&gridblock.fracture_sets);
}

fn update_evolution_stages(gridblock: &mut GridblockConfiguration, control: &PropagationControl) {
    let sigma_eff = gridblock.state.effective_stress;
    let props = gridblock.properties;
    for set in &mut gridblock.fracture_sets {
        let clear_zone = set.clear_zone_volume(1.0);
        for dipset in &mut set.dipsets {
            let sigma_d = dipset.driving_stress(&sigma_eff, &props);
            dipset.update_stage(
                sigma_d,
                clear_zone,
                control.minimum_clear_zone_volume,
                control.active_total_mfp30_termination_ratio,
                control.historic_a_mfp33_termination_ratio,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dipset::{DipDirection, DipSetParameters, DisplacementSense, FractureDipSet, FractureMode};
    use crate::fractureset::{FractureDistributionMode, GridblockFractureSet};
    use crate::geometry::{GridblockGeometry, PointXYZ};
    use crate::grid::{FractureApertureControl, FractureNucleationPosition, TimeUnits};
    use crate::mechanics::MechanicalProperties;

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
            relaxation_time_rock: 1e30,
            relaxation_time_fracture: 1e30,
        }
    }

    fn gridblock() -> GridblockConfiguration {
        let geometry = GridblockGeometry::set_corners(
            PointXYZ::new(0.0, 0.0, -1000.0),
            PointXYZ::new(0.0, 1.0, -1000.0),
            PointXYZ::new(1.0, 1.0, -1000.0),
            PointXYZ::new(1.0, 0.0, -1000.0),
            1.0,
        );
        let mut gb = GridblockConfiguration::new(geometry, props(), 1000.0, Tensor2S::isotropic(-25e6));
        let dipset = FractureDipSet::new(DipSetParameters {
            dip: std::f64::consts::FRAC_PI_2,
            mode: FractureMode::Mode1,
            dip_direction: DipDirection::JPlus,
            displacement_sense: DisplacementSense::Normal,
            displacement_pitch: 0.0,
            initial_density_b: 1.0,
            initial_density_c: 2.0,
        });
        gb.fracture_sets
            .push(GridblockFractureSet::new(0.0, vec![dipset], FractureDistributionMode::StressShadow));
        gb
    }

    fn control(episodes: Vec<DeformationEpisode>) -> PropagationControl {
        PropagationControl {
            max_ts_mfp33_increase: 0.05,
            historic_a_mfp33_termination_ratio: 0.01,
            active_total_mfp30_termination_ratio: 0.01,
            minimum_clear_zone_volume: 0.01,
            max_timesteps: 10_000,
            max_timestep_duration: 1e10,
            no_r_bins: 10,
            check_all_fs_stress_shadows: false,
            calculate_relaxed_strain_partitioning: false,
            output_bulk_rock_elastic_tensors: false,
            calculate_population_distribution_data: false,
            calculate_fracture_porosity: false,
            fracture_aperture_control: FractureApertureControl::Uniform,
            fracture_nucleation_position: FractureNucleationPosition::LayerCentre,
            deformation_episodes: episodes,
            initial_applied_epsilon_hmin_azimuth: 0.0,
            time_units: TimeUnits::Second,
            anisotropy_cutoff: 2.0,
        }
    }

    #[test]
    fn no_strain_relaxation_accumulates_linearly() {
        let mut gb = gridblock();
        let mut rate = Tensor2S::ZERO;
        rate.xx = -1e-15;
        let episode = DeformationEpisode {
            duration: Some(1e6),
            load: LoadType::StrainRate(rate),
            relaxation_model: StrainRelaxationModel::NoStrainRelaxation,
            stress_arching_factor: 1.0,
            overburden_stress_rate: 0.0,
        };
        let ctrl = control(vec![episode]);
        let result = run_episodes(&mut gb, &ctrl, 0);
        assert!(result.is_ok());
        assert!((gb.state.total_strain.xx - rate.xx * 1e6).abs() / (rate.xx * 1e6).abs() < 1e-6);
    }

    #[test]
    fn stress_loaded_episode_reproduces_direct_contraction() {
        let mut gb = gridblock();
        gb.state.effective_stress = Tensor2S::ZERO;
        let mut rate = Tensor2S::ZERO;
        rate.zz = 1.0;
        let episode = DeformationEpisode {
            duration: Some(1000.0),
            load: LoadType::StressRate(rate),
            relaxation_model: StrainRelaxationModel::NoStrainRelaxation,
            stress_arching_factor: 1.0,
            overburden_stress_rate: 0.0,
        };
        let ctrl = control(vec![episode]);
        run_episodes(&mut gb, &ctrl, 0).unwrap();
        let expected_zz = 1000.0 / props().youngs_modulus;
        assert!((gb.state.elastic_strain.zz.abs() - expected_zz.abs()) / expected_zz.abs() < 1e-3);
    }
}
