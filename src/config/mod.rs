//! TOML-driven configuration for the demo harness: a dedicated
//! `error_chain!` scoped to this module with a `foreign_links` entry for
//! `toml::de::Error`, kept separate from the crate-wide [`crate::errors`].

use std::fs;

use serde::{Deserialize, Serialize};

use crate::dipset::FractureMode;
use crate::grid::{FractureApertureControl, FractureNucleationPosition, PropagationControl, TimeUnits};
use crate::implicit::{DeformationEpisode, LoadType, StrainRelaxationModel};
use crate::mechanics::MechanicalProperties;
use crate::tensor::Tensor2S;

error_chain::error_chain! {
    foreign_links {
        Toml(toml::de::Error);
        Io(std::io::Error);
    }
}

/// Grid dimensions and per-gridblock starting conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSettings {
    pub rows: usize,
    pub cols: usize,
    pub cell_size_x: f64,
    pub cell_size_y: f64,
    pub thickness: f64,
    pub depth: f64,
    pub rng_seed: u64,
}

/// Top-level file format loaded by the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsToml {
    pub grid: GridSettings,
    pub properties: MechanicalProperties,
    pub propagation: PropagationControlToml,
    pub fracture_sets: FractureSetSpec,
}

/// `PropagationControl`'s field names as written in TOML, with
/// `deformation_episodes` expressed as a flat vector of
/// `DeformationEpisodeToml` rather than the enum-carrying `LoadType`
/// directly, since enum variants with payloads round-trip awkwardly
/// through plain TOML tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropagationControlToml {
    pub max_ts_mfp33_increase: f64,
    pub historic_a_mfp33_termination_ratio: f64,
    pub active_total_mfp30_termination_ratio: f64,
    pub minimum_clear_zone_volume: f64,
    pub max_timesteps: usize,
    pub max_timestep_duration: f64,
    pub no_r_bins: usize,
    pub anisotropy_cutoff: f64,
    pub deformation_episodes: Vec<DeformationEpisodeToml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeformationEpisodeToml {
    pub duration: Option<f64>,
    pub stress_loaded: bool,
    pub rate_xx: f64,
    pub rate_yy: f64,
    pub rate_zz: f64,
    pub relaxation_model: StrainRelaxationModelToml,
    pub stress_arching_factor: f64,
    pub overburden_stress_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrainRelaxationModelToml {
    None,
    Uniform,
    FractureOnly,
}

impl From<StrainRelaxationModelToml> for StrainRelaxationModel {
    fn from(value: StrainRelaxationModelToml) -> Self {
        match value {
            StrainRelaxationModelToml::None => StrainRelaxationModel::NoStrainRelaxation,
            StrainRelaxationModelToml::Uniform => StrainRelaxationModel::UniformStrainRelaxation,
            StrainRelaxationModelToml::FractureOnly => StrainRelaxationModel::FractureOnlyStrainRelaxation,
        }
    }
}

impl From<&DeformationEpisodeToml> for DeformationEpisode {
    fn from(value: &DeformationEpisodeToml) -> Self {
        let rate = Tensor2S::new(value.rate_xx, value.rate_yy, value.rate_zz, 0.0, 0.0, 0.0);
        DeformationEpisode {
            duration: value.duration,
            load: if value.stress_loaded {
                LoadType::StressRate(rate)
            } else {
                LoadType::StrainRate(rate)
            },
            relaxation_model: value.relaxation_model.into(),
            stress_arching_factor: value.stress_arching_factor,
            overburden_stress_rate: value.overburden_stress_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FractureSetSpec {
    pub no_sets: usize,
    pub initial_density_b: f64,
    pub initial_density_c: f64,
    pub mode: FractureModeToml,
    pub include_reverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractureModeToml {
    Mode1,
    Mode2,
    Mode3,
}

impl From<FractureModeToml> for FractureMode {
    fn from(value: FractureModeToml) -> Self {
        match value {
            FractureModeToml::Mode1 => FractureMode::Mode1,
            FractureModeToml::Mode2 => FractureMode::Mode2,
            FractureModeToml::Mode3 => FractureMode::Mode3,
        }
    }
}

impl SettingsToml {
    pub fn to_propagation_control(&self) -> PropagationControl {
        PropagationControl {
            max_ts_mfp33_increase: self.propagation.max_ts_mfp33_increase,
            historic_a_mfp33_termination_ratio: self.propagation.historic_a_mfp33_termination_ratio,
            active_total_mfp30_termination_ratio: self.propagation.active_total_mfp30_termination_ratio,
            minimum_clear_zone_volume: self.propagation.minimum_clear_zone_volume,
            max_timesteps: self.propagation.max_timesteps,
            max_timestep_duration: self.propagation.max_timestep_duration,
            no_r_bins: self.propagation.no_r_bins,
            check_all_fs_stress_shadows: true,
            calculate_relaxed_strain_partitioning: false,
            output_bulk_rock_elastic_tensors: false,
            calculate_population_distribution_data: false,
            calculate_fracture_porosity: false,
            fracture_aperture_control: FractureApertureControl::Uniform,
            fracture_nucleation_position: FractureNucleationPosition::LayerCentre,
            deformation_episodes: self.propagation.deformation_episodes.iter().map(DeformationEpisode::from).collect(),
            initial_applied_epsilon_hmin_azimuth: 0.0,
            time_units: TimeUnits::Second,
            anisotropy_cutoff: self.propagation.anisotropy_cutoff,
        }
    }
}

/// Reads and parses `path` into a [`SettingsToml`].
pub fn read_settings_file(path: &str) -> Result<SettingsToml> {
    let contents = fs::read_to_string(path).chain_err(|| "unable to read configuration file")?;
    let settings: SettingsToml = toml::from_str(&contents).chain_err(|| "unable to parse configuration file")?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_settings_document() {
        let toml_text = r#"
            [grid]
            rows = 1
            cols = 1
            cell_size_x = 1.0
            cell_size_y = 1.0
            thickness = 1.0
            depth = 1000.0
            rng_seed = 42

            [properties]
            youngs_modulus = 3.0e10
            poissons_ratio = 0.25
            biot_coefficient = 1.0
            bulk_modulus = 2.0e10
            thermal_expansion_coefficient = 1.0e-5
            friction_coefficient = 0.6
            cohesion = 0.0
            subcritical_growth_exponent_b = 34.0
            subcritical_growth_prefactor_a = 1.0e-9
            initial_density_b = 1.0
            initial_density_c = 2.0
            relaxation_time_rock = 1.0e10
            relaxation_time_fracture = 1.0e9

            [propagation]
            max_ts_mfp33_increase = 0.05
            historic_a_mfp33_termination_ratio = 0.01
            active_total_mfp30_termination_ratio = 0.01
            minimum_clear_zone_volume = 0.01
            max_timesteps = 1000
            max_timestep_duration = 1.0e10
            no_r_bins = 10
            anisotropy_cutoff = 2.0

            [[propagation.deformation_episodes]]
            duration = 1.0e12
            stress_loaded = false
            rate_xx = -1.0e-15
            rate_yy = 0.0
            rate_zz = 0.0
            relaxation_model = "None"
            stress_arching_factor = 1.0
            overburden_stress_rate = 0.0

            [fracture_sets]
            no_sets = 2
            initial_density_b = 1.0
            initial_density_c = 2.0
            mode = "Mode1"
            include_reverse = false
        "#;
        let settings: SettingsToml = toml::from_str(toml_text).expect("valid toml");
        assert_eq!(settings.grid.rows, 1);
        assert_eq!(settings.fracture_sets.no_sets, 2);
        let control = settings.to_propagation_control();
        assert_eq!(control.deformation_episodes.len(), 1);
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml_text = r#"
            [grid]
            rows = 1
            cols = 1
            cell_size_x = 1.0
            cell_size_y = 1.0
            thickness = 1.0
            depth = 1000.0
            rng_seed = 42
            bogus_field = true
        "#;
        #[derive(Deserialize)]
        struct GridOnly {
            #[allow(dead_code)]
            grid: GridSettings,
        }
        let result: std::result::Result<GridOnly, _> = toml::from_str(toml_text);
        assert!(result.is_err());
    }
}
