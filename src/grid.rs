//! Top-level entry point: [`GridblockConfiguration`] and [`FractureGrid`].

use serde::{Deserialize, Serialize};

use crate::coupling::CrossSetMatrices;
use crate::dipset::{DipSetParameters, FractureDipSet};
use crate::explicit::{DfnGenerationControl, GlobalRegistry, MicrofractureArena, SegmentArena};
use crate::fractureset::{FractureDistributionMode, GridblockFractureSet};
use crate::geometry::{GridblockGeometry, PointXYZ};
use crate::implicit::{DeformationEpisode, TimestepLimitHit};
use crate::mechanics::{MechanicalProperties, StressStrainState};
use crate::rng::RngSource;

/// Aperture model used when reporting fracture porosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractureApertureControl {
    Uniform,
    SizeDependent,
    Dynamic,
    BartonBandis,
}

/// Where newly nucleated microfractures are placed through the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractureNucleationPosition {
    LayerCentre,
    Unspecified,
}

/// Units the caller's time fields are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnits {
    Second,
    Year,
    Ma,
}

impl TimeUnits {
    pub fn seconds_per_unit(self) -> f64 {
        match self {
            TimeUnits::Second => 1.0,
            TimeUnits::Year => 365.25 * 86_400.0,
            TimeUnits::Ma => 1.0e6 * 365.25 * 86_400.0,
        }
    }
}

/// Full set of knobs for [`GridblockConfiguration::calculate_fracture_data`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropagationControl {
    pub max_ts_mfp33_increase: f64,
    pub historic_a_mfp33_termination_ratio: f64,
    pub active_total_mfp30_termination_ratio: f64,
    pub minimum_clear_zone_volume: f64,
    pub max_timesteps: usize,
    pub max_timestep_duration: f64,
    pub no_r_bins: usize,
    pub check_all_fs_stress_shadows: bool,
    pub calculate_relaxed_strain_partitioning: bool,
    pub output_bulk_rock_elastic_tensors: bool,
    pub calculate_population_distribution_data: bool,
    pub calculate_fracture_porosity: bool,
    pub fracture_aperture_control: FractureApertureControl,
    pub fracture_nucleation_position: FractureNucleationPosition,
    pub deformation_episodes: Vec<DeformationEpisode>,
    pub initial_applied_epsilon_hmin_azimuth: f64,
    pub time_units: TimeUnits,
    pub anisotropy_cutoff: f64,
}

/// One gridblock's full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridblockConfiguration {
    pub geometry: GridblockGeometry,
    pub properties: MechanicalProperties,
    pub state: StressStrainState,
    pub fracture_sets: Vec<GridblockFractureSet>,
    pub segments: SegmentArena,
    pub microfractures: MicrofractureArena,
    pub cross_set_matrices: Option<CrossSetMatrices>,
    pub neighbour_north: Option<usize>,
    pub neighbour_east: Option<usize>,
    pub neighbour_south: Option<usize>,
    pub neighbour_west: Option<usize>,
}

impl GridblockConfiguration {
    pub fn new(geometry: GridblockGeometry, properties: MechanicalProperties, depth: f64, overburden: crate::tensor::Tensor2S) -> Self {
        let thickness = geometry.mean_thickness();
        GridblockConfiguration {
            geometry,
            properties,
            state: StressStrainState::lithostatic(depth, thickness, overburden),
            fracture_sets: Vec::new(),
            segments: SegmentArena::default(),
            microfractures: MicrofractureArena::default(),
            cross_set_matrices: None,
            neighbour_north: None,
            neighbour_east: None,
            neighbour_south: None,
            neighbour_west: None,
        }
    }

    /// Replaces the gridblock's top corners, preserving its current mean
    /// thickness. Re-derives every cached geometric invariant, which
    /// [`GridblockGeometry`]'s constructors already do.
    pub fn set_corners(&mut self, sw: PointXYZ, nw: PointXYZ, ne: PointXYZ, se: PointXYZ) {
        let thickness = self.geometry.mean_thickness();
        self.geometry = GridblockGeometry::set_corners(sw, nw, ne, se, thickness);
        self.state.thickness = self.geometry.mean_thickness();
    }

    /// Replaces the gridblock's fracture sets with `no_sets` fresh ones,
    /// one dipset per set, strikes evenly spaced across a half-turn.
    pub fn reset_fractures(&mut self, no_sets: usize, b: f64, c: f64, mode: crate::dipset::FractureMode, include_reverse: bool) {
        use std::f64::consts::PI;
        self.fracture_sets.clear();
        for i in 0..no_sets {
            let strike = i as f64 * PI / no_sets as f64;
            let sense = if include_reverse && i % 2 == 1 {
                crate::dipset::DisplacementSense::Reverse
            } else {
                crate::dipset::DisplacementSense::Normal
            };
            let dipset = FractureDipSet::new(DipSetParameters {
                dip: PI / 2.0,
                mode,
                dip_direction: crate::dipset::DipDirection::JPlus,
                displacement_sense: sense,
                displacement_pitch: 0.0,
                initial_density_b: b,
                initial_density_c: c,
            });
            self.fracture_sets
                .push(GridblockFractureSet::new(strike, vec![dipset], FractureDistributionMode::StressShadow));
        }
        let strikes: Vec<f64> = self.fracture_sets.iter().map(|s| s.strike_azimuth).collect();
        self.cross_set_matrices = Some(CrossSetMatrices::build(&strikes));
    }

    /// Runs the implicit statistical timestep driver across every
    /// deformation episode in `control`. `gridblock_id` is only used for
    /// logging context.
    pub fn calculate_fracture_data(&mut self, control: &PropagationControl, gridblock_id: usize) -> Result<(), TimestepLimitHit> {
        crate::implicit::run_episodes(self, control, gridblock_id)
    }
}

/// Top-level simulation volume: a 2D array of
/// gridblocks plus the shared RNG source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FractureGrid {
    pub rows: usize,
    pub cols: usize,
    pub gridblocks: Vec<GridblockConfiguration>,
    pub rng: RngSource,
    pub global_fractures: GlobalRegistry,
}

impl FractureGrid {
    pub fn new(rows: usize, cols: usize, seed: u64, mut make_gridblock: impl FnMut(usize, usize) -> GridblockConfiguration) -> Self {
        let mut gridblocks = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                gridblocks.push(make_gridblock(row, col));
            }
        }
        let mut grid = FractureGrid {
            rows,
            cols,
            gridblocks,
            rng: RngSource::new(seed),
            global_fractures: GlobalRegistry::default(),
        };
        grid.wire_neighbours();
        grid
    }

    fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    fn wire_neighbours(&mut self) {
        for row in 0..self.rows {
            for col in 0..self.cols {
                let idx = self.index(row, col);
                self.gridblocks[idx].neighbour_north = if row + 1 < self.rows { Some(self.index(row + 1, col)) } else { None };
                self.gridblocks[idx].neighbour_south = if row > 0 { Some(self.index(row - 1, col)) } else { None };
                self.gridblocks[idx].neighbour_east = if col + 1 < self.cols { Some(self.index(row, col + 1)) } else { None };
                self.gridblocks[idx].neighbour_west = if col > 0 { Some(self.index(row, col - 1)) } else { None };
            }
        }
    }

    /// Drives the explicit discrete-fracture-network engine across every
    /// gridblock in timestep lock-step.
    pub fn generate_dfn(&mut self, control: &DfnGenerationControl) {
        crate::explicit::driver::run(self, control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GridblockGeometry, PointXYZ};
    use crate::tensor::Tensor2S;

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

    #[test]
    fn neighbours_form_a_planar_grid_with_boundary_nulls() {
        let grid = FractureGrid::new(2, 2, 1, |_row, _col| {
            let geometry = GridblockGeometry::set_corners(
                PointXYZ::new(0.0, 0.0, -1000.0),
                PointXYZ::new(0.0, 1.0, -1000.0),
                PointXYZ::new(1.0, 1.0, -1000.0),
                PointXYZ::new(1.0, 0.0, -1000.0),
                1.0,
            );
            GridblockConfiguration::new(geometry, props(), 1000.0, Tensor2S::isotropic(-25e6))
        });
        assert!(grid.gridblocks[0].neighbour_south.is_none());
        assert!(grid.gridblocks[0].neighbour_west.is_none());
        assert_eq!(grid.gridblocks[0].neighbour_north, Some(2));
        assert_eq!(grid.gridblocks[0].neighbour_east, Some(1));
    }
}
