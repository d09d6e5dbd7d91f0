//! Smoke-test harness: load a TOML configuration, run the implicit driver
//! over every gridblock, then run one explicit DFN generation pass.

use clap::Parser;
use fracture_grid::explicit::{DfnGenerationControl, SearchNeighbours};
use fracture_grid::geometry::{GridblockGeometry, PointXYZ};
use fracture_grid::grid::{FractureGrid, GridblockConfiguration};
use fracture_grid::tensor::Tensor2S;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Runs a small fracture-network simulation from a TOML configuration file")]
struct Cli {
    /// Path to the TOML configuration file.
    config: String,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli.config) {
        error!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let settings = fracture_grid::config::read_settings_file(config_path)?;
    let propagation_control = settings.to_propagation_control();

    let rows = settings.grid.rows;
    let cols = settings.grid.cols;
    let dx = settings.grid.cell_size_x;
    let dy = settings.grid.cell_size_y;
    let thickness = settings.grid.thickness;
    let depth = settings.grid.depth;
    let properties = settings.properties;
    let overburden = Tensor2S::isotropic(-depth * 2700.0 * 9.81);

    let mut grid = FractureGrid::new(rows, cols, settings.grid.rng_seed, |row, col| {
        let x0 = col as f64 * dx;
        let y0 = row as f64 * dy;
        let geometry = GridblockGeometry::set_corners(
            PointXYZ::new(x0, y0, -depth),
            PointXYZ::new(x0, y0 + dy, -depth),
            PointXYZ::new(x0 + dx, y0 + dy, -depth),
            PointXYZ::new(x0 + dx, y0, -depth),
            thickness,
        );
        let mut gridblock = GridblockConfiguration::new(geometry, properties, depth, overburden);
        gridblock.reset_fractures(
            settings.fracture_sets.no_sets,
            settings.fracture_sets.initial_density_b,
            settings.fracture_sets.initial_density_c,
            settings.fracture_sets.mode.into(),
            settings.fracture_sets.include_reverse,
        );
        gridblock
    });

    for (index, gridblock) in grid.gridblocks.iter_mut().enumerate() {
        match gridblock.calculate_fracture_data(&propagation_control, index) {
            Ok(()) => info!("gridblock {} reached episode end", index),
            Err(limit) => info!("gridblock {} hit the timestep limit after {} steps", index, limit.timesteps_run),
        }
    }

    let dfn_control = DfnGenerationControl {
        microfracture_dfn_minimum_radius: 0.0,
        macrofracture_dfn_minimum_length: thickness / 4.0,
        crop_to_grid: true,
        probabilistic_fracture_nucleation_limit: Some(1.0),
        max_consistency_angle: 0.1,
        minimum_layer_thickness: thickness * 0.01,
        search_neighbouring_gridblocks: SearchNeighbours::Automatic,
        link_fractures_in_stress_shadow: true,
        propagate_fractures_in_nucleation_order: true,
    };
    grid.generate_dfn(&dfn_control);

    let total_segments: usize = grid.gridblocks.iter().map(|gb| gb.segments.len()).sum();
    info!(
        "generated {} macrofracture segments across {} global fractures ({} merges)",
        total_segments,
        grid.global_fractures.len(),
        grid.global_fractures.merge_count()
    );

    Ok(())
}
