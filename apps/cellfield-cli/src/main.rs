use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use cellfield_kernel::{CellField, FieldConfig, ViewState};
use cellfield_render::RecordingBackend;
use cellfield_stream::{DimensionDescriptor, RegionCalculator};
use cellfield_tools::{FieldInspector, SyntheticConfig, SyntheticWorld};
use clap::{Args, Parser, Subcommand};
use glam::{Mat4, Vec3};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cellfield-cli", about = "CLI tool for streaming cell fields")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Field configuration file (YAML, or JSON by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct Dimension {
    /// World width in meters
    #[arg(long, default_value = "40")]
    width: f32,
    /// World depth in meters
    #[arg(long, default_value = "40")]
    depth: f32,
    /// Cell edge length in meters
    #[arg(long, default_value = "0.25")]
    cell_size: f32,
    /// Lowest cell layer
    #[arg(long, default_value = "-8", allow_hyphen_values = true)]
    min_depth: i32,
    /// Highest cell layer
    #[arg(long, default_value = "35")]
    max_height: i32,
}

impl From<Dimension> for DimensionDescriptor {
    fn from(d: Dimension) -> Self {
        Self {
            width_m: d.width,
            depth_m: d.depth,
            cell_size: d.cell_size,
            min_depth: d.min_depth,
            max_height: d.max_height,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info
    Info,
    /// Print the effective configuration as YAML
    Config,
    /// Compute the initial load region for a world
    Region {
        #[command(flatten)]
        dim: Dimension,
    },
    /// Walk a viewer across a synthetic world and report what was streamed and drawn
    Walk {
        #[command(flatten)]
        dim: Dimension,
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "120")]
        ticks: u32,
        /// Terrain seed
        #[arg(short, long, default_value = "7")]
        seed: u32,
        /// Viewer speed in meters per tick
        #[arg(long, default_value = "0.25")]
        speed: f32,
        /// Simulated frame time in milliseconds
        #[arg(long, default_value = "16")]
        frame_ms: u64,
        /// Cull cells outside the view frustum
        #[arg(long)]
        culling: bool,
        /// Print every batch after the walk
        #[arg(long)]
        batches: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FieldConfig> {
    match path {
        Some(path) => FieldConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(FieldConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Info => {
            println!("cellfield-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", cellfield_common::crate_info());
            println!("stream: {}", cellfield_stream::crate_info());
            println!("render: {}", cellfield_render::crate_info());
            println!("kernel: {}", cellfield_kernel::crate_info());
            println!("tools: {}", cellfield_tools::crate_info());
        }
        Commands::Config => {
            print!("{}", config.to_yaml_string()?);
        }
        Commands::Region { dim } => {
            let dim = DimensionDescriptor::from(dim);
            let calc = RegionCalculator::new(config.region);
            let region = calc.calculate(&dim);
            println!("Region: {region}");
            println!(
                "Cells: {} x {} x {} = {} (ceiling {}, valid={})",
                region.x_span(),
                region.y_span(),
                region.z_span(),
                region.total_cells(),
                config.region.max_cells,
                calc.validate(&region)
            );
            println!(
                "Center: {:?}, horizontal radius {:.2} m",
                region.world_center(dim.cell_size),
                region.horizontal_radius(dim.cell_size)
            );
        }
        Commands::Walk {
            dim,
            ticks,
            seed,
            speed,
            frame_ms,
            culling,
            batches,
        } => {
            let dim = DimensionDescriptor::from(dim);
            let world = SyntheticWorld::new(SyntheticConfig {
                seed,
                ..SyntheticConfig::default()
            });
            let mut field = CellField::new(config, world, RecordingBackend::new())?;
            for (group, part, geometry) in SyntheticWorld::composites() {
                field.register_composite(group, part, geometry);
            }
            field.set_culling(culling);

            let t0 = Instant::now();
            let load = field.load_region_at(&dim, t0)?;
            println!(
                "Loaded {} cells in {} ({} batches)",
                load.cells, load.region, load.batches
            );

            // Diagonal walk from the origin corner, eyes a few meters up.
            let frame = Duration::from_millis(frame_ms);
            let dir = Vec3::new(1.0, 0.0, 1.0).normalize();
            let eye_height = 4.0 + dim.max_height.min(12) as f32 * dim.cell_size;
            let aspect = 16.0 / 9.0;
            let proj = Mat4::perspective_rh(70f32.to_radians(), aspect, 0.1, 200.0);
            let mut passes = 0usize;
            let mut fetches = 0usize;
            let started = Instant::now();
            for i in 0..ticks {
                let ground = dir * (speed * i as f32);
                let eye = ground + Vec3::Y * eye_height;
                let look = Mat4::look_at_rh(eye, eye + dir + Vec3::NEG_Y * 0.3, Vec3::Y);
                let view = ViewState::at(eye).with_view_projection(proj * look);

                field.record_frame(frame);
                let report = field.tick_at(view, t0 + frame * (i + 1));
                passes += usize::from(report.render.is_some());
                fetches += usize::from(report.stream.started.is_some());
            }
            let elapsed = started.elapsed();

            println!(
                "Walked {ticks} ticks in {elapsed:?}: {passes} render passes, {fetches} fetches"
            );
            println!("{}", FieldInspector::summary(&field));
            let backend = field.backend();
            println!(
                "Backend: {} batches, {} geometries, {} materials, {} uploads",
                backend.batch_count(),
                backend.geometry_count(),
                backend.material_count(),
                backend.uploads
            );
            if batches {
                for info in FieldInspector::batches(&field) {
                    println!("  {info}");
                }
            }
        }
    }

    Ok(())
}
