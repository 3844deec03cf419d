//! riverine: watershed delineation from the command line
//!
//! Wraps the delineation pipeline: stream network construction from D8
//! grids, per-reach profiling, subbasin labeling and drainage-based basin
//! merging, with GeoTIFF grids in and GeoTIFF/GeoJSON layers out.

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use riverine_algorithms::hydrology::{
    build_network, build_profile, delineate_subbasins, merge_basins_by_drainage, NetworkParams,
    Numbering, OutletLayer, StreamNetwork, SubbasinParams, SubbasinResult,
};
use riverine_algorithms::vector::region_polygons;
use riverine_core::io::{read_geojson_points, read_geotiff, write_geojson, write_geotiff};
use riverine_core::Raster;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "riverine")]
#[command(author, version, about = "Watershed delineation from D8 flow grids")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print raster metadata
    Info {
        /// Input GeoTIFF
        input: PathBuf,
    },
    /// Build the stream network and reach layer
    Network {
        /// D8 flow direction grid (codes 1-8, 0 = undefined)
        #[arg(long)]
        flow_dir: PathBuf,
        /// Accumulated drainage area grid
        #[arg(long)]
        accumulation: PathBuf,
        /// Elevation grid for reach profiles
        #[arg(long)]
        dem: PathBuf,
        /// Channel threshold in accumulation units
        #[arg(long, default_value_t = 1000.0)]
        threshold: f64,
        /// Stamp every link with this basin number instead of numbering
        /// basins sequentially
        #[arg(long)]
        fixed_basin: Option<i32>,
        /// Output reach layer (GeoJSON)
        #[arg(long)]
        reaches: PathBuf,
        /// Output labeled subbasin grid (GeoTIFF)
        #[arg(long)]
        basins: Option<PathBuf>,
    },
    /// Run the full pipeline through basin merging
    Delineate {
        /// D8 flow direction grid (codes 1-8, 0 = undefined)
        #[arg(long)]
        flow_dir: PathBuf,
        /// Accumulated drainage area grid
        #[arg(long)]
        accumulation: PathBuf,
        /// Elevation grid for reach profiles
        #[arg(long)]
        dem: PathBuf,
        /// Channel threshold in accumulation units
        #[arg(long, default_value_t = 1000.0)]
        threshold: f64,
        /// Outlet/inlet/reservoir points (GeoJSON)
        #[arg(long)]
        outlets: Option<PathBuf>,
        /// Output reach layer (GeoJSON)
        #[arg(long)]
        reaches: PathBuf,
        /// Output labeled subbasin grid (GeoTIFF)
        #[arg(long)]
        basins: Option<PathBuf>,
        /// Output merged watershed layer (GeoJSON)
        #[arg(long)]
        watersheds: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Info { input } => info_command(&input),
        Commands::Network {
            flow_dir,
            accumulation,
            dem,
            threshold,
            fixed_basin,
            reaches,
            basins,
        } => {
            let (_, result) = delineate(
                &flow_dir,
                &accumulation,
                &dem,
                threshold,
                fixed_basin,
                None,
            )?;
            write_outputs(&result, &reaches, basins.as_deref())
        }
        Commands::Delineate {
            flow_dir,
            accumulation,
            dem,
            threshold,
            outlets,
            reaches,
            basins,
            watersheds,
        } => {
            let outlet_layer = outlets
                .map(|path| -> anyhow::Result<OutletLayer> {
                    let points = read_geojson_points(&path)
                        .with_context(|| format!("reading outlets from {}", path.display()))?;
                    Ok(OutletLayer::from_features(&points)?)
                })
                .transpose()?;

            let (_, result) = delineate(
                &flow_dir,
                &accumulation,
                &dem,
                threshold,
                None,
                outlet_layer.as_ref(),
            )?;

            let spinner = stage_spinner("merging basins by drainage");
            let polygons = region_polygons(&result.raster);
            let merged =
                merge_basins_by_drainage(&result.subbasins, &polygons, outlet_layer.as_ref())?;
            spinner.finish_with_message(format!("{} merged watersheds", merged.len()));

            // Nothing is written until every stage has succeeded
            write_outputs(&result, &reaches, basins.as_deref())?;
            write_geojson(&merged, &watersheds)
                .with_context(|| format!("writing watersheds to {}", watersheds.display()))?;
            info!(path = %watersheds.display(), "watershed layer written");
            Ok(())
        }
    }
}

fn info_command(input: &PathBuf) -> anyhow::Result<()> {
    let raster: Raster<f64> = read_geotiff(input)
        .with_context(|| format!("reading raster from {}", input.display()))?;
    let (rows, cols) = raster.shape();
    let t = raster.transform();

    println!("{}", input.display());
    println!("  size:      {} rows x {} cols", rows, cols);
    println!("  origin:    ({}, {})", t.origin_x, t.origin_y);
    println!("  cell size: {} x {}", t.cell_width(), t.cell_height());
    Ok(())
}

/// Run network construction, profiling and subbasin delineation.
fn delineate(
    flow_dir: &PathBuf,
    accumulation: &PathBuf,
    dem: &PathBuf,
    threshold: f64,
    fixed_basin: Option<i32>,
    outlets: Option<&OutletLayer>,
) -> anyhow::Result<(StreamNetwork, SubbasinResult)> {
    let spinner = stage_spinner("reading grids");
    let fd: Raster<u8> = read_geotiff(flow_dir)
        .with_context(|| format!("reading flow directions from {}", flow_dir.display()))?;
    let area: Raster<f64> = read_geotiff(accumulation)
        .with_context(|| format!("reading accumulation from {}", accumulation.display()))?;
    let elevation: Raster<f64> =
        read_geotiff(dem).with_context(|| format!("reading elevation from {}", dem.display()))?;
    spinner.finish_with_message(format!("{} x {} cells", fd.rows(), fd.cols()));

    let spinner = stage_spinner("building stream network");
    let mut network = build_network(
        &fd,
        &area,
        NetworkParams {
            threshold,
            max_starts: None,
        },
    )?;
    build_profile(&mut network, &elevation)?;
    if let Some(layer) = outlets {
        layer.assign_node_ids(&mut network, fd.transform());
    }
    spinner.finish_with_message(format!("{} links", network.links.len()));

    let spinner = stage_spinner("delineating subbasins");
    let numbering = match fixed_basin {
        Some(v) => Numbering::Fixed(v),
        None => Numbering::Sequential,
    };
    let result = delineate_subbasins(&network, &fd, SubbasinParams { numbering })?;
    spinner.finish_with_message(format!("{} subbasins", result.subbasins.len()));

    Ok((network, result))
}

fn write_outputs(
    result: &SubbasinResult,
    reaches: &std::path::Path,
    basins: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    write_geojson(&result.reaches, reaches)
        .with_context(|| format!("writing reaches to {}", reaches.display()))?;
    info!(path = %reaches.display(), "reach layer written");

    if let Some(path) = basins {
        write_geotiff(&result.raster, path)
            .with_context(|| format!("writing basin grid to {}", path.display()))?;
        info!(path = %path.display(), "basin grid written");
    }
    Ok(())
}

fn stage_spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
