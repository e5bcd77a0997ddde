use clap::Parser;
use env_logger::Env;
use log::{info, warn};

mod accumulate;
mod cli;
mod driver;
mod error;
mod geo;
mod grid;
mod input;
mod output;
mod postprocess;
mod reproject;
mod srs;
mod weights;

use cli::Args;
use error::Result;
use geo::WorldBox;

fn main() {
    if let Err(e) = run() {
        eprintln!("dem-mosaic: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    args.validate()?;

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .expect("Failed to build thread pool");
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    if let Some(cache_mb) = args.cache_size_mb {
        gdal::config::set_config_option("GDAL_CACHEMAX", &cache_mb.to_string())?;
        info!("GDAL block cache set to {} MB", cache_mb);
    }

    let mode = args.mode()?;
    let paths = args.collect_dem_paths()?;
    info!("Mosaicking {} DEMs ({:?} mode)", paths.len(), mode);
    if matches!(mode, accumulate::Mode::Median | accumulate::Mode::Nmad) {
        warn!(
            "{:?} mode holds every overlapping value per pixel; consider \
             lowering --threads or --tile-size if memory is tight",
            mode
        );
    }
    if let Some(k) = args.save_dem_weight {
        if k >= paths.len() {
            return Err(error::MosaicError::Config(format!(
                "--save-dem-weight {} out of range (0..{})",
                k,
                paths.len()
            )));
        }
    }

    let mut index = input::InputIndex::open(&paths, args.nodata_threshold)?;

    // Normalize a user SRS to WKT once so everything downstream can compare
    // and store plain strings.
    let target_srs = match &args.t_srs {
        Some(definition) => Some(
            srs::parse_srs(definition)?
                .to_wkt()
                .map_err(error::MosaicError::Gdal)?,
        ),
        None => None,
    };

    let grid_options = grid::GridOptions {
        target_srs,
        pixel_size: args.tr,
        window: args
            .t_projwin
            .as_ref()
            .map(|w| WorldBox::new(w[0], w[1], w[2], w[3])),
        force_window: args.force_projwin,
        tap: args.tap,
        tile_size: args.tile_size,
        georef_tile_size: args.georef_tile_size,
        output_nodata: args.output_nodata_value,
    };
    let grid = grid::plan(&index.georefs_and_extents(), &grid_options)?;
    index.compute_footprints(&grid.georef)?;

    let config = driver::MosaicConfig {
        mode,
        weight_params: weights::WeightParams {
            blur_sigma: args.weights_blur_sigma,
            exponent: args.weights_exponent,
            use_centerline: args.use_centerline_weights,
        },
        priority_blending_length: args.priority_blending_length,
        post_params: postprocess::PostParams {
            hole_fill_length: args.hole_fill_length,
            dem_blur_sigma: args.dem_blur_sigma,
            erode_length: args.erode_length,
        },
        write_options: output::WriteOptions {
            output_type: args.output_type()?,
            nodata: grid.georef.nodata,
            compression: args.compression()?,
            block_size: args.tif_tile_size,
            no_bigtiff: args.no_bigtiff,
        },
        output_prefix: args.output_prefix.clone(),
        extra_crop_length: args.extra_crop_length,
        save_index_map: args.save_index_map,
        save_dem_weight: args.save_dem_weight,
        tile_subset: args.tile_subset(),
    };

    driver::run(&index, &grid, &config)?;
    info!("Done");
    Ok(())
}
