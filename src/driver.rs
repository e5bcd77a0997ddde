use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, info};
use ndarray::{s, Array2};
use rayon::prelude::*;

use crate::accumulate::{Accumulator, Mode};
use crate::error::{MosaicError, Result};
use crate::geo::PixelBox;
use crate::grid::{OutputGrid, TileSpec};
use crate::input::InputIndex;
use crate::output::{self, WriteOptions};
use crate::postprocess::{self, PostParams};
use crate::reproject::reproject_input;
use crate::weights::{apply_priority, build_weights, WeightParams};

/// Everything the mosaic run needs beyond the inputs and the grid.
#[derive(Debug, Clone)]
pub struct MosaicConfig {
    pub mode: Mode,
    pub weight_params: WeightParams,
    pub priority_blending_length: Option<f64>,
    pub post_params: PostParams,
    pub write_options: WriteOptions,
    pub output_prefix: String,
    pub extra_crop_length: i64,
    pub save_index_map: bool,
    pub save_dem_weight: Option<usize>,
    pub tile_subset: Option<Vec<usize>>,
}

/// Mosaic all requested tiles. Tiles are processed in parallel; inputs
/// within a tile fold strictly in their registration order. The first
/// failure raises the cancel flag, remaining workers stop at the next
/// tile or input boundary, and that failure is reported.
pub fn run(index: &InputIndex, grid: &OutputGrid, config: &MosaicConfig) -> Result<()> {
    let tiles = requested_tiles(grid, config)?;
    info!("Mosaicking {} of {} tiles", tiles.len(), grid.tiles.len());

    // Fail before any tile work if single-file output cannot hold them.
    for tile in &tiles {
        output::tile_path(&config.output_prefix, tile.index, tiles.len())?;
    }

    let cancel = AtomicBool::new(false);
    let completed = AtomicUsize::new(0);
    let total = tiles.len();

    tiles
        .par_iter()
        .map(|&tile| {
            if cancel.load(Ordering::Relaxed) {
                return Ok(());
            }
            let result = process_tile(index, grid, tile, config, total, &cancel);
            match &result {
                Ok(inputs_used) => {
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        "Tile {} done ({}/{}, {} inputs)",
                        tile.index, done, total, inputs_used
                    );
                }
                Err(_) => cancel.store(true, Ordering::Relaxed),
            }
            result.map(|_| ())
        })
        .collect::<Result<Vec<()>>>()?;
    Ok(())
}

fn requested_tiles<'a>(grid: &'a OutputGrid, config: &MosaicConfig) -> Result<Vec<&'a TileSpec>> {
    match &config.tile_subset {
        None => Ok(grid.tiles.iter().collect()),
        Some(indices) => indices
            .iter()
            .map(|&i| {
                grid.tiles.get(i).ok_or_else(|| {
                    MosaicError::Config(format!(
                        "tile index {} out of range (0..{})",
                        i,
                        grid.tiles.len()
                    ))
                })
            })
            .collect(),
    }
}

/// Produce and write one tile; returns the number of contributing inputs.
fn process_tile(
    index: &InputIndex,
    grid: &OutputGrid,
    tile: &TileSpec,
    config: &MosaicConfig,
    total_tiles: usize,
    cancel: &AtomicBool,
) -> Result<usize> {
    let post_margin = config.post_params.margin();
    // The accumulation box carries enough context for post-processing; the
    // crop box adds the margin the distance transform needs on top.
    let patch_box = tile.pixels.expand(post_margin);
    let crop_box = if config.mode.needs_weights() {
        patch_box.expand(config.extra_crop_length)
    } else {
        patch_box
    };

    let selected = index.select(&tile.pixels, config.extra_crop_length + post_margin);
    debug!("Tile {}: {} candidate inputs", tile.index, selected.len());

    let mut accumulator = Accumulator::new(config.mode, patch_box.height(), patch_box.width());
    let mut saved_weights: Option<Array2<f64>> = None;

    for (position, &handle) in selected.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            return Ok(0);
        }
        let values = match reproject_input(index, handle, &grid.georef, &crop_box)? {
            Some(values) => values,
            None => continue,
        };
        if config.mode.needs_weights() {
            let mut patch =
                build_weights(&values, &crop_box, &handle.footprint, &config.weight_params);
            if let Some(length) = config.priority_blending_length {
                apply_priority(&mut patch, position, selected.len(), length);
            }
            let values = crop_array(&values, &crop_box, &patch_box);
            let weights = crop_array(&patch.weights, &crop_box, &patch_box);
            accumulator.accumulate(&values, Some(&weights), handle.index)?;
            if config.save_dem_weight == Some(handle.index) {
                saved_weights = Some(weights);
            }
        } else {
            let values = crop_array(&values, &crop_box, &patch_box);
            accumulator.accumulate(&values, None, handle.index)?;
        }
    }

    let mut finished = accumulator.finalize();
    postprocess::process(&mut finished.values, &config.post_params);

    let tile_values = crop_array(&finished.values, &patch_box, &tile.pixels);
    let path = output::tile_path(&config.output_prefix, tile.index, total_tiles)?;
    output::write_tile(&path, &tile.georef, &tile_values, &config.write_options)?;

    if config.save_index_map {
        if let Some(index_map) = &finished.index_map {
            let cropped = crop_index_map(index_map, &patch_box, &tile.pixels);
            let path = output::aux_path(&config.output_prefix, "index-map", tile.index);
            output::write_index_map(&path, &tile.georef, &cropped, &config.write_options)?;
        }
    }
    if let Some(weights) = saved_weights {
        let k = config.save_dem_weight.expect("weights saved without index");
        let cropped = crop_array(&weights, &patch_box, &tile.pixels);
        let path = output::aux_path(&config.output_prefix, &format!("weight-{}", k), tile.index);
        output::write_weights(&path, &tile.georef, &cropped, &config.write_options)?;
    }

    Ok(selected.len())
}

/// Copy the sub-rectangle `to` out of an array covering `from`.
fn crop_array(data: &Array2<f64>, from: &PixelBox, to: &PixelBox) -> Array2<f64> {
    let r0 = (to.min_y - from.min_y) as usize;
    let c0 = (to.min_x - from.min_x) as usize;
    data.slice(s![r0..r0 + to.height(), c0..c0 + to.width()])
        .to_owned()
}

fn crop_index_map(data: &Array2<i32>, from: &PixelBox, to: &PixelBox) -> Array2<i32> {
    let r0 = (to.min_y - from.min_y) as usize;
    let c0 = (to.min_x - from.min_x) as usize;
    data.slice(s![r0..r0 + to.height(), c0..c0 + to.width()])
        .to_owned()
}
