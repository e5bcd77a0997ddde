use log::{debug, info};

use crate::error::{MosaicError, Result};
use crate::geo::{Georef, PixelBox, WorldBox};
use crate::srs::SrsTransform;

/// Default tile side, chosen so a tile stays around a million pixels.
pub const DEFAULT_TILE_SIDE: usize = 1000;

/// Perimeter sample density used when projecting footprints; corners alone
/// underestimate the extent of curved reprojections.
const PERIMETER_SAMPLES_PER_EDGE: usize = 21;

/// User overrides that shape the output grid.
#[derive(Debug, Clone, Default)]
pub struct GridOptions {
    pub target_srs: Option<String>,
    pub pixel_size: Option<f64>,
    pub window: Option<WorldBox>,
    pub force_window: bool,
    pub tap: bool,
    pub tile_size: Option<usize>,
    pub georef_tile_size: Option<f64>,
    pub output_nodata: Option<f64>,
}

/// One output tile: its index, pixel box in the output grid and the output
/// georeference restricted to it.
#[derive(Debug, Clone)]
pub struct TileSpec {
    pub index: usize,
    pub pixels: PixelBox,
    pub georef: Georef,
}

/// The planned output grid and its tile partition.
#[derive(Debug)]
pub struct OutputGrid {
    pub georef: Georef,
    pub pixels: PixelBox,
    pub tile_side: usize,
    pub tiles: Vec<TileSpec>,
}

/// Fractional pixel coordinates along the perimeter of a pixel box.
pub fn perimeter_points(extent: &PixelBox, per_edge: usize) -> Vec<(f64, f64)> {
    let x0 = extent.min_x as f64;
    let y0 = extent.min_y as f64;
    let x1 = extent.max_x as f64;
    let y1 = extent.max_y as f64;
    let mut points = Vec::with_capacity(4 * per_edge);
    for i in 0..per_edge {
        let t = i as f64 / (per_edge - 1) as f64;
        points.push((x0 + t * (x1 - x0), y0));
        points.push((x0 + t * (x1 - x0), y1));
        points.push((x0, y0 + t * (y1 - y0)));
        points.push((x1, y0 + t * (y1 - y0)));
    }
    points
}

/// Project an input's pixel extent into a target SRS and take the
/// axis-aligned bounding box. Perimeter points that fail to project are
/// skipped; an entirely unprojectable footprint is an input error.
pub fn footprint_world_box(
    georef: &Georef,
    extent: &PixelBox,
    to_target: &SrsTransform,
) -> Result<WorldBox> {
    let mut world = WorldBox::empty();
    for (u, v) in perimeter_points(extent, PERIMETER_SAMPLES_PER_EDGE) {
        let (x, y) = georef.pixel_to_world(u, v);
        match to_target.apply(x, y) {
            Ok((tx, ty)) if tx.is_finite() && ty.is_finite() => world.grow_to(tx, ty),
            _ => continue,
        }
    }
    if world.is_empty() {
        return Err(MosaicError::Input(
            "input footprint does not project into the target SRS".to_string(),
        ));
    }
    Ok(world)
}

/// Project an input's pixel extent into the output grid's pixel space.
pub fn footprint_pixel_box(
    input_georef: &Georef,
    extent: &PixelBox,
    to_output_srs: &SrsTransform,
    output_georef: &Georef,
) -> Result<PixelBox> {
    let world = footprint_world_box(input_georef, extent, to_output_srs)?;
    let mut pixels = PixelBox::empty();
    for &(x, y) in &[
        (world.min_x, world.min_y),
        (world.max_x, world.min_y),
        (world.min_x, world.max_y),
        (world.max_x, world.max_y),
    ] {
        let (u, v) = output_georef.world_to_pixel(x, y);
        pixels.grow_to_floor(u, v);
    }
    Ok(pixels)
}

/// Plan the output grid from the input georeferences and the user overrides.
pub fn plan(inputs: &[(Georef, PixelBox)], opts: &GridOptions) -> Result<OutputGrid> {
    let (first_georef, _) = inputs
        .first()
        .ok_or_else(|| MosaicError::Input("empty input set".to_string()))?;

    let target_srs = opts
        .target_srs
        .clone()
        .unwrap_or_else(|| first_georef.srs_wkt.clone());
    let pixel_size = opts.pixel_size.unwrap_or_else(|| first_georef.pixel_width());
    if !(pixel_size > 0.0) || !pixel_size.is_finite() {
        return Err(MosaicError::Config(format!(
            "output pixel size must be positive, got {}",
            pixel_size
        )));
    }

    // Union of all input footprints in the target SRS.
    let mut union = WorldBox::empty();
    for (georef, extent) in inputs {
        let to_target = SrsTransform::new(&georef.srs_wkt, &target_srs)?;
        let footprint = footprint_world_box(georef, extent, &to_target)?;
        union = union.union(&footprint);
    }

    let mut world = match &opts.window {
        Some(window) if opts.force_window => *window,
        Some(window) => union.intersect(window),
        None => union,
    };
    if world.is_empty() {
        return Err(MosaicError::Grid(
            "output window is empty (inputs do not overlap the projection window?)".to_string(),
        ));
    }
    if opts.tap {
        world = world.snap_outward(pixel_size);
        debug!("TAP snapped window to {:?}", world);
    }

    let nodata = opts.output_nodata.unwrap_or(first_georef.nodata);
    let georef = Georef::new(
        target_srs,
        [world.min_x, pixel_size, 0.0, world.max_y, 0.0, -pixel_size],
        nodata,
    )?;

    // Outward-rounded pixel extent; the epsilon keeps exact multiples from
    // gaining a phantom row or column.
    let width = ((world.max_x - world.min_x) / pixel_size - 1e-9).ceil().max(1.0) as i64;
    let height = ((world.max_y - world.min_y) / pixel_size - 1e-9).ceil().max(1.0) as i64;
    let pixels = PixelBox::new(0, 0, width, height);

    let tile_side = resolve_tile_side(opts, pixel_size)?;
    let tiles = partition(&pixels, &georef, tile_side);
    info!(
        "Output grid: {}x{} px at {} units/px, {} tiles of side {}",
        width,
        height,
        pixel_size,
        tiles.len(),
        tile_side
    );

    Ok(OutputGrid {
        georef,
        pixels,
        tile_side,
        tiles,
    })
}

fn resolve_tile_side(opts: &GridOptions, pixel_size: f64) -> Result<usize> {
    if opts.tile_size.is_some() && opts.georef_tile_size.is_some() {
        return Err(MosaicError::Config(
            "--tile-size and --georef-tile-size are mutually exclusive".to_string(),
        ));
    }
    if let Some(side) = opts.tile_size {
        if side == 0 {
            return Err(MosaicError::Config("tile size must be positive".to_string()));
        }
        return Ok(side);
    }
    if let Some(units) = opts.georef_tile_size {
        let side = (units / pixel_size).round().max(1.0) as usize;
        return Ok(side);
    }
    Ok(DEFAULT_TILE_SIDE)
}

/// Partition the pixel box into row-major tiles of at most `side` pixels on
/// each edge. Tiles at the right and bottom edges are clipped.
fn partition(pixels: &PixelBox, georef: &Georef, side: usize) -> Vec<TileSpec> {
    let side = side as i64;
    let tiles_x = (pixels.max_x - pixels.min_x + side - 1) / side;
    let tiles_y = (pixels.max_y - pixels.min_y + side - 1) / side;

    let mut tiles = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let tile_box = PixelBox::new(
                pixels.min_x + tx * side,
                pixels.min_y + ty * side,
                (pixels.min_x + (tx + 1) * side).min(pixels.max_x),
                (pixels.min_y + (ty + 1) * side).min(pixels.max_y),
            );
            let index = tiles.len();
            tiles.push(TileSpec {
                index,
                pixels: tile_box,
                georef: tile_georef(georef, &tile_box),
            });
        }
    }
    tiles
}

/// The output georeference translated to a tile's upper-left pixel.
pub fn tile_georef(output: &Georef, tile_box: &PixelBox) -> Georef {
    let (x0, y0) = output.pixel_to_world(tile_box.min_x as f64, tile_box.min_y as f64);
    let mut transform = output.transform;
    transform[0] = x0;
    transform[3] = y0;
    Georef {
        srs_wkt: output.srs_wkt.clone(),
        transform,
        nodata: output.nodata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn georef(origin_x: f64, origin_y: f64, px: f64) -> Georef {
        Georef::new(
            "EPSG:32633".to_string(),
            [origin_x, px, 0.0, origin_y, 0.0, -px],
            -9999.0,
        )
        .unwrap()
    }

    #[test]
    fn test_plan_single_input_matches_grid() {
        let input = georef(1000.0, 2000.0, 30.0);
        let extent = PixelBox::new(0, 0, 10, 10);
        let grid = plan(&[(input.clone(), extent)], &GridOptions::default()).unwrap();
        assert_eq!(grid.pixels, PixelBox::new(0, 0, 10, 10));
        assert_eq!(grid.georef.transform, input.transform);
        assert_eq!(grid.tiles.len(), 1);
    }

    #[test]
    fn test_plan_union_of_shifted_inputs() {
        let a = georef(1000.0, 2000.0, 30.0);
        let b = georef(1150.0, 2000.0, 30.0); // 5 px east
        let extent = PixelBox::new(0, 0, 10, 10);
        let grid = plan(&[(a, extent), (b, extent)], &GridOptions::default()).unwrap();
        assert_eq!(grid.pixels.width(), 15);
        assert_eq!(grid.pixels.height(), 10);
    }

    #[test]
    fn test_plan_window_intersects_and_forces() {
        let input = georef(0.0, 300.0, 30.0);
        let extent = PixelBox::new(0, 0, 10, 10);
        let window = WorldBox::new(150.0, 0.0, 600.0, 300.0);

        let opts = GridOptions {
            window: Some(window),
            ..Default::default()
        };
        let grid = plan(&[(input.clone(), extent)], &opts).unwrap();
        assert_eq!(grid.pixels.width(), 5); // clipped to the union

        let opts = GridOptions {
            window: Some(window),
            force_window: true,
            ..Default::default()
        };
        let grid = plan(&[(input, extent)], &opts).unwrap();
        assert_eq!(grid.pixels.width(), 15); // window taken verbatim
    }

    #[test]
    fn test_plan_disjoint_window_is_grid_error() {
        let input = georef(0.0, 300.0, 30.0);
        let extent = PixelBox::new(0, 0, 10, 10);
        let opts = GridOptions {
            window: Some(WorldBox::new(10_000.0, 10_000.0, 10_100.0, 10_100.0)),
            ..Default::default()
        };
        assert!(matches!(
            plan(&[(input, extent)], &opts),
            Err(MosaicError::Grid(_))
        ));
    }

    #[test]
    fn test_tap_snaps_outward() {
        let input = Georef::new(
            "EPSG:32633".to_string(),
            [1007.0, 30.0, 0.0, 2011.0, 0.0, -30.0],
            -9999.0,
        )
        .unwrap();
        let extent = PixelBox::new(0, 0, 10, 10);
        let opts = GridOptions {
            tap: true,
            ..Default::default()
        };
        let grid = plan(&[(input, extent)], &opts).unwrap();
        let t = grid.georef.transform;
        assert_eq!(t[0] % 30.0, 0.0);
        assert_eq!(t[3] % 30.0, 0.0);
        // Snapping expands; the grid must still cover the original extent.
        assert!(t[0] <= 1007.0);
        assert!(t[3] >= 2011.0);
        assert!(grid.pixels.width() >= 10);
    }

    #[test]
    fn test_partition_covers_exactly() {
        let output = georef(0.0, 0.0, 1.0);
        let pixels = PixelBox::new(0, 0, 25, 17);
        let tiles = partition(&pixels, &output, 10);
        assert_eq!(tiles.len(), 6); // 3 x 2

        // Every pixel is covered by exactly one tile.
        let mut covered = vec![0u8; pixels.area()];
        for tile in &tiles {
            for y in tile.pixels.min_y..tile.pixels.max_y {
                for x in tile.pixels.min_x..tile.pixels.max_x {
                    covered[(y * 25 + x) as usize] += 1;
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1));

        // Row-major indexing.
        assert_eq!(tiles[0].pixels, PixelBox::new(0, 0, 10, 10));
        assert_eq!(tiles[2].pixels, PixelBox::new(20, 0, 25, 10));
        assert_eq!(tiles[5].pixels, PixelBox::new(20, 10, 25, 17));
    }

    #[test]
    fn test_tile_georef_translation() {
        let output = georef(1000.0, 2000.0, 30.0);
        let tile_box = PixelBox::new(10, 20, 20, 30);
        let tile = tile_georef(&output, &tile_box);
        assert_eq!(tile.transform[0], 1000.0 + 10.0 * 30.0);
        assert_eq!(tile.transform[3], 2000.0 - 20.0 * 30.0);
    }

    #[test]
    fn test_georef_tile_size_converts_to_pixels() {
        let input = georef(0.0, 3000.0, 30.0);
        let extent = PixelBox::new(0, 0, 100, 100);
        let opts = GridOptions {
            georef_tile_size: Some(1500.0),
            ..Default::default()
        };
        let grid = plan(&[(input, extent)], &opts).unwrap();
        assert_eq!(grid.tile_side, 50);
        assert_eq!(grid.tiles.len(), 4);
    }
}
