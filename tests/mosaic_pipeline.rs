//! End-to-end scenarios over the compute pipeline: synthetic DEMs flow
//! through mapping, resampling, weighting, accumulation and post-processing
//! without touching any raster files.

use dem_mosaic::accumulate::{Accumulator, Mode};
use dem_mosaic::geo::{Georef, PixelBox};
use dem_mosaic::input::InputHandle;
use dem_mosaic::postprocess::{self, PostParams};
use dem_mosaic::reproject::{map_crop, resample};
use dem_mosaic::srs::SrsTransform;
use dem_mosaic::weights::{apply_priority, build_weights, priority_weight, WeightParams};
use ndarray::{s, Array2};

const SRS: &str = "EPSG:32633";
const NODATA: f64 = -9999.0;

fn north_up(origin_x: f64, origin_y: f64, px: f64) -> Georef {
    Georef::new(
        SRS.to_string(),
        [origin_x, px, 0.0, origin_y, 0.0, -px],
        NODATA,
    )
    .unwrap()
}

/// A synthetic DEM: a handle plus its full-extent data.
struct Dem {
    handle: InputHandle,
    data: Array2<f64>,
}

fn constant_dem(index: usize, origin_x: f64, origin_y: f64, size: i64, value: f64) -> Dem {
    Dem {
        handle: InputHandle {
            index,
            path: format!("dem-{}.tif", index),
            georef: north_up(origin_x, origin_y, 1.0),
            extent: PixelBox::new(0, 0, size, size),
            footprint: PixelBox::empty(),
        },
        data: Array2::from_elem((size as usize, size as usize), value),
    }
}

/// Reproject a synthetic DEM into the crop box, the way the driver does it
/// but reading from the in-memory array.
fn reproject_dem(dem: &Dem, output: &Georef, crop: &PixelBox) -> Option<Array2<f64>> {
    let mapping = map_crop(output, crop, &dem.handle, &SrsTransform::Identity)
        .unwrap()?;
    let w = mapping.src_window;
    let src = dem
        .data
        .slice(s![
            w.min_y as usize..w.max_y as usize,
            w.min_x as usize..w.max_x as usize
        ])
        .to_owned();
    Some(resample(&mapping, &src, dem.handle.georef.nodata))
}

fn crop(data: &Array2<f64>, from: &PixelBox, to: &PixelBox) -> Array2<f64> {
    let r0 = (to.min_y - from.min_y) as usize;
    let c0 = (to.min_x - from.min_x) as usize;
    data.slice(s![r0..r0 + to.height(), c0..c0 + to.width()])
        .to_owned()
}

/// Blend a set of DEMs over one tile with the given priority setting.
fn blend_tile(
    dems: &[Dem],
    output: &Georef,
    tile: &PixelBox,
    extra_crop: i64,
    priority: Option<f64>,
) -> Array2<f64> {
    let crop_box = tile.expand(extra_crop);
    let params = WeightParams::default();
    let mut acc = Accumulator::new(Mode::Blend, tile.height(), tile.width());
    let footprints: Vec<PixelBox> = dems.iter().map(|d| d.handle.extent).collect();
    for (position, dem) in dems.iter().enumerate() {
        let values = match reproject_dem(dem, output, &crop_box) {
            Some(values) => values,
            None => continue,
        };
        // Identity output grid: the footprint in output pixels is the extent.
        let mut patch = build_weights(&values, &crop_box, &footprints[position], &params);
        if let Some(length) = priority {
            apply_priority(&mut patch, position, dems.len(), length);
        }
        let values = crop(&values, &crop_box, tile);
        let weights = crop(&patch.weights, &crop_box, tile);
        acc.accumulate(&values, Some(&weights), dem.handle.index).unwrap();
    }
    acc.finalize().values
}

fn reduce_tile(dems: &[Dem], output: &Georef, tile: &PixelBox, mode: Mode) -> Array2<f64> {
    let mut acc = Accumulator::new(mode, tile.height(), tile.width());
    for dem in dems {
        if let Some(values) = reproject_dem(dem, output, tile) {
            acc.accumulate(&values, None, dem.handle.index).unwrap();
        }
    }
    acc.finalize().values
}

#[test]
fn blend_of_two_identical_footprints_is_midpoint() {
    let dems = [
        constant_dem(0, 0.0, 10.0, 10, 100.0),
        constant_dem(1, 0.0, 10.0, 10, 200.0),
    ];
    let output = north_up(0.0, 10.0, 1.0);
    let tile = PixelBox::new(0, 0, 10, 10);
    let blended = blend_tile(&dems, &output, &tile, 20, None);
    for &v in blended.iter() {
        assert!((v - 150.0).abs() < 1e-9, "expected 150, got {}", v);
    }
}

#[test]
fn blend_passes_through_where_only_one_input_covers() {
    // Second DEM shifted five pixels east; the outer columns are covered by
    // exactly one input and must carry its value untouched.
    let dems = [
        constant_dem(0, 0.0, 10.0, 10, 100.0),
        constant_dem(1, 5.0, 10.0, 10, 200.0),
    ];
    let output = north_up(0.0, 10.0, 1.0);
    let tile = PixelBox::new(0, 0, 15, 10);
    let blended = blend_tile(&dems, &output, &tile, 20, None);
    assert!((blended[[5, 2]] - 100.0).abs() < 1e-9);
    assert!((blended[[5, 12]] - 200.0).abs() < 1e-9);
    // Overlap pixels lie strictly between the two values.
    let mid = blended[[5, 7]];
    assert!(mid > 100.0 && mid < 200.0);
}

#[test]
fn first_and_last_reductions() {
    let dems = [
        constant_dem(0, 0.0, 10.0, 10, 100.0),
        constant_dem(1, 0.0, 10.0, 10, 200.0),
    ];
    let output = north_up(0.0, 10.0, 1.0);
    let tile = PixelBox::new(0, 0, 10, 10);

    let first = reduce_tile(&dems, &output, &tile, Mode::First);
    let last = reduce_tile(&dems, &output, &tile, Mode::Last);
    for (&f, &l) in first.iter().zip(last.iter()) {
        assert_eq!(f, 100.0);
        assert_eq!(l, 200.0);
    }
}

#[test]
fn mean_and_count_reductions() {
    let dems = [
        constant_dem(0, 0.0, 10.0, 10, 100.0),
        constant_dem(1, 0.0, 10.0, 10, 200.0),
    ];
    let output = north_up(0.0, 10.0, 1.0);
    let tile = PixelBox::new(0, 0, 10, 10);

    let mean = reduce_tile(&dems, &output, &tile, Mode::Mean);
    let count = reduce_tile(&dems, &output, &tile, Mode::Count);
    for (&m, &c) in mean.iter().zip(count.iter()) {
        assert_eq!(m, 150.0);
        assert_eq!(c, 2.0);
    }
}

#[test]
fn priority_with_zero_band_equals_first() {
    let dems = [
        constant_dem(0, 0.0, 10.0, 10, 100.0),
        constant_dem(1, 0.0, 10.0, 10, 200.0),
    ];
    let output = north_up(0.0, 10.0, 1.0);
    let tile = PixelBox::new(0, 0, 10, 10);
    let blended = blend_tile(&dems, &output, &tile, 20, Some(0.0));
    // The saturated weight of the earlier input dominates to within
    // floating rounding.
    for &v in blended.iter() {
        assert!((v - 100.0).abs() < 1e-9, "expected 100, got {}", v);
    }
    assert!(priority_weight(0, 2) > priority_weight(1, 2));
}

#[test]
fn single_input_blend_is_identity() {
    let mut dem = constant_dem(0, 0.0, 10.0, 10, 0.0);
    for ((r, c), v) in dem.data.indexed_iter_mut() {
        *v = (r * 10 + c) as f64;
    }
    let output = north_up(0.0, 10.0, 1.0);
    let tile = PixelBox::new(0, 0, 10, 10);
    let blended = blend_tile(std::slice::from_ref(&dem), &output, &tile, 20, None);
    for (out, expected) in blended.iter().zip(dem.data.iter()) {
        assert!((out - expected).abs() < 1e-9);
    }
}

#[test]
fn erosion_removes_two_pixel_frame() {
    let dem = constant_dem(0, 0.0, 10.0, 10, 50.0);
    let output = north_up(0.0, 10.0, 1.0);
    let tile = PixelBox::new(0, 0, 10, 10);
    let params = PostParams {
        hole_fill_length: 0,
        dem_blur_sigma: 0.0,
        erode_length: 2,
    };

    let patch_box = tile.expand(params.margin());
    let mut values = reproject_dem(&dem, &output, &patch_box).unwrap();
    postprocess::process(&mut values, &params);
    let tile_values = crop(&values, &patch_box, &tile);

    for r in 0..10 {
        for c in 0..10 {
            let interior = (2..8).contains(&r) && (2..8).contains(&c);
            assert_eq!(
                !tile_values[[r, c]].is_nan(),
                interior,
                "unexpected validity at ({}, {})",
                r,
                c
            );
        }
    }
}

#[test]
fn tile_partition_does_not_change_blend() {
    // Two overlapping DEMs, mosaicked as one 15-wide tile and as three
    // 5-wide tiles whose crops cover the whole scene.
    let dems = [
        constant_dem(0, 0.0, 10.0, 10, 120.0),
        constant_dem(1, 5.0, 10.0, 10, 180.0),
    ];
    let output = north_up(0.0, 10.0, 1.0);

    let whole = blend_tile(&dems, &output, &PixelBox::new(0, 0, 15, 10), 30, None);
    for i in 0..3 {
        let tile = PixelBox::new(5 * i, 0, 5 * (i + 1), 10);
        let part = blend_tile(&dems, &output, &tile, 30, None);
        let reference = crop(&whole, &PixelBox::new(0, 0, 15, 10), &tile);
        for (a, b) in part.iter().zip(reference.iter()) {
            match (a.is_nan(), b.is_nan()) {
                (true, true) => {}
                (false, false) => assert!((a - b).abs() < 1e-9),
                _ => panic!("validity mismatch between partitions"),
            }
        }
    }
}
