use ndarray::Array2;

use crate::error::Result;
use crate::geo::{Georef, PixelBox};
use crate::input::{InputHandle, InputIndex};
use crate::srs::SrsTransform;

/// Inverse mapping of an output crop box into one input's pixel grid.
///
/// `u`/`v` hold center-based fractional input pixel coordinates per output
/// cell (NaN where the coordinate transform failed); `src_window` is the
/// minimal input window that covers the bilinear support of every mapped
/// cell, clipped to the input extent.
pub struct Mapping {
    pub crop: PixelBox,
    pub u: Array2<f64>,
    pub v: Array2<f64>,
    pub src_window: PixelBox,
    pub input_extent: PixelBox,
}

/// Map every pixel of `crop` (output pixel space) back into the input.
/// Returns None when no output pixel lands inside the input.
pub fn map_crop(
    output: &Georef,
    crop: &PixelBox,
    input: &InputHandle,
    to_input: &SrsTransform,
) -> Result<Option<Mapping>> {
    let rows = crop.height();
    let cols = crop.width();

    // World coordinates of all output pixel centers, transformed in one
    // batch; a batch failure falls back to per-point transforms so a few
    // out-of-domain pixels do not void the whole crop.
    let mut xs = Vec::with_capacity(rows * cols);
    let mut ys = Vec::with_capacity(rows * cols);
    for y in crop.min_y..crop.max_y {
        for x in crop.min_x..crop.max_x {
            let (wx, wy) = output.pixel_to_world(x as f64 + 0.5, y as f64 + 0.5);
            xs.push(wx);
            ys.push(wy);
        }
    }
    if !matches!(to_input, SrsTransform::Identity) {
        let mut txs = xs.clone();
        let mut tys = ys.clone();
        if to_input.apply_slice(&mut txs, &mut tys).is_ok() {
            xs = txs;
            ys = tys;
        } else {
            for i in 0..xs.len() {
                match to_input.apply(xs[i], ys[i]) {
                    Ok((x, y)) => {
                        xs[i] = x;
                        ys[i] = y;
                    }
                    Err(_) => {
                        xs[i] = f64::NAN;
                        ys[i] = f64::NAN;
                    }
                }
            }
        }
    }

    let max_u = (input.extent.width() as f64) - 1.0;
    let max_v = (input.extent.height() as f64) - 1.0;
    let mut u = Array2::from_elem((rows, cols), f64::NAN);
    let mut v = Array2::from_elem((rows, cols), f64::NAN);
    let mut src_window = PixelBox::empty();
    for row in 0..rows {
        for col in 0..cols {
            let i = row * cols + col;
            if !xs[i].is_finite() || !ys[i].is_finite() {
                continue;
            }
            let (uf, vf) = input.georef.world_to_pixel(xs[i], ys[i]);
            // Center-based coordinates: integer values sit on pixel centers.
            let uc = uf - 0.5;
            let vc = vf - 0.5;
            u[[row, col]] = uc;
            v[[row, col]] = vc;
            if uc >= 0.0 && uc <= max_u && vc >= 0.0 && vc <= max_v {
                let col0 = uc.floor() as i64;
                let row0 = vc.floor() as i64;
                src_window.grow_to(col0, row0);
                src_window.grow_to((col0 + 1).min(input.extent.max_x - 1), (row0 + 1).min(input.extent.max_y - 1));
            }
        }
    }
    if src_window.is_empty() {
        return Ok(None);
    }
    Ok(Some(Mapping {
        crop: *crop,
        u,
        v,
        src_window: src_window.intersect(&input.extent),
        input_extent: input.extent,
    }))
}

/// Bilinear resampling of the mapped cells from the source block.
///
/// `src` covers `mapping.src_window`; `nodata` is the source sentinel.
/// The result is aligned to the crop box and uses NaN for invalid cells.
/// Any nodata value among the contributing neighbors makes the output cell
/// invalid; an exactly grid-aligned sample touches only one source pixel, so
/// copying a raster onto its own grid is lossless.
pub fn resample(mapping: &Mapping, src: &Array2<f64>, nodata: f64) -> Array2<f64> {
    let rows = mapping.crop.height();
    let cols = mapping.crop.width();
    let max_u = (mapping.input_extent.width() as f64) - 1.0;
    let max_v = (mapping.input_extent.height() as f64) - 1.0;
    let mut out = Array2::from_elem((rows, cols), f64::NAN);

    for row in 0..rows {
        for col in 0..cols {
            let u = mapping.u[[row, col]];
            let v = mapping.v[[row, col]];
            if !u.is_finite() || !v.is_finite() {
                continue;
            }
            if u < 0.0 || u > max_u || v < 0.0 || v > max_v {
                continue;
            }
            let col0 = u.floor() as i64;
            let row0 = v.floor() as i64;
            let fx = u - col0 as f64;
            let fy = v - row0 as f64;
            let col1 = if fx > 0.0 { col0 + 1 } else { col0 };
            let row1 = if fy > 0.0 { row0 + 1 } else { row0 };

            let sample = |r: i64, c: i64| -> Option<f64> {
                let rr = r - mapping.src_window.min_y;
                let cc = c - mapping.src_window.min_x;
                if rr < 0
                    || cc < 0
                    || rr >= src.nrows() as i64
                    || cc >= src.ncols() as i64
                {
                    return None;
                }
                let value = src[[rr as usize, cc as usize]];
                if value.is_nan() || value == nodata {
                    None
                } else {
                    Some(value)
                }
            };

            let (v00, v01, v10, v11) = match (
                sample(row0, col0),
                sample(row0, col1),
                sample(row1, col0),
                sample(row1, col1),
            ) {
                (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
                _ => continue,
            };

            out[[row, col]] = v00 * (1.0 - fy) * (1.0 - fx)
                + v01 * (1.0 - fy) * fx
                + v10 * fy * (1.0 - fx)
                + v11 * fy * fx;
        }
    }
    out
}

/// Reproject one input into the crop box: map, read the minimal source
/// window, resample. Returns None when the input does not touch the crop.
pub fn reproject_input(
    index: &InputIndex,
    handle: &InputHandle,
    output: &Georef,
    crop: &PixelBox,
) -> Result<Option<Array2<f64>>> {
    let to_input = SrsTransform::new(&output.srs_wkt, &handle.georef.srs_wkt)?;
    let mapping = match map_crop(output, crop, handle, &to_input)? {
        Some(mapping) => mapping,
        None => return Ok(None),
    };
    let src = index.read_block(handle, &mapping.src_window)?;
    Ok(Some(resample(&mapping, &src, handle.georef.nodata)))
}
