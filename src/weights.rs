use ndarray::Array2;

use crate::geo::PixelBox;

const INF: f64 = 1e20;

/// Cap on boundary distances so footprints much larger than the crop region
/// stay finite through the exponent step.
const DIST_CAP: f64 = 1e6;

#[derive(Debug, Clone)]
pub struct WeightParams {
    pub blur_sigma: f64,
    pub exponent: f64,
    pub use_centerline: bool,
}

impl Default for WeightParams {
    fn default() -> Self {
        Self {
            blur_sigma: 5.0,
            exponent: 2.0,
            use_centerline: false,
        }
    }
}

/// Per-input weights over a crop box, plus the raw boundary distances the
/// priority remap ramps on.
pub struct WeightPatch {
    pub weights: Array2<f64>,
    pub boundary_distance: Array2<f64>,
}

/// Build the blending weights for one reprojected patch.
///
/// `crop` locates the patch in output pixel space and `footprint` is the
/// input's full extent there; distances are clamped against the footprint
/// edge so the input's natural boundary drives the weights even when it
/// lies outside the crop.
pub fn build_weights(
    values: &Array2<f64>,
    crop: &PixelBox,
    footprint: &PixelBox,
    params: &WeightParams,
) -> WeightPatch {
    let mask = values.map(|v| !v.is_nan());
    let mut distance = distance_transform(&mask);
    clamp_to_footprint(&mut distance, crop, footprint);

    let mut weights = if params.use_centerline {
        centerline_weights(&distance, &mask)
    } else {
        distance.clone()
    };

    if params.exponent != 1.0 {
        for w in weights.iter_mut() {
            if *w > 0.0 {
                *w = w.powf(params.exponent);
            }
        }
    }

    if params.blur_sigma > 0.0 {
        weights = masked_blur(&weights, &mask, params.blur_sigma);
    }

    WeightPatch {
        weights,
        boundary_distance: distance,
    }
}

/// Euclidean distance (in pixels) from each valid cell to the nearest
/// invalid cell, via the two-pass lower-envelope transform on squared
/// distances. Invalid cells get 0; a patch with no invalid cells gets the
/// cap everywhere.
pub fn distance_transform(mask: &Array2<bool>) -> Array2<f64> {
    let (rows, cols) = mask.dim();
    let mut sq = Array2::from_elem((rows, cols), 0.0);
    for ((r, c), &valid) in mask.indexed_iter() {
        sq[[r, c]] = if valid { INF } else { 0.0 };
    }

    // Column pass then row pass; each runs the 1D squared transform.
    let mut f = vec![0.0; rows.max(cols)];
    let mut d = vec![0.0; rows.max(cols)];
    for c in 0..cols {
        for r in 0..rows {
            f[r] = sq[[r, c]];
        }
        edt_1d_sq(&f[..rows], &mut d[..rows]);
        for r in 0..rows {
            sq[[r, c]] = d[r];
        }
    }
    for r in 0..rows {
        for c in 0..cols {
            f[c] = sq[[r, c]];
        }
        edt_1d_sq(&f[..cols], &mut d[..cols]);
        for c in 0..cols {
            sq[[r, c]] = d[c];
        }
    }

    sq.map(|&s| s.sqrt().min(DIST_CAP))
}

/// 1D squared distance transform (lower envelope of parabolas).
fn edt_1d_sq(f: &[f64], d: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    z[0] = -INF;
    z[1] = INF;
    for q in 1..n {
        loop {
            let p = v[k];
            let s = (f[q] + (q * q) as f64 - f[p] - (p * p) as f64)
                / (2.0 * (q as f64 - p as f64));
            if s <= z[k] {
                k -= 1;
            } else {
                k += 1;
                v[k] = q;
                z[k] = s;
                z[k + 1] = INF;
                break;
            }
        }
    }
    k = 0;
    for q in 0..n {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let p = v[k];
        d[q] = (q as f64 - p as f64).powi(2) + f[p];
    }
}

/// Clamp each cell's distance by its analytic distance to the edge of the
/// input's full footprint box, so the crop border is not mistaken for a
/// data boundary.
fn clamp_to_footprint(distance: &mut Array2<f64>, crop: &PixelBox, footprint: &PixelBox) {
    let (rows, cols) = distance.dim();
    for r in 0..rows {
        let y = crop.min_y + r as i64;
        let dy = (y - footprint.min_y).min(footprint.max_y - 1 - y);
        for c in 0..cols {
            let x = crop.min_x + c as i64;
            let dx = (x - footprint.min_x).min(footprint.max_x - 1 - x);
            let edge = (dx.min(dy) + 1).max(0) as f64;
            let cell = &mut distance[[r, c]];
            if *cell > edge {
                *cell = edge;
            }
        }
    }
}

/// Centerline weights: distance-to-boundary over distance-to-medial-axis,
/// in [0, 1] and rising to 1 along the skeleton. The medial axis is
/// approximated by the local maxima of the distance transform.
fn centerline_weights(distance: &Array2<f64>, mask: &Array2<bool>) -> Array2<f64> {
    let (rows, cols) = distance.dim();

    // Medial cells: valid local maxima of the distance transform over the
    // 8-neighborhood (plateaus count).
    let mut medial = Array2::from_elem((rows, cols), false);
    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] {
                continue;
            }
            let here = distance[[r, c]];
            let mut is_max = true;
            for dr in -1i64..=1 {
                for dc in -1i64..=1 {
                    if dr == 0 && dc == 0 {
                        continue;
                    }
                    let rr = r as i64 + dr;
                    let cc = c as i64 + dc;
                    if rr < 0 || cc < 0 || rr >= rows as i64 || cc >= cols as i64 {
                        continue;
                    }
                    if distance[[rr as usize, cc as usize]] > here {
                        is_max = false;
                    }
                }
            }
            medial[[r, c]] = is_max;
        }
    }

    // Distance to the medial axis: transform with the medial cells invalid.
    let to_medial = distance_transform(&medial.map(|&m| !m));

    let mut weights = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] {
                continue;
            }
            let db = distance[[r, c]];
            let dc = to_medial[[r, c]];
            if db + dc > 0.0 {
                weights[[r, c]] = db / (db + dc);
            }
        }
    }
    weights
}

/// Gaussian blur that ignores invalid cells: the ratio of two separable
/// convolutions (masked weights over mask) renormalizes around holes.
/// Invalid cells stay exactly zero.
pub fn masked_blur(weights: &Array2<f64>, mask: &Array2<bool>, sigma: f64) -> Array2<f64> {
    let kernel = gaussian_kernel(sigma);
    let mask_f = mask.map(|&m| if m { 1.0 } else { 0.0 });
    let num = convolve_separable(weights, &kernel);
    let den = convolve_separable(&mask_f, &kernel);

    let (rows, cols) = weights.dim();
    let mut out = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            if mask[[r, c]] && den[[r, c]] > 0.0 {
                out[[r, c]] = num[[r, c]] / den[[r, c]];
            }
        }
    }
    out
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    for i in 0..=2 * radius {
        let x = i as f64 - radius as f64;
        kernel.push((-x * x / (2.0 * sigma * sigma)).exp());
    }
    let sum: f64 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Separable convolution with zero padding, horizontal then vertical.
fn convolve_separable(data: &Array2<f64>, kernel: &[f64]) -> Array2<f64> {
    let (rows, cols) = data.dim();
    let radius = kernel.len() / 2;
    let mut horizontal = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for (i, &k) in kernel.iter().enumerate() {
                let cc = c as i64 + i as i64 - radius as i64;
                if cc >= 0 && cc < cols as i64 {
                    acc += k * data[[r, cc as usize]];
                }
            }
            horizontal[[r, c]] = acc;
        }
    }
    let mut out = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for (i, &k) in kernel.iter().enumerate() {
                let rr = r as i64 + i as i64 - radius as i64;
                if rr >= 0 && rr < rows as i64 {
                    acc += k * horizontal[[rr as usize, c]];
                }
            }
            out[[r, c]] = acc;
        }
    }
    out
}

/// Saturated weight for priority blending. Earlier inputs get weights so
/// much larger than later ones that interior pixels reduce to the earlier
/// value within floating rounding; the exponent step shrinks when many
/// inputs share a tile so the largest weight stays finite.
pub fn priority_weight(position: usize, total: usize) -> f64 {
    let step = (960 / total.max(1)).clamp(1, 60) as f64;
    (2.0f64).powf(step * (total - position) as f64)
}

/// Remap weights for priority blending: interior cells saturate at the
/// input's priority weight, cells within `length` of the boundary ramp
/// linearly down to the feathered weight.
pub fn apply_priority(
    patch: &mut WeightPatch,
    position: usize,
    total: usize,
    length: f64,
) {
    let saturated = priority_weight(position, total);
    let (rows, cols) = patch.weights.dim();
    for r in 0..rows {
        for c in 0..cols {
            let w = patch.weights[[r, c]];
            if w <= 0.0 {
                continue;
            }
            let db = patch.boundary_distance[[r, c]];
            let t = if length > 0.0 {
                (db / length).min(1.0)
            } else if db > 0.0 {
                1.0
            } else {
                0.0
            };
            patch.weights[[r, c]] = t * saturated + (1.0 - t) * w;
        }
    }
}
