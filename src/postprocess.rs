use ndarray::Array2;

use crate::weights::masked_blur;

#[derive(Debug, Clone, Default)]
pub struct PostParams {
    pub hole_fill_length: usize,
    pub dem_blur_sigma: f64,
    pub erode_length: usize,
}

impl PostParams {
    pub fn is_noop(&self) -> bool {
        self.hole_fill_length == 0 && self.dem_blur_sigma <= 0.0 && self.erode_length == 0
    }

    /// Extra context (in pixels) a tile needs so these steps give the same
    /// result regardless of how the output was partitioned.
    pub fn margin(&self) -> i64 {
        if self.is_noop() {
            return 0;
        }
        self.hole_fill_length as i64
            + self.erode_length as i64
            + (3.0 * self.dem_blur_sigma).ceil() as i64
    }
}

/// Apply hole filling, blur and erosion, in that fixed order.
pub fn process(values: &mut Array2<f64>, params: &PostParams) {
    if params.hole_fill_length > 0 {
        fill_holes(values, params.hole_fill_length);
    }
    if params.dem_blur_sigma > 0.0 {
        blur_dem(values, params.dem_blur_sigma);
    }
    if params.erode_length > 0 {
        erode(values, params.erode_length);
    }
}

/// Fill 4-connected nodata regions whose bounding box is at most
/// `max_length` pixels across by averaging the valid border inward, one
/// frontier ring at a time. Regions touching the array border are left
/// alone since their true extent is unknown.
pub fn fill_holes(values: &mut Array2<f64>, max_length: usize) {
    let (rows, cols) = values.dim();
    let mut visited = Array2::from_elem((rows, cols), false);

    for start_r in 0..rows {
        for start_c in 0..cols {
            if visited[[start_r, start_c]] || !values[[start_r, start_c]].is_nan() {
                continue;
            }
            // Flood-fill the component, tracking its bounding box.
            let mut component = Vec::new();
            let mut stack = vec![(start_r, start_c)];
            visited[[start_r, start_c]] = true;
            let (mut min_r, mut max_r, mut min_c, mut max_c) =
                (start_r, start_r, start_c, start_c);
            let mut touches_border = false;
            while let Some((r, c)) = stack.pop() {
                component.push((r, c));
                min_r = min_r.min(r);
                max_r = max_r.max(r);
                min_c = min_c.min(c);
                max_c = max_c.max(c);
                if r == 0 || c == 0 || r == rows - 1 || c == cols - 1 {
                    touches_border = true;
                }
                for (dr, dc) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                    let rr = r as i64 + dr;
                    let cc = c as i64 + dc;
                    if rr < 0 || cc < 0 || rr >= rows as i64 || cc >= cols as i64 {
                        continue;
                    }
                    let (rr, cc) = (rr as usize, cc as usize);
                    if !visited[[rr, cc]] && values[[rr, cc]].is_nan() {
                        visited[[rr, cc]] = true;
                        stack.push((rr, cc));
                    }
                }
            }

            let extent = (max_r - min_r + 1).max(max_c - min_c + 1);
            if touches_border || extent > max_length {
                continue;
            }
            fill_component(values, &mut component);
        }
    }
}

/// Grow values into the hole ring by ring; each pass sets the frontier
/// cells to the average of their already-valid 8-neighbors.
fn fill_component(values: &mut Array2<f64>, remaining: &mut Vec<(usize, usize)>) {
    let (rows, cols) = values.dim();
    while !remaining.is_empty() {
        let mut frontier = Vec::new();
        for &(r, c) in remaining.iter() {
            let mut sum = 0.0;
            let mut n = 0;
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
                    let v = values[[rr as usize, cc as usize]];
                    if !v.is_nan() {
                        sum += v;
                        n += 1;
                    }
                }
            }
            if n > 0 {
                frontier.push((r, c, sum / n as f64));
            }
        }
        if frontier.is_empty() {
            break;
        }
        for &(r, c, v) in &frontier {
            values[[r, c]] = v;
        }
        remaining.retain(|&(r, c)| values[[r, c]].is_nan());
    }
}

/// Nodata-ignoring Gaussian blur of the DEM itself.
pub fn blur_dem(values: &mut Array2<f64>, sigma: f64) {
    let mask = values.map(|v| !v.is_nan());
    let filled = values.map(|v| if v.is_nan() { 0.0 } else { *v });
    let blurred = masked_blur(&filled, &mask, sigma);
    for ((r, c), value) in values.indexed_iter_mut() {
        if mask[[r, c]] {
            *value = blurred[[r, c]];
        }
    }
}

/// Morphological erosion of the valid mask: `iterations` passes, each
/// invalidating valid cells with a 4-connected nodata neighbor. The array
/// border itself does not seed erosion.
pub fn erode(values: &mut Array2<f64>, iterations: usize) {
    let (rows, cols) = values.dim();
    for _ in 0..iterations {
        let mut doomed = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                if values[[r, c]].is_nan() {
                    continue;
                }
                let mut boundary = false;
                for (dr, dc) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                    let rr = r as i64 + dr;
                    let cc = c as i64 + dc;
                    if rr < 0 || cc < 0 || rr >= rows as i64 || cc >= cols as i64 {
                        continue;
                    }
                    if values[[rr as usize, cc as usize]].is_nan() {
                        boundary = true;
                        break;
                    }
                }
                if boundary {
                    doomed.push((r, c));
                }
            }
        }
        if doomed.is_empty() {
            break;
        }
        for (r, c) in doomed {
            values[[r, c]] = f64::NAN;
        }
    }
}
