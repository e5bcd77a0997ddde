use ndarray::Array2;

use crate::error::{MosaicError, Result};

/// NMAD scale factor relating the median absolute deviation to a Gaussian
/// standard deviation.
const NMAD_FACTOR: f64 = 1.4826;

/// Per-pixel combination rule. Blend is the feathered weighted average;
/// everything else is a reduction over the values covering a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Blend,
    First,
    Last,
    Min,
    Max,
    Mean,
    StdDev,
    Median,
    Nmad,
    Count,
}

impl Mode {
    /// Modes that record which input produced each pixel.
    pub fn tracks_index(&self) -> bool {
        matches!(self, Mode::First | Mode::Last | Mode::Min | Mode::Max)
    }

    /// Only blending consults the weight builder.
    pub fn needs_weights(&self) -> bool {
        matches!(self, Mode::Blend)
    }
}

enum State {
    Blend {
        sum_wv: Array2<f64>,
        sum_w: Array2<f64>,
    },
    Pick {
        value: Array2<f64>,
        index: Array2<i32>,
    },
    Moments {
        sum: Array2<f64>,
        sum_sq: Array2<f64>,
        count: Array2<u32>,
    },
    Samples {
        samples: Vec<Vec<f64>>,
        cols: usize,
    },
}

/// Folds per-input patches into the final tile, in input order.
/// Values use NaN as the invalid marker throughout.
pub struct Accumulator {
    mode: Mode,
    rows: usize,
    cols: usize,
    state: State,
}

/// Finalized tile: values (NaN where nodata) and, for the index-tracking
/// modes, the winning input index per pixel (-1 where nodata).
pub struct FinishedTile {
    pub values: Array2<f64>,
    pub index_map: Option<Array2<i32>>,
}

impl Accumulator {
    pub fn new(mode: Mode, rows: usize, cols: usize) -> Self {
        let state = match mode {
            Mode::Blend => State::Blend {
                sum_wv: Array2::zeros((rows, cols)),
                sum_w: Array2::zeros((rows, cols)),
            },
            Mode::First | Mode::Last | Mode::Min | Mode::Max => State::Pick {
                value: Array2::from_elem((rows, cols), f64::NAN),
                index: Array2::from_elem((rows, cols), -1),
            },
            Mode::Mean | Mode::StdDev | Mode::Count => State::Moments {
                sum: Array2::zeros((rows, cols)),
                sum_sq: Array2::zeros((rows, cols)),
                count: Array2::zeros((rows, cols)),
            },
            Mode::Median | Mode::Nmad => State::Samples {
                samples: vec![Vec::new(); rows * cols],
                cols,
            },
        };
        Self {
            mode,
            rows,
            cols,
            state,
        }
    }

    /// Fold one input's patch. `weights` is required in blend mode and
    /// ignored otherwise; `input_index` is the input's position in the
    /// original input list.
    pub fn accumulate(
        &mut self,
        values: &Array2<f64>,
        weights: Option<&Array2<f64>>,
        input_index: usize,
    ) -> Result<()> {
        if values.dim() != (self.rows, self.cols) {
            return Err(MosaicError::Internal(format!(
                "patch shape {:?} does not match tile {}x{}",
                values.dim(),
                self.rows,
                self.cols
            )));
        }
        match &mut self.state {
            State::Blend { sum_wv, sum_w } => {
                let weights = weights.ok_or_else(|| {
                    MosaicError::Internal("blend accumulation without weights".to_string())
                })?;
                for ((r, c), &v) in values.indexed_iter() {
                    if v.is_nan() {
                        continue;
                    }
                    let w = weights[[r, c]];
                    if w > 0.0 {
                        sum_wv[[r, c]] += w * v;
                        sum_w[[r, c]] += w;
                    }
                }
            }
            State::Pick { value, index } => {
                for ((r, c), &v) in values.indexed_iter() {
                    if v.is_nan() {
                        continue;
                    }
                    let current = value[[r, c]];
                    let take = match self.mode {
                        Mode::First => current.is_nan(),
                        Mode::Last => true,
                        Mode::Min => current.is_nan() || v < current,
                        Mode::Max => current.is_nan() || v > current,
                        _ => unreachable!(),
                    };
                    if take {
                        value[[r, c]] = v;
                        index[[r, c]] = input_index as i32;
                    }
                }
            }
            State::Moments { sum, sum_sq, count } => {
                for ((r, c), &v) in values.indexed_iter() {
                    if v.is_nan() {
                        continue;
                    }
                    sum[[r, c]] += v;
                    sum_sq[[r, c]] += v * v;
                    count[[r, c]] += 1;
                }
            }
            State::Samples { samples, cols } => {
                for ((r, c), &v) in values.indexed_iter() {
                    if v.is_nan() {
                        continue;
                    }
                    samples[r * *cols + c].push(v);
                }
            }
        }
        Ok(())
    }

    pub fn finalize(self) -> FinishedTile {
        let (rows, cols) = (self.rows, self.cols);
        match self.state {
            State::Blend { sum_wv, sum_w } => {
                let mut values = Array2::from_elem((rows, cols), f64::NAN);
                for ((r, c), &w) in sum_w.indexed_iter() {
                    if w > 0.0 {
                        values[[r, c]] = sum_wv[[r, c]] / w;
                    }
                }
                FinishedTile {
                    values,
                    index_map: None,
                }
            }
            State::Pick { value, index } => FinishedTile {
                values: value,
                index_map: Some(index),
            },
            State::Moments { sum, sum_sq, count } => {
                let mut values = Array2::from_elem((rows, cols), f64::NAN);
                for ((r, c), &n) in count.indexed_iter() {
                    match self.mode {
                        Mode::Count => {
                            values[[r, c]] = n as f64;
                        }
                        Mode::Mean => {
                            if n > 0 {
                                values[[r, c]] = sum[[r, c]] / n as f64;
                            }
                        }
                        Mode::StdDev => {
                            // Population variance; fewer than two samples
                            // degrade to nodata rather than an error.
                            if n >= 2 {
                                let nf = n as f64;
                                let mean = sum[[r, c]] / nf;
                                let var = sum_sq[[r, c]] / nf - mean * mean;
                                values[[r, c]] = var.max(0.0).sqrt();
                            }
                        }
                        _ => unreachable!(),
                    }
                }
                FinishedTile {
                    values,
                    index_map: None,
                }
            }
            State::Samples { mut samples, cols } => {
                let mut values = Array2::from_elem((rows, cols), f64::NAN);
                for r in 0..rows {
                    for c in 0..cols {
                        let cell = &mut samples[r * cols + c];
                        if cell.is_empty() {
                            continue;
                        }
                        values[[r, c]] = match self.mode {
                            Mode::Median => median(cell),
                            Mode::Nmad => {
                                let med = median(cell);
                                let mut deviations: Vec<f64> =
                                    cell.iter().map(|v| (v - med).abs()).collect();
                                NMAD_FACTOR * median(&mut deviations)
                            }
                            _ => unreachable!(),
                        };
                    }
                }
                FinishedTile {
                    values,
                    index_map: None,
                }
            }
        }
    }
}

/// Median of a non-empty sample list; averages the two middles for even
/// counts. Reorders the slice.
fn median(samples: &mut [f64]) -> f64 {
    samples.sort_unstable_by(|a, b| a.partial_cmp(b).expect("NaN sample"));
    let n = samples.len();
    if n % 2 == 1 {
        samples[n / 2]
    } else {
        0.5 * (samples[n / 2 - 1] + samples[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn patch(value: f64) -> Array2<f64> {
        Array2::from_elem((2, 2), value)
    }

    fn uniform_weights() -> Array2<f64> {
        Array2::from_elem((2, 2), 1.0)
    }

    #[test]
    fn test_blend_equal_weights_averages() {
        let mut acc = Accumulator::new(Mode::Blend, 2, 2);
        let w = uniform_weights();
        acc.accumulate(&patch(100.0), Some(&w), 0).unwrap();
        acc.accumulate(&patch(200.0), Some(&w), 1).unwrap();
        let tile = acc.finalize();
        assert_eq!(tile.values[[0, 0]], 150.0);
    }

    #[test]
    fn test_blend_single_input_passes_through() {
        let mut acc = Accumulator::new(Mode::Blend, 2, 2);
        let w = Array2::from_elem((2, 2), 17.5);
        acc.accumulate(&patch(42.0), Some(&w), 0).unwrap();
        let tile = acc.finalize();
        // Weights cancel when only one input covers a pixel.
        assert_eq!(tile.values[[1, 1]], 42.0);
    }

    #[test]
    fn test_blend_zero_weight_sum_is_nodata() {
        let acc = Accumulator::new(Mode::Blend, 2, 2);
        let tile = acc.finalize();
        assert!(tile.values[[0, 0]].is_nan());
    }

    #[test]
    fn test_first_and_last() {
        let mut first = Accumulator::new(Mode::First, 2, 2);
        let mut last = Accumulator::new(Mode::Last, 2, 2);
        for (k, v) in [(0, 100.0), (1, 200.0)] {
            first.accumulate(&patch(v), None, k).unwrap();
            last.accumulate(&patch(v), None, k).unwrap();
        }
        let first = first.finalize();
        let last = last.finalize();
        assert_eq!(first.values[[0, 0]], 100.0);
        assert_eq!(last.values[[0, 0]], 200.0);
        assert_eq!(first.index_map.unwrap()[[0, 0]], 0);
        assert_eq!(last.index_map.unwrap()[[0, 0]], 1);
    }

    #[test]
    fn test_first_skips_nodata_then_takes_next() {
        let mut acc = Accumulator::new(Mode::First, 2, 2);
        let mut gap = patch(100.0);
        gap[[0, 1]] = f64::NAN;
        acc.accumulate(&gap, None, 0).unwrap();
        acc.accumulate(&patch(200.0), None, 1).unwrap();
        let tile = acc.finalize();
        assert_eq!(tile.values[[0, 0]], 100.0);
        assert_eq!(tile.values[[0, 1]], 200.0);
        let index = tile.index_map.unwrap();
        assert_eq!(index[[0, 0]], 0);
        assert_eq!(index[[0, 1]], 1);
    }

    #[test]
    fn test_min_max_ties_keep_earlier() {
        let mut min = Accumulator::new(Mode::Min, 2, 2);
        let mut max = Accumulator::new(Mode::Max, 2, 2);
        for (k, v) in [(0, 5.0), (1, 5.0)] {
            min.accumulate(&patch(v), None, k).unwrap();
            max.accumulate(&patch(v), None, k).unwrap();
        }
        assert_eq!(min.finalize().index_map.unwrap()[[0, 0]], 0);
        assert_eq!(max.finalize().index_map.unwrap()[[0, 0]], 0);
    }

    #[test]
    fn test_min_max_values() {
        let mut min = Accumulator::new(Mode::Min, 2, 2);
        let mut max = Accumulator::new(Mode::Max, 2, 2);
        for (k, v) in [(0, 7.0), (1, 3.0), (2, 9.0)] {
            min.accumulate(&patch(v), None, k).unwrap();
            max.accumulate(&patch(v), None, k).unwrap();
        }
        let min = min.finalize();
        let max = max.finalize();
        assert_eq!(min.values[[0, 0]], 3.0);
        assert_eq!(max.values[[0, 0]], 9.0);
        assert_eq!(min.index_map.unwrap()[[0, 0]], 1);
        assert_eq!(max.index_map.unwrap()[[0, 0]], 2);
    }

    #[test]
    fn test_mean_and_count() {
        let mut mean = Accumulator::new(Mode::Mean, 2, 2);
        let mut count = Accumulator::new(Mode::Count, 2, 2);
        for (k, v) in [(0, 100.0), (1, 200.0)] {
            mean.accumulate(&patch(v), None, k).unwrap();
            count.accumulate(&patch(v), None, k).unwrap();
        }
        assert_eq!(mean.finalize().values[[0, 0]], 150.0);
        assert_eq!(count.finalize().values[[0, 0]], 2.0);
    }

    #[test]
    fn test_count_zero_where_uncovered() {
        let mut acc = Accumulator::new(Mode::Count, 2, 2);
        let mut gap = patch(1.0);
        gap[[1, 0]] = f64::NAN;
        acc.accumulate(&gap, None, 0).unwrap();
        let tile = acc.finalize();
        assert_eq!(tile.values[[1, 0]], 0.0);
        assert_eq!(tile.values[[0, 0]], 1.0);
    }

    #[test]
    fn test_stddev_needs_two_samples() {
        let mut acc = Accumulator::new(Mode::StdDev, 2, 2);
        acc.accumulate(&patch(5.0), None, 0).unwrap();
        let tile = acc.finalize();
        assert!(tile.values[[0, 0]].is_nan());

        let mut acc = Accumulator::new(Mode::StdDev, 2, 2);
        acc.accumulate(&patch(4.0), None, 0).unwrap();
        acc.accumulate(&patch(8.0), None, 1).unwrap();
        let tile = acc.finalize();
        // Population stddev of {4, 8} is 2.
        assert!((tile.values[[0, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_median_odd_and_even() {
        let mut acc = Accumulator::new(Mode::Median, 1, 1);
        for (k, v) in [(0, 9.0), (1, 1.0), (2, 5.0)] {
            acc.accumulate(&arr2(&[[v]]), None, k).unwrap();
        }
        assert_eq!(acc.finalize().values[[0, 0]], 5.0);

        let mut acc = Accumulator::new(Mode::Median, 1, 1);
        for (k, v) in [(0, 1.0), (1, 2.0), (2, 10.0), (3, 20.0)] {
            acc.accumulate(&arr2(&[[v]]), None, k).unwrap();
        }
        assert_eq!(acc.finalize().values[[0, 0]], 6.0);
    }

    #[test]
    fn test_nmad_of_constant_is_zero() {
        let mut acc = Accumulator::new(Mode::Nmad, 1, 1);
        for k in 0..4 {
            acc.accumulate(&arr2(&[[7.0]]), None, k).unwrap();
        }
        assert_eq!(acc.finalize().values[[0, 0]], 0.0);
    }

    #[test]
    fn test_nmad_scales_deviations() {
        let mut acc = Accumulator::new(Mode::Nmad, 1, 1);
        for (k, v) in [(0, 10.0), (1, 12.0), (2, 14.0)] {
            acc.accumulate(&arr2(&[[v]]), None, k).unwrap();
        }
        // Deviations from the median 12 are {2, 0, 2}; their median is 2.
        let tile = acc.finalize();
        assert!((tile.values[[0, 0]] - 2.0 * NMAD_FACTOR).abs() < 1e-12);
    }
}
