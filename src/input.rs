use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use gdal::Dataset;
use log::{debug, info, warn};
use ndarray::Array2;

use crate::error::{MosaicError, Result};
use crate::geo::{Georef, PixelBox};
use crate::grid::footprint_pixel_box;
use crate::srs::SrsTransform;

/// Nodata sentinel for inputs that declare none.
pub const DEFAULT_NODATA: f64 = f32::MIN as f64;

/// Upper bound on simultaneously open input datasets.
pub const MAX_OPEN_READERS: usize = 200;

/// Metadata handle for one input DEM. Immutable after registration; the
/// dataset itself is opened lazily through the reader pool.
#[derive(Debug, Clone)]
pub struct InputHandle {
    pub index: usize,
    pub path: String,
    pub georef: Georef,
    /// Full pixel extent of the input.
    pub extent: PixelBox,
    /// Extent projected into the output grid's pixel space.
    pub footprint: PixelBox,
}

/// The set of registered inputs plus the bounded pool of open readers.
pub struct InputIndex {
    handles: Vec<InputHandle>,
    pool: ReaderPool,
    nodata_threshold: Option<f64>,
}

impl InputIndex {
    /// Open each input once to register its georeference, extent and nodata
    /// value, then close it again. Inputs too numerous to keep open are
    /// re-opened on demand through the pool.
    pub fn open(paths: &[String], nodata_threshold: Option<f64>) -> Result<Self> {
        if paths.is_empty() {
            return Err(MosaicError::Input("empty input set".to_string()));
        }
        let mut handles = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let dataset = Dataset::open(path)
                .map_err(|e| MosaicError::Input(format!("cannot open {}: {}", path, e)))?;
            let projection = dataset.projection();
            if projection.trim().is_empty() {
                return Err(MosaicError::Input(format!(
                    "{} has no spatial reference system",
                    path
                )));
            }
            let transform = dataset.geo_transform().map_err(|e| {
                MosaicError::Input(format!("{} has no georeference: {}", path, e))
            })?;
            let band = dataset.rasterband(1)?;
            let nodata = match band.no_data_value() {
                Some(value) => value,
                None => {
                    warn!("{} declares no nodata value, assuming {}", path, DEFAULT_NODATA);
                    DEFAULT_NODATA
                }
            };
            let (width, height) = dataset.raster_size();
            if width == 0 || height == 0 {
                return Err(MosaicError::Input(format!("{} is empty", path)));
            }
            let georef = Georef::new(projection, transform, nodata)?;
            debug!(
                "Input {}: {} ({}x{}, {} units/px)",
                index,
                path,
                width,
                height,
                georef.pixel_width()
            );
            handles.push(InputHandle {
                index,
                path: path.clone(),
                georef,
                extent: PixelBox::new(0, 0, width as i64, height as i64),
                footprint: PixelBox::empty(),
            });
        }
        info!("Registered {} input DEMs", handles.len());
        Ok(Self {
            handles,
            pool: ReaderPool::new(MAX_OPEN_READERS),
            nodata_threshold,
        })
    }

    pub fn handles(&self) -> &[InputHandle] {
        &self.handles
    }

    pub fn georefs_and_extents(&self) -> Vec<(Georef, PixelBox)> {
        self.handles
            .iter()
            .map(|h| (h.georef.clone(), h.extent))
            .collect()
    }

    /// Project every input's extent into the output pixel space.
    pub fn compute_footprints(&mut self, output: &Georef) -> Result<()> {
        for handle in &mut self.handles {
            let to_output = SrsTransform::new(&handle.georef.srs_wkt, &output.srs_wkt)?;
            handle.footprint =
                footprint_pixel_box(&handle.georef, &handle.extent, &to_output, output)?;
            debug!("Input {} footprint: {:?}", handle.index, handle.footprint);
        }
        Ok(())
    }

    /// Inputs whose footprint intersects the tile expanded by `margin`
    /// pixels, in registration order.
    pub fn select(&self, tile: &PixelBox, margin: i64) -> Vec<&InputHandle> {
        let expanded = tile.expand(margin);
        self.handles
            .iter()
            .filter(|h| h.footprint.intersects(&expanded))
            .collect()
    }

    /// Read a block of the input, clipped to its extent. Cells at or below
    /// the nodata threshold come back as the input's nodata value.
    pub fn read_block(&self, handle: &InputHandle, block: &PixelBox) -> Result<Array2<f64>> {
        let clipped = block.intersect(&handle.extent);
        if clipped.is_empty() {
            return Err(MosaicError::Internal(format!(
                "read window {:?} outside input {}",
                block, handle.index
            )));
        }
        let reader = self.pool.checkout(handle)?;
        let dataset = reader.lock().expect("reader lock poisoned");
        let band = dataset.rasterband(1)?;
        let (width, height) = (clipped.width(), clipped.height());
        let buffer = band.read_as::<f64>(
            (clipped.min_x as isize, clipped.min_y as isize),
            (width, height),
            (width, height),
            None,
        )?;
        drop(dataset);
        let values: Vec<f64> = buffer.into_iter().collect();
        let mut data = Array2::from_shape_vec((height, width), values)?;
        if let Some(threshold) = self.nodata_threshold {
            apply_nodata_threshold(&mut data, threshold, handle.georef.nodata);
        }
        Ok(data)
    }
}

/// Mark every cell at or below `threshold` as nodata.
pub fn apply_nodata_threshold(data: &mut Array2<f64>, threshold: f64, nodata: f64) {
    for value in data.iter_mut() {
        if *value <= threshold {
            *value = nodata;
        }
    }
}

/// Bounded LRU of open datasets. Checking out a reader bumps it to the back
/// of the eviction queue; evicted datasets close once their last user drops
/// the handle.
struct ReaderPool {
    capacity: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    open: HashMap<usize, Arc<Mutex<Dataset>>>,
    order: VecDeque<usize>,
}

impl ReaderPool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState {
                open: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    fn checkout(&self, handle: &InputHandle) -> Result<Arc<Mutex<Dataset>>> {
        let mut state = self.state.lock().expect("reader pool lock poisoned");
        if let Some(reader) = state.open.get(&handle.index) {
            let reader = Arc::clone(reader);
            state.order.retain(|&i| i != handle.index);
            state.order.push_back(handle.index);
            return Ok(reader);
        }
        while state.open.len() >= self.capacity {
            match state.order.pop_front() {
                Some(evict) => {
                    state.open.remove(&evict);
                    debug!("Evicted reader for input {}", evict);
                }
                None => break,
            }
        }
        let dataset = Dataset::open(&handle.path)
            .map_err(|e| MosaicError::Input(format!("cannot reopen {}: {}", handle.path, e)))?;
        let reader = Arc::new(Mutex::new(dataset));
        state.open.insert(handle.index, Arc::clone(&reader));
        state.order.push_back(handle.index);
        Ok(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn handle(index: usize, footprint: PixelBox) -> InputHandle {
        InputHandle {
            index,
            path: format!("dem-{}.tif", index),
            georef: Georef::new(
                "EPSG:32633".to_string(),
                [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
                -9999.0,
            )
            .unwrap(),
            extent: PixelBox::new(0, 0, 100, 100),
            footprint,
        }
    }

    fn index_with(handles: Vec<InputHandle>) -> InputIndex {
        InputIndex {
            handles,
            pool: ReaderPool::new(MAX_OPEN_READERS),
            nodata_threshold: None,
        }
    }

    #[test]
    fn test_select_preserves_order_and_filters() {
        let index = index_with(vec![
            handle(0, PixelBox::new(0, 0, 50, 50)),
            handle(1, PixelBox::new(200, 200, 300, 300)),
            handle(2, PixelBox::new(40, 40, 120, 120)),
        ]);
        let tile = PixelBox::new(0, 0, 60, 60);
        let picked = index.select(&tile, 0);
        let indices: Vec<usize> = picked.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_select_margin_pulls_in_neighbors() {
        let index = index_with(vec![
            handle(0, PixelBox::new(0, 0, 50, 50)),
            handle(1, PixelBox::new(70, 0, 120, 50)),
        ]);
        let tile = PixelBox::new(0, 0, 60, 50);
        assert_eq!(index.select(&tile, 0).len(), 1);
        assert_eq!(index.select(&tile, 20).len(), 2);
    }

    #[test]
    fn test_nodata_threshold() {
        let mut data = arr2(&[[5.0, -10.0], [0.0, 42.0]]);
        apply_nodata_threshold(&mut data, 0.0, -9999.0);
        assert_eq!(data, arr2(&[[5.0, -9999.0], [-9999.0, 42.0]]));
    }
}
