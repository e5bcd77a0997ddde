use clap::Parser;

use crate::accumulate::Mode;
use crate::error::{MosaicError, Result};
use crate::output::{Compression, OutputType};

#[derive(Parser, Debug)]
#[command(name = "dem-mosaic")]
#[command(about = "Mosaic overlapping DEMs into a tiled output DEM")]
#[command(version)]
pub struct Args {
    /// Input DEM paths, mosaicked in this order
    #[arg(value_name = "DEM")]
    pub dems: Vec<String>,

    /// File with a whitespace-separated list of input DEMs
    #[arg(long, value_name = "FILE")]
    pub dem_list_file: Option<String>,

    /// Output prefix; <prefix>-tile-<i>.tif per tile, or a single .tif path
    #[arg(short, long, value_name = "PREFIX")]
    pub output_prefix: String,

    /// Tile size in pixels (side of a square tile)
    #[arg(long, value_name = "PIXELS")]
    pub tile_size: Option<usize>,

    /// Tile size in projected units
    #[arg(long, value_name = "UNITS")]
    pub georef_tile_size: Option<f64>,

    /// Produce only the tile with this index
    #[arg(long, value_name = "INDEX")]
    pub tile_index: Option<usize>,

    /// Produce only the tiles with these indices
    #[arg(long, value_name = "INDEX", num_args = 1..)]
    pub tile_list: Vec<usize>,

    /// Internal GeoTIFF block size (must be a multiple of 16)
    #[arg(long, value_name = "PIXELS", default_value_t = 256)]
    pub tif_tile_size: usize,

    /// Output pixel size in projected units (default: first input's)
    #[arg(long, value_name = "UNITS")]
    pub tr: Option<f64>,

    /// Target spatial reference system (default: first input's)
    #[arg(long = "t_srs", value_name = "SRS")]
    pub t_srs: Option<String>,

    /// Output window in projected coordinates
    #[arg(long = "t_projwin", value_names = ["XMIN", "YMIN", "XMAX", "YMAX"], num_args = 4, allow_negative_numbers = true)]
    pub t_projwin: Option<Vec<f64>>,

    /// Snap the output grid to integer multiples of the pixel size
    #[arg(long)]
    pub tap: bool,

    /// Use the projection window verbatim instead of intersecting it
    #[arg(long)]
    pub force_projwin: bool,

    /// Keep the first encountered value per pixel
    #[arg(long)]
    pub first: bool,

    /// Keep the last encountered value per pixel
    #[arg(long)]
    pub last: bool,

    /// Keep the smallest value per pixel
    #[arg(long)]
    pub min: bool,

    /// Keep the largest value per pixel
    #[arg(long)]
    pub max: bool,

    /// Unweighted mean per pixel
    #[arg(long)]
    pub mean: bool,

    /// Standard deviation per pixel
    #[arg(long)]
    pub stddev: bool,

    /// Median per pixel
    #[arg(long)]
    pub median: bool,

    /// Normalized median absolute deviation per pixel
    #[arg(long)]
    pub nmad: bool,

    /// Number of valid inputs per pixel
    #[arg(long)]
    pub count: bool,

    /// Standard deviation of the weight blur
    #[arg(long, value_name = "SIGMA", default_value_t = 5.0)]
    pub weights_blur_sigma: f64,

    /// Exponent applied to the distance-based weights
    #[arg(long, value_name = "EXP", default_value_t = 2.0)]
    pub weights_exponent: f64,

    /// Weight by distance-to-boundary over distance-to-centerline
    #[arg(long)]
    pub use_centerline_weights: bool,

    /// Prefer earlier inputs, blending into later ones over this many
    /// pixels from their boundaries
    #[arg(long, value_name = "PIXELS")]
    pub priority_blending_length: Option<f64>,

    /// Margin in pixels read around each tile
    #[arg(long, value_name = "PIXELS", default_value_t = 200)]
    pub extra_crop_length: i64,

    /// Also write the blending weight of the input with this index
    #[arg(long, value_name = "INDEX")]
    pub save_dem_weight: Option<usize>,

    /// Also write the index of the input chosen per pixel
    #[arg(long)]
    pub save_index_map: bool,

    /// Fill nodata regions no larger than this many pixels across
    #[arg(long, value_name = "PIXELS", default_value_t = 0)]
    pub hole_fill_length: usize,

    /// Gaussian blur applied to the final DEM
    #[arg(long, value_name = "SIGMA", default_value_t = 0.0)]
    pub dem_blur_sigma: f64,

    /// Erode this many pixels from the valid-data boundary
    #[arg(long, value_name = "PIXELS", default_value_t = 0)]
    pub erode_length: usize,

    /// Output data type
    #[arg(long, value_name = "TYPE", default_value = "Float32")]
    pub ot: String,

    /// Nodata value written to the output (default: first input's)
    #[arg(long, value_name = "VALUE", allow_negative_numbers = true)]
    pub output_nodata_value: Option<f64>,

    /// Treat input values at or below this threshold as nodata
    #[arg(long, value_name = "VALUE", allow_negative_numbers = true)]
    pub nodata_threshold: Option<f64>,

    /// Never create BigTIFF output
    #[arg(long)]
    pub no_bigtiff: bool,

    /// GeoTIFF compression
    #[arg(long, value_name = "TYPE", default_value = "LZW")]
    pub tif_compress: String,

    /// Number of worker threads (default: all available)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// GDAL block cache size in megabytes
    #[arg(long, value_name = "MB")]
    pub cache_size_mb: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Resolve the mutually exclusive mode flags.
    pub fn mode(&self) -> Result<Mode> {
        let flags = [
            (self.first, Mode::First),
            (self.last, Mode::Last),
            (self.min, Mode::Min),
            (self.max, Mode::Max),
            (self.mean, Mode::Mean),
            (self.stddev, Mode::StdDev),
            (self.median, Mode::Median),
            (self.nmad, Mode::Nmad),
            (self.count, Mode::Count),
        ];
        let mut selected: Vec<Mode> = flags
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, mode)| *mode)
            .collect();
        match selected.len() {
            0 => Ok(Mode::Blend),
            1 => Ok(selected.pop().unwrap()),
            _ => Err(MosaicError::Config(
                "at most one of --first, --last, --min, --max, --mean, --stddev, \
                 --median, --nmad, --count may be given"
                    .to_string(),
            )),
        }
    }

    pub fn output_type(&self) -> Result<OutputType> {
        self.ot.parse()
    }

    pub fn compression(&self) -> Result<Compression> {
        self.tif_compress.parse()
    }

    /// Positional inputs plus the contents of --dem-list-file, in order.
    pub fn collect_dem_paths(&self) -> Result<Vec<String>> {
        let mut paths = self.dems.clone();
        if let Some(list_file) = &self.dem_list_file {
            let contents = std::fs::read_to_string(list_file)?;
            paths.extend(contents.split_whitespace().map(str::to_string));
        }
        if paths.is_empty() {
            return Err(MosaicError::Input(
                "no input DEMs given (positional arguments or --dem-list-file)".to_string(),
            ));
        }
        Ok(paths)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size.is_some() && self.georef_tile_size.is_some() {
            return Err(MosaicError::Config(
                "--tile-size and --georef-tile-size are mutually exclusive".to_string(),
            ));
        }
        if let Some(tile_size) = self.tile_size {
            if tile_size == 0 {
                return Err(MosaicError::Config("--tile-size must be positive".to_string()));
            }
        }
        if let Some(size) = self.georef_tile_size {
            if !(size > 0.0) {
                return Err(MosaicError::Config(
                    "--georef-tile-size must be positive".to_string(),
                ));
            }
        }
        if self.tif_tile_size == 0 || self.tif_tile_size % 16 != 0 {
            return Err(MosaicError::Config(format!(
                "--tif-tile-size must be a positive multiple of 16, got {}",
                self.tif_tile_size
            )));
        }
        if let Some(tr) = self.tr {
            if !(tr > 0.0) {
                return Err(MosaicError::Config("--tr must be positive".to_string()));
            }
        }
        if let Some(window) = &self.t_projwin {
            if !(window[0] < window[2] && window[1] < window[3]) {
                return Err(MosaicError::Config(
                    "--t_projwin must satisfy xmin < xmax and ymin < ymax".to_string(),
                ));
            }
        }
        if self.tile_index.is_some() && !self.tile_list.is_empty() {
            return Err(MosaicError::Config(
                "--tile-index and --tile-list are mutually exclusive".to_string(),
            ));
        }
        if self.weights_blur_sigma < 0.0 || self.dem_blur_sigma < 0.0 {
            return Err(MosaicError::Config("blur sigma must be non-negative".to_string()));
        }
        if self.weights_exponent <= 0.0 {
            return Err(MosaicError::Config(
                "--weights-exponent must be positive".to_string(),
            ));
        }
        if let Some(length) = self.priority_blending_length {
            if length < 0.0 {
                return Err(MosaicError::Config(
                    "--priority-blending-length must be non-negative".to_string(),
                ));
            }
            if self.mode()? != Mode::Blend {
                return Err(MosaicError::Config(
                    "--priority-blending-length only applies to blend mode".to_string(),
                ));
            }
        }
        if self.extra_crop_length < 0 {
            return Err(MosaicError::Config(
                "--extra-crop-length must be non-negative".to_string(),
            ));
        }
        let mode = self.mode()?;
        if self.save_index_map && !mode.tracks_index() {
            return Err(MosaicError::Config(
                "--save-index-map requires --first, --last, --min or --max".to_string(),
            ));
        }
        if self.save_dem_weight.is_some() && mode != Mode::Blend {
            return Err(MosaicError::Config(
                "--save-dem-weight only applies to blend mode".to_string(),
            ));
        }
        self.output_type()?;
        self.compression()?;
        Ok(())
    }

    /// Requested tile subset, if any.
    pub fn tile_subset(&self) -> Option<Vec<usize>> {
        if let Some(index) = self.tile_index {
            Some(vec![index])
        } else if !self.tile_list.is_empty() {
            Some(self.tile_list.clone())
        } else {
            None
        }
    }
}
