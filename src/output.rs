use std::str::FromStr;

use gdal::raster::{Buffer, GdalType, RasterCreationOptions};
use gdal::DriverManager;
use log::debug;
use ndarray::Array2;

use crate::error::{MosaicError, Result};
use crate::geo::Georef;

/// Pixel type of the written rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
}

impl OutputType {
    pub fn is_integer(&self) -> bool {
        !matches!(self, OutputType::Float32)
    }

    fn range(&self) -> (f64, f64) {
        match self {
            OutputType::Byte => (u8::MIN as f64, u8::MAX as f64),
            OutputType::UInt16 => (u16::MIN as f64, u16::MAX as f64),
            OutputType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            OutputType::UInt32 => (u32::MIN as f64, u32::MAX as f64),
            OutputType::Int32 => (i32::MIN as f64, i32::MAX as f64),
            OutputType::Float32 => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }
}

impl FromStr for OutputType {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Byte" => Ok(OutputType::Byte),
            "UInt16" => Ok(OutputType::UInt16),
            "Int16" => Ok(OutputType::Int16),
            "UInt32" => Ok(OutputType::UInt32),
            "Int32" => Ok(OutputType::Int32),
            "Float32" => Ok(OutputType::Float32),
            other => Err(MosaicError::Config(format!(
                "unsupported output type {:?} (expected Byte, UInt16, Int16, UInt32, Int32 or Float32)",
                other
            ))),
        }
    }
}

/// GeoTIFF compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
    Packbits,
}

impl Compression {
    pub fn gdal_name(&self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Lzw => "LZW",
            Compression::Deflate => "DEFLATE",
            Compression::Packbits => "PACKBITS",
        }
    }
}

impl FromStr for Compression {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" => Ok(Compression::None),
            "LZW" => Ok(Compression::Lzw),
            "Deflate" => Ok(Compression::Deflate),
            "Packbits" => Ok(Compression::Packbits),
            other => Err(MosaicError::Config(format!(
                "unsupported compression {:?} (expected None, LZW, Deflate or Packbits)",
                other
            ))),
        }
    }
}

/// How tiles are written to disk.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub output_type: OutputType,
    pub nodata: f64,
    pub compression: Compression,
    pub block_size: usize,
    pub no_bigtiff: bool,
}

/// Convert one value for the requested output type: integers round
/// half-to-even and clamp to the type range, floats pass through. NaN
/// becomes the output nodata.
pub fn convert_value(value: f64, output_type: OutputType, nodata: f64) -> f64 {
    let (lo, hi) = output_type.range();
    if value.is_nan() {
        return if output_type.is_integer() {
            nodata.round_ties_even().clamp(lo, hi)
        } else {
            nodata
        };
    }
    if output_type.is_integer() {
        value.round_ties_even().clamp(lo, hi)
    } else {
        value
    }
}

/// Path of the main output for a tile. A prefix ending in `.tif` is a
/// single-file output; anything else gets per-tile naming.
pub fn tile_path(prefix: &str, tile_index: usize, total_tiles: usize) -> Result<String> {
    if prefix.ends_with(".tif") {
        if total_tiles > 1 {
            return Err(MosaicError::Grid(format!(
                "output {} is a single file but {} tiles must be written; \
                 use an output prefix or a larger --tile-size",
                prefix, total_tiles
            )));
        }
        Ok(prefix.to_string())
    } else {
        Ok(format!("{}-tile-{}.tif", prefix, tile_index))
    }
}

/// Path of an auxiliary raster (index map, saved weight) for a tile.
pub fn aux_path(prefix: &str, kind: &str, tile_index: usize) -> String {
    match prefix.strip_suffix(".tif") {
        Some(stem) => format!("{}-{}.tif", stem, kind),
        None => format!("{}-{}-tile-{}.tif", prefix, kind, tile_index),
    }
}

/// Write one finished tile, converting values for the output type.
pub fn write_tile(
    path: &str,
    georef: &Georef,
    values: &Array2<f64>,
    opts: &WriteOptions,
) -> Result<()> {
    debug!("Writing {} ({}x{})", path, values.ncols(), values.nrows());
    match opts.output_type {
        OutputType::Byte => write_converted::<u8>(path, georef, values, opts),
        OutputType::UInt16 => write_converted::<u16>(path, georef, values, opts),
        OutputType::Int16 => write_converted::<i16>(path, georef, values, opts),
        OutputType::UInt32 => write_converted::<u32>(path, georef, values, opts),
        OutputType::Int32 => write_converted::<i32>(path, georef, values, opts),
        OutputType::Float32 => write_converted::<f32>(path, georef, values, opts),
    }
}

fn write_converted<T>(
    path: &str,
    georef: &Georef,
    values: &Array2<f64>,
    opts: &WriteOptions,
) -> Result<()>
where
    T: GdalType + Copy + NumCast,
{
    let converted: Vec<T> = values
        .iter()
        .map(|&v| T::from_f64(convert_value(v, opts.output_type, opts.nodata)))
        .collect();
    write_band(path, georef, converted, values.dim(), opts, opts.nodata)
}

/// Write an index map: Int32, nodata -1.
pub fn write_index_map(
    path: &str,
    georef: &Georef,
    index_map: &Array2<i32>,
    opts: &WriteOptions,
) -> Result<()> {
    debug!("Writing index map {}", path);
    let data: Vec<i32> = index_map.iter().copied().collect();
    write_band(path, georef, data, index_map.dim(), opts, -1.0)
}

/// Write a weight raster: Float32, zero where the input is invalid.
pub fn write_weights(
    path: &str,
    georef: &Georef,
    weights: &Array2<f64>,
    opts: &WriteOptions,
) -> Result<()> {
    debug!("Writing weights {}", path);
    let data: Vec<f32> = weights.iter().map(|&w| w as f32).collect();
    write_band(path, georef, data, weights.dim(), opts, 0.0)
}

fn write_band<T: GdalType + Copy>(
    path: &str,
    georef: &Georef,
    data: Vec<T>,
    (rows, cols): (usize, usize),
    opts: &WriteOptions,
    nodata: f64,
) -> Result<()> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let block = opts.block_size.to_string();
    let creation_options = RasterCreationOptions::from_iter([
        format!("TILED={}", "YES"),
        format!("BLOCKXSIZE={}", block),
        format!("BLOCKYSIZE={}", block),
        format!("COMPRESS={}", opts.compression.gdal_name()),
        format!(
            "BIGTIFF={}",
            if opts.no_bigtiff { "NO" } else { "IF_SAFER" }
        ),
    ]);
    let mut dataset =
        driver.create_with_band_type_with_options::<T, _>(path, cols, rows, 1, &creation_options)?;
    dataset.set_geo_transform(&georef.transform)?;
    dataset.set_projection(&georef.srs_wkt)?;

    let mut band = dataset.rasterband(1)?;
    band.set_no_data_value(Some(nodata))?;
    let mut buffer = Buffer::new((cols, rows), data);
    band.write((0, 0), (cols, rows), &mut buffer)?;
    Ok(())
}

/// Lossless-enough numeric cast for the supported band types.
pub trait NumCast {
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_num_cast {
    ($($t:ty),*) => {
        $(impl NumCast for $t {
            fn from_f64(value: f64) -> Self {
                value as $t
            }
        })*
    };
}

impl_num_cast!(u8, u16, i16, u32, i32, f32);
