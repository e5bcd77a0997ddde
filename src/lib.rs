// Library exports for testing and reuse

pub mod accumulate;
pub mod cli;
pub mod driver;
pub mod error;
pub mod geo;
pub mod grid;
pub mod input;
pub mod output;
pub mod postprocess;
pub mod reproject;
pub mod srs;
pub mod weights;

// Re-export commonly used types
pub use accumulate::{Accumulator, FinishedTile, Mode};
pub use cli::Args;
pub use driver::MosaicConfig;
pub use error::{MosaicError, Result};
pub use geo::{Georef, PixelBox, WorldBox};
pub use grid::{GridOptions, OutputGrid, TileSpec};
pub use input::{InputHandle, InputIndex};
pub use output::{Compression, OutputType, WriteOptions};
pub use postprocess::PostParams;
pub use weights::{WeightParams, WeightPatch};
