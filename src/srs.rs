use gdal::spatial_ref::{CoordTransform, SpatialRef};
use log::debug;

use crate::error::{MosaicError, Result};

/// Coordinate transform between two spatial reference systems.
///
/// Identical SRS strings short-circuit to the identity, so purely
/// pixel-space work never touches the projection machinery.
pub enum SrsTransform {
    Identity,
    Projected(CoordTransform),
}

impl SrsTransform {
    pub fn new(src_srs: &str, dst_srs: &str) -> Result<Self> {
        if src_srs.trim() == dst_srs.trim() {
            debug!("Identical SRS, using identity transform");
            return Ok(SrsTransform::Identity);
        }
        let src = parse_srs(src_srs)?;
        let dst = parse_srs(dst_srs)?;
        let transform = CoordTransform::new(&src, &dst)?;
        Ok(SrsTransform::Projected(transform))
    }

    /// Transform a single point.
    pub fn apply(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match self {
            SrsTransform::Identity => Ok((x, y)),
            SrsTransform::Projected(transform) => {
                let mut xs = [x];
                let mut ys = [y];
                let mut zs = [0.0];
                transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
                Ok((xs[0], ys[0]))
            }
        }
    }

    /// Transform a batch of points in place.
    pub fn apply_slice(&self, xs: &mut [f64], ys: &mut [f64]) -> Result<()> {
        match self {
            SrsTransform::Identity => Ok(()),
            SrsTransform::Projected(transform) => {
                let mut zs = vec![0.0; xs.len()];
                transform.transform_coords(xs, ys, &mut zs)?;
                Ok(())
            }
        }
    }
}

/// Parse an SRS definition (WKT, EPSG:nnnn, PROJ string).
pub fn parse_srs(definition: &str) -> Result<SpatialRef> {
    if definition.trim().is_empty() {
        return Err(MosaicError::Config("empty SRS definition".to_string()));
    }
    SpatialRef::from_definition(definition)
        .map_err(|e| MosaicError::Config(format!("cannot parse SRS {:?}: {}", definition, e)))
}
