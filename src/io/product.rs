use crate::types::{BoundingBox, ChangeError, ChangeResult, Raster};
use serde::{Deserialize, Serialize};

/// Value range a visualization collaborator should stretch its color ramp over.
/// Display only; stored values are never clipped to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRange {
    pub min: f64,
    pub max: f64,
}

impl DisplayRange {
    /// Percent change
    pub const RELATIVE_CHANGE: DisplayRange = DisplayRange { min: -50.0, max: 20.0 };
    /// Z-score
    pub const ANOMALY: DisplayRange = DisplayRange { min: -3.0, max: 3.0 };

    pub fn new(min: f64, max: f64) -> ChangeResult<Self> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(ChangeError::InvalidParameter(format!(
                "display range must satisfy min < max, got [{}, {}]",
                min, max
            )));
        }
        Ok(Self { min, max })
    }
}

/// Summary of the valid pixels of a single-band raster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterStatistics {
    pub total_pixels: usize,
    pub valid_pixels: usize,
    pub valid_fraction: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

impl RasterStatistics {
    pub fn compute(raster: &Raster) -> ChangeResult<Self> {
        let data = &raster.primary_band()?.data;
        let total_pixels = data.len();

        let mut valid_pixels = 0usize;
        let mut sum = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for (&value, &valid) in data.iter().zip(raster.mask().iter()) {
            if valid {
                valid_pixels += 1;
                sum += value;
                min = min.min(value);
                max = max.max(value);
            }
        }

        let any = valid_pixels > 0;
        Ok(Self {
            total_pixels,
            valid_pixels,
            valid_fraction: if total_pixels > 0 {
                valid_pixels as f64 / total_pixels as f64
            } else {
                0.0
            },
            min: any.then_some(min),
            max: any.then_some(max),
            mean: any.then(|| sum / valid_pixels as f64),
        })
    }
}

/// Output raster plus what the visualization and export collaborators need
#[derive(Debug, Clone)]
pub struct OutputProduct {
    pub name: String,
    pub raster: Raster,
    pub display_range: Option<DisplayRange>,
    /// Export pixel size in map units
    pub resolution: f64,
    /// Grid footprint, when the raster carries a geotransform
    pub footprint: Option<BoundingBox>,
    pub statistics: RasterStatistics,
}

impl OutputProduct {
    pub fn new(
        name: impl Into<String>,
        raster: Raster,
        display_range: Option<DisplayRange>,
        resolution: f64,
    ) -> ChangeResult<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ChangeError::InvalidParameter(format!(
                "output resolution must be positive, got {}",
                resolution
            )));
        }

        let name = name.into();
        let statistics = RasterStatistics::compute(&raster)?;
        let footprint = raster
            .geo_transform()
            .map(|gt| gt.bounds(raster.rows(), raster.cols()));

        if statistics.valid_pixels == 0 {
            log::warn!("Product '{}' has no valid pixels", name);
        } else {
            log::info!(
                "Product '{}': {:.1}% valid, range [{:.4}, {:.4}], mean {:.4}",
                name,
                statistics.valid_fraction * 100.0,
                statistics.min.unwrap_or(f64::NAN),
                statistics.max.unwrap_or(f64::NAN),
                statistics.mean.unwrap_or(f64::NAN)
            );
        }

        Ok(Self {
            name,
            raster,
            display_range,
            resolution,
            footprint,
            statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    #[test]
    fn test_statistics_ignore_masked_pixels() {
        let raster = Raster::from_parts(
            "ndviChange",
            array![[10.0, f64::NAN], [-30.0, 1000.0]],
            array![[true, false], [true, false]],
            None,
        )
        .unwrap();

        let stats = RasterStatistics::compute(&raster).unwrap();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.valid_pixels, 2);
        assert_eq!(stats.valid_fraction, 0.5);
        assert_eq!(stats.min, Some(-30.0));
        assert_eq!(stats.max, Some(10.0));
        assert_eq!(stats.mean, Some(-10.0));
    }

    #[test]
    fn test_product_footprint_from_geotransform() {
        let raster = Raster::from_band("ndviZscore", array![[0.0, 1.0]])
            .with_geo_transform(GeoTransform::north_up(100.0, 200.0, 30.0));
        let product = OutputProduct::new("ndviZscore", raster, Some(DisplayRange::ANOMALY), 30.0).unwrap();

        let footprint = product.footprint.unwrap();
        assert_eq!(footprint.min_x, 100.0);
        assert_eq!(footprint.max_x, 160.0);
        assert_eq!(footprint.min_y, 170.0);
        assert_eq!(product.display_range, Some(DisplayRange { min: -3.0, max: 3.0 }));
    }

    #[test]
    fn test_invalid_display_range() {
        assert!(DisplayRange::new(3.0, -3.0).is_err());
        assert!(DisplayRange::new(-50.0, 20.0).is_ok());
    }
}
