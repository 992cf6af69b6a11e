use crate::core::temporal_reduce::Composites;
use crate::types::{BandData, ChangeResult, Raster, ValidityMask};
use ndarray::Zip;

/// Band name of the percent change product
pub const RELATIVE_CHANGE_BAND: &str = "ndviChange";
/// Band name of the z-score product
pub const ANOMALY_BAND: &str = "ndviZscore";

/// Relative change and standardized anomaly between two epochs
#[derive(Debug, Clone)]
pub struct ChangeProducts {
    pub relative_change: Raster,
    pub standardized_anomaly: Raster,
}

/// `numerator / denominator * scale`, or `None` where the pixel must be masked
#[inline]
fn masked_ratio(numerator: f64, denominator: f64, valid: bool, scale: f64) -> Option<f64> {
    if !valid || denominator == 0.0 {
        return None;
    }
    let value = numerator / denominator * scale;
    value.is_finite().then_some(value)
}

fn combine_masks(a: &ValidityMask, b: &ValidityMask) -> ValidityMask {
    Zip::from(a).and(b).map_collect(|&a, &b| a && b)
}

/// Per-pixel comparison of a reference and a current composite.
///
/// Outputs are never clipped. A pixel is masked when any input is masked,
/// when its denominator is exactly zero, or when the quotient is not finite.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeEngine;

impl ChangeEngine {
    pub fn new() -> Self {
        Self
    }

    /// `(cur - ref) / ref * 100`
    pub fn relative_change(&self, ref_mean: &Raster, cur_mean: &Raster) -> ChangeResult<Raster> {
        ref_mean.check_same_grid(cur_mean)?;
        let reference = &ref_mean.primary_band()?.data;
        let current = &cur_mean.primary_band()?.data;

        let difference = current - reference;
        let valid = combine_masks(ref_mean.mask(), cur_mean.mask());

        let (data, mask) = divide(&difference, reference, &valid, 100.0);
        log_masked(RELATIVE_CHANGE_BAND, &valid, &mask);
        Raster::from_parts(RELATIVE_CHANGE_BAND, data, mask, ref_mean.geo_transform().copied())
    }

    /// `(cur - ref) / ref_std_dev`
    pub fn standardized_anomaly(
        &self,
        ref_mean: &Raster,
        cur_mean: &Raster,
        ref_std_dev: &Raster,
    ) -> ChangeResult<Raster> {
        ref_mean.check_same_grid(cur_mean)?;
        ref_mean.check_same_grid(ref_std_dev)?;
        let reference = &ref_mean.primary_band()?.data;
        let current = &cur_mean.primary_band()?.data;
        let spread = &ref_std_dev.primary_band()?.data;

        let difference = current - reference;
        let valid = combine_masks(
            &combine_masks(ref_mean.mask(), cur_mean.mask()),
            ref_std_dev.mask(),
        );

        let (data, mask) = divide(&difference, spread, &valid, 1.0);
        log_masked(ANOMALY_BAND, &valid, &mask);
        Raster::from_parts(ANOMALY_BAND, data, mask, ref_mean.geo_transform().copied())
    }

    /// Both products from the reference and current epoch composites
    pub fn compute(&self, reference: &Composites, current: &Composites) -> ChangeResult<ChangeProducts> {
        log::info!(
            "Computing change between reference ({} scenes) and current ({} scenes) epochs",
            reference.scene_count,
            current.scene_count
        );
        Ok(ChangeProducts {
            relative_change: self.relative_change(&reference.mean, &current.mean)?,
            standardized_anomaly: self.standardized_anomaly(
                &reference.mean,
                &current.mean,
                &reference.std_dev,
            )?,
        })
    }
}

fn divide(
    numerator: &BandData,
    denominator: &BandData,
    valid: &ValidityMask,
    scale: f64,
) -> (BandData, ValidityMask) {
    let ratio = |&n: &f64, &d: &f64, &v: &bool| masked_ratio(n, d, v, scale);

    #[cfg(feature = "parallel")]
    let quotient = Zip::from(numerator).and(denominator).and(valid).par_map_collect(ratio);
    #[cfg(not(feature = "parallel"))]
    let quotient = Zip::from(numerator).and(denominator).and(valid).map_collect(ratio);

    let data = quotient.map(|q| q.unwrap_or(f64::NAN));
    let mask = quotient.map(Option::is_some);
    (data, mask)
}

fn log_masked(product: &str, inputs_valid: &ValidityMask, output_valid: &ValidityMask) {
    let singular = Zip::from(inputs_valid)
        .and(output_valid)
        .fold(0usize, |acc, &i, &o| acc + usize::from(i && !o));
    if singular > 0 {
        log::debug!(
            "{}: {} valid pixels masked for zero or degenerate denominator",
            product,
            singular
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeError;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn composite(values: BandData) -> Raster {
        Raster::from_band("mean", values)
    }

    #[test]
    fn test_relative_change_percent() {
        let change = ChangeEngine::new()
            .relative_change(&composite(array![[50.0]]), &composite(array![[60.0]]))
            .unwrap();
        assert_abs_diff_eq!(change.value(0, 0).unwrap(), 20.0, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_change_zero_reference_masked() {
        let change = ChangeEngine::new()
            .relative_change(&composite(array![[0.0, 0.4]]), &composite(array![[0.3, 0.2]]))
            .unwrap();
        assert!(!change.is_valid(0, 0));
        assert!(change.primary_band().unwrap().data[[0, 0]].is_nan());
        assert_abs_diff_eq!(change.value(0, 1).unwrap(), -50.0, epsilon = 1e-12);
    }

    #[test]
    fn test_anomaly_z_score() {
        let anomaly = ChangeEngine::new()
            .standardized_anomaly(
                &composite(array![[10.0, 10.0]]),
                &composite(array![[16.0, 16.0]]),
                &composite(array![[3.0, 0.0]]),
            )
            .unwrap();
        assert_abs_diff_eq!(anomaly.value(0, 0).unwrap(), 2.0, epsilon = 1e-12);
        assert!(!anomaly.is_valid(0, 1));
    }

    #[test]
    fn test_invalid_input_propagates() {
        let reference = Raster::from_parts("mean", array![[0.5, 0.5]], array![[true, false]], None).unwrap();
        let current = Raster::from_parts("mean", array![[0.6, 0.6]], array![[false, true]], None).unwrap();
        let change = ChangeEngine::new().relative_change(&reference, &current).unwrap();
        assert_eq!(change.valid_count(), 0);
    }

    #[test]
    fn test_no_clamping() {
        let change = ChangeEngine::new()
            .relative_change(&composite(array![[0.01]]), &composite(array![[0.9]]))
            .unwrap();
        assert_abs_diff_eq!(change.value(0, 0).unwrap(), 8900.0, epsilon = 1e-9);
    }

    #[test]
    fn test_grid_mismatch() {
        let result = ChangeEngine::new()
            .relative_change(&composite(BandData::ones((2, 2))), &composite(BandData::ones((2, 1))));
        assert!(matches!(result, Err(ChangeError::GridMismatch { .. })));
    }
}
