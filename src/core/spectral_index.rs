use crate::types::{BandData, ChangeResult, Raster, SensorKind, ValidityMask};
use ndarray::Zip;

/// Which bands feed the index for a given sensor, and what the output is called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandBinding {
    pub red: &'static str,
    pub nir: &'static str,
    pub output: &'static str,
}

impl BandBinding {
    pub const LEGACY: BandBinding = BandBinding {
        red: "B3",
        nir: "B4",
        output: "L5_NDVI",
    };

    pub const MODERN: BandBinding = BandBinding {
        red: "B4",
        nir: "B5",
        output: "L8_NDVI",
    };

    pub fn for_sensor(sensor: SensorKind) -> Self {
        match sensor {
            SensorKind::Legacy => Self::LEGACY,
            SensorKind::Modern => Self::MODERN,
        }
    }
}

/// Compute the normalized difference between two bands:
///
/// `(a - b) / (a + b)`
///
/// No clamping and no special-casing: `0 / 0` yields NaN and a zero sum
/// with a non-zero difference yields an infinity.
pub fn normalized_difference(a: &BandData, b: &BandData) -> BandData {
    #[cfg(feature = "parallel")]
    {
        Zip::from(a).and(b).par_map_collect(|&a, &b| (a - b) / (a + b))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(a).and(b).map_collect(|&a, &b| (a - b) / (a + b))
    }
}

/// Appends a sensor-qualified NDVI band to scene rasters
#[derive(Debug, Clone)]
pub struct IndexCalculator {
    binding: BandBinding,
}

impl IndexCalculator {
    pub fn new(binding: BandBinding) -> Self {
        Self { binding }
    }

    pub fn for_sensor(sensor: SensorKind) -> Self {
        Self::new(BandBinding::for_sensor(sensor))
    }

    pub fn binding(&self) -> &BandBinding {
        &self.binding
    }

    /// Raw index values for every pixel, masked or not
    pub fn compute(&self, raster: &Raster) -> ChangeResult<BandData> {
        let nir = raster.band(self.binding.nir)?;
        let red = raster.band(self.binding.red)?;
        Ok(normalized_difference(nir, red))
    }

    /// Compute the index, append it under `binding.output` and mask any
    /// pixel whose index is not finite. The existing mask is kept.
    pub fn apply(&self, raster: &mut Raster) -> ChangeResult<()> {
        let index = self.compute(raster)?;
        let finite: ValidityMask = index.mapv(f64::is_finite);

        let singular = finite.iter().filter(|&&f| !f).count();
        if singular > 0 {
            log::debug!(
                "{}: {} pixels with non-finite index masked",
                self.binding.output,
                singular
            );
        }

        raster.add_band(self.binding.output, index)?;
        raster.update_mask(&finite)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeError;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_normalized_difference_formula() {
        let nir = array![[0.5, 0.3], [0.8, 0.0]];
        let red = array![[0.1, 0.3], [0.0, 0.2]];
        let ndvi = normalized_difference(&nir, &red);

        assert_abs_diff_eq!(ndvi[[0, 0]], 0.4 / 0.6, epsilon = 1e-12);
        assert_eq!(ndvi[[0, 1]], 0.0);
        assert_eq!(ndvi[[1, 0]], 1.0);
        assert_eq!(ndvi[[1, 1]], -1.0);
    }

    #[test]
    fn test_index_bounded_for_non_negative_bands() {
        let steps = [0.0, 1e-6, 0.01, 0.1, 0.25, 0.5, 0.99, 1.0, 37.5, 1e4];
        let n = steps.len();
        let nir = BandData::from_shape_fn((n, n), |(i, _)| steps[i]);
        let red = BandData::from_shape_fn((n, n), |(_, j)| steps[j]);

        let ndvi = normalized_difference(&nir, &red);

        for ((i, j), &v) in ndvi.indexed_iter() {
            if i == 0 && j == 0 {
                assert!(v.is_nan());
                continue;
            }
            assert!(-1.0 <= v && v <= 1.0, "index {} out of range for nir {} red {}", v, steps[i], steps[j]);
        }
    }

    #[test]
    fn test_zero_bands_mask_pixel() {
        let mut raster = Raster::new(1, 2)
            .with_band("B4", array![[0.0, 0.05]])
            .unwrap()
            .with_band("B5", array![[0.0, 0.25]])
            .unwrap();

        IndexCalculator::for_sensor(SensorKind::Modern)
            .apply(&mut raster)
            .unwrap();

        assert!(raster.has_band("L8_NDVI"));
        assert!(raster.band("L8_NDVI").unwrap()[[0, 0]].is_nan());
        assert!(!raster.is_valid(0, 0));
        assert!(raster.is_valid(0, 1));
    }

    #[test]
    fn test_legacy_binding_uses_b3_b4() {
        let mut raster = Raster::new(1, 1)
            .with_band("B3", array![[100.0]])
            .unwrap()
            .with_band("B4", array![[300.0]])
            .unwrap();

        IndexCalculator::for_sensor(SensorKind::Legacy)
            .apply(&mut raster)
            .unwrap();

        let ndvi = raster.select("L5_NDVI").unwrap();
        assert_abs_diff_eq!(ndvi.value(0, 0).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_existing_mask_preserved() {
        let mut raster = Raster::new(1, 2)
            .with_band("B4", array![[0.1, 0.1]])
            .unwrap()
            .with_band("B5", array![[0.3, 0.3]])
            .unwrap()
            .with_mask(&array![[false, true]])
            .unwrap();

        IndexCalculator::for_sensor(SensorKind::Modern)
            .apply(&mut raster)
            .unwrap();

        assert!(!raster.is_valid(0, 0));
        assert!(raster.is_valid(0, 1));
    }

    #[test]
    fn test_missing_nir_band() {
        let raster = Raster::from_band("B4", array![[0.1]]);
        let result = IndexCalculator::for_sensor(SensorKind::Modern).compute(&raster);
        assert!(matches!(result, Err(ChangeError::MissingBand { band, .. }) if band == "B5"));
    }
}
