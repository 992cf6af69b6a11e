use crate::types::{BandData, ChangeResult, Raster, SensorKind, ValidityMask};
use ndarray::Zip;
use num_traits::ToPrimitive;

/// Default name of the bit-packed quality band
pub const QA_BAND: &str = "pixel_qa";

/// Cloud shadow flag
pub const CLOUD_SHADOW_BIT: u32 = 3;
/// Cloud flag
pub const CLOUD_BIT: u32 = 5;
/// High cloud-confidence flag (legacy layout only)
pub const CLOUD_CONFIDENCE_HIGH_BIT: u32 = 7;

#[inline]
fn bit_set(qa: u16, bit: u32) -> bool {
    qa & (1 << bit) != 0
}

/// Decodes a sensor's quality-flag band into a validity mask
#[derive(Debug, Clone)]
pub struct QualityMaskDecoder {
    sensor: SensorKind,
    qa_band: String,
}

impl QualityMaskDecoder {
    /// Decoder for `sensor` reading the standard `pixel_qa` band
    pub fn new(sensor: SensorKind) -> Self {
        Self {
            sensor,
            qa_band: QA_BAND.to_string(),
        }
    }

    /// Read flags from a differently named band
    pub fn with_qa_band(mut self, name: impl Into<String>) -> Self {
        self.qa_band = name.into();
        self
    }

    pub fn sensor(&self) -> SensorKind {
        self.sensor
    }

    pub fn qa_band(&self) -> &str {
        &self.qa_band
    }

    /// Whether a single quality word marks a usable pixel
    pub fn is_clear(&self, qa: u16) -> bool {
        let contaminated = match self.sensor {
            SensorKind::Legacy => {
                (bit_set(qa, CLOUD_BIT) && bit_set(qa, CLOUD_CONFIDENCE_HIGH_BIT))
                    || bit_set(qa, CLOUD_SHADOW_BIT)
            }
            SensorKind::Modern => bit_set(qa, CLOUD_SHADOW_BIT) || bit_set(qa, CLOUD_BIT),
        };
        !contaminated
    }

    /// Whether a raw band sample marks a usable pixel.
    ///
    /// Samples that are not a 16-bit unsigned integer (NaN, negative,
    /// fractional, too large) cannot be decoded and count as unusable.
    pub fn is_clear_sample(&self, sample: f64) -> bool {
        if sample.fract() != 0.0 {
            return false;
        }
        sample.to_u16().map_or(false, |qa| self.is_clear(qa))
    }

    /// Decode a raw quality band into a validity mask
    pub fn decode(&self, qa: &BandData) -> ValidityMask {
        #[cfg(feature = "parallel")]
        {
            Zip::from(qa).par_map_collect(|&sample| self.is_clear_sample(sample))
        }
        #[cfg(not(feature = "parallel"))]
        {
            Zip::from(qa).map_collect(|&sample| self.is_clear_sample(sample))
        }
    }

    /// Decode the raster's quality band and AND it into the raster's mask.
    ///
    /// Returns the number of pixels that were valid before and are masked now.
    pub fn apply(&self, raster: &mut Raster) -> ChangeResult<usize> {
        let clear = self.decode(raster.band(&self.qa_band)?);
        let before = raster.valid_count();
        raster.update_mask(&clear)?;
        let masked = before - raster.valid_count();

        log::debug!(
            "{} QA mask: {} of {} previously valid pixels flagged as cloud/shadow",
            self.sensor,
            masked,
            before
        );
        Ok(masked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeError;
    use ndarray::array;

    const CLEAR: u16 = 0b0000_0010;

    #[test]
    fn test_legacy_requires_high_confidence_for_cloud() {
        let decoder = QualityMaskDecoder::new(SensorKind::Legacy);

        assert!(decoder.is_clear(CLEAR));
        // cloud bit alone is not enough on the legacy layout
        assert!(decoder.is_clear(1 << CLOUD_BIT));
        assert!(decoder.is_clear(1 << CLOUD_CONFIDENCE_HIGH_BIT));
        assert!(!decoder.is_clear((1 << CLOUD_BIT) | (1 << CLOUD_CONFIDENCE_HIGH_BIT)));
        assert!(!decoder.is_clear(1 << CLOUD_SHADOW_BIT));
    }

    #[test]
    fn test_modern_masks_cloud_or_shadow() {
        let decoder = QualityMaskDecoder::new(SensorKind::Modern);

        assert!(decoder.is_clear(CLEAR));
        assert!(decoder.is_clear(1 << CLOUD_CONFIDENCE_HIGH_BIT));
        assert!(!decoder.is_clear(1 << CLOUD_BIT));
        assert!(!decoder.is_clear(1 << CLOUD_SHADOW_BIT));
    }

    #[test]
    fn test_undecodable_samples_are_invalid() {
        let decoder = QualityMaskDecoder::new(SensorKind::Modern);
        assert!(!decoder.is_clear_sample(f64::NAN));
        assert!(!decoder.is_clear_sample(-1.0));
        assert!(!decoder.is_clear_sample(2.5));
        assert!(!decoder.is_clear_sample(70_000.0));
        assert!(decoder.is_clear_sample(322.0));
    }

    #[test]
    fn test_apply_keeps_existing_edge_mask() {
        let qa = array![[66.0, 66.0], [(1u16 << CLOUD_SHADOW_BIT) as f64, 66.0]];
        let edge = array![[true, false], [true, true]];
        let mut raster = Raster::new(2, 2)
            .with_band(QA_BAND, qa)
            .unwrap()
            .with_mask(&edge)
            .unwrap();

        let masked = QualityMaskDecoder::new(SensorKind::Legacy)
            .apply(&mut raster)
            .unwrap();

        assert_eq!(masked, 1);
        assert_eq!(raster.mask(), &array![[true, false], [false, true]]);
    }

    #[test]
    fn test_missing_qa_band_is_contract_violation() {
        let mut raster = Raster::from_band("B4", array![[0.1]]);
        let result = QualityMaskDecoder::new(SensorKind::Modern).apply(&mut raster);
        assert!(matches!(result, Err(ChangeError::MissingBand { .. })));
    }
}
