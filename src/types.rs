use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Sample type shared by every band
pub type Sample = f64;

/// 2D band data (rows x cols)
pub type BandData = Array2<Sample>;

/// Per-pixel validity grid, `true` = usable pixel
pub type ValidityMask = Array2<bool>;

/// Sensor family a scene was acquired with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    /// Landsat 5 TM style surface reflectance (red = B3, NIR = B4)
    Legacy,
    /// Landsat 8 OLI style surface reflectance (red = B4, NIR = B5)
    Modern,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Legacy => write!(f, "legacy"),
            SensorKind::Modern => write!(f, "modern"),
        }
    }
}

/// Axis-aligned footprint in grid map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Affine pixel-to-map transform (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels of `resolution` map units
    pub fn north_up(top_left_x: f64, top_left_y: f64, resolution: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: resolution,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -resolution,
        }
    }

    /// Map coordinates of the top-left corner of pixel (row, col)
    pub fn pixel_to_map(&self, row: f64, col: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Footprint covered by a grid of `rows` x `cols` pixels
    pub fn bounds(&self, rows: usize, cols: usize) -> BoundingBox {
        let corners = [
            self.pixel_to_map(0.0, 0.0),
            self.pixel_to_map(0.0, cols as f64),
            self.pixel_to_map(rows as f64, 0.0),
            self.pixel_to_map(rows as f64, cols as f64),
        ];

        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bbox.min_x = bbox.min_x.min(x);
            bbox.max_x = bbox.max_x.max(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }
}

/// One named spectral or derived band
#[derive(Debug, Clone)]
pub struct Band {
    pub name: String,
    pub data: BandData,
}

/// Multi-band grid with a single validity mask shared by all bands.
///
/// A pixel is either valid in every band or invalid in every band. Masks only
/// ever shrink: `update_mask` ANDs, it never re-validates a pixel.
#[derive(Debug, Clone)]
pub struct Raster {
    rows: usize,
    cols: usize,
    bands: Vec<Band>,
    mask: ValidityMask,
    geo_transform: Option<GeoTransform>,
}

impl Raster {
    /// Empty raster (no bands, every pixel valid)
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            bands: Vec::new(),
            mask: ValidityMask::from_elem((rows, cols), true),
            geo_transform: None,
        }
    }

    /// Single-band raster with every pixel valid
    pub fn from_band(name: impl Into<String>, data: BandData) -> Self {
        let (rows, cols) = data.dim();
        Self {
            rows,
            cols,
            bands: vec![Band { name: name.into(), data }],
            mask: ValidityMask::from_elem((rows, cols), true),
            geo_transform: None,
        }
    }

    /// Single-band raster from data, mask and optional grid reference
    pub fn from_parts(
        name: impl Into<String>,
        data: BandData,
        mask: ValidityMask,
        geo_transform: Option<GeoTransform>,
    ) -> ChangeResult<Self> {
        check_dims(data.dim(), mask.dim())?;
        let (rows, cols) = data.dim();
        Ok(Self {
            rows,
            cols,
            bands: vec![Band { name: name.into(), data }],
            mask,
            geo_transform,
        })
    }

    /// Single-band raster from a row-major sample buffer, every pixel valid
    pub fn from_vec(
        name: impl Into<String>,
        rows: usize,
        cols: usize,
        samples: Vec<Sample>,
    ) -> ChangeResult<Self> {
        let data = BandData::from_shape_vec((rows, cols), samples)
            .map_err(|e| ChangeError::Processing(format!("Failed to reshape band data: {}", e)))?;
        Ok(Self::from_band(name, data))
    }

    /// Builder form of `add_band`
    pub fn with_band(mut self, name: impl Into<String>, data: BandData) -> ChangeResult<Self> {
        self.add_band(name, data)?;
        Ok(self)
    }

    /// Builder form of `update_mask`
    pub fn with_mask(mut self, mask: &ValidityMask) -> ChangeResult<Self> {
        self.update_mask(mask)?;
        Ok(self)
    }

    pub fn with_geo_transform(mut self, geo_transform: GeoTransform) -> Self {
        self.geo_transform = Some(geo_transform);
        self
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn geo_transform(&self) -> Option<&GeoTransform> {
        self.geo_transform.as_ref()
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b.name == name)
    }

    /// Band data by name
    pub fn band(&self, name: &str) -> ChangeResult<&BandData> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.data)
            .ok_or_else(|| ChangeError::MissingBand {
                band: name.to_string(),
                available: self.band_names().join(", "),
            })
    }

    /// First band; composites and change products carry exactly one
    pub fn primary_band(&self) -> ChangeResult<&Band> {
        self.bands.first().ok_or_else(|| ChangeError::MissingBand {
            band: "<primary>".to_string(),
            available: String::new(),
        })
    }

    /// Append a band, replacing any existing band of the same name
    pub fn add_band(&mut self, name: impl Into<String>, data: BandData) -> ChangeResult<()> {
        check_dims((self.rows, self.cols), data.dim())?;
        let name = name.into();
        if let Some(existing) = self.bands.iter_mut().find(|b| b.name == name) {
            log::debug!("Replacing existing band '{}'", name);
            existing.data = data;
        } else {
            self.bands.push(Band { name, data });
        }
        Ok(())
    }

    /// Single-band copy of `name`, keeping the mask and grid reference
    pub fn select(&self, name: &str) -> ChangeResult<Raster> {
        let data = self.band(name)?.clone();
        Ok(Raster {
            rows: self.rows,
            cols: self.cols,
            bands: vec![Band { name: name.to_string(), data }],
            mask: self.mask.clone(),
            geo_transform: self.geo_transform,
        })
    }

    /// Rename the primary band
    pub fn rename(mut self, name: impl Into<String>) -> ChangeResult<Self> {
        let band = self.bands.first_mut().ok_or_else(|| ChangeError::MissingBand {
            band: "<primary>".to_string(),
            available: String::new(),
        })?;
        band.name = name.into();
        Ok(self)
    }

    pub fn mask(&self) -> &ValidityMask {
        &self.mask
    }

    /// AND another mask into this raster's validity
    pub fn update_mask(&mut self, other: &ValidityMask) -> ChangeResult<()> {
        check_dims((self.rows, self.cols), other.dim())?;
        Zip::from(&mut self.mask)
            .and(other)
            .for_each(|valid, &keep| *valid = *valid && keep);
        Ok(())
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask.get((row, col)).copied().unwrap_or(false)
    }

    /// Value of the primary band, `None` when masked or out of bounds
    pub fn value(&self, row: usize, col: usize) -> Option<Sample> {
        if !self.is_valid(row, col) {
            return None;
        }
        self.bands.first().and_then(|b| b.data.get((row, col)).copied())
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    /// Fail unless `other` lies on exactly the same grid
    pub fn check_same_grid(&self, other: &Raster) -> ChangeResult<()> {
        check_dims(self.dim(), other.dim())?;
        match (&self.geo_transform, &other.geo_transform) {
            (Some(a), Some(b)) if a != b => Err(ChangeError::GeoTransformMismatch),
            _ => Ok(()),
        }
    }
}

pub(crate) fn check_dims(expected: (usize, usize), found: (usize, usize)) -> ChangeResult<()> {
    if expected != found {
        return Err(ChangeError::GridMismatch {
            expected_rows: expected.0,
            expected_cols: expected.1,
            found_rows: found.0,
            found_cols: found.1,
        });
    }
    Ok(())
}

/// One acquisition handed over by the catalog, already filtered upstream
#[derive(Debug, Clone)]
pub struct ScenePayload {
    id: String,
    sensor: SensorKind,
    acquired: DateTime<Utc>,
    raster: Raster,
}

impl ScenePayload {
    pub fn new(
        id: impl Into<String>,
        sensor: SensorKind,
        acquired: DateTime<Utc>,
        raster: Raster,
    ) -> Self {
        Self {
            id: id.into(),
            sensor,
            acquired,
            raster,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sensor(&self) -> SensorKind {
        self.sensor
    }

    pub fn acquired(&self) -> DateTime<Utc> {
        self.acquired
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Consume the payload, yielding its raster
    pub fn into_raster(self) -> Raster {
        self.raster
    }
}

/// Error types for change detection
#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    #[error("Grid mismatch: expected {expected_rows}x{expected_cols}, found {found_rows}x{found_cols}")]
    GridMismatch {
        expected_rows: usize,
        expected_cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("Grid mismatch: rasters do not share the same geotransform")]
    GeoTransformMismatch,

    #[error("Missing band '{band}' (available: [{available}])")]
    MissingBand { band: String, available: String },

    #[error("Empty scene collection: {0}")]
    EmptyCollection(String),

    #[error("Not enough scenes for {epoch}: need at least {required}, got {found}")]
    InsufficientScenes {
        epoch: String,
        required: usize,
        found: usize,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for change detection operations
pub type ChangeResult<T> = Result<T, ChangeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_missing_band_names_available() {
        let raster = Raster::from_band("B3", array![[1.0]]);
        let err = raster.band("B4").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("B4"));
        assert!(msg.contains("B3"));
    }

    #[test]
    fn test_from_vec_checks_length() {
        let raster = Raster::from_vec("B4", 2, 2, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(raster.value(1, 0), Some(0.3));
        assert!(matches!(
            Raster::from_vec("B4", 2, 2, vec![0.1, 0.2, 0.3]),
            Err(ChangeError::Processing(_))
        ));
    }

    #[test]
    fn test_update_mask_only_shrinks() {
        let mut raster = Raster::from_band("v", array![[1.0, 2.0], [3.0, 4.0]])
            .with_mask(&array![[true, false], [true, true]])
            .unwrap();
        raster.update_mask(&array![[true, true], [false, true]]).unwrap();

        assert_eq!(raster.mask(), &array![[true, false], [false, true]]);
        assert_eq!(raster.value(0, 0), Some(1.0));
        assert_eq!(raster.value(0, 1), None);
        assert_eq!(raster.value(1, 1), Some(4.0));
    }

    #[test]
    fn test_add_band_rejects_other_grid() {
        let mut raster = Raster::new(2, 2);
        let result = raster.add_band("x", BandData::zeros((3, 2)));
        assert!(matches!(result, Err(ChangeError::GridMismatch { .. })));
    }

    #[test]
    fn test_geo_transform_bounds() {
        let gt = GeoTransform::north_up(500_000.0, 5_500_000.0, 30.0);
        let bbox = gt.bounds(10, 20);
        assert_eq!(bbox.min_x, 500_000.0);
        assert_eq!(bbox.max_x, 500_600.0);
        assert_eq!(bbox.min_y, 5_499_700.0);
        assert_eq!(bbox.max_y, 5_500_000.0);
    }

    #[test]
    fn test_check_same_grid_detects_shifted_transform() {
        let a = Raster::new(2, 2).with_geo_transform(GeoTransform::north_up(0.0, 0.0, 30.0));
        let b = Raster::new(2, 2).with_geo_transform(GeoTransform::north_up(30.0, 0.0, 30.0));
        assert!(matches!(a.check_same_grid(&b), Err(ChangeError::GeoTransformMismatch)));
        assert!(a.check_same_grid(&Raster::new(2, 2)).is_ok());
    }
}
