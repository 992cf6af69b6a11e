use crate::types::{check_dims, ChangeResult, Raster, ValidityMask};

/// Region-of-interest footprint rasterized onto the pipeline grid.
///
/// Polygon handling stays with the geometry collaborator; this only ANDs the
/// resulting boolean grid into raster masks.
#[derive(Debug, Clone)]
pub struct ClipMask {
    mask: ValidityMask,
}

impl ClipMask {
    pub fn new(mask: ValidityMask) -> Self {
        Self { mask }
    }

    /// Build a footprint from an inside/outside predicate over (row, col)
    pub fn from_fn<F>(rows: usize, cols: usize, inside: F) -> Self
    where
        F: Fn(usize, usize) -> bool,
    {
        Self {
            mask: ValidityMask::from_shape_fn((rows, cols), |(r, c)| inside(r, c)),
        }
    }

    pub fn mask(&self) -> &ValidityMask {
        &self.mask
    }

    pub fn dim(&self) -> (usize, usize) {
        self.mask.dim()
    }

    /// Pixels inside the footprint
    pub fn coverage(&self) -> usize {
        self.mask.iter().filter(|&&inside| inside).count()
    }

    /// Restrict `raster` to the footprint in place; values are untouched
    pub fn apply_in_place(&self, raster: &mut Raster) -> ChangeResult<()> {
        check_dims(raster.dim(), self.mask.dim())?;
        raster.update_mask(&self.mask)
    }

    /// Clipped copy of `raster`
    pub fn apply(&self, raster: &Raster) -> ChangeResult<Raster> {
        let mut clipped = raster.clone();
        self.apply_in_place(&mut clipped)?;
        Ok(clipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeError;
    use ndarray::array;

    #[test]
    fn test_clip_is_monotonic() {
        let raster = Raster::from_parts(
            "ndviChange",
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            array![[true, false, true], [true, true, false]],
            None,
        )
        .unwrap();
        let aoi = ClipMask::from_fn(2, 3, |_, c| c < 2);

        let clipped = aoi.apply(&raster).unwrap();

        for r in 0..2 {
            for c in 0..3 {
                if !raster.is_valid(r, c) {
                    assert!(!clipped.is_valid(r, c));
                }
                if clipped.is_valid(r, c) {
                    assert_eq!(clipped.value(r, c), raster.value(r, c));
                }
            }
        }
        assert_eq!(clipped.valid_count(), 3);
        assert_eq!(aoi.coverage(), 4);
    }

    #[test]
    fn test_clip_grid_mismatch() {
        let mut raster = Raster::from_band("v", array![[1.0, 2.0]]);
        let aoi = ClipMask::new(array![[true], [true]]);
        assert!(matches!(
            aoi.apply_in_place(&mut raster),
            Err(ChangeError::GridMismatch { .. })
        ));
    }
}
