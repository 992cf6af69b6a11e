//! Per-pixel temporal compositing of masked index stacks
//!
//! Each pixel keeps a running (count, mean, M2) triple which is updated one
//! scene at a time and can be merged with another partial result. The merge
//! is associative and commutative, so scene order and any split of the stack
//! into partial accumulators give the same composites up to rounding.

use crate::types::{
    check_dims, BandData, ChangeError, ChangeResult, GeoTransform, Raster, ValidityMask,
};
use ndarray::{Array2, Zip};
use std::borrow::Borrow;

pub const MEAN_BAND: &str = "mean";
pub const STD_DEV_BAND: &str = "stdDev";
pub const COUNT_BAND: &str = "count";

/// Running first and second moments of one pixel's valid observations
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PixelMoments {
    count: u32,
    mean: f64,
    m2: f64,
}

impl PixelMoments {
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Fold another partial result into this one
    #[inline]
    pub fn merge(&mut self, other: &PixelMoments) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;

        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Biased (divide by N) standard deviation
    pub fn population_std_dev(&self) -> Option<f64> {
        (self.count > 0).then(|| (self.m2.max(0.0) / self.count as f64).sqrt())
    }
}

/// Mean, standard deviation and observation count composites of one epoch
#[derive(Debug, Clone)]
pub struct Composites {
    pub mean: Raster,
    pub std_dev: Raster,
    /// Valid observations per pixel; every pixel of this raster is valid
    pub count: Raster,
    pub scene_count: usize,
}

/// Streaming accumulator holding O(grid) state regardless of stack length
#[derive(Debug, Clone)]
pub struct TemporalAccumulator {
    moments: Array2<PixelMoments>,
    geo_transform: Option<GeoTransform>,
    scenes: usize,
}

impl TemporalAccumulator {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            moments: Array2::from_elem((rows, cols), PixelMoments::default()),
            geo_transform: None,
            scenes: 0,
        }
    }

    /// Accumulator on the same grid as `template`
    pub fn for_raster(template: &Raster) -> Self {
        let (rows, cols) = template.dim();
        let mut acc = Self::new(rows, cols);
        acc.geo_transform = template.geo_transform().copied();
        acc
    }

    pub fn scene_count(&self) -> usize {
        self.scenes
    }

    /// Add one scene's valid samples of `values`.
    ///
    /// Samples that are valid in the mask but not finite are skipped.
    pub fn push_band(&mut self, values: &BandData, mask: &ValidityMask) -> ChangeResult<()> {
        check_dims(self.moments.dim(), values.dim())?;
        check_dims(self.moments.dim(), mask.dim())?;

        let zip = Zip::from(&mut self.moments).and(values).and(mask);
        let update = |m: &mut PixelMoments, &v: &f64, &valid: &bool| {
            if valid && v.is_finite() {
                m.push(v);
            }
        };
        #[cfg(feature = "parallel")]
        zip.par_for_each(update);
        #[cfg(not(feature = "parallel"))]
        zip.for_each(update);

        self.scenes += 1;
        Ok(())
    }

    /// Add the primary band of a scene raster
    pub fn push(&mut self, raster: &Raster) -> ChangeResult<()> {
        self.check_grid(raster)?;
        self.push_band(&raster.primary_band()?.data, raster.mask())
    }

    /// Add a named band of a scene raster
    pub fn push_named(&mut self, raster: &Raster, band: &str) -> ChangeResult<()> {
        self.check_grid(raster)?;
        self.push_band(raster.band(band)?, raster.mask())
    }

    /// Fold a partial accumulator built over a disjoint subset of scenes
    pub fn merge(&mut self, other: &TemporalAccumulator) -> ChangeResult<()> {
        check_dims(self.moments.dim(), other.moments.dim())?;
        if let (Some(a), Some(b)) = (&self.geo_transform, &other.geo_transform) {
            if a != b {
                return Err(ChangeError::GeoTransformMismatch);
            }
        }
        Zip::from(&mut self.moments)
            .and(&other.moments)
            .for_each(|a, b| a.merge(b));
        self.scenes += other.scenes;
        if self.geo_transform.is_none() {
            self.geo_transform = other.geo_transform;
        }
        Ok(())
    }

    /// Turn the running moments into composites; pixels without any valid
    /// observation are invalid (and NaN) in mean and stdDev
    pub fn finish(self) -> ChangeResult<Composites> {
        let mean = self.moments.map(|m| m.mean().unwrap_or(f64::NAN));
        let std_dev = self
            .moments
            .map(|m| m.population_std_dev().unwrap_or(f64::NAN));
        let count = self.moments.map(|m| m.count() as f64);
        let observed: ValidityMask = self.moments.map(|m| m.count() > 0);
        let all_valid = ValidityMask::from_elem(self.moments.dim(), true);

        Ok(Composites {
            mean: Raster::from_parts(MEAN_BAND, mean, observed.clone(), self.geo_transform)?,
            std_dev: Raster::from_parts(STD_DEV_BAND, std_dev, observed, self.geo_transform)?,
            count: Raster::from_parts(COUNT_BAND, count, all_valid, self.geo_transform)?,
            scene_count: self.scenes,
        })
    }

    fn check_grid(&self, raster: &Raster) -> ChangeResult<()> {
        check_dims(self.moments.dim(), raster.dim())?;
        match (&self.geo_transform, raster.geo_transform()) {
            (Some(a), Some(b)) if a != b => Err(ChangeError::GeoTransformMismatch),
            _ => Ok(()),
        }
    }
}

/// Folds a stack of masked index rasters into mean / stdDev composites
#[derive(Debug, Clone, Default)]
pub struct TemporalReducer {
    band: Option<String>,
}

impl TemporalReducer {
    /// Reducer over each raster's primary band
    pub fn new() -> Self {
        Self { band: None }
    }

    /// Reducer over a named band of each raster
    pub fn for_band(band: impl Into<String>) -> Self {
        Self {
            band: Some(band.into()),
        }
    }

    /// Reduce a non-empty stack sharing one grid
    pub fn reduce(&self, rasters: &[Raster]) -> ChangeResult<Composites> {
        self.reduce_iter(rasters)
    }

    /// Streaming form of `reduce`; only one input raster needs to be alive at a time
    pub fn reduce_iter<I>(&self, rasters: I) -> ChangeResult<Composites>
    where
        I: IntoIterator,
        I::Item: Borrow<Raster>,
    {
        self.try_reduce(rasters.into_iter().map(Ok))
    }

    /// Streaming reduction over rasters that are produced fallibly, e.g. by
    /// per-scene masking; the first error aborts the reduction
    pub fn try_reduce<I, R>(&self, rasters: I) -> ChangeResult<Composites>
    where
        I: IntoIterator<Item = ChangeResult<R>>,
        R: Borrow<Raster>,
    {
        let mut rasters = rasters.into_iter();
        let (mut acc, rows, cols) = match rasters.next() {
            Some(first) => {
                let first = first?;
                let first: &Raster = first.borrow();
                let mut acc = TemporalAccumulator::for_raster(first);
                self.push(&mut acc, first)?;
                (acc, first.rows(), first.cols())
            }
            None => {
                return Err(ChangeError::EmptyCollection(
                    "temporal reduction needs at least one raster".to_string(),
                ))
            }
        };

        for raster in rasters {
            let raster = raster?;
            self.push(&mut acc, raster.borrow())?;
        }

        log::debug!(
            "Reduced {} rasters of {}x{} into mean/stdDev composites",
            acc.scene_count(),
            rows,
            cols
        );
        acc.finish()
    }

    fn push(&self, acc: &mut TemporalAccumulator, raster: &Raster) -> ChangeResult<()> {
        match &self.band {
            Some(band) => acc.push_named(raster, band),
            None => acc.push(raster),
        }
    }
}
