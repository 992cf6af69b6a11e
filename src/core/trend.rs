//! Per-pixel linear trend of the index through time
//!
//! Fits `index = offset + scale * t` by ordinary least squares, where `t` is
//! the acquisition time in epoch milliseconds divided by a time scale. The
//! fit is accumulated as running co-moments, so it shares the streaming and
//! order-independence properties of the temporal composites.

use crate::types::{
    check_dims, BandData, ChangeError, ChangeResult, GeoTransform, Raster, ValidityMask,
};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

pub const SCALE_BAND: &str = "scale";
pub const OFFSET_BAND: &str = "offset";

/// Divisor applied to epoch milliseconds to form the regression time axis
pub const DEFAULT_TIME_SCALE: f64 = 1e18;

/// Running sums for a bivariate least-squares fit of one pixel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrendMoments {
    count: u32,
    mean_t: f64,
    mean_y: f64,
    m2_t: f64,
    c_ty: f64,
}

impl TrendMoments {
    #[inline]
    pub fn push(&mut self, t: f64, y: f64) {
        self.count += 1;
        let n = self.count as f64;
        let dt = t - self.mean_t;
        self.mean_t += dt / n;
        self.mean_y += (y - self.mean_y) / n;
        self.m2_t += dt * (t - self.mean_t);
        self.c_ty += dt * (y - self.mean_y);
    }

    #[inline]
    pub fn merge(&mut self, other: &TrendMoments) {
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
        let dt = other.mean_t - self.mean_t;
        let dy = other.mean_y - self.mean_y;
        let weight = n_a * n_b / n;

        self.mean_t += dt * n_b / n;
        self.mean_y += dy * n_b / n;
        self.m2_t += other.m2_t + dt * dt * weight;
        self.c_ty += other.c_ty + dt * dy * weight;
        self.count += other.count;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// (scale, offset); needs two observations at distinct times
    pub fn fit(&self) -> Option<(f64, f64)> {
        if self.count < 2 || !(self.m2_t > 0.0) {
            return None;
        }
        let scale = self.c_ty / self.m2_t;
        let offset = self.mean_y - scale * self.mean_t;
        (scale.is_finite() && offset.is_finite()).then_some((scale, offset))
    }
}

/// Slope and intercept composites
#[derive(Debug, Clone)]
pub struct TrendComposites {
    pub scale: Raster,
    pub offset: Raster,
    pub scene_count: usize,
}

/// Streaming trend accumulator over one grid
#[derive(Debug, Clone)]
pub struct TrendAccumulator {
    moments: Array2<TrendMoments>,
    geo_transform: Option<GeoTransform>,
    scenes: usize,
}

impl TrendAccumulator {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            moments: Array2::from_elem((rows, cols), TrendMoments::default()),
            geo_transform: None,
            scenes: 0,
        }
    }

    pub fn for_raster(template: &Raster) -> Self {
        let (rows, cols) = template.dim();
        let mut acc = Self::new(rows, cols);
        acc.geo_transform = template.geo_transform().copied();
        acc
    }

    pub fn scene_count(&self) -> usize {
        self.scenes
    }

    /// Add one observation time `t` (already scaled) with its valid samples
    pub fn push_band(&mut self, t: f64, values: &BandData, mask: &ValidityMask) -> ChangeResult<()> {
        if !t.is_finite() {
            return Err(ChangeError::InvalidParameter(format!(
                "trend time coordinate must be finite, got {}",
                t
            )));
        }
        check_dims(self.moments.dim(), values.dim())?;
        check_dims(self.moments.dim(), mask.dim())?;

        let zip = Zip::from(&mut self.moments).and(values).and(mask);
        let update = |m: &mut TrendMoments, &y: &f64, &valid: &bool| {
            if valid && y.is_finite() {
                m.push(t, y);
            }
        };
        #[cfg(feature = "parallel")]
        zip.par_for_each(update);
        #[cfg(not(feature = "parallel"))]
        zip.for_each(update);

        self.scenes += 1;
        Ok(())
    }

    /// Add the primary band of a raster observed at scaled time `t`
    pub fn push(&mut self, t: f64, raster: &Raster) -> ChangeResult<()> {
        check_dims(self.moments.dim(), raster.dim())?;
        if let (Some(a), Some(b)) = (&self.geo_transform, raster.geo_transform()) {
            if a != b {
                return Err(ChangeError::GeoTransformMismatch);
            }
        }
        self.push_band(t, &raster.primary_band()?.data, raster.mask())
    }

    pub fn merge(&mut self, other: &TrendAccumulator) -> ChangeResult<()> {
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

    pub fn finish(self) -> ChangeResult<TrendComposites> {
        let fits = self.moments.map(TrendMoments::fit);
        let mask: ValidityMask = fits.map(Option::is_some);
        let scale = fits.map(|f| f.map_or(f64::NAN, |(s, _)| s));
        let offset = fits.map(|f| f.map_or(f64::NAN, |(_, o)| o));

        Ok(TrendComposites {
            scale: Raster::from_parts(SCALE_BAND, scale, mask.clone(), self.geo_transform)?,
            offset: Raster::from_parts(OFFSET_BAND, offset, mask, self.geo_transform)?,
            scene_count: self.scenes,
        })
    }
}

/// Reduces a time-stamped index stack into a per-pixel linear fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReducer {
    time_scale: f64,
}

impl Default for TrendReducer {
    fn default() -> Self {
        Self {
            time_scale: DEFAULT_TIME_SCALE,
        }
    }
}

impl TrendReducer {
    pub fn new(time_scale: f64) -> ChangeResult<Self> {
        if !(time_scale.is_finite() && time_scale > 0.0) {
            return Err(ChangeError::InvalidParameter(format!(
                "time scale must be positive and finite, got {}",
                time_scale
            )));
        }
        Ok(Self { time_scale })
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Regression time coordinate of an acquisition
    pub fn time_coordinate(&self, acquired: DateTime<Utc>) -> f64 {
        acquired.timestamp_millis() as f64 / self.time_scale
    }

    pub fn reduce<I, R>(&self, observations: I) -> ChangeResult<TrendComposites>
    where
        I: IntoIterator<Item = (DateTime<Utc>, R)>,
        R: Borrow<Raster>,
    {
        self.try_reduce(observations.into_iter().map(Ok))
    }

    /// Streaming fit over fallibly produced (acquisition time, raster) pairs
    pub fn try_reduce<I, R>(&self, observations: I) -> ChangeResult<TrendComposites>
    where
        I: IntoIterator<Item = ChangeResult<(DateTime<Utc>, R)>>,
        R: Borrow<Raster>,
    {
        let mut observations = observations.into_iter();
        let mut acc = match observations.next() {
            Some(first) => {
                let (acquired, raster) = first?;
                let raster: &Raster = raster.borrow();
                let mut acc = TrendAccumulator::for_raster(raster);
                acc.push(self.time_coordinate(acquired), raster)?;
                acc
            }
            None => {
                return Err(ChangeError::EmptyCollection(
                    "trend fit needs at least one raster".to_string(),
                ))
            }
        };

        for observation in observations {
            let (acquired, raster) = observation?;
            let raster: &Raster = raster.borrow();
            acc.push(self.time_coordinate(acquired), raster)?;
        }

        log::debug!("Fitted linear trend over {} rasters", acc.scene_count());
        acc.finish()
    }
}
