use crate::core::change_engine::{ChangeEngine, ANOMALY_BAND, RELATIVE_CHANGE_BAND};
use crate::core::clip_mask::ClipMask;
use crate::core::quality_mask::QualityMaskDecoder;
use crate::core::spectral_index::IndexCalculator;
use crate::core::temporal_reduce::{Composites, TemporalReducer};
use crate::core::trend::{TrendComposites, TrendReducer, DEFAULT_TIME_SCALE, SCALE_BAND};
use crate::io::{DisplayRange, OutputProduct, SceneCollection};
use crate::types::{ChangeError, ChangeResult, Raster, ScenePayload, SensorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Change detection run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeDetectionConfig {
    /// Minimum number of scenes each epoch must supply
    pub min_scenes_per_epoch: usize,
    /// Export pixel size in map units
    pub output_resolution: f64,
    /// Divisor applied to epoch milliseconds for the trend time axis
    pub trend_time_scale: f64,
    pub change_display: DisplayRange,
    pub anomaly_display: DisplayRange,
    /// Clip the epoch composites to the AOI as well as the change products
    pub clip_composites: bool,
}

impl Default for ChangeDetectionConfig {
    fn default() -> Self {
        Self {
            min_scenes_per_epoch: 1,
            output_resolution: 30.0,
            trend_time_scale: DEFAULT_TIME_SCALE,
            change_display: DisplayRange::RELATIVE_CHANGE,
            anomaly_display: DisplayRange::ANOMALY,
            clip_composites: false,
        }
    }
}

impl ChangeDetectionConfig {
    pub fn validate(&self) -> ChangeResult<()> {
        if self.min_scenes_per_epoch == 0 {
            return Err(ChangeError::InvalidParameter(
                "min_scenes_per_epoch must be at least 1".to_string(),
            ));
        }
        if !(self.output_resolution.is_finite() && self.output_resolution > 0.0) {
            return Err(ChangeError::InvalidParameter(format!(
                "output_resolution must be positive, got {}",
                self.output_resolution
            )));
        }
        TrendReducer::new(self.trend_time_scale)?;
        DisplayRange::new(self.change_display.min, self.change_display.max)?;
        DisplayRange::new(self.anomaly_display.min, self.anomaly_display.max)?;
        Ok(())
    }
}

/// A scene after QA masking and index computation
#[derive(Debug, Clone)]
pub struct PreparedScene {
    pub id: String,
    pub sensor: SensorKind,
    pub acquired: DateTime<Utc>,
    /// Single-band index raster carrying the scene's final mask
    pub index: Raster,
}

/// Everything produced by a two-epoch change run
#[derive(Debug, Clone)]
pub struct ChangeDetectionResult {
    pub reference: Composites,
    pub current: Composites,
    pub relative_change: OutputProduct,
    pub standardized_anomaly: OutputProduct,
}

/// Everything produced by a trend run
#[derive(Debug, Clone)]
pub struct TrendResult {
    pub trend: TrendComposites,
    pub scale: OutputProduct,
}

/// Scene collections in, change products out
#[derive(Debug, Clone)]
pub struct ChangeDetectionPipeline {
    config: ChangeDetectionConfig,
}

impl ChangeDetectionPipeline {
    pub fn new(config: ChangeDetectionConfig) -> ChangeResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Pipeline with default configuration
    pub fn standard() -> Self {
        Self {
            config: ChangeDetectionConfig::default(),
        }
    }

    pub fn config(&self) -> &ChangeDetectionConfig {
        &self.config
    }

    /// QA-mask a scene and reduce it to its sensor's index band
    pub fn prepare_scene(&self, scene: ScenePayload) -> ChangeResult<PreparedScene> {
        let id = scene.id().to_string();
        let sensor = scene.sensor();
        let acquired = scene.acquired();
        let mut raster = scene.into_raster();

        QualityMaskDecoder::new(sensor).apply(&mut raster)?;
        let calculator = IndexCalculator::for_sensor(sensor);
        calculator.apply(&mut raster)?;
        let index = raster.select(calculator.binding().output)?;

        if index.valid_count() == 0 {
            log::warn!("Scene '{}' ({}) contributes no valid pixels", id, sensor);
        } else {
            log::debug!(
                "Scene '{}' ({}, {}): {} valid pixels",
                id,
                sensor,
                acquired.format("%Y-%m-%d"),
                index.valid_count()
            );
        }

        Ok(PreparedScene {
            id,
            sensor,
            acquired,
            index,
        })
    }

    fn check_epoch(&self, epoch: &str, scenes: &SceneCollection) -> ChangeResult<()> {
        if scenes.is_empty() {
            return Err(ChangeError::EmptyCollection(format!("{} epoch has no scenes", epoch)));
        }
        if scenes.len() < self.config.min_scenes_per_epoch {
            return Err(ChangeError::InsufficientScenes {
                epoch: epoch.to_string(),
                required: self.config.min_scenes_per_epoch,
                found: scenes.len(),
            });
        }
        scenes.validate_grid()?;
        log::info!("{} epoch: {}", epoch, scenes.summary());
        Ok(())
    }

    /// Mean / stdDev / count composites of one epoch
    pub fn composite_epoch(&self, epoch: &str, scenes: SceneCollection) -> ChangeResult<Composites> {
        self.check_epoch(epoch, &scenes)?;
        TemporalReducer::new().try_reduce(
            scenes
                .into_iter()
                .map(|scene| self.prepare_scene(scene).map(|prepared| prepared.index)),
        )
    }

    /// Full two-epoch run: composites, change, anomaly, AOI clip
    pub fn run(
        &self,
        reference: SceneCollection,
        current: SceneCollection,
        aoi: Option<&ClipMask>,
    ) -> ChangeResult<ChangeDetectionResult> {
        log::info!("🌿 Starting vegetation change detection");

        #[cfg(feature = "parallel")]
        let (reference, current) = rayon::join(
            || self.composite_epoch("reference", reference),
            || self.composite_epoch("current", current),
        );
        #[cfg(not(feature = "parallel"))]
        let (reference, current) = (
            self.composite_epoch("reference", reference),
            self.composite_epoch("current", current),
        );
        let mut reference = reference?;
        let mut current = current?;

        let mut products = ChangeEngine::new().compute(&reference, &current)?;

        if let Some(aoi) = aoi {
            log::debug!("Clipping outputs to AOI ({} pixels inside)", aoi.coverage());
            aoi.apply_in_place(&mut products.relative_change)?;
            aoi.apply_in_place(&mut products.standardized_anomaly)?;
            if self.config.clip_composites {
                // count stays valid everywhere
                for composites in [&mut reference, &mut current] {
                    aoi.apply_in_place(&mut composites.mean)?;
                    aoi.apply_in_place(&mut composites.std_dev)?;
                }
            }
        }

        let relative_change = OutputProduct::new(
            RELATIVE_CHANGE_BAND,
            products.relative_change,
            Some(self.config.change_display),
            self.config.output_resolution,
        )?;
        let standardized_anomaly = OutputProduct::new(
            ANOMALY_BAND,
            products.standardized_anomaly,
            Some(self.config.anomaly_display),
            self.config.output_resolution,
        )?;

        log::info!("✅ Change detection completed");
        Ok(ChangeDetectionResult {
            reference,
            current,
            relative_change,
            standardized_anomaly,
        })
    }

    /// Linear trend of the index over a (possibly mixed-sensor) collection
    pub fn run_trend(
        &self,
        collection: SceneCollection,
        aoi: Option<&ClipMask>,
    ) -> ChangeResult<TrendResult> {
        log::info!("📈 Starting index trend fit");

        let mut collection = collection;
        collection.sort_by_time();
        self.check_epoch("trend", &collection)?;

        let reducer = TrendReducer::new(self.config.trend_time_scale)?;
        let mut trend = reducer.try_reduce(collection.into_iter().map(|scene| {
            self.prepare_scene(scene)
                .map(|prepared| (prepared.acquired, prepared.index))
        }))?;

        if let Some(aoi) = aoi {
            aoi.apply_in_place(&mut trend.scale)?;
            aoi.apply_in_place(&mut trend.offset)?;
        }

        let scale = OutputProduct::new(
            SCALE_BAND,
            trend.scale.clone(),
            None,
            self.config.output_resolution,
        )?;

        log::info!("✅ Trend fit completed over {} scenes", trend.scene_count);
        Ok(TrendResult { trend, scale })
    }
}
