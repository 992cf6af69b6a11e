//! vegchange: masked temporal compositing and vegetation change detection
//!
//! Turns two collections of cloud-masked optical scenes (a reference epoch and a
//! current epoch, possibly from different sensor generations) into per-pixel
//! percent change and z-score anomaly rasters of the vegetation index.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    Band, BandData, BoundingBox, ChangeError, ChangeResult, GeoTransform, Raster, ScenePayload,
    SensorKind, ValidityMask,
};

pub use io::{DisplayRange, OutputProduct, SceneCollection};

pub use crate::core::{
    ChangeDetectionConfig, ChangeDetectionPipeline, ChangeEngine, ClipMask, Composites,
    IndexCalculator, QualityMaskDecoder, TemporalReducer, TrendReducer,
};
