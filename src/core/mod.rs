//! Core change detection modules

pub mod quality_mask;
pub mod spectral_index;
pub mod temporal_reduce;
pub mod change_engine;
pub mod clip_mask;
pub mod trend;
pub mod pipeline;

// Re-export main types
pub use quality_mask::QualityMaskDecoder;
pub use spectral_index::{normalized_difference, BandBinding, IndexCalculator};
pub use temporal_reduce::{Composites, PixelMoments, TemporalAccumulator, TemporalReducer};
pub use change_engine::{ChangeEngine, ChangeProducts};
pub use clip_mask::ClipMask;
pub use trend::{TrendAccumulator, TrendComposites, TrendMoments, TrendReducer};
pub use pipeline::{
    ChangeDetectionConfig, ChangeDetectionPipeline, ChangeDetectionResult, PreparedScene, TrendResult,
};
