//! Boundary types exchanged with the catalog, visualization and export collaborators

pub mod collection;
pub mod product;

pub use collection::{CollectionSummary, SceneCollection};
pub use product::{DisplayRange, OutputProduct, RasterStatistics};
