//! Core compositing, index and change-accounting modules

pub mod maybe_rayon;
pub mod image;
pub mod cloud_mask;
pub mod collection;
pub mod composite;
pub mod indices;
pub mod change;
pub mod reduce;
pub mod report;
pub mod pipeline;

// Re-export main types
pub use image::{Band, Image, ImageProperties};
pub use cloud_mask::{CloudMaskParams, CloudMasker};
pub use collection::ImageCollection;
pub use composite::{CompositeParams, TemporalCompositor};
pub use indices::{IndexCalculator, IndexMode, IndexSpec, SpectralIndex};
pub use change::{ChangeClass, ChangeThresholds, CHANGE_CLASS_BAND};
pub use reduce::{ReductionParams, RegionReducer, SamplingGrid};
pub use report::{ChangeReport, ExportOutcome};
pub use pipeline::{ChangeAnalysis, ChangeProducts, IndexStack};
