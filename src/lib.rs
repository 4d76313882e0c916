//! Verdant: cloud-masked Sentinel-2 composites and spectral index change accounting
//!
//! This library builds per-period median composites from a collection of
//! Sentinel-2 scenes, derives normalized-difference indices (NDVI, MNDWI,
//! NDBI, NDSLI), classifies two-date index change against thresholds and
//! reports the changed area over a region of interest. Difference and class
//! rasters are handed to an export sink as asynchronous jobs.

pub mod types;
pub mod config;
pub mod core;
pub mod io;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, DateRange, GeoGrid, GeoTransform, PixelValue, Roi, VerdantError, VerdantResult,
};

pub use config::{AnalysisConfig, ExportParams, IndexStackConfig};
pub use core::{ChangeAnalysis, ChangeReport, Image, ImageCollection, IndexStack};
pub use io::{ExportSink, HttpExportSink, LocalExportSink, SceneCatalog};
