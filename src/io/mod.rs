//! Scene catalog, band file encoding and raster export

pub mod raster;
pub mod catalog;
pub mod export;

pub use raster::SampleFormat;
pub use catalog::{SceneCatalog, SceneManifest};
pub use export::{
    ExportJob, ExportRequest, ExportSink, HttpExportSink, JobStatus, LocalExportSink,
};
