//! End-to-end workflows built from the core components
//!
//! `ChangeAnalysis` composites two years, differences their index, accounts
//! increase / decrease areas and exports the difference and class rasters.
//! `IndexStack` composites one period and appends the index bands.

use crate::config::{AnalysisConfig, IndexStackConfig};
use crate::core::change::{classify, decreased_mask, difference, increased_mask, no_change_mask};
use crate::core::collection::ImageCollection;
use crate::core::composite::TemporalCompositor;
use crate::core::image::Image;
use crate::core::indices::{normalized_difference, IndexCalculator, IndexMode};
use crate::core::reduce::RegionReducer;
use crate::core::report::{ChangeReport, ExportOutcome};
use crate::io::export::{ExportRequest, ExportSink};
use crate::types::{DateRange, Roi, VerdantResult};

/// Intermediate rasters of a change analysis
#[derive(Debug, Clone)]
pub struct ChangeProducts {
    pub earlier_composite: Image,
    pub later_composite: Image,
    /// Index of the earlier composite, band `<INDEX>_<year>`
    pub earlier_index: Image,
    pub later_index: Image,
    /// `later - earlier`, band `<INDEX>_Difference`
    pub difference: Image,
    /// Three-class raster, band `changeClass`
    pub change_class: Image,
    pub increased: Image,
    pub decreased: Image,
    pub no_change: Image,
}

/// Two-date spectral index change analysis
pub struct ChangeAnalysis {
    config: AnalysisConfig,
    roi: Roi,
    compositor: TemporalCompositor,
    reducer: RegionReducer,
}

impl ChangeAnalysis {
    pub fn new(config: AnalysisConfig) -> VerdantResult<Self> {
        config.validate()?;
        let roi = config.roi.to_roi()?;
        let compositor = TemporalCompositor::new(config.composite.clone())?;
        let reducer = RegionReducer::new(config.reduction.clone())?;
        Ok(Self { config, roi, compositor, reducer })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn roi(&self) -> &Roi {
        &self.roi
    }

    fn difference_band_name(&self) -> String {
        format!("{}_Difference", self.config.index.name)
    }

    /// Composites, indices, difference, class raster and change masks
    pub fn products(&self, collection: &ImageCollection) -> VerdantResult<ChangeProducts> {
        let cfg = &self.config;
        let index = &cfg.index;
        log::info!(
            "{} change analysis {} -> {} over {} scenes",
            index.name,
            cfg.earlier_year,
            cfg.later_year,
            collection.len()
        );

        let earlier_composite =
            self.compositor
                .composite_year(collection, cfg.earlier_year, &self.roi, cfg.cloud_threshold)?;
        let later_composite =
            self.compositor
                .composite_year(collection, cfg.later_year, &self.roi, cfg.cloud_threshold)?;

        let earlier_index = normalized_difference(
            &earlier_composite,
            &index.band_a,
            &index.band_b,
            &format!("{}_{}", index.name, cfg.earlier_year),
        )?;
        let later_index = normalized_difference(
            &later_composite,
            &index.band_a,
            &index.band_b,
            &format!("{}_{}", index.name, cfg.later_year),
        )?;

        let difference = difference(&later_index, &earlier_index, &self.difference_band_name())?;
        let change_class = classify(&difference, &cfg.thresholds)?;
        let increased = increased_mask(&difference, &cfg.thresholds, &format!("{}_increase", index.name))?;
        let decreased = decreased_mask(&difference, &cfg.thresholds, &format!("{}_decrease", index.name))?;
        let no_change = no_change_mask(&difference, &cfg.thresholds, &format!("{}_no_change", index.name))?;

        log::debug!(
            "Difference has {} valid pixels: {} increased, {} decreased",
            difference.single_band()?.valid_count(),
            increased.single_band()?.valid_count(),
            decreased.single_band()?.valid_count()
        );

        Ok(ChangeProducts {
            earlier_composite,
            later_composite,
            earlier_index,
            later_index,
            difference,
            change_class,
            increased,
            decreased,
            no_change,
        })
    }

    /// Full run: products, area accounting, mean change and exports.
    ///
    /// Export failures are recorded in the report; scalar results are kept.
    pub fn run(&self, collection: &ImageCollection, sink: &dyn ExportSink) -> VerdantResult<ChangeReport> {
        let products = self.products(collection)?;
        let cfg = &self.config;

        let increase_area_m2 = self.reducer.sum_area(&products.increased, &self.roi)?;
        let decrease_area_m2 = self.reducer.sum_area(&products.decreased, &self.roi)?;
        let no_change_area_m2 = self.reducer.sum_area(&products.no_change, &self.roi)?;
        let mean_difference = self
            .reducer
            .mean(&products.difference, &self.difference_band_name(), &self.roi)?;

        log::info!(
            "{} increase {:.2} sq.m, decrease {:.2} sq.m, mean change {:?}",
            cfg.index.name,
            increase_area_m2,
            decrease_area_m2,
            mean_difference
        );

        let exports = if cfg.export.enabled {
            let idx = &cfg.index.name;
            let (later, earlier) = (cfg.later_year, cfg.earlier_year);
            vec![
                self.export(
                    sink,
                    &products.difference,
                    format!("{}_Difference_{}_minus_{}", idx, later, earlier),
                    format!("{}_Diff_{}_{}", idx, later, earlier),
                ),
                self.export(
                    sink,
                    &products.change_class,
                    format!("{}_ChangeClass_{}_{}", idx, later, earlier),
                    format!("{}_ChangeClass_{}_{}", idx, later, earlier),
                ),
            ]
        } else {
            log::debug!("Exports disabled");
            Vec::new()
        };

        Ok(ChangeReport {
            index_name: cfg.index.name.clone(),
            earlier_year: cfg.earlier_year,
            later_year: cfg.later_year,
            thresholds: cfg.thresholds,
            increase_area_m2,
            decrease_area_m2,
            no_change_area_m2,
            mean_difference,
            exports,
        })
    }

    fn export(&self, sink: &dyn ExportSink, image: &Image, description: String, prefix: String) -> ExportOutcome {
        let params = &self.config.export;
        let request = ExportRequest {
            image: image.clone(),
            description: description.clone(),
            folder: params.folder.clone(),
            file_name_prefix: prefix,
            region: self.roi.clone(),
            scale: params.scale,
            crs: params.crs.clone(),
            max_pixels: params.max_pixels,
        };
        let job = sink.submit(request);
        match &job {
            Ok(job) => log::info!("Export '{}' submitted as job {}", description, job.id()),
            Err(e) => log::warn!("Export '{}' failed at submission: {}", description, e),
        }
        ExportOutcome { description, job }
    }
}

/// Median composite of one period with normalized-difference bands added
pub struct IndexStack {
    config: IndexStackConfig,
    roi: Roi,
    range: DateRange,
    compositor: TemporalCompositor,
    calculator: IndexCalculator,
}

impl IndexStack {
    pub fn new(config: IndexStackConfig) -> VerdantResult<Self> {
        config.validate()?;
        let roi = config.roi.to_roi()?;
        let range = config.date_range()?;
        let compositor = TemporalCompositor::new(config.composite.clone())?;
        let calculator = IndexCalculator::new(config.indices.clone())?;
        Ok(Self { config, roi, range, compositor, calculator })
    }

    pub fn config(&self) -> &IndexStackConfig {
        &self.config
    }

    pub fn run(&self, collection: &ImageCollection) -> VerdantResult<Image> {
        let composite = self.compositor.composite_range(
            collection,
            &self.range,
            &self.roi,
            self.config.cloud_threshold,
        )?;
        let mode = if self.config.replace_bands {
            IndexMode::Replace
        } else {
            IndexMode::Append
        };
        let stacked = self.calculator.compute(&composite, mode)?;
        log::info!("Index stack bands: {:?}", stacked.band_names());
        Ok(stacked)
    }
}
