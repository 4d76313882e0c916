//! Analysis configuration
//!
//! Defaults reproduce the canonical Sentinel-2 NDVI change run: a
//! 15-vertex AOI in West Bengal, 2020 vs 2024 composites with cloudiness
//! below 40%, ±0.1 thresholds, 10 m reductions and EPSG:4326 exports to
//! the `LULC` folder.

use crate::core::change::ChangeThresholds;
use crate::core::composite::CompositeParams;
use crate::core::indices::{IndexSpec, SpectralIndex};
use crate::core::reduce::ReductionParams;
use crate::types::{DateRange, Roi, VerdantError, VerdantResult};
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_AOI: [(f64, f64); 15] = [
    (87.61784545898368, 22.82693150871734),
    (87.6521777343743, 22.80288039900524),
    (87.72633544921806, 22.796550453875298),
    (87.83619873046806, 22.790220214813314),
    (87.8993701171868, 22.810475945081294),
    (87.9323291015618, 22.85983666774265),
    (87.9488085937493, 22.924358259137705),
    (87.89799682617118, 22.96356226130795),
    (87.8059863281243, 22.986320661956555),
    (87.73869506835868, 22.986320661956555),
    (87.67003051757743, 22.97114882067489),
    (87.63844482421806, 22.950917049812674),
    (87.6302050781243, 22.918033969817706),
    (87.61235229492118, 22.875020978301883),
    (87.61784545898368, 22.82693150871734),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub lon: f64,
    pub lat: f64,
}

/// Polygon literal of the region of interest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    #[serde(rename = "vertex")]
    pub vertices: Vec<Vertex>,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            vertices: DEFAULT_AOI.iter().map(|&(lon, lat)| Vertex { lon, lat }).collect(),
        }
    }
}

impl RoiConfig {
    pub fn to_roi(&self) -> VerdantResult<Roi> {
        let vertices: Vec<(f64, f64)> = self.vertices.iter().map(|v| (v.lon, v.lat)).collect();
        Roi::from_vertices(&vertices)
    }
}

/// Raster export settings shared by every exported product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportParams {
    /// Submit export jobs at all
    pub enabled: bool,
    /// Destination folder name
    pub folder: String,
    /// Output coordinate reference system
    pub crs: String,
    /// Output ground sampling distance, meters
    pub scale: f64,
    #[serde(rename = "maxPixels")]
    pub max_pixels: u64,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            enabled: true,
            folder: "LULC".to_string(),
            crs: "EPSG:4326".to_string(),
            scale: 10.0,
            max_pixels: 10_000_000_000_000,
        }
    }
}

/// Two-date index change analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename = "analysis")]
pub struct AnalysisConfig {
    pub roi: RoiConfig,
    #[serde(rename = "earlierYear")]
    pub earlier_year: i32,
    #[serde(rename = "laterYear")]
    pub later_year: i32,
    /// Scenes must have cloudiness strictly below this percentage
    #[serde(rename = "cloudThreshold")]
    pub cloud_threshold: f64,
    pub composite: CompositeParams,
    pub index: IndexSpec,
    pub thresholds: ChangeThresholds,
    pub reduction: ReductionParams,
    pub export: ExportParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            roi: RoiConfig::default(),
            earlier_year: 2020,
            later_year: 2024,
            cloud_threshold: 40.0,
            composite: CompositeParams {
                bands: vec!["B4".to_string(), "B8".to_string()],
                ..CompositeParams::default()
            },
            index: SpectralIndex::Ndvi.spec(),
            thresholds: ChangeThresholds::default(),
            reduction: ReductionParams::default(),
            export: ExportParams::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_xml_str(xml: &str) -> VerdantResult<Self> {
        let config: Self = from_str(xml).map_err(|e| VerdantError::XmlParsing(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_xml_file<P: AsRef<Path>>(path: P) -> VerdantResult<Self> {
        log::info!("Reading analysis configuration: {}", path.as_ref().display());
        let xml = std::fs::read_to_string(path.as_ref())?;
        Self::from_xml_str(&xml)
    }

    pub fn validate(&self) -> VerdantResult<()> {
        self.roi.to_roi()?;
        self.thresholds.validate()?;
        if self.earlier_year >= self.later_year {
            return Err(VerdantError::InvalidInput(format!(
                "Earlier year {} must precede later year {}",
                self.earlier_year, self.later_year
            )));
        }
        if !self.cloud_threshold.is_finite() {
            return Err(VerdantError::InvalidInput(format!(
                "Invalid cloudiness threshold {}",
                self.cloud_threshold
            )));
        }
        Ok(())
    }
}

/// Single-period composite with appended index bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename = "indexStack")]
pub struct IndexStackConfig {
    pub roi: RoiConfig,
    /// First acquisition day, `YYYY-MM-DD`
    #[serde(rename = "startDate")]
    pub start_date: String,
    /// Exclusive end day, `YYYY-MM-DD`
    #[serde(rename = "endDate")]
    pub end_date: String,
    #[serde(rename = "cloudThreshold")]
    pub cloud_threshold: f64,
    pub composite: CompositeParams,
    #[serde(rename = "index")]
    pub indices: Vec<IndexSpec>,
    /// Keep only the index bands instead of appending them
    #[serde(rename = "replaceBands")]
    pub replace_bands: bool,
}

impl Default for IndexStackConfig {
    fn default() -> Self {
        Self {
            roi: RoiConfig::default(),
            start_date: "2021-01-01".to_string(),
            end_date: "2025-12-31".to_string(),
            cloud_threshold: 30.0,
            composite: CompositeParams::default(),
            indices: SpectralIndex::ALL.iter().map(|idx| idx.spec()).collect(),
            replace_bands: false,
        }
    }
}

impl IndexStackConfig {
    pub fn from_xml_str(xml: &str) -> VerdantResult<Self> {
        let config: Self = from_str(xml).map_err(|e| VerdantError::XmlParsing(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_xml_file<P: AsRef<Path>>(path: P) -> VerdantResult<Self> {
        log::info!("Reading index stack configuration: {}", path.as_ref().display());
        let xml = std::fs::read_to_string(path.as_ref())?;
        Self::from_xml_str(&xml)
    }

    pub fn date_range(&self) -> VerdantResult<DateRange> {
        DateRange::from_dates(&self.start_date, &self.end_date)
    }

    pub fn validate(&self) -> VerdantResult<()> {
        self.roi.to_roi()?;
        self.date_range()?;
        if self.indices.is_empty() {
            return Err(VerdantError::InvalidInput("No indices configured".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_run() {
        let config = AnalysisConfig::default();
        config.validate().unwrap();
        assert_eq!(config.roi.vertices.len(), 15);
        assert_eq!(config.index.band_a, "B8");
        assert_eq!(config.index.band_b, "B4");
        assert_eq!(config.reduction.scale, 10.0);
        assert_eq!(config.reduction.max_pixels, 10_000_000_000_000);
        assert_eq!(config.export.crs, "EPSG:4326");

        let stack = IndexStackConfig::default();
        stack.validate().unwrap();
        assert_eq!(stack.cloud_threshold, 30.0);
        assert_eq!(stack.indices.len(), 4);
    }

    #[test]
    fn test_partial_xml_keeps_defaults() {
        let xml = r#"
            <analysis>
                <earlierYear>2019</earlierYear>
                <laterYear>2023</laterYear>
                <cloudThreshold>25</cloudThreshold>
                <thresholds>
                    <increase>0.15</increase>
                    <decrease>-0.2</decrease>
                </thresholds>
            </analysis>
        "#;
        let config = AnalysisConfig::from_xml_str(xml).unwrap();
        assert_eq!(config.earlier_year, 2019);
        assert_eq!(config.later_year, 2023);
        assert_eq!(config.cloud_threshold, 25.0);
        assert_eq!(config.thresholds.increase, 0.15);
        assert_eq!(config.thresholds.decrease, -0.2);
        assert_eq!(config.export.folder, "LULC");
        assert_eq!(config.roi.vertices.len(), 15);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let xml = "<analysis><earlierYear>2024</earlierYear><laterYear>2020</laterYear></analysis>";
        assert!(matches!(AnalysisConfig::from_xml_str(xml), Err(VerdantError::InvalidInput(_))));

        let xml = "<indexStack><startDate>2025-12-31</startDate><endDate>2021-01-01</endDate></indexStack>";
        assert!(matches!(IndexStackConfig::from_xml_str(xml), Err(VerdantError::InvalidInput(_))));
    }

    #[test]
    fn test_custom_roi_from_xml() {
        let xml = r#"
            <analysis>
                <roi>
                    <vertex><lon>0</lon><lat>0</lat></vertex>
                    <vertex><lon>1</lon><lat>0</lat></vertex>
                    <vertex><lon>1</lon><lat>1</lat></vertex>
                    <vertex><lon>0</lon><lat>1</lat></vertex>
                </roi>
            </analysis>
        "#;
        let config = AnalysisConfig::from_xml_str(xml).unwrap();
        let roi = config.roi.to_roi().unwrap();
        assert!(roi.contains(0.5, 0.5));
    }

    #[test]
    fn test_collection_id_element_ignored() {
        // Scenes come from the catalog directory; a collection id in the file has no effect
        let xml = r#"
            <indexStack>
                <dataset>COPERNICUS/S2_HARMONIZED</dataset>
                <cloudThreshold>20</cloudThreshold>
            </indexStack>
        "#;
        let config = IndexStackConfig::from_xml_str(xml).unwrap();
        assert_eq!(config, IndexStackConfig { cloud_threshold: 20.0, ..IndexStackConfig::default() });
    }
}
