use crate::core::cloud_mask::{CloudMaskParams, CloudMasker};
use crate::core::collection::ImageCollection;
use crate::core::image::{Image, ImageProperties};
use crate::types::{DateRange, Roi, VerdantError, VerdantResult};
use serde::{Deserialize, Serialize};

/// Compositing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeParams {
    /// Mask cloud / cirrus pixels and scale to reflectance before the median
    #[serde(rename = "applyCloudMask")]
    pub apply_cloud_mask: bool,
    #[serde(rename = "cloudMask")]
    pub cloud_mask: CloudMaskParams,
    /// Bands kept in the composite; empty keeps every band
    #[serde(rename = "band")]
    pub bands: Vec<String>,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            apply_cloud_mask: true,
            cloud_mask: CloudMaskParams::default(),
            bands: Vec::new(),
        }
    }
}

/// Builds per-period median composites from a scene collection
pub struct TemporalCompositor {
    params: CompositeParams,
    masker: CloudMasker,
}

impl TemporalCompositor {
    pub fn new(params: CompositeParams) -> VerdantResult<Self> {
        let masker = CloudMasker::new(params.cloud_mask.clone())?;
        Ok(Self { params, masker })
    }

    pub fn standard() -> Self {
        Self {
            params: CompositeParams::default(),
            masker: CloudMasker::standard(),
        }
    }

    pub fn params(&self) -> &CompositeParams {
        &self.params
    }

    /// Composite of one calendar year
    pub fn composite_year(
        &self,
        collection: &ImageCollection,
        year: i32,
        roi: &Roi,
        cloud_threshold: f64,
    ) -> VerdantResult<Image> {
        self.composite_range(collection, &DateRange::year(year)?, roi, cloud_threshold)
    }

    /// Median composite of scenes acquired in `range` over `roi` with scene
    /// cloudiness strictly below `cloud_threshold`, clipped to `roi`.
    ///
    /// No qualifying scene yields a fully masked composite, not an error.
    pub fn composite_range(
        &self,
        collection: &ImageCollection,
        range: &DateRange,
        roi: &Roi,
        cloud_threshold: f64,
    ) -> VerdantResult<Image> {
        if !cloud_threshold.is_finite() {
            return Err(VerdantError::InvalidInput(format!(
                "Invalid cloudiness threshold {}",
                cloud_threshold
            )));
        }
        self.validate_schema(collection)?;

        log::info!(
            "Compositing {} .. {} (cloudiness < {}%) from {} candidate scenes",
            range.start.format("%Y-%m-%d"),
            range.end.format("%Y-%m-%d"),
            cloud_threshold,
            collection.len()
        );

        let filtered = collection
            .filter_date(range)
            .filter_bounds(roi)
            .filter_cloudiness_below(cloud_threshold);
        log::debug!("{} scenes pass date, bounds and cloudiness filters", filtered.len());

        let masked = if self.params.apply_cloud_mask {
            filtered.map(|image| self.masker.apply(image))?
        } else {
            filtered
        };

        let selected = if self.params.bands.is_empty() {
            masked
        } else {
            masked.select(&self.params.bands)?
        };

        if selected.is_empty() {
            log::warn!(
                "No scenes qualify for {} .. {}; composite is fully masked",
                range.start.format("%Y-%m-%d"),
                range.end.format("%Y-%m-%d")
            );
        }

        let properties = ImageProperties {
            id: Some(format!(
                "median_{}_{}",
                range.start.format("%Y%m%d"),
                range.end.format("%Y%m%d")
            )),
            time_start: Some(range.start),
            cloudy_pixel_percentage: None,
            footprint: Some(*roi.bounds()),
        };

        Ok(selected.median()?.clip(roi)?.with_properties(properties))
    }

    /// Band names used by the compositor must exist even when no scene qualifies
    fn validate_schema(&self, collection: &ImageCollection) -> VerdantResult<()> {
        let mut required: Vec<&str> = self.params.bands.iter().map(String::as_str).collect();
        if self.params.apply_cloud_mask {
            required.push(&self.params.cloud_mask.qa_band);
        }
        for band in required {
            if !collection.band_names().iter().any(|b| b == band) {
                return Err(VerdantError::BandNotFound {
                    band: band.to_string(),
                    available: collection.band_names().to_vec(),
                });
            }
        }
        Ok(())
    }
}
