use crate::core::image::{Image, ImageProperties};
use crate::core::maybe_rayon::zip_for_each;
use crate::types::{VerdantError, VerdantResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Quality-assurance bitmask parameters for Sentinel-2 (QA60)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudMaskParams {
    /// Name of the quality-assurance band
    #[serde(rename = "qaBand")]
    pub qa_band: String,
    /// Bit flagging opaque clouds
    #[serde(rename = "cloudBit")]
    pub cloud_bit: u32,
    /// Bit flagging cirrus
    #[serde(rename = "cirrusBit")]
    pub cirrus_bit: u32,
    /// Digital numbers are divided by this to obtain reflectance
    #[serde(rename = "scaleFactor")]
    pub scale_factor: f64,
}

impl Default for CloudMaskParams {
    fn default() -> Self {
        Self {
            qa_band: "QA60".to_string(),
            cloud_bit: 10,
            cirrus_bit: 11,
            scale_factor: 10_000.0,
        }
    }
}

/// Per-pixel cloud and cirrus masking with reflectance scaling
pub struct CloudMasker {
    params: CloudMaskParams,
}

impl CloudMasker {
    pub fn new(params: CloudMaskParams) -> VerdantResult<Self> {
        if params.cloud_bit >= 32 || params.cirrus_bit >= 32 {
            return Err(VerdantError::InvalidInput(format!(
                "QA bit positions must be below 32 (cloud {}, cirrus {})",
                params.cloud_bit, params.cirrus_bit
            )));
        }
        if !params.scale_factor.is_finite() || params.scale_factor == 0.0 {
            return Err(VerdantError::InvalidInput(format!(
                "Invalid reflectance scale factor {}",
                params.scale_factor
            )));
        }
        Ok(Self { params })
    }

    /// Create a masker with the Sentinel-2 QA60 layout
    pub fn standard() -> Self {
        Self { params: CloudMaskParams::default() }
    }

    pub fn params(&self) -> &CloudMaskParams {
        &self.params
    }

    /// Validity derived from the QA band: clear pixels are `true`.
    ///
    /// Pixels without QA data, or with a QA value that is not a non-negative
    /// integer, are treated as contaminated.
    pub fn clear_mask(&self, image: &Image) -> VerdantResult<Array2<bool>> {
        let qa = image.band(&self.params.qa_band)?;
        let flags = (1u32 << self.params.cloud_bit) | (1u32 << self.params.cirrus_bit);

        let mut clear = Array2::from_elem(qa.shape(), false);
        zip_for_each!(Zip::from(&mut clear).and(qa.values()).and(qa.valid()), |out, &value, &ok| {
            if ok && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
                *out = (value as u32) & flags == 0;
            }
        });
        Ok(clear)
    }

    /// Mask cloudy pixels in every band and scale digital numbers to reflectance.
    ///
    /// Only the acquisition time, footprint and id survive on the output.
    pub fn apply(&self, image: &Image) -> VerdantResult<Image> {
        let clear = self.clear_mask(image)?;
        let scale = self.params.scale_factor;

        log::debug!(
            "Cloud mask for {}: {} of {} pixels clear",
            image.properties().id.as_deref().unwrap_or("<unnamed>"),
            clear.iter().filter(|&&c| c).count(),
            clear.len()
        );

        let masked = image.map_bands(|band| {
            band.update_mask(&clear)
                .map(|b| b.map_valid(b.name().to_string(), |v| Some(v / scale)))
        })?;

        let properties = ImageProperties {
            id: image.properties().id.clone(),
            time_start: image.properties().time_start,
            cloudy_pixel_percentage: None,
            footprint: image.properties().footprint,
        };
        Ok(masked.with_properties(properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::Band;
    use crate::types::{GeoGrid, GeoTransform};
    use chrono::{TimeZone, Utc};
    use ndarray::array;

    fn scene(qa: Band) -> Image {
        let grid = GeoGrid::new(GeoTransform::north_up(0.0, 1.0, 0.5, -0.5), 2, 2);
        let properties = ImageProperties {
            id: Some("S2_TEST".to_string()),
            time_start: Some(Utc.with_ymd_and_hms(2020, 3, 14, 4, 50, 0).unwrap()),
            cloudy_pixel_percentage: Some(12.0),
            footprint: None,
        };
        let b4 = Band::from_values("B4", array![[1000.0, 2000.0], [3000.0, 4000.0]]);
        Image::new(grid, vec![b4, qa], properties).unwrap()
    }

    #[test]
    fn test_cloud_and_cirrus_bits_mask_all_bands() {
        let qa = Band::from_values("QA60", array![[0.0, 1024.0], [2048.0, 8.0]]);
        let masked = CloudMasker::standard().apply(&scene(qa)).unwrap();
        let b4 = masked.band("B4").unwrap();

        assert_eq!(b4.get(0, 0), Some(0.1));
        assert_eq!(b4.get(0, 1), None); // cloud
        assert_eq!(b4.get(1, 0), None); // cirrus
        assert_eq!(b4.get(1, 1), Some(0.4)); // unrelated bit
        assert_eq!(masked.band("QA60").unwrap().get(1, 1), Some(0.0008));
    }

    #[test]
    fn test_missing_qa_pixel_is_masked() {
        let qa = Band::from_values("QA60", array![[f64::NAN, 0.0], [0.0, 0.0]]);
        let masked = CloudMasker::standard().apply(&scene(qa)).unwrap();
        assert_eq!(masked.band("B4").unwrap().get(0, 0), None);
        assert_eq!(masked.band("B4").unwrap().valid_count(), 3);
    }

    #[test]
    fn test_time_start_is_preserved() {
        let qa = Band::from_values("QA60", array![[0.0, 0.0], [0.0, 0.0]]);
        let input = scene(qa);
        let masked = CloudMasker::standard().apply(&input).unwrap();
        assert_eq!(masked.properties().time_start, input.properties().time_start);
        assert_eq!(masked.properties().cloudy_pixel_percentage, None);
    }

    #[test]
    fn test_missing_qa_band_is_an_error() {
        let grid = GeoGrid::new(GeoTransform::north_up(0.0, 1.0, 0.5, -0.5), 2, 2);
        let image = Image::new(grid, vec![Band::constant("B4", (2, 2), 100.0)], ImageProperties::default()).unwrap();
        assert!(matches!(
            CloudMasker::standard().apply(&image),
            Err(VerdantError::BandNotFound { .. })
        ));
    }
}
