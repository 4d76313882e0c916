//! Normalized-difference spectral indices
//!
//! All indices share the form `(A - B) / (A + B)` over two bands of one
//! composite; they differ only in the band pair and output name.

use crate::core::image::{Band, Image};
use crate::types::{VerdantError, VerdantResult};
use serde::{Deserialize, Serialize};

/// Supported Sentinel-2 indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectralIndex {
    /// Normalized Difference Vegetation Index (NIR, Red)
    Ndvi,
    /// Modified Normalized Difference Water Index (Green, SWIR1)
    Mndwi,
    /// Normalized Difference Built-up Index (SWIR1, NIR)
    Ndbi,
    /// Normalized Difference Soil / Land Index (Red, SWIR1)
    Ndsli,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 4] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Mndwi,
        SpectralIndex::Ndbi,
        SpectralIndex::Ndsli,
    ];

    /// Sentinel-2 band identifiers (A, B)
    pub fn band_pair(&self) -> (&'static str, &'static str) {
        match self {
            SpectralIndex::Ndvi => ("B8", "B4"),
            SpectralIndex::Mndwi => ("B3", "B11"),
            SpectralIndex::Ndbi => ("B11", "B8"),
            SpectralIndex::Ndsli => ("B4", "B11"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Mndwi => "MNDWI",
            SpectralIndex::Ndbi => "NDBI",
            SpectralIndex::Ndsli => "NDSLI",
        }
    }

    pub fn spec(&self) -> IndexSpec {
        let (a, b) = self.band_pair();
        IndexSpec::new(self.name(), a, b)
    }
}

impl std::fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named normalized difference over two bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    #[serde(rename = "bandA")]
    pub band_a: String,
    #[serde(rename = "bandB")]
    pub band_b: String,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, band_a: impl Into<String>, band_b: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            band_a: band_a.into(),
            band_b: band_b.into(),
        }
    }
}

/// Whether computed indices extend the source image or replace its bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Append,
    Replace,
}

/// `(a - b) / (a + b)`, masked where either input is masked or `a + b == 0`
pub fn normalized_difference_band(a: &Band, b: &Band, name: &str) -> VerdantResult<Band> {
    a.zip_with(b, name, |a, b| {
        let sum = a + b;
        if sum == 0.0 {
            None
        } else {
            Some((a - b) / sum)
        }
    })
}

/// Single-band image holding the normalized difference of two bands of `image`
pub fn normalized_difference(image: &Image, band_a: &str, band_b: &str, name: &str) -> VerdantResult<Image> {
    let band = normalized_difference_band(image.band(band_a)?, image.band(band_b)?, name)?;
    Image::new(*image.grid(), vec![band], image.properties().clone())
}

/// Computes several indices from one composite
pub struct IndexCalculator {
    specs: Vec<IndexSpec>,
}

impl IndexCalculator {
    pub fn new(specs: Vec<IndexSpec>) -> VerdantResult<Self> {
        for (i, spec) in specs.iter().enumerate() {
            if specs[..i].iter().any(|other| other.name == spec.name) {
                return Err(VerdantError::InvalidInput(format!(
                    "Index output name '{}' is used more than once",
                    spec.name
                )));
            }
        }
        Ok(Self { specs })
    }

    /// Calculator for a fixed set of catalogue indices
    pub fn for_indices(indices: &[SpectralIndex]) -> VerdantResult<Self> {
        Self::new(indices.iter().map(|idx| idx.spec()).collect())
    }

    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    pub fn compute(&self, image: &Image, mode: IndexMode) -> VerdantResult<Image> {
        // Fail fast on missing bands before any pixel work
        for spec in &self.specs {
            image.band(&spec.band_a)?;
            image.band(&spec.band_b)?;
        }

        let bands = self
            .specs
            .iter()
            .map(|spec| {
                log::debug!("Computing {} = ({} - {}) / ({} + {})",
                            spec.name, spec.band_a, spec.band_b, spec.band_a, spec.band_b);
                normalized_difference_band(image.band(&spec.band_a)?, image.band(&spec.band_b)?, &spec.name)
            })
            .collect::<VerdantResult<Vec<_>>>()?;

        match mode {
            IndexMode::Append => image.add_bands(bands),
            IndexMode::Replace => Image::new(*image.grid(), bands, image.properties().clone()),
        }
    }
}
