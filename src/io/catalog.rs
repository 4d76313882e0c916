//! Directory-backed scene catalog
//!
//! Each scene is described by an XML manifest (`*.xml`) next to its band
//! files:
//!
//! ```xml
//! <scene>
//!   <id>S2A_20200314_T45QXF</id>
//!   <timeStart>2020-03-14T04:56:21Z</timeStart>
//!   <cloudyPixelPercentage>12.4</cloudyPixelPercentage>
//!   <footprint><minLon>87.5</minLon><maxLon>88.0</maxLon><minLat>22.7</minLat><maxLat>23.1</maxLat></footprint>
//!   <grid>
//!     <transform><topLeftX>87.5</topLeftX><pixelWidth>0.0001</pixelWidth>
//!                <topLeftY>23.1</topLeftY><pixelHeight>-0.0001</pixelHeight></transform>
//!     <rows>4000</rows><cols>5000</cols>
//!   </grid>
//!   <band><name>B4</name><file>B4.bin.gz</file><format>u16</format><nodata>0</nodata></band>
//! </scene>
//! ```

use crate::core::collection::ImageCollection;
use crate::core::image::{Image, ImageProperties};
use crate::io::raster::{read_band_file, SampleFormat};
use crate::types::{BoundingBox, DateRange, GeoGrid, Roi, VerdantError, VerdantResult};
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One band file entry of a scene manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandEntry {
    pub name: String,
    /// Path relative to the manifest directory
    pub file: String,
    pub format: SampleFormat,
    #[serde(default)]
    pub nodata: Option<f64>,
}

/// Scene manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneManifest {
    pub id: String,
    #[serde(rename = "timeStart")]
    pub time_start: DateTime<Utc>,
    #[serde(rename = "cloudyPixelPercentage", default)]
    pub cloudy_pixel_percentage: Option<f64>,
    #[serde(default)]
    pub footprint: Option<BoundingBox>,
    pub grid: GeoGrid,
    #[serde(rename = "band")]
    pub bands: Vec<BandEntry>,
}

impl SceneManifest {
    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    /// Footprint, falling back to the grid extent
    pub fn extent(&self) -> BoundingBox {
        self.footprint.unwrap_or_else(|| self.grid.bounds())
    }

    fn properties(&self) -> ImageProperties {
        ImageProperties {
            id: Some(self.id.clone()),
            time_start: Some(self.time_start),
            cloudy_pixel_percentage: self.cloudy_pixel_percentage,
            footprint: Some(self.extent()),
        }
    }
}

/// Scene manifests found in one directory, sorted by file name
pub struct SceneCatalog {
    root: PathBuf,
    entries: Vec<(PathBuf, SceneManifest)>,
}

impl SceneCatalog {
    /// Scan `dir` for manifests. All scenes must share one grid and band list.
    pub fn open<P: AsRef<Path>>(dir: P) -> VerdantResult<Self> {
        let root = dir.as_ref().to_path_buf();
        log::info!("Opening scene catalog: {}", root.display());

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "xml"))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(VerdantError::InvalidInput(format!(
                "No scene manifests found in {}",
                root.display()
            )));
        }

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let manifest = Self::read_manifest(&path)?;
            if let Some((_, first)) = entries.first() {
                Self::check_schema(first, &manifest)?;
            }
            entries.push((path, manifest));
        }

        log::info!("Catalog holds {} scenes", entries.len());
        Ok(Self { root, entries })
    }

    pub fn read_manifest<P: AsRef<Path>>(path: P) -> VerdantResult<SceneManifest> {
        let xml = std::fs::read_to_string(path.as_ref())?;
        let manifest: SceneManifest = from_str(&xml).map_err(|e| {
            VerdantError::XmlParsing(format!("{}: {}", path.as_ref().display(), e))
        })?;
        if manifest.bands.is_empty() {
            return Err(VerdantError::InvalidFormat(format!(
                "Scene '{}' lists no bands",
                manifest.id
            )));
        }
        Ok(manifest)
    }

    fn check_schema(first: &SceneManifest, other: &SceneManifest) -> VerdantResult<()> {
        if first.grid != other.grid {
            return Err(VerdantError::GridMismatch(format!(
                "Scene '{}' grid differs from scene '{}'",
                other.id, first.id
            )));
        }
        if first.band_names() != other.band_names() {
            return Err(VerdantError::InvalidFormat(format!(
                "Scene '{}' bands {:?} differ from scene '{}' bands {:?}",
                other.id,
                other.band_names(),
                first.id,
                first.band_names()
            )));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifests(&self) -> impl Iterator<Item = &SceneManifest> {
        self.entries.iter().map(|(_, m)| m)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn schema(&self) -> (GeoGrid, Vec<String>) {
        // open() guarantees at least one entry
        let first = &self.entries[0].1;
        (first.grid, first.band_names())
    }

    fn load_scene(path: &Path, manifest: &SceneManifest) -> VerdantResult<Image> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let bands = manifest
            .bands
            .iter()
            .map(|entry| {
                read_band_file(dir.join(&entry.file), &entry.name, entry.format, manifest.grid.shape(), entry.nodata)
            })
            .collect::<VerdantResult<Vec<_>>>()?;
        Image::new(manifest.grid, bands, manifest.properties())
    }

    /// Load every scene
    pub fn load(&self) -> VerdantResult<ImageCollection> {
        self.load_where(|_| true)
    }

    /// Load only scenes acquired in `range` whose extent intersects `roi`;
    /// band files of other scenes are never read.
    pub fn query(&self, range: &DateRange, roi: &Roi) -> VerdantResult<ImageCollection> {
        self.load_where(|m| range.contains(&m.time_start) && roi.intersects_bounds(&m.extent()))
    }

    fn load_where<F>(&self, keep: F) -> VerdantResult<ImageCollection>
    where
        F: Fn(&SceneManifest) -> bool,
    {
        let (grid, band_names) = self.schema();
        let mut collection = ImageCollection::new(grid, band_names);
        for (path, manifest) in &self.entries {
            if keep(manifest) {
                collection.push(Self::load_scene(path, manifest)?)?;
            }
        }
        log::debug!("Loaded {} of {} scenes", collection.len(), self.entries.len());
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        <scene>
            <id>S2_20200314</id>
            <timeStart>2020-03-14T04:56:21Z</timeStart>
            <cloudyPixelPercentage>12.5</cloudyPixelPercentage>
            <grid>
                <transform>
                    <topLeftX>0</topLeftX><pixelWidth>0.5</pixelWidth>
                    <topLeftY>1</topLeftY><pixelHeight>-0.5</pixelHeight>
                </transform>
                <rows>2</rows><cols>2</cols>
            </grid>
            <band><name>B4</name><file>B4.bin</file><format>u16</format><nodata>0</nodata></band>
            <band><name>B8</name><file>B8.bin</file><format>f32</format></band>
        </scene>
    "#;

    #[test]
    fn test_manifest_parsing() {
        let manifest: SceneManifest = from_str(MANIFEST).unwrap();
        assert_eq!(manifest.id, "S2_20200314");
        assert_eq!(manifest.cloudy_pixel_percentage, Some(12.5));
        assert_eq!(manifest.grid.shape(), (2, 2));
        assert_eq!(manifest.band_names(), vec!["B4", "B8"]);
        assert_eq!(manifest.bands[0].format, SampleFormat::U16);
        assert_eq!(manifest.bands[0].nodata, Some(0.0));
        assert_eq!(manifest.bands[1].nodata, None);
        assert_eq!(manifest.extent(), BoundingBox::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(SceneCatalog::open(dir.path()), Err(VerdantError::InvalidInput(_))));
    }
}
