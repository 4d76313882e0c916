use crate::core::image::{Band, Image, ImageProperties};
use crate::core::maybe_rayon::zip_for_each;
use crate::types::{DateRange, GeoGrid, PixelValue, Roi, VerdantError, VerdantResult};
use ndarray::{Array2, Zip};

/// Ordered set of images sharing one grid and one band schema
#[derive(Debug, Clone)]
pub struct ImageCollection {
    grid: GeoGrid,
    band_names: Vec<String>,
    images: Vec<Image>,
}

impl ImageCollection {
    /// Empty collection with a fixed grid and band schema
    pub fn new(grid: GeoGrid, band_names: Vec<String>) -> Self {
        Self { grid, band_names, images: Vec::new() }
    }

    /// Collection from a non-empty image list; the first image defines the schema
    pub fn from_images(images: Vec<Image>) -> VerdantResult<Self> {
        let first = images.first().ok_or_else(|| {
            VerdantError::InvalidInput("Cannot infer a collection schema from zero images".to_string())
        })?;
        let mut collection = Self::new(*first.grid(), first.band_names());
        for image in images {
            collection.push(image)?;
        }
        Ok(collection)
    }

    pub fn push(&mut self, image: Image) -> VerdantResult<()> {
        if *image.grid() != self.grid {
            return Err(VerdantError::GridMismatch(format!(
                "Image {} grid {:?} differs from collection grid {:?}",
                image.properties().id.as_deref().unwrap_or("<unnamed>"),
                image.grid(),
                self.grid
            )));
        }
        if image.band_names() != self.band_names {
            return Err(VerdantError::InvalidInput(format!(
                "Image bands {:?} differ from collection schema {:?}",
                image.band_names(),
                self.band_names
            )));
        }
        self.images.push(image);
        Ok(())
    }

    pub fn grid(&self) -> &GeoGrid {
        &self.grid
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn retain<F>(&self, keep: F) -> Self
    where
        F: Fn(&Image) -> bool,
    {
        Self {
            grid: self.grid,
            band_names: self.band_names.clone(),
            images: self.images.iter().filter(|img| keep(img)).cloned().collect(),
        }
    }

    /// Images acquired within `[start, end)`; images without a timestamp are dropped
    pub fn filter_date(&self, range: &DateRange) -> Self {
        self.retain(|img| {
            img.properties()
                .time_start
                .map(|t| range.contains(&t))
                .unwrap_or(false)
        })
    }

    /// Images whose footprint (or grid extent when absent) intersects the region
    pub fn filter_bounds(&self, roi: &Roi) -> Self {
        self.retain(|img| {
            let footprint = img.properties().footprint.unwrap_or_else(|| img.grid().bounds());
            roi.intersects_bounds(&footprint)
        })
    }

    /// Images whose scene cloudiness is strictly below `max_percentage`
    pub fn filter_cloudiness_below(&self, max_percentage: f64) -> Self {
        self.retain(|img| {
            img.properties()
                .cloudy_pixel_percentage
                .map(|pct| pct < max_percentage)
                .unwrap_or(false)
        })
    }

    /// Transform every image; the result must keep the collection grid
    pub fn map<F>(&self, f: F) -> VerdantResult<Self>
    where
        F: Fn(&Image) -> VerdantResult<Image>,
    {
        let images = self.images.iter().map(f).collect::<VerdantResult<Vec<_>>>()?;
        match images.first() {
            Some(first) => {
                let mut mapped = Self::new(self.grid, first.band_names());
                for image in images {
                    mapped.push(image)?;
                }
                Ok(mapped)
            }
            None => Ok(Self::new(self.grid, self.band_names.clone())),
        }
    }

    /// Restrict every image (and the schema) to the named bands
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> VerdantResult<Self> {
        for name in names {
            if !self.band_names.iter().any(|b| b == name.as_ref()) {
                return Err(VerdantError::BandNotFound {
                    band: name.as_ref().to_string(),
                    available: self.band_names.clone(),
                });
            }
        }
        let images = self
            .images
            .iter()
            .map(|img| img.select(names))
            .collect::<VerdantResult<Vec<_>>>()?;
        Ok(Self {
            grid: self.grid,
            band_names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            images,
        })
    }

    /// Per-pixel, per-band median over valid contributors.
    ///
    /// Samples are sorted before selection so the result does not depend on
    /// collection order; an even count averages the two middle samples.
    /// Pixels with no valid contributor (including an empty collection) are masked.
    pub fn median(&self) -> VerdantResult<Image> {
        log::debug!(
            "Median of {} images over {} bands on a {}x{} grid",
            self.images.len(),
            self.band_names.len(),
            self.grid.rows,
            self.grid.cols
        );

        let mut bands = Vec::with_capacity(self.band_names.len());
        for (index, name) in self.band_names.iter().enumerate() {
            let sources: Vec<&Band> = self.images.iter().map(|img| &img.bands()[index]).collect();

            let mut values = Array2::from_elem(self.grid.shape(), PixelValue::NAN);
            let mut valid = Array2::from_elem(self.grid.shape(), false);
            zip_for_each!(Zip::indexed(&mut values).and(&mut valid), |(row, col), out, ok| {
                let mut samples: Vec<PixelValue> =
                    sources.iter().filter_map(|band| band.get(row, col)).collect();
                if let Some(median) = median_of(&mut samples) {
                    *out = median;
                    *ok = true;
                }
            });
            bands.push(Band::new(name.clone(), values, valid)?);
        }

        Image::new(self.grid, bands, ImageProperties::default())
    }
}

/// Median of a sample set, `None` when empty
pub fn median_of(samples: &mut [PixelValue]) -> Option<PixelValue> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let n = samples.len();
    if n % 2 == 1 {
        Some(samples[n / 2])
    } else {
        Some((samples[n / 2 - 1] + samples[n / 2]) / 2.0)
    }
}
