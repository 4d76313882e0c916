use crate::core::maybe_rayon::zip_for_each;
use crate::types::{BoundingBox, GeoGrid, PixelValue, Roi, VerdantError, VerdantResult};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};

/// Scene-level metadata carried alongside the pixels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageProperties {
    /// Scene identifier
    pub id: Option<String>,
    /// Acquisition timestamp (`system:time_start`)
    pub time_start: Option<DateTime<Utc>>,
    /// Scene-level cloudiness, percent
    pub cloudy_pixel_percentage: Option<f64>,
    /// Geographic extent of the acquisition
    pub footprint: Option<BoundingBox>,
}

/// A named band with an explicit per-pixel validity layer.
///
/// Invalid pixels hold NaN in `values`; arithmetic on any invalid operand
/// yields an invalid result.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    name: String,
    values: Array2<PixelValue>,
    valid: Array2<bool>,
}

impl Band {
    pub fn new(name: impl Into<String>, values: Array2<PixelValue>, valid: Array2<bool>) -> VerdantResult<Self> {
        let name = name.into();
        if values.dim() != valid.dim() {
            return Err(VerdantError::GridMismatch(format!(
                "Band '{}' values {:?} and validity {:?} differ in shape",
                name,
                values.dim(),
                valid.dim()
            )));
        }
        let mut values = values;
        Zip::from(&mut values).and(&valid).for_each(|v, &ok| {
            if !ok {
                *v = PixelValue::NAN;
            }
        });
        Ok(Self { name, values, valid })
    }

    /// Band valid wherever the value is finite
    pub fn from_values(name: impl Into<String>, values: Array2<PixelValue>) -> Self {
        let valid = values.mapv(|v| v.is_finite());
        let values = values.mapv(|v| if v.is_finite() { v } else { PixelValue::NAN });
        Self { name: name.into(), values, valid }
    }

    /// Band with every pixel set to `value`
    pub fn constant(name: impl Into<String>, shape: (usize, usize), value: PixelValue) -> Self {
        Self::from_values(name, Array2::from_elem(shape, value))
    }

    /// Band with every pixel invalid
    pub fn masked(name: impl Into<String>, shape: (usize, usize)) -> Self {
        Self {
            name: name.into(),
            values: Array2::from_elem(shape, PixelValue::NAN),
            valid: Array2::from_elem(shape, false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &Array2<PixelValue> {
        &self.values
    }

    pub fn valid(&self) -> &Array2<bool> {
        &self.valid
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Value at a pixel, `None` when masked
    pub fn get(&self, row: usize, col: usize) -> Option<PixelValue> {
        match self.valid.get((row, col)) {
            Some(true) => Some(self.values[[row, col]]),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&ok| ok).count()
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Intersect validity with `mask`
    pub fn update_mask(&self, mask: &Array2<bool>) -> VerdantResult<Band> {
        if mask.dim() != self.shape() {
            return Err(VerdantError::GridMismatch(format!(
                "Mask {:?} does not match band '{}' {:?}",
                mask.dim(),
                self.name,
                self.shape()
            )));
        }
        let valid = Zip::from(&self.valid).and(mask).map_collect(|&a, &b| a && b);
        Band::new(self.name.clone(), self.values.clone(), valid)
    }

    /// Elementwise transform of valid pixels; `None` masks the pixel
    pub fn map_valid<F>(&self, name: impl Into<String>, f: F) -> Band
    where
        F: Fn(PixelValue) -> Option<PixelValue> + Sync + Send,
    {
        let mut values = Array2::from_elem(self.shape(), PixelValue::NAN);
        let mut valid = Array2::from_elem(self.shape(), false);
        zip_for_each!(
            Zip::from(&mut values).and(&mut valid).and(&self.values).and(&self.valid),
            |out, ok, &v, &v_ok| {
                if let Some(result) = if v_ok { f(v) } else { None } {
                    *out = result;
                    *ok = true;
                }
            }
        );
        Band { name: name.into(), values, valid }
    }

    /// Pixel-wise binary operation; invalid where either operand is invalid or `f` yields `None`
    pub fn zip_with<F>(&self, other: &Band, name: impl Into<String>, f: F) -> VerdantResult<Band>
    where
        F: Fn(PixelValue, PixelValue) -> Option<PixelValue> + Sync + Send,
    {
        let name = name.into();
        if self.shape() != other.shape() {
            return Err(VerdantError::GridMismatch(format!(
                "Cannot combine '{}' {:?} with '{}' {:?} into '{}'",
                self.name,
                self.shape(),
                other.name,
                other.shape(),
                name
            )));
        }
        let mut values = Array2::from_elem(self.shape(), PixelValue::NAN);
        let mut valid = Array2::from_elem(self.shape(), false);
        zip_for_each!(
            Zip::from(&mut values)
                .and(&mut valid)
                .and(&self.values)
                .and(&self.valid)
                .and(&other.values)
                .and(&other.valid),
            |out, ok, &a, &a_ok, &b, &b_ok| {
                if a_ok && b_ok {
                    if let Some(result) = f(a, b) {
                        *out = result;
                        *ok = true;
                    }
                }
            }
        );
        Ok(Band { name, values, valid })
    }
}

/// Multi-band raster on a georeferenced grid
#[derive(Debug, Clone)]
pub struct Image {
    grid: GeoGrid,
    bands: Vec<Band>,
    properties: ImageProperties,
}

impl Image {
    pub fn new(grid: GeoGrid, bands: Vec<Band>, properties: ImageProperties) -> VerdantResult<Self> {
        for (i, band) in bands.iter().enumerate() {
            if band.shape() != grid.shape() {
                return Err(VerdantError::GridMismatch(format!(
                    "Band '{}' shape {:?} does not match grid {:?}",
                    band.name(),
                    band.shape(),
                    grid.shape()
                )));
            }
            if bands[..i].iter().any(|b| b.name() == band.name()) {
                return Err(VerdantError::InvalidInput(format!(
                    "Duplicate band name '{}'",
                    band.name()
                )));
            }
        }
        Ok(Self { grid, bands, properties })
    }

    /// Image whose bands are entirely masked
    pub fn empty<S: AsRef<str>>(grid: GeoGrid, band_names: &[S], properties: ImageProperties) -> Self {
        let bands = band_names
            .iter()
            .map(|name| Band::masked(name.as_ref(), grid.shape()))
            .collect();
        Self { grid, bands, properties }
    }

    pub fn grid(&self) -> &GeoGrid {
        &self.grid
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn properties(&self) -> &ImageProperties {
        &self.properties
    }

    pub fn with_properties(mut self, properties: ImageProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn band(&self, name: &str) -> VerdantResult<&Band> {
        self.bands
            .iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| VerdantError::BandNotFound {
                band: name.to_string(),
                available: self.band_names(),
            })
    }

    /// The only band of a single-band image
    pub fn single_band(&self) -> VerdantResult<&Band> {
        match self.bands.as_slice() {
            [band] => Ok(band),
            _ => Err(VerdantError::InvalidInput(format!(
                "Expected a single-band image, got bands {:?}",
                self.band_names()
            ))),
        }
    }

    /// New image with the named bands, in the requested order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> VerdantResult<Image> {
        let bands = names
            .iter()
            .map(|name| self.band(name.as_ref()).cloned())
            .collect::<VerdantResult<Vec<_>>>()?;
        Image::new(self.grid, bands, self.properties.clone())
    }

    /// Append bands after the existing ones
    pub fn add_bands(&self, extra: Vec<Band>) -> VerdantResult<Image> {
        let mut bands = self.bands.clone();
        bands.extend(extra);
        Image::new(self.grid, bands, self.properties.clone())
    }

    /// Apply `f` to every band, keeping grid and properties
    pub fn map_bands<F>(&self, f: F) -> VerdantResult<Image>
    where
        F: Fn(&Band) -> VerdantResult<Band>,
    {
        let bands = self.bands.iter().map(f).collect::<VerdantResult<Vec<_>>>()?;
        Image::new(self.grid, bands, self.properties.clone())
    }

    /// Intersect every band's validity with `mask`
    pub fn update_mask(&self, mask: &Array2<bool>) -> VerdantResult<Image> {
        self.map_bands(|band| band.update_mask(mask))
    }

    /// Mask pixels whose centers fall outside the region
    pub fn clip(&self, roi: &Roi) -> VerdantResult<Image> {
        let mut inside = Array2::from_elem(self.grid.shape(), false);
        let grid = self.grid;
        zip_for_each!(Zip::indexed(&mut inside), |(row, col), flag| {
            let (lon, lat) = grid.pixel_center(row, col);
            *flag = roi.contains(lon, lat);
        });
        self.update_mask(&inside)
    }

    pub fn is_fully_masked(&self) -> bool {
        self.bands.iter().all(|b| b.valid_count() == 0)
    }
}
