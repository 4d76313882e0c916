use crate::core::image::{Band, Image};
use crate::types::{
    BoundingBox, GeoGrid, GeoTransform, Roi, VerdantError, VerdantResult, EARTH_RADIUS_M,
    METERS_PER_DEGREE,
};
use crate::core::maybe_rayon::*;
use serde::{Deserialize, Serialize};

/// Region reduction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionParams {
    /// Nominal ground sampling distance in meters
    pub scale: f64,
    /// Upper bound on sampled pixels before the reduction is refused
    #[serde(rename = "maxPixels")]
    pub max_pixels: u64,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            scale: 10.0,
            max_pixels: 10_000_000_000_000, // 1e13
        }
    }
}

/// Regular lon/lat lattice at a nominal scale, anchored at the north-west
/// corner of a region's bounding box.
#[derive(Debug, Clone)]
pub struct SamplingGrid {
    grid: GeoGrid,
    scale: f64,
}

impl SamplingGrid {
    /// Cell size in degrees for a scale in meters (equatorial degree length)
    pub fn degrees_for_scale(scale: f64) -> f64 {
        scale / METERS_PER_DEGREE
    }

    /// Number of cells a region would be sampled with; allocates nothing
    pub fn estimate_pixels(bounds: &BoundingBox, scale: f64) -> VerdantResult<u64> {
        let (rows, cols) = Self::dimensions(bounds, scale)?;
        Ok((rows * cols).min(u64::MAX as f64) as u64)
    }

    fn dimensions(bounds: &BoundingBox, scale: f64) -> VerdantResult<(f64, f64)> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(VerdantError::InvalidInput(format!("Invalid scale {} m", scale)));
        }
        let step = Self::degrees_for_scale(scale);
        // Tolerate floating-point noise when the extent is an exact multiple of the step
        let cols = (bounds.width() / step - 1e-9).ceil().max(1.0);
        let rows = (bounds.height() / step - 1e-9).ceil().max(1.0);
        Ok((rows, cols))
    }

    /// Lay a sampling grid over the region, refusing it if it exceeds `max_pixels`
    pub fn over_region(roi: &Roi, scale: f64, max_pixels: u64) -> VerdantResult<Self> {
        let bounds = *roi.bounds();
        let estimated_pixels = Self::estimate_pixels(&bounds, scale)?;
        if estimated_pixels > max_pixels {
            log::warn!(
                "Refusing reduction: {} pixels at {} m exceeds maxPixels {}",
                estimated_pixels, scale, max_pixels
            );
            return Err(VerdantError::ResourceLimit {
                estimated_pixels,
                max_pixels,
                scale,
                bounds,
            });
        }

        let (rows, cols) = Self::dimensions(&bounds, scale)?;
        let step = Self::degrees_for_scale(scale);
        let transform = GeoTransform::north_up(bounds.min_lon, bounds.max_lat, step, -step);
        Ok(Self {
            grid: GeoGrid::new(transform, rows as usize, cols as usize),
            scale,
        })
    }

    pub fn grid(&self) -> &GeoGrid {
        &self.grid
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Spherical area of any cell in `row`, square meters
    pub fn cell_area(&self, row: usize) -> f64 {
        let t = &self.grid.transform;
        let top = (t.top_left_y + row as f64 * t.pixel_height).clamp(-90.0, 90.0);
        let bottom = (top + t.pixel_height).clamp(-90.0, 90.0);
        let d_lon = t.pixel_width.abs().to_radians();
        EARTH_RADIUS_M * EARTH_RADIUS_M * d_lon * (top.to_radians().sin() - bottom.to_radians().sin()).abs()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    /// Valid samples inside the region
    count: u64,
    /// Sum of valid sample values
    sum: f64,
    /// Area of valid, non-zero samples
    area: f64,
}

impl Accumulator {
    fn merge(self, other: Accumulator) -> Accumulator {
        Accumulator {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            area: self.area + other.area,
        }
    }
}

/// Sum / mean / area reductions of a band over a region
pub struct RegionReducer {
    params: ReductionParams,
}

impl RegionReducer {
    pub fn new(params: ReductionParams) -> VerdantResult<Self> {
        if !params.scale.is_finite() || params.scale <= 0.0 {
            return Err(VerdantError::InvalidInput(format!("Invalid reduction scale {} m", params.scale)));
        }
        if params.max_pixels == 0 {
            return Err(VerdantError::InvalidInput("maxPixels must be positive".to_string()));
        }
        Ok(Self { params })
    }

    pub fn standard() -> Self {
        Self { params: ReductionParams::default() }
    }

    pub fn params(&self) -> &ReductionParams {
        &self.params
    }

    fn accumulate(&self, band: &Band, source: &GeoGrid, roi: &Roi) -> VerdantResult<Accumulator> {
        let sampling = SamplingGrid::over_region(roi, self.params.scale, self.params.max_pixels)?;
        let lattice = *sampling.grid();

        log::info!(
            "Reducing '{}' over a {}x{} sampling grid at {} m",
            band.name(),
            lattice.rows,
            lattice.cols,
            self.params.scale
        );

        let row_sum = |row: usize| -> Accumulator {
            let cell_area = sampling.cell_area(row);
            let mut acc = Accumulator::default();
            for col in 0..lattice.cols {
                let (lon, lat) = lattice.pixel_center(row, col);
                if !roi.contains(lon, lat) {
                    continue;
                }
                let value = match source.locate(lon, lat).and_then(|(r, c)| band.get(r, c)) {
                    Some(value) => value,
                    None => continue,
                };
                acc.count += 1;
                acc.sum += value;
                if value != 0.0 {
                    acc.area += cell_area;
                }
            }
            acc
        };

        let rows: Vec<Accumulator> = (0..lattice.rows).into_par_iter().map(row_sum).collect();

        let total = rows.into_iter().fold(Accumulator::default(), Accumulator::merge);
        log::debug!("Reduction of '{}': {} valid samples", band.name(), total.count);
        Ok(total)
    }

    /// Area in square meters of region pixels where the single-band mask is
    /// valid and non-zero. An all-masked input yields 0.
    pub fn sum_area(&self, mask: &Image, roi: &Roi) -> VerdantResult<f64> {
        let acc = self.accumulate(mask.single_band()?, mask.grid(), roi)?;
        Ok(acc.area)
    }

    /// Mean of valid band values inside the region, `None` when there are none
    pub fn mean(&self, image: &Image, band: &str, roi: &Roi) -> VerdantResult<Option<f64>> {
        let acc = self.accumulate(image.band(band)?, image.grid(), roi)?;
        if acc.count == 0 {
            Ok(None)
        } else {
            Ok(Some(acc.sum / acc.count as f64))
        }
    }

    /// Sum of valid band values inside the region
    pub fn sum(&self, image: &Image, band: &str, roi: &Roi) -> VerdantResult<f64> {
        let acc = self.accumulate(image.band(band)?, image.grid(), roi)?;
        Ok(acc.sum)
    }
}
