use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use geo::{BoundingRect, Contains, Coord, Intersects, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};

/// Real-valued pixel data (reflectance, index or class value)
pub type PixelValue = f64;

/// Mean Earth radius (IUGG) used for per-pixel area, meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Length of one degree of longitude at the equator (WGS84 semi-major axis), meters
pub const METERS_PER_DEGREE: f64 = 111_319.490_793_273_57;

/// Square meters per hectare
pub const SQ_METERS_PER_HECTARE: f64 = 10_000.0;

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(rename = "minLon")]
    pub min_lon: f64,
    #[serde(rename = "maxLon")]
    pub max_lon: f64,
    #[serde(rename = "minLat")]
    pub min_lat: f64,
    #[serde(rename = "maxLat")]
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    /// Closed polygon ring of the box corners
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (self.min_lon, self.min_lat),
                (self.max_lon, self.min_lat),
                (self.max_lon, self.max_lat),
                (self.min_lon, self.max_lat),
                (self.min_lon, self.min_lat),
            ]),
            vec![],
        )
    }
}

/// Geospatial transformation parameters (GDAL convention, degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    #[serde(rename = "topLeftX")]
    pub top_left_x: f64,
    #[serde(rename = "pixelWidth")]
    pub pixel_width: f64,
    #[serde(rename = "rotationX", default)]
    pub rotation_x: f64,
    #[serde(rename = "topLeftY")]
    pub top_left_y: f64,
    #[serde(rename = "rotationY", default)]
    pub rotation_y: f64,
    #[serde(rename = "pixelHeight")]
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation; `pixel_height` is usually negative
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    /// Geographic position of a fractional pixel coordinate
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Fractional (col, row) for a geographic position, `None` for a singular transform
    pub fn invert(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = lon - self.top_left_x;
        let dy = lat - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (self.pixel_width * dy - self.rotation_y * dx) / det;
        Some((col, row))
    }
}

/// Raster grid: georeferencing plus dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoGrid {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl GeoGrid {
    pub fn new(transform: GeoTransform, rows: usize, cols: usize) -> Self {
        Self { transform, rows, cols }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }

    /// Geographic coordinates of a pixel center
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Pixel containing a geographic position, if it falls on the grid
    pub fn locate(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let (col, row) = self.transform.invert(lon, lat)?;
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        if row < self.rows && col < self.cols {
            Some((row, col))
        } else {
            None
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(self.cols as f64, 0.0),
            self.transform.apply(0.0, self.rows as f64),
            self.transform.apply(self.cols as f64, self.rows as f64),
        ];
        let mut bbox = BoundingBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            bbox.min_lon = bbox.min_lon.min(x);
            bbox.max_lon = bbox.max_lon.max(x);
            bbox.min_lat = bbox.min_lat.min(y);
            bbox.max_lat = bbox.max_lat.max(y);
        }
        bbox
    }
}

/// Region of interest: a closed lon/lat polygon (EPSG:4326)
#[derive(Debug, Clone)]
pub struct Roi {
    polygon: Polygon<f64>,
    bounds: BoundingBox,
}

impl Roi {
    /// Build a region from (longitude, latitude) vertices.
    ///
    /// An open ring is closed by repeating the first vertex. Simplicity and
    /// winding order are not checked.
    pub fn from_vertices(vertices: &[(f64, f64)]) -> VerdantResult<Self> {
        for &(lon, lat) in vertices {
            if !lon.is_finite() || !lat.is_finite() {
                return Err(VerdantError::InvalidInput(format!(
                    "ROI vertex ({}, {}) is not finite", lon, lat
                )));
            }
            if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                return Err(VerdantError::InvalidInput(format!(
                    "ROI vertex ({}, {}) is outside lon [-180, 180] / lat [-90, 90]", lon, lat
                )));
            }
        }

        let mut distinct: Vec<(f64, f64)> = Vec::with_capacity(vertices.len());
        for v in vertices {
            if !distinct.contains(v) {
                distinct.push(*v);
            }
        }
        if distinct.len() < 3 {
            return Err(VerdantError::InvalidInput(format!(
                "ROI needs at least 3 distinct vertices, got {}", distinct.len()
            )));
        }

        let mut ring: Vec<Coord<f64>> = vertices.iter().map(|&(x, y)| Coord { x, y }).collect();
        if ring.first() != ring.last() {
            log::debug!("Closing open ROI ring of {} vertices", ring.len());
            ring.push(ring[0]);
        }

        let polygon = Polygon::new(LineString::from(ring), vec![]);
        let rect = polygon.bounding_rect().ok_or_else(|| {
            VerdantError::InvalidInput("ROI has no bounding rectangle".to_string())
        })?;
        let bounds = BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y);

        Ok(Self { polygon, bounds })
    }

    /// Axis-aligned rectangular region
    pub fn rectangle(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> VerdantResult<Self> {
        Self::from_vertices(&[
            (min_lon, min_lat),
            (max_lon, min_lat),
            (max_lon, max_lat),
            (min_lon, max_lat),
            (min_lon, min_lat),
        ])
    }

    /// Strict interior containment of a lon/lat point
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.polygon.contains(&Point::new(lon, lat))
    }

    pub fn intersects_bounds(&self, bbox: &BoundingBox) -> bool {
        self.bounds.intersects(bbox) && self.polygon.intersects(&bbox.to_polygon())
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// Closed vertex ring as (lon, lat) pairs
    pub fn vertices(&self) -> Vec<(f64, f64)> {
        self.polygon.exterior().coords().map(|c| (c.x, c.y)).collect()
    }
}

/// Half-open acquisition window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> VerdantResult<Self> {
        if end <= start {
            return Err(VerdantError::InvalidInput(format!(
                "Date range end {} is not after start {}", end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Calendar year: January 1 of `year` up to (excluding) January 1 of the next
    pub fn year(year: i32) -> VerdantResult<Self> {
        let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single();
        let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single();
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end),
            _ => Err(VerdantError::InvalidInput(format!("Invalid year: {}", year))),
        }
    }

    /// Parse `YYYY-MM-DD` bounds; the end date itself is excluded
    pub fn from_dates(start: &str, end: &str) -> VerdantResult<Self> {
        Self::new(parse_day(start)?, parse_day(end)?)
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        *time >= self.start && *time < self.end
    }
}

fn parse_day(value: &str) -> VerdantResult<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| VerdantError::InvalidInput(format!("Invalid date '{}': {}", value, e)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| VerdantError::InvalidInput(format!("Invalid date '{}'", value)))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

/// Error types for composite and change processing
#[derive(Debug, thiserror::Error)]
pub enum VerdantError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Band '{band}' not found (available: {available:?})")]
    BandNotFound { band: String, available: Vec<String> },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error(
        "Reduction of {estimated_pixels} pixels exceeds maxPixels {max_pixels} \
         (scale {scale} m over lon {:.6}..{:.6}, lat {:.6}..{:.6}); retry at a coarser scale",
        .bounds.min_lon, .bounds.max_lon, .bounds.min_lat, .bounds.max_lat
    )]
    ResourceLimit {
        estimated_pixels: u64,
        max_pixels: u64,
        scale: f64,
        bounds: BoundingBox,
    },

    #[error("Export error: {0}")]
    Export(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),
}

/// Result type for composite and change operations
pub type VerdantResult<T> = Result<T, VerdantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_closes_open_ring() {
        let roi = Roi::from_vertices(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]).unwrap();
        let ring = roi.vertices();
        assert_eq!(ring.first(), ring.last());
        assert_eq!(ring.len(), 5);
        assert!(roi.contains(0.5, 0.5));
        assert!(!roi.contains(1.5, 0.5));
    }

    #[test]
    fn test_roi_rejects_degenerate_and_out_of_range() {
        assert!(matches!(
            Roi::from_vertices(&[(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]),
            Err(VerdantError::InvalidInput(_))
        ));
        assert!(matches!(
            Roi::from_vertices(&[(0.0, 0.0), (181.0, 0.0), (1.0, 1.0)]),
            Err(VerdantError::InvalidInput(_))
        ));
        assert!(matches!(
            Roi::from_vertices(&[(0.0, f64::NAN), (1.0, 0.0), (1.0, 1.0)]),
            Err(VerdantError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_grid_locate_round_trip() {
        let grid = GeoGrid::new(GeoTransform::north_up(10.0, 5.0, 0.1, -0.1), 20, 30);
        let (lon, lat) = grid.pixel_center(7, 12);
        assert_eq!(grid.locate(lon, lat), Some((7, 12)));
        assert_eq!(grid.locate(9.99, 4.95), None);
        assert_eq!(grid.locate(10.05, 5.01), None);

        let bounds = grid.bounds();
        assert!((bounds.min_lon - 10.0).abs() < 1e-12);
        assert!((bounds.max_lon - 13.0).abs() < 1e-12);
        assert!((bounds.min_lat - 3.0).abs() < 1e-12);
        assert!((bounds.max_lat - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_date_range_year_is_half_open() {
        let range = DateRange::year(2020).unwrap();
        let new_year = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let next_year = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let last_second = Utc.with_ymd_and_hms(2020, 12, 31, 23, 59, 59).unwrap();
        assert!(range.contains(&new_year));
        assert!(range.contains(&last_second));
        assert!(!range.contains(&next_year));
    }

    #[test]
    fn test_date_range_validation() {
        assert!(DateRange::from_dates("2021-01-01", "2025-12-31").is_ok());
        assert!(matches!(
            DateRange::from_dates("2025-12-31", "2021-01-01"),
            Err(VerdantError::InvalidInput(_))
        ));
        assert!(matches!(
            DateRange::from_dates("2021-13-01", "2025-12-31"),
            Err(VerdantError::InvalidInput(_))
        ));
    }
}
