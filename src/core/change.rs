//! Two-date difference and three-way change classification

use crate::core::image::{Band, Image, ImageProperties};
use crate::types::{PixelValue, VerdantError, VerdantResult};
use serde::{Deserialize, Serialize};

/// Band name of the classified change raster
pub const CHANGE_CLASS_BAND: &str = "changeClass";

/// Change category of a valid difference pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeClass {
    Decrease,
    NoChange,
    Increase,
}

impl ChangeClass {
    /// Raster encoding: -1 decrease, 0 no change, 1 increase
    pub fn value(&self) -> PixelValue {
        match self {
            ChangeClass::Decrease => -1.0,
            ChangeClass::NoChange => 0.0,
            ChangeClass::Increase => 1.0,
        }
    }

    pub fn from_value(value: PixelValue) -> Option<Self> {
        if value == -1.0 {
            Some(ChangeClass::Decrease)
        } else if value == 0.0 {
            Some(ChangeClass::NoChange)
        } else if value == 1.0 {
            Some(ChangeClass::Increase)
        } else {
            None
        }
    }
}

/// Increase / decrease thresholds on the difference value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeThresholds {
    /// Differences strictly above this are an increase
    pub increase: f64,
    /// Differences strictly below this are a decrease
    pub decrease: f64,
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self {
            increase: 0.1,
            decrease: -0.1,
        }
    }
}

impl ChangeThresholds {
    pub fn new(increase: f64, decrease: f64) -> VerdantResult<Self> {
        let thresholds = Self { increase, decrease };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Requires `increase > 0 > decrease`
    pub fn validate(&self) -> VerdantResult<()> {
        if !(self.increase > 0.0 && self.decrease < 0.0) {
            return Err(VerdantError::InvalidInput(format!(
                "Change thresholds must satisfy increase > 0 > decrease (got {} / {})",
                self.increase, self.decrease
            )));
        }
        Ok(())
    }

    /// Values equal to a threshold are `NoChange`
    pub fn classify(&self, difference: PixelValue) -> ChangeClass {
        if difference > self.increase {
            ChangeClass::Increase
        } else if difference < self.decrease {
            ChangeClass::Decrease
        } else {
            ChangeClass::NoChange
        }
    }
}

/// `later - earlier` for two single-band images on an identical grid
pub fn difference(later: &Image, earlier: &Image, name: &str) -> VerdantResult<Image> {
    if later.grid() != earlier.grid() {
        return Err(VerdantError::GridMismatch(format!(
            "Cannot difference images on grids {:?} and {:?}",
            later.grid(),
            earlier.grid()
        )));
    }
    let band = later
        .single_band()?
        .zip_with(earlier.single_band()?, name, |l, e| Some(l - e))?;
    Image::new(*later.grid(), vec![band], ImageProperties::default())
}

/// Three-class raster (`changeClass`); masked difference pixels stay masked
pub fn classify(diff: &Image, thresholds: &ChangeThresholds) -> VerdantResult<Image> {
    thresholds.validate()?;
    let thresholds = *thresholds;
    let band = diff
        .single_band()?
        .map_valid(CHANGE_CLASS_BAND, move |d| Some(thresholds.classify(d).value()));
    Image::new(*diff.grid(), vec![band], ImageProperties::default())
}

/// Self-masked band: 1 where the difference falls in `class`, masked elsewhere
pub fn class_mask(diff: &Image, thresholds: &ChangeThresholds, class: ChangeClass, name: &str) -> VerdantResult<Image> {
    thresholds.validate()?;
    let thresholds = *thresholds;
    let band: Band = diff.single_band()?.map_valid(name, move |d| {
        if thresholds.classify(d) == class {
            Some(1.0)
        } else {
            None
        }
    });
    Image::new(*diff.grid(), vec![band], ImageProperties::default())
}

/// Pixels with difference strictly above the increase threshold
pub fn increased_mask(diff: &Image, thresholds: &ChangeThresholds, name: &str) -> VerdantResult<Image> {
    class_mask(diff, thresholds, ChangeClass::Increase, name)
}

/// Pixels with difference strictly below the decrease threshold
pub fn decreased_mask(diff: &Image, thresholds: &ChangeThresholds, name: &str) -> VerdantResult<Image> {
    class_mask(diff, thresholds, ChangeClass::Decrease, name)
}

/// Valid pixels between the thresholds, boundaries included
pub fn no_change_mask(diff: &Image, thresholds: &ChangeThresholds, name: &str) -> VerdantResult<Image> {
    class_mask(diff, thresholds, ChangeClass::NoChange, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoGrid, GeoTransform};
    use ndarray::array;

    fn single(name: &str, values: ndarray::Array2<f64>) -> Image {
        let grid = GeoGrid::new(GeoTransform::north_up(0.0, 1.0, 0.5, -0.5), 2, 3);
        Image::new(grid, vec![Band::from_values(name, values)], ImageProperties::default()).unwrap()
    }

    #[test]
    fn test_classify_boundaries_are_no_change() {
        let t = ChangeThresholds::default();
        assert_eq!(t.classify(0.1), ChangeClass::NoChange);
        assert_eq!(t.classify(-0.1), ChangeClass::NoChange);
        assert_eq!(t.classify(0.1000001), ChangeClass::Increase);
        assert_eq!(t.classify(-0.1000001), ChangeClass::Decrease);
        assert_eq!(t.classify(0.0), ChangeClass::NoChange);
    }

    #[test]
    fn test_thresholds_must_straddle_zero() {
        assert!(ChangeThresholds::new(0.1, -0.1).is_ok());
        assert!(ChangeThresholds::new(-0.1, -0.2).is_err());
        assert!(ChangeThresholds::new(0.2, 0.1).is_err());
        assert!(ChangeThresholds::new(0.0, -0.1).is_err());
    }

    #[test]
    fn test_difference_and_class_raster() {
        let earlier = single("NDVI_2020", array![[0.2, 0.5, 0.3], [0.3, f64::NAN, 0.4]]);
        let later = single("NDVI_2024", array![[0.35, 0.2, 0.3], [0.4, 0.6, 0.3]]);

        let diff = difference(&later, &earlier, "NDVI_Difference").unwrap();
        let classes = classify(&diff, &ChangeThresholds::default()).unwrap();
        let band = classes.band(CHANGE_CLASS_BAND).unwrap();

        assert_eq!(band.get(0, 0), Some(1.0));
        assert_eq!(band.get(0, 1), Some(-1.0));
        assert_eq!(band.get(0, 2), Some(0.0));
        assert_eq!(band.get(1, 1), None); // masked input stays unclassified
        assert_eq!(ChangeClass::from_value(band.get(0, 1).unwrap()), Some(ChangeClass::Decrease));
    }

    #[test]
    fn test_masks_partition_valid_pixels() {
        let diff = single("d", array![[0.1, 0.11, -0.1], [-0.11, f64::NAN, 0.0]]);
        let t = ChangeThresholds::default();

        let inc = increased_mask(&diff, &t, "NDVI_increase").unwrap();
        let dec = decreased_mask(&diff, &t, "NDVI_decrease").unwrap();
        let none = no_change_mask(&diff, &t, "NDVI_no_change").unwrap();

        let inc = inc.single_band().unwrap();
        let dec = dec.single_band().unwrap();
        let none = none.single_band().unwrap();
        assert_eq!(inc.valid_count(), 1);
        assert_eq!(dec.valid_count(), 1);
        assert_eq!(none.valid_count(), 3);
        assert_eq!(inc.get(0, 1), Some(1.0));
        assert_eq!(dec.get(1, 0), Some(1.0));
        assert_eq!(inc.get(1, 1).or(dec.get(1, 1)).or(none.get(1, 1)), None);
    }

    #[test]
    fn test_difference_requires_single_bands_on_same_grid() {
        let a = single("a", array![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        let two = a.add_bands(vec![Band::constant("b", (2, 3), 1.0)]).unwrap();
        assert!(matches!(difference(&two, &a, "d"), Err(VerdantError::InvalidInput(_))));

        let other_grid = GeoGrid::new(GeoTransform::north_up(5.0, 1.0, 0.5, -0.5), 2, 3);
        let shifted = Image::new(other_grid, vec![Band::constant("c", (2, 3), 1.0)], ImageProperties::default()).unwrap();
        assert!(matches!(difference(&shifted, &a, "d"), Err(VerdantError::GridMismatch(_))));
    }
}
