use crate::core::change::ChangeThresholds;
use crate::io::export::ExportJob;
use crate::types::{VerdantResult, SQ_METERS_PER_HECTARE};
use std::fmt;

/// Unit conversion applied by callers of the area reducer
pub fn square_meters_to_hectares(square_meters: f64) -> f64 {
    square_meters / SQ_METERS_PER_HECTARE
}

/// Outcome of one export submission
#[derive(Debug)]
pub struct ExportOutcome {
    pub description: String,
    pub job: VerdantResult<ExportJob>,
}

/// Scalar results of a two-date index change analysis
#[derive(Debug)]
pub struct ChangeReport {
    pub index_name: String,
    pub earlier_year: i32,
    pub later_year: i32,
    pub thresholds: ChangeThresholds,
    pub increase_area_m2: f64,
    pub decrease_area_m2: f64,
    pub no_change_area_m2: f64,
    /// Mean difference over the region; `None` when no pixel was valid
    pub mean_difference: Option<f64>,
    pub exports: Vec<ExportOutcome>,
}

impl ChangeReport {
    pub fn increase_area_ha(&self) -> f64 {
        square_meters_to_hectares(self.increase_area_m2)
    }

    pub fn decrease_area_ha(&self) -> f64 {
        square_meters_to_hectares(self.decrease_area_m2)
    }

    pub fn no_change_area_ha(&self) -> f64 {
        square_meters_to_hectares(self.no_change_area_m2)
    }

    /// Export submissions that failed
    pub fn failed_exports(&self) -> impl Iterator<Item = &ExportOutcome> {
        self.exports.iter().filter(|o| o.job.is_err())
    }

    /// Labeled values in display order
    pub fn summary(&self) -> Vec<(String, String)> {
        let idx = &self.index_name;
        let mut lines = vec![
            (
                format!("{} increase (> {}) area (sq.m)", idx, self.thresholds.increase),
                format!("{:.2}", self.increase_area_m2),
            ),
            (
                format!("{} decrease (< {}) area (sq.m)", idx, self.thresholds.decrease),
                format!("{:.2}", self.decrease_area_m2),
            ),
            (format!("{} increase area (ha)", idx), format!("{:.4}", self.increase_area_ha())),
            (format!("{} decrease area (ha)", idx), format!("{:.4}", self.decrease_area_ha())),
            (format!("{} no change area (ha)", idx), format!("{:.4}", self.no_change_area_ha())),
            (
                format!("Mean {} change ({} - {}) over AOI", idx, self.later_year, self.earlier_year),
                match self.mean_difference {
                    Some(mean) => format!("{:.6}", mean),
                    None => "undefined".to_string(),
                },
            ),
        ];
        for outcome in &self.exports {
            let status = match &outcome.job {
                Ok(job) => format!("submitted as job {}", job.id()),
                Err(e) => format!("failed: {}", e),
            };
            lines.push((format!("Export {}", outcome.description), status));
        }
        lines
    }
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, value) in self.summary() {
            writeln!(f, "{}: {}", label, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VerdantError;

    fn report() -> ChangeReport {
        ChangeReport {
            index_name: "NDVI".to_string(),
            earlier_year: 2020,
            later_year: 2024,
            thresholds: ChangeThresholds::default(),
            increase_area_m2: 125_000.0,
            decrease_area_m2: 0.0,
            no_change_area_m2: 20_000.0,
            mean_difference: None,
            exports: vec![ExportOutcome {
                description: "NDVI_Difference_2024_minus_2020".to_string(),
                job: Err(VerdantError::Export("quota exceeded".to_string())),
            }],
        }
    }

    #[test]
    fn test_hectare_conversion() {
        assert_eq!(square_meters_to_hectares(12_345.0), 1.2345);
        assert_eq!(report().increase_area_ha(), 12.5);
    }

    #[test]
    fn test_summary_labels_and_failures() {
        let report = report();
        let summary = report.summary();
        assert_eq!(summary[0].0, "NDVI increase (> 0.1) area (sq.m)");
        assert_eq!(summary[0].1, "125000.00");
        assert_eq!(summary[1].0, "NDVI decrease (< -0.1) area (sq.m)");
        assert_eq!(summary[5].1, "undefined");
        assert!(summary[6].1.contains("quota exceeded"));
        assert_eq!(report.failed_exports().count(), 1);

        let text = report.to_string();
        assert!(text.contains("Mean NDVI change (2024 - 2020) over AOI: undefined"));
    }
}
