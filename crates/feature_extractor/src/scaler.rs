//! Per-column standardization fitted at training time.

use invocation_structs::ForecastError;
use serde::{Deserialize, Serialize};

/// Zero-mean, unit-variance scaler over a fixed list of columns.
///
/// Missing values (`None`) are ignored while fitting and pass through
/// `transform_row` untouched. Variance is the population variance; a column
/// with zero variance gets a scale of 1.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StandardScaler {
    pub feature_names: Vec<String>,
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
    pub scale: Vec<f64>,
    pub samples_seen: Vec<usize>,
}

impl StandardScaler {
    /// Fits the scaler on `rows`, each holding one value per name in `feature_names`.
    ///
    /// # Errors
    ///
    /// Returns a schema error if there are no rows or a row has the wrong width.
    pub fn fit<R: AsRef<[Option<f64>]>>(
        feature_names: Vec<String>,
        rows: &[R],
    ) -> Result<Self, ForecastError> {
        let width = feature_names.len();
        if rows.is_empty() {
            return Err(ForecastError::schema("cannot fit scaler on zero rows"));
        }

        let mut sums = vec![0.0f64; width];
        let mut counts = vec![0usize; width];

        for row in rows {
            let row = row.as_ref();
            check_width(width, row.len())?;
            for (column, value) in row.iter().enumerate() {
                if let Some(value) = value {
                    sums[column] += value;
                    counts[column] += 1;
                }
            }
        }

        let mean: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(&sum, &count)| if count > 0 { sum / count as f64 } else { 0.0 })
            .collect();

        let mut squared = vec![0.0f64; width];
        for row in rows {
            for (column, value) in row.as_ref().iter().enumerate() {
                if let Some(value) = value {
                    let delta = value - mean[column];
                    squared[column] += delta * delta;
                }
            }
        }

        let variance: Vec<f64> = squared
            .iter()
            .zip(&counts)
            .map(|(&sq, &count)| if count > 0 { sq / count as f64 } else { 0.0 })
            .collect();

        let scale = variance
            .iter()
            .map(|&var| {
                let std = var.sqrt();
                if std > f64::EPSILON { std } else { 1.0 }
            })
            .collect();

        Ok(Self {
            feature_names,
            mean,
            variance,
            scale,
            samples_seen: counts,
        })
    }

    /// Number of columns this scaler was fit on.
    #[must_use]
    pub fn width(&self) -> usize {
        self.feature_names.len()
    }

    /// Standardizes one row.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the row has the wrong width.
    pub fn transform_row(&self, row: &[Option<f64>]) -> Result<Vec<Option<f64>>, ForecastError> {
        check_width(self.width(), row.len())?;
        Ok(row
            .iter()
            .enumerate()
            .map(|(column, value)| value.map(|v| (v - self.mean[column]) / self.scale[column]))
            .collect())
    }

    /// Maps one standardized row back to original units.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the row has the wrong width.
    pub fn inverse_transform_row(&self, row: &[f64]) -> Result<Vec<f64>, ForecastError> {
        check_width(self.width(), row.len())?;
        Ok(row
            .iter()
            .enumerate()
            .map(|(column, value)| value.mul_add(self.scale[column], self.mean[column]))
            .collect())
    }

    /// Maps standardized rows back to original units.
    ///
    /// # Errors
    ///
    /// Returns a schema error if any row has the wrong width.
    pub fn inverse_transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ForecastError> {
        rows.iter()
            .map(|row| self.inverse_transform_row(row))
            .collect()
    }

    /// Inverts standardized values of column 0 only.
    ///
    /// The scaler inverts whole rows, so each value is placed in column 0 of an
    /// otherwise zero row, the row is inverted, and column 0 is read back. The
    /// transform is diagonal, so the zero filler never leaks into column 0.
    #[must_use]
    pub fn inverse_first_column(&self, scaled: &[f64]) -> Vec<f64> {
        let width = self.width();
        if width == 0 {
            return Vec::new();
        }

        let dummy: Vec<Vec<f64>> = scaled
            .iter()
            .map(|&value| {
                let mut row = vec![0.0; width];
                row[0] = value;
                row
            })
            .collect();

        self.inverse_transform(&dummy)
            .unwrap_or_default()
            .into_iter()
            .map(|row| row[0])
            .collect()
    }
}

fn check_width(expected: usize, actual: usize) -> Result<(), ForecastError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ForecastError::schema(format!(
            "scaler expects {expected} columns, got {actual}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn names(width: usize) -> Vec<String> {
        (0..width).map(|i| format!("c{i}")).collect()
    }

    #[test]
    fn test_fit_population_statistics() {
        let rows = vec![vec![Some(1.0), Some(10.0)], vec![Some(3.0), Some(10.0)]];
        let scaler = StandardScaler::fit(names(2), &rows).expect("fit");

        assert!((scaler.mean[0] - 2.0).abs() < 1e-12);
        assert!((scaler.variance[0] - 1.0).abs() < 1e-12);
        assert!((scaler.scale[0] - 1.0).abs() < 1e-12);
        // Constant column keeps unit scale.
        assert!((scaler.scale[1] - 1.0).abs() < 1e-12);

        let scaled = scaler.transform_row(&[Some(3.0), Some(10.0)]).expect("transform");
        assert_eq!(scaled, vec![Some(1.0), Some(0.0)]);
    }

    #[test]
    fn test_missing_values_ignored_and_preserved() {
        let rows = vec![
            vec![None, Some(1.0)],
            vec![Some(4.0), Some(2.0)],
            vec![Some(8.0), Some(3.0)],
        ];
        let scaler = StandardScaler::fit(names(2), &rows).expect("fit");

        assert_eq!(scaler.samples_seen, vec![2, 3]);
        assert!((scaler.mean[0] - 6.0).abs() < 1e-12);

        let scaled = scaler.transform_row(&[None, Some(2.0)]).expect("transform");
        assert_eq!(scaled[0], None);
        assert_eq!(scaled[1], Some(0.0));
    }

    #[test]
    fn test_fit_rejects_empty_and_ragged_input() {
        let empty: Vec<Vec<Option<f64>>> = Vec::new();
        assert!(StandardScaler::fit(names(2), &empty).is_err());

        let ragged = vec![vec![Some(1.0), Some(2.0)], vec![Some(1.0)]];
        assert!(matches!(
            StandardScaler::fit(names(2), &ragged),
            Err(ForecastError::Schema(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip_keeps_statistics() {
        let rows = vec![vec![Some(1.0)], vec![Some(5.0)]];
        let scaler = StandardScaler::fit(names(1), &rows).expect("fit");
        let json = serde_json::to_string(&scaler).expect("serialize");
        let restored: StandardScaler = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, scaler);
    }

    proptest! {
        #[test]
        fn inverse_first_column_recovers_original(
            rows in prop::collection::vec(prop::array::uniform7(-1.0e6f64..1.0e6), 2..40),
            pick in 0usize..40,
        ) {
            let optional: Vec<Vec<Option<f64>>> = rows
                .iter()
                .map(|row| row.iter().copied().map(Some).collect())
                .collect();
            let scaler = StandardScaler::fit(names(7), &optional).expect("fit");

            let row = &optional[pick % optional.len()];
            let scaled = scaler.transform_row(row).expect("transform");
            let first = scaled[0].expect("present");

            let recovered = scaler.inverse_first_column(&[first]);
            let original = row[0].expect("present");
            let tolerance = 1e-6 * (1.0 + original.abs() + scaler.mean[0].abs());

            prop_assert_eq!(recovered.len(), 1);
            prop_assert!((recovered[0] - original).abs() <= tolerance);
        }
    }
}
