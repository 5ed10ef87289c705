//! Random forest sales forecasting on calendar and order features

use crate::data::{float_values, Table, DISCOUNT, QUANTITY, SALES};
use crate::derive::{with_time_parts, DAY, DAY_OF_WEEK, MONTH, YEAR};
use crate::error::AnalysisError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

/// Model inputs, in column order
pub const FORECAST_FEATURES: [&str; 6] = [YEAR, MONTH, DAY, DAY_OF_WEEK, QUANTITY, DISCOUNT];

const MIN_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ForecastParams {
    pub trees: usize,
    /// Share of rows held out for evaluation
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            trees: 100,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForecastResult {
    pub train_rows: usize,
    pub test_rows: usize,
    pub mse: f64,
    /// Undefined when the held-out sales are constant
    pub r2: Option<f64>,
    /// Increase in held-out MSE when a feature is shuffled, largest first
    pub importance: Vec<(String, f64)>,
}

/// Feature rows and sales targets for every transaction
pub fn design_matrix(table: &Table) -> crate::Result<(Vec<Vec<f64>>, Vec<f64>)> {
    let frame = with_time_parts(table.local_frame(), table.order_dates())?;
    let columns = FORECAST_FEATURES
        .iter()
        .map(|name| float_values(&frame, name))
        .collect::<crate::Result<Vec<_>>>()?;

    let rows = (0..frame.height())
        .map(|i| columns.iter().map(|c| c[i].unwrap_or(0.0)).collect())
        .collect();
    Ok((rows, table.numeric_column(SALES)?))
}

/// Shuffle row indices with `seed` and hold out `test_fraction` of them (at least one)
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    if n < 2 {
        return (indices, Vec::new());
    }

    let test_len = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);
    let train = indices.split_off(test_len);
    (train, indices)
}

/// Fit a random forest on a seeded split and score it on the held-out rows
pub fn forecast_sales(table: &Table, params: &ForecastParams) -> crate::Result<ForecastResult> {
    if !(0.0..1.0).contains(&params.test_fraction) || params.test_fraction == 0.0 {
        return Err(AnalysisError::Computation(format!(
            "test fraction {} must lie in (0, 1)",
            params.test_fraction
        )));
    }
    if table.height() < MIN_ROWS {
        return Err(AnalysisError::InsufficientData {
            what: "sales forecasting".to_string(),
            needed: MIN_ROWS,
            found: table.height(),
        });
    }

    let (rows, targets) = design_matrix(table)?;
    let (train, test) = train_test_split(rows.len(), params.test_fraction, params.seed);
    let pick_rows = |idx: &[usize]| -> Vec<Vec<f64>> { idx.iter().map(|&i| rows[i].clone()).collect() };
    let pick_targets = |idx: &[usize]| -> Vec<f64> { idx.iter().map(|&i| targets[i]).collect() };

    let x_train = DenseMatrix::from_2d_vec(&pick_rows(&train));
    let y_train = pick_targets(&train);
    let model = RandomForestRegressor::fit(&x_train, &y_train, forest_parameters(params))
        .map_err(|e| AnalysisError::Model(e.to_string()))?;

    let test_rows = pick_rows(&test);
    let y_test = pick_targets(&test);
    let predict = |x: &[Vec<f64>]| -> crate::Result<Vec<f64>> {
        model
            .predict(&DenseMatrix::from_2d_vec(&x.to_vec()))
            .map_err(|e| AnalysisError::Model(e.to_string()))
    };

    let predictions = predict(&test_rows)?;
    let mse = mean_squared_error(&y_test, &predictions);
    let r2 = r2_score(&y_test, &predictions);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut importance = Vec::with_capacity(FORECAST_FEATURES.len());
    for (j, name) in FORECAST_FEATURES.iter().enumerate() {
        let mut column: Vec<f64> = test_rows.iter().map(|row| row[j]).collect();
        column.shuffle(&mut rng);
        let permuted: Vec<Vec<f64>> = test_rows
            .iter()
            .zip(&column)
            .map(|(row, &v)| {
                let mut row = row.clone();
                row[j] = v;
                row
            })
            .collect();
        let permuted_mse = mean_squared_error(&y_test, &predict(&permuted)?);
        importance.push((name.to_string(), permuted_mse - mse));
    }
    importance.sort_by(|a, b| b.1.total_cmp(&a.1));

    log::debug!(
        "random forest: {} trees, {} train rows, {} test rows",
        params.trees,
        train.len(),
        test.len()
    );

    Ok(ForecastResult {
        train_rows: train.len(),
        test_rows: test.len(),
        mse,
        r2,
        importance,
    })
}

/// Forest settings; the bootstrap samples follow the same seed as the split
fn forest_parameters(params: &ForecastParams) -> RandomForestRegressorParameters {
    RandomForestRegressorParameters::default()
        .with_n_trees(params.trees as _)
        .with_seed(params.seed)
}

pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}

/// Coefficient of determination; `None` when `actual` has no variance
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() {
        return None;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let total: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if total == 0.0 {
        return None;
    }
    let residual: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    Some(1.0 - residual / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::record;

    fn table(n: usize) -> Table {
        let records: Vec<_> = (0..n)
            .map(|i| {
                let mut r = record(
                    &format!("A-{i}"),
                    (2022, (i % 12) as u32 + 1, (i % 28) as u32 + 1),
                    &format!("{}", i % 7),
                    "Alchemy",
                    0.0,
                    1.0,
                );
                r.quantity = (i % 9) as i64 + 1;
                r.discount = (i % 5) as f64 / 10.0;
                r.sales = 50.0 * r.quantity as f64 * (1.0 - r.discount);
                r
            })
            .collect();
        Table::from_records(&records).unwrap()
    }

    #[test]
    fn test_metrics() {
        assert_eq!(mean_squared_error(&[1.0, 2.0], &[1.0, 4.0]), 2.0);
        assert_eq!(r2_score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), Some(1.0));
        assert_eq!(r2_score(&[2.0, 2.0], &[1.0, 3.0]), None);
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let (train, test) = train_test_split(10, 0.2, 42);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());

        assert_eq!(train_test_split(10, 0.2, 42), (train, test));
    }

    #[test]
    fn test_design_matrix_shape() {
        let (rows, targets) = design_matrix(&table(12)).unwrap();
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().all(|r| r.len() == FORECAST_FEATURES.len()));
        assert_eq!(targets.len(), 12);
        // first record: 2022-01-01, a Saturday, quantity 1, no discount
        assert_eq!(rows[0], vec![2022.0, 1.0, 1.0, 5.0, 1.0, 0.0]);
    }

    #[test]
    fn test_forecast_sales() {
        let params = ForecastParams {
            trees: 20,
            ..ForecastParams::default()
        };
        let result = forecast_sales(&table(100), &params).unwrap();

        assert_eq!(result.train_rows + result.test_rows, 100);
        assert_eq!(result.test_rows, 20);
        assert!(result.mse.is_finite() && result.mse >= 0.0);
        assert_eq!(result.importance.len(), FORECAST_FEATURES.len());
        assert!(result
            .importance
            .windows(2)
            .all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_forest_is_seeded_from_params() {
        let params = ForecastParams {
            trees: 10,
            seed: 7,
            ..ForecastParams::default()
        };
        assert_eq!(forest_parameters(&params).seed, 7);

        let first = forecast_sales(&table(60), &params).unwrap();
        let second = forecast_sales(&table(60), &params).unwrap();
        assert_eq!(first.mse, second.mse);
        assert_eq!(first.importance, second.importance);
    }

    #[test]
    fn test_forecast_needs_rows() {
        let err = forecast_sales(&table(3), &ForecastParams::default()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DataRange);
    }
}
