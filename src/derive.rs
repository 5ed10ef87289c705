//! Derived columns: discount bands, profit margin, calendar parts and cohorts

use crate::data::{float_values, text_values, DISCOUNT, PROFIT, SALES};
use crate::error::AnalysisError;
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use std::collections::HashMap;

pub const DISCOUNT_BIN: &str = "Discount Bin";
pub const PROFIT_MARGIN: &str = "Profit Margin";
pub const YEAR: &str = "Year";
pub const MONTH: &str = "Month";
pub const DAY: &str = "Day";
pub const DAY_OF_WEEK: &str = "DayOfWeek";
pub const ORDER_MONTH: &str = "Order Month";
pub const COHORT_MONTH: &str = "Cohort Month";
pub const COHORT_INDEX: &str = "Cohort Index";

/// Default discount band edges
pub const DISCOUNT_EDGES: [f64; 6] = [0.0, 0.1, 0.2, 0.3, 0.4, 1.0];

/// Ordered half-open intervals `[edge_i, edge_i+1)` with labels.
///
/// A value on an inner edge belongs to the upper bin. The last bin is closed
/// on the right, so the top edge itself is in range.
#[derive(Debug, Clone, PartialEq)]
pub struct Binning {
    edges: Vec<f64>,
    labels: Vec<String>,
}

impl Binning {
    pub fn new(edges: Vec<f64>, labels: Vec<String>) -> crate::Result<Self> {
        if edges.len() < 2 {
            return Err(AnalysisError::Computation(
                "binning needs at least two edges".to_string(),
            ));
        }
        if labels.len() + 1 != edges.len() {
            return Err(AnalysisError::Computation(format!(
                "binning has {} edges but {} labels",
                edges.len(),
                labels.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalysisError::Computation(
                "bin edges must be finite and strictly increasing".to_string(),
            ));
        }
        Ok(Self { edges, labels })
    }

    /// Bins with percentage labels generated from the edges, e.g. `0-10%` and `40%+`
    pub fn from_edges(edges: Vec<f64>) -> crate::Result<Self> {
        let n = edges.len().saturating_sub(1);
        let labels = (0..n)
            .map(|i| {
                if i + 1 == n {
                    format!("{}%+", percent(edges[i]))
                } else {
                    format!("{}-{}%", percent(edges[i]), percent(edges[i + 1]))
                }
            })
            .collect();
        Self::new(edges, labels)
    }

    /// The discount bands `0-10%`, `10-20%`, `20-30%`, `30-40%`, `40%+`
    pub fn discount() -> Self {
        Self {
            edges: DISCOUNT_EDGES.to_vec(),
            labels: ["0-10%", "10-20%", "20-30%", "30-40%", "40%+"]
                .iter()
                .map(|l| l.to_string())
                .collect(),
        }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Index of the bin holding `value`
    pub fn assign(&self, value: f64) -> crate::Result<usize> {
        let min = self.edges[0];
        let max = self.edges[self.edges.len() - 1];
        if value.is_nan() || value < min || value > max {
            return Err(AnalysisError::OutOfBins { value, min, max });
        }

        let last = self.labels.len() - 1;
        Ok((0..last)
            .find(|&i| value < self.edges[i + 1])
            .unwrap_or(last))
    }

    pub fn label_for(&self, value: f64) -> crate::Result<&str> {
        Ok(&self.labels[self.assign(value)?])
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self::discount()
    }
}

fn percent(edge: f64) -> String {
    let p = edge * 100.0;
    if (p - p.round()).abs() < 1e-9 {
        format!("{}", p.round() as i64)
    } else {
        format!("{p:.1}")
    }
}

/// Profit over sales; `None` when sales is zero
pub fn profit_margin(profit: f64, sales: f64) -> Option<f64> {
    if sales == 0.0 || !sales.is_finite() || !profit.is_finite() {
        None
    } else {
        Some(profit / sales)
    }
}

/// `YYYY-MM` key of the calendar month holding `date`
pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Calendar months from the month of `from` to the month of `to`
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32
}

/// For each order, the customer's cohort (month of their first order) and the
/// number of calendar months since that first order
pub fn cohort_indices(customers: &[String], dates: &[NaiveDate]) -> Vec<(String, i32)> {
    let mut first_order: HashMap<&str, NaiveDate> = HashMap::new();
    for (customer, &date) in customers.iter().zip(dates) {
        first_order
            .entry(customer.as_str())
            .and_modify(|first| *first = (*first).min(date))
            .or_insert(date);
    }

    customers
        .iter()
        .zip(dates)
        .map(|(customer, &date)| {
            let first = first_order[customer.as_str()];
            (month_key(first), months_between(first, date))
        })
        .collect()
}

/// Append `Discount Bin` labels. Any discount outside the bins is an error.
pub fn with_discount_bins(mut frame: DataFrame, binning: &Binning) -> crate::Result<DataFrame> {
    let labels = float_values(&frame, DISCOUNT)?
        .into_iter()
        .map(|discount| {
            let discount = discount.ok_or_else(|| {
                AnalysisError::Computation(format!("null in `{DISCOUNT}`"))
            })?;
            binning.label_for(discount).map(str::to_string)
        })
        .collect::<crate::Result<Vec<String>>>()?;

    frame.with_column(Series::new(DISCOUNT_BIN.into(), labels))?;
    Ok(frame)
}

/// Append `Profit Margin`, null where sales is zero
pub fn with_profit_margin(mut frame: DataFrame) -> crate::Result<DataFrame> {
    let profit = float_values(&frame, PROFIT)?;
    let sales = float_values(&frame, SALES)?;
    let margin: Vec<Option<f64>> = profit
        .into_iter()
        .zip(sales)
        .map(|(p, s)| profit_margin(p?, s?))
        .collect();

    frame.with_column(Series::new(PROFIT_MARGIN.into(), margin))?;
    Ok(frame)
}

/// Append `Year`, `Month`, `Day`, `DayOfWeek` (Monday = 0) and `Order Month`
pub fn with_time_parts(mut frame: DataFrame, dates: &[NaiveDate]) -> crate::Result<DataFrame> {
    check_len(&frame, dates)?;

    let part = |f: fn(&NaiveDate) -> i32| -> Vec<i32> { dates.iter().map(f).collect() };
    frame.with_column(Series::new(YEAR.into(), part(|d| d.year())))?;
    frame.with_column(Series::new(MONTH.into(), part(|d| d.month() as i32)))?;
    frame.with_column(Series::new(DAY.into(), part(|d| d.day() as i32)))?;
    frame.with_column(Series::new(
        DAY_OF_WEEK.into(),
        part(|d| d.weekday().num_days_from_monday() as i32),
    ))?;
    frame.with_column(Series::new(
        ORDER_MONTH.into(),
        dates.iter().map(|d| month_key(*d)).collect::<Vec<String>>(),
    ))?;
    Ok(frame)
}

/// Append `Cohort Month` and `Cohort Index` keyed by `customer_column`
pub fn with_cohorts(
    mut frame: DataFrame,
    customer_column: &str,
    dates: &[NaiveDate],
) -> crate::Result<DataFrame> {
    check_len(&frame, dates)?;

    let customers: Vec<String> = text_values(&frame, customer_column)?
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();
    let (months, indices): (Vec<String>, Vec<i32>) =
        cohort_indices(&customers, dates).into_iter().unzip();

    frame.with_column(Series::new(COHORT_MONTH.into(), months))?;
    frame.with_column(Series::new(COHORT_INDEX.into(), indices))?;
    Ok(frame)
}

fn check_len(frame: &DataFrame, dates: &[NaiveDate]) -> crate::Result<()> {
    if frame.height() != dates.len() {
        return Err(AnalysisError::Computation(format!(
            "{} dates supplied for {} rows",
            dates.len(),
            frame.height()
        )));
    }
    Ok(())
}
