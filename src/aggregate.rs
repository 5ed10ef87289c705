//! Grouping, reduction and reshaping of transaction frames into aggregate views
//!
//! Every ordering decision is explicit here:
//! - groups come out in order of first appearance in the input,
//! - sorts are stable, so ties keep their current order, and nulls sort last,
//! - pivots state how missing combinations are filled.

use crate::data::{float_values, text_values};
use crate::error::AnalysisError;
use polars::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Reduction applied to one column within each group. Nulls never take part,
/// so `Sum` and `Mean` of a group without values are null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Mean,
    /// Number of non-null values
    Count,
    /// Number of distinct non-null values
    DistinctCount,
}

/// A named reduction of one source column
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub column: String,
    pub reducer: Reducer,
    pub alias: String,
}

impl Aggregation {
    pub fn new(column: &str, reducer: Reducer, alias: &str) -> Self {
        Self {
            column: column.to_string(),
            reducer,
            alias: alias.to_string(),
        }
    }

    /// Sum of `column`, keeping the column name
    pub fn sum(column: &str) -> Self {
        Self::new(column, Reducer::Sum, column)
    }

    /// Mean of `column`, keeping the column name
    pub fn mean(column: &str) -> Self {
        Self::new(column, Reducer::Mean, column)
    }

    pub fn count(column: &str, alias: &str) -> Self {
        Self::new(column, Reducer::Count, alias)
    }

    pub fn distinct_count(column: &str, alias: &str) -> Self {
        Self::new(column, Reducer::DistinctCount, alias)
    }

    fn expr(&self) -> Expr {
        let source = col(self.column.as_str());
        let reduced = match self.reducer {
            // a group with no non-null values has no sum
            Reducer::Sum => when(source.clone().count().gt(lit(0)))
                .then(source.sum())
                .otherwise(lit(NULL)),
            Reducer::Mean => source.mean(),
            Reducer::Count => source.count(),
            Reducer::DistinctCount => source.drop_nulls().n_unique(),
        };
        reduced.alias(self.alias.as_str())
    }
}

/// Secondary sort key used to break ties in [`top_n`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn ascending(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: false,
        }
    }

    pub fn descending(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: true,
        }
    }
}

/// How [`pivot`] fills key combinations that do not occur in the view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotFill {
    /// Missing combinations become 0 (counts and sums)
    Zero,
    /// Missing combinations stay null (means)
    Absent,
}

/// Group keys followed by reduced value columns
#[derive(Debug, Clone)]
pub struct AggregateView {
    frame: DataFrame,
    keys: Vec<String>,
}

impl AggregateView {
    pub fn new(frame: DataFrame, keys: Vec<String>) -> Self {
        Self { frame, keys }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Names of the non-key columns, in frame order
    pub fn value_columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .filter(|name| !self.keys.contains(name))
            .collect()
    }

    /// Values of `column` rendered as text; nulls read as `"null"`
    pub fn labels(&self, column: &str) -> crate::Result<Vec<String>> {
        Ok(self
            .keys_of(column)?
            .into_iter()
            .map(|v| v.unwrap_or_else(|| "null".to_string()))
            .collect())
    }

    /// Values of `column` as text, nulls kept apart from any literal text
    pub fn keys_of(&self, column: &str) -> crate::Result<Vec<Option<String>>> {
        text_values(&self.frame, column)
    }

    /// Values of `column` as `f64`
    pub fn values(&self, column: &str) -> crate::Result<Vec<Option<f64>>> {
        float_values(&self.frame, column)
    }

    /// Append (or replace) a float column
    pub fn with_column(mut self, name: &str, values: Vec<Option<f64>>) -> crate::Result<Self> {
        self.frame.with_column(Series::new(name.into(), values))?;
        Ok(self)
    }

    /// Keep only the first `n` rows
    pub fn head(&self, n: usize) -> Self {
        Self {
            frame: self.frame.head(Some(n)),
            keys: self.keys.clone(),
        }
    }
}

impl fmt::Display for AggregateView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.frame)
    }
}

/// Partition `frame` by `keys` and reduce each group
///
/// # Arguments
/// * `frame` - Source rows, usually a report's local copy of the table
/// * `keys` - One or more grouping columns
/// * `aggregations` - Reductions to compute per group, in output order
///
/// # Returns
/// * One row per distinct key combination, in order of first appearance
pub fn group_reduce(
    frame: &DataFrame,
    keys: &[&str],
    aggregations: &[Aggregation],
) -> crate::Result<AggregateView> {
    if keys.is_empty() {
        return Err(AnalysisError::Computation(
            "grouping needs at least one key column".to_string(),
        ));
    }

    for key in keys {
        let column = frame
            .column(key)
            .map_err(|_| AnalysisError::Computation(format!("unknown key column `{key}`")))?;
        if column.len() > 0 && column.null_count() == column.len() {
            return Err(AnalysisError::NullKey(key.to_string()));
        }
    }
    for aggregation in aggregations {
        if frame.column(&aggregation.column).is_err() {
            return Err(AnalysisError::Computation(format!(
                "unknown value column `{}`",
                aggregation.column
            )));
        }
    }

    let by: Vec<Expr> = keys.iter().map(|key| col(*key)).collect();
    let exprs: Vec<Expr> = aggregations.iter().map(Aggregation::expr).collect();
    let grouped = frame
        .clone()
        .lazy()
        .group_by_stable(by)
        .agg(exprs)
        .collect()?;

    Ok(AggregateView::new(
        grouped,
        keys.iter().map(|key| key.to_string()).collect(),
    ))
}

/// Sort a view by `column` without truncating it
pub fn sort_by(
    view: &AggregateView,
    column: &str,
    descending: bool,
    secondary: Option<&SortKey>,
) -> crate::Result<AggregateView> {
    if view.frame.column(column).is_err() {
        return Err(AnalysisError::Computation(format!(
            "unknown sort column `{column}`"
        )));
    }

    let mut by = vec![column.to_string()];
    let mut order = vec![descending];
    if let Some(key) = secondary {
        by.push(key.column.clone());
        order.push(key.descending);
    }

    let options = SortMultipleOptions::default()
        .with_order_descending_multi(order)
        .with_nulls_last_multi(vec![true; by.len()])
        .with_maintain_order(true);
    let frame = view.frame.sort(by, options)?;

    Ok(AggregateView::new(frame, view.keys.clone()))
}

/// The `n` rows with the largest `column`, nulls last, ties in current order
/// unless a secondary key is given
pub fn top_n(
    view: &AggregateView,
    column: &str,
    n: usize,
    secondary: Option<&SortKey>,
) -> crate::Result<AggregateView> {
    Ok(sort_by(view, column, true, secondary)?.head(n))
}

/// Reshape a two-key view into a matrix: one row per `row_key` value (first
/// appearance order), one float column per `column_key` value (natural order)
pub fn pivot(
    view: &AggregateView,
    row_key: &str,
    column_key: &str,
    value: &str,
    fill: PivotFill,
) -> crate::Result<AggregateView> {
    let rows = view.keys_of(row_key)?;
    let columns = view
        .keys_of(column_key)?
        .into_iter()
        .map(|column| {
            column.ok_or_else(|| {
                AnalysisError::Computation(format!("null in pivot column key `{column_key}`"))
            })
        })
        .collect::<crate::Result<Vec<String>>>()?;
    let values = view.values(value)?;

    let mut row_labels: Vec<Option<String>> = Vec::new();
    let mut row_index: HashMap<Option<&str>, usize> = HashMap::new();
    for row in &rows {
        if !row_index.contains_key(&row.as_deref()) {
            row_index.insert(row.as_deref(), row_labels.len());
            row_labels.push(row.clone());
        }
    }

    let mut column_labels: Vec<String> = Vec::new();
    for column in &columns {
        if !column_labels.contains(column) {
            column_labels.push(column.clone());
        }
    }
    sort_naturally(&mut column_labels);
    let column_index: HashMap<&str, usize> = column_labels
        .iter()
        .enumerate()
        .map(|(i, label)| (label.as_str(), i))
        .collect();

    let missing = match fill {
        PivotFill::Zero => Some(0.0),
        PivotFill::Absent => None,
    };
    let mut cells: Vec<Vec<Option<Option<f64>>>> =
        vec![vec![None; column_labels.len()]; row_labels.len()];
    for ((row, column), value) in rows.iter().zip(&columns).zip(values) {
        let cell = &mut cells[row_index[&row.as_deref()]][column_index[column.as_str()]];
        if cell.is_some() {
            return Err(AnalysisError::Computation(format!(
                "duplicate pivot entry for ({}, {column})",
                row.as_deref().unwrap_or("null")
            )));
        }
        *cell = Some(value);
    }

    let mut frame_columns: Vec<Column> = Vec::with_capacity(column_labels.len() + 1);
    frame_columns.push(Series::new(row_key.into(), row_labels).into());
    for (j, label) in column_labels.iter().enumerate() {
        let column: Vec<Option<f64>> = cells
            .iter()
            .map(|row| row[j].unwrap_or(missing))
            .collect();
        frame_columns.push(Series::new(label.as_str().into(), column).into());
    }

    Ok(AggregateView::new(
        DataFrame::new(frame_columns)?,
        vec![row_key.to_string()],
    ))
}

/// Put rows in the order given by `order` for the labels of `key`; labels not
/// listed keep their relative order after the listed ones
pub fn reorder_rows(
    view: &AggregateView,
    key: &str,
    order: &[String],
) -> crate::Result<AggregateView> {
    let labels = view.labels(key)?;
    let rank = |label: &str| order.iter().position(|o| o == label).unwrap_or(order.len());

    let mut indices: Vec<IdxSize> = (0..labels.len() as IdxSize).collect();
    indices.sort_by_key(|&i| rank(&labels[i as usize]));
    let frame = view
        .frame
        .take(&IdxCa::from_vec("index".into(), indices))?;

    Ok(AggregateView::new(frame, view.keys.clone()))
}

/// Percentage change of `value` between consecutive periods.
///
/// The view is first sorted ascending by its keys. The first period, and any
/// period whose predecessor is null or zero, has no defined growth (null).
pub fn period_growth(
    view: &AggregateView,
    value: &str,
    alias: &str,
) -> crate::Result<AggregateView> {
    let options = SortMultipleOptions::default().with_maintain_order(true);
    let sorted = AggregateView::new(view.frame.sort(view.keys.clone(), options)?, view.keys.clone());
    let values = sorted.values(value)?;
    sorted.with_column(alias, growth_rates(&values))
}

/// Growth in percent between consecutive values
pub fn growth_rates(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut rates = Vec::with_capacity(values.len());
    let mut previous: Option<f64> = None;
    for &current in values {
        let rate = match (previous, current) {
            (Some(prev), Some(cur)) if prev != 0.0 => Some((cur - prev) / prev * 100.0),
            _ => None,
        };
        rates.push(rate);
        previous = current;
    }
    rates
}

/// For every row of a pivoted view, the value column holding the largest
/// non-null value. Ties go to the earliest column; rows without values are
/// skipped.
pub fn row_argmax(view: &AggregateView) -> crate::Result<Vec<(String, String)>> {
    let key = view
        .keys
        .first()
        .ok_or_else(|| AnalysisError::Computation("view has no key column".to_string()))?;
    let rows = view.labels(key)?;
    let columns = view.value_columns();
    let values = columns
        .iter()
        .map(|name| view.values(name))
        .collect::<crate::Result<Vec<_>>>()?;

    let mut best = Vec::new();
    for (i, row) in rows.into_iter().enumerate() {
        let mut winner: Option<(usize, f64)> = None;
        for (j, column) in values.iter().enumerate() {
            if let Some(v) = column[i] {
                if winner.map_or(true, |(_, w)| v > w) {
                    winner = Some((j, v));
                }
            }
        }
        if let Some((j, _)) = winner {
            best.push((row, columns[j].clone()));
        }
    }
    Ok(best)
}

/// Count how often each label occurs, in order of first appearance
pub fn value_counts<'a>(labels: impl IntoIterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for label in labels {
        match counts.iter_mut().find(|(l, _)| l == label) {
            Some((_, n)) => *n += 1,
            None => counts.push((label.to_string(), 1)),
        }
    }
    counts
}

/// Numeric labels sort numerically, anything else lexicographically
fn sort_naturally(labels: &mut [String]) {
    let numeric: Option<Vec<f64>> = labels.iter().map(|l| l.parse::<f64>().ok()).collect();
    if numeric.is_some() {
        labels.sort_by(|a, b| {
            let (a, b) = (a.parse::<f64>().unwrap_or(0.0), b.parse::<f64>().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        });
    } else {
        labels.sort();
    }
}
