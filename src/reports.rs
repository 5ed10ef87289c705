//! The analysis reports. Each one is a pure function of the shared table and
//! the configuration that returns console sections and chart descriptions.

use crate::aggregate::{
    group_reduce, period_growth, pivot, reorder_rows, row_argmax, sort_by, top_n, value_counts,
    AggregateView, Aggregation, PivotFill, Reducer, SortKey,
};
use crate::basket::{association_rules, order_baskets};
use crate::config::AnalysisConfig;
use crate::data::{
    Table, COUNTRY, CUSTOMER, CUSTOMER_ID, INDUSTRY, ORDER_ID, PRODUCT, PROFIT, QUANTITY, REGION,
    SALES, SEGMENT,
};
use crate::decompose::seasonal_decompose;
use crate::derive::{
    profit_margin, with_cohorts, with_discount_bins, with_profit_margin, with_time_parts,
    COHORT_INDEX, COHORT_MONTH, DISCOUNT_BIN, MONTH, ORDER_MONTH, PROFIT_MARGIN, YEAR,
};
use crate::error::AnalysisError;
use crate::forecast::forecast_sales;
use crate::model::{customer_features, fit_kmeans, SEGMENT_FEATURES};
use crate::viz::{Chart, ChartData, ChartSpec, DataSeries, ScatterPoint};
use chrono::Datelike;
use clap::ValueEnum;
use polars::prelude::{Column, DataFrame, NamedFrom, Series};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

const ORDER_COUNT: &str = "Order Count";
const GROWTH: &str = "Growth %";
const PURCHASE_FREQUENCY: &str = "Purchase Frequency";
const AVG_ORDER_VALUE: &str = "Avg Order Value";
const TOTAL_SPEND: &str = "Total Spend";
const CUSTOMERS: &str = "Customers";
const PRODUCTS: &str = "Products";

/// Points used for the sampled silhouette score
const SILHOUETTE_SAMPLE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    SalesPerformance,
    CustomerSegments,
    Geography,
    Products,
    Seasonality,
    Discounts,
    CustomerBehavior,
    Profitability,
    Decomposition,
    Clustering,
    Forecast,
    Cohorts,
    MarketBasket,
}

impl ReportKind {
    /// Every report, in the order they run by default
    pub const ALL: [ReportKind; 13] = [
        ReportKind::SalesPerformance,
        ReportKind::CustomerSegments,
        ReportKind::Geography,
        ReportKind::Products,
        ReportKind::Seasonality,
        ReportKind::Discounts,
        ReportKind::CustomerBehavior,
        ReportKind::Profitability,
        ReportKind::Decomposition,
        ReportKind::Clustering,
        ReportKind::Forecast,
        ReportKind::Cohorts,
        ReportKind::MarketBasket,
    ];

    /// Name used on the command line, in config files and in chart file names
    pub fn name(self) -> &'static str {
        match self {
            ReportKind::SalesPerformance => "sales-performance",
            ReportKind::CustomerSegments => "customer-segments",
            ReportKind::Geography => "geography",
            ReportKind::Products => "products",
            ReportKind::Seasonality => "seasonality",
            ReportKind::Discounts => "discounts",
            ReportKind::CustomerBehavior => "customer-behavior",
            ReportKind::Profitability => "profitability",
            ReportKind::Decomposition => "decomposition",
            ReportKind::Clustering => "clustering",
            ReportKind::Forecast => "forecast",
            ReportKind::Cohorts => "cohorts",
            ReportKind::MarketBasket => "market-basket",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ReportKind::SalesPerformance => "Sales Performance Analysis",
            ReportKind::CustomerSegments => "Customer Segmentation Analysis",
            ReportKind::Geography => "Geographical Analysis",
            ReportKind::Products => "Product Analysis",
            ReportKind::Seasonality => "Time-based Analysis",
            ReportKind::Discounts => "Discount Analysis",
            ReportKind::CustomerBehavior => "Customer Behavior Analysis",
            ReportKind::Profitability => "Profitability Analysis",
            ReportKind::Decomposition => "Time Series Decomposition",
            ReportKind::Clustering => "Customer Clustering",
            ReportKind::Forecast => "Sales Forecast",
            ReportKind::Cohorts => "Customer Cohort Analysis",
            ReportKind::MarketBasket => "Market Basket Analysis",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A titled block of console output
#[derive(Debug, Clone)]
pub enum Section {
    Table { title: String, frame: DataFrame },
    Text { title: String, lines: Vec<String> },
}

/// Console sections and charts produced by one report
#[derive(Debug, Clone)]
pub struct Report {
    pub kind: ReportKind,
    pub sections: Vec<Section>,
    pub charts: Vec<Chart>,
}

impl Report {
    pub fn new(kind: ReportKind) -> Self {
        Self {
            kind,
            sections: Vec::new(),
            charts: Vec::new(),
        }
    }

    fn table(&mut self, title: impl Into<String>, frame: DataFrame) {
        self.sections.push(Section::Table {
            title: title.into(),
            frame,
        });
    }

    fn text(&mut self, title: impl Into<String>, lines: Vec<String>) {
        self.sections.push(Section::Text {
            title: title.into(),
            lines,
        });
    }

    fn chart(&mut self, chart: Chart) {
        self.charts.push(chart);
    }

    /// The table section with the given title
    pub fn find_table(&self, title: &str) -> Option<&DataFrame> {
        self.sections.iter().find_map(|section| match section {
            Section::Table { title: t, frame } if t == title => Some(frame),
            _ => None,
        })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.kind.title())?;
        for section in &self.sections {
            match section {
                Section::Table { title, frame } => writeln!(f, "\n{title}:\n{frame}")?,
                Section::Text { title, lines } => {
                    writeln!(f, "\n{title}:")?;
                    for line in lines {
                        writeln!(f, "  {line}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Run a single report
pub fn run(kind: ReportKind, table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    if table.is_empty() {
        return Err(AnalysisError::InsufficientData {
            what: kind.name().to_string(),
            needed: 1,
            found: 0,
        });
    }

    match kind {
        ReportKind::SalesPerformance => sales_performance(table, config),
        ReportKind::CustomerSegments => customer_segments(table, config),
        ReportKind::Geography => geography(table, config),
        ReportKind::Products => products(table, config),
        ReportKind::Seasonality => seasonality(table),
        ReportKind::Discounts => discounts(table, config),
        ReportKind::CustomerBehavior => customer_behavior(table, config),
        ReportKind::Profitability => profitability(table, config),
        ReportKind::Decomposition => decomposition(table, config),
        ReportKind::Clustering => clustering(table, config),
        ReportKind::Forecast => forecast(table, config),
        ReportKind::Cohorts => cohorts(table),
        ReportKind::MarketBasket => market_basket(table, config),
    }
}

/// Run `kinds` in order. A failing report is logged and does not stop the
/// others; every outcome is returned alongside its kind.
pub fn run_reports(
    kinds: &[ReportKind],
    table: &Table,
    config: &AnalysisConfig,
) -> Vec<(ReportKind, crate::Result<Report>)> {
    kinds
        .iter()
        .map(|&kind| {
            let start = Instant::now();
            log::info!("Running report: {kind}");
            let outcome = run(kind, table, config);
            match &outcome {
                Ok(report) => log::debug!(
                    "report {kind} finished in {:.2}s ({} sections, {} charts)",
                    start.elapsed().as_secs_f64(),
                    report.sections.len(),
                    report.charts.len()
                ),
                Err(e) => log::error!("report {kind} failed ({:?}): {e}", e.kind()),
            }
            (kind, outcome)
        })
        .collect()
}

fn sales_performance(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::SalesPerformance);
    let binning = config.binning()?;
    let frame = with_time_parts(table.local_frame(), table.order_dates())?;
    let frame = with_discount_bins(frame, &binning)?;

    let monthly = group_reduce(
        &frame,
        &[ORDER_MONTH],
        &[Aggregation::sum(SALES), Aggregation::sum(PROFIT)],
    )?;
    let monthly = sort_by(&monthly, ORDER_MONTH, false, None)?;
    report.chart(line_chart(
        ChartSpec::new("Total Sales and Profit Over Time", "monthly_sales_profit").axes("Month", "Amount"),
        &monthly,
        ORDER_MONTH,
        &[SALES, PROFIT],
    )?);
    report.table("Monthly sales and profit", monthly.into_frame());

    let products = group_reduce(
        &frame,
        &[PRODUCT],
        &[Aggregation::sum(SALES), Aggregation::sum(PROFIT)],
    )?;
    let top = top_n(&products, SALES, config.top_n, None)?;
    report.chart(bar_chart(
        ChartSpec::new(
            format!("Top {} Products by Sales and Profit", config.top_n),
            "top_products",
        )
        .axes("Product", "Amount"),
        &top,
        PRODUCT,
        &[SALES, PROFIT],
    )?);
    report.table(format!("Top {} products by sales", config.top_n), top.into_frame());

    let by_band = group_reduce(
        &frame,
        &[DISCOUNT_BIN],
        &[Aggregation::mean(SALES), Aggregation::mean(PROFIT)],
    )?;
    let by_band = reorder_rows(&by_band, DISCOUNT_BIN, binning.labels())?;
    report.chart(bar_chart(
        ChartSpec::new("Effect of Discount on Average Sales and Profit", "discount_effect")
            .axes("Discount Range", "Average Amount"),
        &by_band,
        DISCOUNT_BIN,
        &[SALES, PROFIT],
    )?);
    report.table("Average sales and profit by discount band", by_band.into_frame());

    Ok(report)
}

fn customer_segments(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::CustomerSegments);
    let performance = [
        Aggregation::sum(SALES),
        Aggregation::sum(PROFIT),
        Aggregation::count(ORDER_ID, ORDER_COUNT),
    ];

    let segments = group_reduce(table.frame(), &[SEGMENT], &performance)?;
    report.table("Performance by segment", segments.into_frame());

    let industries = group_reduce(table.frame(), &[INDUSTRY], &performance)?;
    let top = top_n(&industries, SALES, config.top_n, None)?;
    report.chart(bar_chart(
        ChartSpec::new(format!("Top {} Industries by Sales", config.top_n), "top_industries")
            .axes("Industry", "Total Sales"),
        &top,
        INDUSTRY,
        &[SALES],
    )?);
    report.table(format!("Top {} industries by sales", config.top_n), top.into_frame());

    Ok(report)
}

fn geography(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Geography);

    let countries = group_reduce(table.frame(), &[COUNTRY], &[Aggregation::sum(SALES)])?;
    let top = top_n(&countries, SALES, config.top_n, None)?;
    report.chart(bar_chart(
        ChartSpec::new(format!("Top {} Countries by Sales", config.top_n), "top_countries")
            .axes("Country", "Total Sales"),
        &top,
        COUNTRY,
        &[SALES],
    )?);
    report.table(format!("Top {} countries by sales", config.top_n), top.into_frame());

    let regions = group_reduce(
        table.frame(),
        &[REGION],
        &[
            Aggregation::sum(SALES),
            Aggregation::sum(PROFIT),
            Aggregation::count(ORDER_ID, ORDER_COUNT),
        ],
    )?;
    let regions = sort_by(&regions, SALES, true, None)?;
    report.table("Region performance", regions.into_frame());

    Ok(report)
}

fn products(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Products);

    let metrics = group_reduce(
        table.frame(),
        &[PRODUCT],
        &[
            Aggregation::sum(SALES),
            Aggregation::sum(PROFIT),
            Aggregation::sum(QUANTITY),
        ],
    )?;
    let top = top_n(&metrics, SALES, config.top_n, None)?;
    let margins = top
        .values(PROFIT)?
        .into_iter()
        .zip(top.values(SALES)?)
        .map(|(profit, sales)| profit_margin(profit?, sales?))
        .collect();
    let top = top.with_column(PROFIT_MARGIN, margins)?;
    report.table(format!("Top {} products by sales", config.top_n), top.into_frame());

    let by_segment = group_reduce(
        table.frame(),
        &[PRODUCT, SEGMENT],
        &[Aggregation::sum(SALES)],
    )?;
    let matrix = pivot(&by_segment, PRODUCT, SEGMENT, SALES, PivotFill::Zero)?;
    let top_matrix = top_n(&matrix, &config.segment_sort, config.top_n, None)?;
    let segments = top_matrix.value_columns();
    let segment_refs: Vec<&str> = segments.iter().map(String::as_str).collect();
    report.chart(bar_chart(
        ChartSpec::new(
            format!("Top {} Products Performance Across Segments", config.top_n),
            "product_segments",
        )
        .axes("Product", "Total Sales"),
        &top_matrix,
        PRODUCT,
        &segment_refs,
    )?);
    report.table(
        format!("Sales by segment, top {} products by {}", config.top_n, config.segment_sort),
        top_matrix.into_frame(),
    );

    Ok(report)
}

fn seasonality(table: &Table) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Seasonality);
    let frame = with_time_parts(table.local_frame(), table.order_dates())?;

    let monthly = group_reduce(&frame, &[MONTH], &[Aggregation::mean(SALES)])?;
    let monthly = sort_by(&monthly, MONTH, false, None)?;
    report.chart(line_chart(
        ChartSpec::new("Average Monthly Sales (Seasonal Trend)", "monthly_average")
            .axes("Month", "Average Sales"),
        &monthly,
        MONTH,
        &[SALES],
    )?);
    report.table("Average sales per calendar month", monthly.into_frame());

    let yearly = group_reduce(&frame, &[YEAR], &[Aggregation::sum(SALES)])?;
    let growth = period_growth(&yearly, SALES, GROWTH)?;
    report.table("Year-over-year sales growth", growth.into_frame());

    Ok(report)
}

fn discounts(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Discounts);
    let binning = config.binning()?;
    let frame = with_discount_bins(table.local_frame(), &binning)?;

    let impact = group_reduce(
        &frame,
        &[DISCOUNT_BIN],
        &[
            Aggregation::mean(SALES),
            Aggregation::mean(PROFIT),
            Aggregation::mean(QUANTITY),
        ],
    )?;
    let impact = reorder_rows(&impact, DISCOUNT_BIN, binning.labels())?;
    report.table("Impact of discounts on sales, profit and quantity", impact.into_frame());

    let by_band = group_reduce(&frame, &[PRODUCT, DISCOUNT_BIN], &[Aggregation::mean(PROFIT)])?;
    let matrix = pivot(&by_band, PRODUCT, DISCOUNT_BIN, PROFIT, PivotFill::Absent)?;
    let matrix = order_columns(&matrix, binning.labels())?;

    let best = row_argmax(&matrix)?;
    let mut counts = value_counts(best.iter().map(|(_, band)| band.as_str()));
    counts.sort_by_key(|(band, _)| {
        binning
            .labels()
            .iter()
            .position(|label| label == band)
            .unwrap_or(usize::MAX)
    });
    let (bands, totals): (Vec<String>, Vec<u64>) = counts
        .into_iter()
        .map(|(band, count)| (band, count as u64))
        .unzip();

    report.chart(Chart::new(
        ChartSpec::new("Optimal Discount Ranges for Products", "optimal_discount")
            .axes("Discount Range", "Number of Products"),
        ChartData::Bar {
            categories: bands.clone(),
            series: vec![DataSeries::new(
                PRODUCTS,
                totals.iter().map(|&n| Some(n as f64)).collect(),
            )],
        },
    ));
    report.table("Mean profit by product and discount band", matrix.into_frame());
    report.table(
        "Products per most profitable discount band",
        DataFrame::new(vec![
            Series::new(DISCOUNT_BIN.into(), bands).into(),
            Series::new(PRODUCTS.into(), totals).into(),
        ])?,
    );

    Ok(report)
}

fn customer_behavior(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::CustomerBehavior);

    let customers = group_reduce(
        table.frame(),
        &[CUSTOMER],
        &[
            Aggregation::count(ORDER_ID, PURCHASE_FREQUENCY),
            Aggregation::new(SALES, Reducer::Mean, AVG_ORDER_VALUE),
            Aggregation::new(SALES, Reducer::Sum, TOTAL_SPEND),
        ],
    )?;

    let points = customers
        .values(PURCHASE_FREQUENCY)?
        .into_iter()
        .zip(customers.values(AVG_ORDER_VALUE)?)
        .filter_map(|(x, y)| {
            Some(ScatterPoint {
                x: x?,
                y: y?,
                group: 0,
                label: None,
            })
        })
        .collect();
    report.chart(Chart::new(
        ChartSpec::new("Customer Purchase Frequency vs Average Order Value", "frequency_vs_value")
            .axes(PURCHASE_FREQUENCY, AVG_ORDER_VALUE),
        ChartData::Scatter {
            groups: Vec::new(),
            points,
        },
    ));

    let ranked = sort_by(&customers, TOTAL_SPEND, true, None)?;
    report.table(
        format!("Top {} customers by total spend", config.top_n),
        ranked.head(config.top_n).into_frame(),
    );

    Ok(report)
}

fn profitability(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Profitability);
    let frame = with_profit_margin(table.local_frame())?;
    let measures = [
        Aggregation::mean(PROFIT_MARGIN),
        Aggregation::sum(SALES),
        Aggregation::sum(PROFIT),
    ];

    let products = group_reduce(&frame, &[PRODUCT], &measures)?;
    let top = top_n(&products, PROFIT, config.top_n, None)?;
    report.table(
        format!("Top {} most profitable products", config.top_n),
        top.into_frame(),
    );

    let regions = group_reduce(&frame, &[REGION], &measures)?;
    let regions = sort_by(&regions, PROFIT, true, None)?;
    let points = regions
        .labels(REGION)?
        .into_iter()
        .zip(regions.values(SALES)?)
        .zip(regions.values(PROFIT)?)
        .filter_map(|((region, x), y)| {
            Some(ScatterPoint {
                x: x?,
                y: y?,
                group: 0,
                label: Some(region),
            })
        })
        .collect();
    report.chart(Chart::new(
        ChartSpec::new("Regional Profitability", "regional_profitability")
            .axes("Total Sales", "Total Profit"),
        ChartData::Scatter {
            groups: Vec::new(),
            points,
        },
    ));
    report.table("Profitability by region", regions.into_frame());

    Ok(report)
}

fn decomposition(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Decomposition);
    let (months, totals) = monthly_totals(table)?;
    let result = seasonal_decompose(&totals, config.decomposition.period)?;

    let observed: Vec<Option<f64>> = result.observed.iter().copied().map(Some).collect();
    let seasonal: Vec<Option<f64>> = result.seasonal.iter().copied().map(Some).collect();
    let defined_trend: Vec<f64> = result.trend.iter().flatten().copied().collect();
    let pattern = &result.seasonal[..result.period];
    let amplitude = pattern.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        - pattern.iter().copied().fold(f64::INFINITY, f64::min);

    let mut summary = vec![
        format!("Months: {} ({} to {})", months.len(), months[0], months[months.len() - 1]),
        format!("Period: {}", result.period),
        format!("Seasonal amplitude: {amplitude:.2}"),
    ];
    if let (Some(first), Some(last)) = (defined_trend.first(), defined_trend.last()) {
        summary.push(format!("Trend: {first:.2} -> {last:.2}"));
    }
    report.text("Monthly sales decomposition", summary);

    report.table(
        "Components",
        DataFrame::new(vec![
            Series::new(ORDER_MONTH.into(), months.clone()).into(),
            Series::new("Observed".into(), observed.clone()).into(),
            Series::new("Trend".into(), result.trend.clone()).into(),
            Series::new("Seasonal".into(), seasonal.clone()).into(),
            Series::new("Residual".into(), result.residual.clone()).into(),
        ])?,
    );
    report.chart(Chart::new(
        ChartSpec::new("Monthly Sales Decomposition", "components").axes("Month", "Sales"),
        ChartData::Panels {
            categories: months,
            panels: vec![
                DataSeries::new("Observed", observed),
                DataSeries::new("Trend", result.trend),
                DataSeries::new("Seasonal", seasonal),
                DataSeries::new("Residual", result.residual),
            ],
        },
    ));

    Ok(report)
}

/// Total sales per calendar month from the first to the last order month;
/// months without orders count as zero
fn monthly_totals(table: &Table) -> crate::Result<(Vec<String>, Vec<f64>)> {
    let sales = table.numeric_column(SALES)?;
    let mut totals: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for (date, value) in table.order_dates().iter().zip(sales) {
        *totals.entry((date.year(), date.month())).or_default() += value;
    }

    let (Some(&first), Some(&last)) = (totals.keys().next(), totals.keys().next_back()) else {
        return Ok((Vec::new(), Vec::new()));
    };
    let mut months = Vec::new();
    let mut values = Vec::new();
    let (mut year, mut month) = first;
    loop {
        months.push(format!("{year:04}-{month:02}"));
        values.push(totals.get(&(year, month)).copied().unwrap_or(0.0));
        if (year, month) == last {
            break;
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    Ok((months, values))
}

fn clustering(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Clustering);
    let settings = &config.clustering;
    let customers = customer_features(table)?;
    let model = fit_kmeans(
        &customers.features,
        settings.clusters,
        settings.max_iters,
        settings.tolerance,
        settings.seed,
    )?;

    let silhouette = model.silhouette_score(&customers.features, SILHOUETTE_SAMPLE);
    report.text(
        "K-means customer segmentation",
        vec![
            format!("Customers: {}", customers.customer_ids.len()),
            format!("Clusters: {}", model.n_clusters),
            format!("Within-cluster sum of squares (inertia): {:.2}", model.inertia),
            format!("Silhouette score (sample): {silhouette:.3}"),
        ],
    );

    let sizes = model.cluster_sizes();
    let means = model.cluster_means(&customers.raw_features);
    let mut columns: Vec<Column> = vec![
        Series::new("Cluster".into(), (0..model.n_clusters as u32).collect::<Vec<u32>>()).into(),
        Series::new(
            CUSTOMERS.into(),
            sizes.iter().map(|&s| s as u64).collect::<Vec<u64>>(),
        )
        .into(),
    ];
    for (j, name) in SEGMENT_FEATURES.iter().enumerate() {
        columns.push(Series::new((*name).into(), means.column(j).to_vec()).into());
    }
    report.table("Cluster feature means", DataFrame::new(columns)?);

    let sales = SEGMENT_FEATURES.iter().position(|f| *f == SALES).unwrap_or(0);
    let profit = SEGMENT_FEATURES.iter().position(|f| *f == PROFIT).unwrap_or(0);
    let points = customers
        .raw_features
        .outer_iter()
        .zip(model.labels.iter())
        .map(|(row, &cluster)| ScatterPoint {
            x: row[sales],
            y: row[profit],
            group: cluster,
            label: None,
        })
        .collect();
    report.chart(Chart::new(
        ChartSpec::new("Customer Segments", "segments").axes("Total Sales", "Total Profit"),
        ChartData::Scatter {
            groups: (0..model.n_clusters).map(|i| format!("Cluster {i}")).collect(),
            points,
        },
    ));

    Ok(report)
}

fn forecast(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Forecast);
    let result = forecast_sales(table, &config.forecast)?;

    let r2 = result
        .r2
        .map(|r2| format!("{r2:.4}"))
        .unwrap_or_else(|| "undefined".to_string());
    report.text(
        "Random forest sales forecast",
        vec![
            format!("Trees: {}", config.forecast.trees),
            format!("Training rows: {}", result.train_rows),
            format!("Test rows: {}", result.test_rows),
            format!("Mean Squared Error: {:.2}", result.mse),
            format!("R-squared Score: {r2}"),
        ],
    );

    let (features, importance): (Vec<String>, Vec<f64>) = result.importance.into_iter().unzip();
    report.chart(Chart::new(
        ChartSpec::new("Feature Importance for Sales Prediction", "feature_importance")
            .axes("Feature", "Increase in MSE"),
        ChartData::Bar {
            categories: features.clone(),
            series: vec![DataSeries::new(
                "Importance",
                importance.iter().copied().map(Some).collect(),
            )],
        },
    ));
    report.table(
        "Permutation feature importance",
        DataFrame::new(vec![
            Series::new("Feature".into(), features).into(),
            Series::new("Importance".into(), importance).into(),
        ])?,
    );

    Ok(report)
}

fn cohorts(table: &Table) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::Cohorts);
    let frame = with_time_parts(table.local_frame(), table.order_dates())?;
    let frame = with_cohorts(frame, CUSTOMER_ID, table.order_dates())?;

    // rows are the month the orders were placed in
    let matrix = cohort_matrix(&frame, ORDER_MONTH)?;
    let rows = matrix.labels(ORDER_MONTH)?;
    let columns = matrix.value_columns();
    let column_values = columns
        .iter()
        .map(|name| matrix.values(name))
        .collect::<crate::Result<Vec<_>>>()?;
    let values = (0..rows.len())
        .map(|i| column_values.iter().map(|column| column[i]).collect())
        .collect();
    report.chart(Chart::new(
        ChartSpec::new("Customer Cohort Analysis", "heatmap").axes(COHORT_INDEX, ORDER_MONTH),
        ChartData::Heatmap {
            rows,
            columns,
            values,
        },
    ));
    report.table("Active customers by order month and cohort index", matrix.into_frame());

    let retention = cohort_matrix(&frame, COHORT_MONTH)?;
    report.table(
        "Retention by first-order month and cohort index",
        retention.into_frame(),
    );

    Ok(report)
}

/// Distinct customers per `row_key` x cohort index, zero-filled
fn cohort_matrix(frame: &DataFrame, row_key: &str) -> crate::Result<AggregateView> {
    let counts = group_reduce(
        frame,
        &[row_key, COHORT_INDEX],
        &[Aggregation::distinct_count(CUSTOMER_ID, CUSTOMERS)],
    )?;
    let counts = sort_by(
        &counts,
        row_key,
        false,
        Some(&SortKey::ascending(COHORT_INDEX)),
    )?;
    pivot(&counts, row_key, COHORT_INDEX, CUSTOMERS, PivotFill::Zero)
}

fn market_basket(table: &Table, config: &AnalysisConfig) -> crate::Result<Report> {
    let mut report = Report::new(ReportKind::MarketBasket);
    let baskets = order_baskets(table)?;
    let rules = association_rules(&baskets, &config.basket);
    log::debug!("{} baskets, {} rules kept", baskets.len(), rules.len());

    if rules.is_empty() {
        report.text(
            "Association rules",
            vec![format!(
                "No rules with support >= {} and lift >= {} in {} orders",
                config.basket.min_support,
                config.basket.min_lift,
                baskets.len()
            )],
        );
        return Ok(report);
    }

    let column = |name: &str, f: fn(&crate::basket::AssociationRule) -> f64| -> Column {
        Series::new(name.into(), rules.iter().map(f).collect::<Vec<f64>>()).into()
    };
    let frame = DataFrame::new(vec![
        Series::new(
            "Antecedent".into(),
            rules.iter().map(|r| r.antecedent.as_str()).collect::<Vec<&str>>(),
        )
        .into(),
        Series::new(
            "Consequent".into(),
            rules.iter().map(|r| r.consequent.as_str()).collect::<Vec<&str>>(),
        )
        .into(),
        column("Support", |r| r.support),
        column("Confidence", |r| r.confidence),
        column("Lift", |r| r.lift),
    ])?;
    report.table(
        format!("Top {} association rules by lift", rules.len()),
        frame,
    );

    Ok(report)
}

/// Put the value columns of a pivot in `order`; unlisted columns follow
fn order_columns(view: &AggregateView, order: &[String]) -> crate::Result<AggregateView> {
    let present = view.value_columns();
    let mut names: Vec<String> = view.keys().to_vec();
    names.extend(order.iter().filter(|name| present.contains(name)).cloned());
    names.extend(present.iter().filter(|name| !order.contains(name)).cloned());

    let frame = view.frame().select(names)?;
    Ok(AggregateView::new(frame, view.keys().to_vec()))
}

fn view_series(
    view: &AggregateView,
    key: &str,
    columns: &[&str],
) -> crate::Result<(Vec<String>, Vec<DataSeries>)> {
    let categories = view.labels(key)?;
    let series = columns
        .iter()
        .map(|name| Ok(DataSeries::new(*name, view.values(name)?)))
        .collect::<crate::Result<Vec<_>>>()?;
    Ok((categories, series))
}

fn line_chart(
    spec: ChartSpec,
    view: &AggregateView,
    key: &str,
    columns: &[&str],
) -> crate::Result<Chart> {
    let (categories, series) = view_series(view, key, columns)?;
    Ok(Chart::new(spec, ChartData::Line { categories, series }))
}

fn bar_chart(
    spec: ChartSpec,
    view: &AggregateView,
    key: &str,
    columns: &[&str],
) -> crate::Result<Chart> {
    let (categories, series) = view_series(view, key, columns)?;
    Ok(Chart::new(spec, ChartData::Bar { categories, series }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::record;
    use crate::ErrorKind;

    const PRODUCT_NAMES: [&str; 4] = ["Alchemy", "Storage", "Support", "Marketing Suite"];
    const SEGMENTS: [&str; 3] = ["SMB", "Strategic", "Enterprise"];
    const PLACES: [(&str, &str); 3] = [
        ("EMEA", "Ireland"),
        ("AMER", "United States"),
        ("APJ", "Japan"),
    ];

    /// 60 two-line orders from 10 customers spread over three years
    fn sample_table() -> Table {
        let records: Vec<_> = (0..120usize)
            .map(|i| {
                let order = i / 2;
                let month = order % 36;
                let mut r = record(
                    &format!("ORD-{order}"),
                    (2021 + (month / 12) as i32, (month % 12) as u32 + 1, (order % 28) as u32 + 1),
                    &format!("{}", 1000 + order % 10),
                    PRODUCT_NAMES[i % 4],
                    100.0 + (i % 7) as f64 * 25.0,
                    ((i % 5) as f64 - 1.0) * 10.0,
                );
                r.segment = SEGMENTS[i % 3].to_string();
                r.region = PLACES[i % 3].0.to_string();
                r.country = PLACES[i % 3].1.to_string();
                r.industry = if i % 2 == 0 { "Finance" } else { "Retail" }.to_string();
                r.quantity = (i % 4) as i64 + 1;
                r.discount = (i % 6) as f64 * 0.1;
                r
            })
            .collect();
        Table::from_records(&records).unwrap()
    }

    fn config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.forecast.trees = 10;
        config
    }

    #[test]
    fn test_every_report_runs() {
        let table = sample_table();
        let config = config();
        for kind in ReportKind::ALL {
            let report = run(kind, &table, &config).unwrap_or_else(|e| panic!("{kind}: {e}"));
            assert_eq!(report.kind, kind);
            assert!(!report.sections.is_empty(), "{kind} has no output");
            assert!(report.to_string().contains(kind.title()));
        }
    }

    #[test]
    fn test_report_names() {
        for kind in ReportKind::ALL {
            assert_eq!(ReportKind::from_str(kind.name(), false), Ok(kind));
        }
        assert_eq!(ReportKind::MarketBasket.to_string(), "market-basket");
    }

    #[test]
    fn test_sales_performance_orders_months_and_bands() {
        let report = run(ReportKind::SalesPerformance, &sample_table(), &config()).unwrap();
        assert_eq!(report.charts.len(), 3);

        match &report.charts[0].data {
            ChartData::Line { categories, series } => {
                assert_eq!(categories.len(), 36);
                assert_eq!(categories[0], "2021-01");
                assert_eq!(categories[35], "2023-12");
                assert_eq!(series.len(), 2);
            }
            other => panic!("unexpected chart {other:?}"),
        }

        let bands = report
            .find_table("Average sales and profit by discount band")
            .unwrap();
        let labels: Vec<_> = bands
            .column(DISCOUNT_BIN)
            .unwrap()
            .as_materialized_series()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        // discounts 0.0 to 0.5 in steps of 0.1
        assert_eq!(labels, ["0-10%", "10-20%", "20-30%", "30-40%", "40%+"]);
    }

    #[test]
    fn test_products_segment_ranking() {
        let table = sample_table();
        let report = run(ReportKind::Products, &table, &config()).unwrap();
        let matrix = report
            .find_table("Sales by segment, top 10 products by SMB")
            .unwrap();
        assert_eq!(matrix.height(), 4);
        assert_eq!(matrix.width(), 4);

        let mut bad = config();
        bad.segment_sort = "Consumer".to_string();
        let err = run(ReportKind::Products, &table, &bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Computation);
    }

    #[test]
    fn test_discount_best_band_counts_every_product() {
        let report = run(ReportKind::Discounts, &sample_table(), &config()).unwrap();
        let counts = report
            .find_table("Products per most profitable discount band")
            .unwrap();
        let total: u64 = counts
            .column(PRODUCTS)
            .unwrap()
            .as_materialized_series()
            .u64()
            .unwrap()
            .into_iter()
            .flatten()
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_cohorts_start_with_every_customer() {
        let report = run(ReportKind::Cohorts, &sample_table(), &config()).unwrap();
        for title in [
            "Active customers by order month and cohort index",
            "Retention by first-order month and cohort index",
        ] {
            let matrix = report.find_table(title).unwrap();
            let first_month: Vec<Option<f64>> = crate::data::float_values(matrix, "0").unwrap();
            let total: f64 = first_month.into_iter().flatten().sum();
            assert_eq!(total, 10.0, "{title}");
        }
    }

    #[test]
    fn test_cohort_rows_are_order_months() {
        // customer 1 orders in January and March, customer 2 only in March
        let records = vec![
            record("A", (2022, 1, 10), "1", "Alchemy", 10.0, 1.0),
            record("B", (2022, 3, 2), "1", "Alchemy", 10.0, 1.0),
            record("C", (2022, 3, 9), "2", "Storage", 10.0, 1.0),
        ];
        let table = Table::from_records(&records).unwrap();
        let report = run(ReportKind::Cohorts, &table, &config()).unwrap();

        let by_order = report
            .find_table("Active customers by order month and cohort index")
            .unwrap();
        let months = crate::data::text_values(by_order, ORDER_MONTH).unwrap();
        assert_eq!(months, vec![Some("2022-01".to_string()), Some("2022-03".to_string())]);
        let month_zero = crate::data::float_values(by_order, "0").unwrap();
        let month_two = crate::data::float_values(by_order, "2").unwrap();
        assert_eq!(month_zero, vec![Some(1.0), Some(1.0)]);
        assert_eq!(month_two, vec![Some(0.0), Some(1.0)]);

        let retention = report
            .find_table("Retention by first-order month and cohort index")
            .unwrap();
        let cohorts = crate::data::text_values(retention, COHORT_MONTH).unwrap();
        assert_eq!(cohorts, vec![Some("2022-01".to_string()), Some("2022-03".to_string())]);
        let month_two = crate::data::float_values(retention, "2").unwrap();
        assert_eq!(month_two, vec![Some(1.0), Some(0.0)]);
    }

    #[test]
    fn test_market_basket_finds_paired_products() {
        let report = run(ReportKind::MarketBasket, &sample_table(), &config()).unwrap();
        let rules = report
            .find_table("Top 4 association rules by lift")
            .unwrap();
        let lifts: Vec<f64> = crate::data::float_values(rules, "Lift")
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert!(lifts.iter().all(|&lift| (lift - 2.0).abs() < 1e-9));
    }

    #[test]
    fn test_monthly_totals_fill_gaps() {
        let records = vec![
            record("A", (2022, 11, 5), "1", "Alchemy", 10.0, 1.0),
            record("B", (2023, 2, 1), "1", "Alchemy", 5.0, 1.0),
            record("C", (2022, 11, 20), "2", "Alchemy", 2.5, 1.0),
        ];
        let table = Table::from_records(&records).unwrap();
        let (months, totals) = monthly_totals(&table).unwrap();
        assert_eq!(months, ["2022-11", "2022-12", "2023-01", "2023-02"]);
        assert_eq!(totals, [12.5, 0.0, 0.0, 5.0]);
    }

    #[test]
    fn test_failures_are_isolated() {
        let table = sample_table();
        let mut bad = config();
        bad.segment_sort = "Consumer".to_string();

        let outcomes = run_reports(
            &[ReportKind::Geography, ReportKind::Products, ReportKind::Cohorts],
            &table,
            &bad,
        );
        let ok: Vec<bool> = outcomes.iter().map(|(_, o)| o.is_ok()).collect();
        assert_eq!(ok, [true, false, true]);
    }

    #[test]
    fn test_decomposition_needs_two_years() {
        let records = vec![
            record("A", (2023, 1, 5), "1", "Alchemy", 10.0, 1.0),
            record("B", (2023, 6, 1), "1", "Alchemy", 5.0, 1.0),
        ];
        let table = Table::from_records(&records).unwrap();
        let err = run(ReportKind::Decomposition, &table, &config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataRange);
    }

    #[test]
    fn test_empty_table_is_rejected() {
        let table = Table::from_records(&[]).unwrap();
        let err = run(ReportKind::Geography, &table, &config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataRange);
    }
}
