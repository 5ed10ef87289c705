//! Integration tests for SalesForge

use clap::Parser;
use salesforge::viz::chart_path;
use salesforge::{
    group_reduce, load_table, render_chart, run_reports, Aggregation, AnalysisConfig, Args,
    ErrorKind, ReportKind,
};
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

const HEADER: &str = "Row ID,Order ID,Order Date,Date Key,Contact Name,Country,City,Region,Subregion,Customer,Customer ID,Industry,Segment,Product,License,Sales,Quantity,Discount,Profit";

const PRODUCTS: [&str; 4] = ["ContactMatcher", "FinanceHub", "Site Analytics", "Data Smasher"];
const SEGMENTS: [&str; 3] = ["SMB", "Strategic", "Enterprise"];
const PLACES: [(&str, &str, &str); 3] = [
    ("Ireland", "Dublin", "EMEA"),
    ("United States", "Chicago", "AMER"),
    ("Japan", "Osaka", "APJ"),
];

/// Create a test CSV in the SaaS-Sales export layout: 90 orders of two lines
/// each, from 12 customers, spanning three years
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();

    for row in 0..180usize {
        let order = row / 2;
        let month = order % 36;
        let (year, month, day) = (2020 + month / 12, month % 12 + 1, order % 28 + 1);
        let customer = order % 12;
        let (country, city, region) = PLACES[customer % 3];
        let sales = 120.0 + (row % 9) as f64 * 35.5;
        let discount = (row % 5) as f64 * 0.1;
        let profit = sales * (0.3 - discount);
        writeln!(
            file,
            "{},US-{}-{},{:02}/{:02}/{},{}{:02}{:02},Contact {},{},{},{},{}-sub,Company {},{},{},{},{},KEY{},{:.2},{},{:.1},{:.4}",
            row + 1,
            year,
            order,
            month,
            day,
            year,
            year,
            month,
            day,
            customer,
            country,
            city,
            region,
            region,
            customer,
            1000 + customer,
            if customer % 2 == 0 { "Finance" } else { "Tech" },
            SEGMENTS[customer % 3],
            PRODUCTS[row % 4],
            row,
            sales,
            row % 6 + 1,
            discount,
            profit,
        )
        .unwrap();
    }

    file
}

fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.forecast.trees = 10;
    config.clustering.clusters = 3;
    config
}

#[test]
fn test_end_to_end_pipeline() {
    let test_file = create_test_csv();
    let table = load_table(test_file.path()).unwrap();
    assert_eq!(table.height(), 180);

    let outcomes = run_reports(&ReportKind::ALL, &table, &test_config());
    assert_eq!(outcomes.len(), ReportKind::ALL.len());
    for (kind, outcome) in &outcomes {
        let report = outcome
            .as_ref()
            .unwrap_or_else(|e| panic!("{kind} failed: {e}"));
        assert!(!report.sections.is_empty());
        assert!(report.to_string().starts_with(&format!("=== {} ===", kind.title())));
    }
}

#[test]
fn test_grouped_sales_are_conserved() {
    let test_file = create_test_csv();
    let table = load_table(test_file.path()).unwrap();
    let total: f64 = table.numeric_column("Sales").unwrap().iter().sum();

    for key in ["Region", "Product", "Customer ID", "Segment"] {
        let view = group_reduce(table.frame(), &[key], &[Aggregation::sum("Sales")]).unwrap();
        let grouped: f64 = view.values("Sales").unwrap().into_iter().flatten().sum();
        assert!((grouped - total).abs() < 1e-6, "{key}: {grouped} != {total}");
    }
}

#[test]
fn test_load_errors_are_classified() {
    let mut missing = NamedTempFile::new().unwrap();
    writeln!(missing, "Order ID,Order Date,Sales").unwrap();
    writeln!(missing, "A,01/02/2023,10").unwrap();
    let err = load_table(missing.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);

    let mut bad_discount = NamedTempFile::new().unwrap();
    writeln!(bad_discount, "{HEADER}").unwrap();
    writeln!(
        bad_discount,
        "1,A,01/02/2023,20230102,C,Ireland,Dublin,EMEA,UKIR,Acme,1001,Finance,SMB,FinanceHub,K1,100,2,1.5,10"
    )
    .unwrap();
    let err = load_table(bad_discount.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("Discount"));
}

#[test]
fn test_cli_selection_with_config_file() {
    let test_file = create_test_csv();
    let mut config_file = NamedTempFile::new().unwrap();
    writeln!(config_file, "top_n = 2\ncharts = false\n[basket]\nmax_rules = 3").unwrap();

    let args = Args::try_parse_from([
        "salesforge",
        "-i",
        test_file.path().to_str().unwrap(),
        "-c",
        config_file.path().to_str().unwrap(),
        "-r",
        "geography",
        "-r",
        "market-basket",
    ])
    .unwrap();
    let config = args.resolve_config().unwrap();
    let table = load_table(&args.input).unwrap();

    let outcomes = run_reports(&args.selected_reports(), &table, &config);
    assert_eq!(outcomes.len(), 2);

    let geography = outcomes[0].1.as_ref().unwrap();
    let countries = geography.find_table("Top 2 countries by sales").unwrap();
    assert_eq!(countries.height(), 2);

    let basket = outcomes[1].1.as_ref().unwrap();
    let rules = basket.find_table("Top 3 association rules by lift").unwrap();
    assert_eq!(rules.height(), 3);
}

#[test]
#[ignore = "requires system fonts"]
fn test_render_all_charts() {
    let test_file = create_test_csv();
    let table = load_table(test_file.path()).unwrap();
    let output = tempdir().unwrap();

    for (kind, outcome) in run_reports(&ReportKind::ALL, &table, &test_config()) {
        let report = outcome.unwrap();
        for chart in &report.charts {
            let path = chart_path(output.path(), kind.name(), &chart.spec.file_stem);
            render_chart(chart, &path).unwrap();
            assert!(path.exists(), "{} was not written", path.display());
        }
    }
}
