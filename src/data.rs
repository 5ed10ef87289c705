//! Data loading and the typed transaction table, backed by Polars

use crate::error::AnalysisError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::path::Path;

pub const ORDER_ID: &str = "Order ID";
pub const ORDER_DATE: &str = "Order Date";
pub const CUSTOMER_ID: &str = "Customer ID";
pub const CUSTOMER: &str = "Customer";
pub const PRODUCT: &str = "Product";
pub const SEGMENT: &str = "Segment";
pub const INDUSTRY: &str = "Industry";
pub const COUNTRY: &str = "Country";
pub const REGION: &str = "Region";
pub const QUANTITY: &str = "Quantity";
pub const DISCOUNT: &str = "Discount";
pub const SALES: &str = "Sales";
pub const PROFIT: &str = "Profit";

/// Columns every input file must provide. Any other column is ignored.
pub const REQUIRED_COLUMNS: [&str; 13] = [
    ORDER_ID,
    ORDER_DATE,
    CUSTOMER_ID,
    CUSTOMER,
    PRODUCT,
    SEGMENT,
    INDUSTRY,
    COUNTRY,
    REGION,
    QUANTITY,
    DISCOUNT,
    SALES,
    PROFIT,
];

const DATE_FORMATS: [&str; 4] = ["%m/%d/%Y", "%Y-%m-%d", "%d-%m-%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

/// One sales transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub order_id: String,
    pub order_date: NaiveDate,
    pub customer_id: String,
    pub customer: String,
    pub product: String,
    pub segment: String,
    pub industry: String,
    pub country: String,
    pub region: String,
    pub quantity: i64,
    pub discount: f64,
    pub sales: f64,
    pub profit: f64,
}

impl Record {
    /// Check the numeric invariants of a transaction. `row` is only used for error reporting.
    pub fn validate(&self, row: usize) -> crate::Result<()> {
        let out_of_range = |column: &str, value: String| AnalysisError::ValueOutOfRange {
            row,
            column: column.to_string(),
            value,
        };

        if self.quantity < 0 {
            return Err(out_of_range(QUANTITY, self.quantity.to_string()));
        }
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(out_of_range(DISCOUNT, self.discount.to_string()));
        }
        if !self.sales.is_finite() || self.sales < 0.0 {
            return Err(out_of_range(SALES, self.sales.to_string()));
        }
        if !self.profit.is_finite() {
            return Err(out_of_range(PROFIT, self.profit.to_string()));
        }
        Ok(())
    }
}

/// Immutable table of transactions.
///
/// Reports never mutate it: derived columns are appended to a clone obtained
/// through [`Table::local_frame`].
#[derive(Debug, Clone)]
pub struct Table {
    frame: DataFrame,
    order_dates: Vec<NaiveDate>,
}

impl Table {
    /// Build a table from in-memory records, validating every record
    pub fn from_records(records: &[Record]) -> crate::Result<Self> {
        for (i, record) in records.iter().enumerate() {
            record.validate(i + 1)?;
        }

        let order_dates: Vec<NaiveDate> = records.iter().map(|r| r.order_date).collect();

        let columns: Vec<Column> = vec![
            text_series(ORDER_ID, records, |r| r.order_id.as_str()),
            Series::new(ORDER_DATE.into(), order_dates.clone()).into(),
            text_series(CUSTOMER_ID, records, |r| r.customer_id.as_str()),
            text_series(CUSTOMER, records, |r| r.customer.as_str()),
            text_series(PRODUCT, records, |r| r.product.as_str()),
            text_series(SEGMENT, records, |r| r.segment.as_str()),
            text_series(INDUSTRY, records, |r| r.industry.as_str()),
            text_series(COUNTRY, records, |r| r.country.as_str()),
            text_series(REGION, records, |r| r.region.as_str()),
            Series::new(
                QUANTITY.into(),
                records.iter().map(|r| r.quantity).collect::<Vec<i64>>(),
            )
            .into(),
            Series::new(
                DISCOUNT.into(),
                records.iter().map(|r| r.discount).collect::<Vec<f64>>(),
            )
            .into(),
            Series::new(
                SALES.into(),
                records.iter().map(|r| r.sales).collect::<Vec<f64>>(),
            )
            .into(),
            Series::new(
                PROFIT.into(),
                records.iter().map(|r| r.profit).collect::<Vec<f64>>(),
            )
            .into(),
        ];

        Ok(Self {
            frame: DataFrame::new(columns)?,
            order_dates,
        })
    }

    /// The shared, read-only frame
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// A private copy of the frame that a report may extend with derived columns
    pub fn local_frame(&self) -> DataFrame {
        self.frame.clone()
    }

    pub fn order_dates(&self) -> &[NaiveDate] {
        &self.order_dates
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Values of a text column, one per row
    pub fn text_column(&self, name: &str) -> crate::Result<Vec<String>> {
        Ok(text_values(&self.frame, name)?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect())
    }

    /// Values of a numeric column as `f64`, one per row
    pub fn numeric_column(&self, name: &str) -> crate::Result<Vec<f64>> {
        float_values(&self.frame, name)?
            .into_iter()
            .map(|v| v.ok_or_else(|| AnalysisError::Computation(format!("null in `{name}`"))))
            .collect()
    }
}

fn text_series(name: &str, records: &[Record], field: impl Fn(&Record) -> &str) -> Column {
    let values: Vec<&str> = records.iter().map(field).collect();
    Series::new(name.into(), values).into()
}

/// Load a sales CSV and convert it into a validated [`Table`]
///
/// # Arguments
/// * `path` - Path to the CSV file with the columns listed in [`REQUIRED_COLUMNS`]
///
/// # Returns
/// * The typed table, or a load error naming the first offending row and column
pub fn load_table(path: impl AsRef<Path>) -> crate::Result<Table> {
    let path = path.as_ref();
    std::fs::metadata(path)?;

    // Read every column as text; typing happens row by row below so that
    // errors can name the exact cell.
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    for name in REQUIRED_COLUMNS {
        if frame.column(name).is_err() {
            return Err(AnalysisError::MissingColumn(name.to_string()));
        }
    }

    let columns = REQUIRED_COLUMNS
        .iter()
        .map(|name| text_values(&frame, name))
        .collect::<crate::Result<Vec<_>>>()?;

    let mut records = Vec::with_capacity(frame.height());
    for i in 0..frame.height() {
        let row = i + 1;
        let cell = |c: usize| required_cell(&columns, c, i);
        let invalid = |c: usize, value: &str| AnalysisError::InvalidValue {
            row,
            column: REQUIRED_COLUMNS[c].to_string(),
            value: value.to_string(),
        };

        let date_text = cell(1)?;
        let quantity_text = cell(9)?;
        let discount_text = cell(10)?;
        let sales_text = cell(11)?;
        let profit_text = cell(12)?;

        let record = Record {
            order_id: cell(0)?.to_string(),
            order_date: parse_order_date(date_text).ok_or_else(|| invalid(1, date_text))?,
            customer_id: cell(2)?.to_string(),
            customer: cell(3)?.to_string(),
            product: cell(4)?.to_string(),
            segment: cell(5)?.to_string(),
            industry: cell(6)?.to_string(),
            country: cell(7)?.to_string(),
            region: cell(8)?.to_string(),
            quantity: parse_quantity(quantity_text).ok_or_else(|| invalid(9, quantity_text))?,
            discount: discount_text
                .parse()
                .map_err(|_| invalid(10, discount_text))?,
            sales: sales_text.parse().map_err(|_| invalid(11, sales_text))?,
            profit: profit_text.parse().map_err(|_| invalid(12, profit_text))?,
        };
        records.push(record);
    }

    log::debug!("parsed {} rows from {}", records.len(), path.display());
    Table::from_records(&records)
}

/// Parse an order date in any of the accepted formats, keeping only the date part
pub fn parse_order_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
}

/// Trimmed, non-empty text of a required cell
fn required_cell(columns: &[Vec<Option<String>>], c: usize, i: usize) -> crate::Result<&str> {
    match columns[c][i].as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        other => Err(AnalysisError::InvalidValue {
            row: i + 1,
            column: REQUIRED_COLUMNS[c].to_string(),
            value: other.unwrap_or_default().to_string(),
        }),
    }
}

/// Whole numbers only, including float spellings such as `2.0`, within `i64`
fn parse_quantity(text: &str) -> Option<i64> {
    // 2^63: the first float past i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0 && (-LIMIT..LIMIT).contains(v))
            .map(|v| v as i64)
    })
}

/// Values of any column cast to `f64`; nulls stay `None`
pub(crate) fn float_values(frame: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    let column = frame.column(name)?.cast(&DataType::Float64)?;
    Ok(column.as_materialized_series().f64()?.into_iter().collect())
}

/// Values of any column rendered as text; nulls stay `None`
pub(crate) fn text_values(frame: &DataFrame, name: &str) -> crate::Result<Vec<Option<String>>> {
    let column = frame.column(name)?.cast(&DataType::String)?;
    Ok(column
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "Row ID,Order ID,Order Date,Date Key,Contact Name,Country,City,Region,Subregion,Customer,Customer ID,Industry,Segment,Product,License,Sales,Quantity,Discount,Profit";

    pub(crate) fn record(
        order_id: &str,
        date: (i32, u32, u32),
        customer_id: &str,
        product: &str,
        sales: f64,
        profit: f64,
    ) -> Record {
        Record {
            order_id: order_id.to_string(),
            order_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            customer_id: customer_id.to_string(),
            customer: format!("Customer {customer_id}"),
            product: product.to_string(),
            segment: "SMB".to_string(),
            industry: "Finance".to_string(),
            country: "Ireland".to_string(),
            region: "EMEA".to_string(),
            quantity: 2,
            discount: 0.0,
            sales,
            profit,
        }
    }

    fn create_test_csv(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file
    }

    #[test]
    fn test_load_table() {
        let file = create_test_csv(&[
            "1,EMEA-2022-152156,11/9/2022,20221109,Nathan Bell,Ireland,Dublin,EMEA,UKIR,Chevron,1017,Energy,SMB,Marketing Suite,16GRM07R1K,261.96,2,0,41.9136",
            "2,EMEA-2022-152156,11/9/2022,20221109,Nathan Bell,Ireland,Dublin,EMEA,UKIR,Chevron,1017,Energy,SMB,FinanceHub,QLIW57KZUV,731.94,3,0,219.582",
            "3,AMER-2022-138688,6/13/2022,20220613,Deirdre Bailey,United States,New York City,AMER,NAMER,Phillips 66,1056,Energy,Strategic,FinanceHub,JI6BVL70HQ,14.62,2,0.2,6.8714",
        ]);

        let table = load_table(file.path()).unwrap();
        assert_eq!(table.height(), 3);
        assert_eq!(
            table.order_dates()[2],
            NaiveDate::from_ymd_opt(2022, 6, 13).unwrap()
        );
        assert_eq!(
            table.text_column(CUSTOMER_ID).unwrap(),
            vec!["1017", "1017", "1056"]
        );
        let sales = table.numeric_column(SALES).unwrap();
        assert!((sales.iter().sum::<f64>() - 1008.52).abs() < 1e-9);
        assert_eq!(table.numeric_column(QUANTITY).unwrap(), vec![2.0, 3.0, 2.0]);
    }

    #[test]
    fn test_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Order ID,Order Date,Sales").unwrap();
        writeln!(file, "A-1,1/1/2022,10.0").unwrap();

        let err = load_table(file.path()).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingColumn(ref c) if c == CUSTOMER_ID));
        assert_eq!(err.kind(), crate::ErrorKind::Load);
    }

    #[test]
    fn test_invalid_date_fails_fast() {
        let file = create_test_csv(&[
            "1,A-1,11/9/2022,20221109,N,Ireland,Dublin,EMEA,UKIR,Chevron,1017,Energy,SMB,Alchemy,X,10,1,0,1",
            "2,A-2,not a date,20221109,N,Ireland,Dublin,EMEA,UKIR,Chevron,1017,Energy,SMB,Alchemy,X,10,1,0,1",
        ]);

        match load_table(file.path()).unwrap_err() {
            AnalysisError::InvalidValue { row, column, value } => {
                assert_eq!(row, 2);
                assert_eq!(column, ORDER_DATE);
                assert_eq!(value, "not a date");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_numeric_sales() {
        let file = create_test_csv(&[
            "1,A-1,11/9/2022,20221109,N,Ireland,Dublin,EMEA,UKIR,Chevron,1017,Energy,SMB,Alchemy,X,abc,1,0,1",
        ]);

        let err = load_table(file.path()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidValue { ref column, .. } if column == SALES));
    }

    #[test]
    fn test_discount_out_of_range() {
        let file = create_test_csv(&[
            "1,A-1,11/9/2022,20221109,N,Ireland,Dublin,EMEA,UKIR,Chevron,1017,Energy,SMB,Alchemy,X,10,1,1.5,1",
        ]);

        let err = load_table(file.path()).unwrap_err();
        assert!(matches!(err, AnalysisError::ValueOutOfRange { row: 1, ref column, .. } if column == DISCOUNT));
    }

    #[test]
    fn test_quantity_must_fit_integer() {
        let file = create_test_csv(&[
            "1,A-1,11/9/2022,20221109,N,Ireland,Dublin,EMEA,UKIR,Chevron,1017,Energy,SMB,Alchemy,X,10,1e20,0,1",
        ]);
        let err = load_table(file.path()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidValue { ref column, .. } if column == QUANTITY));

        assert_eq!(parse_quantity("3.0"), Some(3));
        assert_eq!(parse_quantity("2.5"), None);
        assert_eq!(parse_quantity("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_quantity("9.3e18"), None);
    }

    #[test]
    fn test_missing_file() {
        let err = load_table("does/not/exist.csv").unwrap_err();
        assert!(matches!(err, AnalysisError::Io(_)));
    }

    #[test]
    fn test_parse_order_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2022, 11, 9).unwrap();
        assert_eq!(parse_order_date("11/9/2022"), Some(expected));
        assert_eq!(parse_order_date("2022-11-09"), Some(expected));
        assert_eq!(parse_order_date("2022-11-09 13:45:00"), Some(expected));
        assert_eq!(parse_order_date("2022-11-09T08:26:00Z"), Some(expected));
        assert_eq!(parse_order_date("yesterday"), None);
    }

    #[test]
    fn test_from_records_validates() {
        let mut bad = record("A-1", (2022, 1, 5), "1", "Alchemy", 100.0, 10.0);
        bad.sales = -1.0;
        let err = Table::from_records(&[bad]).unwrap_err();
        assert!(matches!(err, AnalysisError::ValueOutOfRange { ref column, .. } if column == SALES));

        let empty = Table::from_records(&[]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.frame().width(), REQUIRED_COLUMNS.len());
    }
}
