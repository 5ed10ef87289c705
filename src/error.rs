//! Error types shared by the loader, the aggregation engine and the reports

use plotters::drawing::DrawingAreaErrorKind;
use polars::prelude::PolarsError;

/// Broad classification of an [`AnalysisError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input file or one of its rows violates the schema
    Load,
    /// A computation could not be carried out on the given data
    Computation,
    /// A value or key falls outside the range an operation accepts
    DataRange,
    /// An ML collaborator rejected its input or failed to fit
    Model,
    /// A chart could not be drawn
    Render,
}

/// Errors that can occur while loading data or producing reports
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("missing required column `{0}`")]
    MissingColumn(String),

    #[error("row {row}: invalid value `{value}` in column `{column}`")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row}: value {value} in column `{column}` is out of range")]
    ValueOutOfRange {
        row: usize,
        column: String,
        value: String,
    },

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("computation failed: {0}")]
    Computation(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error("value {value} falls outside all bins [{min}, {max}]")]
    OutOfBins { value: f64, min: f64, max: f64 },

    #[error("key column `{0}` contains only null values")]
    NullKey(String),

    #[error("not enough data for {what}: need {needed}, found {found}")]
    InsufficientData {
        what: String,
        needed: usize,
        found: usize,
    },

    #[error("model error: {0}")]
    Model(String),

    #[error("chart rendering failed: {0}")]
    Render(String),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingColumn(_)
            | Self::InvalidValue { .. }
            | Self::ValueOutOfRange { .. }
            | Self::Io(_) => ErrorKind::Load,
            Self::Computation(_) | Self::Polars(_) => ErrorKind::Computation,
            Self::OutOfBins { .. } | Self::NullKey(_) | Self::InsufficientData { .. } => {
                ErrorKind::DataRange
            }
            Self::Model(_) => ErrorKind::Model,
            Self::Render(_) => ErrorKind::Render,
        }
    }
}

impl<E> From<DrawingAreaErrorKind<E>> for AnalysisError
where
    E: std::error::Error + Send + Sync,
{
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        Self::Render(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            AnalysisError::MissingColumn("Sales".into()).kind(),
            ErrorKind::Load
        );
        assert_eq!(
            AnalysisError::OutOfBins {
                value: 1.5,
                min: 0.0,
                max: 1.0
            }
            .kind(),
            ErrorKind::DataRange
        );
        assert_eq!(
            AnalysisError::NullKey("Region".into()).kind(),
            ErrorKind::DataRange
        );
        assert_eq!(
            AnalysisError::Computation("boom".into()).kind(),
            ErrorKind::Computation
        );
    }

    #[test]
    fn test_error_messages() {
        let err = AnalysisError::InvalidValue {
            row: 3,
            column: "Order Date".into(),
            value: "not-a-date".into(),
        };
        assert_eq!(
            err.to_string(),
            "row 3: invalid value `not-a-date` in column `Order Date`"
        );
    }
}
