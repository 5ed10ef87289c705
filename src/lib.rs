//! SalesForge: exploratory analysis and reporting over SaaS sales transactions
//!
//! A CSV of transactions is loaded once into an immutable [`Table`]. Each
//! report groups and reshapes its own copy of the table, optionally hands the
//! prepared numbers to a statistical model, and returns console tables plus
//! chart descriptions that [`viz`] renders to PNG.

pub mod aggregate;
pub mod basket;
pub mod cli;
pub mod config;
pub mod data;
pub mod decompose;
pub mod derive;
pub mod error;
pub mod forecast;
pub mod model;
pub mod reports;
pub mod viz;

// Re-export public items for easier access
pub use aggregate::{group_reduce, pivot, top_n, AggregateView, Aggregation, PivotFill, Reducer};
pub use cli::Args;
pub use config::{load_config, AnalysisConfig};
pub use data::{load_table, Record, Table};
pub use derive::Binning;
pub use error::{AnalysisError, ErrorKind};
pub use reports::{run_reports, Report, ReportKind};
pub use viz::{render_chart, Chart};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, AnalysisError>;
