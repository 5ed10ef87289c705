//! Command-line interface definitions and argument parsing

use crate::config::{load_config, AnalysisConfig};
use crate::reports::ReportKind;
use clap::Parser;
use std::path::PathBuf;

/// Exploratory sales analysis over a SaaS transactions CSV
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "SaaS-Sales.csv")]
    pub input: PathBuf,

    /// Optional TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for PNG charts (overrides the config file)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Rows kept in top-N tables and charts (overrides the config file)
    #[arg(short = 'n', long)]
    pub top_n: Option<usize>,

    /// Report to run; repeat for several. Runs every report when omitted
    #[arg(short, long = "report", value_enum)]
    pub reports: Vec<ReportKind>,

    /// Discount band edges as a comma-separated list
    /// Example: --discount-edges "0,0.1,0.2,0.3,0.4,1"
    #[arg(long)]
    pub discount_edges: Option<String>,

    /// Print tables only, do not render charts
    #[arg(long)]
    pub no_charts: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Parse the discount edges override
    /// Expected format: "edge,edge,..." with at least two edges
    pub fn parse_discount_edges(&self) -> anyhow::Result<Option<Vec<f64>>> {
        let Some(ref edges_str) = self.discount_edges else {
            return Ok(None);
        };

        let edges = edges_str
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("Invalid discount edge: {}", part))
            })
            .collect::<anyhow::Result<Vec<f64>>>()?;
        if edges.len() < 2 {
            anyhow::bail!("Discount edges must list at least two values, e.g. '0,0.5,1'");
        }
        Ok(Some(edges))
    }

    /// Reports to run, in the order requested, each once
    pub fn selected_reports(&self) -> Vec<ReportKind> {
        if self.reports.is_empty() {
            return ReportKind::ALL.to_vec();
        }
        let mut selected = Vec::new();
        for &kind in &self.reports {
            if !selected.contains(&kind) {
                selected.push(kind);
            }
        }
        selected
    }

    /// Configuration from the config file (or defaults) with command-line
    /// overrides applied
    pub fn resolve_config(&self) -> anyhow::Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => AnalysisConfig::default(),
        };

        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(n) = self.top_n {
            config.top_n = n;
        }
        if let Some(edges) = self.parse_discount_edges()? {
            config.discount.edges = edges;
            config.discount.labels = None;
        }
        if self.no_charts {
            config.charts = false;
        }

        config.validate()?;
        Ok(config)
    }
}
