//! Analysis configuration loaded from a TOML file

use crate::basket::BasketParams;
use crate::derive::{Binning, DISCOUNT_EDGES};
use crate::forecast::ForecastParams;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings shared by all reports. Every field has a default, so an empty
/// file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rows kept by top-N tables and charts
    pub top_n: usize,
    pub output_dir: PathBuf,
    /// Render PNG charts in addition to console output
    pub charts: bool,
    /// Segment column that ranks products in the segment comparison
    pub segment_sort: String,
    pub discount: DiscountConfig,
    pub clustering: ClusteringConfig,
    pub forecast: ForecastParams,
    pub decomposition: DecompositionConfig,
    pub basket: BasketParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            output_dir: PathBuf::from("charts"),
            charts: true,
            segment_sort: "SMB".to_string(),
            discount: DiscountConfig::default(),
            clustering: ClusteringConfig::default(),
            forecast: ForecastParams::default(),
            decomposition: DecompositionConfig::default(),
            basket: BasketParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscountConfig {
    pub edges: Vec<f64>,
    /// Generated from the edges when absent
    pub labels: Option<Vec<String>>,
}

impl Default for DiscountConfig {
    fn default() -> Self {
        Self {
            edges: DISCOUNT_EDGES.to_vec(),
            labels: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub clusters: usize,
    pub max_iters: usize,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            clusters: 4,
            max_iters: 300,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// Season length in months
    pub period: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self { period: 12 }
    }
}

impl AnalysisConfig {
    /// Discount bands from the configured edges and labels
    pub fn binning(&self) -> crate::Result<Binning> {
        let edges = self.discount.edges.clone();
        match &self.discount.labels {
            Some(labels) => Binning::new(edges, labels.clone()),
            None if edges == DISCOUNT_EDGES => Ok(Binning::discount()),
            None => Binning::from_edges(edges),
        }
    }

    /// Reject settings no report can work with
    pub fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            bail!("top_n must be at least 1");
        }
        if self.clustering.clusters < 2 {
            bail!("clustering.clusters must be at least 2");
        }
        if self.decomposition.period < 2 {
            bail!("decomposition.period must be at least 2");
        }
        let fraction = self.forecast.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            bail!("forecast.test_fraction must lie in (0, 1), got {fraction}");
        }
        if !(0.0..=1.0).contains(&self.basket.min_support) {
            bail!("basket.min_support must lie in [0, 1]");
        }
        self.binning().context("Invalid discount bins")?;
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AnalysisConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;
    Ok(config)
}
