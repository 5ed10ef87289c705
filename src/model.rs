//! K-Means customer segmentation

use crate::aggregate::{group_reduce, Aggregation};
use crate::data::{Table, CUSTOMER_ID, DISCOUNT, ORDER_ID, PROFIT, QUANTITY, SALES};
use crate::error::AnalysisError;
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub const FREQUENCY: &str = "Frequency";

/// Per-customer features fed to the clustering, in column order
pub const SEGMENT_FEATURES: [&str; 5] = [SALES, QUANTITY, DISCOUNT, PROFIT, FREQUENCY];

/// Standardizes each feature column to zero mean and unit variance
#[derive(Debug, Clone)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl StandardScaler {
    /// Fit on the columns of `data`. Constant columns get a unit scale.
    pub fn fit(data: &Array2<f64>) -> Self {
        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.ncols()));
        let std = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Self { mean, std }
    }

    pub fn transform(&self, data: Array2<f64>) -> Array2<f64> {
        (data - &self.mean) / &self.std
    }
}

/// Customer-level feature matrix
#[derive(Debug)]
pub struct CustomerFeatures {
    /// Customer IDs corresponding to each row
    pub customer_ids: Vec<String>,
    /// Raw feature values, columns as in [`SEGMENT_FEATURES`]
    pub raw_features: Array2<f64>,
    /// Standardized features
    pub features: Array2<f64>,
}

/// Total sales, quantity and profit, mean discount and order count per customer
pub fn customer_features(table: &Table) -> crate::Result<CustomerFeatures> {
    let view = group_reduce(
        table.frame(),
        &[CUSTOMER_ID],
        &[
            Aggregation::sum(SALES),
            Aggregation::sum(QUANTITY),
            Aggregation::mean(DISCOUNT),
            Aggregation::sum(PROFIT),
            Aggregation::count(ORDER_ID, FREQUENCY),
        ],
    )?;

    let customer_ids = view.labels(CUSTOMER_ID)?;
    let n_samples = customer_ids.len();
    let columns = SEGMENT_FEATURES
        .iter()
        .map(|name| view.values(name))
        .collect::<crate::Result<Vec<_>>>()?;

    let mut raw_data = Vec::with_capacity(n_samples * SEGMENT_FEATURES.len());
    for i in 0..n_samples {
        for column in &columns {
            raw_data.push(column[i].unwrap_or(0.0));
        }
    }
    let raw_features = Array2::from_shape_vec((n_samples, SEGMENT_FEATURES.len()), raw_data)
        .map_err(|e| AnalysisError::Computation(e.to_string()))?;

    let features = StandardScaler::fit(&raw_features).transform(raw_features.clone());

    Ok(CustomerFeatures {
        customer_ids,
        raw_features,
        features,
    })
}

/// Fitted clustering with assignments and metrics
#[derive(Debug)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments for training data
    pub labels: Array1<usize>,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl KMeansModel {
    /// Customers assigned to each cluster
    pub fn cluster_sizes(&self) -> Vec<usize> {
        (0..self.n_clusters)
            .map(|cluster| self.labels.iter().filter(|&&label| label == cluster).count())
            .collect()
    }

    /// Mean of each raw feature within each cluster (`n_clusters x n_features`)
    pub fn cluster_means(&self, raw_features: &Array2<f64>) -> Array2<f64> {
        let mut sums = Array2::<f64>::zeros((self.n_clusters, raw_features.ncols()));
        let sizes = self.cluster_sizes();
        for (row, &label) in raw_features.outer_iter().zip(self.labels.iter()) {
            let mut target = sums.row_mut(label);
            target += &row;
        }
        for (mut row, &size) in sums.outer_iter_mut().zip(&sizes) {
            if size > 0 {
                row /= size as f64;
            }
        }
        sums
    }

    /// Mean silhouette coefficient over the first `sample_size` customers.
    /// Returns 0 when fewer than two customers are sampled.
    pub fn silhouette_score(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let sampled = features.nrows().min(sample_size).min(self.labels.len());
        if sampled < 2 {
            return 0.0;
        }

        let total: f64 = (0..sampled)
            .map(|i| {
                // (distance sum, count) from customer i to each cluster
                let mut per_cluster = vec![(0.0, 0usize); self.n_clusters];
                for j in (0..sampled).filter(|&j| j != i) {
                    let entry = &mut per_cluster[self.labels[j]];
                    entry.0 += euclidean_distance(&features.row(i), &features.row(j));
                    entry.1 += 1;
                }

                let own = self.labels[i];
                let cohesion = match per_cluster[own] {
                    (sum, n) if n > 0 => sum / n as f64,
                    _ => 0.0,
                };
                let separation = per_cluster
                    .iter()
                    .enumerate()
                    .filter(|&(cluster, &(_, n))| cluster != own && n > 0)
                    .map(|(_, &(sum, n))| sum / n as f64)
                    .fold(f64::INFINITY, f64::min);

                let spread = cohesion.max(separation);
                if separation.is_infinite() || spread == 0.0 {
                    0.0
                } else {
                    (separation - cohesion) / spread
                }
            })
            .sum();

        total / sampled as f64
    }
}

/// Fit K-Means on standardized features
///
/// # Arguments
/// * `features` - Standardized feature matrix, one row per customer
/// * `n_clusters` - Number of clusters (at least 2)
/// * `max_iters` - Maximum iterations for convergence
/// * `tolerance` - Convergence tolerance
/// * `seed` - Seed for centroid initialisation
pub fn fit_kmeans(
    features: &Array2<f64>,
    n_clusters: usize,
    max_iters: usize,
    tolerance: f64,
    seed: u64,
) -> crate::Result<KMeansModel> {
    if n_clusters < 2 {
        return Err(AnalysisError::Model(
            "customer segmentation needs at least 2 clusters".to_string(),
        ));
    }
    if features.nrows() < n_clusters {
        return Err(AnalysisError::InsufficientData {
            what: "k-means clustering".to_string(),
            needed: n_clusters,
            found: features.nrows(),
        });
    }

    let dataset = Dataset::new(features.clone(), Array1::<usize>::zeros(features.nrows()));
    let model = KMeans::params_with(n_clusters, StdRng::seed_from_u64(seed), L2Dist)
        .max_n_iterations(max_iters as u64)
        .tolerance(tolerance)
        .fit(&dataset)
        .map_err(|e| AnalysisError::Model(e.to_string()))?;

    let labels: Array1<usize> = model.predict(&dataset);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Within-cluster sum of squares
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;
    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            inertia += euclidean_distance(&features.row(i), &centroids.row(cluster)).powi(2);
        }
    }
    inertia
}

fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
