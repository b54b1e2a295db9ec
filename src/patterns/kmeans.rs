//! One-dimensional k-means for time-of-day clustering
//!
//! Deterministic: centroids initialize at data quantiles and iterate to a
//! fixed point. Empty clusters are dropped and near-coincident centroids
//! merge, so tightly grouped data yields one cluster even when k > 1.

/// Clusters closer than this (in hours) merge after convergence.
const MERGE_GAP_HOURS: f64 = 0.5;
const MAX_ITERATIONS: usize = 50;

/// One converged cluster over hour-decimal values.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub centroid: f64,
    pub members: Vec<f64>,
}

impl Cluster {
    pub fn variance(&self) -> f64 {
        if self.members.len() < 2 {
            return 0.0;
        }
        let mean = self.centroid;
        self.members.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (self.members.len() - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Cluster `values` into at most `k` groups. Returns clusters sorted by
/// centroid; fewer than `k` may come back after empty-drop and merging.
pub fn kmeans_1d(values: &[f64], k: usize) -> Vec<Cluster> {
    if values.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    // Quantile initialization.
    let mut centroids: Vec<f64> = (0..k)
        .map(|i| {
            let index = (i * (sorted.len() - 1)) / k.max(1);
            sorted[index.min(sorted.len() - 1)]
        })
        .collect();
    centroids.dedup();

    let mut assignments = vec![0usize; sorted.len()];
    for _ in 0..MAX_ITERATIONS {
        // Assign each value to the nearest centroid.
        let mut changed = false;
        for (i, &value) in sorted.iter().enumerate() {
            let nearest = centroids
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    (value - *a)
                        .abs()
                        .partial_cmp(&(value - *b).abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map_or(0, |(j, _)| j);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }

        // Recompute centroids.
        for (j, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<f64> = sorted
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == j)
                .map(|(&v, _)| v)
                .collect();
            if !members.is_empty() {
                *centroid = members.iter().sum::<f64>() / members.len() as f64;
            }
        }

        if !changed {
            break;
        }
    }

    // Materialize non-empty clusters.
    let mut clusters: Vec<Cluster> = centroids
        .iter()
        .enumerate()
        .filter_map(|(j, &centroid)| {
            let members: Vec<f64> = sorted
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == j)
                .map(|(&v, _)| v)
                .collect();
            (!members.is_empty()).then_some(Cluster { centroid, members })
        })
        .collect();
    clusters.sort_by(|a, b| {
        a.centroid
            .partial_cmp(&b.centroid)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Merge near-coincident clusters.
    let mut merged: Vec<Cluster> = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        match merged.last_mut() {
            Some(last) if (cluster.centroid - last.centroid).abs() < MERGE_GAP_HOURS => {
                last.members.extend(cluster.members);
                last.centroid =
                    last.members.iter().sum::<f64>() / last.members.len() as f64;
            }
            _ => merged.push(cluster),
        }
    }
    merged
}

/// Cluster count scaling with dataset size, as the detection suite uses it.
pub fn cluster_count_for(n: usize) -> usize {
    if n < 15 {
        1
    } else if n < 21 {
        2
    } else {
        3
    }
}
