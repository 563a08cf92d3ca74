//! Density-based clustering of meaningful-unit embeddings.
//!
//! Wraps linfa's DBSCAN with config-driven hyperparameters. Embeddings are
//! L2-normalized so the Euclidean neighborhood radius is an exact stand-in
//! for the configured cosine distance (`d_euclid = sqrt(2 * d_cos)` on unit
//! vectors). Clusters below the resolved minimum size are demoted to
//! outliers, and a post-pass merges clusters whose centroids fall within
//! `cluster_selection_epsilon` cosine distance.
//!
//! This component does not self-correct: quality-threshold violations only
//! produce warnings. Density clustering parameter tuning requires human
//! judgment, so there is no automatic reparameterization or retry.

use std::collections::HashMap;

use linfa::traits::Transformer;
use linfa_clustering::Dbscan;
use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClusteringConfig;
use crate::services::embedding_source::EmbeddingExtraction;
use crate::utils::math::{cosine_distance, cosine_similarity, vector_mean, vector_normalize};
use crate::PodgraphError;

/// A unit's membership in a detected cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterMember {
    pub unit_id: String,
    /// Soft-assignment confidence in [0, 1]: cosine similarity to the
    /// cluster centroid, clamped.
    pub confidence: f32,
}

/// One density-detected cluster.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedCluster {
    pub cluster_id: i64,
    /// L2-normalized mean of member embeddings.
    pub centroid: Vec<f32>,
    pub members: Vec<ClusterMember>,
}

/// In-memory result of one clustering run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterResult {
    pub clusters: Vec<DetectedCluster>,
    pub outlier_ids: Vec<String>,
    pub total_units: usize,
}

impl ClusterResult {
    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn n_outliers(&self) -> usize {
        self.outlier_ids.len()
    }

    pub fn outlier_ratio(&self) -> f64 {
        if self.total_units == 0 {
            0.0
        } else {
            self.n_outliers() as f64 / self.total_units as f64
        }
    }

    /// (min, avg, max) cluster sizes; zeros when no clusters were detected.
    pub fn size_stats(&self) -> (usize, f64, usize) {
        if self.clusters.is_empty() {
            return (0, 0.0, 0);
        }
        let sizes: Vec<usize> = self.clusters.iter().map(|c| c.members.len()).collect();
        let min = *sizes.iter().min().unwrap_or(&0);
        let max = *sizes.iter().max().unwrap_or(&0);
        let avg = sizes.iter().sum::<usize>() as f64 / sizes.len() as f64;
        (min, avg, max)
    }
}

/// Config-driven density clusterer.
pub struct DensityClusterer {
    config: ClusteringConfig,
}

impl DensityClusterer {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Cluster the extracted embeddings.
    ///
    /// An empty extraction returns an empty result without invoking the
    /// algorithm. Algorithm failures propagate as
    /// [`PodgraphError::Clustering`]; the caller decides fatal vs. retry.
    pub fn cluster(&self, extraction: &EmbeddingExtraction) -> Result<ClusterResult, PodgraphError> {
        let n = extraction.len();
        if n == 0 {
            debug!("No embeddings to cluster; returning empty result");
            return Ok(ClusterResult::default());
        }

        let dims = extraction.embeddings[0].len();
        let normalized: Vec<Vec<f32>> = extraction
            .embeddings
            .iter()
            .map(|e| vector_normalize(e))
            .collect();

        let mut matrix_data = Vec::with_capacity(n * dims);
        for row in &normalized {
            if row.len() != dims {
                return Err(PodgraphError::Validation(format!(
                    "Inconsistent embedding dimension: expected {}, got {}",
                    dims,
                    row.len()
                )));
            }
            matrix_data.extend(row.iter().map(|&v| v as f64));
        }
        let records = Array2::from_shape_vec((n, dims), matrix_data).map_err(|e| {
            PodgraphError::Clustering(format!("Failed to build embedding matrix: {}", e))
        })?;

        // On unit vectors, euclidean and cosine distance are monotonically
        // related: d_e^2 = 2 * d_c.
        let tolerance = (2.0 * self.config.density_radius as f64).sqrt();
        let min_cluster_size = self.config.min_cluster_size.resolve(n);

        let labels = Dbscan::params(self.config.min_samples)
            .tolerance(tolerance)
            .transform(&records)
            .map_err(|e| PodgraphError::Clustering(format!("DBSCAN failed: {}", e)))?;

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut outlier_rows: Vec<usize> = Vec::new();
        for (row, label) in labels.iter().enumerate() {
            match label {
                Some(cluster) => groups.entry(*cluster).or_default().push(row),
                None => outlier_rows.push(row),
            }
        }

        // Demote undersized clusters to outliers.
        let mut member_sets: Vec<Vec<usize>> = Vec::new();
        for (label, rows) in groups {
            if rows.len() < min_cluster_size {
                debug!(
                    "Demoting cluster {} with {} members (< min cluster size {})",
                    label,
                    rows.len(),
                    min_cluster_size
                );
                outlier_rows.extend(rows);
            } else {
                member_sets.push(rows);
            }
        }

        let mut centroids: Vec<Vec<f32>> = member_sets
            .iter()
            .map(|rows| Self::centroid_of(extraction, rows))
            .collect();

        if self.config.cluster_selection_epsilon > 0.0 && member_sets.len() > 1 {
            let merged = self.merge_close_clusters(extraction, &mut member_sets, &mut centroids);
            if merged > 0 {
                info!(
                    "Merged {} cluster pair(s) within selection epsilon {}",
                    merged, self.config.cluster_selection_epsilon
                );
            }
        }

        // Largest clusters first; ids are generation-scoped ordinals.
        let mut indexed: Vec<(Vec<usize>, Vec<f32>)> =
            member_sets.into_iter().zip(centroids).collect();
        indexed.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let clusters: Vec<DetectedCluster> = indexed
            .into_iter()
            .enumerate()
            .map(|(id, (rows, centroid))| {
                let members = rows
                    .iter()
                    .map(|&row| ClusterMember {
                        unit_id: extraction.unit_ids[row].clone(),
                        confidence: cosine_similarity(&extraction.embeddings[row], &centroid)
                            .clamp(0.0, 1.0),
                    })
                    .collect();
                DetectedCluster {
                    cluster_id: id as i64,
                    centroid,
                    members,
                }
            })
            .collect();

        outlier_rows.sort_unstable();
        let result = ClusterResult {
            outlier_ids: outlier_rows
                .iter()
                .map(|&row| extraction.unit_ids[row].clone())
                .collect(),
            clusters,
            total_units: n,
        };

        self.check_quality(&result);
        info!(
            "Clustered {} units into {} clusters ({} outliers)",
            n,
            result.n_clusters(),
            result.n_outliers()
        );
        Ok(result)
    }

    fn centroid_of(extraction: &EmbeddingExtraction, rows: &[usize]) -> Vec<f32> {
        let members: Vec<&[f32]> = rows
            .iter()
            .map(|&row| extraction.embeddings[row].as_slice())
            .collect();
        vector_normalize(&vector_mean(&members))
    }

    /// Union clusters whose centroids are within the selection epsilon.
    /// Returns the number of merges performed.
    fn merge_close_clusters(
        &self,
        extraction: &EmbeddingExtraction,
        member_sets: &mut Vec<Vec<usize>>,
        centroids: &mut Vec<Vec<f32>>,
    ) -> usize {
        let epsilon = self.config.cluster_selection_epsilon;
        let mut merges = 0;
        let mut i = 0;
        while i < member_sets.len() {
            let mut j = i + 1;
            while j < member_sets.len() {
                if cosine_distance(&centroids[i], &centroids[j]) < epsilon {
                    let absorbed = member_sets.remove(j);
                    centroids.remove(j);
                    member_sets[i].extend(absorbed);
                    // Recompute so chained merges compare against the
                    // combined centroid.
                    centroids[i] = Self::centroid_of(extraction, &member_sets[i]);
                    merges += 1;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        merges
    }

    fn check_quality(&self, result: &ClusterResult) {
        let thresholds = &self.config.quality;
        let ratio = result.outlier_ratio();
        if ratio > thresholds.max_outlier_ratio as f64 {
            warn!(
                "Outlier ratio {:.2} exceeds threshold {:.2}; clustering parameters may need tuning",
                ratio, thresholds.max_outlier_ratio
            );
        }
        if result.total_units > 0 && result.n_clusters() < thresholds.min_clusters {
            warn!(
                "Only {} cluster(s) detected (threshold {}); corpus may be too homogeneous",
                result.n_clusters(),
                thresholds.min_clusters
            );
        }
        let (_, _, max_size) = result.size_stats();
        if max_size > thresholds.max_cluster_size {
            warn!(
                "Largest cluster has {} members (threshold {}); consider tighter parameters",
                max_size, thresholds.max_cluster_size
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinClusterSize;

    fn extraction_from(vectors: Vec<Vec<f32>>) -> EmbeddingExtraction {
        let unit_ids: Vec<String> = (0..vectors.len())
            .map(|i| format!("meaningful_unit:u{}", i))
            .collect();
        let summaries: Vec<String> = (0..vectors.len()).map(|i| format!("summary {}", i)).collect();
        EmbeddingExtraction {
            unit_ids,
            embeddings: vectors,
            summaries,
        }
    }

    fn axis_vector(dims: usize, axis: usize, value: f32) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[axis] = value;
        v
    }

    /// 20-member blob around an axis with small per-member perturbation.
    fn blob(dims: usize, axis: usize, count: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|i| {
                let mut v = axis_vector(dims, axis, 1.0);
                v[(axis + 1 + i % 5) % dims] = 0.02 * ((i % 3) as f32 + 1.0);
                v
            })
            .collect()
    }

    fn test_config() -> ClusteringConfig {
        ClusteringConfig {
            min_samples: 5,
            density_radius: 0.3,
            cluster_selection_epsilon: 0.0,
            min_cluster_size: MinClusterSize::Fixed { size: 5 },
            ..ClusteringConfig::default()
        }
    }

    #[test]
    fn test_empty_input_short_circuits() {
        let clusterer = DensityClusterer::new(test_config());
        let result = clusterer.cluster(&EmbeddingExtraction::default()).unwrap();
        assert_eq!(result.n_clusters(), 0);
        assert_eq!(result.n_outliers(), 0);
        assert_eq!(result.total_units, 0);
        assert_eq!(result.outlier_ratio(), 0.0);
    }

    #[test]
    fn test_two_blobs_with_outliers() {
        // 20 + 20 well-separated units plus 5 isolated outliers.
        let dims = 768;
        let mut vectors = blob(dims, 0, 20);
        vectors.extend(blob(dims, 100, 20));
        for k in 0..5 {
            vectors.push(axis_vector(dims, 300 + k * 10, 1.0));
        }

        let clusterer = DensityClusterer::new(test_config());
        let result = clusterer.cluster(&extraction_from(vectors)).unwrap();

        assert_eq!(result.n_clusters(), 2, "expected two blobs");
        assert_eq!(result.n_outliers(), 5, "expected the isolated vectors as outliers");
        assert_eq!(result.total_units, 45);

        let (min, avg, max) = result.size_stats();
        assert_eq!(min, 20);
        assert_eq!(max, 20);
        assert!((avg - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_centroids_are_unit_length() {
        let dims = 64;
        let mut vectors = blob(dims, 0, 10);
        vectors.extend(blob(dims, 32, 10));

        let clusterer = DensityClusterer::new(test_config());
        let result = clusterer.cluster(&extraction_from(vectors)).unwrap();

        assert!(!result.clusters.is_empty());
        for cluster in &result.clusters {
            let norm: f32 = cluster.centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!(
                (norm - 1.0).abs() < 1e-5,
                "centroid norm {} for cluster {}",
                norm,
                cluster.cluster_id
            );
        }
    }

    #[test]
    fn test_centroid_equals_normalized_member_mean() {
        // Six identical vectors form one cluster whose centroid is the
        // normalized vector itself.
        let dims = 16;
        let vectors: Vec<Vec<f32>> = (0..6).map(|_| axis_vector(dims, 3, 2.0)).collect();

        let clusterer = DensityClusterer::new(ClusteringConfig {
            min_samples: 3,
            min_cluster_size: MinClusterSize::Fixed { size: 3 },
            ..test_config()
        });
        let result = clusterer.cluster(&extraction_from(vectors)).unwrap();

        assert_eq!(result.n_clusters(), 1);
        let centroid = &result.clusters[0].centroid;
        assert!((centroid[3] - 1.0).abs() < 1e-6);
        for (i, v) in centroid.iter().enumerate() {
            if i != 3 {
                assert!(v.abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_confidence_in_unit_range() {
        let dims = 32;
        let vectors = blob(dims, 0, 12);
        let clusterer = DensityClusterer::new(test_config());
        let result = clusterer.cluster(&extraction_from(vectors)).unwrap();

        for cluster in &result.clusters {
            for member in &cluster.members {
                assert!(
                    (0.0..=1.0).contains(&member.confidence),
                    "confidence {} out of range",
                    member.confidence
                );
            }
        }
    }

    #[test]
    fn test_undersized_clusters_demoted_to_outliers() {
        // DBSCAN with min_samples=2 finds the tight triple, but the fixed
        // minimum cluster size of 5 demotes it.
        let dims = 16;
        let vectors: Vec<Vec<f32>> = (0..3).map(|_| axis_vector(dims, 0, 1.0)).collect();

        let clusterer = DensityClusterer::new(ClusteringConfig {
            min_samples: 2,
            min_cluster_size: MinClusterSize::Fixed { size: 5 },
            ..test_config()
        });
        let result = clusterer.cluster(&extraction_from(vectors)).unwrap();

        assert_eq!(result.n_clusters(), 0);
        assert_eq!(result.n_outliers(), 3);
    }

    #[test]
    fn test_selection_epsilon_merges_close_clusters() {
        // Two tight blobs 0.5 rad apart: separate at density radius 0.05
        // (euclidean tolerance ~0.32 < chord 0.49), but their centroids are
        // within cosine distance 1 - cos(0.5) ~ 0.12 < epsilon 0.2.
        let dims = 8;
        let a = axis_vector(dims, 0, 1.0);
        let mut b = vec![0.0; dims];
        b[0] = 0.5_f32.cos();
        b[1] = 0.5_f32.sin();

        let mut vectors: Vec<Vec<f32>> = (0..6).map(|_| a.clone()).collect();
        vectors.extend((0..6).map(|_| b.clone()));

        let base = ClusteringConfig {
            min_samples: 3,
            density_radius: 0.05,
            min_cluster_size: MinClusterSize::Fixed { size: 3 },
            ..test_config()
        };

        let separate = DensityClusterer::new(base.clone())
            .cluster(&extraction_from(vectors.clone()))
            .unwrap();
        assert_eq!(separate.n_clusters(), 2, "blobs should start separate");

        let merged = DensityClusterer::new(ClusteringConfig {
            cluster_selection_epsilon: 0.2,
            ..base
        })
        .cluster(&extraction_from(vectors))
        .unwrap();
        assert_eq!(merged.n_clusters(), 1, "epsilon should merge the blobs");
        assert_eq!(merged.clusters[0].members.len(), 12);
    }

    #[test]
    fn test_cluster_ids_are_sequential_by_size() {
        let dims = 128;
        let mut vectors = blob(dims, 0, 8);
        vectors.extend(blob(dims, 64, 20));

        let clusterer = DensityClusterer::new(test_config());
        let result = clusterer.cluster(&extraction_from(vectors)).unwrap();

        assert_eq!(result.n_clusters(), 2);
        assert_eq!(result.clusters[0].cluster_id, 0);
        assert_eq!(result.clusters[1].cluster_id, 1);
        assert!(result.clusters[0].members.len() >= result.clusters[1].members.len());
    }
}
