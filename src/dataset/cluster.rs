//! K-means clustering with a 2-D projection for plotting.
//!
//! Numeric features are z-scored and categorical features one-hot
//! encoded before clustering. Seeding is deterministic (farthest-point
//! from row zero), so repeated runs on the same input produce the same
//! labels. The output artifact gains `pc1`, `pc2`, and `cluster`
//! columns and carries the `_clustered` marker the presentation layer
//! watches for.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::dataset::{artifact_path, mean, std_dev, DatasetError, Frame};

/// Marker suffix of clustering artifacts; the presentation layer
/// pattern-matches it to trigger scatter rendering.
pub const CLUSTERED_SUFFIX: &str = "_clustered";

/// First projection coordinate column.
pub const COORD_X: &str = "pc1";
/// Second projection coordinate column.
pub const COORD_Y: &str = "pc2";
/// Categorical cluster-label column.
pub const CLUSTER_LABEL: &str = "cluster";

/// Options for a clustering run.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Feature columns; empty means every column except prior
    /// clustering output.
    pub columns: Vec<String>,
    pub k: usize,
    pub max_iterations: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            k: 3,
            max_iterations: 100,
        }
    }
}

impl From<&crate::config::AnalysisConfig> for ClusterOptions {
    fn from(config: &crate::config::AnalysisConfig) -> Self {
        Self {
            columns: Vec::new(),
            k: config.default_k,
            max_iterations: 100,
        }
    }
}

/// What a clustering run produced.
#[derive(Debug, Clone)]
pub struct ClusterSummary {
    pub output_path: PathBuf,
    pub k: usize,
    /// Points per cluster label, indexed by label.
    pub cluster_sizes: Vec<usize>,
    pub feature_columns: Vec<String>,
}

impl ClusterSummary {
    pub fn report(&self) -> String {
        let sizes: Vec<String> = self
            .cluster_sizes
            .iter()
            .enumerate()
            .map(|(label, size)| format!("{}: {}", label, size))
            .collect();
        format!(
            "Clustering complete: k={} over features [{}], cluster sizes {{{}}}. \
             Added {}, {} and {} columns; saved to {}.",
            self.k,
            self.feature_columns.join(", "),
            sizes.join(", "),
            COORD_X,
            COORD_Y,
            CLUSTER_LABEL,
            self.output_path.display()
        )
    }
}

/// Path the clustering artifact is written to. Already-clustered
/// inputs map to themselves; the marker never compounds.
pub fn clustered_artifact_path(path: &Path) -> PathBuf {
    artifact_path(path, CLUSTERED_SUFFIX)
}

/// Cluster the dataset at `path` and write a `_clustered` artifact
/// with projection coordinates and cluster labels appended.
pub fn cluster_dataset(path: &Path, options: &ClusterOptions) -> Result<ClusterSummary, DatasetError> {
    let mut frame = Frame::load(path)?;
    let rows = frame.row_count();

    let feature_columns = select_feature_columns(&frame, &options.columns)?;
    let matrix = build_feature_matrix(&frame, &feature_columns)?;

    let k = options.k.max(1).min(rows);
    let assignments = kmeans(&matrix, k, options.max_iterations);

    let mut cluster_sizes = vec![0usize; k];
    for label in &assignments {
        cluster_sizes[*label] += 1;
    }

    let (pc1, pc2) = project_2d(&matrix);
    frame.set_numeric_column(COORD_X, pc1);
    frame.set_numeric_column(COORD_Y, pc2);
    frame.set_label_column(
        CLUSTER_LABEL,
        assignments.iter().map(|label| label.to_string()).collect(),
    );

    let output_path = clustered_artifact_path(path);
    frame.save_atomic(&output_path)?;
    info!(
        "Clustered {} -> {} (k={}, {} rows)",
        path.display(),
        output_path.display(),
        k,
        rows
    );

    Ok(ClusterSummary {
        output_path,
        k,
        cluster_sizes,
        feature_columns,
    })
}

/// Resolve the feature column list, excluding prior clustering output
/// when defaulting to all columns.
fn select_feature_columns(frame: &Frame, requested: &[String]) -> Result<Vec<String>, DatasetError> {
    if requested.is_empty() {
        let derived = [COORD_X, COORD_Y, CLUSTER_LABEL];
        return Ok(frame
            .headers()
            .iter()
            .filter(|name| !derived.contains(&name.as_str()))
            .cloned()
            .collect());
    }

    for name in requested {
        if frame.column_index(name).is_none() {
            return Err(DatasetError::UnknownColumn(name.clone()));
        }
    }
    Ok(requested.to_vec())
}

/// Build the row-major feature matrix: z-scored numeric columns and
/// one-hot encoded categorical columns. Nulls contribute zeros.
fn build_feature_matrix(frame: &Frame, columns: &[String]) -> Result<Vec<Vec<f64>>, DatasetError> {
    let rows = frame.row_count();
    let mut matrix = vec![Vec::new(); rows];

    for name in columns {
        let idx = frame
            .column_index(name)
            .ok_or_else(|| DatasetError::UnknownColumn(name.clone()))?;

        if let Some(values) = frame.numeric_values(idx) {
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            let center = mean(&present).unwrap_or(0.0);
            let spread = std_dev(&present).unwrap_or(0.0);
            for (row, cell) in values.iter().enumerate() {
                let scaled = match cell {
                    Some(value) if spread > 0.0 => (value - center) / spread,
                    _ => 0.0,
                };
                matrix[row].push(scaled);
            }
        } else if let Some(values) = frame.text_values(idx) {
            let levels: BTreeSet<&str> = values
                .iter()
                .flatten()
                .map(|value| value.as_str())
                .collect();
            for level in levels {
                for (row, cell) in values.iter().enumerate() {
                    let hot = cell.as_deref() == Some(level);
                    matrix[row].push(if hot { 1.0 } else { 0.0 });
                }
            }
        }
    }

    if matrix.iter().all(|row| row.is_empty()) {
        return Err(DatasetError::NoFeatures("clustering"));
    }
    Ok(matrix)
}

/// Deterministic k-means: farthest-point seeding from row zero, then
/// assign/recompute until stable or the iteration bound is hit.
fn kmeans(matrix: &[Vec<f64>], k: usize, max_iterations: usize) -> Vec<usize> {
    let mut centroids = seed_centroids(matrix, k);
    let mut assignments = vec![0usize; matrix.len()];

    for iteration in 0..max_iterations.max(1) {
        let changed = assign_points(matrix, &centroids, &mut assignments);
        recompute_centroids(matrix, &assignments, &mut centroids);
        if !changed && iteration > 0 {
            break;
        }
    }
    assignments
}

fn seed_centroids(matrix: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
    let mut centroids = vec![matrix[0].clone()];
    while centroids.len() < k {
        let mut best_row = 0;
        let mut best_distance = -1.0;
        for (row, point) in matrix.iter().enumerate() {
            let nearest = centroids
                .iter()
                .map(|c| squared_distance(point, c))
                .fold(f64::INFINITY, f64::min);
            if nearest > best_distance {
                best_distance = nearest;
                best_row = row;
            }
        }
        centroids.push(matrix[best_row].clone());
    }
    centroids
}

fn assign_points(matrix: &[Vec<f64>], centroids: &[Vec<f64>], assignments: &mut [usize]) -> bool {
    let mut changed = false;
    for (row, point) in matrix.iter().enumerate() {
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (label, centroid) in centroids.iter().enumerate() {
            let distance = squared_distance(point, centroid);
            if distance < best_distance {
                best_distance = distance;
                best = label;
            }
        }
        if assignments[row] != best {
            assignments[row] = best;
            changed = true;
        }
    }
    changed
}

fn recompute_centroids(matrix: &[Vec<f64>], assignments: &[usize], centroids: &mut [Vec<f64>]) {
    let dims = matrix[0].len();
    for (label, centroid) in centroids.iter_mut().enumerate() {
        let members: Vec<&Vec<f64>> = matrix
            .iter()
            .zip(assignments)
            .filter(|(_, a)| **a == label)
            .map(|(point, _)| point)
            .collect();
        // An empty cluster keeps its previous centroid.
        if members.is_empty() {
            continue;
        }
        let mut next = vec![0.0; dims];
        for point in &members {
            for (dim, value) in point.iter().enumerate() {
                next[dim] += value;
            }
        }
        for value in &mut next {
            *value /= members.len() as f64;
        }
        *centroid = next;
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Project rows onto the top two principal components of the feature
/// covariance (power iteration with deflation). Degenerate directions
/// project to zero.
fn project_2d(matrix: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let rows = matrix.len();
    let dims = matrix[0].len();

    let mut centered: Vec<Vec<f64>> = matrix.to_vec();
    for dim in 0..dims {
        let column_mean =
            centered.iter().map(|row| row[dim]).sum::<f64>() / rows as f64;
        for row in &mut centered {
            row[dim] -= column_mean;
        }
    }

    let mut covariance = vec![vec![0.0; dims]; dims];
    for row in &centered {
        for i in 0..dims {
            for j in 0..dims {
                covariance[i][j] += row[i] * row[j] / rows as f64;
            }
        }
    }

    let first = top_eigenvector(&covariance);
    deflate(&mut covariance, &first);
    let second = top_eigenvector(&covariance);

    let project = |axis: &[f64]| -> Vec<f64> {
        centered
            .iter()
            .map(|row| row.iter().zip(axis).map(|(x, v)| x * v).sum())
            .collect()
    };
    (project(&first), project(&second))
}

/// Power iteration from a deterministic start along the axis of
/// largest variance. Returns a zero vector when the matrix has no
/// remaining signal.
fn top_eigenvector(covariance: &[Vec<f64>]) -> Vec<f64> {
    let dims = covariance.len();
    let start_axis = (0..dims)
        .max_by(|a, b| {
            covariance[*a][*a]
                .partial_cmp(&covariance[*b][*b])
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0);

    if covariance[start_axis][start_axis] <= 1e-12 {
        return vec![0.0; dims];
    }

    let mut vector = vec![0.0; dims];
    vector[start_axis] = 1.0;

    for _ in 0..200 {
        let mut next = vec![0.0; dims];
        for i in 0..dims {
            for j in 0..dims {
                next[i] += covariance[i][j] * vector[j];
            }
        }
        let norm = next.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm <= 1e-12 {
            return vec![0.0; dims];
        }
        for value in &mut next {
            *value /= norm;
        }
        vector = next;
    }
    vector
}

fn deflate(covariance: &mut [Vec<f64>], eigenvector: &[f64]) {
    let dims = covariance.len();
    let mut lambda = 0.0;
    for i in 0..dims {
        for j in 0..dims {
            lambda += eigenvector[i] * covariance[i][j] * eigenvector[j];
        }
    }
    for i in 0..dims {
        for j in 0..dims {
            covariance[i][j] -= lambda * eigenvector[i] * eigenvector[j];
        }
    }
    debug!("Deflated leading component (lambda={:.4})", lambda);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Three well-separated numeric blobs plus a categorical column.
    fn blob_dataset(dir: &TempDir) -> PathBuf {
        let mut lines = vec!["x,y,tier".to_string()];
        for i in 0..10 {
            lines.push(format!("{},{},low", i as f64 * 0.1, i as f64 * 0.1));
        }
        for i in 0..10 {
            lines.push(format!("{},{},mid", 10.0 + i as f64 * 0.1, 10.0 + i as f64 * 0.1));
        }
        for i in 0..10 {
            lines.push(format!("{},{},high", 20.0 + i as f64 * 0.1, 20.0 + i as f64 * 0.1));
        }
        write_csv(dir, "blobs.csv", &(lines.join("\n") + "\n"))
    }

    #[test]
    fn test_clustered_artifact_name_is_idempotent() {
        let plain = clustered_artifact_path(Path::new("/tmp/data.csv"));
        assert_eq!(plain, Path::new("/tmp/data_clustered.csv"));

        let already = clustered_artifact_path(Path::new("/tmp/data_clustered.csv"));
        assert_eq!(already, Path::new("/tmp/data_clustered.csv"));
    }

    #[test]
    fn test_cluster_output_has_projection_and_labels() {
        let dir = TempDir::new().unwrap();
        let path = blob_dataset(&dir);

        let summary = cluster_dataset(&path, &ClusterOptions::default()).unwrap();
        assert_eq!(summary.k, 3);
        assert_eq!(summary.output_path, dir.path().join("blobs_clustered.csv"));
        assert_eq!(summary.cluster_sizes.iter().sum::<usize>(), 30);

        let frame = Frame::load(&summary.output_path).unwrap();
        for column in [COORD_X, COORD_Y, CLUSTER_LABEL] {
            assert!(frame.column_index(column).is_some(), "missing {}", column);
        }

        let label_idx = frame.column_index(CLUSTER_LABEL).unwrap();
        let labels = frame.text_values(label_idx).unwrap();
        for label in labels.iter().flatten() {
            assert!(["0", "1", "2"].contains(&label.as_str()));
        }
    }

    #[test]
    fn test_three_blobs_separate_into_three_clusters() {
        let dir = TempDir::new().unwrap();
        let path = blob_dataset(&dir);

        let summary = cluster_dataset(&path, &ClusterOptions::default()).unwrap();
        assert_eq!(summary.cluster_sizes.len(), 3);
        for size in &summary.cluster_sizes {
            assert_eq!(*size, 10);
        }
    }

    #[test]
    fn test_clustering_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = blob_dataset(&dir);

        let first = cluster_dataset(&path, &ClusterOptions::default()).unwrap();
        let second = cluster_dataset(&path, &ClusterOptions::default()).unwrap();
        assert_eq!(first.cluster_sizes, second.cluster_sizes);

        let a = Frame::load(&first.output_path).unwrap();
        let b = Frame::load(&second.output_path).unwrap();
        let idx = a.column_index(CLUSTER_LABEL).unwrap();
        assert_eq!(a.text_values(idx), b.text_values(idx));
    }

    #[test]
    fn test_explicit_column_selection_after_a_drop() {
        // Two of three columns are near-duplicates; clustering on the
        // surviving pair still works.
        let dir = TempDir::new().unwrap();
        let mut lines = vec!["height,height_inches,group".to_string()];
        for row in 0..200 {
            let height = 150.0 + (row % 50) as f64;
            lines.push(format!(
                "{},{},{}",
                height,
                height / 2.54,
                row % 4
            ));
        }
        let path = write_csv(&dir, "corr.csv", &(lines.join("\n") + "\n"));

        let options = ClusterOptions {
            columns: vec!["height".to_string(), "group".to_string()],
            ..ClusterOptions::default()
        };
        let summary = cluster_dataset(&path, &options).unwrap();
        assert_eq!(summary.feature_columns, vec!["height", "group"]);
        assert_eq!(summary.cluster_sizes.iter().sum::<usize>(), 200);

        let frame = Frame::load(&summary.output_path).unwrap();
        let labels = frame
            .text_values(frame.column_index(CLUSTER_LABEL).unwrap())
            .unwrap();
        for label in labels.iter().flatten() {
            assert!(["0", "1", "2"].contains(&label.as_str()));
        }
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = blob_dataset(&dir);

        let options = ClusterOptions {
            columns: vec!["ghost".to_string()],
            ..ClusterOptions::default()
        };
        assert!(matches!(
            cluster_dataset(&path, &options),
            Err(DatasetError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_k_is_clamped_to_row_count() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "tiny.csv", "x\n1\n2\n");

        let options = ClusterOptions {
            k: 10,
            ..ClusterOptions::default()
        };
        let summary = cluster_dataset(&path, &options).unwrap();
        assert_eq!(summary.k, 2);
    }
}
