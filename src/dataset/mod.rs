//! Dataset access and the operations workers run against it.
//!
//! A dataset is a headered CSV artifact on disk. `Frame` loads it into
//! typed columns, and the operation submodules (clean, explore, cluster,
//! plot) each transform or inspect a frame and report what they did.
//! All artifact writes go through `Frame::save_atomic` so a cancelled
//! operation can never leave a half-written file behind.

pub mod clean;
pub mod cluster;
pub mod explore;
pub mod plot;

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors raised by dataset operations.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {}", path.display(), source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {}", path.display(), source)]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("dataset {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("no usable feature columns for {0}")]
    NoFeatures(&'static str),

    #[error("missing plot-ready columns: {}", .0.join(", "))]
    MissingPlotColumns(Vec<String>),
}

/// A single typed column. Empty cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn non_null_count(&self) -> usize {
        match self {
            Column::Numeric(v) => v.iter().filter(|c| c.is_some()).count(),
            Column::Text(v) => v.iter().filter(|c| c.is_some()).count(),
        }
    }
}

/// An in-memory tabular dataset backed by a CSV artifact.
#[derive(Debug, Clone)]
pub struct Frame {
    headers: Vec<String>,
    columns: Vec<Column>,
    rows: usize,
}

impl Frame {
    /// Load a CSV dataset. A column is numeric when every non-empty
    /// cell parses as a float and at least one cell is non-empty.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        if !path.exists() {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|source| DatasetError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|source| DatasetError::Parse {
                path: path.to_path_buf(),
                source,
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        let mut rows = 0usize;

        for record in reader.records() {
            let record = record.map_err(|source| DatasetError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            for (idx, column) in cells.iter_mut().enumerate() {
                let raw = record.get(idx).unwrap_or("").trim();
                column.push(if raw.is_empty() {
                    None
                } else {
                    Some(raw.to_string())
                });
            }
            rows += 1;
        }

        if rows == 0 || headers.is_empty() {
            return Err(DatasetError::Empty(path.to_path_buf()));
        }

        let columns = cells.into_iter().map(Self::infer_column).collect();
        debug!("Loaded {} ({} rows, {} columns)", path.display(), rows, headers.len());

        Ok(Self {
            headers,
            columns,
            rows,
        })
    }

    fn infer_column(cells: Vec<Option<String>>) -> Column {
        let mut any_value = false;
        let numeric = cells.iter().all(|cell| match cell {
            Some(raw) => {
                any_value = true;
                raw.parse::<f64>().is_ok()
            }
            None => true,
        });

        if numeric && any_value {
            Column::Numeric(
                cells
                    .into_iter()
                    .map(|cell| cell.and_then(|raw| raw.parse::<f64>().ok()))
                    .collect(),
            )
        } else {
            Column::Text(cells)
        }
    }

    /// Write the frame to `path` atomically: the CSV is produced in a
    /// temporary file in the target directory and then renamed over.
    pub fn save_atomic(&self, path: &Path) -> Result<(), DatasetError> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir),
            None => tempfile::NamedTempFile::new(),
        }
        .map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        {
            let mut writer = csv::WriterBuilder::new().from_writer(&mut tmp);
            writer
                .write_record(&self.headers)
                .map_err(|source| DatasetError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;

            for row in 0..self.rows {
                let record: Vec<String> = self
                    .columns
                    .iter()
                    .map(|column| match column {
                        Column::Numeric(v) => {
                            v[row].map(|x| format_cell(x)).unwrap_or_default()
                        }
                        Column::Text(v) => v[row].clone().unwrap_or_default(),
                    })
                    .collect();
                writer
                    .write_record(&record)
                    .map_err(|source| DatasetError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }

            writer.flush().map_err(|source| DatasetError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        tmp.persist(path).map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e.error,
        })?;

        debug!("Wrote {} ({} rows)", path.display(), self.rows);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub(crate) fn column_mut(&mut self, idx: usize) -> &mut Column {
        &mut self.columns[idx]
    }

    pub fn is_numeric(&self, idx: usize) -> bool {
        matches!(self.columns[idx], Column::Numeric(_))
    }

    pub fn numeric_values(&self, idx: usize) -> Option<&[Option<f64>]> {
        match &self.columns[idx] {
            Column::Numeric(v) => Some(v),
            Column::Text(_) => None,
        }
    }

    pub fn text_values(&self, idx: usize) -> Option<&[Option<String>]> {
        match &self.columns[idx] {
            Column::Text(v) => Some(v),
            Column::Numeric(_) => None,
        }
    }

    /// Names of the numeric columns, in header order.
    pub fn numeric_column_names(&self) -> Vec<String> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.is_numeric(*idx))
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Drop the named columns, returning the names actually removed.
    pub fn drop_columns(&mut self, names: &[String]) -> Vec<String> {
        let mut dropped = Vec::new();
        for name in names {
            if let Some(idx) = self.column_index(name) {
                self.headers.remove(idx);
                self.columns.remove(idx);
                dropped.push(name.clone());
            }
        }
        dropped
    }

    /// Keep only the rows flagged `true` in `keep`.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        assert_eq!(keep.len(), self.rows);
        for column in &mut self.columns {
            match column {
                Column::Numeric(v) => {
                    let mut idx = 0;
                    v.retain(|_| {
                        let kept = keep[idx];
                        idx += 1;
                        kept
                    });
                }
                Column::Text(v) => {
                    let mut idx = 0;
                    v.retain(|_| {
                        let kept = keep[idx];
                        idx += 1;
                        kept
                    });
                }
            }
        }
        self.rows = keep.iter().filter(|k| **k).count();
    }

    /// Replace or append a numeric column.
    pub fn set_numeric_column(&mut self, name: &str, values: Vec<f64>) {
        assert_eq!(values.len(), self.rows);
        let column = Column::Numeric(values.into_iter().map(Some).collect());
        match self.column_index(name) {
            Some(idx) => self.columns[idx] = column,
            None => {
                self.headers.push(name.to_string());
                self.columns.push(column);
            }
        }
    }

    /// Replace or append a categorical label column.
    pub fn set_label_column(&mut self, name: &str, labels: Vec<String>) {
        assert_eq!(labels.len(), self.rows);
        let column = Column::Text(labels.into_iter().map(Some).collect());
        match self.column_index(name) {
            Some(idx) => self.columns[idx] = column,
            None => {
                self.headers.push(name.to_string());
                self.columns.push(column);
            }
        }
    }
}

/// Derived artifact path with an idempotent marker suffix: a stem that
/// already carries the suffix maps to the same path instead of
/// compounding it.
pub(crate) fn artifact_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if stem.ends_with(suffix) {
        return path.to_path_buf();
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "csv".to_string());
    path.with_file_name(format!("{}{}.{}", stem, suffix, ext))
}

fn format_cell(value: f64) -> String {
    if value.is_finite() {
        format!("{}", value)
    } else {
        String::new()
    }
}

/// Mean of a sample. `None` when empty.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median via the 0.5 quantile.
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Linearly interpolated quantile over a copy of the sample.
pub(crate) fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        Some(sorted[lower])
    } else {
        let weight = pos - lower as f64;
        Some(sorted[lower] + weight * (sorted[upper] - sorted[lower]))
    }
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if values.is_empty() {
        return None;
    }
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Most frequent value; ties break to the lexicographically smallest.
pub(crate) fn mode<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for value in values {
        *counts.entry(value.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(value, _)| value.to_string())
}

/// Pearson correlation of two equally long samples. `None` when fewer
/// than two points or either sample has zero variance.
pub(crate) fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n < 2 || ys.len() != n {
        return None;
    }
    let mx = xs.iter().sum::<f64>() / n as f64;
    let my = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for i in 0..n {
        let dx = xs[i] - mx;
        let dy = ys[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }

    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
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

    #[test]
    fn test_load_infers_column_types() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "data.csv", "age,city,score\n31,Austin,4.5\n28,Boston,3.2\n,Austin,5.0\n");

        let frame = Frame::load(&path).unwrap();
        assert_eq!(frame.row_count(), 3);
        assert_eq!(frame.headers(), &["age", "city", "score"]);
        assert!(frame.is_numeric(0));
        assert!(!frame.is_numeric(1));
        assert!(frame.is_numeric(2));

        // Empty cell becomes a null, not a parse failure.
        assert_eq!(frame.numeric_values(0).unwrap()[2], None);
    }

    #[test]
    fn test_load_missing_and_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.csv");
        assert!(matches!(
            Frame::load(&missing),
            Err(DatasetError::NotFound(_))
        ));

        let empty = write_csv(&dir, "empty.csv", "a,b\n");
        assert!(matches!(Frame::load(&empty), Err(DatasetError::Empty(_))));
    }

    #[test]
    fn test_save_atomic_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "data.csv", "x,label\n1.5,a\n2,b\n");

        let frame = Frame::load(&path).unwrap();
        let out = dir.path().join("copy.csv");
        frame.save_atomic(&out).unwrap();

        let reloaded = Frame::load(&out).unwrap();
        assert_eq!(reloaded.row_count(), 2);
        assert_eq!(reloaded.numeric_values(0).unwrap()[0], Some(1.5));
        assert_eq!(
            reloaded.text_values(1).unwrap()[1].as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_retain_rows_and_drop_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "data.csv", "a,b,c\n1,x,10\n2,y,20\n3,z,30\n");

        let mut frame = Frame::load(&path).unwrap();
        frame.retain_rows(&[true, false, true]);
        assert_eq!(frame.row_count(), 2);
        assert_eq!(frame.numeric_values(0).unwrap(), &[Some(1.0), Some(3.0)]);

        let dropped = frame.drop_columns(&["b".to_string(), "missing".to_string()]);
        assert_eq!(dropped, vec!["b".to_string()]);
        assert_eq!(frame.headers(), &["a", "c"]);
    }

    #[test]
    fn test_quantile_and_median() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&values, 0.25), Some(1.75));
        assert_eq!(median(&values), Some(2.5));
        assert_eq!(quantile(&[5.0], 0.75), Some(5.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_mode_breaks_ties_deterministically() {
        let values = vec!["b".to_string(), "a".to_string()];
        assert_eq!(mode(values.iter()), Some("a".to_string()));

        let values = vec!["b".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(mode(values.iter()), Some("b".to_string()));
    }

    #[test]
    fn test_pearson_perfect_and_degenerate() {
        let xs = [1.0, 2.0, 3.0];
        let inverse = [6.0, 4.0, 2.0];
        let r = pearson(&xs, &inverse).unwrap();
        assert!((r + 1.0).abs() < 1e-12);

        let flat = [2.0, 2.0, 2.0];
        assert_eq!(pearson(&xs, &flat), None);
    }
}
