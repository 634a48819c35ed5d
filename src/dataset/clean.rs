//! Dataset cleaning: column drops, null handling, outlier removal.
//!
//! The outlier stage enforces a retention floor: the cleaned dataset
//! never keeps fewer than max(ceil(min_fraction * rows), min_rows)
//! rows. When the naive fence rule would cut deeper, the rows with the
//! fewest fence violations are retained instead; when the floor cannot
//! be met at all, the removal is refused and reported.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::dataset::{artifact_path, mean, median, mode, quantile, Column, DatasetError, Frame};
use crate::models::Disposition;

/// Strategy for filling numeric nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumericImpute {
    #[default]
    Median,
    Mean,
}

impl NumericImpute {
    /// Parse a strategy name, falling back to the default.
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "mean" => NumericImpute::Mean,
            _ => NumericImpute::Median,
        }
    }
}

/// Strategy for filling categorical nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoricalImpute {
    #[default]
    Mode,
    Constant,
}

impl CategoricalImpute {
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "constant" => CategoricalImpute::Constant,
            _ => CategoricalImpute::Mode,
        }
    }
}

/// Fill value used by `CategoricalImpute::Constant`.
const CONSTANT_FILL: &str = "missing";

/// Options for a cleaning run.
#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// Columns to drop unconditionally.
    pub drop_columns: Vec<String>,
    /// Drop a column when its null fraction exceeds this threshold.
    pub drop_null_threshold: f64,
    pub impute_numeric: NumericImpute,
    pub impute_categorical: CategoricalImpute,
    /// Apply IQR fence removal after imputation.
    pub remove_outliers: bool,
    /// Absolute retention floor in rows.
    pub min_rows: usize,
    /// Fractional retention floor relative to the input row count.
    pub min_fraction: f64,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            drop_columns: Vec::new(),
            drop_null_threshold: 0.5,
            impute_numeric: NumericImpute::default(),
            impute_categorical: CategoricalImpute::default(),
            remove_outliers: true,
            min_rows: 5,
            min_fraction: 0.1,
        }
    }
}

impl From<&crate::config::AnalysisConfig> for CleanOptions {
    fn from(config: &crate::config::AnalysisConfig) -> Self {
        Self {
            drop_columns: Vec::new(),
            drop_null_threshold: config.drop_null_threshold,
            impute_numeric: NumericImpute::default(),
            impute_categorical: CategoricalImpute::default(),
            remove_outliers: true,
            min_rows: config.min_retained_rows,
            min_fraction: config.min_retained_fraction,
        }
    }
}

/// What a cleaning run did.
#[derive(Debug, Clone)]
pub struct CleanSummary {
    pub output_path: PathBuf,
    pub rows_before: usize,
    pub rows_after: usize,
    pub dropped_columns: Vec<String>,
    pub sparse_columns_dropped: Vec<String>,
    pub imputed_cells: usize,
    pub outlier_rows_removed: usize,
    /// Guardrail refusals and adjustments.
    pub warnings: Vec<String>,
}

impl CleanSummary {
    pub fn disposition(&self) -> Disposition {
        if self.warnings.is_empty() {
            Disposition::Success
        } else {
            Disposition::PartialSuccess
        }
    }

    pub fn report(&self) -> String {
        let mut report = format!(
            "Cleaning complete: {} of {} rows retained, saved to {}.",
            self.rows_after,
            self.rows_before,
            self.output_path.display()
        );
        if !self.dropped_columns.is_empty() {
            report.push_str(&format!(" Dropped columns: {}.", self.dropped_columns.join(", ")));
        }
        if !self.sparse_columns_dropped.is_empty() {
            report.push_str(&format!(
                " Dropped sparse columns: {}.",
                self.sparse_columns_dropped.join(", ")
            ));
        }
        if self.imputed_cells > 0 {
            report.push_str(&format!(" Imputed {} null cells.", self.imputed_cells));
        }
        if self.outlier_rows_removed > 0 {
            report.push_str(&format!(
                " Removed {} outlier rows.",
                self.outlier_rows_removed
            ));
        }
        for warning in &self.warnings {
            report.push_str(&format!(" Warning: {}", warning));
        }
        report
    }
}

/// Path the cleaned artifact is written to. Already-cleaned inputs map
/// to themselves so the marker never compounds.
pub fn cleaned_artifact_path(path: &Path) -> PathBuf {
    artifact_path(path, "_cleaned")
}

/// Clean the dataset at `path` and write a `_cleaned` artifact.
pub fn clean_dataset(path: &Path, options: &CleanOptions) -> Result<CleanSummary, DatasetError> {
    let mut frame = Frame::load(path)?;
    let rows_before = frame.row_count();
    let mut warnings = Vec::new();

    let dropped_columns = frame.drop_columns(&options.drop_columns);
    let missing: Vec<&String> = options
        .drop_columns
        .iter()
        .filter(|name| !dropped_columns.contains(name))
        .collect();
    if !missing.is_empty() {
        warnings.push(format!(
            "requested drop of unknown columns ignored: {}.",
            missing
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    let sparse_columns_dropped = drop_sparse_columns(&mut frame, options.drop_null_threshold);
    if frame.column_count() == 0 {
        return Err(DatasetError::NoFeatures("cleaning"));
    }

    let imputed_cells = impute_nulls(
        &mut frame,
        options.impute_numeric,
        options.impute_categorical,
    );

    let mut outlier_rows_removed = 0;
    if options.remove_outliers {
        outlier_rows_removed = remove_outlier_rows(
            &mut frame,
            options.min_rows,
            options.min_fraction,
            &mut warnings,
        );
    }

    let output_path = cleaned_artifact_path(path);
    frame.save_atomic(&output_path)?;
    info!(
        "Cleaned {} -> {} ({} of {} rows)",
        path.display(),
        output_path.display(),
        frame.row_count(),
        rows_before
    );

    Ok(CleanSummary {
        output_path,
        rows_before,
        rows_after: frame.row_count(),
        dropped_columns,
        sparse_columns_dropped,
        imputed_cells,
        outlier_rows_removed,
        warnings,
    })
}

/// Drop columns whose null fraction exceeds the threshold.
fn drop_sparse_columns(frame: &mut Frame, threshold: f64) -> Vec<String> {
    let rows = frame.row_count() as f64;
    let sparse: Vec<String> = frame
        .headers()
        .iter()
        .enumerate()
        .filter(|(idx, _)| {
            let non_null = frame.column(*idx).non_null_count() as f64;
            rows - non_null > rows * threshold
        })
        .map(|(_, name)| name.clone())
        .collect();

    // Refuse to strip the frame down to nothing.
    if sparse.len() == frame.column_count() {
        return Vec::new();
    }
    frame.drop_columns(&sparse)
}

/// Fill nulls in place; returns how many cells were filled.
fn impute_nulls(
    frame: &mut Frame,
    numeric: NumericImpute,
    categorical: CategoricalImpute,
) -> usize {
    let mut imputed = 0;
    for idx in 0..frame.column_count() {
        match frame.column_mut(idx) {
            Column::Numeric(values) => {
                let present: Vec<f64> = values.iter().flatten().copied().collect();
                let fill = match numeric {
                    NumericImpute::Median => median(&present),
                    NumericImpute::Mean => mean(&present),
                };
                if let Some(fill) = fill {
                    for cell in values.iter_mut().filter(|c| c.is_none()) {
                        *cell = Some(fill);
                        imputed += 1;
                    }
                }
            }
            Column::Text(values) => {
                let fill = match categorical {
                    CategoricalImpute::Mode => mode(values.iter().flatten()),
                    CategoricalImpute::Constant => Some(CONSTANT_FILL.to_string()),
                };
                if let Some(fill) = fill {
                    for cell in values.iter_mut().filter(|c| c.is_none()) {
                        *cell = Some(fill.clone());
                        imputed += 1;
                    }
                }
            }
        }
    }
    imputed
}

/// Remove rows outside the 1.5 IQR fences of any numeric column,
/// honoring the retention floor. Returns the number of rows removed.
fn remove_outlier_rows(
    frame: &mut Frame,
    min_rows: usize,
    min_fraction: f64,
    warnings: &mut Vec<String>,
) -> usize {
    let rows = frame.row_count();
    let floor = retention_floor(rows, min_rows, min_fraction);

    if floor > rows {
        warnings.push(format!(
            "outlier removal refused: dataset has {} rows, below the minimum retention floor of {}.",
            rows, floor
        ));
        return 0;
    }

    let mut violations = vec![0usize; rows];
    let mut fenced_columns = 0;
    for idx in 0..frame.column_count() {
        let Some(values) = frame.numeric_values(idx) else {
            continue;
        };
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let (Some(q1), Some(q3)) = (quantile(&present, 0.25), quantile(&present, 0.75)) else {
            continue;
        };
        let iqr = q3 - q1;
        let lower = q1 - 1.5 * iqr;
        let upper = q3 + 1.5 * iqr;
        fenced_columns += 1;

        for (row, cell) in values.iter().enumerate() {
            if let Some(value) = cell {
                if *value < lower || *value > upper {
                    violations[row] += 1;
                }
            }
        }
    }

    if fenced_columns == 0 {
        return 0;
    }

    let clean_rows = violations.iter().filter(|v| **v == 0).count();
    let keep: Vec<bool> = if clean_rows >= floor {
        violations.iter().map(|v| *v == 0).collect()
    } else {
        // Largest safe subset: rows ranked by violation count, earliest
        // rows first on ties, topped up to the floor.
        let mut ranked: Vec<usize> = (0..rows).collect();
        ranked.sort_by_key(|row| (violations[*row], *row));
        let mut keep = vec![false; rows];
        for row in ranked.into_iter().take(floor) {
            keep[row] = true;
        }
        warnings.push(format!(
            "outlier fences matched too many rows ({} clean of {}); retained the {} least affected rows instead.",
            clean_rows, rows, floor
        ));
        keep
    };

    let kept = keep.iter().filter(|k| **k).count();
    if kept < rows {
        frame.retain_rows(&keep);
        debug!("Outlier stage removed {} of {} rows", rows - kept, rows);
    }
    rows - kept
}

/// max(ceil(min_fraction * rows), min_rows)
fn retention_floor(rows: usize, min_rows: usize, min_fraction: f64) -> usize {
    let fractional = (rows as f64 * min_fraction).ceil() as usize;
    fractional.max(min_rows)
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
    fn test_cleaned_artifact_name_is_idempotent() {
        let plain = cleaned_artifact_path(Path::new("/tmp/sales.csv"));
        assert_eq!(plain, Path::new("/tmp/sales_cleaned.csv"));

        let already = cleaned_artifact_path(Path::new("/tmp/sales_cleaned.csv"));
        assert_eq!(already, Path::new("/tmp/sales_cleaned.csv"));
    }

    #[test]
    fn test_cleaning_twice_never_compounds_suffix() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            &dir,
            "data.csv",
            "a,b\n1,x\n2,y\n3,z\n4,x\n5,y\n6,z\n7,x\n",
        );

        let options = CleanOptions::default();
        let first = clean_dataset(&path, &options).unwrap();
        assert_eq!(first.output_path, dir.path().join("data_cleaned.csv"));

        let second = clean_dataset(&first.output_path, &options).unwrap();
        assert_eq!(second.output_path, first.output_path);
        assert!(!dir.path().join("data_cleaned_cleaned.csv").exists());
    }

    #[test]
    fn test_imputation_fills_numeric_and_text_nulls() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            &dir,
            "data.csv",
            "score,city\n1,Austin\n3,\n5,Austin\n,Boston\n9,Austin\n",
        );

        let options = CleanOptions {
            remove_outliers: false,
            ..CleanOptions::default()
        };
        let summary = clean_dataset(&path, &options).unwrap();
        assert_eq!(summary.imputed_cells, 2);
        assert_eq!(summary.rows_after, 5);

        let frame = Frame::load(&summary.output_path).unwrap();
        let scores = frame.numeric_values(0).unwrap();
        // Median of [1, 3, 5, 9] is 4.
        assert_eq!(scores[3], Some(4.0));
        let cities = frame.text_values(1).unwrap();
        assert_eq!(cities[1].as_deref(), Some("Austin"));
    }

    #[test]
    fn test_sparse_columns_are_dropped() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            &dir,
            "data.csv",
            "keep,sparse\n1,\n2,\n3,\n4,9\n5,\n6,\n",
        );

        let options = CleanOptions {
            remove_outliers: false,
            ..CleanOptions::default()
        };
        let summary = clean_dataset(&path, &options).unwrap();
        assert_eq!(summary.sparse_columns_dropped, vec!["sparse".to_string()]);

        let frame = Frame::load(&summary.output_path).unwrap();
        assert_eq!(frame.headers(), &["keep"]);
    }

    #[test]
    fn test_retention_floor_values() {
        assert_eq!(retention_floor(200, 5, 0.1), 20);
        assert_eq!(retention_floor(20, 5, 0.1), 5);
        assert_eq!(retention_floor(4, 5, 0.1), 5);
    }

    #[test]
    fn test_small_dataset_refuses_outlier_removal() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "tiny.csv", "x\n1\n2\n3\n1000\n");

        let summary = clean_dataset(&path, &CleanOptions::default()).unwrap();
        assert_eq!(summary.rows_after, 4);
        assert_eq!(summary.outlier_rows_removed, 0);
        assert_eq!(summary.disposition(), Disposition::PartialSuccess);
        assert!(summary.warnings.iter().any(|w| w.contains("retention floor")));
    }

    #[test]
    fn test_outlier_removal_never_breaks_the_floor() {
        // Five columns, each flagging a distinct block of four rows as
        // outliers (IQR collapses to zero on the sixteen zeros), so no
        // row is violation-free. The fallback must keep exactly the
        // floor of five rows.
        let rows = 20;
        let mut lines = vec!["c0,c1,c2,c3,c4".to_string()];
        for row in 0..rows {
            let cells: Vec<String> = (0..5)
                .map(|col| {
                    if row / 4 == col {
                        "1000000".to_string()
                    } else {
                        "0".to_string()
                    }
                })
                .collect();
            lines.push(cells.join(","));
        }
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "blocks.csv", &(lines.join("\n") + "\n"));

        let summary = clean_dataset(&path, &CleanOptions::default()).unwrap();
        assert_eq!(summary.rows_before, 20);
        assert_eq!(summary.rows_after, 5);
        assert_eq!(summary.disposition(), Disposition::PartialSuccess);
    }

    #[test]
    fn test_moderate_outliers_are_removed_normally() {
        let mut lines = vec!["x".to_string()];
        for value in 1..=19 {
            lines.push(value.to_string());
        }
        lines.push("100000".to_string());
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "one_spike.csv", &(lines.join("\n") + "\n"));

        let summary = clean_dataset(&path, &CleanOptions::default()).unwrap();
        assert_eq!(summary.rows_before, 20);
        assert_eq!(summary.rows_after, 19);
        assert_eq!(summary.outlier_rows_removed, 1);
        assert_eq!(summary.disposition(), Disposition::Success);
    }

    #[test]
    fn test_unknown_drop_request_is_a_warning_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "data.csv", "a,b\n1,2\n3,4\n5,6\n7,8\n9,10\n");

        let options = CleanOptions {
            drop_columns: vec!["b".to_string(), "ghost".to_string()],
            remove_outliers: false,
            ..CleanOptions::default()
        };
        let summary = clean_dataset(&path, &options).unwrap();
        assert_eq!(summary.dropped_columns, vec!["b".to_string()]);
        assert!(summary.warnings.iter().any(|w| w.contains("ghost")));
    }
}
