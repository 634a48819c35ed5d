//! Exploratory analysis: correlation scan and drop suggestions.

use std::path::Path;

use tracing::info;

use crate::dataset::{pearson, DatasetError, Frame};

/// Completion signal the presentation layer pattern-matches to render
/// the correlation heatmap and feature distributions.
pub const RENDER_EDA_SIGNAL: &str =
    "EDA figures ready: render correlation heatmap and feature distributions.";

/// A pair of columns whose correlation magnitude crossed the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedPair {
    pub first: String,
    pub second: String,
    pub r: f64,
}

/// What an exploratory pass found.
#[derive(Debug, Clone)]
pub struct ExploreSummary {
    pub rows: usize,
    pub columns: usize,
    pub numeric_columns: Vec<String>,
    pub correlated_pairs: Vec<CorrelatedPair>,
    /// Columns suggested for dropping (second member of each flagged
    /// pair). Suggested only, never dropped here.
    pub drop_suggestions: Vec<String>,
}

impl ExploreSummary {
    pub fn report(&self) -> String {
        let mut report = format!(
            "EDA complete: {} rows, {} columns ({} numeric).",
            self.rows,
            self.columns,
            self.numeric_columns.len()
        );
        if self.correlated_pairs.is_empty() {
            report.push_str(" No extreme collinearity detected.");
        } else {
            let pairs: Vec<String> = self
                .correlated_pairs
                .iter()
                .map(|p| format!("{} & {} (r={:.2})", p.first, p.second, p.r))
                .collect();
            report.push_str(&format!(" High correlations: {}.", pairs.join(", ")));
            report.push_str(&format!(
                " Suggested drops to reduce collinearity: {}.",
                self.drop_suggestions.join(", ")
            ));
        }
        report.push(' ');
        report.push_str(RENDER_EDA_SIGNAL);
        report
    }
}

/// Scan the dataset for high pairwise correlations among numeric
/// columns. Flags |r| above `threshold`; suggestions are emitted, the
/// columns themselves are left untouched.
pub fn explore_dataset(path: &Path, threshold: f64) -> Result<ExploreSummary, DatasetError> {
    let frame = Frame::load(path)?;

    let numeric: Vec<(usize, String)> = frame
        .headers()
        .iter()
        .enumerate()
        .filter(|(idx, _)| frame.is_numeric(*idx))
        .map(|(idx, name)| (idx, name.clone()))
        .collect();

    if numeric.is_empty() {
        return Err(DatasetError::NoFeatures("exploratory analysis"));
    }

    let mut correlated_pairs = Vec::new();
    let mut drop_suggestions: Vec<String> = Vec::new();

    for i in 0..numeric.len() {
        for j in (i + 1)..numeric.len() {
            let (idx_a, name_a) = &numeric[i];
            let (idx_b, name_b) = &numeric[j];

            // Pairwise-complete observations only.
            let mut xs = Vec::new();
            let mut ys = Vec::new();
            let a = frame.numeric_values(*idx_a).unwrap_or(&[]);
            let b = frame.numeric_values(*idx_b).unwrap_or(&[]);
            for row in 0..frame.row_count() {
                if let (Some(x), Some(y)) = (a[row], b[row]) {
                    xs.push(x);
                    ys.push(y);
                }
            }

            if let Some(r) = pearson(&xs, &ys) {
                if r.abs() > threshold {
                    correlated_pairs.push(CorrelatedPair {
                        first: name_a.clone(),
                        second: name_b.clone(),
                        r,
                    });
                    if !drop_suggestions.contains(name_b) {
                        drop_suggestions.push(name_b.clone());
                    }
                }
            }
        }
    }

    info!(
        "EDA on {}: {} numeric columns, {} flagged pairs",
        path.display(),
        numeric.len(),
        correlated_pairs.len()
    );

    Ok(ExploreSummary {
        rows: frame.row_count(),
        columns: frame.column_count(),
        numeric_columns: numeric.into_iter().map(|(_, name)| name).collect(),
        correlated_pairs,
        drop_suggestions,
    })
}
