//! Scatter-plot preparation from clustering output.
//!
//! This does not render anything itself; it validates that the
//! artifact is plot-ready and emits the signal string the presentation
//! layer pattern-matches to draw the scatter.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::dataset::cluster::{CLUSTER_LABEL, COORD_X, COORD_Y};
use crate::dataset::{DatasetError, Frame};

/// Completion signal the presentation layer pattern-matches to render
/// the cluster scatter plot.
pub const RENDER_SCATTER_SIGNAL: &str =
    "Cluster scatter ready: render pc1/pc2 colored by cluster label.";

/// What a plot-preparation pass verified.
#[derive(Debug, Clone)]
pub struct PlotSummary {
    pub points: usize,
    /// Point count per cluster label, sorted by label.
    pub clusters: Vec<(String, usize)>,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
}

impl PlotSummary {
    pub fn report(&self) -> String {
        let clusters: Vec<String> = self
            .clusters
            .iter()
            .map(|(label, count)| format!("{}: {}", label, count))
            .collect();
        format!(
            "Scatter prepared: {} points across clusters {{{}}}, \
             x range [{:.2}, {:.2}], y range [{:.2}, {:.2}]. {}",
            self.points,
            clusters.join(", "),
            self.x_range.0,
            self.x_range.1,
            self.y_range.0,
            self.y_range.1,
            RENDER_SCATTER_SIGNAL
        )
    }
}

/// Validate that the dataset carries clustering output and summarize
/// the scatter. Missing plot columns are a refusal, not a crash.
pub fn prepare_scatter(path: &Path) -> Result<PlotSummary, DatasetError> {
    let frame = Frame::load(path)?;

    let required = [COORD_X, COORD_Y, CLUSTER_LABEL];
    let missing: Vec<String> = required
        .iter()
        .filter(|name| frame.column_index(name).is_none())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DatasetError::MissingPlotColumns(missing));
    }

    let xs = coordinate_values(&frame, COORD_X)?;
    let ys = coordinate_values(&frame, COORD_Y)?;

    let label_idx = frame.column_index(CLUSTER_LABEL).expect("checked above");
    let mut clusters: BTreeMap<String, usize> = BTreeMap::new();
    match frame.text_values(label_idx) {
        Some(labels) => {
            for label in labels.iter().flatten() {
                *clusters.entry(label.clone()).or_insert(0) += 1;
            }
        }
        None => {
            // Label column round-trips as numeric when labels are digits.
            if let Some(values) = frame.numeric_values(label_idx) {
                for value in values.iter().flatten() {
                    *clusters.entry(format!("{}", value)).or_insert(0) += 1;
                }
            }
        }
    }

    let summary = PlotSummary {
        points: frame.row_count(),
        clusters: clusters.into_iter().collect(),
        x_range: range_of(&xs),
        y_range: range_of(&ys),
    };
    info!(
        "Scatter prepared from {} ({} points, {} clusters)",
        path.display(),
        summary.points,
        summary.clusters.len()
    );
    Ok(summary)
}

fn coordinate_values(frame: &Frame, name: &str) -> Result<Vec<f64>, DatasetError> {
    let idx = frame
        .column_index(name)
        .ok_or_else(|| DatasetError::MissingPlotColumns(vec![name.to_string()]))?;
    frame
        .numeric_values(idx)
        .map(|values| values.iter().flatten().copied().collect())
        .ok_or_else(|| DatasetError::MissingPlotColumns(vec![name.to_string()]))
}

fn range_of(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min.is_finite() {
        (min, max)
    } else {
        (0.0, 0.0)
    }
}
