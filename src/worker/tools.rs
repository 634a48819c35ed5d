//! Tool definitions and execution for the specialist workers.
//!
//! Each worker sees only its own tools plus `finish_task`. Tool
//! results carry the declared artifact path separately from the text
//! output; that structured channel is the only way a worker run can
//! move the session's active dataset reference.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::dataset::clean::{clean_dataset, CategoricalImpute, CleanOptions, NumericImpute};
use crate::dataset::cluster::{cluster_dataset, ClusterOptions};
use crate::dataset::explore::explore_dataset;
use crate::dataset::plot::prepare_scatter;
use crate::llm::{FunctionDefinition, ToolDefinition};
use crate::models::{Disposition, WorkerKind};

/// Explicit completion tool every worker carries.
pub const FINISH_TOOL: &str = "finish_task";

/// Result of executing a single worker tool.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
    /// Artifact declared by the operation, if it produced one.
    pub new_dataset: Option<PathBuf>,
}

impl ToolOutcome {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            new_dataset: None,
        }
    }

    fn artifact(output: impl Into<String>, path: PathBuf) -> Self {
        Self {
            success: true,
            output: output.into(),
            new_dataset: Some(path),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: format!("Error: {}", message.into()),
            new_dataset: None,
        }
    }
}

/// Executes tool calls against the dataset operations and tracks what
/// the invocation accomplished.
pub struct ToolExecutor {
    analysis: AnalysisConfig,
    active_dataset: PathBuf,
    latest_artifact: Option<PathBuf>,
    finished: bool,
    successes: usize,
    failures: usize,
    had_warnings: bool,
    findings: Vec<String>,
}

impl ToolExecutor {
    pub fn new(analysis: AnalysisConfig, active_dataset: PathBuf) -> Self {
        Self {
            analysis,
            active_dataset,
            latest_artifact: None,
            finished: false,
            successes: 0,
            failures: 0,
            had_warnings: false,
            findings: Vec::new(),
        }
    }

    /// Execute a tool call for the given worker.
    pub fn execute(&mut self, worker: WorkerKind, name: &str, args: &Value) -> ToolOutcome {
        debug!("Executing tool {} for {} with args {:?}", name, worker, args);

        if name == FINISH_TOOL {
            self.finished = true;
            return ToolOutcome::ok("done");
        }

        if !worker_tool_names(worker).contains(&name) {
            return ToolOutcome::error(format!(
                "tool '{}' is not available to the {} worker",
                name, worker
            ));
        }

        match name {
            "clean_data" => self.clean(args),
            "explore_data" => self.explore(args),
            "cluster_data" => self.cluster(args),
            "render_plot" => self.plot(args),
            other => ToolOutcome::error(format!("unknown tool: {}", other)),
        }
    }

    /// True once `finish_task` was called (or completion was marked
    /// from a recognized completion phrase).
    pub fn finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
    }

    /// The most recently declared artifact, if any.
    pub fn latest_artifact(&self) -> Option<&PathBuf> {
        self.latest_artifact.as_ref()
    }

    pub fn findings(&self) -> &[String] {
        &self.findings
    }

    pub fn operation_count(&self) -> usize {
        self.successes + self.failures
    }

    /// Disposition of the whole invocation given what the tools did.
    pub fn disposition(&self) -> Disposition {
        if self.successes == 0 {
            Disposition::Failure
        } else if self.had_warnings || self.failures > 0 {
            Disposition::PartialSuccess
        } else {
            Disposition::Success
        }
    }

    /// Target path for an operation: the model's explicit choice, else
    /// the newest artifact from this invocation, else the injected
    /// active dataset.
    fn resolve_path(&self, args: &Value) -> PathBuf {
        args.get("file_path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .or_else(|| self.latest_artifact.clone())
            .unwrap_or_else(|| self.active_dataset.clone())
    }

    fn clean(&mut self, args: &Value) -> ToolOutcome {
        let path = self.resolve_path(args);
        let options = CleanOptions {
            drop_columns: string_list(args, "drop_columns"),
            drop_null_threshold: args
                .get("drop_null_threshold")
                .and_then(|v| v.as_f64())
                .unwrap_or(self.analysis.drop_null_threshold),
            impute_numeric: args
                .get("impute_numeric")
                .and_then(|v| v.as_str())
                .map(NumericImpute::parse)
                .unwrap_or_default(),
            impute_categorical: args
                .get("impute_categorical")
                .and_then(|v| v.as_str())
                .map(CategoricalImpute::parse)
                .unwrap_or_default(),
            remove_outliers: args
                .get("remove_outliers")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            min_rows: self.analysis.min_retained_rows,
            min_fraction: self.analysis.min_retained_fraction,
        };

        match clean_dataset(&path, &options) {
            Ok(summary) => {
                self.successes += 1;
                if !summary.warnings.is_empty() {
                    self.had_warnings = true;
                    self.findings.extend(summary.warnings.iter().cloned());
                }
                if !summary.dropped_columns.is_empty() {
                    self.findings
                        .push(format!("dropped columns: {}", summary.dropped_columns.join(", ")));
                }
                self.latest_artifact = Some(summary.output_path.clone());
                ToolOutcome::artifact(summary.report(), summary.output_path.clone())
            }
            Err(e) => {
                self.failures += 1;
                ToolOutcome::error(e.to_string())
            }
        }
    }

    fn explore(&mut self, args: &Value) -> ToolOutcome {
        let path = self.resolve_path(args);
        match explore_dataset(&path, self.analysis.correlation_threshold) {
            Ok(summary) => {
                self.successes += 1;
                for pair in &summary.correlated_pairs {
                    self.findings.push(format!(
                        "high correlation: {} & {} (r={:.2})",
                        pair.first, pair.second, pair.r
                    ));
                }
                if !summary.drop_suggestions.is_empty() {
                    self.findings.push(format!(
                        "suggested drops: {}",
                        summary.drop_suggestions.join(", ")
                    ));
                }
                ToolOutcome::ok(summary.report())
            }
            Err(e) => {
                self.failures += 1;
                ToolOutcome::error(e.to_string())
            }
        }
    }

    fn cluster(&mut self, args: &Value) -> ToolOutcome {
        let path = self.resolve_path(args);
        let options = ClusterOptions {
            columns: string_list(args, "columns"),
            k: args
                .get("k")
                .and_then(|v| v.as_u64())
                .map(|k| k as usize)
                .unwrap_or(self.analysis.default_k),
            max_iterations: 100,
        };

        match cluster_dataset(&path, &options) {
            Ok(summary) => {
                self.successes += 1;
                self.findings.push(format!(
                    "cluster sizes: {:?}",
                    summary.cluster_sizes
                ));
                self.latest_artifact = Some(summary.output_path.clone());
                ToolOutcome::artifact(summary.report(), summary.output_path.clone())
            }
            Err(e) => {
                self.failures += 1;
                ToolOutcome::error(e.to_string())
            }
        }
    }

    fn plot(&mut self, args: &Value) -> ToolOutcome {
        let path = self.resolve_path(args);
        match prepare_scatter(&path) {
            Ok(summary) => {
                self.successes += 1;
                let clusters: Vec<String> = summary
                    .clusters
                    .iter()
                    .map(|(label, count)| format!("{}={}", label, count))
                    .collect();
                self.findings
                    .push(format!("scatter clusters: {}", clusters.join(", ")));
                ToolOutcome::ok(summary.report())
            }
            Err(e) => {
                self.failures += 1;
                ToolOutcome::error(e.to_string())
            }
        }
    }
}

fn string_list(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Tool names available to a worker (excluding `finish_task`).
fn worker_tool_names(worker: WorkerKind) -> &'static [&'static str] {
    match worker {
        WorkerKind::Cleaning => &["clean_data", "explore_data"],
        WorkerKind::Clustering => &["cluster_data"],
        WorkerKind::Visualization => &["render_plot"],
    }
}

/// Tool definitions a worker is offered, in the chat API's format.
pub fn tool_definitions(worker: WorkerKind) -> Vec<ToolDefinition> {
    let mut tools: Vec<ToolDefinition> = worker_tool_names(worker)
        .iter()
        .map(|name| definition_for(name))
        .collect();
    tools.push(ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: FINISH_TOOL.to_string(),
            description: "Call this once your task is finished and summarized.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    });
    tools
}

fn definition_for(name: &str) -> ToolDefinition {
    let function = match name {
        "clean_data" => FunctionDefinition {
            name: "clean_data".to_string(),
            description: "Clean the dataset: drop listed columns, drop overly sparse columns, \
                          impute nulls, and optionally remove outlier rows. Writes a _cleaned \
                          artifact and reports its path."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path of the dataset to clean"
                    },
                    "drop_columns": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Columns to drop unconditionally"
                    },
                    "impute_numeric": {
                        "type": "string",
                        "enum": ["median", "mean"],
                        "description": "Fill strategy for numeric nulls"
                    },
                    "impute_categorical": {
                        "type": "string",
                        "enum": ["mode", "constant"],
                        "description": "Fill strategy for categorical nulls"
                    },
                    "remove_outliers": {
                        "type": "boolean",
                        "description": "Apply IQR outlier removal (default true)"
                    }
                },
                "required": ["file_path"]
            }),
        },
        "explore_data" => FunctionDefinition {
            name: "explore_data".to_string(),
            description: "Exploratory analysis: dataset shape and highly correlated column \
                          pairs with drop suggestions. Never modifies the dataset."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path of the dataset to analyze"
                    }
                },
                "required": ["file_path"]
            }),
        },
        "cluster_data" => FunctionDefinition {
            name: "cluster_data".to_string(),
            description: "K-means clustering over the selected columns. Appends pc1/pc2 \
                          projection coordinates and a cluster label column, writes a \
                          _clustered artifact and reports its path."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path of the dataset to cluster"
                    },
                    "columns": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Feature columns (default: all columns)"
                    },
                    "k": {
                        "type": "integer",
                        "description": "Cluster count (default: 3)"
                    }
                },
                "required": ["file_path"]
            }),
        },
        "render_plot" => FunctionDefinition {
            name: "render_plot".to_string(),
            description: "Validate clustering output and prepare the 2-D scatter summary. \
                          Requires pc1, pc2 and cluster columns."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path of the clustered dataset"
                    }
                },
                "required": ["file_path"]
            }),
        },
        other => FunctionDefinition {
            name: other.to_string(),
            description: String::new(),
            parameters: json!({"type": "object", "properties": {}}),
        },
    };

    ToolDefinition {
        tool_type: "function".to_string(),
        function,
    }
}

/// Context message stating the exact current dataset path, injected
/// ahead of every worker run to override anything stale in history.
pub fn context_injection(active_dataset: &Path) -> String {
    format!(
        "IMPORTANT: the currently active dataset file is: {}\n\
         This is an absolute path. Pass this EXACT string as the file_path \
         argument of your tools, ignoring any older paths mentioned earlier \
         in the session. When a tool reports a new artifact path, use that \
         path for subsequent calls.",
        active_dataset.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor_for(dir: &TempDir, content: &str) -> (ToolExecutor, PathBuf) {
        let path = dir.path().join("data.csv");
        std::fs::write(&path, content).unwrap();
        (
            ToolExecutor::new(AnalysisConfig::default(), path.clone()),
            path,
        )
    }

    #[test]
    fn test_clean_tool_declares_artifact() {
        let dir = TempDir::new().unwrap();
        let (mut executor, path) = executor_for(
            &dir,
            "a,b\n1,2\n3,4\n5,6\n7,8\n9,10\n11,12\n",
        );

        let outcome = executor.execute(
            WorkerKind::Cleaning,
            "clean_data",
            &json!({"file_path": path.to_str().unwrap()}),
        );
        assert!(outcome.success);
        assert_eq!(
            outcome.new_dataset.as_deref(),
            Some(dir.path().join("data_cleaned.csv").as_path())
        );
        assert_eq!(executor.disposition(), Disposition::Success);
    }

    #[test]
    fn test_missing_dataset_is_a_tool_failure_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let mut executor = ToolExecutor::new(
            AnalysisConfig::default(),
            dir.path().join("ghost.csv"),
        );

        let outcome = executor.execute(WorkerKind::Cleaning, "clean_data", &json!({}));
        assert!(!outcome.success);
        assert!(outcome.output.contains("not found"));
        assert_eq!(executor.disposition(), Disposition::Failure);
    }

    #[test]
    fn test_tools_are_scoped_per_worker() {
        let dir = TempDir::new().unwrap();
        let (mut executor, path) = executor_for(&dir, "a\n1\n2\n");

        let outcome = executor.execute(
            WorkerKind::Visualization,
            "clean_data",
            &json!({"file_path": path.to_str().unwrap()}),
        );
        assert!(!outcome.success);
        assert!(outcome.output.contains("not available"));
    }

    #[test]
    fn test_finish_tool_marks_completion() {
        let dir = TempDir::new().unwrap();
        let (mut executor, _path) = executor_for(&dir, "a\n1\n");

        assert!(!executor.finished());
        let outcome = executor.execute(WorkerKind::Clustering, FINISH_TOOL, &json!({}));
        assert!(outcome.success);
        assert!(executor.finished());
    }

    #[test]
    fn test_omitted_path_falls_back_to_latest_artifact() {
        let dir = TempDir::new().unwrap();
        let (mut executor, _path) = executor_for(
            &dir,
            "a,b\n1,2\n3,4\n5,6\n7,8\n9,10\n11,12\n",
        );

        // Clean with no explicit path (uses the injected active dataset).
        let first = executor.execute(WorkerKind::Cleaning, "clean_data", &json!({}));
        assert!(first.success);

        // Explore with no path: must target the cleaned artifact now.
        let second = executor.execute(WorkerKind::Cleaning, "explore_data", &json!({}));
        assert!(second.success);
        assert!(second.output.contains("EDA complete"));
        assert_eq!(
            executor.latest_artifact().unwrap().file_name().unwrap(),
            "data_cleaned.csv"
        );
    }

    #[test]
    fn test_plot_refusal_yields_partial_failure_tracking() {
        let dir = TempDir::new().unwrap();
        let (mut executor, path) = executor_for(&dir, "a\n1\n2\n");

        let outcome = executor.execute(
            WorkerKind::Visualization,
            "render_plot",
            &json!({"file_path": path.to_str().unwrap()}),
        );
        assert!(!outcome.success);
        assert!(outcome.output.contains("missing plot-ready columns"));
        assert_eq!(executor.disposition(), Disposition::Failure);
    }

    #[test]
    fn test_cluster_then_plot_flow() {
        let dir = TempDir::new().unwrap();
        let mut lines = vec!["x,y".to_string()];
        for i in 0..12 {
            let base = if i < 6 { 0.0 } else { 50.0 };
            lines.push(format!("{},{}", base + i as f64, base + i as f64));
        }
        let (mut executor, path) = executor_for(&dir, &(lines.join("\n") + "\n"));

        let clustered = executor.execute(
            WorkerKind::Clustering,
            "cluster_data",
            &json!({"file_path": path.to_str().unwrap(), "k": 2}),
        );
        assert!(clustered.success);
        let artifact = clustered.new_dataset.clone().unwrap();

        let mut viz = ToolExecutor::new(AnalysisConfig::default(), artifact.clone());
        let plotted = viz.execute(
            WorkerKind::Visualization,
            "render_plot",
            &json!({"file_path": artifact.to_str().unwrap()}),
        );
        assert!(plotted.success, "plot failed: {}", plotted.output);
        assert_eq!(viz.disposition(), Disposition::Success);
    }

    /// Full pipeline over a 200-row dataset with a near-duplicate
    /// column pair: EDA flags it, cleaning drops the suggestion,
    /// clustering still succeeds on the survivors, and the artifact is
    /// plot-ready with default k=3 labels.
    #[test]
    fn test_full_pipeline_through_tools() {
        let dir = TempDir::new().unwrap();
        let mut lines = vec!["height,height_inches,group".to_string()];
        for row in 0..200 {
            let height = 150.0 + (row % 50) as f64;
            lines.push(format!("{},{},{}", height, height / 2.54, row % 4));
        }
        let path = dir.path().join("survey.csv");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        // Cleaning worker: explore, then drop the flagged column.
        let mut cleaning = ToolExecutor::new(AnalysisConfig::default(), path.clone());
        let eda = cleaning.execute(WorkerKind::Cleaning, "explore_data", &json!({}));
        assert!(eda.success);
        assert!(eda.output.contains("height_inches"));

        let cleaned = cleaning.execute(
            WorkerKind::Cleaning,
            "clean_data",
            &json!({"drop_columns": ["height_inches"]}),
        );
        assert!(cleaned.success);
        let cleaned_path = cleaned.new_dataset.unwrap();

        // Clustering worker on the cleaned artifact, default k.
        let mut clustering = ToolExecutor::new(AnalysisConfig::default(), cleaned_path.clone());
        let clustered = clustering.execute(WorkerKind::Clustering, "cluster_data", &json!({}));
        assert!(clustered.success, "clustering failed: {}", clustered.output);
        let clustered_path = clustered.new_dataset.unwrap();

        let frame = crate::dataset::Frame::load(&clustered_path).unwrap();
        assert!(!frame.headers().contains(&"height_inches".to_string()));
        // Exactly one of each derived column.
        for column in ["pc1", "pc2", "cluster"] {
            let count = frame.headers().iter().filter(|h| h.as_str() == column).count();
            assert_eq!(count, 1, "expected exactly one {} column", column);
        }
        let label_idx = frame.column_index("cluster").unwrap();
        if let Some(labels) = frame.text_values(label_idx) {
            for label in labels.iter().flatten() {
                assert!(["0", "1", "2"].contains(&label.as_str()));
            }
        } else {
            for value in frame.numeric_values(label_idx).unwrap().iter().flatten() {
                assert!([0.0, 1.0, 2.0].contains(value));
            }
        }

        // Visualization worker closes the pipeline.
        let mut viz = ToolExecutor::new(AnalysisConfig::default(), clustered_path);
        let plotted = viz.execute(WorkerKind::Visualization, "render_plot", &json!({}));
        assert!(plotted.success, "plot failed: {}", plotted.output);
    }

    #[test]
    fn test_every_worker_carries_finish_task() {
        for worker in WorkerKind::ALL {
            let tools = tool_definitions(worker);
            assert!(tools
                .iter()
                .any(|tool| tool.function.name == FINISH_TOOL));
        }
        assert_eq!(tool_definitions(WorkerKind::Cleaning).len(), 3);
        assert_eq!(tool_definitions(WorkerKind::Clustering).len(), 2);
    }

    #[test]
    fn test_context_injection_names_exact_path() {
        let text = context_injection(Path::new("/data/input_cleaned.csv"));
        assert!(text.contains("/data/input_cleaned.csv"));
        assert!(text.contains("EXACT"));
    }
}
