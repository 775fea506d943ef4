//! JSON manifest of the result files produced by a run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Reporter;
use crate::discovery::TestDefinition;
use crate::orchestrator::RunReport;
use crate::supervisor::TestExecution;

/// File name of the manifest inside the results directory.
pub const MANIFEST_FILE: &str = "result-files.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub discovered: usize,
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub result_files: Vec<PathBuf>,
    pub tests: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub test: String,
    pub result_file: PathBuf,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_secs: f64,
}

impl Manifest {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            generated_at: Utc::now(),
            discovered: report.discovered,
            interrupted: report.interrupted,
            failure: report.failure.clone(),
            result_files: report
                .result_files()
                .into_iter()
                .map(Path::to_path_buf)
                .collect(),
            tests: report.executions.iter().map(ManifestEntry::from).collect(),
        }
    }

    /// Writes the manifest as pretty-printed JSON, creating parent folders.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl From<&TestExecution> for ManifestEntry {
    fn from(execution: &TestExecution) -> Self {
        Self {
            test: execution.test.relative_path().to_string(),
            result_file: execution.result_file.clone(),
            outcome: execution.outcome.label(),
            exit_code: execution.outcome.exit_code(),
            duration_secs: execution.duration.as_secs_f64(),
        }
    }
}

/// Writes a [`Manifest`] when the run completes.
pub struct ManifestReporter {
    path: PathBuf,
}

impl ManifestReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Manifest at [`MANIFEST_FILE`] inside `results_dir`.
    pub fn in_results_dir(results_dir: &Path) -> Self {
        Self::new(results_dir.join(MANIFEST_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Reporter for ManifestReporter {
    async fn on_discovery_complete(&self, _tests: &[TestDefinition]) {}
    async fn on_test_start(&self, _test: &TestDefinition) {}
    async fn on_test_complete(&self, _execution: &TestExecution) {}

    async fn on_run_complete(&self, report: &RunReport) {
        match Manifest::from_report(report).write(&self.path) {
            Ok(()) => info!("Result manifest written to {}", self.path.display()),
            Err(e) => warn!(
                "Failed to write result manifest {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
