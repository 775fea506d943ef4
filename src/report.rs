//! Run reporting.
//!
//! Reporters receive events while the orchestrator works through the test
//! list. [`ConsoleReporter`] prints progress and a summary to the terminal;
//! [`ManifestReporter`] writes the list of produced result files as JSON for
//! downstream analysis.

pub mod manifest;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::discovery::TestDefinition;
use crate::orchestrator::RunReport;
use crate::supervisor::{ExecutionOutcome, TestExecution};

pub use manifest::{Manifest, ManifestReporter};

/// A reporter receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called when test discovery is complete.
    async fn on_discovery_complete(&self, tests: &[TestDefinition]);

    /// Called right before a test is launched.
    async fn on_test_start(&self, test: &TestDefinition);

    /// Called when a test has been supervised to completion.
    async fn on_test_complete(&self, execution: &TestExecution);

    /// Called once at the end of the run, including failed runs.
    async fn on_run_complete(&self, report: &RunReport);
}

/// A reporter that does nothing.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_discovery_complete(&self, _tests: &[TestDefinition]) {}
    async fn on_test_start(&self, _test: &TestDefinition) {}
    async fn on_test_complete(&self, _execution: &TestExecution) {}
    async fn on_run_complete(&self, _report: &RunReport) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_discovery_complete(&self, tests: &[TestDefinition]) {
        for reporter in &self.reporters {
            reporter.on_discovery_complete(tests).await;
        }
    }

    async fn on_test_start(&self, test: &TestDefinition) {
        for reporter in &self.reporters {
            reporter.on_test_start(test).await;
        }
    }

    async fn on_test_complete(&self, execution: &TestExecution) {
        for reporter in &self.reporters {
            reporter.on_test_complete(execution).await;
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        for reporter in &self.reporters {
            reporter.on_run_complete(report).await;
        }
    }
}

/// Console reporter that shows progress in the terminal.
pub struct ConsoleReporter {
    total: AtomicUsize,
    position: AtomicUsize,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            position: AtomicUsize::new(0),
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_discovery_complete(&self, tests: &[TestDefinition]) {
        self.total.store(tests.len(), Ordering::Relaxed);
        println!("Discovered {} tests", tests.len());
    }

    async fn on_test_start(&self, test: &TestDefinition) {
        let position = self.position.fetch_add(1, Ordering::Relaxed) + 1;
        println!(
            "{} {}",
            console::style(format!(
                "[{}/{}]",
                position,
                self.total.load(Ordering::Relaxed)
            ))
            .dim(),
            test
        );
    }

    async fn on_test_complete(&self, execution: &TestExecution) {
        let status = match execution.outcome {
            ExecutionOutcome::Completed { exit_code: 0 } => console::style("DONE").green(),
            ExecutionOutcome::Completed { .. } => console::style("KILL").yellow(),
            ExecutionOutcome::CancelledByScheduler(_) => console::style("CNCL").yellow(),
            ExecutionOutcome::InterruptedByHost => console::style("INTR").red().bold(),
        };

        println!(
            "{} {} ({:.1}s)",
            status,
            execution.test,
            execution.duration.as_secs_f64()
        );
    }

    async fn on_run_complete(&self, report: &RunReport) {
        println!();
        println!("Run Results:");
        println!("  Discovered: {}", report.discovered);
        println!("  Completed:  {}", console::style(report.completed()).green());
        println!("  Cancelled:  {}", console::style(report.cancelled()).yellow());

        let skipped = report.skipped();
        if skipped > 0 {
            println!("  Skipped:    {}", console::style(skipped).red());
        }

        println!("  Duration:   {:?}", report.duration);

        println!();
        if let Some(failure) = &report.failure {
            println!("{}", console::style("Run failed.").red().bold());
            println!("  {}", console::style(failure).dim());
        } else if report.interrupted {
            println!("{}", console::style("Run interrupted.").yellow().bold());
        } else {
            println!("{}", console::style("All tests executed.").green().bold());
        }

        let files = report.result_files();
        if !files.is_empty() {
            println!();
            println!("Result files:");
            for file in files {
                println!("  - {}", file.display());
            }
        }
    }
}
