//! Sequential run orchestration.
//!
//! # Architecture
//!
//! ```text
//!   TestDiscovery            remote::evaluate         ProcessSupervisor
//!        │                          │                        │
//!        │ discover()               │                        │
//!        ▼                          │                        │
//!  Vec<TestDefinition> ──► for each test (index, count)      │
//!                                   │                        │
//!                                   ▼                        │
//!                           RemoteDirectives ──────► execute(test, directives)
//!                                                            │
//!                                     EventScheduler ◄───────┤ add_kill_switch
//!                                                            │ start_session
//!                                                            ▼
//!                                                      TestExecution
//!                                                            │
//!                          Reporter ◄── on_test_complete ────┤
//!                                                            ▼
//!                                                  pause, next test
//!
//!   after the loop:  Ok  ──► stop_session   (unless already stopped)
//!                    Err ──► abort_session  (unless already stopped)
//! ```
//!
//! Exactly one engine process is alive at any time. A failing test ends the
//! run; a scheduler cancellation ends only the cancelled test unless
//! `on_scheduler_cancel = "stop_run"`; a host shutdown ends the run
//! gracefully with the report collected so far.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{CancelPolicy, Config};
use crate::discovery::{TestDefinition, TestDiscovery};
use crate::remote;
use crate::report::Reporter;
use crate::scheduler::EventScheduler;
use crate::supervisor::{ExecutionOutcome, ProcessSupervisor, RunError, TestExecution};

/// Aggregated outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Number of tests discovered.
    pub discovered: usize,

    /// Executions in test order. Its length is the number of tests run.
    pub executions: Vec<TestExecution>,

    /// True when a host shutdown ended the run early.
    pub interrupted: bool,

    /// True when a scheduler cancellation ended the run early.
    pub stopped_by_scheduler: bool,

    /// The failure that aborted the run, if any.
    pub failure: Option<String>,

    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl RunReport {
    pub fn new(discovered: usize) -> Self {
        Self {
            discovered,
            executions: Vec::new(),
            interrupted: false,
            stopped_by_scheduler: false,
            failure: None,
            duration: Duration::ZERO,
        }
    }

    /// Result files in test order.
    pub fn result_files(&self) -> Vec<&Path> {
        self.executions
            .iter()
            .map(|e| e.result_file.as_path())
            .collect()
    }

    /// Number of tests that ran to their own exit.
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ExecutionOutcome::Completed { .. }))
    }

    /// Number of tests cancelled by the scheduler.
    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, ExecutionOutcome::CancelledByScheduler(_)))
    }

    /// Number of discovered tests that never ran.
    pub fn skipped(&self) -> usize {
        self.discovered.saturating_sub(self.executions.len())
    }

    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    fn count(&self, predicate: impl Fn(&ExecutionOutcome) -> bool) -> usize {
        self.executions
            .iter()
            .filter(|e| predicate(&e.outcome))
            .count()
    }
}

/// Drives a whole run: discovery, sequential supervision, scheduler
/// notification and reporting.
///
/// # Example
///
/// ```no_run
/// use volley::config::load_config;
/// use volley::orchestrator::Orchestrator;
/// use volley::report::ConsoleReporter;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = load_config(std::path::Path::new("volley.toml"))?;
///     let scheduler = volley::scheduler::from_config(&config.scheduler).await?;
///
///     let orchestrator = Orchestrator::new(config, ConsoleReporter::new())
///         .with_scheduler(scheduler);
///     let report = orchestrator.run().await?;
///
///     std::process::exit(report.exit_code());
/// }
/// ```
pub struct Orchestrator<R> {
    config: Config,
    reporter: R,
    scheduler: Option<Arc<dyn EventScheduler>>,
    host_interrupt: CancellationToken,
}

impl<R: Reporter> Orchestrator<R> {
    pub fn new(config: Config, reporter: R) -> Self {
        Self {
            config,
            reporter,
            scheduler: None,
            host_interrupt: CancellationToken::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Option<Arc<dyn EventScheduler>>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Token that, once cancelled, ends the run gracefully.
    pub fn with_host_interrupt(mut self, token: CancellationToken) -> Self {
        self.host_interrupt = token;
        self
    }

    pub fn host_interrupt(&self) -> CancellationToken {
        self.host_interrupt.clone()
    }

    /// Discovers the configured tests and runs them.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let discovery = TestDiscovery::from_settings(&self.config.run)?;
        let tests = discovery.discover();
        let root = discovery.root().map(Path::to_path_buf).unwrap_or_default();

        self.run_with_tests(&root, &tests).await
    }

    /// Runs already-discovered tests located under `root`.
    pub async fn run_with_tests(
        &self,
        root: &Path,
        tests: &[TestDefinition],
    ) -> Result<RunReport, RunError> {
        let start = Instant::now();
        let mut report = RunReport::new(tests.len());

        if tests.is_empty() {
            warn!("No tests to run");
        }
        self.reporter.on_discovery_complete(tests).await;

        let supervisor = self.supervisor(root);
        let outcome = self.execute_all(&supervisor, tests, &mut report).await;
        report.duration = start.elapsed();

        match outcome {
            Ok(()) => {
                self.stop_session().await;
                self.reporter.on_run_complete(&report).await;
                Ok(report)
            }
            Err(e) => {
                error!("{}", e);
                self.abort_session().await;
                report.failure = Some(e.to_string());
                self.reporter.on_run_complete(&report).await;
                Err(e)
            }
        }
    }

    fn supervisor(&self, root: &Path) -> ProcessSupervisor {
        let supervisor = ProcessSupervisor::new(&self.config, root)
            .with_scheduler(self.scheduler.clone())
            .with_host_interrupt(self.host_interrupt.clone());

        match self.run_id_override() {
            Some(arg) => supervisor.with_extra_arg(arg),
            None => supervisor,
        }
    }

    async fn execute_all(
        &self,
        supervisor: &ProcessSupervisor,
        tests: &[TestDefinition],
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        for (index, test) in tests.iter().enumerate() {
            let directives = remote::evaluate(tests.len(), index, &self.config.remote);
            if !directives.is_empty() {
                debug!(
                    "Remote directives for {}: start={} stop={}",
                    test, directives.start, directives.stop
                );
            }

            self.reporter.on_test_start(test).await;
            let execution = supervisor.execute(test, directives).await?;
            self.reporter.on_test_complete(&execution).await;

            let outcome = execution.outcome;
            report.executions.push(execution);

            match outcome {
                ExecutionOutcome::InterruptedByHost => {
                    warn!("Run interrupted, skipping remaining tests");
                    report.interrupted = true;
                    break;
                }
                ExecutionOutcome::CancelledByScheduler(reason)
                    if self.config.run.on_scheduler_cancel == CancelPolicy::StopRun =>
                {
                    info!("Scheduler triggered {}, skipping remaining tests", reason);
                    report.stopped_by_scheduler = true;
                    break;
                }
                _ => {}
            }

            if !self.pause().await {
                report.interrupted = true;
                break;
            }
        }

        Ok(())
    }

    /// Sleeps for the configured pause. Returns false if the host asked to
    /// shut down, before or during the pause.
    async fn pause(&self) -> bool {
        let pause = self.config.run.post_test_pause();
        if pause.is_zero() {
            return !self.host_interrupt.is_cancelled();
        }

        debug!("Pausing {:?} before the next test", pause);
        tokio::select! {
            _ = tokio::time::sleep(pause) => true,
            _ = self.host_interrupt.cancelled() => {
                warn!("Pause interrupted by shutdown, skipping remaining tests");
                false
            }
        }
    }

    /// Override argument when the scheduler's run id differs from the
    /// configured one.
    fn run_id_override(&self) -> Option<String> {
        let scheduler = self.scheduler.as_ref()?;
        let assigned = scheduler.run_identifier()?;
        let configured = self.config.run.run_id.as_deref();

        if configured == Some(assigned.as_str()) {
            return None;
        }

        let argument = self.config.run.run_id_argument.replace("{run_id}", &assigned);
        info!(
            "Overriding run id '{}' with '{}' from {} scheduler",
            configured.unwrap_or("<unset>"),
            assigned,
            scheduler.name()
        );
        Some(argument)
    }

    async fn stop_session(&self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        if scheduler.is_session_stopped() {
            debug!("{} session already stopped", scheduler.name());
            return;
        }

        info!("Stopping {} session", scheduler.name());
        if let Err(e) = scheduler.stop_session().await {
            warn!("Failed to stop scheduler session: {}", e);
        }
    }

    async fn abort_session(&self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        if scheduler.is_session_stopped() {
            debug!("{} session already stopped", scheduler.name());
            return;
        }

        info!("Aborting {} session", scheduler.name());
        if let Err(e) = scheduler.abort_session().await {
            warn!("Failed to abort scheduler session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelReason;
    use crate::config::{PauseSetting, RemoteConfig};
    use crate::report::NullReporter;
    use crate::test_support::{RecordingScheduler, sh_engine, write_script};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let mut config = Config::default();
            config.run.test_files_directory = Some(temp.path().join("plans"));
            config.engine = sh_engine(&temp.path().join("results"));
            Self { temp, config }
        }

        fn plan(&self, relative: &str, body: &str) -> &Self {
            write_script(&self.temp.path().join("plans"), relative, body);
            self
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.temp.path().join(relative)
        }
    }

    /// Records reporter events with timestamps; can cancel a token after
    /// the first completed test.
    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<(String, Instant)>>,
        cancel_after_first: Option<CancellationToken>,
    }

    impl RecordingReporter {
        fn events(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(e, _)| e.clone())
                .collect()
        }

        fn at(&self, event: &str) -> Instant {
            self.events
                .lock()
                .unwrap()
                .iter()
                .find(|(e, _)| e == event)
                .map(|(_, at)| *at)
                .unwrap()
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push((event, Instant::now()));
        }
    }

    #[async_trait]
    impl Reporter for RecordingReporter {
        async fn on_discovery_complete(&self, tests: &[TestDefinition]) {
            self.record(format!("discovered {}", tests.len()));
        }

        async fn on_test_start(&self, test: &TestDefinition) {
            self.record(format!("start {}", test));
        }

        async fn on_test_complete(&self, execution: &TestExecution) {
            self.record(format!("complete {}", execution.test));
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
        }

        async fn on_run_complete(&self, report: &RunReport) {
            self.record(format!("run {}", report.executions.len()));
        }
    }

    fn names(report: &RunReport) -> Vec<String> {
        report
            .result_files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_all_tests_run_in_order_and_session_stops() {
        let fixture = Fixture::new();
        fixture
            .plan("b.jmx", "echo b > \"$1\"\n")
            .plan("a.jmx", "echo a > \"$1\"\n")
            .plan("api/c.jmx", "echo c > \"$1\"\n");

        let scheduler = Arc::new(RecordingScheduler::new());
        let orchestrator = Orchestrator::new(fixture.config.clone(), NullReporter)
            .with_scheduler(Some(scheduler.clone()));

        let report = orchestrator.run().await.unwrap();

        assert_eq!(names(&report), vec!["a.jtl", "c.jtl", "b.jtl"]);
        assert_eq!(report.completed(), 3);
        assert!(report.success());
        assert_eq!(scheduler.events(), vec!["start", "start", "start", "stop"]);
        assert_eq!(scheduler.switch_count(), 3);
    }

    #[tokio::test]
    async fn test_failure_aborts_session_and_skips_remaining_tests() {
        let fixture = Fixture::new();
        let marker = fixture.path("third-ran");
        fixture
            .plan("1-ok.jmx", "exit 0\n")
            .plan("2-broken.jmx", "exit 1\n")
            .plan(
                "3-never.jmx",
                &format!("touch '{}'\n", marker.display()),
            );

        let scheduler = Arc::new(RecordingScheduler::new());
        let reporter = RecordingReporter::default();
        let orchestrator = Orchestrator::new(fixture.config.clone(), reporter)
            .with_scheduler(Some(scheduler.clone()));

        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, RunError::TestFailed { exit_code: 1, ref test } if test == "2-broken.jmx"));
        assert!(!marker.exists());
        assert_eq!(scheduler.events(), vec!["start", "start", "abort"]);
        assert_eq!(orchestrator.reporter.events().last().unwrap(), "run 1");
    }

    #[tokio::test]
    async fn test_undeletable_stale_result_aborts_run() {
        let fixture = Fixture::new();
        let marker = fixture.path("second-ran");
        fixture
            .plan("1-stale.jmx", "exit 0\n")
            .plan("2-next.jmx", &format!("touch '{}'\n", marker.display()));
        write_script(&fixture.path("results/1-stale.jtl"), "leftover", "");

        let scheduler = Arc::new(RecordingScheduler::new());
        let orchestrator = Orchestrator::new(fixture.config.clone(), RecordingReporter::default())
            .with_scheduler(Some(scheduler.clone()));

        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, RunError::StaleResult { ref path, .. } if path.ends_with("1-stale.jtl")));
        assert!(!marker.exists());
        assert_eq!(scheduler.events(), vec!["abort"]);
        assert_eq!(orchestrator.reporter.events().last().unwrap(), "run 0");
    }

    #[tokio::test]
    async fn test_tolerated_force_kill_continues_run() {
        let mut fixture = Fixture::new();
        fixture.config.engine.tolerate_force_kill = true;
        fixture.plan("a.jmx", "exit 143\n").plan("b.jmx", "exit 0\n");

        let report = Orchestrator::new(fixture.config.clone(), NullReporter)
            .run()
            .await
            .unwrap();

        assert_eq!(
            report
                .executions
                .iter()
                .map(|e| e.outcome)
                .collect::<Vec<_>>(),
            vec![
                ExecutionOutcome::Completed { exit_code: 143 },
                ExecutionOutcome::Completed { exit_code: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_pause_between_tests() {
        let mut fixture = Fixture::new();
        fixture.config.run.post_test_pause_secs = PauseSetting::Text("1".to_string());
        fixture.plan("a.jmx", "exit 0\n").plan("b.jmx", "exit 0\n");

        let orchestrator = Orchestrator::new(fixture.config.clone(), RecordingReporter::default());
        orchestrator.run().await.unwrap();

        let gap = orchestrator
            .reporter
            .at("start b.jmx")
            .duration_since(orchestrator.reporter.at("complete a.jmx"));
        assert!(gap >= Duration::from_secs(1), "gap was {:?}", gap);
    }

    #[tokio::test]
    async fn test_interrupted_pause_ends_run_gracefully() {
        let mut fixture = Fixture::new();
        fixture.config.run.post_test_pause_secs = PauseSetting::Seconds(60);
        fixture.plan("a.jmx", "exit 0\n").plan("b.jmx", "exit 0\n");

        let host = CancellationToken::new();
        let reporter = RecordingReporter {
            cancel_after_first: Some(host.clone()),
            ..Default::default()
        };
        let scheduler = Arc::new(RecordingScheduler::new());
        let orchestrator = Orchestrator::new(fixture.config.clone(), reporter)
            .with_scheduler(Some(scheduler.clone()))
            .with_host_interrupt(host);

        let started = Instant::now();
        let report = orchestrator.run().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(report.interrupted);
        assert_eq!(report.executions.len(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(scheduler.events(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn test_scheduler_cancel_continues_by_default() {
        let fixture = Fixture::new();
        fixture
            .plan("a.jmx", "exec sleep 30\n")
            .plan("b.jmx", "exit 0\n");

        let scheduler = Arc::new(RecordingScheduler::new().cancel_on_start(0, CancelReason::Kill));
        let report = Orchestrator::new(fixture.config.clone(), NullReporter)
            .with_scheduler(Some(scheduler.clone()))
            .run()
            .await
            .unwrap();

        assert_eq!(
            report.executions[0].outcome,
            ExecutionOutcome::CancelledByScheduler(CancelReason::Kill)
        );
        assert_eq!(
            report.executions[1].outcome,
            ExecutionOutcome::Completed { exit_code: 0 }
        );
        assert_eq!(report.cancelled(), 1);
        assert_eq!(scheduler.events(), vec!["start", "start", "stop"]);
    }

    #[tokio::test]
    async fn test_scheduler_cancel_can_stop_run() {
        let mut fixture = Fixture::new();
        fixture.config.run.on_scheduler_cancel = CancelPolicy::StopRun;
        fixture
            .plan("a.jmx", "exec sleep 30\n")
            .plan("b.jmx", "exit 0\n");

        let scheduler = Arc::new(RecordingScheduler::new().cancel_on_start(0, CancelReason::Abort));
        let report = Orchestrator::new(fixture.config.clone(), NullReporter)
            .with_scheduler(Some(scheduler.clone()))
            .run()
            .await
            .unwrap();

        assert_eq!(report.executions.len(), 1);
        assert!(report.stopped_by_scheduler);
        assert_eq!(scheduler.events(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn test_run_id_override_injected_when_ids_differ() {
        let mut fixture = Fixture::new();
        fixture.config.run.run_id = Some("local".to_string());
        fixture.plan("a.jmx", "echo \"$2\" > \"$1\"\n");

        let scheduler = Arc::new(RecordingScheduler::new().with_run_id("perf-7"));
        let report = Orchestrator::new(fixture.config.clone(), NullReporter)
            .with_scheduler(Some(scheduler))
            .run()
            .await
            .unwrap();

        let written = std::fs::read_to_string(&report.executions[0].result_file).unwrap();
        assert_eq!(written.trim(), "-Jtest.testRunId=perf-7");
    }

    #[tokio::test]
    async fn test_run_id_not_overridden_when_equal() {
        let mut fixture = Fixture::new();
        fixture.config.run.run_id = Some("perf-7".to_string());
        fixture.plan("a.jmx", "echo \"[$2]\" > \"$1\"\n");

        let scheduler = Arc::new(RecordingScheduler::new().with_run_id("perf-7"));
        let report = Orchestrator::new(fixture.config.clone(), NullReporter)
            .with_scheduler(Some(scheduler))
            .run()
            .await
            .unwrap();

        let written = std::fs::read_to_string(&report.executions[0].result_file).unwrap();
        assert_eq!(written.trim(), "[]");
    }

    #[tokio::test]
    async fn test_remote_brackets_follow_list_position() {
        let mut fixture = Fixture::new();
        fixture.config.remote = RemoteConfig {
            start_servers_before_tests: true,
            stop_servers_after_tests: true,
            ..Default::default()
        };
        let body = "shift\necho \"[$*]\" > \"$0.args\"\n";
        fixture
            .plan("a.jmx", body)
            .plan("b.jmx", body)
            .plan("c.jmx", body);

        Orchestrator::new(fixture.config.clone(), NullReporter)
            .run()
            .await
            .unwrap();

        let args = |name: &str| {
            std::fs::read_to_string(fixture.path(&format!("plans/{}.args", name)))
                .unwrap()
                .trim()
                .to_string()
        };
        assert_eq!(args("a.jmx"), "[-r]");
        assert_eq!(args("b.jmx"), "[]");
        assert_eq!(args("c.jmx"), "[-X]");
    }

    #[tokio::test]
    async fn test_missing_directory_runs_nothing() {
        let mut fixture = Fixture::new();
        fixture.config.run.test_files_directory = Some(fixture.path("does-not-exist"));

        let scheduler = Arc::new(RecordingScheduler::new());
        let report = Orchestrator::new(fixture.config.clone(), NullReporter)
            .with_scheduler(Some(scheduler.clone()))
            .run()
            .await
            .unwrap();

        assert!(report.executions.is_empty());
        assert_eq!(scheduler.events(), vec!["stop"]);
    }

    #[test]
    fn test_report_counts() {
        let mut report = RunReport::new(3);
        report.executions.push(TestExecution {
            test: TestDefinition::new("a.jmx"),
            outcome: ExecutionOutcome::CancelledByScheduler(CancelReason::Stop),
            result_file: PathBuf::from("/r/a.jtl"),
            duration: Duration::ZERO,
        });

        assert_eq!(report.cancelled(), 1);
        assert_eq!(report.completed(), 0);
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.result_files(), vec![Path::new("/r/a.jtl")]);

        report.failure = Some("boom".to_string());
        assert_eq!(report.exit_code(), 1);
    }
}
