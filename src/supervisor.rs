//! Supervised execution of one test in a child process.
//!
//! For every test the supervisor:
//!
//! 1. deletes a stale result file and creates the result/report folders,
//! 2. launches the engine with the assembled command line,
//! 3. starts draining stdout/stderr,
//! 4. hands a fresh [`ProcessKillSwitch`] to the scheduler and starts the
//!    session,
//! 5. installs a [`ShutdownHook`] for the lifetime of the child,
//! 6. waits for the exit, then withdraws the kill switch,
//! 7. classifies the exit into an [`ExecutionOutcome`] or a [`RunError`].
//!
//! Any exit observed after the host asked to shut down counts as
//! [`ExecutionOutcome::InterruptedByHost`], whatever the exit code.
//!
//! The child is spawned with kill-on-drop, so it never outlives the
//! supervisor even when the surrounding future is dropped.

pub mod command;
pub mod drain;
pub mod hook;

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::{CancelReason, ProcessKillSwitch};
use crate::config::{Config, EngineConfig, RemoteConfig, ReportConfig};
use crate::discovery::{DiscoveryError, TestDefinition};
use crate::remote::RemoteDirectives;
use crate::scheduler::EventScheduler;

pub use command::LaunchCommand;
pub use hook::{ShutdownHook, listen_for_shutdown};

use drain::StreamLevel;

/// Upper bound on waiting for the output drains once the child has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures that end the run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to delete existing results file: {}", path.display())]
    StaleResult {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create results directory: {}", path.display())]
    ResultsDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create report output directory: {}", path.display())]
    ReportDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch engine for {test}: {source}")]
    Spawn {
        test: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for engine running {test}: {source}")]
    Wait {
        test: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Test failed with exit code: {exit_code} ({test})")]
    TestFailed { test: String, exit_code: i32 },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// How a supervised test ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The engine exited on its own with an acceptable code.
    Completed { exit_code: i32 },
    /// The scheduler cancelled the test through its kill switch.
    CancelledByScheduler(CancelReason),
    /// The host asked volley to shut down while the test was running.
    InterruptedByHost,
}

impl ExecutionOutcome {
    pub fn label(&self) -> String {
        match self {
            ExecutionOutcome::Completed { exit_code: 0 } => "completed".to_string(),
            ExecutionOutcome::Completed { exit_code } => {
                format!("completed (exit code {})", exit_code)
            }
            ExecutionOutcome::CancelledByScheduler(reason) => format!("cancelled ({})", reason),
            ExecutionOutcome::InterruptedByHost => "interrupted".to_string(),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionOutcome::Completed { exit_code } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Record of one supervised test.
#[derive(Debug, Clone)]
pub struct TestExecution {
    pub test: TestDefinition,
    pub outcome: ExecutionOutcome,
    pub result_file: PathBuf,
    pub duration: Duration,
}

enum Termination {
    Exited(ExitStatus),
    Cancelled,
    Interrupted,
}

/// Launches and supervises engine subprocesses, one at a time.
pub struct ProcessSupervisor {
    engine: EngineConfig,
    remote: RemoteConfig,
    report: ReportConfig,
    test_root: PathBuf,
    results_dir: PathBuf,
    report_root: PathBuf,
    scheduler: Option<Arc<dyn EventScheduler>>,
    host_interrupt: CancellationToken,
    extra_args: Vec<String>,
}

impl ProcessSupervisor {
    pub fn new(config: &Config, test_root: &Path) -> Self {
        Self {
            engine: config.engine.clone(),
            remote: config.remote.clone(),
            report: config.report.clone(),
            test_root: absolute(test_root),
            results_dir: absolute(&config.engine.results_dir()),
            report_root: absolute(&config.report.output_dir()),
            scheduler: None,
            host_interrupt: CancellationToken::new(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Option<Arc<dyn EventScheduler>>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_host_interrupt(mut self, token: CancellationToken) -> Self {
        self.host_interrupt = token;
        self
    }

    /// Appends an argument to every launch (e.g. a run id override).
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// `<results_dir>/<file stem>.<jtl|csv>`
    pub fn result_file(&self, test: &TestDefinition) -> PathBuf {
        self.results_dir.join(format!(
            "{}.{}",
            test.stem(),
            self.engine.results_format.extension()
        ))
    }

    /// `<report root>/<relative path without extension>`
    pub fn report_dir(&self, test: &TestDefinition) -> PathBuf {
        self.report_root.join(test.without_extension())
    }

    /// Runs one test to completion.
    pub async fn execute(
        &self,
        test: &TestDefinition,
        directives: RemoteDirectives,
    ) -> Result<TestExecution, RunError> {
        let started = Instant::now();
        let result_file = self.result_file(test);
        prepare_result_file(&result_file)?;

        let report_dir = if self.report.generate_reports {
            let dir = self.report_dir(test);
            std::fs::create_dir_all(&dir).map_err(|source| RunError::ReportDirectory {
                path: dir.clone(),
                source,
            })?;
            Some(dir)
        } else {
            None
        };

        let test_path = test.resolve(&self.test_root);
        let launch = command::build(
            &self.engine,
            &self.remote,
            &self.report,
            &command::Invocation {
                test_path: &test_path,
                test_name: test.stem(),
                result_file: &result_file,
                report_dir: report_dir.as_deref(),
                directives,
                extra_args: &self.extra_args,
            },
        );

        info!("Executing test: {}", test.file_name());
        debug!("Command line: {}", launch.to_shell_string());

        let mut child = launch
            .to_process()
            .spawn()
            .map_err(|source| RunError::Spawn {
                test: test.relative_path().to_string(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .map(|out| drain::spawn(out, StreamLevel::stdout(self.engine.suppress_output)));
        let stderr = child
            .stderr
            .take()
            .map(|err| drain::spawn(err, StreamLevel::Error));

        let switch = Arc::new(ProcessKillSwitch::new(test.relative_path()));
        if let Some(scheduler) = &self.scheduler {
            debug!("Adding kill switch to {} scheduler", scheduler.name());
            scheduler.add_kill_switch(switch.clone());
            if let Err(e) = scheduler.start_session().await {
                warn!("Failed to start scheduler session: {}", e);
            }
        }

        let hook = ShutdownHook::install(self.host_interrupt.clone(), self.scheduler.clone());

        let kill_requested = switch.termination_token();
        let shutdown = hook.termination_token();

        let termination = tokio::select! {
            status = child.wait() => Termination::Exited(status.map_err(|source| RunError::Wait {
                test: test.relative_path().to_string(),
                source,
            })?),
            _ = kill_requested.cancelled() => Termination::Cancelled,
            _ = shutdown.cancelled() => Termination::Interrupted,
        };

        let interrupted = matches!(termination, Termination::Interrupted);
        let status = match termination {
            Termination::Exited(status) => status,
            Termination::Cancelled | Termination::Interrupted => {
                if interrupted {
                    info!("System exit detected, stopping test...");
                }
                terminate(&mut child)
                    .await
                    .map_err(|source| RunError::Wait {
                        test: test.relative_path().to_string(),
                        source,
                    })?
            }
        };
        hook.release().await;
        if let Some(scheduler) = &self.scheduler {
            scheduler.remove_kill_switch();
        }

        futures::future::join(
            drain::join(stdout, "stdout", DRAIN_TIMEOUT),
            drain::join(stderr, "stderr", DRAIN_TIMEOUT),
        )
        .await;

        let exit_code = exit_code(&status);
        debug!("Engine exited with code {}", exit_code);

        let outcome = if let Some(reason) = switch.reason() {
            info!(
                "Event scheduler triggered {}, continuing with regular completion steps",
                reason
            );
            ExecutionOutcome::CancelledByScheduler(reason)
        } else if interrupted || self.host_interrupt.is_cancelled() {
            if !interrupted {
                info!("Engine exited with code {} during shutdown", exit_code);
            }
            ExecutionOutcome::InterruptedByHost
        } else if exit_code == 0 {
            ExecutionOutcome::Completed { exit_code }
        } else if self.engine.tolerate_force_kill && exit_code == self.engine.force_killed_exit_code
        {
            warn!("Engine process has been force killed!");
            warn!("Not failing the run due to config settings, however you may want to investigate this");
            ExecutionOutcome::Completed { exit_code }
        } else {
            return Err(RunError::TestFailed {
                test: test.relative_path().to_string(),
                exit_code,
            });
        };

        info!("Completed test: {}", test.file_name());

        Ok(TestExecution {
            test: test.clone(),
            outcome,
            result_file,
            duration: started.elapsed(),
        })
    }
}

/// Removes a result file left by a previous run and ensures its folder exists.
fn prepare_result_file(path: &Path) -> Result<(), RunError> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|source| RunError::StaleResult {
            path: path.to_path_buf(),
            source,
        })?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| RunError::ResultsDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    Ok(())
}

async fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    if let Err(e) = child.start_kill() {
        debug!("Kill request failed, engine probably exited already: {}", e);
    }
    child.wait().await
}

/// Exit code of the child; a signal death maps to `128 + signal`.
fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
