//! External event scheduler contract.
//!
//! An event scheduler is a session-lifecycle service that runs alongside the
//! load tests: it is told when a session starts, stops or aborts, and it can
//! cancel the running test at any moment through the [`KillSwitch`] it is
//! handed after each subprocess launch.
//!
//! # Lifecycle
//!
//! ```text
//!   per test:   add_kill_switch(switch) ──► start_session()
//!               remove_kill_switch() once the subprocess has ended
//!   success:    stop_session()
//!   failure:    abort_session()
//!   shutdown:   abort_session() unless is_session_stopped()
//! ```
//!
//! Lifecycle failures are reported to the caller, which logs them; they
//! never fail a test run by themselves.

pub mod command;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cancel::KillSwitch;
use crate::config::SchedulerConfig;

pub use command::CommandScheduler;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur while talking to a scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler command '{command}' exited with code {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("Scheduler command '{0}' timed out")]
    Timeout(String),

    #[error("Failed to run scheduler command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Session lifecycle and cancellation service consumed by the orchestrator.
#[async_trait]
pub trait EventScheduler: Send + Sync {
    /// Begins the session. Called after each subprocess launch.
    async fn start_session(&self) -> SchedulerResult<()>;

    /// Ends the session after the last test.
    async fn stop_session(&self) -> SchedulerResult<()>;

    /// Ends the session after a failure or a host shutdown.
    async fn abort_session(&self) -> SchedulerResult<()>;

    /// Registers the kill-switch for the test that was just launched.
    fn add_kill_switch(&self, switch: Arc<dyn KillSwitch>);

    /// Forgets the registered kill-switch; no test is running until the next
    /// [`add_kill_switch`](Self::add_kill_switch).
    fn remove_kill_switch(&self);

    /// True once the session has been stopped or aborted.
    fn is_session_stopped(&self) -> bool;

    /// Run identifier assigned by the scheduler, if it has one.
    fn run_identifier(&self) -> Option<String> {
        None
    }

    /// Scheduler name (for logging).
    fn name(&self) -> &str;
}

/// Logging surface handed to scheduler implementations.
pub trait EventLogger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn debug(&self, message: &str);
    fn is_debug_enabled(&self) -> bool;
}

/// [`EventLogger`] writing to the `tracing` sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventLogger {
    debug_enabled: bool,
}

impl TracingEventLogger {
    pub fn new(debug_enabled: bool) -> Self {
        Self { debug_enabled }
    }
}

impl EventLogger for TracingEventLogger {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn debug(&self, message: &str) {
        if self.is_debug_enabled() {
            tracing::debug!("{}", message);
        }
    }

    fn is_debug_enabled(&self) -> bool {
        self.debug_enabled
    }
}

/// Builds the scheduler selected by the configuration.
///
/// Returns `None` for `type = "none"`. Building a command scheduler runs its
/// `run_id_command`, so the run identifier is known before the first test.
pub async fn from_config(
    config: &SchedulerConfig,
) -> SchedulerResult<Option<Arc<dyn EventScheduler>>> {
    match config {
        SchedulerConfig::None => Ok(None),
        SchedulerConfig::Command(cfg) => {
            let logger = Arc::new(TracingEventLogger::new(cfg.debug));
            let scheduler = CommandScheduler::connect(cfg.clone(), logger).await?;
            Ok(Some(Arc::new(scheduler)))
        }
    }
}
