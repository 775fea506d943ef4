//! Shell-command driven event scheduler.
//!
//! Lets any external tool act as the event scheduler by configuring a few
//! commands. Each command runs via `sh -c`, with `VOLLEY_SESSION_ID` (and
//! `VOLLEY_RUN_ID` when known) in its environment.
//!
//! # Protocol
//!
//! | Command | When | Contract |
//! |---------|------|----------|
//! | `run_id_command` | scheduler construction | first non-empty stdout line is the run id |
//! | `start_command` | first `start_session` | exit 0 |
//! | `watch_command` | spawned with the session | stdout lines `kill\|abort\|stop [message]` |
//! | `stop_command` | `stop_session` | exit 0 |
//! | `abort_command` | `abort_session` | exit 0 |
//!
//! ```text
//! $ cat watch.sh
//! #!/bin/sh
//! ./poll-dashboard --until-breach && echo "abort response time SLA breached"
//! ```
//!
//! Starting is idempotent within a session, and stop/abort only take effect
//! once.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{EventLogger, EventScheduler, SchedulerError, SchedulerResult};
use crate::cancel::{CancelReason, KillSwitch};
use crate::config::CommandSchedulerConfig;

type SharedKillSwitch = Arc<Mutex<Option<Arc<dyn KillSwitch>>>>;

/// Background task reading the watch command's output.
struct Watcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Scheduler whose lifecycle is a set of shell commands.
pub struct CommandScheduler {
    config: CommandSchedulerConfig,
    logger: Arc<dyn EventLogger>,
    session_id: String,
    run_id: Option<String>,
    started: AtomicBool,
    stopped: AtomicBool,
    kill_switch: SharedKillSwitch,
    watcher: Mutex<Option<Watcher>>,
}

impl CommandScheduler {
    /// Creates the scheduler and resolves the run identifier.
    ///
    /// # Errors
    ///
    /// Fails if `run_id_command` is configured and does not succeed.
    pub async fn connect(
        config: CommandSchedulerConfig,
        logger: Arc<dyn EventLogger>,
    ) -> SchedulerResult<Self> {
        let mut scheduler = Self {
            config,
            logger,
            session_id: uuid::Uuid::new_v4().to_string(),
            run_id: None,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            kill_switch: Arc::new(Mutex::new(None)),
            watcher: Mutex::new(None),
        };

        if let Some(command) = scheduler.config.run_id_command.clone() {
            let stdout = scheduler.run_command(&command).await?;
            scheduler.run_id = stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(String::from);

            match &scheduler.run_id {
                Some(id) => scheduler
                    .logger
                    .info(&format!("Scheduler assigned run id '{}'", id)),
                None => scheduler
                    .logger
                    .warn("run_id_command produced no run id"),
            }
        }

        Ok(scheduler)
    }

    /// Identifier exported to commands as `VOLLEY_SESSION_ID`.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn shell(&self, command: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.env("VOLLEY_SESSION_ID", &self.session_id);
        if let Some(run_id) = &self.run_id {
            cmd.env("VOLLEY_RUN_ID", run_id);
        }
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Runs a lifecycle command to completion and returns its stdout.
    async fn run_command(&self, command: &str) -> SchedulerResult<String> {
        self.logger
            .debug(&format!("Running scheduler command: {}", command));

        let mut cmd = self.shell(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| SchedulerError::Timeout(command.to_string()))?
        .map_err(|source| SchedulerError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            self.logger.warn(line);
        }

        if !output.status.success() {
            return Err(SchedulerError::CommandFailed {
                command: command.to_string(),
                code: output.status.code().unwrap_or(-1),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn start_watcher(&self) -> SchedulerResult<()> {
        let Some(command) = self.config.watch_command.as_deref() else {
            return Ok(());
        };

        let mut cmd = self.shell(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|source| SchedulerError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let Some(stdout) = child.stdout.take() else {
            self.logger.warn("Watch command stdout not captured");
            return Ok(());
        };

        let token = CancellationToken::new();
        let task_token = token.clone();
        let kill_switch = self.kill_switch.clone();
        let logger = self.logger.clone();

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            dispatch_control_line(&line, &kill_switch, logger.as_ref());
                        }
                        Ok(None) => break,
                        Err(e) => {
                            logger.warn(&format!("Failed to read watch command output: {}", e));
                            break;
                        }
                    }
                }
            }

            let _ = child.start_kill();
            let _ = child.wait().await;
        });

        if let Ok(mut guard) = self.watcher.lock() {
            *guard = Some(Watcher { token, handle });
        }

        Ok(())
    }

    async fn stop_watcher(&self) {
        let watcher = self.watcher.lock().ok().and_then(|mut guard| guard.take());
        if let Some(watcher) = watcher {
            watcher.token.cancel();
            let _ = watcher.handle.await;
        }
    }

    async fn finish(&self, action: &str, command: Option<&str>) -> SchedulerResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            self.logger
                .debug(&format!("Session already stopped, ignoring {}", action));
            return Ok(());
        }

        self.logger.info(&format!(
            "Scheduler session {}: {}",
            self.session_id, action
        ));
        self.stop_watcher().await;

        if let Some(command) = command {
            self.run_command(command).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl EventScheduler for CommandScheduler {
    async fn start_session(&self) -> SchedulerResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            self.logger
                .warn("Session already stopped, not starting it again");
            return Ok(());
        }

        if self.started.swap(true, Ordering::SeqCst) {
            self.logger.debug("Session already started");
            return Ok(());
        }

        self.logger.info(&format!(
            "Scheduler session {}: start",
            self.session_id
        ));
        self.start_watcher()?;

        if let Some(command) = self.config.start_command.clone() {
            self.run_command(&command).await?;
        }

        Ok(())
    }

    async fn stop_session(&self) -> SchedulerResult<()> {
        self.finish("stop", self.config.stop_command.as_deref()).await
    }

    async fn abort_session(&self) -> SchedulerResult<()> {
        self.finish("abort", self.config.abort_command.as_deref())
            .await
    }

    fn add_kill_switch(&self, switch: Arc<dyn KillSwitch>) {
        if let Ok(mut guard) = self.kill_switch.lock() {
            *guard = Some(switch);
        }
    }

    fn remove_kill_switch(&self) {
        if let Ok(mut guard) = self.kill_switch.lock() {
            guard.take();
        }
    }

    fn is_session_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn run_identifier(&self) -> Option<String> {
        self.run_id.clone()
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// Parses `kill|abort|stop [message]` (case-insensitive).
pub fn parse_control_line(line: &str) -> Option<(CancelReason, String)> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let reason = match word.to_ascii_lowercase().as_str() {
        "kill" => CancelReason::Kill,
        "abort" => CancelReason::Abort,
        "stop" => CancelReason::Stop,
        _ => return None,
    };

    let message = if rest.is_empty() {
        format!("{} requested by watch command", reason)
    } else {
        rest.to_string()
    };

    Some((reason, message))
}

fn dispatch_control_line(line: &str, kill_switch: &SharedKillSwitch, logger: &dyn EventLogger) {
    let Some((reason, message)) = parse_control_line(line) else {
        if !line.trim().is_empty() {
            logger.debug(line);
        }
        return;
    };

    let switch = kill_switch.lock().ok().and_then(|guard| guard.clone());
    match switch {
        Some(switch) => switch.trigger(reason, &message),
        None => logger.warn(&format!(
            "Watch command requested {} but no test is running",
            reason
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::ProcessKillSwitch;
    use crate::scheduler::TracingEventLogger;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CommandSchedulerConfig {
        CommandSchedulerConfig {
            working_dir: Some(dir.path().to_path_buf()),
            timeout_secs: 10,
            ..Default::default()
        }
    }

    async fn connect(config: CommandSchedulerConfig) -> CommandScheduler {
        CommandScheduler::connect(config, Arc::new(TracingEventLogger::new(true)))
            .await
            .unwrap()
    }

    fn events(dir: &TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("events"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_control_line() {
        assert_eq!(
            parse_control_line("kill error rate above 5%"),
            Some((CancelReason::Kill, "error rate above 5%".to_string()))
        );
        assert_eq!(
            parse_control_line("  ABORT  "),
            Some((
                CancelReason::Abort,
                "ABORT requested by watch command".to_string()
            ))
        );
        assert_eq!(parse_control_line("stop").map(|(r, _)| r), Some(CancelReason::Stop));
        assert_eq!(parse_control_line("killing softly"), None);
        assert_eq!(parse_control_line(""), None);
    }

    #[tokio::test]
    async fn test_lifecycle_commands_run_once() {
        let dir = TempDir::new().unwrap();
        let scheduler = connect(CommandSchedulerConfig {
            start_command: Some("echo start >> events".to_string()),
            stop_command: Some("echo stop >> events".to_string()),
            abort_command: Some("echo abort >> events".to_string()),
            ..config(&dir)
        })
        .await;

        scheduler.start_session().await.unwrap();
        scheduler.start_session().await.unwrap();
        assert!(!scheduler.is_session_stopped());

        scheduler.stop_session().await.unwrap();
        scheduler.abort_session().await.unwrap();
        assert!(scheduler.is_session_stopped());

        assert_eq!(events(&dir), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn test_session_id_is_exported() {
        let dir = TempDir::new().unwrap();
        let scheduler = connect(CommandSchedulerConfig {
            start_command: Some("echo $VOLLEY_SESSION_ID >> events".to_string()),
            ..config(&dir)
        })
        .await;

        scheduler.start_session().await.unwrap();
        assert_eq!(events(&dir), vec![scheduler.session_id().to_string()]);
    }

    #[tokio::test]
    async fn test_run_id_from_command() {
        let dir = TempDir::new().unwrap();
        let scheduler = connect(CommandSchedulerConfig {
            run_id_command: Some("echo; echo '  run-42  '; echo ignored".to_string()),
            ..config(&dir)
        })
        .await;

        assert_eq!(scheduler.run_identifier().as_deref(), Some("run-42"));
    }

    #[tokio::test]
    async fn test_failing_command_is_reported() {
        let dir = TempDir::new().unwrap();
        let scheduler = connect(CommandSchedulerConfig {
            abort_command: Some("exit 3".to_string()),
            ..config(&dir)
        })
        .await;

        let err = scheduler.abort_session().await.unwrap_err();
        assert!(matches!(err, SchedulerError::CommandFailed { code: 3, .. }));
        assert!(scheduler.is_session_stopped());
    }

    #[tokio::test]
    async fn test_watch_command_fires_kill_switch() {
        let dir = TempDir::new().unwrap();
        let scheduler = connect(CommandSchedulerConfig {
            watch_command: Some("echo 'kill response time breached'; sleep 30".to_string()),
            ..config(&dir)
        })
        .await;

        let switch = Arc::new(ProcessKillSwitch::new("smoke.jmx"));
        scheduler.add_kill_switch(switch.clone());
        scheduler.start_session().await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(10),
            switch.termination_token().cancelled(),
        )
        .await
        .expect("kill switch was not triggered");
        assert_eq!(switch.reason(), Some(CancelReason::Kill));

        tokio::time::timeout(Duration::from_secs(10), scheduler.stop_session())
            .await
            .expect("watcher did not shut down")
            .unwrap();
    }

    #[tokio::test]
    async fn test_control_line_between_tests_reaches_no_switch() {
        let dir = TempDir::new().unwrap();
        let scheduler = connect(config(&dir)).await;
        let logger = TracingEventLogger::new(true);

        let finished = Arc::new(ProcessKillSwitch::new("first.jmx"));
        scheduler.add_kill_switch(finished.clone());
        scheduler.remove_kill_switch();

        dispatch_control_line("kill during pause", &scheduler.kill_switch, &logger);
        assert_eq!(finished.reason(), None);
        assert!(scheduler.kill_switch.lock().unwrap().is_none());

        let running = Arc::new(ProcessKillSwitch::new("second.jmx"));
        scheduler.add_kill_switch(running.clone());
        dispatch_control_line("stop", &scheduler.kill_switch, &logger);
        assert_eq!(running.reason(), Some(CancelReason::Stop));
    }
}
