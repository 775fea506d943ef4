//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cancel::{CancelReason, KillSwitch};
use crate::config::EngineConfig;
use crate::scheduler::{EventScheduler, SchedulerResult};

/// Scheduler double recording every lifecycle call.
#[derive(Default)]
pub struct RecordingScheduler {
    events: Mutex<Vec<String>>,
    switches: Mutex<Vec<Arc<dyn KillSwitch>>>,
    stopped: AtomicBool,
    starts: AtomicUsize,
    released: AtomicUsize,
    run_id: Option<String>,
    cancel_on_start: HashMap<usize, CancelReason>,
    abort_delay: Duration,
    start_gate: Option<PathBuf>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    /// Fires the newest kill switch when the `nth` session start arrives.
    pub fn cancel_on_start(mut self, nth: usize, reason: CancelReason) -> Self {
        self.cancel_on_start.insert(nth, reason);
        self
    }

    /// Marks the session stopped at once but records `abort` only after `delay`.
    pub fn with_abort_delay(mut self, delay: Duration) -> Self {
        self.abort_delay = delay;
        self
    }

    /// Holds `start_session` until `path` exists. Records `start-gate-timeout`
    /// if it does not appear within five seconds.
    pub fn with_start_gate(mut self, path: &Path) -> Self {
        self.start_gate = Some(path.to_path_buf());
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn switch_count(&self) -> usize {
        self.switches.lock().unwrap().len()
    }

    /// Number of `remove_kill_switch` calls.
    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

#[async_trait]
impl EventScheduler for RecordingScheduler {
    async fn start_session(&self) -> SchedulerResult<()> {
        if let Some(gate) = &self.start_gate {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !gate.exists() {
                if Instant::now() > deadline {
                    self.record("start-gate-timeout");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        self.record("start");
        let nth = self.starts.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.cancel_on_start.get(&nth) {
            let switch = self.switches.lock().unwrap().last().cloned();
            if let Some(switch) = switch {
                switch.trigger(*reason, "cancelled by recording scheduler");
            }
        }
        Ok(())
    }

    async fn stop_session(&self) -> SchedulerResult<()> {
        self.record("stop");
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_session(&self) -> SchedulerResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        if !self.abort_delay.is_zero() {
            tokio::time::sleep(self.abort_delay).await;
        }
        self.record("abort");
        Ok(())
    }

    fn add_kill_switch(&self, switch: Arc<dyn KillSwitch>) {
        self.switches.lock().unwrap().push(switch);
    }

    fn remove_kill_switch(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn is_session_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn run_identifier(&self) -> Option<String> {
        self.run_id.clone()
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Writes a shell script used as a test definition.
pub fn write_script(root: &Path, relative: &str, body: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, body).unwrap();
    path
}

/// Engine that runs each test definition with `sh`, passing the result path
/// as `$1`. Anything appended to the command line follows as `$2...`.
pub fn sh_engine(results_dir: &Path) -> EngineConfig {
    EngineConfig {
        program: "sh".to_string(),
        arguments: vec!["{test}".to_string(), "{results}".to_string()],
        results_dir: results_dir.to_path_buf(),
        ..Default::default()
    }
}
