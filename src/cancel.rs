//! Cancellation bridge between the external scheduler and the running test.
//!
//! The scheduler receives a [`KillSwitch`] once a test subprocess has been
//! launched. Any of its three actions records why the test is being
//! cancelled and asks the supervisor to terminate the subprocess. The
//! actions may be called from any thread, sync or async, while the
//! supervisor is draining output and waiting on the process.
//!
//! The reason lives in a [`CancellationState`]: an atomic slot that moves
//! from "none" to exactly one reason and then never changes. Termination is
//! requested through a [`CancellationToken`] rather than by touching the
//! process handle directly; the supervisor owns the child and reacts to the
//! token.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why the scheduler cancelled a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    Kill,
    Abort,
    Stop,
}

impl CancelReason {
    fn code(self) -> u8 {
        match self {
            CancelReason::Kill => 1,
            CancelReason::Abort => 2,
            CancelReason::Stop => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CancelReason::Kill),
            2 => Some(CancelReason::Abort),
            3 => Some(CancelReason::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CancelReason::Kill => "KILL",
            CancelReason::Abort => "ABORT",
            CancelReason::Stop => "STOP",
        };
        f.write_str(name)
    }
}

/// Single-assignment cancellation slot for one subprocess execution.
#[derive(Debug, Default)]
pub struct CancellationState {
    reason: AtomicU8,
}

impl CancellationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason` if no reason has been recorded yet.
    ///
    /// Returns true when this call won.
    pub fn record(&self, reason: CancelReason) -> bool {
        self.reason
            .compare_exchange(0, reason.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The recorded reason, if any.
    pub fn get(&self) -> Option<CancelReason> {
        CancelReason::from_code(self.reason.load(Ordering::Acquire))
    }
}

/// Actions an external scheduler can take against the running test.
pub trait KillSwitch: Send + Sync {
    fn kill(&self, message: &str);

    fn abort(&self, message: &str);

    fn stop(&self, message: &str);

    /// Dispatches on a reason; used by schedulers that receive reasons as data.
    fn trigger(&self, reason: CancelReason, message: &str) {
        match reason {
            CancelReason::Kill => self.kill(message),
            CancelReason::Abort => self.abort(message),
            CancelReason::Stop => self.stop(message),
        }
    }
}

/// Kill-switch bound to one supervised subprocess.
///
/// Created fresh for every test, so its state always starts empty.
#[derive(Debug, Clone)]
pub struct ProcessKillSwitch {
    test: String,
    state: Arc<CancellationState>,
    terminate: CancellationToken,
}

impl ProcessKillSwitch {
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            state: Arc::new(CancellationState::new()),
            terminate: CancellationToken::new(),
        }
    }

    /// The recorded reason, read by the supervisor after termination.
    pub fn reason(&self) -> Option<CancelReason> {
        self.state.get()
    }

    /// Token cancelled when termination has been requested.
    pub fn termination_token(&self) -> CancellationToken {
        self.terminate.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.terminate.is_cancelled()
    }

    fn fire(&self, reason: CancelReason, message: &str) {
        if self.state.record(reason) {
            info!(
                "Terminating running test {} ({}), message: {}",
                self.test, reason, message
            );
        } else {
            debug!(
                "Ignoring {} for {}: already cancelled with {:?}",
                reason,
                self.test,
                self.state.get()
            );
        }
        self.terminate.cancel();
    }
}

impl KillSwitch for ProcessKillSwitch {
    fn kill(&self, message: &str) {
        self.fire(CancelReason::Kill, message);
    }

    fn abort(&self, message: &str) {
        self.fire(CancelReason::Abort, message);
    }

    fn stop(&self, message: &str) {
        self.fire(CancelReason::Stop, message);
    }
}
