//! Host shutdown handling.
//!
//! [`listen_for_shutdown`] turns SIGINT/SIGTERM into a cancelled host token
//! for the whole run. While a test subprocess is alive a [`ShutdownHook`]
//! watches that token: when it fires, the scheduler session is aborted
//! (unless already stopped) and only then is the subprocess terminated.
//! Dropping the hook deregisters it, unless the host token has already been
//! cancelled: a hook that has fired always runs to completion.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::scheduler::EventScheduler;

/// Exit code used when a second shutdown signal forces an immediate exit.
const FORCED_EXIT_CODE: i32 = 130;

/// Scoped guard active for the lifetime of one subprocess.
#[derive(Debug)]
pub struct ShutdownHook {
    host_interrupt: CancellationToken,
    terminate: CancellationToken,
    handle: JoinHandle<()>,
}

impl ShutdownHook {
    pub fn install(
        host_interrupt: CancellationToken,
        scheduler: Option<Arc<dyn EventScheduler>>,
    ) -> Self {
        let terminate = CancellationToken::new();
        let fired = terminate.clone();
        let watched = host_interrupt.clone();

        let handle = tokio::spawn(async move {
            watched.cancelled().await;
            info!("Shutdown detected, destroying engine process...");

            if let Some(scheduler) = scheduler {
                if !scheduler.is_session_stopped() {
                    info!("Aborting {} session", scheduler.name());
                    if let Err(e) = scheduler.abort_session().await {
                        warn!("Failed to abort scheduler session: {}", e);
                    }
                }
            }

            fired.cancel();
        });

        Self {
            host_interrupt,
            terminate,
            handle,
        }
    }

    /// Cancelled once the hook has run and the subprocess must go.
    pub fn termination_token(&self) -> CancellationToken {
        self.terminate.clone()
    }

    /// Deregisters the hook once its subprocess has ended. If the host has
    /// asked to shut down, waits for the scheduler abort to finish first.
    pub async fn release(mut self) {
        if !self.host_interrupt.is_cancelled() {
            return;
        }

        if let Err(e) = (&mut self.handle).await {
            if !e.is_cancelled() {
                warn!("Shutdown hook failed: {}", e);
            }
        }
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        // Detach rather than abort once fired, so the scheduler abort completes.
        if !self.host_interrupt.is_cancelled() {
            self.handle.abort();
        }
    }
}

/// Cancels `token` on the first SIGINT/SIGTERM; exits the process on the second.
pub fn listen_for_shutdown(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Shutdown signal received, stopping the running test");
        token.cancel();

        wait_for_signal().await;
        error!("Second shutdown signal received, exiting immediately");
        std::process::exit(FORCED_EXIT_CODE);
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
