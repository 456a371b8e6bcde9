//! Signal-driven shutdown for a restore run.
//!
//! The first interrupt cancels the run gracefully; a second one while the
//! shutdown is in progress forces the process to exit. The state machine is
//! driven by a plain channel so it can be exercised without real signals.

use crate::models::RestoreResult;
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Exit code used when a second interrupt forces termination (128 + SIGINT).
pub const FORCED_EXIT_CODE: i32 = 130;

/// Shutdown progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// No interrupt seen yet
    Armed,
    /// Cancellation requested; waiting for the run to stop
    ShutdownRequested,
    /// Second interrupt; the process is terminated
    ForceExit,
}

impl ShutdownState {
    /// State after one more interrupt.
    pub fn on_signal(self) -> Self {
        match self {
            Self::Armed => Self::ShutdownRequested,
            Self::ShutdownRequested | Self::ForceExit => Self::ForceExit,
        }
    }
}

type ForceExitFn = Arc<dyn Fn() + Send + Sync>;

/// Applies interrupts to a cancellation token.
pub struct LifecycleController {
    cancel: CancellationToken,
    force_exit: ForceExitFn,
}

impl LifecycleController {
    /// Creates a controller whose forced exit terminates the process.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            force_exit: Arc::new(|| std::process::exit(FORCED_EXIT_CODE)),
        }
    }

    /// Replaces the forced-exit action.
    pub fn with_force_exit(mut self, force_exit: impl Fn() + Send + Sync + 'static) -> Self {
        self.force_exit = Arc::new(force_exit);
        self
    }

    /// Processes triggers until the channel closes or a forced exit happens.
    ///
    /// Returns the final state.
    pub async fn run(self, mut triggers: mpsc::Receiver<()>) -> ShutdownState {
        let mut state = ShutdownState::Armed;
        while triggers.recv().await.is_some() {
            state = state.on_signal();
            match state {
                ShutdownState::ShutdownRequested => {
                    warn!("Interrupt received, stopping restore (interrupt again to force exit)");
                    self.cancel.cancel();
                }
                ShutdownState::ForceExit => {
                    error!("Second interrupt received, forcing exit");
                    (self.force_exit)();
                    break;
                }
                ShutdownState::Armed => {}
            }
        }
        state
    }

    /// Spawns [`LifecycleController::run`] on the current runtime.
    pub fn spawn(self, triggers: mpsc::Receiver<()>) -> JoinHandle<ShutdownState> {
        tokio::spawn(self.run(triggers))
    }
}

/// Forwards SIGINT (and SIGTERM on Unix) into `triggers`.
pub fn spawn_signal_forwarder(triggers: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {}", e);
                    None
                }
            };

        loop {
            #[cfg(unix)]
            let received = tokio::select! {
                result = tokio::signal::ctrl_c() => result.is_ok(),
                Some(()) = async {
                    match terminate.as_mut() {
                        Some(signal) => signal.recv().await,
                        None => std::future::pending().await,
                    }
                } => true,
            };
            #[cfg(not(unix))]
            let received = tokio::signal::ctrl_c().await.is_ok();

            if !received || triggers.send(()).await.is_err() {
                break;
            }
        }
    })
}

/// Installed signal handling for one run.
pub struct SignalHandlers {
    forwarder: JoinHandle<()>,
    controller: JoinHandle<ShutdownState>,
}

impl SignalHandlers {
    /// Wires OS signals to `cancel` through a [`LifecycleController`].
    pub fn install(cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(4);
        Self {
            forwarder: spawn_signal_forwarder(tx),
            controller: LifecycleController::new(cancel).spawn(rx),
        }
    }

    /// Stops listening for signals and returns the final shutdown state.
    pub async fn shutdown(self) -> ShutdownState {
        self.forwarder.abort();
        let _ = self.forwarder.await;
        self.controller.await.unwrap_or(ShutdownState::Armed)
    }
}

/// Awaits a run and classifies its outcome.
///
/// Errors caused by cancellation are logged as a warning and mapped to
/// `Ok(None)`; any other error is logged and returned. Either way the
/// backup and drops recorded in a partial result are logged.
pub async fn run_with_lifecycle<F>(cancel: &CancellationToken, operation: F) -> Result<Option<RestoreResult>>
where
    F: Future<Output = Result<RestoreResult>>,
{
    match operation.await {
        Ok(result) => Ok(Some(result)),
        Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
            warn!("Restore cancelled: {}", e.cause());
            if let Some(partial) = e.partial_result() {
                log_partial(partial);
            }
            Ok(None)
        }
        Err(e) => {
            error!("Restore failed: {}", e.cause());
            if let Some(partial) = e.partial_result() {
                log_partial(partial);
            }
            Err(e)
        }
    }
}

fn log_partial(result: &RestoreResult) {
    if let Some(path) = result.backup_file() {
        warn!(run_id = %result.run_id, "Pre-restore backup kept at {}", path.display());
    }
    if !result.safety.dropped.is_empty() {
        warn!(
            run_id = %result.run_id,
            "Databases dropped before the run stopped: {}",
            result.safety.dropped.join(", ")
        );
    }
}
