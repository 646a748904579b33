//! Graceful shutdown
//!
//! The controller owns the root cancellation token. The host hands
//! [`ShutdownController::token`] to the [`TaskRegistrar`], so cancelling the
//! root stops every recurring job at once.
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//! let registrar = Arc::new(TaskRegistrar::new(shutdown.token()));
//!
//! // ... initialize the orchestrator with the registrar ...
//!
//! wait_for_shutdown_signal().await;
//! shutdown.shutdown(&orchestrator).await;
//! ```
//!
//! [`TaskRegistrar`]: crate::scheduler::TaskRegistrar

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::Orchestrator;


/// Default time given to the schedulers to stop
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Jobs are scheduled normally
    Running,
    /// The orchestrator is unscheduling its jobs
    Stopping,
    /// The root token is cancelled, remaining jobs wind down
    Draining,
    /// The timeout elapsed before the orchestrator stopped
    Terminating,
    /// Shutdown complete
    Terminated,
}

impl ShutdownPhase {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Stopping,
            2 => Self::Draining,
            3 => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminating => write!(f, "Terminating"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Coordinates the shutdown of the orchestrator and its recurring jobs
pub struct ShutdownController {
    /// Root of every job token
    cancel_token: CancellationToken,
    /// Phase change events
    shutdown_tx: broadcast::Sender<ShutdownPhase>,
    phase: AtomicU32,
    shutdown_initiated: AtomicBool,
    /// Time given to the orchestrator to unschedule its jobs
    timeout: Duration,
}

impl ShutdownController {
    /// Create a controller with the default timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS))
    }

    /// Create a controller with a custom timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            shutdown_tx,
            phase: AtomicU32::new(ShutdownPhase::Running as u32),
            shutdown_initiated: AtomicBool::new(false),
            timeout,
        })
    }

    /// Child token for a registrar or another component
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Subscribe to phase changes
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.shutdown_tx.subscribe()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u32(self.phase.load(Ordering::SeqCst))
    }

    /// Whether shutdown has been initiated
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u32, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(phase);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Stop the orchestrator, then cancel every remaining job
    ///
    /// The orchestrator gets [`Self::with_timeout`]'s delay to unschedule
    /// its jobs; past it the root token is cancelled anyway. Only the first
    /// call has an effect.
    pub async fn shutdown(&self, orchestrator: &Orchestrator) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }

        info!("Initiating graceful shutdown...");
        self.set_phase(ShutdownPhase::Stopping);

        let stopped = tokio::time::timeout(self.timeout, orchestrator.shutdown()).await;

        if stopped.is_err() {
            warn!(
                timeout_secs = self.timeout.as_secs(),
                "The orchestrator did not stop in time, cancelling its jobs"
            );
            self.set_phase(ShutdownPhase::Terminating);
        } else {
            self.set_phase(ShutdownPhase::Draining);
        }

        self.cancel_token.cancel();
        self.set_phase(ShutdownPhase::Terminated);
        info!("Graceful shutdown complete");
    }

    /// Cancel every job without waiting for the orchestrator
    pub fn force_shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!("Force shutdown initiated");
            self.set_phase(ShutdownPhase::Terminating);
            self.cancel_token.cancel();
            self.set_phase(ShutdownPhase::Terminated);
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
