//! Interrupt and terminate handling
//!
//! Signals only move the run to `Stopping`. In-flight files and entries are
//! never interrupted; both dispatch levels stop claiming and the run drains.

use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::run::PipelineRun;

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    run: Arc<PipelineRun>,
}

impl ShutdownCoordinator {
    pub fn new(run: Arc<PipelineRun>) -> Self {
        Self { run }
    }

    /// Request a stop. Idempotent; returns whether this call made the transition.
    pub fn trigger(&self) -> bool {
        let transitioned = self.run.request_stop();
        if transitioned {
            info!(run_id = %self.run.id(), "Stop requested, finishing in-flight work");
        }
        transitioned
    }

    /// Listen for Ctrl+C and SIGTERM for the life of the returned task.
    ///
    /// The caller aborts the task once the run is over.
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.listen().await })
    }

    async fn listen(&self) {
        #[cfg(unix)]
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                None
            }
        };

        loop {
            #[cfg(unix)]
            let term = async {
                match terminate.as_mut() {
                    Some(stream) => stream.recv().await,
                    None => std::future::pending().await,
                }
            };

            #[cfg(not(unix))]
            let term = std::future::pending::<Option<()>>();

            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to install Ctrl+C handler: {}", e);
                        return;
                    }
                    info!("Received Ctrl+C");
                },
                received = term => {
                    if received.is_none() {
                        return;
                    }
                    info!("Received terminate signal");
                },
            }

            self.trigger();
        }
    }
}
