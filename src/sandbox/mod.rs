//! Execution sandbox: one isolated JS context per run, on its own thread.
//!
//! The host side waits on a per-run channel with a deadline. Only messages
//! stamped with the run's context id are honored, the first `results` or
//! `error` ends the run, and dropping the wait (timeout included) tells the
//! worker to stop at its next event-loop turn.

pub mod protocol;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use self::protocol::{ErrorPayload, WireMessage};
use crate::config::errors;
use crate::core::SandboxOptions;
use crate::runtime::suite::ExecutionResult;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{}: test run timed out after {}ms", errors::ERR_SANDBOX_TIMEOUT, .0.as_millis())]
    Timeout(Duration),
    #[error("{}: {message}", errors::ERR_SANDBOX_CONTEXT)]
    Context { message: String, stack: String },
    #[error("{}: sandbox worker exited without reporting a result", errors::ERR_SANDBOX_DISCONNECTED)]
    Disconnected,
    #[error("{}: failed to start sandbox worker: {0}", errors::ERR_SANDBOX_SPAWN)]
    Spawn(#[source] std::io::Error),
}

/// Sets the flag when the host stops waiting, however that happens.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct Sandbox {
    options: SandboxOptions,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxOptions::default())
    }
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Runs `program` in a fresh context. `status` payloads go to
    /// `on_status`; the first terminal message decides the outcome.
    /// Taking `&mut self` keeps at most one run in flight per sandbox.
    pub async fn execute<F>(&mut self, program: String, mut on_status: F) -> Result<ExecutionResult, SandboxError>
    where
        F: FnMut(Value),
    {
        let context_id = Uuid::new_v4();
        let span = tracing::info_span!("sandbox_execute", %context_id, bytes = program.len());
        async move {
            let (outbox, mut inbox) = mpsc::unbounded_channel();
            let cancel = Arc::new(AtomicBool::new(false));
            let _guard = CancelOnDrop(cancel.clone());
            let deadline = Instant::now() + self.options.timeout;

            worker::spawn(worker::WorkerJob {
                context_id,
                program,
                outbox,
                cancel,
                options: self.options.clone(),
            })
            .map_err(SandboxError::Spawn)?;

            loop {
                let envelope = match timeout_at(deadline, inbox.recv()).await {
                    Err(_) => {
                        warn!(target = "sandtest", timeout_ms = self.options.timeout.as_millis() as u64, "run timed out");
                        return Err(SandboxError::Timeout(self.options.timeout));
                    }
                    Ok(None) => return Err(SandboxError::Disconnected),
                    Ok(Some(envelope)) => envelope,
                };
                if envelope.context_id != context_id {
                    debug!(target = "sandtest", from = %envelope.context_id, "ignoring message from another context");
                    continue;
                }
                match envelope.message {
                    WireMessage::Status(payload) => on_status(payload),
                    WireMessage::Results(result) => {
                        info!(
                            target = "sandtest",
                            total = result.num_total_tests,
                            failed = result.num_failed_tests,
                            "run completed"
                        );
                        return Ok(result);
                    }
                    WireMessage::Error(ErrorPayload { message, stack }) => {
                        warn!(target = "sandtest", %message, "run failed");
                        return Err(SandboxError::Context { message, stack });
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
