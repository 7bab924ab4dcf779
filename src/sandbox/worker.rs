//! Worker thread owning one JS context for the lifetime of a run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, JsError, Source};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};
use uuid::Uuid;

use super::protocol::{Envelope, WireMessage};
use crate::config::limits::WORKER_STACK_BYTES;
use crate::core::SandboxOptions;
use crate::runtime::suite::{InvokeError, RunError};
use crate::runtime::{self, error_message, error_stack, event_loop, harness, Scope, ScopeHandle};

pub(crate) struct WorkerJob {
    pub context_id: Uuid,
    pub program: String,
    pub outbox: UnboundedSender<Envelope>,
    pub cancel: Arc<AtomicBool>,
    pub options: SandboxOptions,
}

pub(crate) fn spawn(job: WorkerJob) -> std::io::Result<()> {
    let short_id: String = job.context_id.simple().to_string().chars().take(8).collect();
    std::thread::Builder::new()
        .name(format!("sandtest-{short_id}"))
        .stack_size(WORKER_STACK_BYTES)
        .spawn(move || run(job))?;
    Ok(())
}

fn run(job: WorkerJob) {
    let WorkerJob {
        context_id,
        program,
        outbox,
        cancel,
        options,
    } = job;
    let scope = ScopeHandle::new(Scope::new(context_id, outbox, cancel, options.visible));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(&program, &scope, &options)));
    if let Err(payload) = outcome {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(target = "sandtest", %context_id, %message, "sandbox worker panicked");
        scope.post(WireMessage::error(format!("sandbox worker panicked: {message}"), ""));
    }
    scope.teardown();
    debug!(target = "sandtest", %context_id, "sandbox worker finished");
}

fn execute(program: &str, scope: &ScopeHandle, options: &SandboxOptions) {
    let mut ctx = Context::default();
    ctx.runtime_limits_mut()
        .set_loop_iteration_limit(options.loop_iteration_limit);
    ctx.runtime_limits_mut().set_recursion_limit(options.recursion_limit);

    if let Err(err) = runtime::install(&mut ctx, scope) {
        report(&mut ctx, scope, &err);
        return;
    }
    let completion = match ctx.eval(Source::from_bytes(program)) {
        Ok(value) => value,
        Err(err) => {
            report(&mut ctx, scope, &err);
            return;
        }
    };
    let promise = completion
        .as_object()
        .and_then(|obj| JsPromise::from_object(obj.clone()).ok());
    drive(&mut ctx, scope, promise.as_ref());
}

fn report(ctx: &mut Context, scope: &ScopeHandle, err: &JsError) {
    let message = error_message(err, ctx);
    let stack = error_stack(err, ctx);
    scope.post(WireMessage::error(message, stack));
}

/// Stops the run unless the host already gave up on it.
fn abort(scope: &ScopeHandle, reason: String) {
    if scope.is_cancelled() {
        debug!(target = "sandtest", "worker cancelled");
        return;
    }
    scope.post(WireMessage::error(reason, ""));
}

/// Turns the event loop until a terminal message went out, the program
/// finished, or the host cancelled. A `run()` request is served here, at
/// the top of the loop, never from inside a job.
fn drive(ctx: &mut Context, scope: &ScopeHandle, program: Option<&JsPromise>) {
    loop {
        if scope.terminal_sent() {
            return;
        }
        let fired = match event_loop::tick(ctx, scope) {
            Ok(fired) => fired,
            Err(InvokeError::Aborted(reason) | InvokeError::Thrown(reason)) => {
                abort(scope, reason);
                return;
            }
        };
        if let Some(resolvers) = scope.take_run_request() {
            if let Err(err) = harness::drive_run(ctx, scope, resolvers) {
                let reason = match err {
                    RunError::Aborted(reason) => reason,
                    other => other.to_string(),
                };
                abort(scope, reason);
                return;
            }
            continue;
        }
        if scope.terminal_sent() {
            return;
        }
        let finished = program.map_or(true, |promise| !matches!(promise.state(), PromiseState::Pending));
        if finished {
            scope.post(WireMessage::error("program finished without reporting results", ""));
            return;
        }
        if fired == 0 {
            event_loop::idle(scope);
        }
    }
}
