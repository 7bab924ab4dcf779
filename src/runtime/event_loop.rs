//! Worker-side event loop: microtasks, due real timers, cancellation.
//!
//! The interpreter only runs jobs when asked, so anything that waits on a
//! promise spins here. Each turn drains the job queue, fires due real
//! timers, then checks for cancellation and uncaught timer errors.

use std::time::Duration;

use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, JsValue};

use super::suite::InvokeError;
use super::timers::{fire_due_real, next_real_due_in};
use super::{thrown_message, ScopeHandle};
use crate::config::timeouts::EVENT_LOOP_IDLE_SLICE;

/// One turn of the loop. Returns the number of real timers fired.
pub fn tick(ctx: &mut Context, scope: &ScopeHandle) -> Result<usize, InvokeError> {
    ctx.run_jobs();
    let fired = fire_due_real(ctx, scope);
    if fired > 0 {
        ctx.run_jobs();
    }
    check(scope)?;
    Ok(fired)
}

fn check(scope: &ScopeHandle) -> Result<(), InvokeError> {
    if scope.is_cancelled() {
        return Err(InvokeError::Aborted("cancelled".into()));
    }
    if let Some(message) = scope.take_uncaught() {
        return Err(InvokeError::Aborted(message));
    }
    Ok(())
}

/// Sleeps until the next real timer is due, capped at one idle slice.
pub fn idle(scope: &ScopeHandle) {
    let slice = match next_real_due_in(scope) {
        Some(ms) => Duration::from_millis(ms).min(EVENT_LOOP_IDLE_SLICE),
        None => EVENT_LOOP_IDLE_SLICE,
    };
    if !slice.is_zero() {
        std::thread::sleep(slice);
    }
}

/// Spins the loop until `promise` settles. A rejection becomes
/// [`InvokeError::Thrown`] carrying the reason's message.
pub fn settle(ctx: &mut Context, scope: &ScopeHandle, promise: &JsPromise) -> Result<JsValue, InvokeError> {
    loop {
        let fired = tick(ctx, scope)?;
        match promise.state() {
            PromiseState::Fulfilled(value) => return Ok(value),
            PromiseState::Rejected(reason) => {
                return Err(InvokeError::Thrown(thrown_message(&reason, ctx)));
            }
            PromiseState::Pending => {
                if fired == 0 {
                    idle(scope);
                }
            }
        }
    }
}

/// Awaits `value` when it is a promise; flushes pending jobs otherwise.
pub fn resolve(ctx: &mut Context, scope: &ScopeHandle, value: &JsValue) -> Result<JsValue, InvokeError> {
    let promise = value
        .as_object()
        .and_then(|obj| JsPromise::from_object(obj.clone()).ok());
    match promise {
        Some(promise) => settle(ctx, scope, &promise),
        None => {
            tick(ctx, scope)?;
            Ok(value.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::*;

    fn promise_of(fx: &mut Fixture, code: &str) -> JsPromise {
        let value = fx.eval(code).expect("eval");
        let obj = value.as_object().cloned().expect("object");
        JsPromise::from_object(obj).expect("promise")
    }

    #[test]
    fn settles_after_real_timer() {
        let mut fx = Fixture::new();
        let promise = promise_of(&mut fx, "new Promise((resolve) => setTimeout(() => resolve('late'), 20))");
        let value = settle(&mut fx.ctx, &fx.scope, &promise).expect("settled");
        assert_eq!(value.as_string().map(|s| s.to_std_string_escaped()).as_deref(), Some("late"));
    }

    #[test]
    fn rejection_reports_reason_message() {
        let mut fx = Fixture::new();
        let promise = promise_of(&mut fx, "Promise.reject(new Error('denied'))");
        let err = settle(&mut fx.ctx, &fx.scope, &promise).expect_err("rejected");
        assert_eq!(err, InvokeError::Thrown("denied".into()));
    }

    #[test]
    fn uncaught_timer_error_aborts_wait() {
        let mut fx = Fixture::new();
        let promise = promise_of(
            &mut fx,
            "setTimeout(() => { throw new Error('kaboom'); }, 0); new Promise(() => {})",
        );
        let err = settle(&mut fx.ctx, &fx.scope, &promise).expect_err("aborted");
        assert_eq!(
            err,
            InvokeError::Aborted("Uncaught error in timer callback: kaboom".into())
        );
    }

    #[test]
    fn non_promise_values_pass_through() {
        let mut fx = Fixture::new();
        let value = resolve(&mut fx.ctx, &fx.scope, &JsValue::from(3)).expect("value");
        assert_eq!(value.as_number(), Some(3.0));
    }
}
