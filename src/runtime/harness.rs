//! Test registration API, the host object and the bridge that drives the
//! suite runner from the worker.
//!
//! The generated program talks to the worker through the `__sandtest` host
//! object: `post(type, json)` reports progress and outcomes, `transpile(src)`
//! lowers the bundle, `loadRunner()` hands out the capability object whose
//! members become the ambient `describe`/`it`/`expect`/... names.

use boa_engine::builtins::promise::ResolvingFunctions;
use boa_engine::object::builtins::{JsFunction, JsPromise};
use boa_engine::{js_string, Context, JsNativeError, JsObject, JsResult, JsString, JsValue};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::console::{self, Level};
use super::event_loop;
use super::suite::{self, HookKind, InvokeError, RunError, TestHost};
use super::{
    arg, call_method, call_value, display, error, error_message, expect, function, global_path,
    guidance, method, new_object, timers, type_error, vi, NativeFn, ScopeHandle,
};
use crate::config::errors::GUIDANCE_PREFIX;
use crate::sandbox::protocol::WireMessage;
use crate::transpile::transpile;

/// Names the runner exposes to test code.
pub const RUNNER_EXPORTS: &[&str] = &[
    "describe",
    "it",
    "test",
    "expect",
    "vi",
    "beforeEach",
    "afterEach",
    "beforeAll",
    "afterAll",
    "cleanup",
];

/// Global installed by the prelude's DOM layer.
pub const DOM_GLOBAL: &str = "__sandtestDom";

// ----------------------------------------------------------------------------
// Host object
// ----------------------------------------------------------------------------

pub fn build_host(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<JsObject> {
    let host = new_object(ctx);
    method(ctx, &host, "post", scope, host_post)?;
    method(ctx, &host, "loadRunner", scope, host_load_runner)?;
    method(ctx, &host, "transpile", scope, host_transpile)?;
    Ok(host)
}

/// `post(type, jsonText)`. In visible mode the rendered DOM is reported
/// right before the results.
fn host_post(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let kind = display(&arg(args, 0), ctx);
    let text = arg(args, 1);
    let payload: Value = if text.is_undefined() {
        Value::Null
    } else {
        let text = display(&text, ctx);
        serde_json::from_str(&text).map_err(|err| type_error(format!("post(): invalid payload: {err}")))?
    };
    if kind == "results" && scope.visible() {
        if let Some(html) = call_method(&global_path(ctx, &[DOM_GLOBAL])?, "html", &[], ctx)? {
            let html = display(&html, ctx);
            scope.status(json!({ "kind": "dom", "html": html }));
        }
    }
    let message = WireMessage::from_parts(&kind, payload)
        .map_err(|err| type_error(format!("post(): invalid {kind} message: {err}")))?;
    Ok(JsValue::from(scope.post(message)))
}

fn host_load_runner(_: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    Ok(build_runner(ctx, scope)?.into())
}

fn host_transpile(_: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let source = display(&arg(args, 0), ctx);
    match transpile(&source) {
        Ok(code) => Ok(JsValue::from(JsString::from(code.as_str()))),
        Err(err) => Err(JsNativeError::syntax().with_message(err.to_string()).into()),
    }
}

// ----------------------------------------------------------------------------
// Runner capability object
// ----------------------------------------------------------------------------

pub fn build_runner(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<JsObject> {
    let runner = new_object(ctx);

    let describe = test_interface(ctx, scope, "describe", describe_block)?;
    runner.set(js_string!("describe"), describe, false, ctx)?;
    let it = test_interface(ctx, scope, "it", register_test)?;
    runner.set(js_string!("it"), it, false, ctx)?;
    let test = test_interface(ctx, scope, "test", register_test)?;
    runner.set(js_string!("test"), test, false, ctx)?;

    let expect = expect::build(ctx, scope)?;
    runner.set(js_string!("expect"), expect, false, ctx)?;
    let vi = vi::build(ctx, scope)?;
    runner.set(js_string!("vi"), vi, false, ctx)?;

    let hooks: [(&str, NativeFn<ScopeHandle>); 4] = [
        ("beforeEach", before_each),
        ("afterEach", after_each),
        ("beforeAll", before_all),
        ("afterAll", after_all),
    ];
    for (name, native) in hooks {
        method(ctx, &runner, name, scope, native)?;
    }
    method(ctx, &runner, "cleanup", scope, cleanup)?;
    method(ctx, &runner, "run", scope, request_run)?;
    Ok(runner)
}

/// `name(label, fn)` plus the `.skip`, `.concurrent`, `.only` and `.each`
/// modifiers.
fn test_interface(
    ctx: &mut Context,
    scope: &ScopeHandle,
    name: &str,
    register: NativeFn<ScopeHandle>,
) -> JsResult<JsFunction> {
    let main = function(ctx, name, scope.clone(), register);
    let concurrent = function(ctx, "concurrent", scope.clone(), register);
    main.set(js_string!("concurrent"), concurrent, false, ctx)?;
    method(ctx, &main, "skip", scope, skip)?;
    method(ctx, &main, "only", scope, only)?;
    method(ctx, &main, "each", scope, each)?;
    Ok(main)
}

fn describe_block(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let name = display(&arg(args, 0), ctx);
    let body = arg(args, 1);
    if !body.is_callable() {
        return Err(type_error(format!("describe(\"{name}\") expects a callback function")));
    }
    scope.suites.borrow_mut().enter(name);
    let outcome = call_value(&body, &JsValue::undefined(), &[], ctx);
    scope.suites.borrow_mut().exit();
    outcome?;
    Ok(JsValue::undefined())
}

fn register_test(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let name = display(&arg(args, 0), ctx);
    let Some(body) = args.get(1).and_then(JsValue::as_callable).cloned() else {
        return Err(type_error(format!("test \"{name}\" expects a callback function")));
    };
    scope.suites.borrow_mut().add_test(name, body);
    Ok(JsValue::undefined())
}

fn skip(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let name = display(&arg(args, 0), ctx);
    console::emit(scope, Level::Warn, format!("{GUIDANCE_PREFIX} Skipped test: {name}"));
    Ok(JsValue::undefined())
}

fn only(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(".only is not supported. Please run specific test files instead."))
}

fn each(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(".each is not supported. Please use a standard loop."))
}

fn register_hook(args: &[JsValue], scope: &ScopeHandle, kind: HookKind) -> JsResult<JsValue> {
    let Some(callback) = args.first().and_then(JsValue::as_callable).cloned() else {
        return Err(type_error(format!("{kind}() expects a callback function")));
    };
    scope.suites.borrow_mut().add_hook(kind, callback);
    Ok(JsValue::undefined())
}

fn before_each(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    register_hook(args, scope, HookKind::BeforeEach)
}

fn after_each(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    register_hook(args, scope, HookKind::AfterEach)
}

fn before_all(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    register_hook(args, scope, HookKind::BeforeAll)
}

fn after_all(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    register_hook(args, scope, HookKind::AfterAll)
}

/// Unmounts rendered trees, restores real timers and clears storage.
fn cleanup(_: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    unmount_all(ctx)?;
    timers::use_real(ctx, scope)?;
    scope.storage.borrow_mut().clear();
    Ok(JsValue::undefined())
}

fn unmount_all(ctx: &mut Context) -> JsResult<()> {
    let dom = global_path(ctx, &[DOM_GLOBAL])?;
    call_method(&dom, "unmountAll", &[], ctx)?;
    Ok(())
}

/// `run()` returns a promise the worker settles once the suite tree has
/// been executed at the top level of the event loop.
fn request_run(_: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    if scope.pending_run.borrow().is_some() {
        return Err(error("run() is already in progress"));
    }
    let (promise, resolvers) = JsPromise::new_pending(ctx);
    *scope.pending_run.borrow_mut() = Some(resolvers);
    Ok(promise.into())
}

// ----------------------------------------------------------------------------
// Driving a run
// ----------------------------------------------------------------------------

/// [`TestHost`] over a live context: each callback is called and, when it
/// returns a promise, awaited on the event loop.
pub struct BoaHost<'a> {
    ctx: &'a mut Context,
    scope: &'a ScopeHandle,
}

impl<'a> BoaHost<'a> {
    pub fn new(ctx: &'a mut Context, scope: &'a ScopeHandle) -> Self {
        Self { ctx, scope }
    }
}

impl TestHost for BoaHost<'_> {
    type Callback = JsObject;

    fn invoke(&mut self, callback: &JsObject) -> Result<(), InvokeError> {
        let value = match callback.call(&JsValue::undefined(), &[], self.ctx) {
            Ok(value) => value,
            Err(err) => {
                event_loop::tick(self.ctx, self.scope)?;
                return Err(InvokeError::Thrown(error_message(&err, self.ctx)));
            }
        };
        event_loop::resolve(self.ctx, self.scope, &value)?;
        Ok(())
    }

    fn after_test(&mut self) -> Result<(), InvokeError> {
        if let Err(err) = unmount_all(self.ctx) {
            return Err(InvokeError::Thrown(error_message(&err, self.ctx)));
        }
        event_loop::tick(self.ctx, self.scope)?;
        Ok(())
    }
}

/// Runs the registered tree and settles the promise handed out by `run()`.
/// Hook failures reject it; the error is returned only when the run was
/// aborted and the promise is left pending.
pub fn drive_run(ctx: &mut Context, scope: &ScopeHandle, resolvers: ResolvingFunctions) -> Result<(), RunError> {
    let tree = scope.take_suites();
    let outcome = suite::run(tree, &mut BoaHost::new(ctx, scope));
    let settled = match outcome {
        Ok(result) => {
            debug!(
                target = "sandtest",
                total = result.num_total_tests,
                failed = result.num_failed_tests,
                "run finished"
            );
            serde_json::to_value(&result)
                .map_err(|err| error(format!("results could not be encoded: {err}")))
                .and_then(|json| JsValue::from_json(&json, ctx))
                .and_then(|value| resolvers.resolve.call(&JsValue::undefined(), &[value], ctx))
        }
        Err(RunError::Aborted(reason)) => return Err(RunError::Aborted(reason)),
        Err(err) => {
            warn!(target = "sandtest", error = %err, "run failed in a hook");
            let reason: JsValue = JsNativeError::error()
                .with_message(err.to_string())
                .to_opaque(ctx)
                .into();
            resolvers.reject.call(&JsValue::undefined(), &[reason], ctx)
        }
    };
    if let Err(err) = settled {
        return Err(RunError::Aborted(error_message(&err, ctx)));
    }
    Ok(())
}
