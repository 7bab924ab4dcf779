//! In-context test runtime.
//!
//! Everything user code sees as `describe`, `expect`, `vi`, timers, console
//! and storage is a native function bound to one [`Scope`]. A scope lives for
//! exactly one run on the worker thread and owns all per-run state: the suite
//! tree, the mock registry, both timer queues, stubbed globals and scratch
//! storage. Nothing is process-wide.

pub mod clock;
pub mod console;
pub mod event_loop;
pub mod expect;
pub mod harness;
pub mod mocks;
pub mod storage;
pub mod suite;
pub mod timers;
pub mod values;
pub mod vi;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use boa_engine::builtins::promise::ResolvingFunctions;
use boa_engine::object::builtins::{JsArray, JsFunction};
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::PropertyDescriptor;
use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;

use crate::config::errors::GUIDANCE_PREFIX;
use crate::sandbox::protocol::{Envelope, WireMessage};

use self::clock::FakeClock;
use self::mocks::MockRegistry;
use self::suite::SuiteTree;
use self::timers::{ScheduledCall, SavedGlobal};

// ----------------------------------------------------------------------------
// Scope
// ----------------------------------------------------------------------------

/// Per-run state shared by every native binding of one context.
pub struct Scope {
    context_id: Uuid,
    outbox: UnboundedSender<Envelope>,
    cancel: Arc<AtomicBool>,
    visible: bool,
    started: Instant,
    terminal_sent: Cell<bool>,
    pub(crate) suites: RefCell<SuiteTree<JsObject>>,
    pub(crate) mocks: RefCell<MockRegistry>,
    pub(crate) fake_clock: RefCell<FakeClock<ScheduledCall>>,
    pub(crate) real_timers: RefCell<FakeClock<ScheduledCall>>,
    /// Real timer globals saved while fake timers are installed.
    pub(crate) saved_timers: RefCell<Vec<SavedGlobal>>,
    /// Original values of globals replaced by `vi.stubGlobal`, first stub wins.
    pub(crate) stubbed: RefCell<Vec<SavedGlobal>>,
    pub(crate) storage: RefCell<BTreeMap<String, String>>,
    pub(crate) pending_run: RefCell<Option<ResolvingFunctions>>,
    pub(crate) uncaught: RefCell<Option<String>>,
    pub(crate) expectation_proto: RefCell<Option<JsObject>>,
    /// `(OriginalDate, now) => FakeDate`, compiled once at install.
    pub(crate) date_factory: RefCell<Option<JsObject>>,
}

impl Scope {
    pub fn new(
        context_id: Uuid,
        outbox: UnboundedSender<Envelope>,
        cancel: Arc<AtomicBool>,
        visible: bool,
    ) -> Self {
        Self {
            context_id,
            outbox,
            cancel,
            visible,
            started: Instant::now(),
            terminal_sent: Cell::new(false),
            suites: RefCell::new(SuiteTree::default()),
            mocks: RefCell::new(MockRegistry::default()),
            fake_clock: RefCell::new(FakeClock::default()),
            real_timers: RefCell::new(FakeClock::default()),
            saved_timers: RefCell::new(Vec::new()),
            stubbed: RefCell::new(Vec::new()),
            storage: RefCell::new(BTreeMap::new()),
            pending_run: RefCell::new(None),
            uncaught: RefCell::new(None),
            expectation_proto: RefCell::new(None),
            date_factory: RefCell::new(None),
        }
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Sends a message to the host. Anything after the first terminal
    /// message is dropped. Returns false when the message was not delivered.
    pub fn post(&self, message: WireMessage) -> bool {
        if self.terminal_sent.get() {
            return false;
        }
        if message.is_terminal() {
            self.terminal_sent.set(true);
        }
        let envelope = Envelope {
            context_id: self.context_id,
            message,
        };
        if self.outbox.send(envelope).is_err() {
            // Host stopped listening; nothing left to report to.
            self.cancel.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn status(&self, payload: Value) {
        self.post(WireMessage::Status(payload));
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Wall time since the scope was created, in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Records the first uncaught error raised outside any awaited callback.
    pub fn report_uncaught(&self, message: String) {
        let mut slot = self.uncaught.borrow_mut();
        if slot.is_none() {
            warn!(target = "sandtest", %message, "uncaught error in context");
            *slot = Some(message);
        }
    }

    pub fn take_uncaught(&self) -> Option<String> {
        self.uncaught.borrow_mut().take()
    }

    pub fn take_run_request(&self) -> Option<ResolvingFunctions> {
        self.pending_run.borrow_mut().take()
    }

    /// Replaces the registered tree with an empty one and returns it.
    pub fn take_suites(&self) -> SuiteTree<JsObject> {
        std::mem::take(&mut *self.suites.borrow_mut())
    }

    /// Drops every script object the scope holds so the context can be
    /// collected once the run is over.
    pub fn teardown(&self) {
        self.take_suites();
        self.mocks.borrow_mut().clear_registry();
        self.fake_clock.borrow_mut().uninstall();
        *self.real_timers.borrow_mut() = FakeClock::default();
        self.saved_timers.borrow_mut().clear();
        self.stubbed.borrow_mut().clear();
        self.storage.borrow_mut().clear();
        self.pending_run.borrow_mut().take();
        self.expectation_proto.borrow_mut().take();
        self.date_factory.borrow_mut().take();
    }
}

/// Cheap handle captured by every native function.
#[derive(Clone, Trace, Finalize)]
pub struct ScopeHandle {
    #[unsafe_ignore_trace]
    inner: Rc<Scope>,
}

impl ScopeHandle {
    pub fn new(scope: Scope) -> Self {
        Self {
            inner: Rc::new(scope),
        }
    }
}

impl Deref for ScopeHandle {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.inner
    }
}

// ----------------------------------------------------------------------------
// Installation
// ----------------------------------------------------------------------------

/// Name of the host object the generated program talks to.
pub const HOST_GLOBAL: &str = "__sandtest";

/// Installs the ambient globals (console, storage, real timers) and the host
/// object. The runner capability object is built lazily by `loadRunner()`.
pub fn install(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<()> {
    let global = ctx.global_object();
    let console = console::build(ctx, scope)?;
    global.set(js_string!("console"), console, false, ctx)?;
    let storage = storage::build(ctx, scope)?;
    global.set(js_string!("localStorage"), storage, false, ctx)?;
    timers::install_real(ctx, scope)?;
    let host = harness::build_host(ctx, scope)?;
    global.set(JsString::from(HOST_GLOBAL), host, false, ctx)?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Binding helpers
// ----------------------------------------------------------------------------

pub(crate) type NativeFn<T> = fn(&JsValue, &[JsValue], &T, &mut Context) -> JsResult<JsValue>;

/// Wraps `f` as a named script function carrying `captures`.
pub(crate) fn function<T>(ctx: &mut Context, name: &str, captures: T, f: NativeFn<T>) -> JsFunction
where
    T: Trace + 'static,
{
    let native = NativeFunction::from_copy_closure_with_captures(f, captures);
    FunctionObjectBuilder::new(ctx.realm(), native)
        .name(JsString::from(name))
        .length(0)
        .constructor(false)
        .build()
}

/// Defines `obj[name]` as a native method bound to the scope.
pub(crate) fn method(
    ctx: &mut Context,
    obj: &JsObject,
    name: &str,
    scope: &ScopeHandle,
    f: NativeFn<ScopeHandle>,
) -> JsResult<()> {
    let func = function(ctx, name, scope.clone(), f);
    obj.set(JsString::from(name), func, false, ctx)?;
    Ok(())
}

/// Defines a non-enumerable accessor `obj[name]` backed by `getter`.
pub(crate) fn getter<T>(ctx: &mut Context, obj: &JsObject, name: &str, captures: T, f: NativeFn<T>) -> JsResult<()>
where
    T: Trace + 'static,
{
    let get = function(ctx, name, captures, f);
    obj.define_property_or_throw(
        JsString::from(name),
        PropertyDescriptor::builder()
            .get(get)
            .enumerable(false)
            .configurable(true),
        ctx,
    )?;
    Ok(())
}

/// Defines a non-enumerable, read-only data property.
pub(crate) fn hidden(ctx: &mut Context, obj: &JsObject, name: &str, value: JsValue) -> JsResult<()> {
    obj.define_property_or_throw(
        JsString::from(name),
        PropertyDescriptor::builder()
            .value(value)
            .writable(false)
            .enumerable(false)
            .configurable(true),
        ctx,
    )?;
    Ok(())
}

pub(crate) fn new_object(ctx: &mut Context) -> JsObject {
    boa_engine::object::ObjectInitializer::new(ctx).build()
}

/// `Object.create(proto)`.
pub(crate) fn object_create(proto: &JsObject, ctx: &mut Context) -> JsResult<JsObject> {
    let create = global_path(ctx, &["Object", "create"])?;
    let created = call_value(&create, &JsValue::undefined(), &[proto.clone().into()], ctx)?;
    created
        .as_object()
        .cloned()
        .ok_or_else(|| type_error("Object.create did not return an object"))
}

pub(crate) fn arg(args: &[JsValue], index: usize) -> JsValue {
    args.get(index).cloned().unwrap_or_default()
}

pub(crate) fn js_str(value: &str) -> JsValue {
    JsValue::from(JsString::from(value))
}

pub(crate) fn error(message: impl Into<String>) -> JsError {
    JsNativeError::error().with_message(message.into()).into()
}

pub(crate) fn type_error(message: impl Into<String>) -> JsError {
    JsNativeError::typ().with_message(message.into()).into()
}

/// Error thrown by test APIs that exist only to explain what to use instead.
pub(crate) fn guidance(message: &str) -> JsError {
    error(format!("{GUIDANCE_PREFIX} {message}"))
}

/// `String(value)` without propagating conversion failures.
pub(crate) fn display(value: &JsValue, ctx: &mut Context) -> String {
    match value.to_string(ctx) {
        Ok(text) => text.to_std_string_escaped(),
        Err(_) => String::from("[unprintable]"),
    }
}

/// Message of a thrown value: `error.message` when present, else `String(error)`.
pub(crate) fn thrown_message(value: &JsValue, ctx: &mut Context) -> String {
    if let Some(obj) = value.as_object() {
        if let Ok(message) = obj.get(js_string!("message"), ctx) {
            if !message.is_undefined() {
                return display(&message, ctx);
            }
        }
    }
    display(value, ctx)
}

pub(crate) fn error_message(err: &JsError, ctx: &mut Context) -> String {
    let value = err.to_opaque(ctx);
    thrown_message(&value, ctx)
}

pub(crate) fn error_stack(err: &JsError, ctx: &mut Context) -> String {
    let value = err.to_opaque(ctx);
    value
        .as_object()
        .and_then(|obj| obj.get(js_string!("stack"), ctx).ok())
        .filter(|stack| stack.is_string())
        .map(|stack| display(&stack, ctx))
        .unwrap_or_default()
}

/// Resolves `globalThis.a.b.c`.
pub(crate) fn global_path(ctx: &mut Context, path: &[&str]) -> JsResult<JsValue> {
    let mut current = JsValue::from(ctx.global_object());
    for segment in path {
        let Some(obj) = current.as_object().cloned() else {
            return Ok(JsValue::undefined());
        };
        current = obj.get(JsString::from(*segment), ctx)?;
    }
    Ok(current)
}

pub(crate) fn call_value(callee: &JsValue, this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    match callee.as_callable() {
        Some(function) => function.call(this, args, ctx),
        None => Err(type_error("value is not a function")),
    }
}

/// Calls `target[name](...args)` when it is a function; `None` otherwise.
pub(crate) fn call_method(
    target: &JsValue,
    name: &str,
    args: &[JsValue],
    ctx: &mut Context,
) -> JsResult<Option<JsValue>> {
    let Some(obj) = target.as_object() else {
        return Ok(None);
    };
    let member = obj.get(JsString::from(name), ctx)?;
    if !member.is_callable() {
        return Ok(None);
    }
    call_value(&member, target, args, ctx).map(Some)
}

/// `Object.keys(obj)`.
pub(crate) fn object_keys(obj: &JsObject, ctx: &mut Context) -> JsResult<Vec<JsString>> {
    let keys_fn = global_path(ctx, &["Object", "keys"])?;
    let keys = call_value(&keys_fn, &JsValue::undefined(), &[obj.clone().into()], ctx)?;
    let Some(keys) = keys.as_object().cloned() else {
        return Ok(Vec::new());
    };
    let keys = JsArray::from_object(keys)?;
    let length = keys.length(ctx)?;
    let mut out = Vec::with_capacity(length as usize);
    for idx in 0..length {
        let key = keys.get(idx, ctx)?;
        if let Some(key) = key.as_string() {
            out.push(key.clone());
        }
    }
    Ok(out)
}

pub(crate) fn is_array(obj: &JsObject) -> bool {
    JsArray::from_object(obj.clone()).is_ok()
}

/// Elements of an array-like object.
pub(crate) fn array_items(obj: &JsObject, ctx: &mut Context) -> JsResult<Vec<JsValue>> {
    let length = obj.get(js_string!("length"), ctx)?.to_length(ctx)?;
    let mut items = Vec::with_capacity(length as usize);
    for idx in 0..length {
        items.push(obj.get(idx, ctx)?);
    }
    Ok(items)
}

pub(crate) fn to_array(items: impl IntoIterator<Item = JsValue>, ctx: &mut Context) -> JsValue {
    JsArray::from_iter(items, ctx).into()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Script-level harness for the binding tests.

    use super::*;
    use boa_engine::Source;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    pub struct Fixture {
        pub ctx: Context,
        pub scope: ScopeHandle,
        pub outbox: UnboundedReceiver<Envelope>,
    }

    impl Fixture {
        /// Context with the runtime installed and the runner API exposed as globals.
        pub fn new() -> Self {
            let (tx, outbox) = mpsc::unbounded_channel();
            let scope = ScopeHandle::new(Scope::new(
                Uuid::new_v4(),
                tx,
                Arc::new(AtomicBool::new(false)),
                false,
            ));
            let mut ctx = Context::default();
            install(&mut ctx, &scope).expect("install runtime");
            let runner = harness::build_runner(&mut ctx, &scope).expect("runner");
            let global = ctx.global_object();
            for name in harness::RUNNER_EXPORTS {
                let value = runner.get(JsString::from(*name), &mut ctx).expect("export");
                global
                    .set(JsString::from(*name), value, false, &mut ctx)
                    .expect("expose");
            }
            Self { ctx, scope, outbox }
        }

        pub fn eval(&mut self, code: &str) -> JsResult<JsValue> {
            self.ctx.eval(Source::from_bytes(code))
        }

        /// Evaluates `code` and renders the completion value with `String()`.
        pub fn eval_string(&mut self, code: &str) -> String {
            let value = self.eval(code).expect("eval");
            display(&value, &mut self.ctx)
        }

        /// Evaluates `code`, expecting it to throw; returns the message.
        pub fn eval_err(&mut self, code: &str) -> String {
            match self.eval(code) {
                Ok(value) => panic!("expected `{code}` to throw, got {}", display(&value, &mut self.ctx)),
                Err(err) => error_message(&err, &mut self.ctx),
            }
        }

        pub fn drain(&mut self) -> Vec<WireMessage> {
            let mut out = Vec::new();
            while let Ok(envelope) = self.outbox.try_recv() {
                out.push(envelope.message);
            }
            out
        }
    }
}
