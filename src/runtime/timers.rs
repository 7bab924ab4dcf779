//! Timer globals: real timers driven by the worker's event loop, and the
//! fake timers swapped in by `vi.useFakeTimers()`.

use boa_engine::{js_string, Context, JsObject, JsResult, JsString, JsValue, Source};
use chrono::Utc;
use tracing::{debug, warn};

use super::clock::{self, normalize_delay, TimerId, TimerKind};
use super::console::{self, Level};
use super::{error_message, function, type_error, NativeFn, ScopeHandle};
use crate::config::limits::EVENT_LOOP_TIMER_BATCH;

const TIMER_GLOBALS: [&str; 4] = ["setTimeout", "clearTimeout", "setInterval", "clearInterval"];

/// Subclass of the real `Date` whose empty constructor and `Date.now()`
/// read the virtual clock.
const FAKE_DATE_FACTORY: &str = r#"(function (OriginalDate, now) {
  class Date extends OriginalDate {
    constructor(...args) {
      if (args.length === 0) {
        super(now());
      } else {
        super(...args);
      }
    }
    static now() {
      return now();
    }
  }
  return Date;
})"#;

/// A callback plus the extra arguments it was scheduled with.
#[derive(Debug, Clone)]
pub struct ScheduledCall {
    pub callback: JsObject,
    pub args: Vec<JsValue>,
}

impl ScheduledCall {
    pub fn invoke(&self, ctx: &mut Context) -> JsResult<JsValue> {
        self.callback.call(&JsValue::undefined(), &self.args, ctx)
    }
}

/// A global binding saved before being replaced. `None` means the global
/// did not exist.
#[derive(Debug, Clone)]
pub struct SavedGlobal {
    pub name: String,
    pub value: Option<JsValue>,
}

fn parse_schedule(args: &[JsValue], api: &str, ctx: &mut Context) -> JsResult<(ScheduledCall, f64)> {
    let callback = args
        .first()
        .and_then(JsValue::as_callable)
        .cloned()
        .ok_or_else(|| type_error(format!("{api}() expects a callback function")))?;
    let delay = match args.get(1) {
        Some(value) if !value.is_undefined() => value.to_number(ctx)?,
        _ => 0.0,
    };
    let rest = args.get(2..).map(<[JsValue]>::to_vec).unwrap_or_default();
    Ok((ScheduledCall { callback, args: rest }, delay))
}

fn timer_id(args: &[JsValue], ctx: &mut Context) -> JsResult<Option<TimerId>> {
    match args.first() {
        Some(value) if value.is_number() => {
            let id = value.to_number(ctx)?;
            Ok((id.is_finite() && id >= 0.0).then_some(id as TimerId))
        }
        _ => Ok(None),
    }
}

// ----------------------------------------------------------------------------
// Real timers
// ----------------------------------------------------------------------------

pub fn install_real(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<()> {
    let natives: [(&str, NativeFn<ScopeHandle>); 4] = [
        ("setTimeout", real_set_timeout),
        ("clearTimeout", real_clear),
        ("setInterval", real_set_interval),
        ("clearInterval", real_clear),
    ];
    let global = ctx.global_object();
    for (name, native) in natives {
        let func = function(ctx, name, scope.clone(), native);
        global.set(JsString::from(name), func, false, ctx)?;
    }
    prepare_fake_date(ctx, scope)
}

/// Compiles the fake `Date` factory. Must run at the top level of the
/// context: evaluating a class body from inside a native call corrupts the
/// caller's frame.
fn prepare_fake_date(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<()> {
    let factory = ctx.eval(Source::from_bytes(FAKE_DATE_FACTORY))?;
    let factory = factory
        .as_callable()
        .cloned()
        .ok_or_else(|| type_error("fake Date factory is not a function"))?;
    *scope.date_factory.borrow_mut() = Some(factory);
    Ok(())
}

fn real_schedule(args: &[JsValue], scope: &ScopeHandle, kind: TimerKind, api: &str, ctx: &mut Context) -> JsResult<JsValue> {
    let (call, delay) = parse_schedule(args, api, ctx)?;
    let mut queue = scope.real_timers.borrow_mut();
    queue.catch_up(scope.elapsed_ms());
    Ok(JsValue::from(queue.schedule(call, delay, kind)))
}

fn real_set_timeout(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    real_schedule(args, scope, TimerKind::Timeout, "setTimeout", ctx)
}

fn real_set_interval(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    real_schedule(args, scope, TimerKind::Interval, "setInterval", ctx)
}

fn real_clear(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    if let Some(id) = timer_id(args, ctx)? {
        scope.real_timers.borrow_mut().clear(id);
    }
    Ok(JsValue::undefined())
}

/// Fires real timers that are due. A callback error is recorded as uncaught
/// and stops the batch.
pub fn fire_due_real(ctx: &mut Context, scope: &ScopeHandle) -> usize {
    let now = scope.elapsed_ms();
    let mut fired = 0;
    while fired < EVENT_LOOP_TIMER_BATCH {
        let next = {
            let mut queue = scope.real_timers.borrow_mut();
            queue.catch_up(now);
            queue.pop_due(now)
        };
        let Some(call) = next else {
            break;
        };
        fired += 1;
        if let Err(err) = call.invoke(ctx) {
            let message = error_message(&err, ctx);
            scope.report_uncaught(format!("Uncaught error in timer callback: {message}"));
            break;
        }
    }
    fired
}

/// Milliseconds until the next real timer is due.
pub fn next_real_due_in(scope: &ScopeHandle) -> Option<u64> {
    let due = scope.real_timers.borrow().next_fire_at()?;
    Some(due.saturating_sub(scope.elapsed_ms()))
}

// ----------------------------------------------------------------------------
// Fake timers
// ----------------------------------------------------------------------------

/// Freezes time and swaps the timer globals and `Date`. No-op when already
/// installed.
pub fn use_fake(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<()> {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    if !scope.fake_clock.borrow_mut().install(now) {
        return Ok(());
    }

    let global = ctx.global_object();
    let mut saved = Vec::with_capacity(TIMER_GLOBALS.len() + 1);
    for name in TIMER_GLOBALS.iter().chain(std::iter::once(&"Date")) {
        let key = JsString::from(*name);
        let value = if global.has_own_property(key.clone(), ctx)? {
            Some(global.get(key, ctx)?)
        } else {
            None
        };
        saved.push(SavedGlobal {
            name: (*name).to_string(),
            value,
        });
    }
    let original_date = global.get(js_string!("Date"), ctx)?;
    *scope.saved_timers.borrow_mut() = saved;

    let natives: [(&str, NativeFn<ScopeHandle>); 4] = [
        ("setTimeout", fake_set_timeout),
        ("clearTimeout", fake_clear),
        ("setInterval", fake_set_interval),
        ("clearInterval", fake_clear),
    ];
    for (name, native) in natives {
        let func = function(ctx, name, scope.clone(), native);
        global.set(JsString::from(name), func, false, ctx)?;
    }

    let factory = scope
        .date_factory
        .borrow()
        .clone()
        .ok_or_else(|| type_error("fake timers are not available in this context"))?;
    let now_fn = function(ctx, "now", scope.clone(), fake_now);
    let fake_date = factory.call(&JsValue::undefined(), &[original_date, now_fn.into()], ctx)?;
    global.set(js_string!("Date"), fake_date, false, ctx)?;
    debug!(target = "sandtest", now, "fake timers installed");
    Ok(())
}

/// Restores the saved globals and discards pending fake tasks. No-op when
/// fake timers are not installed.
pub fn use_real(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<()> {
    if !scope.fake_clock.borrow_mut().uninstall() {
        return Ok(());
    }
    let saved = std::mem::take(&mut *scope.saved_timers.borrow_mut());
    let global = ctx.global_object();
    for SavedGlobal { name, value } in saved {
        let key = JsString::from(name.as_str());
        match value {
            Some(value) => {
                global.set(key, value, false, ctx)?;
            }
            None => {
                global.delete_property_or_throw(key, ctx)?;
            }
        }
    }
    debug!(target = "sandtest", "fake timers uninstalled");
    Ok(())
}

fn fake_schedule(args: &[JsValue], scope: &ScopeHandle, kind: TimerKind, api: &str, ctx: &mut Context) -> JsResult<JsValue> {
    let (call, delay) = parse_schedule(args, api, ctx)?;
    let id = scope.fake_clock.borrow_mut().schedule(call, delay, kind);
    Ok(JsValue::from(id))
}

fn fake_set_timeout(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    fake_schedule(args, scope, TimerKind::Timeout, "setTimeout", ctx)
}

fn fake_set_interval(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    fake_schedule(args, scope, TimerKind::Interval, "setInterval", ctx)
}

fn fake_clear(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    if let Some(id) = timer_id(args, ctx)? {
        scope.fake_clock.borrow_mut().clear(id);
    }
    Ok(JsValue::undefined())
}

fn fake_now(_: &JsValue, _: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(scope.fake_clock.borrow().now() as f64))
}

/// Fake timer callbacks that throw are reported and the drain continues.
fn fire_fake(ctx: &mut Context, scope: &ScopeHandle, call: ScheduledCall) {
    if let Err(err) = call.invoke(ctx) {
        let message = error_message(&err, ctx);
        warn!(target = "sandtest", %message, "fake timer callback threw");
        console::emit(scope, Level::Error, format!("Error in fake timer callback: {message}"));
    }
}

pub fn advance_fake(ctx: &mut Context, scope: &ScopeHandle, ms: f64) -> usize {
    if !scope.fake_clock.borrow().is_installed() {
        return 0;
    }
    clock::advance(&scope.fake_clock, normalize_delay(ms), |call| fire_fake(ctx, scope, call))
}

pub fn run_pending_fake(ctx: &mut Context, scope: &ScopeHandle) -> usize {
    if !scope.fake_clock.borrow().is_installed() {
        return 0;
    }
    clock::run_pending(&scope.fake_clock, |call| fire_fake(ctx, scope, call))
}

pub fn run_all_fake(ctx: &mut Context, scope: &ScopeHandle) -> usize {
    if !scope.fake_clock.borrow().is_installed() {
        return 0;
    }
    clock::run_all(&scope.fake_clock, |call| fire_fake(ctx, scope, call))
}
