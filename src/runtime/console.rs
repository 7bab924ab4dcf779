//! `console.*` bridged to tracing and to `status` messages for the host.

use boa_engine::{Context, JsObject, JsResult, JsValue};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::values::format_value;
use super::{method, new_object, NativeFn, ScopeHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Log => "log",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Debug => "debug",
        }
    }
}

pub fn build(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<JsObject> {
    let console = new_object(ctx);
    let natives: [(&str, NativeFn<ScopeHandle>); 5] = [
        ("log", log),
        ("info", log_info),
        ("warn", log_warn),
        ("error", log_error),
        ("debug", log_debug),
    ];
    for (name, native) in natives {
        method(ctx, &console, name, scope, native)?;
    }
    Ok(console)
}

/// Logs one console line and forwards it to the host.
pub fn emit(scope: &ScopeHandle, level: Level, message: String) {
    match level {
        Level::Log | Level::Info => info!(target = "sandtest::console", %message),
        Level::Warn => warn!(target = "sandtest::console", %message),
        Level::Error => error!(target = "sandtest::console", %message),
        Level::Debug => debug!(target = "sandtest::console", %message),
    }
    scope.status(json!({
        "kind": "console",
        "level": level.as_str(),
        "message": message,
    }));
}

/// Joins arguments the way browsers print them: strings raw, everything
/// else formatted.
fn render_args(args: &[JsValue], ctx: &mut Context) -> String {
    args.iter()
        .map(|value| match value.as_string() {
            Some(text) => text.to_std_string_escaped(),
            None => format_value(value, ctx),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn write(level: Level, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let message = render_args(args, ctx);
    emit(scope, level, message);
    Ok(JsValue::undefined())
}

fn log(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    write(Level::Log, args, scope, ctx)
}

fn log_info(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    write(Level::Info, args, scope, ctx)
}

fn log_warn(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    write(Level::Warn, args, scope, ctx)
}

fn log_error(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    write(Level::Error, args, scope, ctx)
}

fn log_debug(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    write(Level::Debug, args, scope, ctx)
}
