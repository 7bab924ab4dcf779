//! The `vi` utility object: mocks, spies, global stubs and timer control.

use boa_engine::{Context, JsObject, JsResult, JsString, JsValue};
use tracing::debug;

use super::mocks::{self, Behavior};
use super::timers::{self, SavedGlobal};
use super::{arg, method, new_object, guidance, type_error, NativeFn, ScopeHandle};

pub fn build(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<JsObject> {
    let vi = new_object(ctx);
    let natives: [(&str, NativeFn<ScopeHandle>); 26] = [
        ("fn", vi_fn),
        ("spyOn", spy_on),
        ("stubGlobal", stub_global),
        ("unstubAllGlobals", unstub_all_globals),
        ("clearAllMocks", clear_all_mocks),
        ("resetAllMocks", reset_all_mocks),
        ("restoreAllMocks", restore_all_mocks),
        ("isMockFunction", is_mock_function),
        ("mocked", mocked),
        ("useFakeTimers", use_fake_timers),
        ("useRealTimers", use_real_timers),
        ("advanceTimersByTime", advance_timers_by_time),
        ("runOnlyPendingTimers", run_only_pending_timers),
        ("runAllTimers", run_all_timers),
        ("getTimerCount", get_timer_count),
        ("mock", unsupported_mock),
        ("unmock", unsupported_unmock),
        ("doMock", unsupported_do_mock),
        ("importActual", unsupported_import_actual),
        ("setSystemTime", unsupported_set_system_time),
        ("getMockedSystemTime", unsupported_get_mocked_system_time),
        ("getRealSystemTime", unsupported_get_real_system_time),
        ("resetModules", unsupported_reset_modules),
        ("isolateModules", unsupported_isolate_modules),
        ("setConfig", unsupported_set_config),
        ("hoisted", unsupported_hoisted),
    ];
    for (name, native) in natives {
        method(ctx, &vi, name, scope, native)?;
    }
    Ok(vi)
}

// ----------------------------------------------------------------------------
// Mocks
// ----------------------------------------------------------------------------

fn vi_fn(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let implementation = match args.first() {
        None => None,
        Some(value) if value.is_undefined() => None,
        Some(value) => match value.as_callable() {
            Some(callable) => Some(Behavior::Call(callable.clone())),
            None => return Err(type_error("vi.fn() expects a function")),
        },
    };
    Ok(mocks::create_mock(ctx, scope, implementation, None)?.into())
}

fn spy_on(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    Ok(mocks::spy_on(ctx, scope, &arg(args, 0), &arg(args, 1))?.into())
}

fn clear_all_mocks(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    let mut registry = scope.mocks.borrow_mut();
    let ids: Vec<_> = registry.ids().collect();
    for id in ids {
        registry.clear(id);
    }
    Ok(this.clone())
}

fn reset_all_mocks(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    let mut registry = scope.mocks.borrow_mut();
    let ids: Vec<_> = registry.ids().collect();
    for id in ids {
        registry.reset(id);
    }
    Ok(this.clone())
}

fn restore_all_mocks(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let ids: Vec<_> = scope.mocks.borrow().ids().collect();
    for id in ids {
        mocks::restore(ctx, scope, id)?;
    }
    Ok(this.clone())
}

fn is_mock_function(_: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(mocks::mock_id(&arg(args, 0), ctx).is_some()))
}

fn mocked(_: &JsValue, args: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Ok(arg(args, 0))
}

// ----------------------------------------------------------------------------
// Globals
// ----------------------------------------------------------------------------

fn stub_global(this: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let name = arg(args, 0).to_string(ctx)?;
    let global = ctx.global_object();
    let already_saved = {
        let text = name.to_std_string_escaped();
        scope.stubbed.borrow().iter().any(|saved| saved.name == text)
    };
    if !already_saved {
        let value = if global.has_own_property(name.clone(), ctx)? {
            Some(global.get(name.clone(), ctx)?)
        } else {
            None
        };
        scope.stubbed.borrow_mut().push(SavedGlobal {
            name: name.to_std_string_escaped(),
            value,
        });
    }
    global.set(name, arg(args, 1), false, ctx)?;
    Ok(this.clone())
}

fn unstub_all_globals(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let saved = std::mem::take(&mut *scope.stubbed.borrow_mut());
    let global = ctx.global_object();
    for SavedGlobal { name, value } in saved.into_iter().rev() {
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
    debug!(target = "sandtest", "stubbed globals restored");
    Ok(this.clone())
}

// ----------------------------------------------------------------------------
// Timers
// ----------------------------------------------------------------------------

fn use_fake_timers(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    timers::use_fake(ctx, scope)?;
    Ok(this.clone())
}

fn use_real_timers(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    timers::use_real(ctx, scope)?;
    Ok(this.clone())
}

fn advance_timers_by_time(this: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let ms = arg(args, 0).to_number(ctx)?;
    timers::advance_fake(ctx, scope, ms);
    Ok(this.clone())
}

fn run_only_pending_timers(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    timers::run_pending_fake(ctx, scope);
    Ok(this.clone())
}

fn run_all_timers(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    timers::run_all_fake(ctx, scope);
    Ok(this.clone())
}

fn get_timer_count(_: &JsValue, _: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    let clock = scope.fake_clock.borrow();
    let count = if clock.is_installed() { clock.pending() } else { 0 };
    Ok(JsValue::from(count as u32))
}

// ----------------------------------------------------------------------------
// Unsupported
// ----------------------------------------------------------------------------

fn unsupported_mock(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(
        "Module mocking (vi.mock) is not supported in this environment. Please use Dependency Injection or vi.spyOn() on globals.",
    ))
}

fn unsupported_unmock(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance("vi.unmock is not supported."))
}

fn unsupported_do_mock(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance("vi.doMock is not supported."))
}

fn unsupported_import_actual(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance("vi.importActual is not supported."))
}

fn unsupported_set_system_time(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(
        "vi.setSystemTime is not supported. Please use 'vi.useFakeTimers()' and 'vi.advanceTimersByTime()' to manipulate time.",
    ))
}

fn unsupported_get_mocked_system_time(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance("vi.getMockedSystemTime is not supported."))
}

fn unsupported_get_real_system_time(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance("vi.getRealSystemTime is not supported."))
}

fn unsupported_reset_modules(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(
        "vi.resetModules is not supported as there is no module registry to reset.",
    ))
}

fn unsupported_isolate_modules(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance("vi.isolateModules is not supported."))
}

fn unsupported_set_config(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance("vi.setConfig is not supported."))
}

fn unsupported_hoisted(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance("vi.hoisted is not supported (requires bundler)."))
}
