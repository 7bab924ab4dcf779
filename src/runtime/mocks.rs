//! Mock registry and the script-facing mock function objects.
//!
//! Call history and behavior live in the registry; the function object a
//! test holds is a thin native wrapper that looks its state up by id.

use std::collections::VecDeque;

use boa_engine::builtins::promise::ResolvingFunctions;
use boa_engine::object::builtins::{JsFunction, JsPromise};
use boa_engine::{js_string, Context, JsObject, JsResult, JsString, JsValue};
use boa_gc::{Finalize, Trace};
use tracing::debug;

use super::{arg, function, getter, hidden, js_str, new_object, to_array, type_error, NativeFn, ScopeHandle};

pub type MockId = u32;

/// Property carrying the registry id on every mock function.
const MOCK_ID_KEY: &str = "__sandtestMockId";

#[derive(Debug, Clone)]
pub enum Behavior {
    Call(JsObject),
    Return(JsValue),
    Resolve(JsValue),
    Reject(JsValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Return,
    Throw,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Return => "return",
            Outcome::Throw => "throw",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockResult {
    pub outcome: Outcome,
    pub value: JsValue,
}

/// Where a spy was installed, so `mockRestore` can put the original back.
#[derive(Debug, Clone)]
pub struct SpyTarget {
    pub object: JsObject,
    pub key: JsString,
    pub original: JsValue,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub function: Option<JsObject>,
    pub calls: Vec<Vec<JsValue>>,
    pub results: Vec<MockResult>,
    pub implementation: Option<Behavior>,
    pub once: VecDeque<Behavior>,
    pub spy: Option<SpyTarget>,
}

/// Every mock and spy created during a run, indexed by id.
#[derive(Debug, Default)]
pub struct MockRegistry {
    mocks: Vec<MockState>,
}

impl MockRegistry {
    pub fn create(&mut self, implementation: Option<Behavior>) -> MockId {
        self.mocks.push(MockState {
            implementation,
            ..MockState::default()
        });
        (self.mocks.len() - 1) as MockId
    }

    pub fn get(&self, id: MockId) -> Option<&MockState> {
        self.mocks.get(id as usize)
    }

    fn get_mut(&mut self, id: MockId) -> Option<&mut MockState> {
        self.mocks.get_mut(id as usize)
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = MockId> {
        0..self.mocks.len() as MockId
    }

    /// Logs a call and picks the behavior for it: the next one-shot, else
    /// the permanent implementation.
    pub fn record_call(&mut self, id: MockId, args: Vec<JsValue>) -> Option<Behavior> {
        let state = self.get_mut(id)?;
        state.calls.push(args);
        state.once.pop_front().or_else(|| state.implementation.clone())
    }

    pub fn record_result(&mut self, id: MockId, outcome: Outcome, value: JsValue) {
        if let Some(state) = self.get_mut(id) {
            state.results.push(MockResult { outcome, value });
        }
    }

    pub fn set_implementation(&mut self, id: MockId, behavior: Behavior) {
        if let Some(state) = self.get_mut(id) {
            state.implementation = Some(behavior);
        }
    }

    pub fn push_once(&mut self, id: MockId, behavior: Behavior) {
        if let Some(state) = self.get_mut(id) {
            state.once.push_back(behavior);
        }
    }

    /// Forgets call history only.
    pub fn clear(&mut self, id: MockId) {
        if let Some(state) = self.get_mut(id) {
            state.calls.clear();
            state.results.clear();
        }
    }

    /// Forgets history and every configured behavior.
    pub fn reset(&mut self, id: MockId) {
        if let Some(state) = self.get_mut(id) {
            state.calls.clear();
            state.results.clear();
            state.implementation = None;
            state.once.clear();
        }
    }

    /// Spy target to write back, if the mock is a spy.
    pub fn restore_target(&self, id: MockId) -> Option<SpyTarget> {
        self.get(id).and_then(|state| state.spy.clone())
    }

    pub fn clear_registry(&mut self) {
        self.mocks.clear();
    }
}

// ----------------------------------------------------------------------------
// Script bindings
// ----------------------------------------------------------------------------

#[derive(Clone, Trace, Finalize)]
struct MockCapture {
    scope: ScopeHandle,
    #[unsafe_ignore_trace]
    id: MockId,
}

/// Creates a tracked function. `spy` marks it as replacing an existing member.
pub fn create_mock(
    ctx: &mut Context,
    scope: &ScopeHandle,
    implementation: Option<Behavior>,
    spy: Option<SpyTarget>,
) -> JsResult<JsFunction> {
    let id = scope.mocks.borrow_mut().create(implementation);
    let capture = MockCapture {
        scope: scope.clone(),
        id,
    };
    let mock = function(ctx, "mockFn", capture.clone(), call_mock);

    mock.set(js_string!("_isMockFunction"), true, false, ctx)?;
    hidden(ctx, &mock, MOCK_ID_KEY, JsValue::from(id))?;

    let history = new_object(ctx);
    getter(ctx, &history, "calls", capture.clone(), mock_calls)?;
    getter(ctx, &history, "results", capture.clone(), mock_results)?;
    getter(ctx, &history, "lastCall", capture.clone(), mock_last_call)?;
    mock.set(js_string!("mock"), history, false, ctx)?;

    let api: [(&str, NativeFn<MockCapture>); 13] = [
        ("mockImplementation", mock_implementation),
        ("mockImplementationOnce", mock_implementation_once),
        ("mockReturnValue", mock_return_value),
        ("mockReturnValueOnce", mock_return_value_once),
        ("mockResolvedValue", mock_resolved_value),
        ("mockResolvedValueOnce", mock_resolved_value_once),
        ("mockRejectedValue", mock_rejected_value),
        ("mockRejectedValueOnce", mock_rejected_value_once),
        ("mockClear", mock_clear),
        ("mockReset", mock_reset),
        ("mockRestore", mock_restore),
        ("getMockName", get_mock_name),
        ("getMockImplementation", get_mock_implementation),
    ];
    for (name, native) in api {
        let func = function(ctx, name, capture.clone(), native);
        mock.set(JsString::from(name), func, false, ctx)?;
    }

    {
        let mut registry = scope.mocks.borrow_mut();
        if let Some(state) = registry.get_mut(id) {
            state.function = Some(mock.clone().into());
            state.spy = spy;
        }
    }
    debug!(target = "sandtest", id, "mock created");
    Ok(mock)
}

/// Registry id of a mock function created in this scope.
pub fn mock_id(value: &JsValue, ctx: &mut Context) -> Option<MockId> {
    let obj = value.as_object()?;
    let id = obj.get(JsString::from(MOCK_ID_KEY), ctx).ok()?;
    let id = id.as_number()?;
    (id.is_finite() && id >= 0.0).then_some(id as MockId)
}

/// Replaces `object[member]` with a tracked wrapper that delegates to the
/// original.
pub fn spy_on(ctx: &mut Context, scope: &ScopeHandle, object: &JsValue, member: &JsValue) -> JsResult<JsFunction> {
    let key = member.to_string(ctx)?;
    let target = object.as_object().cloned();
    let original = match &target {
        Some(obj) => obj.get(key.clone(), ctx)?,
        None => JsValue::undefined(),
    };
    let (Some(target), Some(original_fn)) = (target, original.as_callable().cloned()) else {
        return Err(type_error(format!(
            "Cannot spyOn method \"{}\". It is not a function.",
            key.to_std_string_escaped()
        )));
    };
    let spy = SpyTarget {
        object: target.clone(),
        key: key.clone(),
        original,
    };
    let mock = create_mock(ctx, scope, Some(Behavior::Call(original_fn)), Some(spy))?;
    target.set(key, mock.clone(), true, ctx)?;
    Ok(mock)
}

/// Writes a spy's original back. Plain mocks have nothing to restore.
pub fn restore(ctx: &mut Context, scope: &ScopeHandle, id: MockId) -> JsResult<()> {
    let target = scope.mocks.borrow().restore_target(id);
    if let Some(SpyTarget { object, key, original }) = target {
        object.set(key, original.clone(), true, ctx)?;
        if let Some(original) = original.as_callable() {
            scope.mocks.borrow_mut().set_implementation(id, Behavior::Call(original.clone()));
        }
    }
    Ok(())
}

fn settled_promise(value: JsValue, fulfilled: bool, ctx: &mut Context) -> JsResult<JsValue> {
    let (promise, ResolvingFunctions { resolve, reject }) = JsPromise::new_pending(ctx);
    let settle = if fulfilled { resolve } else { reject };
    settle.call(&JsValue::undefined(), &[value], ctx)?;
    Ok(promise.into())
}

fn call_mock(this: &JsValue, args: &[JsValue], capture: &MockCapture, ctx: &mut Context) -> JsResult<JsValue> {
    let behavior = capture.scope.mocks.borrow_mut().record_call(capture.id, args.to_vec());
    let outcome = match behavior {
        None => Ok(JsValue::undefined()),
        Some(Behavior::Call(implementation)) => implementation.call(this, args, ctx),
        Some(Behavior::Return(value)) => Ok(value),
        Some(Behavior::Resolve(value)) => settled_promise(value, true, ctx),
        Some(Behavior::Reject(value)) => settled_promise(value, false, ctx),
    };
    match outcome {
        Ok(value) => {
            capture
                .scope
                .mocks
                .borrow_mut()
                .record_result(capture.id, Outcome::Return, value.clone());
            Ok(value)
        }
        Err(err) => {
            let thrown = err.to_opaque(ctx);
            capture
                .scope
                .mocks
                .borrow_mut()
                .record_result(capture.id, Outcome::Throw, thrown);
            Err(err)
        }
    }
}

/// The mock itself, for chaining.
fn this_mock(capture: &MockCapture) -> JsValue {
    capture
        .scope
        .mocks
        .borrow()
        .get(capture.id)
        .and_then(|state| state.function.clone())
        .map(JsValue::from)
        .unwrap_or_default()
}

fn callable_arg(args: &[JsValue], api: &str) -> JsResult<JsObject> {
    args.first()
        .and_then(JsValue::as_callable)
        .cloned()
        .ok_or_else(|| type_error(format!("{api}() expects a function")))
}

fn configure(capture: &MockCapture, behavior: Behavior, once: bool) -> JsResult<JsValue> {
    {
        let mut registry = capture.scope.mocks.borrow_mut();
        if once {
            registry.push_once(capture.id, behavior);
        } else {
            registry.set_implementation(capture.id, behavior);
        }
    }
    Ok(this_mock(capture))
}

fn mock_implementation(_: &JsValue, args: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    let implementation = callable_arg(args, "mockImplementation")?;
    configure(capture, Behavior::Call(implementation), false)
}

fn mock_implementation_once(_: &JsValue, args: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    let implementation = callable_arg(args, "mockImplementationOnce")?;
    configure(capture, Behavior::Call(implementation), true)
}

fn mock_return_value(_: &JsValue, args: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    configure(capture, Behavior::Return(arg(args, 0)), false)
}

fn mock_return_value_once(_: &JsValue, args: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    configure(capture, Behavior::Return(arg(args, 0)), true)
}

fn mock_resolved_value(_: &JsValue, args: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    configure(capture, Behavior::Resolve(arg(args, 0)), false)
}

fn mock_resolved_value_once(_: &JsValue, args: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    configure(capture, Behavior::Resolve(arg(args, 0)), true)
}

fn mock_rejected_value(_: &JsValue, args: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    configure(capture, Behavior::Reject(arg(args, 0)), false)
}

fn mock_rejected_value_once(_: &JsValue, args: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    configure(capture, Behavior::Reject(arg(args, 0)), true)
}

fn mock_clear(_: &JsValue, _: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    capture.scope.mocks.borrow_mut().clear(capture.id);
    Ok(this_mock(capture))
}

fn mock_reset(_: &JsValue, _: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    capture.scope.mocks.borrow_mut().reset(capture.id);
    Ok(this_mock(capture))
}

fn mock_restore(_: &JsValue, _: &[JsValue], capture: &MockCapture, ctx: &mut Context) -> JsResult<JsValue> {
    restore(ctx, &capture.scope, capture.id)?;
    Ok(JsValue::undefined())
}

fn get_mock_name(_: &JsValue, _: &[JsValue], _: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    Ok(js_str("vi.fn()"))
}

fn get_mock_implementation(_: &JsValue, _: &[JsValue], capture: &MockCapture, _: &mut Context) -> JsResult<JsValue> {
    let registry = capture.scope.mocks.borrow();
    Ok(match registry.get(capture.id).and_then(|state| state.implementation.as_ref()) {
        Some(Behavior::Call(implementation)) => implementation.clone().into(),
        _ => JsValue::undefined(),
    })
}

fn mock_calls(_: &JsValue, _: &[JsValue], capture: &MockCapture, ctx: &mut Context) -> JsResult<JsValue> {
    let calls = calls_of(&capture.scope, capture.id);
    let rows: Vec<JsValue> = calls.into_iter().map(|args| to_array(args, ctx)).collect();
    Ok(to_array(rows, ctx))
}

fn mock_last_call(_: &JsValue, _: &[JsValue], capture: &MockCapture, ctx: &mut Context) -> JsResult<JsValue> {
    let last = calls_of(&capture.scope, capture.id).pop();
    Ok(match last {
        Some(args) => to_array(args, ctx),
        None => JsValue::undefined(),
    })
}

fn mock_results(_: &JsValue, _: &[JsValue], capture: &MockCapture, ctx: &mut Context) -> JsResult<JsValue> {
    let results = capture
        .scope
        .mocks
        .borrow()
        .get(capture.id)
        .map(|state| state.results.clone())
        .unwrap_or_default();
    let mut rows = Vec::with_capacity(results.len());
    for MockResult { outcome, value } in results {
        let row = new_object(ctx);
        row.set(js_string!("type"), js_str(outcome.as_str()), false, ctx)?;
        row.set(js_string!("value"), value, false, ctx)?;
        rows.push(JsValue::from(row));
    }
    Ok(to_array(rows, ctx))
}

/// Snapshot of a mock's recorded argument lists.
pub fn calls_of(scope: &ScopeHandle, id: MockId) -> Vec<Vec<JsValue>> {
    scope
        .mocks
        .borrow()
        .get(id)
        .map(|state| state.calls.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::*;

    #[test]
    fn registry_prefers_once_queue_then_permanent() {
        let mut registry = MockRegistry::default();
        let id = registry.create(Some(Behavior::Return(JsValue::from(1))));
        registry.push_once(id, Behavior::Return(JsValue::from(2)));
        let first = registry.record_call(id, vec![]);
        let second = registry.record_call(id, vec![]);
        assert!(matches!(first, Some(Behavior::Return(v)) if v.strict_equals(&JsValue::from(2))));
        assert!(matches!(second, Some(Behavior::Return(v)) if v.strict_equals(&JsValue::from(1))));
        assert_eq!(registry.get(id).map(|s| s.calls.len()), Some(2));

        registry.reset(id);
        assert!(registry.record_call(id, vec![]).is_none());
        registry.clear(id);
        assert_eq!(registry.get(id).map(|s| s.calls.len()), Some(0));
    }

    #[test]
    fn records_calls_and_results() {
        let mut fx = Fixture::new();
        let result = fx.eval_string(
            "const fn = vi.fn((a, b) => a + b);
             fn(1, 2);
             JSON.stringify({ calls: fn.mock.calls, results: fn.mock.results, last: fn.mock.lastCall })",
        );
        assert_eq!(
            result,
            r#"{"calls":[[1,2]],"results":[{"type":"return","value":3}],"last":[1,2]}"#
        );
    }

    #[test]
    fn once_values_are_consumed_in_order() {
        let mut fx = Fixture::new();
        let result = fx.eval_string(
            "const fn = vi.fn().mockReturnValue('default').mockReturnValueOnce('first').mockReturnValueOnce('second');
             [fn(), fn(), fn()].join(',')",
        );
        assert_eq!(result, "first,second,default");
    }

    #[test]
    fn thrown_errors_are_recorded_and_rethrown() {
        let mut fx = Fixture::new();
        let result = fx.eval_string(
            "const fn = vi.fn(() => { throw new Error('nope'); });
             let caught = '';
             try { fn(); } catch (e) { caught = e.message; }
             `${caught}:${fn.mock.results[0].type}`",
        );
        assert_eq!(result, "nope:throw");
    }

    #[test]
    fn spies_delegate_and_restore() {
        let mut fx = Fixture::new();
        let result = fx.eval_string(
            "const calc = { double(x) { return x * 2; } };
             const original = calc.double;
             const spy = vi.spyOn(calc, 'double');
             const doubled = calc.double(4);
             spy.mockReturnValue(0);
             const stubbed = calc.double(4);
             spy.mockRestore();
             `${doubled}:${stubbed}:${calc.double === original}:${spy.mock.calls.length}`",
        );
        assert_eq!(result, "8:0:true:2");
    }

    #[test]
    fn spying_on_non_function_fails() {
        let mut fx = Fixture::new();
        let message = fx.eval_err("vi.spyOn({ value: 1 }, 'value')");
        assert!(message.contains("Cannot spyOn method \"value\""), "{message}");
    }

    #[test]
    fn bulk_operations_touch_every_mock() {
        let mut fx = Fixture::new();
        let result = fx.eval_string(
            "const a = vi.fn(() => 1);
             const b = vi.fn();
             a(); b();
             vi.clearAllMocks();
             const cleared = a.mock.calls.length + b.mock.calls.length;
             const stillImplemented = a();
             vi.resetAllMocks();
             `${cleared}:${stillImplemented}:${a()}`",
        );
        assert_eq!(result, "0:1:undefined");
    }

    #[test]
    fn implementation_must_be_callable() {
        let mut fx = Fixture::new();
        assert!(fx.eval_err("vi.fn().mockImplementation(5)").contains("expects a function"));
    }
}
