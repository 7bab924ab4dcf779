//! `localStorage` stand-in backed by the scope's scratch map.

use boa_engine::{Context, JsObject, JsResult, JsValue};

use super::{arg, display, getter, js_str, method, new_object, NativeFn, ScopeHandle};

pub fn build(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<JsObject> {
    let storage = new_object(ctx);
    let natives: [(&str, NativeFn<ScopeHandle>); 5] = [
        ("getItem", get_item),
        ("setItem", set_item),
        ("removeItem", remove_item),
        ("clear", clear),
        ("key", key),
    ];
    for (name, native) in natives {
        method(ctx, &storage, name, scope, native)?;
    }
    getter(ctx, &storage, "length", scope.clone(), length)?;
    Ok(storage)
}

fn get_item(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let key = display(&arg(args, 0), ctx);
    Ok(match scope.storage.borrow().get(&key) {
        Some(value) => js_str(value),
        None => JsValue::null(),
    })
}

fn set_item(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let key = display(&arg(args, 0), ctx);
    let value = display(&arg(args, 1), ctx);
    scope.storage.borrow_mut().insert(key, value);
    Ok(JsValue::undefined())
}

fn remove_item(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let key = display(&arg(args, 0), ctx);
    scope.storage.borrow_mut().remove(&key);
    Ok(JsValue::undefined())
}

fn clear(_: &JsValue, _: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    scope.storage.borrow_mut().clear();
    Ok(JsValue::undefined())
}

fn key(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let index = arg(args, 0).to_number(ctx)?;
    if !(index.is_finite() && index >= 0.0) {
        return Ok(JsValue::null());
    }
    Ok(match scope.storage.borrow().keys().nth(index as usize) {
        Some(key) => js_str(key),
        None => JsValue::null(),
    })
}

fn length(_: &JsValue, _: &[JsValue], scope: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(scope.storage.borrow().len() as u32))
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;

    #[test]
    fn stores_strings_and_reports_missing_as_null() {
        let mut fx = Fixture::new();
        let result = fx.eval_string(
            "localStorage.setItem('count', 3);
             const stored = localStorage.getItem('count');
             const missing = localStorage.getItem('nope');
             `${typeof stored}:${stored}:${missing}:${localStorage.length}`",
        );
        assert_eq!(result, "string:3:null:1");
    }

    #[test]
    fn clear_empties_the_scratch_area() {
        let mut fx = Fixture::new();
        fx.eval("localStorage.setItem('a', '1'); localStorage.setItem('b', '2'); localStorage.removeItem('a');")
            .expect("seed");
        assert_eq!(fx.scope.storage.borrow().len(), 1);
        fx.eval("localStorage.clear()").expect("clear");
        assert!(fx.scope.storage.borrow().is_empty());
    }
}
