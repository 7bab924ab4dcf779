//! Value inspection shared by the matchers: formatting, structural
//! equality, and asymmetric matchers.

use boa_engine::object::builtins::JsDate;
use boa_engine::{js_string, Context, JsObject, JsResult, JsString, JsValue};

use super::{
    array_items, call_method, display, function, global_path, is_array, new_object, object_keys,
    type_error, ScopeHandle,
};
use crate::config::limits::{MAX_FORMAT_DEPTH, MAX_FORMAT_ITEMS};

/// Marker property identifying the built-in asymmetric matchers.
pub const ASYMMETRIC_MARKER: &str = "$$asymmetric";

// ----------------------------------------------------------------------------
// Formatting
// ----------------------------------------------------------------------------

/// Readable one-line rendering used in failure messages.
pub fn format_value(value: &JsValue, ctx: &mut Context) -> String {
    let mut seen = Vec::new();
    format_inner(value, 0, &mut seen, ctx)
}

fn format_inner(value: &JsValue, depth: usize, seen: &mut Vec<JsObject>, ctx: &mut Context) -> String {
    if let Some(text) = value.as_string() {
        return serde_json::to_string(&text.to_std_string_escaped()).unwrap_or_default();
    }
    let Some(obj) = value.as_object().cloned() else {
        return display(value, ctx);
    };
    if seen.iter().any(|parent| parent == &obj) {
        return "[Circular]".into();
    }
    if let Some(kind) = asymmetric_kind(&obj, ctx) {
        return format_asymmetric(&obj, &kind, ctx);
    }
    if obj.is_callable() {
        if is_mock(&obj, ctx) {
            return "[MockFunction]".into();
        }
        let name = obj
            .get(js_string!("name"), ctx)
            .map(|name| display(&name, ctx))
            .unwrap_or_default();
        return if name.is_empty() {
            "[Function anonymous]".into()
        } else {
            format!("[Function {name}]")
        };
    }
    if let Ok(date) = JsDate::from_object(obj.clone()) {
        return match date.to_iso_string(ctx) {
            Ok(iso) => format!("Date({})", display(&iso, ctx)),
            Err(_) => "Date(Invalid)".into(),
        };
    }
    if let Ok(html) = obj.get(js_string!("outerHTML"), ctx) {
        if html.is_string() {
            return display(&html, ctx);
        }
    }
    if let Ok(Some(rendered)) = error_like(&obj, ctx) {
        return rendered;
    }
    if depth >= MAX_FORMAT_DEPTH {
        return if is_array(&obj) { "[Array]".into() } else { "[Object]".into() };
    }

    seen.push(obj.clone());
    let rendered = if is_array(&obj) {
        let items = array_items(&obj, ctx).unwrap_or_default();
        let mut parts: Vec<String> = items
            .iter()
            .take(MAX_FORMAT_ITEMS)
            .map(|item| format_inner(item, depth + 1, seen, ctx))
            .collect();
        if items.len() > MAX_FORMAT_ITEMS {
            parts.push(format!("... {} more", items.len() - MAX_FORMAT_ITEMS));
        }
        format!("[{}]", parts.join(", "))
    } else {
        let keys = object_keys(&obj, ctx).unwrap_or_default();
        let mut parts = Vec::with_capacity(keys.len().min(MAX_FORMAT_ITEMS));
        for key in keys.iter().take(MAX_FORMAT_ITEMS) {
            let item = obj.get(key.clone(), ctx).unwrap_or_default();
            let name = serde_json::to_string(&key.to_std_string_escaped()).unwrap_or_default();
            parts.push(format!("{name}: {}", format_inner(&item, depth + 1, seen, ctx)));
        }
        if keys.len() > MAX_FORMAT_ITEMS {
            parts.push(format!("... {} more", keys.len() - MAX_FORMAT_ITEMS));
        }
        format!("{{{}}}", parts.join(", "))
    };
    seen.pop();
    rendered
}

/// `Name: message` for error objects.
fn error_like(obj: &JsObject, ctx: &mut Context) -> JsResult<Option<String>> {
    let error_ctor = global_path(ctx, &["Error"])?;
    if !JsValue::from(obj.clone()).instance_of(&error_ctor, ctx)? {
        return Ok(None);
    }
    let name = obj.get(js_string!("name"), ctx)?;
    let message = obj.get(js_string!("message"), ctx)?;
    Ok(Some(format!("{}: {}", display(&name, ctx), display(&message, ctx))))
}

pub fn is_mock(obj: &JsObject, ctx: &mut Context) -> bool {
    obj.get(js_string!("_isMockFunction"), ctx)
        .map(|flag| flag.as_boolean() == Some(true))
        .unwrap_or(false)
}

// ----------------------------------------------------------------------------
// Equality
// ----------------------------------------------------------------------------

/// `Object.is`.
pub fn same_value(a: &JsValue, b: &JsValue) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => {
            if x.is_nan() && y.is_nan() {
                true
            } else {
                x == y && x.is_sign_negative() == y.is_sign_negative()
            }
        }
        _ => a.strict_equals(b),
    }
}

/// `===`, except NaN equals NaN.
fn identical(a: &JsValue, b: &JsValue) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

/// Structural equality. `strict` additionally requires matching
/// constructors.
pub fn equals(a: &JsValue, b: &JsValue, strict: bool, ctx: &mut Context) -> JsResult<bool> {
    let mut seen = Vec::new();
    Equality { strict, seen: &mut seen }.eq(a, b, ctx)
}

struct Equality<'s> {
    strict: bool,
    /// Object pairs currently being compared, for cycle detection.
    seen: &'s mut Vec<(JsObject, JsObject)>,
}

impl Equality<'_> {
    fn eq(&mut self, a: &JsValue, b: &JsValue, ctx: &mut Context) -> JsResult<bool> {
        if let Some(matched) = self.asymmetric(b, a, ctx)? {
            return Ok(matched);
        }
        if let Some(matched) = self.asymmetric(a, b, ctx)? {
            return Ok(matched);
        }
        if identical(a, b) {
            return Ok(true);
        }
        let (Some(x), Some(y)) = (a.as_object().cloned(), b.as_object().cloned()) else {
            return Ok(false);
        };
        if self.seen.iter().any(|(p, q)| p == &x && q == &y) {
            return Ok(true);
        }
        if x.is_callable() || y.is_callable() {
            return Ok(false);
        }
        match (JsDate::from_object(x.clone()), JsDate::from_object(y.clone())) {
            (Ok(left), Ok(right)) => {
                let (left, right) = (left.get_time(ctx)?, right.get_time(ctx)?);
                return Ok(identical(&left, &right));
            }
            (Ok(_), Err(_)) | (Err(_), Ok(_)) => return Ok(false),
            _ => {}
        }
        if is_array(&x) != is_array(&y) {
            return Ok(false);
        }
        if self.strict {
            let left = x.get(js_string!("constructor"), ctx)?;
            let right = y.get(js_string!("constructor"), ctx)?;
            if !left.strict_equals(&right) {
                return Ok(false);
            }
        }

        let keys_a = object_keys(&x, ctx)?;
        let keys_b = object_keys(&y, ctx)?;
        if keys_a.len() != keys_b.len() {
            return Ok(false);
        }
        self.seen.push((x.clone(), y.clone()));
        let mut equal = true;
        for key in &keys_a {
            if !keys_b.contains(key) {
                equal = false;
                break;
            }
            let left = x.get(key.clone(), ctx)?;
            let right = y.get(key.clone(), ctx)?;
            if !self.eq(&left, &right, ctx)? {
                equal = false;
                break;
            }
        }
        self.seen.pop();
        Ok(equal)
    }

    /// Evaluates `matcher` against `other` when it is an asymmetric matcher.
    fn asymmetric(&mut self, matcher: &JsValue, other: &JsValue, ctx: &mut Context) -> JsResult<Option<bool>> {
        let Some(obj) = matcher.as_object().cloned() else {
            return Ok(None);
        };
        let Some(kind) = asymmetric_kind(&obj, ctx) else {
            // Foreign matchers expose `asymmetricMatch`.
            return match call_method(matcher, "asymmetricMatch", &[other.clone()], ctx)? {
                Some(result) => Ok(Some(result.to_boolean())),
                None => Ok(None),
            };
        };
        let sample = obj.get(js_string!("sample"), ctx)?;
        let matched = match kind.as_str() {
            "any" => matches_any(&sample, other, ctx)?,
            "anything" => !other.is_null_or_undefined(),
            "objectContaining" => self.object_containing(&sample, other, ctx)?,
            "arrayContaining" => self.array_containing(&sample, other, ctx)?,
            "stringContaining" => match (other.as_string(), sample.as_string()) {
                (Some(text), Some(needle)) => text
                    .to_std_string_escaped()
                    .contains(&needle.to_std_string_escaped()),
                _ => false,
            },
            _ => false,
        };
        Ok(Some(matched))
    }

    fn object_containing(&mut self, sample: &JsValue, other: &JsValue, ctx: &mut Context) -> JsResult<bool> {
        let (Some(sample), Some(target)) = (sample.as_object().cloned(), other.as_object().cloned()) else {
            return Ok(false);
        };
        for key in object_keys(&sample, ctx)? {
            if !target.has_property(key.clone(), ctx)? {
                return Ok(false);
            }
            let expected = sample.get(key.clone(), ctx)?;
            let actual = target.get(key, ctx)?;
            if !self.eq(&actual, &expected, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn array_containing(&mut self, sample: &JsValue, other: &JsValue, ctx: &mut Context) -> JsResult<bool> {
        let (Some(sample), Some(target)) = (sample.as_object().cloned(), other.as_object().cloned()) else {
            return Ok(false);
        };
        if !is_array(&target) {
            return Ok(false);
        }
        let actual = array_items(&target, ctx)?;
        for expected in array_items(&sample, ctx)? {
            let mut found = false;
            for item in &actual {
                if self.eq(item, &expected, ctx)? {
                    found = true;
                    break;
                }
            }
            if !found {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `expect.any(Ctor)`: primitives match their wrapper constructors by type.
fn matches_any(ctor: &JsValue, other: &JsValue, ctx: &mut Context) -> JsResult<bool> {
    let by_type: [(&str, fn(&JsValue) -> bool); 8] = [
        ("String", JsValue::is_string),
        ("Number", JsValue::is_number),
        ("Boolean", JsValue::is_boolean),
        ("Function", JsValue::is_callable),
        ("Object", |v| v.is_object()),
        ("Array", |v| v.as_object().is_some_and(is_array)),
        ("Symbol", JsValue::is_symbol),
        ("BigInt", JsValue::is_bigint),
    ];
    for (name, check) in by_type {
        let builtin = global_path(ctx, &[name])?;
        if ctor.strict_equals(&builtin) {
            return Ok(check(other));
        }
    }
    other.instance_of(ctor, ctx)
}

fn asymmetric_kind(obj: &JsObject, ctx: &mut Context) -> Option<String> {
    let marker = obj.get(JsString::from(ASYMMETRIC_MARKER), ctx).ok()?;
    marker.as_string().map(JsString::to_std_string_escaped)
}

fn format_asymmetric(obj: &JsObject, kind: &str, ctx: &mut Context) -> String {
    let sample = obj.get(js_string!("sample"), ctx).unwrap_or_default();
    match kind {
        "any" => {
            let name = sample
                .as_object()
                .and_then(|ctor| ctor.get(js_string!("name"), ctx).ok())
                .map(|name| display(&name, ctx))
                .unwrap_or_default();
            format!("Any<{name}>")
        }
        "anything" => "Anything".into(),
        "objectContaining" => format!("ObjectContaining {}", format_value(&sample, ctx)),
        "arrayContaining" => format!("ArrayContaining {}", format_value(&sample, ctx)),
        "stringContaining" => format!("StringContaining {}", format_value(&sample, ctx)),
        other => format!("Asymmetric<{other}>"),
    }
}

// ----------------------------------------------------------------------------
// Asymmetric matcher constructors (`expect.any` and friends)
// ----------------------------------------------------------------------------

fn asymmetric(kind: &str, sample: JsValue, ctx: &mut Context) -> JsResult<JsValue> {
    let obj = new_object(ctx);
    super::hidden(ctx, &obj, ASYMMETRIC_MARKER, JsValue::from(JsString::from(kind)))?;
    obj.set(js_string!("sample"), sample, false, ctx)?;
    Ok(obj.into())
}

fn any(_: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let ctor = super::arg(args, 0);
    if !ctor.is_callable() {
        return Err(type_error("expect.any() expects a constructor function"));
    }
    asymmetric("any", ctor, ctx)
}

fn anything(_: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    asymmetric("anything", JsValue::undefined(), ctx)
}

fn object_containing(_: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let sample = super::arg(args, 0);
    if !sample.is_object() {
        return Err(type_error("expect.objectContaining() expects an object"));
    }
    asymmetric("objectContaining", sample, ctx)
}

fn array_containing(_: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let sample = super::arg(args, 0);
    if !sample.as_object().is_some_and(is_array) {
        return Err(type_error("expect.arrayContaining() expects an array"));
    }
    asymmetric("arrayContaining", sample, ctx)
}

fn string_containing(_: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let sample = super::arg(args, 0);
    if !sample.is_string() {
        return Err(type_error("expect.stringContaining() expects a string"));
    }
    asymmetric("stringContaining", sample, ctx)
}

/// Attaches the asymmetric matcher constructors to the `expect` function.
pub fn attach_asymmetric(ctx: &mut Context, expect: &JsObject, scope: &ScopeHandle) -> JsResult<()> {
    let constructors: [(&str, super::NativeFn<ScopeHandle>); 5] = [
        ("any", any),
        ("anything", anything),
        ("objectContaining", object_containing),
        ("arrayContaining", array_containing),
        ("stringContaining", string_containing),
    ];
    for (name, native) in constructors {
        let func = function(ctx, name, scope.clone(), native);
        expect.set(JsString::from(name), func, false, ctx)?;
    }
    Ok(())
}
