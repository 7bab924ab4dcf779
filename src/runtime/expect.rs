//! `expect(value)` and the matcher catalog.
//!
//! An expectation is an object whose prototype holds every matcher as a
//! native method; the received value and the `.not` flag ride along as
//! hidden properties. A failed matcher throws an `Error` whose message names
//! the matcher, the `.not` state and both values.

use boa_engine::{js_string, Context, JsObject, JsResult, JsString, JsValue};

use super::mocks::{calls_of, mock_id};
use super::values::{attach_asymmetric, equals, format_value, same_value};
use super::{
    arg, array_items, call_method, call_value, display, error, function, getter, global_path,
    guidance, hidden, is_array, new_object, object_create, thrown_message, to_array, type_error,
    NativeFn, ScopeHandle,
};

const RECEIVED_KEY: &str = "__received";
const NEGATED_KEY: &str = "__negated";

struct Expectation {
    received: JsValue,
    negated: bool,
}

impl Expectation {
    fn from_this(this: &JsValue, ctx: &mut Context) -> JsResult<Self> {
        let obj = this
            .as_object()
            .ok_or_else(|| type_error("matchers must be called on the result of expect()"))?;
        let received = obj.get(JsString::from(RECEIVED_KEY), ctx)?;
        let negated = obj.get(JsString::from(NEGATED_KEY), ctx)?.to_boolean();
        Ok(Self { received, negated })
    }

    fn not(&self) -> &'static str {
        if self.negated {
            ".not"
        } else {
            ""
        }
    }

    fn header(&self, matcher: &str, signature: &str) -> String {
        format!("expect(received){}.{matcher}({signature})", self.not())
    }

    /// Throws unless `pass` agrees with the `.not` state.
    fn verdict(&self, pass: bool, message: impl FnOnce() -> String) -> JsResult<JsValue> {
        if pass == self.negated {
            Err(error(message()))
        } else {
            Ok(JsValue::undefined())
        }
    }

    /// Standard `Received:` / `Expected:` failure body.
    fn compare(&self, matcher: &str, pass: bool, expected: &JsValue, ctx: &mut Context) -> JsResult<JsValue> {
        if pass != self.negated {
            return Ok(JsValue::undefined());
        }
        let received = format_value(&self.received, ctx);
        let expected = format_value(expected, ctx);
        let not = if self.negated { " not" } else { "" };
        Err(error(format!(
            "{}\n\nReceived: {received}\nExpected{not}: {expected}",
            self.header(matcher, "expected")
        )))
    }

    /// Body for matchers that take no expected value.
    fn unary(&self, matcher: &str, pass: bool, ctx: &mut Context) -> JsResult<JsValue> {
        if pass != self.negated {
            return Ok(JsValue::undefined());
        }
        let received = format_value(&self.received, ctx);
        Err(error(format!("{}\n\nReceived: {received}", self.header(matcher, ""))))
    }
}

// ----------------------------------------------------------------------------
// Construction
// ----------------------------------------------------------------------------

/// Builds the `expect` function and its shared matcher prototype.
pub fn build(ctx: &mut Context, scope: &ScopeHandle) -> JsResult<JsObject> {
    let proto = new_object(ctx);
    for (name, native) in MATCHERS {
        let func = function(ctx, name, scope.clone(), *native);
        proto.set(JsString::from(*name), func, false, ctx)?;
    }
    getter(ctx, &proto, "not", scope.clone(), negate)?;
    getter(ctx, &proto, "resolves", scope.clone(), resolves)?;
    getter(ctx, &proto, "rejects", scope.clone(), rejects)?;
    *scope.expectation_proto.borrow_mut() = Some(proto);

    let expect = function(ctx, "expect", scope.clone(), expect_value);
    attach_asymmetric(ctx, &expect, scope)?;
    Ok(expect.into())
}

fn create(ctx: &mut Context, scope: &ScopeHandle, received: JsValue, negated: bool) -> JsResult<JsValue> {
    let proto = scope
        .expectation_proto
        .borrow()
        .clone()
        .ok_or_else(|| error("expect() used before the runner was loaded"))?;
    let expectation = object_create(&proto, ctx)?;
    hidden(ctx, &expectation, RECEIVED_KEY, received)?;
    hidden(ctx, &expectation, NEGATED_KEY, JsValue::from(negated))?;
    Ok(expectation.into())
}

fn expect_value(_: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    create(ctx, scope, arg(args, 0), false)
}

fn negate(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    create(ctx, scope, exp.received, !exp.negated)
}

fn resolves(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(
        "Async matchers (.resolves) are not supported. Please use 'const result = await promise; expect(result)...' instead.",
    ))
}

fn rejects(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(
        "Async matchers (.rejects) are not supported. Please use 'try { await promise; } catch (e) { expect(e)... }' instead.",
    ))
}

const MATCHERS: &[(&str, NativeFn<ScopeHandle>)] = &[
    ("toBe", to_be),
    ("toEqual", to_equal),
    ("toStrictEqual", to_strict_equal),
    ("toBeTruthy", to_be_truthy),
    ("toBeFalsy", to_be_falsy),
    ("toBeNull", to_be_null),
    ("toBeDefined", to_be_defined),
    ("toBeUndefined", to_be_undefined),
    ("toBeNaN", to_be_nan),
    ("toContain", to_contain),
    ("toHaveLength", to_have_length),
    ("toThrow", to_throw),
    ("toThrowError", to_throw),
    ("toMatch", to_match),
    ("toBeInstanceOf", to_be_instance_of),
    ("toHaveProperty", to_have_property),
    ("toBeInTheDocument", to_be_in_the_document),
    ("toHaveClass", to_have_class),
    ("toHaveTextContent", to_have_text_content),
    ("toHaveValue", to_have_value),
    ("toHaveAttribute", to_have_attribute),
    ("toBeDisabled", to_be_disabled),
    ("toBeEnabled", to_be_enabled),
    ("toBeGreaterThan", to_be_greater_than),
    ("toBeGreaterThanOrEqual", to_be_greater_than_or_equal),
    ("toBeLessThan", to_be_less_than),
    ("toBeLessThanOrEqual", to_be_less_than_or_equal),
    ("toBeCloseTo", to_be_close_to),
    ("toHaveBeenCalled", to_have_been_called),
    ("toHaveBeenCalledTimes", to_have_been_called_times),
    ("toHaveBeenCalledWith", to_have_been_called_with),
    ("toHaveBeenLastCalledWith", to_have_been_last_called_with),
    ("toMatchSnapshot", to_match_snapshot),
    ("toMatchInlineSnapshot", to_match_inline_snapshot),
    ("toThrowErrorMatchingSnapshot", to_throw_error_matching_snapshot),
    ("toThrowErrorMatchingInlineSnapshot", to_throw_error_matching_snapshot),
];

// ----------------------------------------------------------------------------
// Equality and presence
// ----------------------------------------------------------------------------

fn to_be(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let expected = arg(args, 0);
    let pass = same_value(&exp.received, &expected);
    exp.compare("toBe", pass, &expected, ctx)
}

fn to_equal(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let expected = arg(args, 0);
    let pass = equals(&exp.received, &expected, false, ctx)?;
    exp.compare("toEqual", pass, &expected, ctx)
}

fn to_strict_equal(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let expected = arg(args, 0);
    let pass = equals(&exp.received, &expected, true, ctx)?;
    exp.compare("toStrictEqual", pass, &expected, ctx)
}

fn to_be_truthy(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let pass = exp.received.to_boolean();
    exp.unary("toBeTruthy", pass, ctx)
}

fn to_be_falsy(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let pass = !exp.received.to_boolean();
    exp.unary("toBeFalsy", pass, ctx)
}

fn to_be_null(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let pass = exp.received.is_null();
    exp.unary("toBeNull", pass, ctx)
}

fn to_be_defined(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let pass = !exp.received.is_undefined();
    exp.unary("toBeDefined", pass, ctx)
}

fn to_be_undefined(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let pass = exp.received.is_undefined();
    exp.unary("toBeUndefined", pass, ctx)
}

fn to_be_nan(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let pass = exp.received.as_number().is_some_and(f64::is_nan);
    exp.unary("toBeNaN", pass, ctx)
}

fn to_contain(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let item = arg(args, 0);
    let pass = if let Some(text) = exp.received.as_string() {
        let needle = display(&item, ctx);
        text.to_std_string_escaped().contains(&needle)
    } else {
        match call_method(&exp.received, "includes", &[item.clone()], ctx)? {
            Some(found) => found.to_boolean(),
            None => {
                let received = format_value(&exp.received, ctx);
                return Err(type_error(format!(
                    "{}\n\nReceived value must be a string or an array.\nReceived: {received}",
                    exp.header("toContain", "expected")
                )));
            }
        }
    };
    exp.verdict(pass, || {
        let received = format_value(&exp.received, ctx);
        let item = format_value(&item, ctx);
        let not = if exp.negated { " not" } else { "" };
        format!(
            "{}\n\nReceived: {received}\nExpected{not} to contain: {item}",
            exp.header("toContain", "expected")
        )
    })
}

fn length_of(value: &JsValue, ctx: &mut Context) -> JsResult<Option<f64>> {
    if let Some(text) = value.as_string() {
        return Ok(Some(text.len() as f64));
    }
    let Some(obj) = value.as_object() else {
        return Ok(None);
    };
    Ok(obj.get(js_string!("length"), ctx)?.as_number())
}

fn to_have_length(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let Some(expected) = arg(args, 0).as_number() else {
        return Err(type_error("toHaveLength() expects a number"));
    };
    let Some(actual) = length_of(&exp.received, ctx)? else {
        let received = format_value(&exp.received, ctx);
        return Err(type_error(format!(
            "{}\n\nReceived value must have a length property.\nReceived: {received}",
            exp.header("toHaveLength", "expected")
        )));
    };
    exp.verdict(actual == expected, || {
        format!(
            "{}\n\nExpected length: {expected}\nReceived length: {actual}",
            exp.header("toHaveLength", "expected")
        )
    })
}

fn to_have_property(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let path_arg = arg(args, 0);
    let path: Vec<JsString> = match path_arg.as_object() {
        Some(obj) if is_array(obj) => {
            let mut keys = Vec::new();
            for key in array_items(obj, ctx)? {
                keys.push(key.to_string(ctx)?);
            }
            keys
        }
        _ => display(&path_arg, ctx)
            .split('.')
            .map(JsString::from)
            .collect(),
    };

    let mut current = Some(exp.received.clone());
    for key in &path {
        current = match current.as_ref().and_then(JsValue::as_object) {
            Some(obj) if obj.has_property(key.clone(), ctx)? => Some(obj.get(key.clone(), ctx)?),
            _ => None,
        };
    }
    let pass = match (&current, args.len() > 1) {
        (None, _) => false,
        (Some(_), false) => true,
        (Some(actual), true) => equals(actual, &arg(args, 1), false, ctx)?,
    };
    exp.verdict(pass, || {
        let path = display(&path_arg, ctx);
        let received = format_value(&exp.received, ctx);
        let mut message = format!(
            "{}\n\nExpected path: {path}\nReceived: {received}",
            exp.header("toHaveProperty", "path")
        );
        if args.len() > 1 {
            let expected = format_value(&arg(args, 1), ctx);
            message.push_str(&format!("\nExpected value: {expected}"));
        }
        message
    })
}

fn to_be_instance_of(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let ctor = arg(args, 0);
    if !ctor.is_callable() {
        return Err(type_error("toBeInstanceOf() expects a constructor function"));
    }
    let pass = exp.received.instance_of(&ctor, ctx)?;
    exp.compare("toBeInstanceOf", pass, &ctor, ctx)
}

// ----------------------------------------------------------------------------
// Exceptions and patterns
// ----------------------------------------------------------------------------

/// Whether `text` matches a string (substring) or RegExp-like pattern.
fn matches_pattern(pattern: &JsValue, text: &str, ctx: &mut Context) -> JsResult<Option<bool>> {
    if let Some(needle) = pattern.as_string() {
        return Ok(Some(text.contains(&needle.to_std_string_escaped())));
    }
    if pattern.is_object() && !pattern.is_callable() {
        let subject = JsValue::from(JsString::from(text));
        if let Some(result) = call_method(pattern, "test", &[subject], ctx)? {
            return Ok(Some(result.to_boolean()));
        }
    }
    Ok(None)
}

fn thrown_matches(expected: &JsValue, thrown: &JsValue, ctx: &mut Context) -> JsResult<bool> {
    if expected.is_undefined() {
        return Ok(true);
    }
    let message = thrown_message(thrown, ctx);
    if let Some(matched) = matches_pattern(expected, &message, ctx)? {
        return Ok(matched);
    }
    if expected.is_callable() {
        return thrown.instance_of(expected, ctx);
    }
    if let Some(obj) = expected.as_object() {
        let wanted = obj.get(js_string!("message"), ctx)?;
        return Ok(display(&wanted, ctx) == message);
    }
    Ok(false)
}

fn to_throw(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    if !exp.received.is_callable() {
        return Err(type_error("expect(received).toThrow() received must be a function"));
    }
    let expected = arg(args, 0);
    let thrown = match call_value(&exp.received, &JsValue::undefined(), &[], ctx) {
        Ok(_) => None,
        Err(err) => Some(err.to_opaque(ctx)),
    };
    let pass = match &thrown {
        Some(thrown) => thrown_matches(&expected, thrown, ctx)?,
        None => false,
    };
    exp.verdict(pass, || match (&thrown, exp.negated) {
        (Some(thrown), true) => format!(
            "{}\n\nFunction threw: {}",
            exp.header("toThrow", ""),
            thrown_message(thrown, ctx)
        ),
        (None, _) => format!("{}\n\nFunction did not throw.", exp.header("toThrow", "")),
        (Some(thrown), false) => format!(
            "{}\n\nReceived error: \"{}\"\nExpected to include: {}",
            exp.header("toThrow", "expected"),
            thrown_message(thrown, ctx),
            format_value(&expected, ctx)
        ),
    })
}

fn to_match(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let Some(text) = exp.received.as_string().map(JsString::to_std_string_escaped) else {
        return Err(type_error("expect(received).toMatch() received value must be a string"));
    };
    let pattern = arg(args, 0);
    let Some(pass) = matches_pattern(&pattern, &text, ctx)? else {
        return Err(type_error("toMatch() expects a string or a RegExp"));
    };
    exp.compare("toMatch", pass, &pattern, ctx)
}

// ----------------------------------------------------------------------------
// DOM
// ----------------------------------------------------------------------------

fn to_be_in_the_document(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    if exp.received.is_null_or_undefined() {
        return Err(error(
            "expect(received).toBeInTheDocument()\n\nReceived value is null or undefined",
        ));
    }
    let document = global_path(ctx, &["document"])?;
    let Some(contained) = call_method(&document, "contains", &[exp.received.clone()], ctx)? else {
        return Err(error("toBeInTheDocument() requires a document"));
    };
    let pass = contained.to_boolean();
    exp.verdict(pass, || {
        format!(
            "{}\n\nElement is {}in the document.\nReceived: {}",
            exp.header("toBeInTheDocument", ""),
            if exp.negated { "" } else { "not " },
            format_value(&exp.received, ctx)
        )
    })
}

fn to_have_class(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let names: Vec<String> = args.iter().map(|name| display(name, ctx)).collect();
    let signature = names
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let class_list = match exp.received.as_object() {
        Some(obj) => obj.get(js_string!("classList"), ctx)?,
        None => JsValue::undefined(),
    };
    let mut pass = true;
    for name in &names {
        let Some(found) = call_method(&class_list, "contains", &[JsValue::from(JsString::from(name.as_str()))], ctx)? else {
            return Err(type_error(format!(
                "{}\n\nReceived value is not an element or has no classList.",
                exp.header("toHaveClass", &signature)
            )));
        };
        pass &= found.to_boolean();
    }
    exp.verdict(pass, || {
        let actual = exp
            .received
            .as_object()
            .and_then(|obj| obj.get(js_string!("className"), ctx).ok())
            .map(|name| display(&name, ctx))
            .unwrap_or_default();
        format!(
            "{}\n\nReceived element does {}have class {signature}.\nActual classes: \"{actual}\"",
            exp.header("toHaveClass", &signature),
            if exp.negated { "" } else { "not " }
        )
    })
}

fn to_have_text_content(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let content = match exp.received.as_object() {
        Some(obj) => obj.get(js_string!("textContent"), ctx)?,
        None => JsValue::undefined(),
    };
    let Some(content) = content.as_string().map(JsString::to_std_string_escaped) else {
        return Err(type_error(
            "expect(received).toHaveTextContent() received must be an HTMLElement",
        ));
    };
    let expected = arg(args, 0);
    let pass = match matches_pattern(&expected, &content, ctx)? {
        Some(pass) => pass,
        None => content.contains(&display(&expected, ctx)),
    };
    exp.verdict(pass, || {
        format!(
            "{}\n\nReceived text: \"{content}\"",
            exp.header("toHaveTextContent", &format_value(&expected, ctx))
        )
    })
}

fn to_have_value(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let value = match exp.received.as_object() {
        Some(obj) => obj.get(js_string!("value"), ctx)?,
        None => JsValue::undefined(),
    };
    if value.is_undefined() {
        return Err(type_error(
            "expect(received).toHaveValue() received must be a form element with a value",
        ));
    }
    let numeric = match exp.received.as_object() {
        Some(obj) => display(&obj.get(js_string!("type"), ctx)?, ctx) == "number",
        None => false,
    };
    let value = match value.as_string().map(JsString::to_std_string_escaped) {
        Some(text) if numeric && !text.trim().is_empty() => match text.trim().parse::<f64>() {
            Ok(number) => JsValue::from(number),
            Err(_) => value,
        },
        // An empty number input has no value.
        Some(_) if numeric => JsValue::null(),
        _ => value,
    };
    let expected = arg(args, 0);
    let pass = equals(&value, &expected, false, ctx)?;
    exp.verdict(pass, || {
        format!(
            "{}\n\nReceived value: {}",
            exp.header("toHaveValue", &format_value(&expected, ctx)),
            format_value(&value, ctx)
        )
    })
}

fn to_have_attribute(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let name = arg(args, 0);
    let Some(present) = call_method(&exp.received, "hasAttribute", &[name.clone()], ctx)? else {
        return Err(type_error("expect(received).toHaveAttribute() received must be an Element"));
    };
    let pass = if args.len() > 1 {
        let actual = call_method(&exp.received, "getAttribute", &[name.clone()], ctx)?.unwrap_or_default();
        present.to_boolean() && equals(&actual, &arg(args, 1), false, ctx)?
    } else {
        present.to_boolean()
    };
    exp.verdict(pass, || {
        let name = display(&name, ctx);
        let expected = if args.len() > 1 {
            format!(", {}", format_value(&arg(args, 1), ctx))
        } else {
            String::new()
        };
        let actual = call_method(&exp.received, "getAttribute", &[JsValue::from(JsString::from(name.as_str()))], ctx)
            .ok()
            .flatten()
            .map(|actual| format_value(&actual, ctx))
            .unwrap_or_else(|| "null".into());
        format!(
            "{}\n\nReceived: {}\nAttribute \"{name}\": {actual}",
            exp.header("toHaveAttribute", &format!("\"{name}\"{expected}")),
            format_value(&exp.received, ctx)
        )
    })
}

fn is_disabled(value: &JsValue, ctx: &mut Context) -> JsResult<bool> {
    match value.as_object() {
        Some(obj) => Ok(obj.get(js_string!("disabled"), ctx)?.as_boolean() == Some(true)),
        None => Ok(false),
    }
}

fn to_be_disabled(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let pass = is_disabled(&exp.received, ctx)?;
    exp.verdict(pass, || state_message(&exp, "toBeDisabled", "disabled", ctx))
}

fn to_be_enabled(this: &JsValue, _: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let pass = exp.received.is_object() && !is_disabled(&exp.received, ctx)?;
    exp.verdict(pass, || state_message(&exp, "toBeEnabled", "enabled", ctx))
}

fn state_message(exp: &Expectation, matcher: &str, state: &str, ctx: &mut Context) -> String {
    format!(
        "{}\n\nReceived element is {}{state}:\n  {}",
        exp.header(matcher, ""),
        if exp.negated { "" } else { "not " },
        format_value(&exp.received, ctx)
    )
}

// ----------------------------------------------------------------------------
// Numbers
// ----------------------------------------------------------------------------

fn numbers(exp: &Expectation, expected: &JsValue, matcher: &str) -> JsResult<(f64, f64)> {
    match (exp.received.as_number(), expected.as_number()) {
        (Some(received), Some(expected)) => Ok((received, expected)),
        _ => Err(type_error(format!("expect(received).{matcher}(expected) expected numbers"))),
    }
}

fn compare_numbers(
    this: &JsValue,
    args: &[JsValue],
    matcher: &str,
    op: fn(f64, f64) -> bool,
    ctx: &mut Context,
) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let expected = arg(args, 0);
    let (received, wanted) = numbers(&exp, &expected, matcher)?;
    exp.compare(matcher, op(received, wanted), &expected, ctx)
}

fn to_be_greater_than(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    compare_numbers(this, args, "toBeGreaterThan", |a, b| a > b, ctx)
}

fn to_be_greater_than_or_equal(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    compare_numbers(this, args, "toBeGreaterThanOrEqual", |a, b| a >= b, ctx)
}

fn to_be_less_than(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    compare_numbers(this, args, "toBeLessThan", |a, b| a < b, ctx)
}

fn to_be_less_than_or_equal(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    compare_numbers(this, args, "toBeLessThanOrEqual", |a, b| a <= b, ctx)
}

/// Passes iff `|expected - received| < 10^-precision / 2`.
pub fn close_to(received: f64, expected: f64, precision: i32) -> bool {
    (expected - received).abs() < 10f64.powi(-precision) / 2.0
}

fn to_be_close_to(this: &JsValue, args: &[JsValue], _: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let expected = arg(args, 0);
    let (received, wanted) = numbers(&exp, &expected, "toBeCloseTo")?;
    let precision = match args.get(1) {
        Some(value) if !value.is_undefined() => value
            .as_number()
            .ok_or_else(|| type_error("toBeCloseTo() precision must be a number"))?
            as i32,
        _ => 2,
    };
    exp.verdict(close_to(received, wanted, precision), || {
        format!(
            "{}\n\nExpected: {wanted}\nReceived: {received}\nPrecision: {precision}",
            exp.header("toBeCloseTo", "expected, precision")
        )
    })
}

// ----------------------------------------------------------------------------
// Mocks
// ----------------------------------------------------------------------------

fn mock_calls(exp: &Expectation, scope: &ScopeHandle, matcher: &str, ctx: &mut Context) -> JsResult<Vec<Vec<JsValue>>> {
    match mock_id(&exp.received, ctx) {
        Some(id) => Ok(calls_of(scope, id)),
        None => Err(type_error(format!(
            "expect(received).{matcher}() received must be a mock function."
        ))),
    }
}

fn call_matches(call: &[JsValue], expected: &[JsValue], ctx: &mut Context) -> JsResult<bool> {
    let actual = to_array(call.iter().cloned(), ctx);
    let wanted = to_array(expected.iter().cloned(), ctx);
    equals(&actual, &wanted, false, ctx)
}

fn format_calls(calls: &[Vec<JsValue>], ctx: &mut Context) -> String {
    if calls.is_empty() {
        return "(no calls)".into();
    }
    calls
        .iter()
        .map(|call| {
            let row = to_array(call.iter().cloned(), ctx);
            format_value(&row, ctx)
        })
        .collect::<Vec<_>>()
        .join("\n  ")
}

fn to_have_been_called(this: &JsValue, _: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let count = mock_calls(&exp, scope, "toHaveBeenCalled", ctx)?.len();
    exp.verdict(count > 0, || {
        format!(
            "{}\n\nExpected mock function {}to be called, but it was called {count} times.",
            exp.header("toHaveBeenCalled", ""),
            if exp.negated { "not " } else { "" }
        )
    })
}

fn to_have_been_called_times(this: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let Some(expected) = arg(args, 0).as_number() else {
        return Err(type_error("toHaveBeenCalledTimes() expects a number"));
    };
    let count = mock_calls(&exp, scope, "toHaveBeenCalledTimes", ctx)?.len();
    exp.verdict(count as f64 == expected, || {
        format!(
            "{}\n\nExpected: {expected}\nReceived: {count}",
            exp.header("toHaveBeenCalledTimes", "expected")
        )
    })
}

fn to_have_been_called_with(this: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let calls = mock_calls(&exp, scope, "toHaveBeenCalledWith", ctx)?;
    let mut pass = false;
    for call in &calls {
        if call_matches(call, args, ctx)? {
            pass = true;
            break;
        }
    }
    exp.verdict(pass, || {
        let expected = to_array(args.iter().cloned(), ctx);
        format!(
            "{}\n\nExpected: {}\nReceived:\n  {}",
            exp.header("toHaveBeenCalledWith", "expected"),
            format_value(&expected, ctx),
            format_calls(&calls, ctx)
        )
    })
}

fn to_have_been_last_called_with(this: &JsValue, args: &[JsValue], scope: &ScopeHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let exp = Expectation::from_this(this, ctx)?;
    let calls = mock_calls(&exp, scope, "toHaveBeenLastCalledWith", ctx)?;
    let pass = match calls.last() {
        Some(call) => call_matches(call, args, ctx)?,
        None => false,
    };
    exp.verdict(pass, || {
        let expected = to_array(args.iter().cloned(), ctx);
        let last = calls.last().map(|call| format_calls(std::slice::from_ref(call), ctx));
        format!(
            "{}\n\nExpected: {}\nReceived: {}",
            exp.header("toHaveBeenLastCalledWith", "expected"),
            format_value(&expected, ctx),
            last.unwrap_or_else(|| "(no calls)".into())
        )
    })
}

// ----------------------------------------------------------------------------
// Unsupported
// ----------------------------------------------------------------------------

fn to_match_snapshot(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(
        "Snapshot testing (toMatchSnapshot) is not supported in this environment. Please use 'toEqual' or specific property assertions instead.",
    ))
}

fn to_match_inline_snapshot(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(
        "Snapshot testing (toMatchInlineSnapshot) is not supported. Please use 'toEqual' or specific property assertions instead.",
    ))
}

fn to_throw_error_matching_snapshot(_: &JsValue, _: &[JsValue], _: &ScopeHandle, _: &mut Context) -> JsResult<JsValue> {
    Err(guidance(
        "Snapshot testing is not supported. Please check the error message string explicitly using 'toThrow'.",
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::close_to;

    #[test]
    fn passing_matchers_return_undefined() {
        let mut fx = Fixture::new();
        fx.eval(
            "expect(1).toBe(1);
             expect({ a: [1, 2] }).toEqual({ a: [1, 2] });
             expect('hello').toContain('ell');
             expect([1, 2, 3]).toHaveLength(3);
             expect(null).toBeNull();
             expect(undefined).not.toBeDefined();
             expect(NaN).toBeNaN();
             expect(0.1 + 0.2).toBeCloseTo(0.3);
             expect(3).toBeGreaterThan(2);
             expect('abc').toMatch(/b/);
             expect(() => { throw new TypeError('bad input'); }).toThrow('bad');
             expect(() => { throw new TypeError('bad input'); }).toThrow(TypeError);
             expect(() => {}).not.toThrow();
             expect({ a: { b: 1 } }).toHaveProperty('a.b', 1);
             expect(new Date(0)).toBeInstanceOf(Date);",
        )
        .expect("matchers pass");
    }

    #[test]
    fn failure_message_names_matcher_and_values() {
        let mut fx = Fixture::new();
        let message = fx.eval_err("expect(1).toBe(2)");
        assert_eq!(message, "expect(received).toBe(expected)\n\nReceived: 1\nExpected: 2");

        let negated = fx.eval_err("expect({ a: 1 }).not.toEqual({ a: 1 })");
        assert_eq!(
            negated,
            "expect(received).not.toEqual(expected)\n\nReceived: {\"a\": 1}\nExpected not: {\"a\": 1}"
        );
    }

    #[test]
    fn called_with_checks_any_call() {
        let mut fx = Fixture::new();
        fx.eval("globalThis.spy = vi.fn(); spy(1, 2); spy('x');").expect("calls");
        fx.eval("expect(spy).toHaveBeenCalledWith(1, 2); expect(spy).toHaveBeenCalledTimes(2);")
            .expect("called with");
        let message = fx.eval_err("expect(spy).toHaveBeenCalledWith(1, 3)");
        assert!(message.starts_with("expect(received).toHaveBeenCalledWith(expected)"), "{message}");
        assert!(message.contains("[1, 2]"), "{message}");
        fx.eval("expect(spy).toHaveBeenLastCalledWith(expect.any(String))")
            .expect("last call");
    }

    #[test]
    fn wrong_argument_kinds_are_reported() {
        let mut fx = Fixture::new();
        assert!(fx.eval_err("expect(1).toThrow()").contains("must be a function"));
        assert!(fx.eval_err("expect(() => 1).toHaveBeenCalled()").contains("must be a mock function"));
        assert!(fx.eval_err("expect('a').toBeGreaterThan(1)").contains("expected numbers"));
        assert!(fx.eval_err("expect([]).toHaveLength('3')").contains("expects a number"));
    }

    #[test]
    fn unsupported_features_explain_alternatives() {
        let mut fx = Fixture::new();
        assert!(fx.eval_err("expect(1).toMatchSnapshot()").contains("toEqual"));
        assert!(fx.eval_err("expect(Promise.resolve(1)).resolves").contains("await promise"));
    }

    #[test]
    fn dom_matcher_failures_show_the_received_element() {
        let mut fx = Fixture::new();
        fx.eval(
            "globalThis.document = { contains: () => false };
             globalThis.button = {
               outerHTML: '<button disabled=\"\">Save</button>',
               disabled: true,
               hasAttribute: (name) => name === 'disabled',
               getAttribute: (name) => (name === 'disabled' ? '' : null),
             };",
        )
        .expect("stub element");

        let missing = fx.eval_err("expect(button).toBeInTheDocument()");
        assert_eq!(
            missing,
            "expect(received).toBeInTheDocument()\n\nElement is not in the document.\nReceived: <button disabled=\"\">Save</button>"
        );

        let enabled = fx.eval_err("expect(button).toBeEnabled()");
        assert_eq!(
            enabled,
            "expect(received).toBeEnabled()\n\nReceived element is not enabled:\n  <button disabled=\"\">Save</button>"
        );

        let disabled = fx.eval_err("expect(button).not.toBeDisabled()");
        assert!(disabled.contains("Received element is disabled:"), "{disabled}");
        assert!(disabled.contains("<button disabled=\"\">Save</button>"), "{disabled}");

        let attribute = fx.eval_err("expect(button).toHaveAttribute('type', 'submit')");
        assert!(attribute.starts_with("expect(received).toHaveAttribute(\"type\", \"submit\")"), "{attribute}");
        assert!(attribute.contains("Received: <button disabled=\"\">Save</button>"), "{attribute}");
        assert!(attribute.contains("Attribute \"type\": null"), "{attribute}");
    }

    #[test]
    fn close_to_uses_half_unit_of_precision() {
        assert!(close_to(0.3, 0.1 + 0.2, 2));
        assert!(!close_to(0.3, 0.31, 2));
        assert!(close_to(0.3, 0.31, 1));
    }
}
