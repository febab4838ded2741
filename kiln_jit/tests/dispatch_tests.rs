//! Argument binding and overload selection through translated functions.

use kiln_bytecode::{CompiledFunction, FunctionBuilder, MethodKind, Opcode};
use kiln_core::protocol::{self, BinaryOp};
use kiln_core::types::builtin_types;
use kiln_core::{KeywordArgs, KilnError, TypeRef, Value};
use kiln_jit::{TranslatedFunction, Translator};
use std::sync::Arc;

// ============================================================================
// Test Utilities
// ============================================================================

fn keywords(pairs: &[(&str, Value)]) -> KeywordArgs {
    pairs
        .iter()
        .map(|(name, value)| (Arc::from(*name), value.clone()))
        .collect()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

/// `def f(x, y, z=5): return (x, y, z)`
fn xyz() -> TranslatedFunction {
    let mut b = FunctionBuilder::new("f");
    b.positional(&["x", "y", "z"]).defaults(vec![Value::Int(5)]);
    b.load_fast("x").load_fast("y").load_fast("z");
    b.emit(Opcode::BuildTuple, 3).return_value();
    Translator::default().translate(b.finish().unwrap()).unwrap()
}

/// `def name(x: ty) -> ...: return label`
fn typed(name: &str, ty: &TypeRef, label: &str) -> CompiledFunction {
    let mut b = FunctionBuilder::new(name);
    b.positional(&["x"]).annotate("x", ty.clone());
    b.return_const(label);
    b.finish().unwrap()
}

// ============================================================================
// Binding
// ============================================================================

#[test]
fn test_default_fills_missing_positional() {
    let result = xyz().call(&ints(&[1, 2])).unwrap();
    assert_eq!(result, Value::tuple(ints(&[1, 2, 5])));
}

#[test]
fn test_keyword_binds_by_name() {
    let result = xyz()
        .call_with_keywords(&ints(&[1]), &keywords(&[("z", Value::Int(0)), ("y", Value::Int(7))]))
        .unwrap();
    assert_eq!(result, Value::tuple(ints(&[1, 7, 0])));
}

#[test]
fn test_unknown_keyword_is_rejected() {
    let err = xyz()
        .call_with_keywords(&ints(&[1, 2]), &keywords(&[("w", Value::Int(9))]))
        .unwrap_err();
    assert_eq!(err.type_name(), "TypeError");
    assert_eq!(err.message(), "f() got an unexpected keyword argument 'w'");
}

#[test]
fn test_too_many_positionals() {
    let mut b = FunctionBuilder::new("pair");
    b.positional(&["a", "b"]);
    b.return_const(Value::None);
    let f = Translator::default().translate(b.finish().unwrap()).unwrap();
    let err = f.call(&ints(&[1, 2, 3])).unwrap_err();
    assert_eq!(err.type_name(), "TypeError");
    assert_eq!(err.message(), "pair() takes 2 positional arguments but 3 were given");
}

#[test]
fn test_missing_argument_names_are_listed() {
    let err = xyz().call(&[]).unwrap_err();
    assert_eq!(err.message(), "f() missing 2 required positional arguments: 'x', 'y'");
}

#[test]
fn test_varargs_and_varkw_capture_surplus() {
    // def g(a, *rest, **extra): return (a, rest, extra["k"])
    let mut b = FunctionBuilder::new("g");
    b.positional(&["a"]).varargs("rest").varkw("extra");
    b.load_fast("a").load_fast("rest");
    b.load_fast("extra").load_const("k").emit(Opcode::BinarySubscr, 0);
    b.emit(Opcode::BuildTuple, 3).return_value();
    let f = Translator::default().translate(b.finish().unwrap()).unwrap();
    let result = f
        .call_with_keywords(&ints(&[1, 2, 3]), &keywords(&[("k", Value::from("v"))]))
        .unwrap();
    let expected = Value::tuple(vec![
        Value::Int(1),
        Value::tuple(ints(&[2, 3])),
        Value::from("v"),
    ]);
    assert_eq!(result, expected);
}

#[test]
fn test_keyword_only_default() {
    // def h(a, *, scale=10): return a * scale
    let mut b = FunctionBuilder::new("h");
    b.positional(&["a"]).keyword_only(&["scale"]);
    b.kw_default("scale", Value::Int(10));
    b.load_fast("a").load_fast("scale").binary(BinaryOp::Multiply).return_value();
    let f = Translator::default().translate(b.finish().unwrap()).unwrap();
    assert_eq!(f.call(&ints(&[3])).unwrap(), Value::Int(30));
    let scaled = f
        .call_with_keywords(&ints(&[3]), &keywords(&[("scale", Value::Int(2))]))
        .unwrap();
    assert_eq!(scaled, Value::Int(6));
    let err = f.call(&ints(&[3, 2])).unwrap_err();
    assert_eq!(err.message(), "h() takes 1 positional argument but 2 were given");
}

#[test]
fn test_annotated_parameter_is_checked() {
    let types = builtin_types();
    let f = Translator::default()
        .translate(typed("t", &types.int, "ok"))
        .unwrap();
    assert_eq!(f.call(&[Value::Bool(true)]).unwrap(), Value::from("ok"));
    let err = f.call(&[Value::from("no")]).unwrap_err();
    assert_eq!(
        err.message(),
        "t's argument 'x' has incorrect type: 'x' must be a int (got str instead)"
    );
}

#[test]
fn test_keyword_call_through_bytecode() {
    // caller() -> f(1, z=3, y=2)
    let mut inner = FunctionBuilder::new("f");
    inner.positional(&["x", "y", "z"]);
    inner.load_fast("x").load_fast("y").load_fast("z");
    inner.emit(Opcode::BuildTuple, 3).return_value();

    let mut b = FunctionBuilder::new("caller");
    b.make_function(inner.finish().unwrap(), 0);
    b.load_const(1).load_const(3).load_const(2).call_kw(3, &["z", "y"]);
    b.return_value();
    let f = Translator::default().translate(b.finish().unwrap()).unwrap();
    assert_eq!(f.call(&[]).unwrap(), Value::tuple(ints(&[1, 2, 3])));
}

// ============================================================================
// Overloads
// ============================================================================

#[test]
fn test_overload_selects_by_argument_type() {
    let types = builtin_types();
    let dispatcher = Translator::default()
        .translate_overloads("f", [typed("f", &types.int, "A"), typed("f", &types.str, "B")])
        .unwrap();
    let f = Value::Function(Arc::new(dispatcher));
    let call = |arg: Value| protocol::call(&f, &[arg], &KeywordArgs::default());
    assert_eq!(call(Value::from("text")).unwrap(), Value::from("B"));
    assert_eq!(call(Value::Int(3)).unwrap(), Value::from("A"));
}

#[test]
fn test_overload_mismatch_lists_candidates() {
    let types = builtin_types();
    let dispatcher = Translator::default()
        .translate_overloads("f", [typed("f", &types.int, "A"), typed("f", &types.str, "B")])
        .unwrap();
    let err = dispatcher.select(&[Value::Float(1.5)]).unwrap_err();
    assert_eq!(err.type_name(), "TypeError");
    let message = err.message();
    assert!(message.starts_with("No overload match the given arguments (float)"), "{message}");
    assert!(message.contains("f(x: int)"), "{message}");
    assert!(message.contains("f(x: str)"), "{message}");
}

#[test]
fn test_overload_arity_buckets() {
    let types = builtin_types();
    let mut two = FunctionBuilder::new("f");
    two.positional(&["x", "y"]);
    two.return_const("two");
    let dispatcher = Translator::default()
        .translate_overloads("f", [typed("f", &types.object, "one"), two.finish().unwrap()])
        .unwrap();
    assert_eq!(dispatcher.select(&ints(&[1, 2])).unwrap().signature.spec.positional_count(), 2);
    let err = dispatcher.select(&ints(&[1, 2, 3])).unwrap_err();
    let message = err.message();
    assert!(message.starts_with("No overload has the given argcount (int, int, int)"), "{message}");
    assert!(message.contains("f(x) ->"), "{message}");
    assert!(message.contains("f(x, y)"), "{message}");
}

#[test]
fn test_overload_selected_by_keyword() {
    // f(x="s") against f(x: int) / f(x: str)
    let types = builtin_types();
    let dispatcher = Translator::default()
        .translate_overloads("f", [typed("f", &types.int, "A"), typed("f", &types.str, "B")])
        .unwrap();
    let f = Value::Function(Arc::new(dispatcher));
    let call = |arg: Value| protocol::call(&f, &[], &keywords(&[("x", arg)]));
    assert_eq!(call(Value::from("s")).unwrap(), Value::from("B"));
    assert_eq!(call(Value::Int(4)).unwrap(), Value::from("A"));
    let err = call(Value::None).unwrap_err();
    assert_eq!(err.type_name(), "TypeError");
    let message = err.message();
    assert!(message.contains("x=NoneType"), "{message}");
    assert!(message.contains("f(x: int)") && message.contains("f(x: str)"), "{message}");
}

#[test]
fn test_bool_prefers_most_specific_overload() {
    let types = builtin_types();
    let dispatcher = Translator::default()
        .translate_overloads(
            "f",
            [
                typed("f", &types.object, "object"),
                typed("f", &types.int, "int"),
                typed("f", &types.bool, "bool"),
            ],
        )
        .unwrap();
    let f = Value::Function(Arc::new(dispatcher));
    let call = |arg: Value| protocol::call(&f, &[arg], &KeywordArgs::default());
    assert_eq!(call(Value::Bool(false)).unwrap(), Value::from("bool"));
    assert_eq!(call(Value::Int(0)).unwrap(), Value::from("int"));
    assert_eq!(call(Value::None).unwrap(), Value::from("object"));
}

#[test]
fn test_mixed_method_kinds_are_rejected() {
    let types = builtin_types();
    let mut method = FunctionBuilder::new("f");
    method.positional(&["self"]).method_kind(MethodKind::Virtual);
    method.return_const(Value::None);
    let err = Translator::default()
        .translate_overloads("f", [typed("f", &types.int, "A"), method.finish().unwrap()])
        .unwrap_err();
    assert!(matches!(err, KilnError::InvalidOverloadSet { .. }), "{err}");
}
