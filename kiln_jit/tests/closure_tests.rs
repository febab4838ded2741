//! Nested functions created at run time: closures and runtime defaults.

use kiln_bytecode::opcode::make_function;
use kiln_bytecode::{CompiledFunction, FunctionBuilder, Opcode};
use kiln_core::protocol::{self, BinaryOp};
use kiln_core::{KeywordArgs, Value};
use kiln_jit::Translator;

// ============================================================================
// Test Utilities
// ============================================================================

fn call(callee: &Value, args: &[Value]) -> Value {
    protocol::call(callee, args, &KeywordArgs::default()).expect("call should succeed")
}

/// `def adder(x): return n + x` with `n` free.
fn adder() -> CompiledFunction {
    let mut b = FunctionBuilder::new("adder");
    b.positional(&["x"]).freevar("n");
    b.load_deref("n").load_fast("x").binary(BinaryOp::Add).return_value();
    b.finish().unwrap()
}

/// `def make_adder(n): return adder`
fn make_adder() -> CompiledFunction {
    let mut b = FunctionBuilder::new("make_adder");
    b.positional(&["n"]);
    b.make_cell("n");
    b.load_closure("n").emit(Opcode::BuildTuple, 1);
    b.make_function(adder(), make_function::CLOSURE);
    b.return_value();
    b.finish().unwrap()
}

// ============================================================================
// Closures
// ============================================================================

#[test]
fn test_closure_captures_parameter() {
    let factory = Translator::default().translate(make_adder()).unwrap();
    let add_ten = factory.call(&[Value::Int(10)]).unwrap();
    let add_one = factory.call(&[Value::Int(1)]).unwrap();
    assert_eq!(call(&add_ten, &[Value::Int(5)]), Value::Int(15));
    assert_eq!(call(&add_one, &[Value::Int(5)]), Value::Int(6));
}

#[test]
fn test_nested_unit_is_shared_between_instances() {
    let (factory, stats) = Translator::default()
        .translate_with_stats(make_adder())
        .unwrap();
    assert_eq!(stats.nested, 1);
    let first = factory.call(&[Value::Int(1)]).unwrap();
    let second = factory.call(&[Value::Int(2)]).unwrap();
    let unit = |value: &Value| match value {
        Value::Function(f) => f
            .as_any()
            .downcast_ref::<kiln_jit::TranslatedFunction>()
            .map(|f| std::sync::Arc::clone(f.unit())),
        _ => None,
    };
    let (a, b) = (unit(&first).unwrap(), unit(&second).unwrap());
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}

#[test]
fn test_closure_writes_are_shared() {
    // def counter(): n = 0; def bump(): n += 1; return n; return bump
    let mut bump = FunctionBuilder::new("bump");
    bump.freevar("n");
    bump.load_deref("n").load_const(1).binary(BinaryOp::Add).store_deref("n");
    bump.load_deref("n").return_value();

    let mut b = FunctionBuilder::new("counter");
    b.make_cell("n");
    b.load_const(0).store_deref("n");
    b.load_closure("n").emit(Opcode::BuildTuple, 1);
    b.make_function(bump.finish().unwrap(), make_function::CLOSURE);
    b.return_value();

    let counter = Translator::default().translate(b.finish().unwrap()).unwrap();
    let bump = counter.call(&[]).unwrap();
    assert_eq!(call(&bump, &[]), Value::Int(1));
    assert_eq!(call(&bump, &[]), Value::Int(2));
    assert_eq!(call(&bump, &[]), Value::Int(3));
}

#[test]
fn test_empty_cell_raises() {
    let mut inner = FunctionBuilder::new("inner");
    inner.freevar("late").load_deref("late").return_value();

    let mut b = FunctionBuilder::new("outer");
    b.make_cell("late");
    b.load_closure("late").emit(Opcode::BuildTuple, 1);
    b.make_function(inner.finish().unwrap(), make_function::CLOSURE);
    b.call(0).return_value();
    let err = Translator::default()
        .translate(b.finish().unwrap())
        .unwrap()
        .call(&[])
        .unwrap_err();
    assert_eq!(err.type_name(), "NameError");
}

// ============================================================================
// Runtime defaults
// ============================================================================

#[test]
fn test_defaults_are_evaluated_at_creation() {
    // def outer(d): def pick(a, b=d): return b; return pick
    let mut pick = FunctionBuilder::new("pick");
    pick.positional(&["a", "b"]);
    pick.load_fast("b").return_value();

    let mut b = FunctionBuilder::new("outer");
    b.positional(&["d"]);
    b.load_fast("d").emit(Opcode::BuildTuple, 1);
    b.make_function(pick.finish().unwrap(), make_function::DEFAULTS);
    b.return_value();

    let outer = Translator::default().translate(b.finish().unwrap()).unwrap();
    let pick_seven = outer.call(&[Value::Int(7)]).unwrap();
    let pick_text = outer.call(&[Value::from("s")]).unwrap();
    assert_eq!(call(&pick_seven, &[Value::None]), Value::Int(7));
    assert_eq!(call(&pick_text, &[Value::None]), Value::from("s"));
    assert_eq!(call(&pick_text, &[Value::None, Value::Int(0)]), Value::Int(0));
}

#[test]
fn test_keyword_only_defaults_at_creation() {
    let mut inner = FunctionBuilder::new("inner");
    inner.keyword_only(&["flag"]);
    inner.load_fast("flag").return_value();

    let mut b = FunctionBuilder::new("outer");
    b.load_const("flag").load_const(true).emit(Opcode::BuildMap, 1);
    b.make_function(inner.finish().unwrap(), make_function::KW_DEFAULTS);
    b.return_value();

    let outer = Translator::default().translate(b.finish().unwrap()).unwrap();
    let inner = outer.call(&[]).unwrap();
    assert_eq!(call(&inner, &[]), Value::Bool(true));
}

#[test]
fn test_generator_factory() {
    // def countdown(n): while n: yield n; n -= 1
    let mut gen = FunctionBuilder::new("countdown");
    gen.positional(&["n"]);
    let top = gen.new_label();
    let done = gen.new_label();
    gen.bind(top);
    gen.load_fast("n").emit_jump(Opcode::PopJumpForwardIfFalse, done);
    gen.load_fast("n").yield_value().pop_top();
    gen.load_fast("n").load_const(1).inplace(BinaryOp::Subtract).store_fast("n");
    gen.emit_jump(Opcode::JumpBackward, top);
    gen.bind(done).return_const(Value::None);

    let mut b = FunctionBuilder::new("collect");
    b.load_global("list");
    b.make_function(gen.finish().unwrap(), 0).load_const(3).call(1);
    b.call(1).return_value();
    let f = Translator::default().translate(b.finish().unwrap()).unwrap();
    let expected = Value::list(vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
    assert_eq!(f.call(&[]).unwrap(), expected);
}
