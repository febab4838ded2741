//! Generator bodies: iteration contract, send, throw, close and delegation.

use kiln_bytecode::{CompiledFunction, FunctionBuilder, Opcode};
use kiln_core::object::downcast;
use kiln_core::protocol::BinaryOp;
use kiln_core::{Exception, Value};
use kiln_jit::{Generator, Translator};

// ============================================================================
// Test Utilities
// ============================================================================

/// Call the translated generator function and return the generator value.
fn start(code: CompiledFunction, args: &[Value]) -> Value {
    let f = Translator::default()
        .translate(code)
        .expect("translation should succeed");
    assert!(f.unit().is_generator());
    f.call(args).expect("creating a generator should not raise")
}

fn as_gen(value: &Value) -> &Generator {
    downcast::<Generator>(value).expect("value should be a generator")
}

fn assert_stop(result: kiln_core::PyResult<Value>, expected: Value) {
    let err = result.expect_err("generator should be exhausted");
    assert_eq!(err.type_name(), "StopIteration");
    assert_eq!(err.stop_value(), expected);
}

/// `yield 1; yield 2; return 7`
fn two_yields() -> CompiledFunction {
    let mut b = FunctionBuilder::new("two_yields");
    b.load_const(1).yield_value().pop_top();
    b.load_const(2).yield_value().pop_top();
    b.return_const(7);
    b.finish().unwrap()
}

// ============================================================================
// Iteration contract
// ============================================================================

#[test]
fn test_has_more_then_consume() {
    let value = start(two_yields(), &[]);
    let gen = as_gen(&value);
    assert!(gen.has_more().unwrap());
    assert_eq!(gen.consume().unwrap(), Value::Int(1));
    assert!(gen.has_more().unwrap());
    assert_eq!(gen.consume().unwrap(), Value::Int(2));
    assert!(!gen.has_more().unwrap());
    assert_stop(gen.consume(), Value::Int(7));
    assert!(!gen.has_more().unwrap());
}

#[test]
fn test_exhausted_generator_keeps_return_value() {
    let value = start(two_yields(), &[]);
    let gen = as_gen(&value);
    gen.consume().unwrap();
    gen.consume().unwrap();
    assert_stop(gen.consume(), Value::Int(7));
    assert_stop(gen.consume(), Value::Int(7));
    assert_eq!(gen.state().unwrap(), -1);
}

#[test]
fn test_repeated_has_more_advances_once() {
    let value = start(two_yields(), &[]);
    let gen = as_gen(&value);
    assert!(gen.has_more().unwrap());
    assert!(gen.has_more().unwrap());
    assert_eq!(gen.consume().unwrap(), Value::Int(1));
    assert_eq!(gen.consume().unwrap(), Value::Int(2));
}

#[test]
fn test_state_follows_suspension_index() {
    let value = start(two_yields(), &[]);
    let gen = as_gen(&value);
    assert_eq!(gen.state().unwrap(), 0);
    gen.consume().unwrap();
    // The first yield is instruction 1.
    assert_eq!(gen.state().unwrap(), 2);
    gen.consume().unwrap();
    assert_eq!(gen.state().unwrap(), 5);
}

#[test]
fn test_loop_state_survives_suspension() {
    // for i in range(n): yield i * i
    let mut b = FunctionBuilder::new("squares");
    b.positional(&["n"]);
    b.load_global("range").load_fast("n").call(1).emit(Opcode::GetIter, 0);
    b.for_each(|b| {
        b.store_fast("i");
        b.load_fast("i").load_fast("i").binary(BinaryOp::Multiply);
        b.yield_value().pop_top();
    });
    b.return_const(Value::None);
    let value = start(b.finish().unwrap(), &[Value::Int(4)]);
    let gen = as_gen(&value);
    let mut seen = Vec::new();
    while gen.has_more().unwrap() {
        seen.push(gen.consume().unwrap());
    }
    assert_eq!(seen, vec![Value::Int(0), Value::Int(1), Value::Int(4), Value::Int(9)]);
}

#[test]
fn test_generator_drives_a_for_loop() {
    let mut b = FunctionBuilder::new("total");
    b.load_const(0).store_fast("sum");
    b.make_function(two_yields(), 0).call(0).emit(Opcode::GetIter, 0);
    b.for_each(|b| {
        b.load_fast("sum").binary(BinaryOp::Add).store_fast("sum");
    });
    b.load_fast("sum").return_value();
    let f = Translator::default().translate(b.finish().unwrap()).unwrap();
    assert_eq!(f.call(&[]).unwrap(), Value::Int(3));
}

// ============================================================================
// Send, throw and close
// ============================================================================

/// `x = yield 1; y = yield x + 1; return y`
fn echo() -> CompiledFunction {
    let mut b = FunctionBuilder::new("echo");
    b.load_const(1).yield_value().store_fast("x");
    b.load_fast("x").load_const(1).binary(BinaryOp::Add).yield_value().store_fast("y");
    b.load_fast("y").return_value();
    b.finish().unwrap()
}

#[test]
fn test_send_delivers_value_to_pending_yield() {
    let value = start(echo(), &[]);
    let gen = as_gen(&value);
    assert_eq!(gen.send(Value::None).unwrap(), Value::Int(1));
    assert_eq!(gen.send(Value::Int(10)).unwrap(), Value::Int(11));
    assert_stop(gen.send(Value::from("done")), Value::from("done"));
}

#[test]
fn test_first_send_value_is_ignored() {
    let value = start(echo(), &[]);
    let gen = as_gen(&value);
    assert_eq!(gen.send(Value::Int(99)).unwrap(), Value::Int(1));
}

#[test]
fn test_send_after_has_more_returns_buffered_value() {
    let value = start(echo(), &[]);
    let gen = as_gen(&value);
    assert!(gen.has_more().unwrap());
    // The buffered 1 comes back and the sent 10 never reaches the body.
    assert_eq!(gen.send(Value::Int(10)).unwrap(), Value::Int(1));
    assert_eq!(gen.send(Value::Int(5)).unwrap(), Value::Int(6));
}

/// `try: yield 1 except ValueError: pass; yield "recovered"`
fn recovering() -> CompiledFunction {
    let mut b = FunctionBuilder::new("recovering");
    b.try_except_matching(
        "ValueError",
        |b| {
            b.load_const(1).yield_value().pop_top();
        },
        |b| {
            b.pop_top();
        },
    );
    b.load_const("recovered").yield_value().pop_top();
    b.return_const(Value::None);
    b.finish().unwrap()
}

#[test]
fn test_throw_is_caught_inside_body() {
    let value = start(recovering(), &[]);
    let gen = as_gen(&value);
    assert_eq!(gen.consume().unwrap(), Value::Int(1));
    let resumed = gen.throw(Exception::value_error("stop that")).unwrap();
    assert_eq!(resumed, Value::from("recovered"));
    assert_stop(gen.consume(), Value::None);
}

#[test]
fn test_throw_discards_buffered_value() {
    let value = start(recovering(), &[]);
    let gen = as_gen(&value);
    assert!(gen.has_more().unwrap());
    let resumed = gen.throw(Exception::value_error("skip")).unwrap();
    assert_eq!(resumed, Value::from("recovered"));
    assert_stop(gen.consume(), Value::None);
}

#[test]
fn test_uncaught_throw_exhausts() {
    let value = start(recovering(), &[]);
    let gen = as_gen(&value);
    gen.consume().unwrap();
    let err = gen.throw(Exception::runtime_error("fatal")).unwrap_err();
    assert_eq!(err.type_name(), "RuntimeError");
    assert!(!gen.has_more().unwrap());
}

#[test]
fn test_close_finishes_generator() {
    let value = start(two_yields(), &[]);
    let gen = as_gen(&value);
    gen.consume().unwrap();
    gen.close().unwrap();
    assert!(!gen.has_more().unwrap());
    assert_stop(gen.consume(), Value::None);
}

#[test]
fn test_close_before_start() {
    let value = start(two_yields(), &[]);
    let gen = as_gen(&value);
    gen.close().unwrap();
    assert!(!gen.has_more().unwrap());
}

#[test]
fn test_close_reports_ignored_generator_exit() {
    // try: yield 1 except: pass; yield 2
    let mut b = FunctionBuilder::new("stubborn");
    b.try_except(
        |b| {
            b.load_const(1).yield_value().pop_top();
        },
        |b| {
            b.pop_top();
        },
    );
    b.load_const(2).yield_value().pop_top();
    b.return_const(Value::None);
    let value = start(b.finish().unwrap(), &[]);
    let gen = as_gen(&value);
    gen.consume().unwrap();
    let err = gen.close().unwrap_err();
    assert_eq!(err.type_name(), "RuntimeError");
    assert_eq!(err.message(), "generator ignored GeneratorExit");
}

#[test]
fn test_reentrant_advance_raises() {
    // yield next(me), where `me` is the generator itself.
    let mut b = FunctionBuilder::new("selfish");
    b.load_global("next").load_global("me").call(1).yield_value().pop_top();
    b.return_const(Value::None);
    let code = b.finish().unwrap();
    let globals = code.globals.clone();
    let value = start(code, &[]);
    globals
        .write()
        .insert(Value::from("me"), value.clone())
        .unwrap();
    let err = as_gen(&value).consume().unwrap_err();
    assert_eq!(err.type_name(), "ValueError");
    assert_eq!(err.message(), "generator already executing");
}

// ============================================================================
// Delegation
// ============================================================================

/// `result = yield from inner(); return result * 10`
fn delegating(inner: CompiledFunction) -> CompiledFunction {
    let mut b = FunctionBuilder::new("delegating");
    b.make_function(inner, 0).call(0).emit(Opcode::GetYieldFromIter, 0);
    b.load_none().emit(Opcode::YieldFrom, 0);
    b.load_const(10).binary(BinaryOp::Multiply).return_value();
    b.finish().unwrap()
}

#[test]
fn test_yield_from_forwards_values_and_result() {
    let value = start(delegating(two_yields()), &[]);
    let gen = as_gen(&value);
    assert_eq!(gen.consume().unwrap(), Value::Int(1));
    assert_eq!(gen.consume().unwrap(), Value::Int(2));
    assert_stop(gen.consume(), Value::Int(70));
}

#[test]
fn test_yield_from_forwards_sent_values() {
    let value = start(delegating(echo()), &[]);
    let gen = as_gen(&value);
    assert_eq!(gen.consume().unwrap(), Value::Int(1));
    assert_eq!(gen.send(Value::Int(4)).unwrap(), Value::Int(5));
    assert_stop(gen.send(Value::Int(6)), Value::Int(60));
}

#[test]
fn test_yield_from_forwards_throw() {
    let value = start(delegating(recovering()), &[]);
    let gen = as_gen(&value);
    assert_eq!(gen.consume().unwrap(), Value::Int(1));
    let resumed = gen.throw(Exception::value_error("into the delegate")).unwrap();
    assert_eq!(resumed, Value::from("recovered"));
}

#[test]
fn test_yield_from_plain_iterable() {
    let mut b = FunctionBuilder::new("flatten");
    b.positional(&["items"]);
    b.load_fast("items").emit(Opcode::GetYieldFromIter, 0);
    b.load_none().emit(Opcode::YieldFrom, 0).pop_top();
    b.return_const(Value::None);
    let items = Value::list(vec![Value::from("a"), Value::from("b")]);
    let value = start(b.finish().unwrap(), &[items]);
    let gen = as_gen(&value);
    assert_eq!(gen.consume().unwrap(), Value::from("a"));
    assert_eq!(gen.consume().unwrap(), Value::from("b"));
    assert_stop(gen.consume(), Value::None);
}
