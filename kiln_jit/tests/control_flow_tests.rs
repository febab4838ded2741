//! Branches and loops through translated bodies.

use kiln_bytecode::{CompiledFunction, FunctionBuilder, Opcode};
use kiln_core::protocol::{BinaryOp, CompareOp};
use kiln_core::Value;
use kiln_jit::{Translator, TranslatedFunction};

// ============================================================================
// Test Utilities
// ============================================================================

fn translate(code: CompiledFunction) -> TranslatedFunction {
    Translator::default()
        .translate(code)
        .expect("translation should succeed")
}

/// `sum(i for i in range(n))` written as an explicit loop.
fn sum_range() -> CompiledFunction {
    let mut b = FunctionBuilder::new("sum_range");
    b.positional(&["n"]);
    b.load_const(0).store_fast("total");
    b.load_global("range").load_fast("n").call(1).emit(Opcode::GetIter, 0);
    b.for_each(|b| {
        b.store_fast("i");
        b.load_fast("total").load_fast("i").binary(BinaryOp::Add).store_fast("total");
    });
    b.load_fast("total").return_value();
    b.finish().unwrap()
}

// ============================================================================
// Loops
// ============================================================================

#[test]
fn test_sum_over_range() {
    let f = translate(sum_range());
    for n in [0i64, 1, 10, 100] {
        assert_eq!(f.call(&[Value::Int(n)]).unwrap(), Value::Int(n * (n - 1) / 2));
    }
}

#[test]
fn test_loop_over_list_with_branch() {
    // Count the even items.
    let mut b = FunctionBuilder::new("evens");
    b.positional(&["items"]);
    b.load_const(0).store_fast("count");
    b.load_fast("items").emit(Opcode::GetIter, 0);
    b.for_each(|b| {
        b.load_const(2).binary(BinaryOp::Modulo).load_const(0).compare(CompareOp::Eq);
        b.if_true(|b| {
            b.load_fast("count").load_const(1).inplace(BinaryOp::Add).store_fast("count");
        });
    });
    b.load_fast("count").return_value();
    let f = translate(b.finish().unwrap());
    let items = Value::list((1..=9).map(Value::Int).collect());
    assert_eq!(f.call(&[items]).unwrap(), Value::Int(4));
}

#[test]
fn test_while_loop_with_backward_jump() {
    // while n > 1: n = n // 2; steps += 1
    let mut b = FunctionBuilder::new("halvings");
    b.positional(&["n"]);
    b.load_const(0).store_fast("steps");
    let top = b.new_label();
    let done = b.new_label();
    b.bind(top);
    b.load_fast("n").load_const(1).compare(CompareOp::Gt);
    b.emit_jump(Opcode::PopJumpForwardIfFalse, done);
    b.load_fast("n").load_const(2).binary(BinaryOp::FloorDivide).store_fast("n");
    b.load_fast("steps").load_const(1).binary(BinaryOp::Add).store_fast("steps");
    b.emit_jump(Opcode::JumpBackward, top);
    b.bind(done);
    b.load_fast("steps").return_value();
    let f = translate(b.finish().unwrap());
    assert_eq!(f.call(&[Value::Int(1)]).unwrap(), Value::Int(0));
    assert_eq!(f.call(&[Value::Int(1024)]).unwrap(), Value::Int(10));
}

#[test]
fn test_nested_loops() {
    // Sum of i * j over two ranges.
    let mut b = FunctionBuilder::new("grid");
    b.positional(&["n"]);
    b.load_const(0).store_fast("total");
    b.load_global("range").load_fast("n").call(1).emit(Opcode::GetIter, 0);
    b.for_each(|b| {
        b.store_fast("i");
        b.load_global("range").load_fast("n").call(1).emit(Opcode::GetIter, 0);
        b.for_each(|b| {
            b.load_fast("i").binary(BinaryOp::Multiply);
            b.load_fast("total").binary(BinaryOp::Add).store_fast("total");
        });
    });
    b.load_fast("total").return_value();
    let f = translate(b.finish().unwrap());
    // (0 + 1 + 2)^2
    assert_eq!(f.call(&[Value::Int(3)]).unwrap(), Value::Int(9));
}

// ============================================================================
// Branches
// ============================================================================

#[test]
fn test_if_else_merges_types() {
    // x if x >= 0 else -x, where the branches may produce int or float.
    let mut b = FunctionBuilder::new("magnitude");
    b.positional(&["x"]);
    b.load_fast("x").load_const(0).compare(CompareOp::Ge);
    b.if_else(
        |b| {
            b.load_fast("x");
        },
        |b| {
            b.load_fast("x").emit(Opcode::UnaryNegative, 0);
        },
    );
    b.return_value();
    let f = translate(b.finish().unwrap());
    assert_eq!(f.call(&[Value::Int(-4)]).unwrap(), Value::Int(4));
    assert_eq!(f.call(&[Value::Int(4)]).unwrap(), Value::Int(4));
    assert_eq!(f.call(&[Value::Float(-1.5)]).unwrap(), Value::Float(1.5));
}

#[test]
fn test_branch_on_truthiness() {
    let mut b = FunctionBuilder::new("describe");
    b.positional(&["items"]);
    b.load_fast("items");
    b.if_else(
        |b| {
            b.load_const("some");
        },
        |b| {
            b.load_const("none");
        },
    );
    b.return_value();
    let f = translate(b.finish().unwrap());
    assert_eq!(f.call(&[Value::list(vec![])]).unwrap(), Value::from("none"));
    assert_eq!(f.call(&[Value::list(vec![Value::None])]).unwrap(), Value::from("some"));
}

#[test]
fn test_unreachable_tail_is_ignored() {
    let mut b = FunctionBuilder::new("early_return");
    b.return_const(1);
    b.load_global("never").call(0).return_value();
    let (f, stats) = Translator::default()
        .translate_with_stats(b.finish().unwrap())
        .unwrap();
    assert_eq!(f.call(&[]).unwrap(), Value::Int(1));
    assert!(stats.lowered_steps < stats.instructions);
}
