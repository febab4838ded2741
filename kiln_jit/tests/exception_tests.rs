//! Exception regions: landing depth, matching, re-raise and tracebacks.

use kiln_bytecode::{CompiledFunction, ExceptionTableEntry, FunctionBuilder, Opcode};
use kiln_core::protocol::BinaryOp;
use kiln_core::{KilnError, Value};
use kiln_jit::naming::base_name;
use kiln_jit::{Translator, TranslatorConfig};

// ============================================================================
// Test Utilities
// ============================================================================

fn run(code: CompiledFunction, args: &[Value]) -> kiln_core::PyResult<Value> {
    Translator::default()
        .translate(code)
        .expect("translation should succeed")
        .call(args)
}

/// Raise `ValueError(message)`.
fn raise_value_error(b: &mut FunctionBuilder, message: &str) {
    b.load_global("ValueError").load_const(message).call(1);
    b.emit(Opcode::RaiseVarargs, 1);
}

// ============================================================================
// Landing
// ============================================================================

#[test]
fn test_handler_sees_declared_depth() {
    // [100] try: push 1, push 0, divide  except: drop exc  -> return TOS
    let mut b = FunctionBuilder::new("landing");
    b.load_const(100);
    b.try_except(
        |b| {
            b.load_const(1).load_const(0).binary(BinaryOp::TrueDivide).pop_top();
        },
        |b| {
            b.pop_top();
        },
    );
    b.return_value();
    assert_eq!(run(b.finish().unwrap(), &[]).unwrap(), Value::Int(100));
}

#[test]
fn test_handler_receives_exception() {
    let mut b = FunctionBuilder::new("catch");
    b.try_except(
        |b| raise_value_error(b, "bad input"),
        |b| {
            b.store_fast("err");
        },
    );
    b.load_fast("err").return_value();
    let caught = run(b.finish().unwrap(), &[]).unwrap();
    match caught {
        Value::Exception(exc) => {
            assert_eq!(exc.type_name(), "ValueError");
            assert_eq!(exc.message(), "bad input");
        }
        other => panic!("expected an exception, got {other:?}"),
    }
}

#[test]
fn test_raise_outside_region_is_not_caught() {
    let mut b = FunctionBuilder::new("outside");
    b.try_except(
        |b| {
            b.load_const(1).pop_top();
        },
        |b| {
            b.pop_top();
        },
    );
    raise_value_error(&mut b, "after the region");
    let err = run(b.finish().unwrap(), &[]).unwrap_err();
    assert_eq!(err.type_name(), "ValueError");
    assert_eq!(err.message(), "after the region");
}

// ============================================================================
// Matching
// ============================================================================

#[test]
fn test_matching_handler_catches_subclass() {
    // KeyError is a LookupError.
    let mut b = FunctionBuilder::new("lookup");
    b.positional(&["mapping"]);
    b.try_except_matching(
        "LookupError",
        |b| {
            b.load_fast("mapping").load_const("k").emit(Opcode::BinarySubscr, 0);
            b.store_fast("found");
        },
        |b| {
            b.pop_top();
            b.load_const("default").store_fast("found");
        },
    );
    b.load_fast("found").return_value();
    let empty = Value::dict(kiln_core::collections::Dict::new());
    assert_eq!(run(b.finish().unwrap(), &[empty]).unwrap(), Value::from("default"));
}

#[test]
fn test_non_matching_exception_is_reraised() {
    let mut b = FunctionBuilder::new("narrow");
    b.try_except_matching(
        "KeyError",
        |b| raise_value_error(b, "not a key problem"),
        |b| {
            b.pop_top();
        },
    );
    b.return_const(Value::None);
    let err = run(b.finish().unwrap(), &[]).unwrap_err();
    assert_eq!(err.type_name(), "ValueError");
}

#[test]
fn test_reraise_operand_is_ignored() {
    // except: RERAISE 1 re-raises the exception on TOS like RERAISE 0
    for operand in [0, 1] {
        let mut b = FunctionBuilder::new("passthrough");
        b.try_except(
            |b| raise_value_error(b, "again"),
            |b| {
                b.emit(Opcode::Reraise, operand);
            },
        );
        b.return_const(Value::None);
        let err = run(b.finish().unwrap(), &[]).unwrap_err();
        assert_eq!(err.type_name(), "ValueError");
        assert_eq!(err.message(), "again");
    }
}

#[test]
fn test_raise_in_handler_chains_context() {
    let mut b = FunctionBuilder::new("chained");
    b.try_except(
        |b| raise_value_error(b, "first"),
        |b| {
            b.pop_top();
            b.load_global("RuntimeError").load_const("second").call(1);
            b.emit(Opcode::RaiseVarargs, 1);
        },
    );
    b.return_const(Value::None);
    let err = run(b.finish().unwrap(), &[]).unwrap_err();
    assert_eq!(err.type_name(), "RuntimeError");
    assert_eq!(err.context().unwrap().message(), "first");
}

#[test]
fn test_bare_raise_type_instantiates() {
    let mut b = FunctionBuilder::new("bare");
    b.load_global("KeyError").emit(Opcode::RaiseVarargs, 1);
    let err = run(b.finish().unwrap(), &[]).unwrap_err();
    assert_eq!(err.type_name(), "KeyError");
}

// ============================================================================
// Tracebacks
// ============================================================================

#[test]
fn test_traceback_lists_every_unit() {
    let mut inner = FunctionBuilder::new("inner");
    inner.set_line(3);
    raise_value_error(&mut inner, "deep");

    let mut outer = FunctionBuilder::new("outer");
    outer.set_line(10);
    outer.make_function(inner.finish().unwrap(), 0).call(0).return_value();

    let err = run(outer.finish().unwrap(), &[]).unwrap_err();
    let frames: Vec<_> = err
        .traceback()
        .iter()
        .map(|entry| (base_name(&entry.function).to_string(), entry.line))
        .collect();
    assert_eq!(
        frames,
        vec![("inner".to_string(), Some(3)), ("outer".to_string(), Some(10))]
    );
}

// ============================================================================
// Region validation
// ============================================================================

fn backward_region() -> CompiledFunction {
    let mut b = FunctionBuilder::new("backward");
    b.emit(Opcode::Nop, 0).emit(Opcode::Nop, 0).emit(Opcode::Nop, 0);
    b.return_const(5);
    let mut code = b.finish().unwrap();
    code.exception_table.push(ExceptionTableEntry::new(2, 3, 0, 0, false));
    code
}

#[test]
fn test_backward_region_is_skipped_by_default() {
    let (f, stats) = Translator::default()
        .translate_with_stats(backward_region())
        .unwrap();
    assert_eq!(stats.regions, 0);
    assert_eq!(f.call(&[]).unwrap(), Value::Int(5));
}

#[test]
fn test_strict_config_rejects_backward_region() {
    let err = Translator::new(TranslatorConfig::strict())
        .translate(backward_region())
        .unwrap_err();
    assert!(matches!(err, KilnError::InvalidExceptionRegion { .. }), "{err}");
}
