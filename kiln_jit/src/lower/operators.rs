//! Protocol operators.
//!
//! Every operator is a named lookup on the operand's type. When the flow
//! analysis proves the left operand of a binary operator to be an exact
//! builtin type, the forward method is resolved here and the step only
//! checks the runtime type before calling it:
//!
//! ```text
//! type(left) is proven ──yes──▶ resolved method, reflected fallback
//!                       └─no──▶ full protocol lookup
//! ```

use super::frame::Frame;
use super::{Flow, LowerContext, Step};
use crate::flow::LiveState;
use kiln_bytecode::opcode::{decode_binary_op, decode_compare_op};
use kiln_bytecode::Opcode;
use kiln_core::object::type_obj::{Method, TypeFlags, TypeRef};
use kiln_core::protocol::{self, BinaryOp, UnaryOp};
use kiln_core::{KilnResult, Value};
use tracing::trace;

pub(super) fn emit(ctx: &LowerContext<'_>, index: usize, state: &LiveState) -> KilnResult<Step> {
    let instruction = ctx.instruction(index);
    let ops = ctx.operands(index);
    let negate = instruction.arg == 1;
    Ok(match instruction.opcode {
        Opcode::UnaryPositive => unary(UnaryOp::Positive),
        Opcode::UnaryNegative => unary(UnaryOp::Negative),
        Opcode::UnaryNot => unary(UnaryOp::Not),
        Opcode::UnaryInvert => unary(UnaryOp::Invert),
        Opcode::BinaryOp => {
            let (op, inplace) = decode_binary_op(instruction.arg).ok_or_else(|| {
                ops.shape_error(format!("unknown BINARY_OP code {}", instruction.arg))
            })?;
            if inplace {
                Box::new(move |f: &mut Frame| {
                    let right = f.pop()?;
                    let left = f.pop()?;
                    f.push(protocol::inplace_op(op, &left, &right)?);
                    Ok(Flow::Next)
                })
            } else {
                let left_type = state.peek(1).map(|s| s.ty().clone());
                match left_type.and_then(|ty| specialize(ctx, index, op, ty)) {
                    Some(step) => step,
                    None => Box::new(move |f: &mut Frame| {
                        let right = f.pop()?;
                        let left = f.pop()?;
                        f.push(protocol::binary_op(op, &left, &right)?);
                        Ok(Flow::Next)
                    }),
                }
            }
        }
        Opcode::CompareOp => {
            let op = decode_compare_op(instruction.arg).ok_or_else(|| {
                ops.shape_error(format!("unknown COMPARE_OP code {}", instruction.arg))
            })?;
            Box::new(move |f: &mut Frame| {
                let right = f.pop()?;
                let left = f.pop()?;
                f.push(protocol::compare(op, &left, &right)?);
                Ok(Flow::Next)
            })
        }
        Opcode::IsOp => Box::new(move |f: &mut Frame| {
            let right = f.pop()?;
            let left = f.pop()?;
            f.push(Value::Bool(left.is(&right) != negate));
            Ok(Flow::Next)
        }),
        Opcode::ContainsOp => Box::new(move |f: &mut Frame| {
            let container = f.pop()?;
            let item = f.pop()?;
            f.push(Value::Bool(protocol::contains(&container, &item)? != negate));
            Ok(Flow::Next)
        }),
        Opcode::BinarySubscr => Box::new(|f: &mut Frame| {
            let key = f.pop()?;
            let container = f.pop()?;
            f.push(protocol::get_item(&container, &key)?);
            Ok(Flow::Next)
        }),
        Opcode::StoreSubscr => Box::new(|f: &mut Frame| {
            let key = f.pop()?;
            let container = f.pop()?;
            let value = f.pop()?;
            protocol::set_item(&container, &key, &value)?;
            Ok(Flow::Next)
        }),
        Opcode::DeleteSubscr => Box::new(|f: &mut Frame| {
            let key = f.pop()?;
            let container = f.pop()?;
            protocol::del_item(&container, &key)?;
            Ok(Flow::Next)
        }),
        Opcode::GetIter => Box::new(|f: &mut Frame| {
            let iterable = f.pop()?;
            f.push(protocol::get_iter(&iterable)?);
            Ok(Flow::Next)
        }),
        _ => return Err(ctx.unsupported(index)),
    })
}

fn unary(op: UnaryOp) -> Step {
    Box::new(move |f: &mut Frame| {
        let operand = f.pop()?;
        f.push(protocol::unary_op(op, &operand)?);
        Ok(Flow::Next)
    })
}

/// Binary step with the left method resolved now, when `left_type` allows it.
fn specialize(ctx: &LowerContext<'_>, index: usize, op: BinaryOp, left_type: TypeRef) -> Option<Step> {
    if !ctx.config.specialize_operators || !left_type.flags().contains(TypeFlags::BUILTIN) {
        return None;
    }
    if left_type.id() == kiln_core::builtin_types().object.id() {
        return None;
    }
    let method: Method = left_type.lookup(op.dunder())?;
    let guard = left_type.id();
    trace!(
        function = %ctx.code.qualname,
        offset = ctx.instruction(index).offset,
        op = op.dunder(),
        left = left_type.name(),
        "specialized binary operator"
    );
    Some(Box::new(move |f: &mut Frame| {
        let right = f.pop()?;
        let left = f.pop()?;
        let result = if left.type_of().id() == guard {
            protocol::binary_op_resolved(op, Some(&method), &left, &right)?
        } else {
            protocol::binary_op(op, &left, &right)?
        };
        f.push(result);
        Ok(Flow::Next)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::flow::{initial_state, FlowGraph};
    use crate::function::NestedUnits;
    use crate::regions::RegionMap;
    use kiln_bytecode::FunctionBuilder;

    fn lowered_add(config: &TranslatorConfig, left: Value) -> (Step, bool) {
        let mut b = FunctionBuilder::new("add");
        b.positional(&["y"]);
        b.load_const(left).load_fast("y").binary(BinaryOp::Add).return_value();
        let code = b.finish().unwrap();
        let regions = RegionMap::default();
        let graph = FlowGraph::build(&code, &regions, initial_state(&code), config).unwrap();
        let nested = NestedUnits::default();
        let ctx = LowerContext {
            code: &code,
            graph: &graph,
            config,
            nested: &nested,
        };
        let left_known = !graph.state(2).live().unwrap().peek(1).unwrap().is_generic();
        (emit(&ctx, 2, graph.state(2).live().unwrap()).unwrap(), left_known)
    }

    #[test]
    fn test_specialized_add_matches_protocol() {
        let config = TranslatorConfig::default();
        let (step, known) = lowered_add(&config, Value::Int(2));
        assert!(known);
        let mut frame = Frame::detached(0, 0);
        frame.push(Value::Int(2));
        frame.push(Value::Int(40));
        step(&mut frame).unwrap();
        assert_eq!(frame.pop().unwrap(), Value::Int(42));

        // Guard miss falls back to the full lookup.
        frame.push(Value::from("a"));
        frame.push(Value::from("b"));
        step(&mut frame).unwrap();
        assert_eq!(frame.pop().unwrap(), Value::from("ab"));
    }

    #[test]
    fn test_unspecialized_add() {
        let config = TranslatorConfig::default().without_specialization();
        let (step, _) = lowered_add(&config, Value::Int(1));
        let mut frame = Frame::detached(0, 0);
        frame.push(Value::Int(1));
        frame.push(Value::Float(0.5));
        step(&mut frame).unwrap();
        assert_eq!(frame.pop().unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_unsupported_operands() {
        let config = TranslatorConfig::default();
        let (step, _) = lowered_add(&config, Value::Int(1));
        let mut frame = Frame::detached(0, 0);
        frame.push(Value::Int(1));
        frame.push(Value::None);
        let err = step(&mut frame).unwrap_err();
        assert_eq!(err.type_name(), "TypeError");
        assert!(err.message().contains("unsupported operand type(s) for +"));
    }
}
