//! Opcode lowering.
//!
//! Each reachable instruction becomes one [`Step`]: a closure over the
//! operands resolved at translation time that runs against a [`Frame`].
//! Emitters are selected by opcode category:
//!
//! | Category   | Module          |
//! |------------|-----------------|
//! | Meta       | (inline)        |
//! | Stack      | `stack`         |
//! | Variable   | `variables`     |
//! | Object     | `objects`       |
//! | Operator   | `operators`     |
//! | Control    | `control`       |
//! | Call       | `calls`         |
//! | Collection | `collections`   |
//! | Exception  | `exceptions`    |
//! | Generator  | `generator`     |

pub mod frame;

mod calls;
mod collections;
mod control;
pub(crate) mod exceptions;
mod objects;
mod operators;
mod stack;
mod variables;

use crate::config::TranslatorConfig;
use crate::flow::effect::{self, Operands};
use crate::flow::{FlowGraph, LiveState};
use crate::function::NestedUnits;
use crate::generator;
use crate::regions::RegionMap;
use frame::Frame;
use kiln_bytecode::{CompiledFunction, Instruction, OpcodeCategory};
use kiln_core::{KilnError, KilnResult, PyResult, Value};
use std::sync::Arc;
use tracing::trace;

/// Control transfer requested by a step.
#[derive(Debug)]
pub enum Flow {
    /// Continue with the next instruction.
    Next,
    /// Continue at an instruction index.
    Jump(usize),
    /// Leave the unit with a value.
    Return(Value),
    /// Suspend the generator with a yielded value.
    Suspend(Value),
}

/// One lowered instruction.
pub type Step = Box<dyn Fn(&mut Frame) -> PyResult<Flow> + Send + Sync>;

/// Emits the step for the instruction at an index given its entry state.
pub(crate) type Emitter = fn(&LowerContext<'_>, usize, &LiveState) -> KilnResult<Step>;

/// Everything an emitter may consult.
pub(crate) struct LowerContext<'a> {
    pub code: &'a CompiledFunction,
    pub graph: &'a FlowGraph,
    pub config: &'a TranslatorConfig,
    pub nested: &'a NestedUnits,
}

impl LowerContext<'_> {
    pub fn instruction(&self, index: usize) -> Instruction {
        self.code.instructions[index]
    }

    pub fn operands(&self, index: usize) -> Operands<'_> {
        Operands::new(self.code, self.instruction(index))
    }

    /// Resolved branch target of a jump.
    pub fn target(&self, index: usize) -> KilnResult<usize> {
        self.graph.target(index).ok_or_else(|| {
            self.operands(index)
                .shape_error(format!("{} has no resolved target", self.instruction(index).opcode))
        })
    }

    pub fn unsupported(&self, index: usize) -> KilnError {
        let instruction = self.instruction(index);
        KilnError::unsupported(
            self.code.qualname.to_string(),
            instruction.offset,
            instruction.opcode.name(),
        )
    }
}

fn emit_meta(_ctx: &LowerContext<'_>, _index: usize, _state: &LiveState) -> KilnResult<Step> {
    Ok(Box::new(|_| Ok(Flow::Next)))
}

const EMITTERS: [(OpcodeCategory, Emitter); 10] = [
    (OpcodeCategory::Meta, emit_meta),
    (OpcodeCategory::Stack, stack::emit),
    (OpcodeCategory::Variable, variables::emit),
    (OpcodeCategory::Object, objects::emit),
    (OpcodeCategory::Operator, operators::emit),
    (OpcodeCategory::Control, control::emit),
    (OpcodeCategory::Call, calls::emit),
    (OpcodeCategory::Collection, collections::emit),
    (OpcodeCategory::Exception, exceptions::emit),
    (OpcodeCategory::Generator, generator::emit),
];

/// Emitter registered for a category.
pub(crate) fn emitter_for(category: OpcodeCategory) -> Option<Emitter> {
    EMITTERS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, emitter)| *emitter)
}

/// Lower one instruction. Unreachable instructions yield `None`.
pub(crate) fn lower_instruction(ctx: &LowerContext<'_>, index: usize) -> KilnResult<Option<Step>> {
    let Some(state) = ctx.graph.state(index).live() else {
        return Ok(None);
    };
    let instruction = ctx.instruction(index);
    let emitter =
        emitter_for(instruction.opcode.category()).ok_or_else(|| ctx.unsupported(index))?;
    let step = emitter(ctx, index, state)?;
    if ctx.config.trace_states {
        let exits = effect::apply(ctx.code, index, ctx.graph.target(index), state)?;
        for (to, exit) in &exits {
            trace!(
                function = %ctx.code.qualname,
                offset = instruction.offset,
                opcode = instruction.opcode.name(),
                to,
                stack = %exit.render_stack(),
                "exit state"
            );
        }
    }
    Ok(Some(step))
}

/// Lower every instruction selected by `include`, wrapping region starts
/// with their stack capture.
pub(crate) fn lower_steps(
    ctx: &LowerContext<'_>,
    regions: &RegionMap,
    include: &dyn Fn(usize) -> bool,
) -> KilnResult<Box<[Option<Step>]>> {
    let mut steps = Vec::with_capacity(ctx.code.instructions.len());
    for index in 0..ctx.code.instructions.len() {
        let step = if include(index) {
            lower_instruction(ctx, index)?.map(|step| regions.wrap_start(index, step))
        } else {
            None
        };
        steps.push(step);
    }
    Ok(steps.into_boxed_slice())
}

/// Name of a cell slot, for error messages.
pub(crate) fn cell_label(code: &CompiledFunction, slot: usize) -> Arc<str> {
    code.cell_name(slot)
        .cloned()
        .unwrap_or_else(|| Arc::from(format!("<cell {slot}>")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_has_an_emitter() {
        let categories = [
            OpcodeCategory::Meta,
            OpcodeCategory::Stack,
            OpcodeCategory::Variable,
            OpcodeCategory::Object,
            OpcodeCategory::Operator,
            OpcodeCategory::Control,
            OpcodeCategory::Call,
            OpcodeCategory::Collection,
            OpcodeCategory::Exception,
            OpcodeCategory::Generator,
        ];
        for category in categories {
            assert!(emitter_for(category).is_some(), "{category:?}");
        }
    }
}
