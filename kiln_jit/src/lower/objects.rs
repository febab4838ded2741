//! Attribute access and method lookup.
//!
//! `LOAD_METHOD` never pushes `NULL`; see [`calls`](super::calls) for the
//! matching call layout.

use super::frame::Frame;
use super::{Flow, LowerContext, Step};
use crate::flow::LiveState;
use kiln_bytecode::Opcode;
use kiln_core::protocol;
use kiln_core::KilnResult;
use std::sync::Arc;

pub(super) fn emit(ctx: &LowerContext<'_>, index: usize, _state: &LiveState) -> KilnResult<Step> {
    let opcode = ctx.instruction(index).opcode;
    let name = Arc::clone(ctx.operands(index).name()?);
    Ok(match opcode {
        // `LOAD_METHOD` pushes an already bound callable, so both forms share
        // the attribute protocol.
        Opcode::LoadAttr | Opcode::LoadMethod => Box::new(move |f: &mut Frame| {
            let obj = f.pop()?;
            f.push(protocol::getattr(&obj, &name)?);
            Ok(Flow::Next)
        }),
        Opcode::StoreAttr => Box::new(move |f: &mut Frame| {
            let obj = f.pop()?;
            let value = f.pop()?;
            protocol::setattr(&obj, &name, value)?;
            Ok(Flow::Next)
        }),
        Opcode::DeleteAttr => Box::new(move |f: &mut Frame| {
            let obj = f.pop()?;
            protocol::delattr(&obj, &name)?;
            Ok(Flow::Next)
        }),
        _ => return Err(ctx.unsupported(index)),
    })
}
