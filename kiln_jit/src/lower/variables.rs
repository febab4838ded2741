//! Locals, cells, globals and constants.
//!
//! Cell writes go through the shared [`Cell`] so closures created by
//! `MAKE_FUNCTION` observe them.

use super::frame::Frame;
use super::{cell_label, Flow, LowerContext, Step};
use crate::flow::LiveState;
use kiln_bytecode::Opcode;
use kiln_core::builtins;
use kiln_core::object::cell::Cell;
use kiln_core::types::builtin_types;
use kiln_core::{Exception, KilnResult, PyResult, Value};
use std::sync::Arc;

pub(super) fn emit(ctx: &LowerContext<'_>, index: usize, _state: &LiveState) -> KilnResult<Step> {
    let instruction = ctx.instruction(index);
    let ops = ctx.operands(index);
    let code = ctx.code;
    Ok(match instruction.opcode {
        // =====================================================================
        // Locals
        // =====================================================================
        Opcode::LoadFast => {
            let slot = ops.local()?;
            let name = Arc::clone(&code.varnames[slot]);
            Box::new(move |f: &mut Frame| {
                let value = local(f, slot)?
                    .clone()
                    .ok_or_else(|| Exception::unbound_local(&name))?;
                f.push(value);
                Ok(Flow::Next)
            })
        }
        Opcode::StoreFast => {
            let slot = ops.local()?;
            Box::new(move |f: &mut Frame| {
                let value = f.pop()?;
                *local(f, slot)? = Some(value);
                Ok(Flow::Next)
            })
        }
        Opcode::DeleteFast => {
            let slot = ops.local()?;
            let name = Arc::clone(&code.varnames[slot]);
            Box::new(move |f: &mut Frame| {
                local(f, slot)?
                    .take()
                    .ok_or_else(|| Exception::unbound_local(&name))?;
                Ok(Flow::Next)
            })
        }

        // =====================================================================
        // Globals
        // =====================================================================
        Opcode::LoadGlobal => {
            let name = Arc::clone(ops.name()?);
            Box::new(move |f: &mut Frame| {
                let value = f
                    .globals
                    .read()
                    .get_str(&name)
                    .or_else(|| builtins::lookup(&name))
                    .ok_or_else(|| Exception::name_error(&name))?;
                f.push(value);
                Ok(Flow::Next)
            })
        }
        Opcode::StoreGlobal => {
            let name = Arc::clone(ops.name()?);
            Box::new(move |f: &mut Frame| {
                let value = f.pop()?;
                f.globals.write().insert(Value::Str(Arc::clone(&name)), value)?;
                Ok(Flow::Next)
            })
        }
        Opcode::DeleteGlobal => {
            let name = Arc::clone(ops.name()?);
            Box::new(move |f: &mut Frame| {
                f.globals
                    .write()
                    .remove(&Value::Str(Arc::clone(&name)))?
                    .ok_or_else(|| Exception::name_error(&name))?;
                Ok(Flow::Next)
            })
        }

        // =====================================================================
        // Cells
        // =====================================================================
        Opcode::LoadDeref => {
            let slot = ops.cell()?;
            let unbound = unbound_cell(ctx, slot);
            Box::new(move |f: &mut Frame| {
                let value = cell(f, slot)?.get().ok_or_else(&unbound)?;
                f.push(value);
                Ok(Flow::Next)
            })
        }
        Opcode::StoreDeref => {
            let slot = ops.cell()?;
            Box::new(move |f: &mut Frame| {
                let value = f.pop()?;
                cell(f, slot)?.set(value);
                Ok(Flow::Next)
            })
        }
        Opcode::DeleteDeref => {
            let slot = ops.cell()?;
            let unbound = unbound_cell(ctx, slot);
            Box::new(move |f: &mut Frame| {
                if cell(f, slot)?.clear() {
                    Ok(Flow::Next)
                } else {
                    Err(unbound())
                }
            })
        }
        Opcode::LoadClosure => {
            let slot = ops.cell()?;
            Box::new(move |f: &mut Frame| {
                let shared = Arc::clone(cell(f, slot)?);
                f.push(Value::Cell(shared));
                Ok(Flow::Next)
            })
        }
        Opcode::MakeCell => {
            let slot = ops.cell()?;
            let seed = code
                .cell_name(slot)
                .and_then(|name| code.varnames.iter().position(|v| v == name));
            Box::new(move |f: &mut Frame| {
                let initial = match seed {
                    Some(local_slot) => local(f, local_slot)?.clone(),
                    None => None,
                };
                let fresh = initial.map_or_else(Cell::empty, Cell::with_value);
                let target = f
                    .cells
                    .get_mut(slot)
                    .ok_or_else(|| missing_slot("cell", slot))?;
                *target = fresh;
                Ok(Flow::Next)
            })
        }
        // Free cells are installed when the frame is created.
        Opcode::CopyFreeVars => Box::new(|_| Ok(Flow::Next)),

        // =====================================================================
        // Constants
        // =====================================================================
        Opcode::LoadConst => {
            let value = ops.constant()?.clone();
            Box::new(move |f: &mut Frame| {
                f.push(value.clone());
                Ok(Flow::Next)
            })
        }
        _ => return Err(ctx.unsupported(index)),
    })
}

fn local(f: &mut Frame, slot: usize) -> PyResult<&mut Option<Value>> {
    f.locals
        .get_mut(slot)
        .ok_or_else(|| missing_slot("local", slot))
}

fn cell(f: &Frame, slot: usize) -> PyResult<&Arc<Cell>> {
    f.cells.get(slot).ok_or_else(|| missing_slot("cell", slot))
}

fn missing_slot(kind: &str, slot: usize) -> Exception {
    Exception::system_error(format!("frame has no {kind} slot {slot}"))
}

/// Error raised when cell `slot` is read while empty.
fn unbound_cell(ctx: &LowerContext<'_>, slot: usize) -> impl Fn() -> Exception + Send + Sync {
    let name = cell_label(ctx.code, slot);
    let is_free = slot >= ctx.code.cellvars.len();
    move || {
        if is_free {
            Exception::with_message(
                &builtin_types().name_error,
                format!(
                    "free variable '{name}' referenced before assignment in enclosing scope"
                ),
            )
        } else {
            Exception::unbound_local(&name)
        }
    }
}
