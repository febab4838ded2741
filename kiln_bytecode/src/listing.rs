//! Human-readable disassembly, for diagnostics and test failure output.

use crate::function::CompiledFunction;
use crate::instruction::Instruction;
use crate::opcode::{decode_binary_op, decode_compare_op, Opcode};
use std::fmt::Write;

impl CompiledFunction {
    /// Render the instruction stream and exception table.
    ///
    /// ```text
    /// Disassembly of f (<unknown>:1):
    ///   3        0 LOAD_FAST                    0 (x)
    ///       >>   1 RETURN_VALUE                 0
    /// ExceptionTable:
    ///   0 to 1 -> 4 [0]
    /// ```
    #[must_use]
    pub fn listing(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Disassembly of {} ({}:{}):",
            self.qualname, self.filename, self.first_line
        );
        let mut last_line = None;
        for instruction in self.instructions.iter() {
            let line = match instruction.line {
                Some(l) if last_line != Some(l) => {
                    last_line = Some(l);
                    format!("{l:>3}")
                }
                _ => "   ".to_string(),
            };
            let marker = if instruction.is_jump_target { ">>" } else { "  " };
            let _ = write!(
                out,
                "{line} {marker} {:>4} {:<28} {:>3}",
                instruction.offset,
                instruction.opcode.name(),
                instruction.arg
            );
            if let Some(detail) = self.describe_arg(instruction) {
                let _ = write!(out, " ({detail})");
            }
            out.push('\n');
        }
        if !self.exception_table.is_empty() {
            out.push_str("ExceptionTable:\n");
            for entry in &self.exception_table {
                let _ = writeln!(
                    out,
                    "  {} to {} -> {} [{}]{}",
                    entry.start,
                    entry.end,
                    entry.target,
                    entry.depth,
                    if entry.push_lasti { " lasti" } else { "" }
                );
            }
        }
        out
    }

    fn describe_arg(&self, instruction: &Instruction) -> Option<String> {
        let index = usize::try_from(instruction.arg).ok()?;
        if let Some(target) = instruction.jump_target() {
            return Some(format!("to {target}"));
        }
        match instruction.opcode {
            Opcode::LoadConst | Opcode::ReturnConst | Opcode::KwNames => {
                self.constants.get(index).map(kiln_core::Value::repr)
            }
            Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => {
                self.varnames.get(index).map(ToString::to_string)
            }
            Opcode::LoadGlobal
            | Opcode::StoreGlobal
            | Opcode::DeleteGlobal
            | Opcode::LoadAttr
            | Opcode::StoreAttr
            | Opcode::DeleteAttr
            | Opcode::LoadMethod => self.names.get(index).map(ToString::to_string),
            Opcode::LoadDeref
            | Opcode::StoreDeref
            | Opcode::DeleteDeref
            | Opcode::LoadClosure
            | Opcode::MakeCell => self.cell_name(index).map(ToString::to_string),
            Opcode::BinaryOp => decode_binary_op(instruction.arg).map(|(op, inplace)| {
                if inplace {
                    format!("{}=", op.symbol())
                } else {
                    op.symbol().to_string()
                }
            }),
            Opcode::CompareOp => decode_compare_op(instruction.arg).map(|op| op.symbol().to_string()),
            Opcode::IsOp => Some(if instruction.arg == 1 { "is not" } else { "is" }.to_string()),
            Opcode::ContainsOp => Some(if instruction.arg == 1 { "not in" } else { "in" }.to_string()),
            _ => None,
        }
    }
}
