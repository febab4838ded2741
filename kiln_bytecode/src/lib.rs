//! # Kiln Bytecode
//!
//! The input side of translation:
//!
//! - **Opcodes**: the 3.10/3.11 stack-machine dialect with categories and stack effects
//! - **Instructions**: decoded instructions addressed by word offset
//! - **Exception table**: flat protected ranges with handler depth and lasti flag
//! - **Functions**: `CompiledFunction` with its name, constant and cell tables
//! - **Builder**: label-based assembly of functions, used by tests and front ends

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod exception_table;
pub mod function;
pub mod instruction;
pub mod listing;
pub mod opcode;

pub use builder::{FunctionBuilder, Label};
pub use exception_table::{ExceptionTable, ExceptionTableEntry};
pub use function::{Annotations, CodeConstant, CodeFlags, CompiledFunction, MethodKind};
pub use instruction::Instruction;
pub use opcode::{JumpKind, Opcode, OpcodeCategory};
