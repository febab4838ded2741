//! # Kiln Core
//!
//! Runtime building blocks shared by every Kiln crate:
//!
//! - **Values**: the dynamic `Value` enum and its shared containers
//! - **Object Model**: type objects with dunder method tables, instances, cells
//! - **Protocol**: operator dispatch as named lookups on operand types
//! - **Builtins**: the builtin function and type table
//! - **Errors**: translator errors (`KilnError`) and runtime exceptions

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builtins;
pub mod collections;
pub mod error;
pub mod exception;
pub mod object;
pub mod protocol;
pub mod types;
pub mod value;

pub use error::{KilnError, KilnResult};
pub use exception::{Exception, PyResult};
pub use object::type_obj::{TypeObject, TypeRef};
pub use object::{Callable, KeywordArgs, NativeObject};
pub use types::builtin_types;
pub use value::Value;

/// Kiln version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Opcode dialect the translator accepts.
pub const BYTECODE_DIALECT: (u8, u8) = (3, 11);
