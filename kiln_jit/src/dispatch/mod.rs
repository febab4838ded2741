//! Argument binding and overload dispatch.

pub mod argspec;
pub mod overload;
pub mod signature;

pub use argspec::{ArgumentSpec, ParamKind, Parameter};
pub use overload::{Overload, OverloadDispatcher, OverloadSet};
pub use signature::{resolve_type_parameters, FunctionSignature};
