//! # Kiln JIT
//!
//! Translates a stack-bytecode [`CompiledFunction`](kiln_bytecode::CompiledFunction)
//! into a callable unit that runs without an instruction-by-instruction
//! interpreter.
//!
//! # Architecture
//!
//! ```text
//! CompiledFunction
//!       │
//!       ├─▶ regions::resolve ─────────▶ RegionMap (innermost-first lookup)
//!       ├─▶ flow::FlowGraph::build ───▶ entry state per instruction
//!       ├─▶ lower ────────────────────▶ one Step per reachable instruction
//!       │     └─ generator ───────────▶ segments keyed by integer state
//!       └─▶ function::Unit ───────────▶ TranslatedFunction (Callable)
//!                                           └─ dispatch::OverloadDispatcher
//! ```
//!
//! # Example
//!
//! ```
//! use kiln_bytecode::FunctionBuilder;
//! use kiln_core::protocol::BinaryOp;
//! use kiln_core::Value;
//! use kiln_jit::Translator;
//!
//! let mut builder = FunctionBuilder::new("add");
//! builder.positional(&["a", "b"]);
//! builder.load_fast("a").load_fast("b").binary(BinaryOp::Add).return_value();
//!
//! let add = Translator::default().translate(builder.finish()?)?;
//! assert_eq!(add.call(&[Value::Int(2), Value::Int(40)])?, Value::Int(42));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod exec;
pub mod flow;
pub mod function;
pub mod generator;
pub mod lower;
pub mod naming;
pub mod regions;
pub mod translate;

pub use config::TranslatorConfig;
pub use dispatch::{ArgumentSpec, FunctionSignature, OverloadDispatcher, OverloadSet, ParamKind, Parameter};
pub use function::{TranslatedFunction, Unit};
pub use generator::Generator;
pub use translate::{evaluate, TranslationStats, Translator};
