//! Compiled function metadata.
//!
//! A [`CompiledFunction`] is the input of one translation call: the decoded
//! instruction stream plus every table the instructions index into.
//!
//! Variable name tables follow the usual layout:
//!
//! ```text
//! varnames:  [positional..., keyword-only..., *args?, **kwargs?, other locals...]
//! cells:     [cellvars..., freevars...]        (LOAD_DEREF / LOAD_CLOSURE index)
//! ```

use crate::exception_table::ExceptionTable;
use crate::instruction::Instruction;
use crate::opcode::Opcode;
use bitflags::bitflags;
use indexmap::IndexMap;
use kiln_core::collections::Dict;
use kiln_core::object::cell::Cell;
use kiln_core::object::{downcast, NativeObject};
use kiln_core::types::builtin_types;
use kiln_core::value::DictRef;
use kiln_core::{TypeRef, Value};
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use std::any::Any;
use std::sync::Arc;

bitflags! {
    /// Code object flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CodeFlags: u32 {
        /// Accepts extra positional arguments (`*args`).
        const VARARGS = 1 << 0;
        /// Accepts extra keyword arguments (`**kwargs`).
        const VARKEYWORDS = 1 << 1;
        /// Body contains suspension points.
        const GENERATOR = 1 << 2;
        /// Defined inside another function.
        const NESTED = 1 << 3;
        /// Has no free variables.
        const NOFREE = 1 << 4;
    }
}

/// How a unit receives its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MethodKind {
    /// Plain function, the receiver is ignored.
    #[default]
    Static,
    /// Instance method, the receiver binds to the first parameter.
    Virtual,
    /// Class method, the receiver's type binds to the first parameter.
    Class,
}

/// Annotation map keyed by parameter name, the return hint under `"return"`.
pub type Annotations = IndexMap<Arc<str>, TypeRef, FxBuildHasher>;

/// A compiled function, immutable once built.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    /// Short name.
    pub name: Arc<str>,
    /// Qualified name.
    pub qualname: Arc<str>,
    /// Module the function was defined in.
    pub module: Arc<str>,
    /// Source file.
    pub filename: Arc<str>,
    /// First source line.
    pub first_line: u32,
    /// Instruction stream.
    pub instructions: Box<[Instruction]>,
    /// Constant pool.
    pub constants: Box<[Value]>,
    /// Global and attribute names.
    pub names: Box<[Arc<str>]>,
    /// Local variable names, parameters first.
    pub varnames: Box<[Arc<str>]>,
    /// Cells owned by this function.
    pub cellvars: Box<[Arc<str>]>,
    /// Cells captured from enclosing functions.
    pub freevars: Box<[Arc<str>]>,
    /// Exception table.
    pub exception_table: ExceptionTable,
    /// Positional-only parameter count (part of `arg_count`).
    pub posonly_count: u32,
    /// Positional parameter count, positional-only included.
    pub arg_count: u32,
    /// Keyword-only parameter count.
    pub kwonly_count: u32,
    /// Flags.
    pub flags: CodeFlags,
    /// Declared parameter and return types.
    pub annotations: Annotations,
    /// Receiver binding.
    pub method_kind: MethodKind,
    /// Defaults for the trailing positional parameters.
    pub defaults: Box<[Value]>,
    /// Defaults for keyword-only parameters.
    pub kw_defaults: IndexMap<Arc<str>, Value, FxBuildHasher>,
    /// Closure cells for `freevars`, in order.
    pub closure: Box<[Arc<Cell>]>,
    /// Module globals.
    pub globals: DictRef,
}

impl CompiledFunction {
    /// An empty function named `name`.
    #[must_use]
    pub fn empty(name: &str) -> Self {
        let name: Arc<str> = Arc::from(name);
        Self {
            qualname: Arc::clone(&name),
            name,
            module: Arc::from("__main__"),
            filename: Arc::from("<unknown>"),
            first_line: 1,
            instructions: Box::new([]),
            constants: Box::new([]),
            names: Box::new([]),
            varnames: Box::new([]),
            cellvars: Box::new([]),
            freevars: Box::new([]),
            exception_table: ExceptionTable::new(),
            posonly_count: 0,
            arg_count: 0,
            kwonly_count: 0,
            flags: CodeFlags::NOFREE,
            annotations: Annotations::default(),
            method_kind: MethodKind::Static,
            defaults: Box::new([]),
            kw_defaults: IndexMap::default(),
            closure: Box::new([]),
            globals: Arc::new(RwLock::new(Dict::new())),
        }
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Number of parameter slots, variadic captures included.
    #[must_use]
    pub fn total_params(&self) -> usize {
        let count = self.arg_count + self.kwonly_count;
        let mut total = usize::try_from(count).unwrap_or(usize::MAX);
        if self.flags.contains(CodeFlags::VARARGS) {
            total += 1;
        }
        if self.flags.contains(CodeFlags::VARKEYWORDS) {
            total += 1;
        }
        total
    }

    /// Parameter names in slot order.
    #[must_use]
    pub fn param_names(&self) -> &[Arc<str>] {
        let n = self.total_params().min(self.varnames.len());
        &self.varnames[..n]
    }

    /// Slot of the `*args` capture.
    #[must_use]
    pub fn varargs_slot(&self) -> Option<usize> {
        self.flags
            .contains(CodeFlags::VARARGS)
            .then(|| usize::try_from(self.arg_count + self.kwonly_count).unwrap_or(usize::MAX))
    }

    /// Slot of the `**kwargs` capture.
    #[must_use]
    pub fn varkw_slot(&self) -> Option<usize> {
        self.flags.contains(CodeFlags::VARKEYWORDS).then(|| {
            let base = usize::try_from(self.arg_count + self.kwonly_count).unwrap_or(usize::MAX);
            base + usize::from(self.flags.contains(CodeFlags::VARARGS))
        })
    }

    /// Declared type of a parameter, `object` when absent.
    #[must_use]
    pub fn param_type(&self, name: &str) -> TypeRef {
        self.annotations
            .get(name)
            .cloned()
            .unwrap_or_else(|| builtin_types().object.clone())
    }

    /// Declared return type, `object` when absent.
    #[must_use]
    pub fn return_type(&self) -> TypeRef {
        self.param_type("return")
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Name of cell slot `index` (cellvars, then freevars).
    #[must_use]
    pub fn cell_name(&self, index: usize) -> Option<&Arc<str>> {
        self.cellvars
            .get(index)
            .or_else(|| self.freevars.get(index.checked_sub(self.cellvars.len())?))
    }

    /// Number of cell slots.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }

    /// Whether the body contains suspension points.
    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
            || self
                .instructions
                .iter()
                .any(|i| i.opcode.is_suspension() || i.opcode == Opcode::ReturnGenerator)
    }

    /// Instruction index for a word offset.
    #[must_use]
    pub fn index_of_offset(&self, offset: u32) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |i| i.offset)
            .ok()
    }

    /// Source line of the instruction at `index`, or of the nearest one before it.
    #[must_use]
    pub fn line_at(&self, index: usize) -> Option<u32> {
        self.instructions
            .get(..=index.min(self.instructions.len().saturating_sub(1)))?
            .iter()
            .rev()
            .find_map(|i| i.line)
    }

    /// Wrap as a constant for `MAKE_FUNCTION`.
    #[must_use]
    pub fn into_constant(self) -> Value {
        Value::Object(Arc::new(CodeConstant(Arc::new(self))))
    }
}

/// A nested code object stored in a constant pool.
#[derive(Debug)]
pub struct CodeConstant(pub Arc<CompiledFunction>);

impl CodeConstant {
    /// The code behind a constant, if it is one.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Arc<CompiledFunction>> {
        downcast::<CodeConstant>(value).map(|c| Arc::clone(&c.0))
    }
}

impl NativeObject for CodeConstant {
    fn type_ref(&self) -> TypeRef {
        builtin_types().code.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("<code object {}>", self.0.qualname)
    }
}
