//! Function builder for bytecode emission.
//!
//! `FunctionBuilder` assembles a [`CompiledFunction`] from a sequence of
//! emit calls. It takes care of:
//!
//! - constant, name, local and cell tables (deduplicated, resolved by name)
//! - labels with forward references, encoded per jump kind at `finish`
//! - exception regions declared between labels
//! - operand-stack depth tracking, used for region depths
//!
//! Local and cell slots are assigned at `finish`, so parameters may be
//! declared after the body refers to them.
//!
//! # Example
//! ```
//! use kiln_bytecode::FunctionBuilder;
//! use kiln_core::protocol::BinaryOp;
//!
//! let mut b = FunctionBuilder::new("add");
//! b.positional(&["x", "y"]);
//! b.load_fast("x").load_fast("y").binary(BinaryOp::Add).return_value();
//! let function = b.finish().unwrap();
//! assert_eq!(function.instructions.len(), 4);
//! ```

use crate::exception_table::{ExceptionTable, ExceptionTableEntry};
use crate::function::{CodeFlags, CompiledFunction, MethodKind};
use crate::instruction::Instruction;
use crate::opcode::{encode_binary_op, encode_compare_op, JumpKind, Opcode};
use kiln_core::protocol::{BinaryOp, CompareOp};
use kiln_core::{KilnError, KilnResult, TypeRef, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// A jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Key type for constant deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    None,
    Bool(bool),
    Int(i64),
    /// Float bits for exact comparison.
    Float(u64),
    Str(Arc<str>),
}

impl ConstantKey {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::None => Some(Self::None),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Float(f) => Some(Self::Float(f.to_bits())),
            Value::Str(s) => Some(Self::Str(Arc::clone(s))),
            _ => None,
        }
    }
}

/// Which table an instruction's argument refers to before slot assignment.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Local,
    Deref,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    start: Label,
    end: Label,
    handler: Label,
    depth: u32,
    push_lasti: bool,
}

/// Builder for [`CompiledFunction`].
pub struct FunctionBuilder {
    name: Arc<str>,
    qualname: Arc<str>,
    filename: Arc<str>,
    first_line: u32,
    line: Option<u32>,

    instructions: Vec<Instruction>,

    constants: Vec<Value>,
    constant_map: FxHashMap<ConstantKey, u32>,
    names: Vec<Arc<str>>,
    name_map: FxHashMap<Arc<str>, u32>,

    positional: Vec<Arc<str>>,
    posonly_count: u32,
    kwonly: Vec<Arc<str>>,
    varargs: Option<Arc<str>>,
    varkw: Option<Arc<str>>,
    /// Locals in first-use order; instruction args index this until `finish`.
    locals_seen: Vec<Arc<str>>,
    derefs_seen: Vec<Arc<str>>,
    freevars: Vec<Arc<str>>,
    pending: Vec<(usize, Pending)>,

    next_label: u32,
    labels: FxHashMap<Label, u32>,
    forward_refs: Vec<(usize, Label)>,
    regions: Vec<Region>,

    depth: i32,
    max_depth: i32,
    label_depth: FxHashMap<Label, i32>,

    flags: CodeFlags,
    method_kind: MethodKind,
    annotations: Vec<(Arc<str>, TypeRef)>,
    defaults: Vec<Value>,
    kw_defaults: Vec<(Arc<str>, Value)>,
}

impl FunctionBuilder {
    /// Create a builder for a function named `name`.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        Self {
            qualname: Arc::clone(&name),
            name,
            filename: Arc::from("<unknown>"),
            first_line: 1,
            line: None,
            instructions: Vec::new(),
            constants: Vec::new(),
            constant_map: FxHashMap::default(),
            names: Vec::new(),
            name_map: FxHashMap::default(),
            positional: Vec::new(),
            posonly_count: 0,
            kwonly: Vec::new(),
            varargs: None,
            varkw: None,
            locals_seen: Vec::new(),
            derefs_seen: Vec::new(),
            freevars: Vec::new(),
            pending: Vec::new(),
            next_label: 0,
            labels: FxHashMap::default(),
            forward_refs: Vec::new(),
            regions: Vec::new(),
            depth: 0,
            max_depth: 0,
            label_depth: FxHashMap::default(),
            flags: CodeFlags::empty(),
            method_kind: MethodKind::Static,
            annotations: Vec::new(),
            defaults: Vec::new(),
            kw_defaults: Vec::new(),
        }
    }

    // =========================================================================
    // Signature
    // =========================================================================

    /// Append positional-or-keyword parameters.
    pub fn positional(&mut self, params: &[&str]) -> &mut Self {
        self.positional.extend(params.iter().map(|p| Arc::from(*p)));
        self
    }

    /// Mark the first `count` positional parameters as positional-only.
    pub fn positional_only(&mut self, count: u32) -> &mut Self {
        self.posonly_count = count;
        self
    }

    /// Append keyword-only parameters.
    pub fn keyword_only(&mut self, params: &[&str]) -> &mut Self {
        self.kwonly.extend(params.iter().map(|p| Arc::from(*p)));
        self
    }

    /// Declare the `*args` capture.
    pub fn varargs(&mut self, name: &str) -> &mut Self {
        self.varargs = Some(Arc::from(name));
        self.flags |= CodeFlags::VARARGS;
        self
    }

    /// Declare the `**kwargs` capture.
    pub fn varkw(&mut self, name: &str) -> &mut Self {
        self.varkw = Some(Arc::from(name));
        self.flags |= CodeFlags::VARKEYWORDS;
        self
    }

    /// Defaults for the trailing positional parameters.
    pub fn defaults(&mut self, values: Vec<Value>) -> &mut Self {
        self.defaults = values;
        self
    }

    /// Default for a keyword-only parameter.
    pub fn kw_default(&mut self, name: &str, value: Value) -> &mut Self {
        self.kw_defaults.push((Arc::from(name), value));
        self
    }

    /// Declare a parameter type, or the return type under `"return"`.
    pub fn annotate(&mut self, name: &str, ty: TypeRef) -> &mut Self {
        self.annotations.push((Arc::from(name), ty));
        self
    }

    /// Receiver binding.
    pub fn method_kind(&mut self, kind: MethodKind) -> &mut Self {
        self.method_kind = kind;
        self
    }

    /// Set the qualified name.
    pub fn qualname(&mut self, qualname: &str) -> &mut Self {
        self.qualname = Arc::from(qualname);
        self
    }

    /// Set the filename.
    pub fn filename(&mut self, filename: &str) -> &mut Self {
        self.filename = Arc::from(filename);
        self
    }

    /// Add code flags.
    pub fn add_flags(&mut self, flags: CodeFlags) -> &mut Self {
        self.flags |= flags;
        self
    }

    /// Set the source line for subsequent instructions.
    pub fn set_line(&mut self, line: u32) -> &mut Self {
        if self.instructions.is_empty() && self.line.is_none() {
            self.first_line = line;
        }
        self.line = Some(line);
        self
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Add a constant and return its index.
    pub fn add_constant(&mut self, value: Value) -> u32 {
        let key = ConstantKey::from_value(&value);
        if let Some(&index) = key.as_ref().and_then(|k| self.constant_map.get(k)) {
            return index;
        }
        let index = index_u32(self.constants.len());
        self.constants.push(value);
        if let Some(key) = key {
            self.constant_map.insert(key, index);
        }
        index
    }

    /// Add a global or attribute name and return its index.
    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.name_map.get(name) {
            return index;
        }
        let name: Arc<str> = Arc::from(name);
        let index = index_u32(self.names.len());
        self.name_map.insert(Arc::clone(&name), index);
        self.names.push(name);
        index
    }

    /// Declare a variable captured from the enclosing function.
    pub fn freevar(&mut self, name: &str) -> &mut Self {
        if !self.freevars.iter().any(|f| &**f == name) {
            self.freevars.push(Arc::from(name));
        }
        self
    }

    fn provisional(seen: &mut Vec<Arc<str>>, name: &str) -> u32 {
        match seen.iter().position(|n| &**n == name) {
            Some(i) => index_u32(i),
            None => {
                seen.push(Arc::from(name));
                index_u32(seen.len() - 1)
            }
        }
    }

    // =========================================================================
    // Labels and regions
    // =========================================================================

    /// Create an unbound label.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels.insert(label, index_u32(self.instructions.len()));
        if let Some(&depth) = self.label_depth.get(&label) {
            self.depth = depth;
        }
        self
    }

    /// Protect `[start, end)` with a handler at `handler`.
    pub fn protect(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        depth: u32,
        push_lasti: bool,
    ) -> &mut Self {
        self.regions.push(Region {
            start,
            end,
            handler,
            depth,
            push_lasti,
        });
        let entry = i32::try_from(depth).unwrap_or(i32::MAX) + i32::from(push_lasti) + 1;
        self.label_depth.insert(handler, entry);
        self
    }

    /// Current tracked operand-stack depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        u32::try_from(self.depth.max(0)).unwrap_or(0)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Emit a raw instruction.
    pub fn emit(&mut self, opcode: Opcode, arg: u32) -> &mut Self {
        let offset = index_u32(self.instructions.len());
        let mut instruction = Instruction::new(opcode, offset, arg);
        instruction.line = self.line;
        self.instructions.push(instruction);
        self.depth += opcode.stack_effect(arg, false);
        self.max_depth = self.max_depth.max(self.depth);
        self
    }

    /// Emit a jump to `label`.
    pub fn emit_jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        let jump_depth = self.depth + opcode.stack_effect(0, true);
        self.label_depth.entry(label).or_insert(jump_depth);
        self.forward_refs.push((self.instructions.len(), label));
        self.emit(opcode, 0)
    }

    fn emit_pending(&mut self, opcode: Opcode, arg: u32, kind: Pending) -> &mut Self {
        self.pending.push((self.instructions.len(), kind));
        self.emit(opcode, arg)
    }

    /// Push a constant.
    pub fn load_const(&mut self, value: impl Into<Value>) -> &mut Self {
        let index = self.add_constant(value.into());
        self.emit(Opcode::LoadConst, index)
    }

    /// Push None.
    pub fn load_none(&mut self) -> &mut Self {
        self.load_const(Value::None)
    }

    /// Push a local.
    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let slot = Self::provisional(&mut self.locals_seen, name);
        self.emit_pending(Opcode::LoadFast, slot, Pending::Local)
    }

    /// Pop into a local.
    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let slot = Self::provisional(&mut self.locals_seen, name);
        self.emit_pending(Opcode::StoreFast, slot, Pending::Local)
    }

    /// Unbind a local.
    pub fn delete_fast(&mut self, name: &str) -> &mut Self {
        let slot = Self::provisional(&mut self.locals_seen, name);
        self.emit_pending(Opcode::DeleteFast, slot, Pending::Local)
    }

    /// Push a global.
    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::LoadGlobal, index)
    }

    /// Pop into a global.
    pub fn store_global(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::StoreGlobal, index)
    }

    /// Push the content of a cell.
    pub fn load_deref(&mut self, name: &str) -> &mut Self {
        let slot = Self::provisional(&mut self.derefs_seen, name);
        self.emit_pending(Opcode::LoadDeref, slot, Pending::Deref)
    }

    /// Pop into a cell.
    pub fn store_deref(&mut self, name: &str) -> &mut Self {
        let slot = Self::provisional(&mut self.derefs_seen, name);
        self.emit_pending(Opcode::StoreDeref, slot, Pending::Deref)
    }

    /// Push a cell object.
    pub fn load_closure(&mut self, name: &str) -> &mut Self {
        let slot = Self::provisional(&mut self.derefs_seen, name);
        self.emit_pending(Opcode::LoadClosure, slot, Pending::Deref)
    }

    /// Create a cell, seeded from the parameter of the same name if any.
    pub fn make_cell(&mut self, name: &str) -> &mut Self {
        let slot = Self::provisional(&mut self.derefs_seen, name);
        self.emit_pending(Opcode::MakeCell, slot, Pending::Deref)
    }

    /// Replace TOS with one of its attributes.
    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::LoadAttr, index)
    }

    /// `TOS.name = TOS1`.
    pub fn store_attr(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::StoreAttr, index)
    }

    /// Replace TOS with a bound method.
    pub fn load_method(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::LoadMethod, index)
    }

    /// `TOS1 <op> TOS`.
    pub fn binary(&mut self, op: BinaryOp) -> &mut Self {
        self.emit(Opcode::BinaryOp, encode_binary_op(op, false))
    }

    /// `TOS1 <op>= TOS`.
    pub fn inplace(&mut self, op: BinaryOp) -> &mut Self {
        self.emit(Opcode::BinaryOp, encode_binary_op(op, true))
    }

    /// Rich comparison.
    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit(Opcode::CompareOp, encode_compare_op(op))
    }

    /// Call with `argc` positional arguments.
    pub fn call(&mut self, argc: u32) -> &mut Self {
        self.emit(Opcode::Call, argc)
    }

    /// Call whose last `names.len()` arguments are keywords.
    pub fn call_kw(&mut self, argc: u32, names: &[&str]) -> &mut Self {
        let tuple = Value::tuple(names.iter().map(|n| Value::from(*n)).collect());
        let index = self.add_constant(tuple);
        self.emit(Opcode::KwNames, index).emit(Opcode::Call, argc)
    }

    /// Call a method loaded by `load_method`.
    pub fn call_method(&mut self, argc: u32) -> &mut Self {
        self.emit(Opcode::CallMethod, argc)
    }

    /// Instantiate nested code; the parts flagged in `flags` must already be pushed.
    pub fn make_function(&mut self, code: CompiledFunction, flags: u32) -> &mut Self {
        let index = self.add_constant(code.into_constant());
        self.emit(Opcode::LoadConst, index).emit(Opcode::MakeFunction, flags)
    }

    /// Discard TOS.
    pub fn pop_top(&mut self) -> &mut Self {
        self.emit(Opcode::PopTop, 0)
    }

    /// Return TOS.
    pub fn return_value(&mut self) -> &mut Self {
        self.emit(Opcode::ReturnValue, 0)
    }

    /// Return a constant.
    pub fn return_const(&mut self, value: impl Into<Value>) -> &mut Self {
        let index = self.add_constant(value.into());
        self.emit(Opcode::ReturnConst, index)
    }

    /// Suspend, yielding TOS.
    pub fn yield_value(&mut self) -> &mut Self {
        self.emit(Opcode::YieldValue, 0)
    }

    // =========================================================================
    // Structured helpers
    // =========================================================================

    /// Run `body` when TOS is truthy. TOS is popped.
    pub fn if_true(&mut self, body: impl FnOnce(&mut Self)) -> &mut Self {
        let end = self.new_label();
        self.emit_jump(Opcode::PopJumpForwardIfFalse, end);
        body(self);
        self.bind(end).emit(Opcode::Nop, 0)
    }

    /// Run `then` when TOS is truthy, `otherwise` when not. TOS is popped.
    pub fn if_else(
        &mut self,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let else_label = self.new_label();
        let end = self.new_label();
        self.emit_jump(Opcode::PopJumpForwardIfFalse, else_label);
        then(self);
        self.emit_jump(Opcode::JumpForward, end);
        self.bind(else_label);
        otherwise(self);
        self.bind(end).emit(Opcode::Nop, 0)
    }

    /// Iterate the iterator at TOS. `body` sees the item on TOS and must consume it.
    pub fn for_each(&mut self, body: impl FnOnce(&mut Self)) -> &mut Self {
        let top = self.new_label();
        let end = self.new_label();
        self.bind(top);
        self.emit_jump(Opcode::ForIter, end);
        body(self);
        self.emit_jump(Opcode::JumpBackward, top);
        self.bind(end).emit(Opcode::Nop, 0)
    }

    /// `try: body except: handler`.
    ///
    /// `handler` starts with the caught exception on TOS and must consume it.
    pub fn try_except(
        &mut self,
        body: impl FnOnce(&mut Self),
        handler: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.try_except_inner(None, body, handler)
    }

    /// `try: body except <global type_name>: handler`.
    ///
    /// Exceptions that do not match are re-raised.
    pub fn try_except_matching(
        &mut self,
        type_name: &str,
        body: impl FnOnce(&mut Self),
        handler: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.try_except_inner(Some(type_name), body, handler)
    }

    fn try_except_inner(
        &mut self,
        type_name: Option<&str>,
        body: impl FnOnce(&mut Self),
        handler: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let depth = self.depth();
        let start = self.new_label();
        let end = self.new_label();
        let handler_label = self.new_label();
        let cleanup = self.new_label();
        let after = self.new_label();

        self.protect(start, end, handler_label, depth, false);
        self.bind(start);
        body(self);
        self.bind(end);
        self.emit_jump(Opcode::JumpForward, after);

        self.bind(handler_label);
        self.emit(Opcode::PushExcInfo, 0);
        let handler_start = self.new_label();
        self.protect(handler_start, cleanup, cleanup, depth + 1, true);
        self.bind(handler_start);
        match type_name {
            Some(name) => {
                let no_match = self.new_label();
                self.load_global(name).emit(Opcode::CheckExcMatch, 0);
                self.emit_jump(Opcode::PopJumpForwardIfFalse, no_match);
                handler(self);
                self.emit(Opcode::PopExcept, 0);
                self.emit_jump(Opcode::JumpForward, after);
                self.bind(no_match).emit(Opcode::Reraise, 0);
            }
            None => {
                handler(self);
                self.emit(Opcode::PopExcept, 0);
                self.emit_jump(Opcode::JumpForward, after);
            }
        }

        self.bind(cleanup);
        self.emit(Opcode::Copy, 3)
            .emit(Opcode::PopExcept, 0)
            .emit(Opcode::Reraise, 1);
        self.bind(after).emit(Opcode::Nop, 0)
    }

    // =========================================================================
    // Finish
    // =========================================================================

    /// Resolve labels and slots and produce the function.
    pub fn finish(mut self) -> KilnResult<CompiledFunction> {
        let name = self.name.to_string();
        let label_offset = |labels: &FxHashMap<Label, u32>, label: Label, at: u32| {
            labels
                .get(&label)
                .copied()
                .ok_or_else(|| KilnError::jump_target(name.clone(), at, -1))
        };

        let mut targets = FxHashSet::default();
        for &(index, label) in &self.forward_refs {
            let instruction = &mut self.instructions[index];
            let target = label_offset(&self.labels, label, instruction.offset)?;
            let next = instruction.offset + 1;
            instruction.arg = match instruction.opcode.jump_kind() {
                JumpKind::Absolute | JumpKind::None => target,
                JumpKind::Forward => target.checked_sub(next).ok_or_else(|| {
                    KilnError::jump_target(name.clone(), instruction.offset, i64::from(target))
                })?,
                JumpKind::Backward => next.checked_sub(target).ok_or_else(|| {
                    KilnError::jump_target(name.clone(), instruction.offset, i64::from(target))
                })?,
            };
            targets.insert(target);
        }

        let mut table = ExceptionTable::new();
        for region in &self.regions {
            let start = label_offset(&self.labels, region.start, 0)?;
            let end = label_offset(&self.labels, region.end, start)?;
            let target = label_offset(&self.labels, region.handler, start)?;
            targets.insert(target);
            table.push(ExceptionTableEntry::new(
                start,
                end,
                target,
                region.depth,
                region.push_lasti,
            ));
        }

        // Slot assignment.
        let mut varnames: Vec<Arc<str>> = self.positional.clone();
        varnames.extend(self.kwonly.iter().cloned());
        varnames.extend(self.varargs.iter().cloned());
        varnames.extend(self.varkw.iter().cloned());
        for local in &self.locals_seen {
            if !varnames.contains(local) {
                varnames.push(Arc::clone(local));
            }
        }
        let cellvars: Vec<Arc<str>> = self
            .derefs_seen
            .iter()
            .filter(|n| !self.freevars.contains(n))
            .cloned()
            .collect();
        let mut cells = cellvars.clone();
        cells.extend(self.freevars.iter().cloned());

        for &(index, kind) in &self.pending {
            let instruction = &mut self.instructions[index];
            let provisional = usize::try_from(instruction.arg).unwrap_or(usize::MAX);
            let (seen, table_names) = match kind {
                Pending::Local => (&self.locals_seen, &varnames),
                Pending::Deref => (&self.derefs_seen, &cells),
            };
            let slot = seen
                .get(provisional)
                .and_then(|n| table_names.iter().position(|v| v == n))
                .ok_or_else(|| {
                    KilnError::operand(name.clone(), instruction.offset, "varnames", instruction.arg)
                })?;
            instruction.arg = index_u32(slot);
        }

        for instruction in &mut self.instructions {
            if targets.contains(&instruction.offset) {
                instruction.is_jump_target = true;
            }
        }

        let mut flags = self.flags;
        if self.freevars.is_empty() {
            flags |= CodeFlags::NOFREE;
        }
        if self
            .instructions
            .iter()
            .any(|i| i.opcode.is_suspension() || i.opcode == Opcode::ReturnGenerator)
        {
            flags |= CodeFlags::GENERATOR;
        }

        let mut function = CompiledFunction::empty(&self.name);
        function.qualname = self.qualname;
        function.filename = self.filename;
        function.first_line = self.first_line;
        function.instructions = self.instructions.into_boxed_slice();
        function.constants = self.constants.into_boxed_slice();
        function.names = self.names.into_boxed_slice();
        function.varnames = varnames.into_boxed_slice();
        function.cellvars = cellvars.into_boxed_slice();
        function.freevars = self.freevars.into_boxed_slice();
        function.exception_table = table;
        function.posonly_count = self.posonly_count;
        function.arg_count = index_u32(self.positional.len());
        function.kwonly_count = index_u32(self.kwonly.len());
        function.flags = flags;
        function.method_kind = self.method_kind;
        function.annotations = self.annotations.into_iter().collect();
        function.defaults = self.defaults.into_boxed_slice();
        function.kw_defaults = self.kw_defaults.into_iter().collect();
        Ok(function)
    }

    /// Maximum tracked operand-stack depth so far.
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        u32::try_from(self.max_depth.max(0)).unwrap_or(0)
    }
}

fn index_u32(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_function() {
        let mut b = FunctionBuilder::new("add");
        b.positional(&["x", "y"]);
        b.load_fast("x").load_fast("y").binary(BinaryOp::Add).return_value();
        let f = b.finish().unwrap();
        assert_eq!(f.arg_count, 2);
        assert_eq!(f.instructions[1].arg, 1);
        assert_eq!(f.instructions[2].opcode, Opcode::BinaryOp);
    }

    #[test]
    fn test_params_declared_after_use() {
        let mut b = FunctionBuilder::new("f");
        b.load_fast("tmp").store_fast("x");
        b.positional(&["x"]);
        b.return_const(Value::None);
        let f = b.finish().unwrap();
        assert_eq!(&*f.varnames[0], "x");
        assert_eq!(f.instructions[0].arg, 1);
        assert_eq!(f.instructions[1].arg, 0);
    }

    #[test]
    fn test_constants_deduplicated() {
        let mut b = FunctionBuilder::new("f");
        let a = b.add_constant(Value::Int(1));
        let c = b.add_constant(Value::Int(1));
        let d = b.add_constant(Value::list(vec![]));
        let e = b.add_constant(Value::list(vec![]));
        assert_eq!(a, c);
        assert_ne!(d, e);
    }

    #[test]
    fn test_jump_encoding() {
        let mut b = FunctionBuilder::new("f");
        b.positional(&["x"]);
        b.load_fast("x");
        b.if_else(|b| { b.load_const(1); }, |b| { b.load_const(2); });
        b.return_value();
        let f = b.finish().unwrap();
        // 0 LOAD_FAST, 1 POP_JUMP_FORWARD_IF_FALSE, 2 LOAD_CONST, 3 JUMP_FORWARD,
        // 4 LOAD_CONST, 5 NOP, 6 RETURN_VALUE
        assert_eq!(f.instructions[1].jump_target(), Some(4));
        assert_eq!(f.instructions[3].jump_target(), Some(5));
        assert!(f.instructions[4].is_jump_target);
        assert!(f.instructions[5].is_jump_target);
    }

    #[test]
    fn test_loop_backward_jump() {
        let mut b = FunctionBuilder::new("f");
        b.positional(&["xs"]);
        b.load_fast("xs").emit(Opcode::GetIter, 0);
        b.for_each(|b| { b.pop_top(); });
        b.return_const(Value::None);
        let f = b.finish().unwrap();
        // 2 FOR_ITER -> 5, 3 POP_TOP, 4 JUMP_BACKWARD -> 2
        assert_eq!(f.instructions[2].jump_target(), Some(5));
        assert_eq!(f.instructions[4].jump_target(), Some(2));
    }

    #[test]
    fn test_try_except_regions() {
        let mut b = FunctionBuilder::new("f");
        b.load_const(1);
        b.try_except(
            |b| {
                b.load_const(1).load_const(0).binary(BinaryOp::TrueDivide).pop_top();
            },
            |b| {
                b.pop_top();
            },
        );
        b.return_value();
        let f = b.finish().unwrap();
        let outer = f.exception_table.get(0).unwrap();
        assert_eq!((outer.start, outer.end, outer.depth), (1, 5, 1));
        let handler = f.exception_table.get(1).unwrap();
        assert_eq!(handler.depth, 2);
        assert!(handler.push_lasti);
        assert_eq!(f.instructions[outer.target as usize].opcode, Opcode::PushExcInfo);
        assert_eq!(f.instructions[handler.target as usize].opcode, Opcode::Copy);
    }

    #[test]
    fn test_unbound_label_is_error() {
        let mut b = FunctionBuilder::new("f");
        let nowhere = b.new_label();
        b.emit_jump(Opcode::JumpForward, nowhere);
        assert!(matches!(b.finish(), Err(KilnError::InvalidJumpTarget { .. })));
    }

    #[test]
    fn test_cells_and_freevars() {
        let mut b = FunctionBuilder::new("f");
        b.freevar("outer");
        b.load_deref("outer").store_deref("mine").load_closure("mine").pop_top();
        b.return_const(Value::None);
        let f = b.finish().unwrap();
        assert_eq!(f.cellvars.len(), 1);
        assert_eq!(f.instructions[0].arg, 1);
        assert_eq!(f.instructions[1].arg, 0);
        assert!(!f.flags.contains(CodeFlags::NOFREE));
    }

    #[test]
    fn test_generator_flag() {
        let mut b = FunctionBuilder::new("g");
        b.load_const(1).yield_value().pop_top().return_const(Value::None);
        assert!(b.finish().unwrap().flags.contains(CodeFlags::GENERATOR));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_jumps_land_on_their_label(before in 0usize..20, between in 0usize..20, backward in any::<bool>()) {
                let mut b = FunctionBuilder::new("f");
                for _ in 0..before {
                    b.emit(Opcode::Nop, 0);
                }
                let label = b.new_label();
                let opcode = if backward {
                    b.bind(label);
                    for _ in 0..between {
                        b.emit(Opcode::Nop, 0);
                    }
                    b.emit_jump(Opcode::JumpBackward, label);
                    Opcode::JumpBackward
                } else {
                    b.emit_jump(Opcode::JumpForward, label);
                    for _ in 0..between {
                        b.emit(Opcode::Nop, 0);
                    }
                    b.bind(label);
                    Opcode::JumpForward
                };
                b.return_const(Value::None);
                let f = b.finish().unwrap();
                let jump = f.instructions.iter().find(|i| i.opcode == opcode).unwrap();
                let expected = if backward { before } else { before + 1 + between };
                prop_assert_eq!(jump.jump_target().unwrap(), expected as i64);
                prop_assert!(f.instructions[expected].is_jump_target);
            }
        }
    }
}
