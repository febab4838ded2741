//! The dynamic operator protocol.
//!
//! Every operator is a named lookup on the operand's type followed by a call.
//! The protocol never knows what `+` means for a given type; it only knows
//! which names to try and in what order.
//!
//! ```text
//! a + b
//!   1. type(a).__add__(a, b)      -> result unless NotImplemented
//!   2. type(b).__radd__(b, a)     -> only when type(b) is not type(a)
//!   3. TypeError: unsupported operand type(s) for +: 'A' and 'B'
//! ```
//!
//! In-place operators try `__iadd__` first and fall back to the binary form.
//! Rich comparisons swap to the mirrored operator (`<` becomes `>`) on the
//! right operand, and `==`/`!=` fall back to identity.

use crate::exception::{Exception, PyResult};
use crate::object::type_obj::{Method, TypeRef};
use crate::object::{BoundCallable, BoundMethod, KeywordArgs};
use crate::types::builtin_types;
use crate::value::{format_float, Slice, Value};
use std::sync::Arc;

// =============================================================================
// Operator descriptors
// =============================================================================

/// Binary operators, with their forward, reflected and in-place names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    TrueDivide,
    /// `//`
    FloorDivide,
    /// `%`
    Modulo,
    /// `**`
    Power,
    /// `@`
    MatrixMultiply,
    /// `<<`
    LShift,
    /// `>>`
    RShift,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
}

impl BinaryOp {
    /// Forward dunder name.
    #[must_use]
    pub const fn dunder(self) -> &'static str {
        match self {
            Self::Add => "__add__",
            Self::Subtract => "__sub__",
            Self::Multiply => "__mul__",
            Self::TrueDivide => "__truediv__",
            Self::FloorDivide => "__floordiv__",
            Self::Modulo => "__mod__",
            Self::Power => "__pow__",
            Self::MatrixMultiply => "__matmul__",
            Self::LShift => "__lshift__",
            Self::RShift => "__rshift__",
            Self::And => "__and__",
            Self::Or => "__or__",
            Self::Xor => "__xor__",
        }
    }

    /// Reflected dunder name, tried on the right operand.
    #[must_use]
    pub const fn reflected(self) -> &'static str {
        match self {
            Self::Add => "__radd__",
            Self::Subtract => "__rsub__",
            Self::Multiply => "__rmul__",
            Self::TrueDivide => "__rtruediv__",
            Self::FloorDivide => "__rfloordiv__",
            Self::Modulo => "__rmod__",
            Self::Power => "__rpow__",
            Self::MatrixMultiply => "__rmatmul__",
            Self::LShift => "__rlshift__",
            Self::RShift => "__rrshift__",
            Self::And => "__rand__",
            Self::Or => "__ror__",
            Self::Xor => "__rxor__",
        }
    }

    /// In-place dunder name.
    #[must_use]
    pub const fn inplace(self) -> &'static str {
        match self {
            Self::Add => "__iadd__",
            Self::Subtract => "__isub__",
            Self::Multiply => "__imul__",
            Self::TrueDivide => "__itruediv__",
            Self::FloorDivide => "__ifloordiv__",
            Self::Modulo => "__imod__",
            Self::Power => "__ipow__",
            Self::MatrixMultiply => "__imatmul__",
            Self::LShift => "__ilshift__",
            Self::RShift => "__irshift__",
            Self::And => "__iand__",
            Self::Or => "__ior__",
            Self::Xor => "__ixor__",
        }
    }

    /// Source symbol, for error messages.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::TrueDivide => "/",
            Self::FloorDivide => "//",
            Self::Modulo => "%",
            Self::Power => "**",
            Self::MatrixMultiply => "@",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }
}

/// Rich comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Decode the `COMPARE_OP` immediate.
    #[must_use]
    pub const fn from_arg(arg: u32) -> Option<Self> {
        Some(match arg {
            0 => Self::Lt,
            1 => Self::Le,
            2 => Self::Eq,
            3 => Self::Ne,
            4 => Self::Gt,
            5 => Self::Ge,
            _ => return None,
        })
    }

    /// Dunder name.
    #[must_use]
    pub const fn dunder(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }

    /// Operator to try on the right operand.
    #[must_use]
    pub const fn mirrored(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Negative,
    /// `+x`
    Positive,
    /// `~x`
    Invert,
    /// `not x`, answered by truthiness.
    Not,
}

impl UnaryOp {
    /// Dunder name, `None` for `not`.
    #[must_use]
    pub const fn dunder(self) -> Option<&'static str> {
        match self {
            Self::Negative => Some("__neg__"),
            Self::Positive => Some("__pos__"),
            Self::Invert => Some("__invert__"),
            Self::Not => None,
        }
    }

    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Negative => "-",
            Self::Positive => "+",
            Self::Invert => "~",
            Self::Not => "not",
        }
    }
}

/// Three-operand protocol operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TernaryOp {
    /// `container[key] = value`
    SetItem,
    /// `pow(base, exp, mod)`
    Power,
}

impl TernaryOp {
    /// Dunder name.
    #[must_use]
    pub const fn dunder(self) -> &'static str {
        match self {
            Self::SetItem => "__setitem__",
            Self::Power => "__pow__",
        }
    }
}

// =============================================================================
// Operator dispatch
// =============================================================================

/// `left <op> right`.
pub fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> PyResult<Value> {
    let method = left.type_of().lookup(op.dunder());
    binary_op_resolved(op, method.as_ref(), left, right)
}

/// `left <op> right` with the left operand's method already resolved.
///
/// Used by call sites whose left operand type was proven at translation time.
pub fn binary_op_resolved(
    op: BinaryOp,
    left_method: Option<&Method>,
    left: &Value,
    right: &Value,
) -> PyResult<Value> {
    if let Some(method) = left_method {
        let result = method.call(&[left.clone(), right.clone()])?;
        if !result.is_not_implemented() {
            return Ok(result);
        }
    }
    let left_type = left.type_of();
    let right_type = right.type_of();
    if left_type.id() != right_type.id() {
        if let Some(method) = right_type.lookup(op.reflected()) {
            let result = method.call(&[right.clone(), left.clone()])?;
            if !result.is_not_implemented() {
                return Ok(result);
            }
        }
    }
    Err(Exception::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left_type.name(),
        right_type.name()
    )))
}

/// `left <op>= right`.
pub fn inplace_op(op: BinaryOp, left: &Value, right: &Value) -> PyResult<Value> {
    if let Some(method) = left.type_of().lookup(op.inplace()) {
        let result = method.call(&[left.clone(), right.clone()])?;
        if !result.is_not_implemented() {
            return Ok(result);
        }
    }
    binary_op(op, left, right)
}

/// Rich comparison.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> PyResult<Value> {
    let left_type = left.type_of();
    let right_type = right.type_of();
    if let Some(method) = left_type.lookup(op.dunder()) {
        let result = method.call(&[left.clone(), right.clone()])?;
        if !result.is_not_implemented() {
            return Ok(result);
        }
    }
    let mirrored = op.mirrored();
    if let Some(method) = right_type.lookup(mirrored.dunder()) {
        let result = method.call(&[right.clone(), left.clone()])?;
        if !result.is_not_implemented() {
            return Ok(result);
        }
    }
    match op {
        CompareOp::Eq => Ok(Value::Bool(left.is(right))),
        CompareOp::Ne => Ok(Value::Bool(!left.is(right))),
        _ => Err(Exception::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left_type.name(),
            right_type.name()
        ))),
    }
}

/// `left == right` as a Rust bool.
pub fn equals(left: &Value, right: &Value) -> PyResult<bool> {
    if left.is(right) {
        return Ok(true);
    }
    truthy(&compare(CompareOp::Eq, left, right)?)
}

/// Unary operator.
pub fn unary_op(op: UnaryOp, operand: &Value) -> PyResult<Value> {
    let Some(name) = op.dunder() else {
        return Ok(Value::Bool(!truthy(operand)?));
    };
    match operand.type_of().lookup(name) {
        Some(method) => method.call(std::slice::from_ref(operand)),
        None => Err(Exception::type_error(format!(
            "bad operand type for unary {}: '{}'",
            op.symbol(),
            operand.type_name()
        ))),
    }
}

/// Three-operand operation.
pub fn ternary_op(op: TernaryOp, first: &Value, second: &Value, third: &Value) -> PyResult<Value> {
    match first.type_of().lookup(op.dunder()) {
        Some(method) => method.call(&[first.clone(), second.clone(), third.clone()]),
        None => Err(match op {
            TernaryOp::SetItem => Exception::type_error(format!(
                "'{}' object does not support item assignment",
                first.type_name()
            )),
            TernaryOp::Power => Exception::type_error(format!(
                "unsupported operand type(s) for pow(): '{}', '{}', '{}'",
                first.type_name(),
                second.type_name(),
                third.type_name()
            )),
        }),
    }
}

/// Truthiness: `__bool__`, then `__len__`, then true.
pub fn truthy(value: &Value) -> PyResult<bool> {
    match value {
        Value::None => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        Value::Float(f) => Ok(*f != 0.0),
        Value::Str(s) => Ok(!s.is_empty()),
        Value::Tuple(t) => Ok(!t.is_empty()),
        Value::List(l) => Ok(!l.read().is_empty()),
        Value::Dict(d) => Ok(!d.read().is_empty()),
        Value::Set(s) => Ok(!s.read().is_empty()),
        _ => {
            let ty = value.type_of();
            if let Some(method) = ty.lookup("__bool__") {
                return match method.call(std::slice::from_ref(value))? {
                    Value::Bool(b) => Ok(b),
                    other => Err(Exception::type_error(format!(
                        "__bool__ should return bool, returned {}",
                        other.type_name()
                    ))),
                };
            }
            if ty.lookup("__len__").is_some() {
                return Ok(len(value)? != 0);
            }
            Ok(true)
        }
    }
}

// =============================================================================
// Containers
// =============================================================================

/// `len(value)`.
pub fn len(value: &Value) -> PyResult<usize> {
    match value {
        Value::Tuple(t) => Ok(t.len()),
        Value::List(l) => Ok(l.read().len()),
        Value::Dict(d) => Ok(d.read().len()),
        Value::Set(s) => Ok(s.read().len()),
        _ => match value.type_of().lookup("__len__") {
            Some(method) => {
                let n = method.call(std::slice::from_ref(value))?;
                n.as_int()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| Exception::value_error("__len__() should return >= 0"))
            }
            None => Err(Exception::type_error(format!(
                "object of type '{}' has no len()",
                value.type_name()
            ))),
        },
    }
}

/// `container[key]`.
pub fn get_item(container: &Value, key: &Value) -> PyResult<Value> {
    if let Value::Type(ty) = container {
        // `list[int]` and friends evaluate to the type itself.
        return Ok(Value::Type(Arc::clone(ty)));
    }
    match container.type_of().lookup("__getitem__") {
        Some(method) => method.call(&[container.clone(), key.clone()]),
        None => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            container.type_name()
        ))),
    }
}

/// `container[key] = value`.
pub fn set_item(container: &Value, key: &Value, value: &Value) -> PyResult<()> {
    ternary_op(TernaryOp::SetItem, container, key, value).map(|_| ())
}

/// `del container[key]`.
pub fn del_item(container: &Value, key: &Value) -> PyResult<()> {
    match container.type_of().lookup("__delitem__") {
        Some(method) => method.call(&[container.clone(), key.clone()]).map(|_| ()),
        None => Err(Exception::type_error(format!(
            "'{}' object doesn't support item deletion",
            container.type_name()
        ))),
    }
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> PyResult<bool> {
    if let Some(method) = container.type_of().lookup("__contains__") {
        return truthy(&method.call(&[container.clone(), item.clone()])?);
    }
    let iterator = get_iter(container)?;
    while let Some(candidate) = next(&iterator)? {
        if equals(&candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Normalize a sequence index, raising `IndexError` when out of range.
pub fn sequence_index(index: &Value, len: usize, kind: &str) -> PyResult<usize> {
    let raw = index.as_int().ok_or_else(|| {
        Exception::type_error(format!(
            "{kind} indices must be integers or slices, not {}",
            index.type_name()
        ))
    })?;
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let normalized = if raw < 0 { raw + len_i } else { raw };
    if normalized < 0 || normalized >= len_i {
        return Err(Exception::index_error(format!("{kind} index out of range")));
    }
    usize::try_from(normalized).map_err(|_| Exception::index_error(format!("{kind} index out of range")))
}

/// Indices selected by a slice over a sequence of length `len`.
pub fn slice_indices(slice: &Slice, len: usize) -> PyResult<Vec<usize>> {
    let bound = |v: &Value, what: &str| -> PyResult<Option<i64>> {
        match v {
            Value::None => Ok(None),
            other => other.as_int().map(Some).ok_or_else(|| {
                Exception::type_error(format!(
                    "slice {what} must be an integer or None, not {}",
                    other.type_name()
                ))
            }),
        }
    };
    let step = bound(&slice.step, "step")?.unwrap_or(1);
    if step == 0 {
        return Err(Exception::value_error("slice step cannot be zero"));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |v: i64, lo: i64, hi: i64| -> i64 {
        let v = if v < 0 { v + len } else { v };
        v.clamp(lo, hi)
    };
    let (start, stop) = if step > 0 {
        (
            bound(&slice.start, "start")?.map_or(0, |v| clamp(v, 0, len)),
            bound(&slice.stop, "stop")?.map_or(len, |v| clamp(v, 0, len)),
        )
    } else {
        (
            bound(&slice.start, "start")?.map_or(len - 1, |v| clamp(v, -1, len - 1)),
            bound(&slice.stop, "stop")?.map_or(-1, |v| clamp(v, -1, len - 1)),
        )
    };
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(usize::try_from(i).unwrap_or(0));
        i += step;
    }
    Ok(out)
}

// =============================================================================
// Iteration
// =============================================================================

/// `iter(value)`.
pub fn get_iter(value: &Value) -> PyResult<Value> {
    match value.type_of().lookup("__iter__") {
        Some(method) => method.call(std::slice::from_ref(value)),
        None => Err(Exception::type_error(format!(
            "'{}' object is not iterable",
            value.type_name()
        ))),
    }
}

/// Advance an iterator. `Ok(None)` on exhaustion.
pub fn next(iterator: &Value) -> PyResult<Option<Value>> {
    match iterator.type_of().lookup("__next__") {
        Some(method) => match method.call(std::slice::from_ref(iterator)) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_instance(&builtin_types().stop_iteration) => Ok(None),
            Err(e) => Err(e),
        },
        None => Err(Exception::type_error(format!(
            "'{}' object is not an iterator",
            iterator.type_name()
        ))),
    }
}

/// Drain any iterable into a vector.
pub fn collect_iterable(value: &Value) -> PyResult<Vec<Value>> {
    match value {
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::List(items) => Ok(items.read().clone()),
        _ => {
            let iterator = get_iter(value)?;
            let mut out = Vec::new();
            while let Some(item) = next(&iterator)? {
                out.push(item);
            }
            Ok(out)
        }
    }
}

// =============================================================================
// Attributes and calls
// =============================================================================

/// `getattr(obj, name)`.
pub fn getattr(obj: &Value, name: &str) -> PyResult<Value> {
    match (obj, name) {
        (Value::Exception(e), "args") => return Ok(Value::tuple(e.args().to_vec())),
        (Value::Exception(e), "__cause__") => {
            return Ok(e.cause().map_or(Value::None, Value::Exception))
        }
        (Value::Exception(e), "__context__") => {
            return Ok(e.context().map_or(Value::None, Value::Exception))
        }
        (Value::Exception(e), "value") if e.is_instance(&builtin_types().stop_iteration) => {
            return Ok(e.stop_value())
        }
        (Value::Type(t), "__name__") => return Ok(Value::from(t.name())),
        (Value::Slice(s), "start") => return Ok(s.start.clone()),
        (Value::Slice(s), "stop") => return Ok(s.stop.clone()),
        (Value::Slice(s), "step") => return Ok(s.step.clone()),
        _ => {}
    }
    if let Value::Object(o) = obj {
        if let Some(value) = o.get_attr(name) {
            return Ok(value);
        }
    }
    if let Value::Type(t) = obj {
        if let Some(method) = t.lookup(name) {
            return Ok(unbound_method(name, method));
        }
    }
    if let Some(method) = obj.type_of().lookup(name) {
        return Ok(Value::Function(Arc::new(BoundMethod::new(
            obj.clone(),
            name,
            method,
        ))));
    }
    Err(Exception::attribute_error(match obj {
        Value::Type(t) => format!("type object '{}' has no attribute '{name}'", t.name()),
        _ => format!("'{}' object has no attribute '{name}'", obj.type_name()),
    }))
}

fn unbound_method(name: &str, method: Method) -> Value {
    match method {
        Method::Callable(c) => Value::Function(c),
        native @ Method::Native(_) => {
            Value::Function(Arc::new(UnboundNative {
                name: Arc::from(name),
                method: native,
            }))
        }
    }
}

struct UnboundNative {
    name: Arc<str>,
    method: Method,
}

impl crate::object::Callable for UnboundNative {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        positional: &[Value],
        keywords: &KeywordArgs,
        _receiver: Option<&Value>,
    ) -> PyResult<Value> {
        match positional.split_first() {
            Some((receiver, rest)) => self.method.call_with_keywords(receiver, rest, keywords),
            None => Err(Exception::type_error(format!(
                "unbound method {}() needs an argument",
                self.name
            ))),
        }
    }

    fn type_ref(&self) -> TypeRef {
        builtin_types().builtin_function.clone()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// `setattr(obj, name, value)`.
pub fn setattr(obj: &Value, name: &str, value: Value) -> PyResult<()> {
    match obj {
        Value::Object(o) => o.set_attr(name, value),
        Value::Type(t) => match value {
            Value::Function(f) => {
                t.define(name, Method::Callable(f));
                Ok(())
            }
            _ => Err(Exception::type_error(format!(
                "cannot set '{name}' attribute of type '{}' to a non-callable",
                t.name()
            ))),
        },
        Value::Exception(e) if name == "__cause__" => {
            e.set_cause(match value {
                Value::Exception(c) => Some(c),
                _ => None,
            });
            Ok(())
        }
        _ => Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            obj.type_name()
        ))),
    }
}

/// `delattr(obj, name)`.
pub fn delattr(obj: &Value, name: &str) -> PyResult<()> {
    match obj {
        Value::Object(o) => o.del_attr(name),
        _ => Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            obj.type_name()
        ))),
    }
}

/// Call any value.
pub fn call(callee: &Value, args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    match callee {
        Value::Function(f) => f.invoke(args, keywords, None),
        Value::Type(t) => t.construct(args, keywords),
        _ => match callee.type_of().lookup("__call__") {
            Some(method) => method.call_with_keywords(callee, args, keywords),
            None => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                callee.type_name()
            ))),
        },
    }
}

/// Bind a callable stored on an object to that object.
#[must_use]
pub fn bind(receiver: Value, target: Arc<dyn crate::object::Callable>) -> Value {
    Value::Function(Arc::new(BoundCallable::new(receiver, target)))
}

/// `isinstance(value, class_or_tuple)`.
pub fn is_instance(value: &Value, class_or_tuple: &Value) -> PyResult<bool> {
    match class_or_tuple {
        Value::Type(t) => Ok(value.is_instance(t)),
        Value::Tuple(options) => {
            for option in options.iter() {
                if is_instance(value, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(Exception::type_error(format!(
            "isinstance() arg 2 must be a type or tuple of types, not {}",
            other.type_name()
        ))),
    }
}

// =============================================================================
// String conversion
// =============================================================================

/// `repr(value)`, honoring `__repr__` on user types.
pub fn repr(value: &Value) -> PyResult<String> {
    if let Value::Object(_) = value {
        if let Some(method) = value.type_of().lookup("__repr__") {
            return expect_str(method.call(std::slice::from_ref(value))?, "__repr__");
        }
    }
    Ok(value.repr())
}

/// `str(value)`, honoring `__str__` then `__repr__` on user types.
pub fn to_str(value: &Value) -> PyResult<String> {
    if let Value::Object(_) = value {
        if let Some(method) = value.type_of().lookup("__str__") {
            return expect_str(method.call(std::slice::from_ref(value))?, "__str__");
        }
        return repr(value);
    }
    Ok(value.to_display())
}

fn expect_str(value: Value, method: &str) -> PyResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(Exception::type_error(format!(
            "{method} returned non-string (type {})",
            other.type_name()
        ))),
    }
}

/// `format(value, spec)` for the common numeric and width specs.
pub fn format_value(value: &Value, spec: &str) -> PyResult<String> {
    if spec.is_empty() {
        return to_str(value);
    }
    let (body, kind) = match spec.chars().last() {
        Some(c @ ('f' | 'd' | 'x' | 's' | '%')) => (&spec[..spec.len() - 1], Some(c)),
        _ => (spec, None),
    };
    let (width, precision) = match body.split_once('.') {
        Some((w, p)) => (w, Some(p)),
        None => (body, None),
    };
    let precision = precision
        .map(|p| p.parse::<usize>())
        .transpose()
        .map_err(|_| Exception::value_error(format!("invalid format spec '{spec}'")))?;
    let (align_right, width) = match width.strip_prefix('<') {
        Some(rest) => (false, rest),
        None => (true, width.strip_prefix('>').unwrap_or(width)),
    };
    let zero_pad = width.starts_with('0') && width.len() > 1;
    let width = if width.is_empty() {
        0
    } else {
        width
            .parse::<usize>()
            .map_err(|_| Exception::value_error(format!("invalid format spec '{spec}'")))?
    };
    let text = match kind {
        Some('f') => {
            let f = value.as_float().ok_or_else(|| format_mismatch('f', value))?;
            format!("{:.*}", precision.unwrap_or(6), f)
        }
        Some('%') => {
            let f = value.as_float().ok_or_else(|| format_mismatch('%', value))?;
            format!("{:.*}%", precision.unwrap_or(6), f * 100.0)
        }
        Some('d') => value.as_int().ok_or_else(|| format_mismatch('d', value))?.to_string(),
        Some('x') => format!("{:x}", value.as_int().ok_or_else(|| format_mismatch('x', value))?),
        _ => match (value, precision) {
            (Value::Float(f), Some(p)) => format!("{f:.p$}"),
            (Value::Float(f), None) => format_float(*f),
            (_, Some(p)) => to_str(value)?.chars().take(p).collect(),
            _ => to_str(value)?,
        },
    };
    let pad = width.saturating_sub(text.chars().count());
    Ok(match (pad, align_right, zero_pad) {
        (0, _, _) => text,
        (n, true, true) => format!("{}{text}", "0".repeat(n)),
        (n, true, false) => format!("{}{text}", " ".repeat(n)),
        (n, false, _) => format!("{text}{}", " ".repeat(n)),
    })
}

fn format_mismatch(code: char, value: &Value) -> Exception {
    Exception::value_error(format!(
        "Unknown format code '{code}' for object of type '{}'",
        value.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::type_obj::TypeObject;

    #[test]
    fn test_binary_left_then_reflected() {
        assert_eq!(binary_op(BinaryOp::Add, &Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(
            binary_op(BinaryOp::Multiply, &Value::Int(2), &Value::from("ab")).unwrap(),
            Value::from("abab")
        );
    }

    #[test]
    fn test_binary_error_message() {
        let err = binary_op(BinaryOp::Add, &Value::Int(1), &Value::from("a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
        );
    }

    #[test]
    fn test_reflected_on_user_type() {
        fn radd(args: &[Value]) -> PyResult<Value> {
            Ok(Value::from(format!("radd({})", args[1].repr())))
        }
        let ty = TypeObject::subclass("Vec", &builtin_types().object).unwrap();
        ty.define_native("__radd__", radd);
        let obj = Value::Type(ty).call(&[]).unwrap();
        let out = binary_op(BinaryOp::Add, &Value::Int(1), &obj).unwrap();
        assert_eq!(out, Value::from("radd(1)"));
    }

    #[test]
    fn test_compare_mirrors_and_falls_back() {
        assert_eq!(compare(CompareOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap(), Value::Bool(true));
        assert_eq!(compare(CompareOp::Eq, &Value::Int(1), &Value::from("1")).unwrap(), Value::Bool(false));
        assert!(compare(CompareOp::Lt, &Value::Int(1), &Value::from("1")).is_err());
    }

    #[test]
    fn test_inplace_list_mutates() {
        let list = Value::list(vec![Value::Int(1)]);
        let out = inplace_op(BinaryOp::Add, &list, &Value::tuple(vec![Value::Int(2)])).unwrap();
        assert!(out.is(&list));
        assert_eq!(len(&list).unwrap(), 2);
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&Value::None).unwrap());
        assert!(!truthy(&Value::list(vec![])).unwrap());
        assert!(truthy(&Value::from("x")).unwrap());
        assert!(!truthy(&crate::types::iterator::Range::new(0, 0, 1).unwrap().into_value()).unwrap());
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary_op(UnaryOp::Negative, &Value::Int(4)).unwrap(), Value::Int(-4));
        assert_eq!(unary_op(UnaryOp::Not, &Value::Int(0)).unwrap(), Value::Bool(true));
        let err = unary_op(UnaryOp::Negative, &Value::from("s")).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: bad operand type for unary -: 'str'");
    }

    #[test]
    fn test_slice_indices() {
        let s = |a: Value, b: Value, c: Value| Slice { start: a, stop: b, step: c };
        assert_eq!(slice_indices(&s(Value::None, Value::None, Value::Int(-1)), 3).unwrap(), vec![2, 1, 0]);
        assert_eq!(slice_indices(&s(Value::Int(-2), Value::None, Value::None), 4).unwrap(), vec![2, 3]);
        assert!(slice_indices(&s(Value::None, Value::None, Value::Int(0)), 4).is_err());
    }

    #[test]
    fn test_getattr_binds_method() {
        let list = Value::list(vec![]);
        let append = getattr(&list, "append").unwrap();
        append.call(&[Value::Int(9)]).unwrap();
        assert_eq!(list, Value::list(vec![Value::Int(9)]));
        assert!(getattr(&list, "nope").is_err());
    }

    #[test]
    fn test_contains_falls_back_to_iteration() {
        let range = crate::types::iterator::Range::new(0, 5, 1).unwrap().into_value();
        assert!(contains(&range, &Value::Int(3)).unwrap());
        assert!(contains(&Value::from("abc"), &Value::from("b")).unwrap());
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::Float(1.23456), ".2f").unwrap(), "1.23");
        assert_eq!(format_value(&Value::Int(7), "03d").unwrap(), "007");
        assert_eq!(format_value(&Value::from("ab"), "<4").unwrap(), "ab  ");
        assert_eq!(format_value(&Value::Int(255), "x").unwrap(), "ff");
    }

    #[test]
    fn test_is_instance_tuple() {
        let types = Value::tuple(vec![
            Value::Type(builtin_types().str.clone()),
            Value::Type(builtin_types().int.clone()),
        ]);
        assert!(is_instance(&Value::Bool(true), &types).unwrap());
        assert!(!is_instance(&Value::Float(1.0), &types).unwrap());
    }
}
