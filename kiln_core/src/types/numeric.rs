//! `int`, `bool` and `float` methods.
//!
//! Binary dunders return `NotImplemented` for operands they do not handle so
//! that the protocol can try the right operand's reflected method. `int`
//! declines `float` operands; `float.__radd__` then picks them up.

use super::BuiltinTypes;
use crate::exception::{Exception, PyResult};
use crate::object::type_obj::TypeRef;
use crate::object::KeywordArgs;
use crate::protocol;
use crate::value::Value;

pub(super) fn register(types: &BuiltinTypes) {
    let int = &types.int;
    for (name, f) in INT_METHODS {
        int.define_native(name, *f);
    }
    int.set_constructor(construct_int);

    let bool_ = &types.bool;
    bool_.define_native("__and__", bool_and);
    bool_.define_native("__rand__", bool_and);
    bool_.define_native("__or__", bool_or);
    bool_.define_native("__ror__", bool_or);
    bool_.define_native("__xor__", bool_xor);
    bool_.define_native("__rxor__", bool_xor);
    bool_.set_constructor(construct_bool);

    let float = &types.float;
    for (name, f) in FLOAT_METHODS {
        float.define_native(name, *f);
    }
    float.set_constructor(construct_float);
}

// =============================================================================
// Operand extraction
// =============================================================================

fn receiver_and_other<'a>(args: &'a [Value], kind: &str) -> PyResult<(&'a Value, &'a Value)> {
    match args {
        [this, other] => Ok((this, other)),
        _ => Err(Exception::type_error(format!(
            "{kind} binary method expected 1 argument, got {}",
            args.len().saturating_sub(1)
        ))),
    }
}

fn int_operands(args: &[Value]) -> PyResult<Option<(i64, i64)>> {
    let (this, other) = receiver_and_other(args, "int")?;
    let a = this.as_int().ok_or_else(|| descriptor_error("int", this))?;
    Ok(other.as_int().map(|b| (a, b)))
}

fn float_operands(args: &[Value]) -> PyResult<Option<(f64, f64)>> {
    let (this, other) = receiver_and_other(args, "float")?;
    let a = this.as_float().ok_or_else(|| descriptor_error("float", this))?;
    Ok(other.as_float().map(|b| (a, b)))
}

fn receiver<'a>(args: &'a [Value], kind: &str) -> PyResult<&'a Value> {
    args.first().ok_or_else(|| {
        Exception::type_error(format!("unbound {kind} method needs an argument"))
    })
}

fn descriptor_error(kind: &str, got: &Value) -> Exception {
    Exception::type_error(format!(
        "descriptor requires a '{kind}' object but received a '{}'",
        got.type_name()
    ))
}

fn overflow() -> Exception {
    Exception::overflow("integer result too large for 64 bits")
}

// =============================================================================
// int
// =============================================================================

macro_rules! int_binary {
    ($forward:ident, $reflected:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $forward(args: &[Value]) -> PyResult<Value> {
            match int_operands(args)? {
                Some(($a, $b)) => $body,
                None => Ok(Value::NotImplemented),
            }
        }

        fn $reflected(args: &[Value]) -> PyResult<Value> {
            match int_operands(args)? {
                Some(($b, $a)) => $body,
                None => Ok(Value::NotImplemented),
            }
        }
    };
}

int_binary!(int_add, int_radd, |a, b| a.checked_add(b).map(Value::Int).ok_or_else(overflow));
int_binary!(int_sub, int_rsub, |a, b| a.checked_sub(b).map(Value::Int).ok_or_else(overflow));
int_binary!(int_mul, int_rmul, |a, b| a.checked_mul(b).map(Value::Int).ok_or_else(overflow));
int_binary!(int_truediv, int_rtruediv, |a, b| int_true_divide(a, b));
int_binary!(int_floordiv, int_rfloordiv, |a, b| int_floor_divide(a, b));
int_binary!(int_mod, int_rmod, |a, b| int_modulo(a, b));
int_binary!(int_pow, int_rpow, |a, b| int_power(a, b));
int_binary!(int_lshift, int_rlshift, |a, b| int_shift_left(a, b));
int_binary!(int_rshift, int_rrshift, |a, b| int_shift_right(a, b));
int_binary!(int_and, int_rand, |a, b| Ok(Value::Int(a & b)));
int_binary!(int_or, int_ror, |a, b| Ok(Value::Int(a | b)));
int_binary!(int_xor, int_rxor, |a, b| Ok(Value::Int(a ^ b)));

#[allow(clippy::cast_precision_loss)]
fn int_true_divide(a: i64, b: i64) -> PyResult<Value> {
    if b == 0 {
        return Err(Exception::zero_division("division by zero"));
    }
    Ok(Value::Float(a as f64 / b as f64))
}

fn int_floor_divide(a: i64, b: i64) -> PyResult<Value> {
    if b == 0 {
        return Err(Exception::zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    let adjust = a % b != 0 && ((a < 0) != (b < 0));
    Ok(Value::Int(if adjust { q - 1 } else { q }))
}

fn int_modulo(a: i64, b: i64) -> PyResult<Value> {
    if b == 0 {
        return Err(Exception::zero_division("integer modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    let adjust = r != 0 && ((r < 0) != (b < 0));
    Ok(Value::Int(if adjust { r + b } else { r }))
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn int_power(a: i64, b: i64) -> PyResult<Value> {
    if b < 0 {
        if a == 0 {
            return Err(Exception::zero_division(
                "0.0 cannot be raised to a negative power",
            ));
        }
        return Ok(Value::Float((a as f64).powf(b as f64)));
    }
    let exp = u32::try_from(b).map_err(|_| overflow())?;
    a.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
}

fn int_shift_left(a: i64, b: i64) -> PyResult<Value> {
    if b < 0 {
        return Err(Exception::value_error("negative shift count"));
    }
    if a == 0 {
        return Ok(Value::Int(0));
    }
    if b >= 63 {
        return Err(overflow());
    }
    let shifted = a << b;
    if shifted >> b != a {
        return Err(overflow());
    }
    Ok(Value::Int(shifted))
}

fn int_shift_right(a: i64, b: i64) -> PyResult<Value> {
    if b < 0 {
        return Err(Exception::value_error("negative shift count"));
    }
    if b >= 64 {
        return Ok(Value::Int(if a < 0 { -1 } else { 0 }));
    }
    Ok(Value::Int(a >> b))
}

macro_rules! int_compare {
    ($name:ident, $op:tt) => {
        #[allow(clippy::cast_precision_loss)]
        fn $name(args: &[Value]) -> PyResult<Value> {
            let (this, other) = receiver_and_other(args, "int")?;
            let a = this.as_int().ok_or_else(|| descriptor_error("int", this))?;
            match other {
                Value::Float(b) => Ok(Value::Bool((a as f64) $op *b)),
                _ => match other.as_int() {
                    Some(b) => Ok(Value::Bool(a $op b)),
                    None => Ok(Value::NotImplemented),
                },
            }
        }
    };
}

int_compare!(int_eq, ==);
int_compare!(int_ne, !=);
int_compare!(int_lt, <);
int_compare!(int_le, <=);
int_compare!(int_gt, >);
int_compare!(int_ge, >=);

fn self_int(args: &[Value]) -> PyResult<i64> {
    let this = receiver(args, "int")?;
    this.as_int().ok_or_else(|| descriptor_error("int", this))
}

fn int_neg(args: &[Value]) -> PyResult<Value> {
    self_int(args)?.checked_neg().map(Value::Int).ok_or_else(overflow)
}

fn int_pos(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Int(self_int(args)?))
}

fn int_invert(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Int(!self_int(args)?))
}

fn int_abs(args: &[Value]) -> PyResult<Value> {
    self_int(args)?.checked_abs().map(Value::Int).ok_or_else(overflow)
}

fn int_bool(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Bool(self_int(args)? != 0))
}

#[allow(clippy::cast_precision_loss)]
fn int_float(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Float(self_int(args)? as f64))
}

const INT_METHODS: &[(&str, fn(&[Value]) -> PyResult<Value>)] = &[
    ("__add__", int_add),
    ("__radd__", int_radd),
    ("__sub__", int_sub),
    ("__rsub__", int_rsub),
    ("__mul__", int_mul),
    ("__rmul__", int_rmul),
    ("__truediv__", int_truediv),
    ("__rtruediv__", int_rtruediv),
    ("__floordiv__", int_floordiv),
    ("__rfloordiv__", int_rfloordiv),
    ("__mod__", int_mod),
    ("__rmod__", int_rmod),
    ("__pow__", int_pow),
    ("__rpow__", int_rpow),
    ("__lshift__", int_lshift),
    ("__rlshift__", int_rlshift),
    ("__rshift__", int_rshift),
    ("__rrshift__", int_rrshift),
    ("__and__", int_and),
    ("__rand__", int_rand),
    ("__or__", int_or),
    ("__ror__", int_ror),
    ("__xor__", int_xor),
    ("__rxor__", int_rxor),
    ("__eq__", int_eq),
    ("__ne__", int_ne),
    ("__lt__", int_lt),
    ("__le__", int_le),
    ("__gt__", int_gt),
    ("__ge__", int_ge),
    ("__neg__", int_neg),
    ("__pos__", int_pos),
    ("__invert__", int_invert),
    ("__abs__", int_abs),
    ("__bool__", int_bool),
    ("__int__", int_pos),
    ("__index__", int_pos),
    ("__float__", int_float),
];

fn construct_int(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    match args {
        [] => Ok(Value::Int(0)),
        [value] => to_int(value),
        [Value::Str(s), base] => {
            let base = base
                .as_int()
                .and_then(|b| u32::try_from(b).ok())
                .filter(|b| (2..=36).contains(b))
                .ok_or_else(|| Exception::value_error("int() base must be >= 2 and <= 36"))?;
            i64::from_str_radix(s.trim(), base)
                .map(Value::Int)
                .map_err(|_| invalid_literal(s, base))
        }
        _ => Err(Exception::type_error(format!(
            "int() takes at most 2 arguments ({} given)",
            args.len()
        ))),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn to_int(value: &Value) -> PyResult<Value> {
    match value {
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(Exception::overflow("cannot convert float infinity or NaN to integer"));
            }
            let t = f.trunc();
            if t < i64::MIN as f64 || t >= i64::MAX as f64 {
                return Err(overflow());
            }
            Ok(Value::Int(t as i64))
        }
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| invalid_literal(s, 10)),
        other => match other.as_int() {
            Some(i) => Ok(Value::Int(i)),
            None => match other.type_of().lookup("__int__") {
                Some(m) => m.call(std::slice::from_ref(other)),
                None => Err(Exception::type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            },
        },
    }
}

fn invalid_literal(s: &str, base: u32) -> Exception {
    Exception::value_error(format!(
        "invalid literal for int() with base {base}: {}",
        crate::value::quote_str(s)
    ))
}

// =============================================================================
// bool
// =============================================================================

macro_rules! bool_logic {
    ($name:ident, $int_fallback:ident, $op:tt) => {
        fn $name(args: &[Value]) -> PyResult<Value> {
            match args {
                [Value::Bool(a), Value::Bool(b)] => Ok(Value::Bool(*a $op *b)),
                _ => $int_fallback(args),
            }
        }
    };
}

bool_logic!(bool_and, int_and, &);
bool_logic!(bool_or, int_or, |);
bool_logic!(bool_xor, int_xor, ^);

fn construct_bool(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    match args {
        [] => Ok(Value::Bool(false)),
        [value] => Ok(Value::Bool(protocol::truthy(value)?)),
        _ => Err(Exception::type_error("bool() takes at most 1 argument")),
    }
}

// =============================================================================
// float
// =============================================================================

macro_rules! float_binary {
    ($forward:ident, $reflected:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $forward(args: &[Value]) -> PyResult<Value> {
            match float_operands(args)? {
                Some(($a, $b)) => $body,
                None => Ok(Value::NotImplemented),
            }
        }

        fn $reflected(args: &[Value]) -> PyResult<Value> {
            match float_operands(args)? {
                Some(($b, $a)) => $body,
                None => Ok(Value::NotImplemented),
            }
        }
    };
}

float_binary!(float_add, float_radd, |a, b| Ok(Value::Float(a + b)));
float_binary!(float_sub, float_rsub, |a, b| Ok(Value::Float(a - b)));
float_binary!(float_mul, float_rmul, |a, b| Ok(Value::Float(a * b)));
float_binary!(float_truediv, float_rtruediv, |a, b| {
    if b == 0.0 {
        Err(Exception::zero_division("float division by zero"))
    } else {
        Ok(Value::Float(a / b))
    }
});
float_binary!(float_floordiv, float_rfloordiv, |a, b| {
    if b == 0.0 {
        Err(Exception::zero_division("float floor division by zero"))
    } else {
        Ok(Value::Float((a / b).floor()))
    }
});
float_binary!(float_mod, float_rmod, |a, b| float_modulo(a, b));
float_binary!(float_pow, float_rpow, |a, b| float_power(a, b));

fn float_modulo(a: f64, b: f64) -> PyResult<Value> {
    if b == 0.0 {
        return Err(Exception::zero_division("float modulo"));
    }
    let r = a % b;
    Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }))
}

fn float_power(a: f64, b: f64) -> PyResult<Value> {
    if a == 0.0 && b < 0.0 {
        return Err(Exception::zero_division(
            "0.0 cannot be raised to a negative power",
        ));
    }
    if a < 0.0 && b.fract() != 0.0 {
        return Err(Exception::value_error(
            "negative number cannot be raised to a fractional power",
        ));
    }
    Ok(Value::Float(a.powf(b)))
}

macro_rules! float_compare {
    ($name:ident, $op:tt) => {
        fn $name(args: &[Value]) -> PyResult<Value> {
            match float_operands(args)? {
                Some((a, b)) => Ok(Value::Bool(a $op b)),
                None => Ok(Value::NotImplemented),
            }
        }
    };
}

float_compare!(float_eq, ==);
float_compare!(float_ne, !=);
float_compare!(float_lt, <);
float_compare!(float_le, <=);
float_compare!(float_gt, >);
float_compare!(float_ge, >=);

fn self_float(args: &[Value]) -> PyResult<f64> {
    let this = receiver(args, "float")?;
    this.as_float().ok_or_else(|| descriptor_error("float", this))
}

fn float_neg(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Float(-self_float(args)?))
}

fn float_pos(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Float(self_float(args)?))
}

fn float_abs(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Float(self_float(args)?.abs()))
}

fn float_bool(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Bool(self_float(args)? != 0.0))
}

fn float_int(args: &[Value]) -> PyResult<Value> {
    to_int(&Value::Float(self_float(args)?))
}

fn float_is_integer(args: &[Value]) -> PyResult<Value> {
    let f = self_float(args)?;
    Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
}

const FLOAT_METHODS: &[(&str, fn(&[Value]) -> PyResult<Value>)] = &[
    ("__add__", float_add),
    ("__radd__", float_radd),
    ("__sub__", float_sub),
    ("__rsub__", float_rsub),
    ("__mul__", float_mul),
    ("__rmul__", float_rmul),
    ("__truediv__", float_truediv),
    ("__rtruediv__", float_rtruediv),
    ("__floordiv__", float_floordiv),
    ("__rfloordiv__", float_rfloordiv),
    ("__mod__", float_mod),
    ("__rmod__", float_rmod),
    ("__pow__", float_pow),
    ("__rpow__", float_rpow),
    ("__eq__", float_eq),
    ("__ne__", float_ne),
    ("__lt__", float_lt),
    ("__le__", float_le),
    ("__gt__", float_gt),
    ("__ge__", float_ge),
    ("__neg__", float_neg),
    ("__pos__", float_pos),
    ("__abs__", float_abs),
    ("__bool__", float_bool),
    ("__int__", float_int),
    ("__float__", float_pos),
    ("is_integer", float_is_integer),
];

fn construct_float(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    match args {
        [] => Ok(Value::Float(0.0)),
        [Value::Str(s)] => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" | "+nan" | "-nan" => Some(f64::NAN),
                other => other.parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                Exception::value_error(format!(
                    "could not convert string to float: {}",
                    crate::value::quote_str(s)
                ))
            })
        }
        [value] => match value.as_float() {
            Some(f) => Ok(Value::Float(f)),
            None => match value.type_of().lookup("__float__") {
                Some(m) => m.call(std::slice::from_ref(value)),
                None => Err(Exception::type_error(format!(
                    "float() argument must be a string or a real number, not '{}'",
                    value.type_name()
                ))),
            },
        },
        _ => Err(Exception::type_error("float expected at most 1 argument")),
    }
}
