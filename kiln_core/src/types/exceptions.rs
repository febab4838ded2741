//! Exception type constructors.

use super::BuiltinTypes;
use crate::exception::{Exception, PyResult};
use crate::object::type_obj::TypeRef;
use crate::object::KeywordArgs;
use crate::value::Value;
use std::sync::Arc;

pub(super) fn register(types: &BuiltinTypes) {
    types.base_exception.set_constructor(construct_exception);
    types.type_.set_constructor(construct_type);
}

/// Shared by every exception type, including runtime subclasses.
fn construct_exception(ty: &TypeRef, args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    if let Some(name) = keywords.keys().next() {
        return Err(Exception::type_error(format!(
            "{}() got an unexpected keyword argument '{name}'",
            ty.name()
        )));
    }
    Ok(Value::Exception(Exception::new(Arc::clone(ty), args.to_vec())))
}

/// `type(x)`.
fn construct_type(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    match args {
        [value] => Ok(Value::Type(value.type_of())),
        _ => Err(Exception::type_error("type() takes 1 argument")),
    }
}
