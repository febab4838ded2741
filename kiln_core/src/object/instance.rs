//! Instances of user-defined types.

use super::type_obj::TypeRef;
use super::{KeywordArgs, NativeObject};
use crate::exception::{Exception, PyResult};
use crate::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;

/// An object with a per-instance attribute dictionary.
pub struct Instance {
    ty: TypeRef,
    attrs: RwLock<FxHashMap<Arc<str>, Value>>,
}

impl Instance {
    /// Allocate an instance with no attributes.
    #[must_use]
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            attrs: RwLock::new(FxHashMap::default()),
        }
    }

    /// Constructor installed on `object`: allocate, then run `__init__` if defined.
    pub fn construct(ty: &TypeRef, args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
        let instance = Value::Object(Arc::new(Self::new(Arc::clone(ty))));
        match ty.lookup("__init__") {
            Some(init) => {
                let result = init.call_with_keywords(&instance, args, keywords)?;
                if !result.is_none() {
                    return Err(Exception::type_error(format!(
                        "__init__() should return None, not '{}'",
                        result.type_name()
                    )));
                }
            }
            None if !args.is_empty() || !keywords.is_empty() => {
                return Err(Exception::type_error(format!(
                    "{}() takes no arguments",
                    ty.name()
                )));
            }
            None => {}
        }
        Ok(instance)
    }
}

impl NativeObject for Instance {
    fn type_ref(&self) -> TypeRef {
        Arc::clone(&self.ty)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("<{} object>", self.ty.name())
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.attrs.read().get(name).cloned()
    }

    fn set_attr(&self, name: &str, value: Value) -> PyResult<()> {
        self.attrs.write().insert(Arc::from(name), value);
        Ok(())
    }

    fn del_attr(&self, name: &str) -> PyResult<()> {
        match self.attrs.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(Exception::attribute_error(format!(
                "'{}' object has no attribute '{}'",
                self.ty.name(),
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::type_obj::TypeObject;
    use crate::protocol;
    use crate::types::builtin_types;

    #[test]
    fn test_attributes_round_trip() {
        let ty = TypeObject::subclass("Point", &builtin_types().object).unwrap();
        let point = Value::Object(Arc::new(Instance::new(ty)));
        protocol::setattr(&point, "x", Value::Int(3)).unwrap();
        assert_eq!(protocol::getattr(&point, "x").unwrap(), Value::Int(3));
        protocol::delattr(&point, "x").unwrap();
        assert!(protocol::getattr(&point, "x").is_err());
    }

    #[test]
    fn test_construct_without_init_rejects_args() {
        let ty = TypeObject::subclass("Empty", &builtin_types().object).unwrap();
        let err = Instance::construct(&ty, &[Value::Int(1)], &KeywordArgs::default()).unwrap_err();
        assert!(err.is_instance(&builtin_types().type_error));
    }

    #[test]
    fn test_construct_runs_init() {
        fn init(args: &[Value]) -> PyResult<Value> {
            protocol::setattr(&args[0], "value", args[1].clone())?;
            Ok(Value::None)
        }
        let ty = TypeObject::subclass("Box", &builtin_types().object).unwrap();
        ty.define_native("__init__", init);
        let obj = Value::Type(ty).call(&[Value::Int(7)]).unwrap();
        assert_eq!(protocol::getattr(&obj, "value").unwrap(), Value::Int(7));
    }
}
