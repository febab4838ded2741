//! Builtin type registry.
//!
//! All builtin types are created once, on first use, and live for the
//! process. Each submodule fills in the method table of the types it owns.

mod exceptions;
pub mod iterator;
mod mapping;
mod numeric;
mod sequence;
mod string;

use crate::object::instance::Instance;
use crate::object::type_obj::{TypeFlags, TypeObject, TypeRef};
use std::sync::LazyLock;

/// Handles to every builtin type.
pub struct BuiltinTypes {
    /// `object`.
    pub object: TypeRef,
    /// `type`.
    pub type_: TypeRef,
    /// `NoneType`.
    pub none: TypeRef,
    /// `NotImplementedType`.
    pub not_implemented: TypeRef,
    /// `int`.
    pub int: TypeRef,
    /// `bool`.
    pub bool: TypeRef,
    /// `float`.
    pub float: TypeRef,
    /// `str`.
    pub str: TypeRef,
    /// `tuple`.
    pub tuple: TypeRef,
    /// `list`.
    pub list: TypeRef,
    /// `dict`.
    pub dict: TypeRef,
    /// `set`.
    pub set: TypeRef,
    /// `slice`.
    pub slice: TypeRef,
    /// `cell`.
    pub cell: TypeRef,
    /// `function`: translated units and dispatchers.
    pub function: TypeRef,
    /// `builtin_function_or_method`.
    pub builtin_function: TypeRef,
    /// `method`: bound methods.
    pub method: TypeRef,
    /// `code`: compiled function constants.
    pub code: TypeRef,
    /// `range`.
    pub range: TypeRef,
    /// `iterator`: sequence and range iterators.
    pub iterator: TypeRef,

    /// `BaseException`.
    pub base_exception: TypeRef,
    /// `Exception`.
    pub exception: TypeRef,
    /// `TypeError`.
    pub type_error: TypeRef,
    /// `ValueError`.
    pub value_error: TypeRef,
    /// `NameError`.
    pub name_error: TypeRef,
    /// `UnboundLocalError`.
    pub unbound_local_error: TypeRef,
    /// `AttributeError`.
    pub attribute_error: TypeRef,
    /// `LookupError`.
    pub lookup_error: TypeRef,
    /// `KeyError`.
    pub key_error: TypeRef,
    /// `IndexError`.
    pub index_error: TypeRef,
    /// `ArithmeticError`.
    pub arithmetic_error: TypeRef,
    /// `ZeroDivisionError`.
    pub zero_division_error: TypeRef,
    /// `OverflowError`.
    pub overflow_error: TypeRef,
    /// `RuntimeError`.
    pub runtime_error: TypeRef,
    /// `NotImplementedError`.
    pub not_implemented_error: TypeRef,
    /// `StopIteration`.
    pub stop_iteration: TypeRef,
    /// `AssertionError`.
    pub assertion_error: TypeRef,
    /// `SystemError`.
    pub system_error: TypeRef,
    /// `GeneratorExit`.
    pub generator_exit: TypeRef,
}

static BUILTIN_TYPES: LazyLock<BuiltinTypes> = LazyLock::new(BuiltinTypes::create);

/// The process-wide builtin types.
#[inline]
#[must_use]
pub fn builtin_types() -> &'static BuiltinTypes {
    &BUILTIN_TYPES
}

impl BuiltinTypes {
    fn create() -> Self {
        let object = TypeObject::root("object");
        let plain = |name: &str, flags: TypeFlags| TypeObject::builtin(name, &object, flags);
        let sealed = TypeFlags::FINAL | TypeFlags::IMMUTABLE;

        let int = plain("int", TypeFlags::IMMUTABLE);
        let bool_ = TypeObject::builtin("bool", &int, sealed);

        let base_exception = plain("BaseException", TypeFlags::EXCEPTION);
        let exc = |name: &str, base: &TypeRef| TypeObject::builtin(name, base, TypeFlags::empty());
        let exception = exc("Exception", &base_exception);
        let name_error = exc("NameError", &exception);
        let lookup_error = exc("LookupError", &exception);
        let arithmetic_error = exc("ArithmeticError", &exception);
        let runtime_error = exc("RuntimeError", &exception);

        let types = Self {
            type_: plain("type", TypeFlags::CALLABLE),
            none: plain("NoneType", sealed),
            not_implemented: plain("NotImplementedType", sealed),
            bool: bool_,
            float: plain("float", TypeFlags::IMMUTABLE),
            str: plain("str", TypeFlags::IMMUTABLE),
            tuple: plain("tuple", TypeFlags::IMMUTABLE),
            list: plain("list", TypeFlags::empty()),
            dict: plain("dict", TypeFlags::empty()),
            set: plain("set", TypeFlags::empty()),
            slice: plain("slice", sealed),
            cell: plain("cell", TypeFlags::FINAL),
            function: plain("function", TypeFlags::CALLABLE | TypeFlags::FINAL),
            builtin_function: plain(
                "builtin_function_or_method",
                TypeFlags::CALLABLE | TypeFlags::FINAL,
            ),
            method: plain("method", TypeFlags::CALLABLE | TypeFlags::FINAL),
            code: plain("code", sealed),
            range: plain("range", sealed),
            iterator: plain("iterator", TypeFlags::ITERATOR | TypeFlags::FINAL),

            type_error: exc("TypeError", &exception),
            value_error: exc("ValueError", &exception),
            unbound_local_error: exc("UnboundLocalError", &name_error),
            attribute_error: exc("AttributeError", &exception),
            key_error: exc("KeyError", &lookup_error),
            index_error: exc("IndexError", &lookup_error),
            zero_division_error: exc("ZeroDivisionError", &arithmetic_error),
            overflow_error: exc("OverflowError", &arithmetic_error),
            not_implemented_error: exc("NotImplementedError", &runtime_error),
            stop_iteration: exc("StopIteration", &exception),
            assertion_error: exc("AssertionError", &exception),
            system_error: exc("SystemError", &exception),
            generator_exit: exc("GeneratorExit", &base_exception),
            name_error,
            lookup_error,
            arithmetic_error,
            runtime_error,
            exception,
            base_exception,
            int,
            object,
        };

        types.object.set_constructor(Instance::construct);
        numeric::register(&types);
        string::register(&types);
        sequence::register(&types);
        mapping::register(&types);
        iterator::register(&types);
        exceptions::register(&types);
        types
    }

    /// Every exception type in the hierarchy, most general first.
    #[must_use]
    pub fn exception_types(&self) -> Vec<&TypeRef> {
        vec![
            &self.base_exception,
            &self.exception,
            &self.type_error,
            &self.value_error,
            &self.name_error,
            &self.unbound_local_error,
            &self.attribute_error,
            &self.lookup_error,
            &self.key_error,
            &self.index_error,
            &self.arithmetic_error,
            &self.zero_division_error,
            &self.overflow_error,
            &self.runtime_error,
            &self.not_implemented_error,
            &self.stop_iteration,
            &self.assertion_error,
            &self.system_error,
            &self.generator_exit,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_shared() {
        let a = builtin_types();
        let b = builtin_types();
        assert_eq!(a.int.id(), b.int.id());
    }

    #[test]
    fn test_exception_types_flagged() {
        for ty in builtin_types().exception_types() {
            assert!(ty.is_exception_type(), "{} should be an exception type", ty.name());
        }
        assert!(!builtin_types().int.is_exception_type());
    }

    #[test]
    fn test_depths() {
        let t = builtin_types();
        assert_eq!(t.object.depth(), 0);
        assert_eq!(t.int.depth(), 1);
        assert_eq!(t.bool.depth(), 2);
        assert_eq!(t.unbound_local_error.depth(), 4);
    }
}
