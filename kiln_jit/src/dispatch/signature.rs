//! Function signatures.

use super::ArgumentSpec;
use kiln_bytecode::{CompiledFunction, MethodKind};
use kiln_core::{KilnError, KilnResult, TypeRef};
use std::fmt;
use std::sync::Arc;

/// Replace type parameters in the annotations of `code` with their bounds.
///
/// Returns `code` untouched when no annotation is a type parameter.
pub fn resolve_type_parameters(code: Arc<CompiledFunction>) -> KilnResult<Arc<CompiledFunction>> {
    if !code.annotations.values().any(|ty| ty.is_type_parameter()) {
        return Ok(code);
    }
    let mut resolved = (*code).clone();
    for ty in resolved.annotations.values_mut() {
        while ty.is_type_parameter() {
            let bound = ty.base().cloned().ok_or_else(|| KilnError::UnresolvedTypeParameter {
                function: code.qualname.to_string(),
                name: ty.name().to_string(),
            })?;
            *ty = bound;
        }
    }
    Ok(Arc::new(resolved))
}

/// Typed signature of one translated unit.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    /// External name shared by overloads.
    pub name: Arc<str>,
    /// Parameters, defaults and variadic captures.
    pub spec: ArgumentSpec,
    /// Declared return type, `object` when unannotated.
    pub return_type: TypeRef,
    /// Receiver binding.
    pub method_kind: MethodKind,
}

impl FunctionSignature {
    /// The signature a compiled function declares.
    #[must_use]
    pub fn from_code(code: &CompiledFunction) -> Self {
        Self {
            name: Arc::clone(&code.name),
            spec: ArgumentSpec::from_code(code),
            return_type: code.return_type(),
            method_kind: code.method_kind,
        }
    }

    /// A signature over an explicit spec.
    #[must_use]
    pub fn new(spec: ArgumentSpec, return_type: TypeRef, method_kind: MethodKind) -> Self {
        Self {
            name: Arc::from(spec.function()),
            spec,
            return_type,
            method_kind,
        }
    }

    /// Declared types of the positional parameters.
    #[must_use]
    pub fn parameter_types(&self) -> Vec<TypeRef> {
        self.spec.positional_types()
    }

    /// Slot of the `*args` capture.
    #[must_use]
    pub fn varargs_slot(&self) -> Option<usize> {
        self.spec.varargs_name().map(|_| self.spec.params().len())
    }

    /// Slot of the `**kwargs` capture.
    #[must_use]
    pub fn varkw_slot(&self) -> Option<usize> {
        self.spec
            .varkw_name()
            .map(|_| self.spec.params().len() + usize::from(self.spec.varargs_name().is_some()))
    }

    /// Whether either variadic capture is present.
    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.spec.is_variadic()
    }

    /// Positional arities accepted without surplus capture.
    #[must_use]
    pub fn arities(&self) -> std::ops::RangeInclusive<usize> {
        self.spec.required_positional()..=self.spec.positional_count()
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.spec, self.return_type.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bytecode::FunctionBuilder;
    use kiln_core::types::builtin_types;
    use kiln_core::TypeObject;

    #[test]
    fn test_bounded_type_parameter_resolves() {
        let t = TypeObject::type_parameter("T", Some(&builtin_types().int));
        let mut builder = FunctionBuilder::new("first");
        builder.positional(&["x"]).annotate("x", t);
        builder.load_fast("x").return_value();
        let code = resolve_type_parameters(Arc::new(builder.finish().unwrap())).unwrap();
        assert_eq!(code.param_type("x").name(), "int");
    }

    #[test]
    fn test_unbound_type_parameter_is_rejected() {
        let mut builder = FunctionBuilder::new("first");
        builder
            .positional(&["x"])
            .annotate("x", TypeObject::type_parameter("T", None));
        builder.load_fast("x").return_value();
        let err = resolve_type_parameters(Arc::new(builder.finish().unwrap())).unwrap_err();
        assert!(matches!(err, KilnError::UnresolvedTypeParameter { ref name, .. } if name == "T"));
    }

    #[test]
    fn test_signature_from_code() {
        let mut builder = FunctionBuilder::new("area");
        builder
            .positional(&["w", "h"])
            .defaults(vec![kiln_core::Value::Int(1)])
            .annotate("w", builtin_types().int.clone())
            .annotate("return", builtin_types().int.clone())
            .varargs("rest")
            .return_const(kiln_core::Value::None);
        let code = builder.finish().unwrap();
        let sig = FunctionSignature::from_code(&code);
        assert_eq!(&*sig.name, "area");
        assert_eq!(sig.arities(), 1..=2);
        assert_eq!(sig.varargs_slot(), Some(2));
        assert_eq!(sig.varkw_slot(), None);
        assert_eq!(sig.parameter_types()[0].name(), "int");
        assert_eq!(sig.to_string(), "area(w: int, h = 1, *rest) -> int");
    }
}
