//! Canonical parameter descriptions and argument binding.
//!
//! An [`ArgumentSpec`] lists the named parameters of a unit in slot order
//! (positional-capable first, keyword-only after) plus the optional
//! variadic captures. [`ArgumentSpec::bind`] turns a call's positional and
//! keyword arguments into one value per slot, in the same order the unit's
//! local slots expect.

use kiln_bytecode::CompiledFunction;
use kiln_core::collections::Dict;
use kiln_core::types::builtin_types;
use kiln_core::{Exception, KeywordArgs, PyResult, TypeRef, Value};
use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::sync::Arc;

/// How a parameter may be passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Only by position.
    PositionalOnly,
    /// By position or by name.
    PositionalOrKeyword,
    /// Only by name.
    KeywordOnly,
}

impl ParamKind {
    /// Whether a positional argument can fill this parameter.
    #[inline]
    #[must_use]
    pub fn allows_positional(self) -> bool {
        !matches!(self, Self::KeywordOnly)
    }

    /// Whether a keyword argument can fill this parameter.
    #[inline]
    #[must_use]
    pub fn allows_keyword(self) -> bool {
        !matches!(self, Self::PositionalOnly)
    }
}

/// One named parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Parameter name.
    pub name: Arc<str>,
    /// How it may be passed.
    pub kind: ParamKind,
    /// Declared type, `object` when unannotated.
    pub ty: TypeRef,
    /// Default value, if any.
    pub default: Option<Value>,
}

impl Parameter {
    fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            ty: builtin_types().object.clone(),
            default: None,
        }
    }

    /// A positional-only parameter.
    #[must_use]
    pub fn positional_only(name: &str) -> Self {
        Self::new(name, ParamKind::PositionalOnly)
    }

    /// A positional-or-keyword parameter.
    #[must_use]
    pub fn positional(name: &str) -> Self {
        Self::new(name, ParamKind::PositionalOrKeyword)
    }

    /// A keyword-only parameter.
    #[must_use]
    pub fn keyword_only(name: &str) -> Self {
        Self::new(name, ParamKind::KeywordOnly)
    }

    /// Declare the parameter's type.
    #[must_use]
    pub fn typed(mut self, ty: &TypeRef) -> Self {
        self.ty = ty.clone();
        self
    }

    /// Give the parameter a default.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Parameter description of a callable, used for binding and dispatch.
#[derive(Debug, Clone)]
pub struct ArgumentSpec {
    function: Arc<str>,
    params: Vec<Parameter>,
    positional: usize,
    posonly: usize,
    varargs: Option<Arc<str>>,
    varkw: Option<Arc<str>>,
}

impl ArgumentSpec {
    /// An empty spec for a function named `function`.
    #[must_use]
    pub fn new(function: &str) -> Self {
        Self {
            function: Arc::from(function),
            params: Vec::new(),
            positional: 0,
            posonly: 0,
            varargs: None,
            varkw: None,
        }
    }

    /// Add a parameter, keeping positional-only, positional-or-keyword and
    /// keyword-only parameters grouped in that order.
    #[must_use]
    pub fn param(mut self, param: Parameter) -> Self {
        match param.kind {
            ParamKind::PositionalOnly => {
                self.params.insert(self.posonly, param);
                self.posonly += 1;
                self.positional += 1;
            }
            ParamKind::PositionalOrKeyword => {
                self.params.insert(self.positional, param);
                self.positional += 1;
            }
            ParamKind::KeywordOnly => self.params.push(param),
        }
        self
    }

    /// Capture surplus positionals under `name`.
    #[must_use]
    pub fn varargs(mut self, name: &str) -> Self {
        self.varargs = Some(Arc::from(name));
        self
    }

    /// Capture unknown keywords under `name`.
    #[must_use]
    pub fn varkw(mut self, name: &str) -> Self {
        self.varkw = Some(Arc::from(name));
        self
    }

    /// The spec a compiled function declares, with its compile-time defaults.
    #[must_use]
    pub fn from_code(code: &CompiledFunction) -> Self {
        let posonly = usize::try_from(code.posonly_count).unwrap_or(usize::MAX);
        let positional = usize::try_from(code.arg_count).unwrap_or(usize::MAX);
        let kwonly = usize::try_from(code.kwonly_count).unwrap_or(usize::MAX);
        let names = code.param_names();

        let mut spec = Self::new(&code.name);
        for (index, name) in names.iter().take(positional + kwonly).enumerate() {
            let kind = if index < posonly {
                ParamKind::PositionalOnly
            } else if index < positional {
                ParamKind::PositionalOrKeyword
            } else {
                ParamKind::KeywordOnly
            };
            spec = spec.param(Parameter::new(name, kind).typed(&code.param_type(name)));
        }
        if let Some(name) = code.varargs_slot().and_then(|slot| names.get(slot)) {
            spec.varargs = Some(Arc::clone(name));
        }
        if let Some(name) = code.varkw_slot().and_then(|slot| names.get(slot)) {
            spec.varkw = Some(Arc::clone(name));
        }
        spec.with_defaults(Some(&code.defaults[..]), Some(&code.kw_defaults))
    }

    /// A copy with replaced defaults.
    ///
    /// Positional defaults align with the trailing positional parameters;
    /// surplus leading defaults are ignored. `None` leaves that kind of
    /// default unchanged.
    #[must_use]
    pub fn with_defaults(&self, defaults: Option<&[Value]>, kw_defaults: Option<&KeywordArgs>) -> Self {
        let mut spec = self.clone();
        if let Some(defaults) = defaults {
            let positional = &mut spec.params[..spec.positional];
            for param in positional.iter_mut() {
                param.default = None;
            }
            for (param, value) in positional.iter_mut().rev().zip(defaults.iter().rev()) {
                param.default = Some(value.clone());
            }
        }
        if let Some(kw_defaults) = kw_defaults {
            let positional = spec.positional;
            for param in &mut spec.params[positional..] {
                param.default = kw_defaults.get(&param.name).cloned();
            }
        }
        spec
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Function name used in error messages.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Named parameters in slot order.
    #[must_use]
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Number of positional-capable parameters.
    #[must_use]
    pub fn positional_count(&self) -> usize {
        self.positional
    }

    /// Number of positional-only parameters.
    #[must_use]
    pub fn posonly_count(&self) -> usize {
        self.posonly
    }

    /// Number of keyword-only parameters.
    #[must_use]
    pub fn kwonly_count(&self) -> usize {
        self.params.len() - self.positional
    }

    /// Positional parameters without a default.
    #[must_use]
    pub fn required_positional(&self) -> usize {
        self.params[..self.positional]
            .iter()
            .filter(|p| p.is_required())
            .count()
    }

    /// Name of the surplus-positional capture.
    #[must_use]
    pub fn varargs_name(&self) -> Option<&str> {
        self.varargs.as_deref()
    }

    /// Name of the unknown-keyword capture.
    #[must_use]
    pub fn varkw_name(&self) -> Option<&str> {
        self.varkw.as_deref()
    }

    /// Whether either variadic capture is present.
    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.varargs.is_some() || self.varkw.is_some()
    }

    /// Number of slots [`bind`](Self::bind) fills.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.params.len() + usize::from(self.varargs.is_some()) + usize::from(self.varkw.is_some())
    }

    /// Whether `count` positional arguments alone can satisfy the positionals.
    #[must_use]
    pub fn accepts_positional(&self, count: usize) -> bool {
        count >= self.required_positional() && (count <= self.positional || self.varargs.is_some())
    }

    /// Declared types of the positional parameters.
    #[must_use]
    pub fn positional_types(&self) -> Vec<TypeRef> {
        self.params[..self.positional]
            .iter()
            .map(|p| p.ty.clone())
            .collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| &*p.name == name)
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Bind a call's arguments to slots.
    ///
    /// The result holds one value per named parameter, then the `*args`
    /// tuple and the `**kwargs` dict when those captures exist.
    pub fn bind(&self, positional: &[Value], keywords: &KeywordArgs) -> PyResult<Vec<Value>> {
        let mut slots: SmallVec<[Option<Value>; 8]> = smallvec![None; self.params.len()];

        // Phase 1: positionals fill positional-capable slots left to right.
        if positional.len() > self.positional && self.varargs.is_none() {
            return Err(self.too_many_positional(positional.len()));
        }
        let bound = positional.len().min(self.positional);
        for (slot, value) in slots.iter_mut().zip(&positional[..bound]) {
            *slot = Some(value.clone());
        }

        // Phase 2: keywords fill the remaining named slots.
        let mut extra_keywords = self.varkw.as_ref().map(|_| Dict::new());
        let mut posonly_by_keyword: SmallVec<[&str; 2]> = SmallVec::new();
        for (name, value) in keywords {
            match self.index_of(name) {
                Some(i) if self.params[i].kind.allows_keyword() => {
                    if slots[i].is_some() {
                        return Err(Exception::type_error(format!(
                            "{}() got multiple values for argument '{name}'",
                            self.function
                        )));
                    }
                    slots[i] = Some(value.clone());
                }
                found => match extra_keywords.as_mut() {
                    Some(extra) => extra.insert(Value::Str(Arc::clone(name)), value.clone())?,
                    None if found.is_some() => posonly_by_keyword.push(name),
                    None => {
                        return Err(Exception::type_error(format!(
                            "{}() got an unexpected keyword argument '{name}'",
                            self.function
                        )))
                    }
                },
            }
        }
        if !posonly_by_keyword.is_empty() {
            return Err(Exception::type_error(format!(
                "{}() got some positional-only arguments passed as keyword arguments: {}",
                self.function,
                quoted(&posonly_by_keyword)
            )));
        }

        // Phase 3: defaults for whatever is still unbound.
        let mut missing_positional: SmallVec<[&str; 4]> = SmallVec::new();
        let mut missing_kwonly: SmallVec<[&str; 4]> = SmallVec::new();
        for (slot, param) in slots.iter_mut().zip(&self.params) {
            if slot.is_some() {
                continue;
            }
            match (&param.default, param.kind) {
                (Some(default), _) => *slot = Some(default.clone()),
                (None, ParamKind::KeywordOnly) => missing_kwonly.push(&param.name),
                (None, _) => missing_positional.push(&param.name),
            }
        }
        if !missing_positional.is_empty() {
            return Err(self.missing("positional", &missing_positional));
        }
        if !missing_kwonly.is_empty() {
            return Err(self.missing("keyword-only", &missing_kwonly));
        }

        // Phase 4: declared types, then the variadic captures.
        let mut out = Vec::with_capacity(self.slot_count());
        for (slot, param) in slots.into_iter().zip(&self.params) {
            let value = slot.ok_or_else(|| {
                Exception::system_error(format!("{}(): slot '{}' left unbound", self.function, param.name))
            })?;
            self.check_type(param, &value)?;
            out.push(value);
        }
        if self.varargs.is_some() {
            out.push(Value::tuple(positional[bound..].to_vec()));
        }
        if let Some(extra) = extra_keywords {
            out.push(Value::dict(extra));
        }
        Ok(out)
    }

    fn check_type(&self, param: &Parameter, value: &Value) -> PyResult<()> {
        let defaulted_none = value.is_none() && param.default.as_ref().is_some_and(Value::is_none);
        if defaulted_none || value.is_instance(&param.ty) {
            return Ok(());
        }
        Err(Exception::type_error(format!(
            "{}'s argument '{name}' has incorrect type: '{name}' must be a {expected} (got {actual} instead)",
            self.function,
            name = param.name,
            expected = param.ty.name(),
            actual = value.type_name(),
        )))
    }

    fn too_many_positional(&self, given: usize) -> Exception {
        Exception::type_error(format!(
            "{}() takes {} positional argument{} but {given} {} given",
            self.function,
            self.positional,
            if self.positional == 1 { "" } else { "s" },
            if given == 1 { "was" } else { "were" },
        ))
    }

    fn missing(&self, kind: &str, names: &[&str]) -> Exception {
        Exception::type_error(format!(
            "{}() missing {} required {kind} argument{}: {}",
            self.function,
            names.len(),
            if names.len() == 1 { "" } else { "s" },
            quoted(names),
        ))
    }
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ArgumentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let object = &builtin_types().object;
        let mut parts: Vec<String> = Vec::with_capacity(self.slot_count() + 2);
        for (index, param) in self.params.iter().enumerate() {
            if index == self.positional && self.varargs.is_none() {
                parts.push("*".to_string());
            }
            if index == self.positional {
                if let Some(varargs) = &self.varargs {
                    parts.push(format!("*{varargs}"));
                }
            }
            let mut part = param.name.to_string();
            if !Arc::ptr_eq(&param.ty, object) {
                part.push_str(": ");
                part.push_str(param.ty.name());
            }
            if let Some(default) = &param.default {
                part.push_str(" = ");
                part.push_str(&default.repr());
            }
            parts.push(part);
            if index + 1 == self.posonly {
                parts.push("/".to_string());
            }
        }
        if self.params.len() == self.positional {
            if let Some(varargs) = &self.varargs {
                parts.push(format!("*{varargs}"));
            }
        }
        if let Some(varkw) = &self.varkw {
            parts.push(format!("**{varkw}"));
        }
        write!(f, "{}({})", self.function, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz() -> ArgumentSpec {
        ArgumentSpec::new("f")
            .param(Parameter::positional("x"))
            .param(Parameter::positional("y"))
            .param(Parameter::positional("z").with_default(Value::Int(5)))
    }

    fn kw(pairs: &[(&str, Value)]) -> KeywordArgs {
        pairs
            .iter()
            .map(|(name, value)| (Arc::from(*name), value.clone()))
            .collect()
    }

    #[test]
    fn test_default_fills_trailing_slot() {
        let bound = xyz().bind(&[Value::Int(1), Value::Int(2)], &KeywordArgs::default()).unwrap();
        assert_eq!(bound, vec![Value::Int(1), Value::Int(2), Value::Int(5)]);
    }

    #[test]
    fn test_keyword_fills_named_slot() {
        let bound = xyz()
            .bind(&[Value::Int(1)], &kw(&[("z", Value::Int(3)), ("y", Value::Int(2))]))
            .unwrap();
        assert_eq!(bound, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_unknown_keyword() {
        let err = xyz()
            .bind(&[Value::Int(1), Value::Int(2)], &kw(&[("w", Value::Int(9))]))
            .unwrap_err();
        assert_eq!(err.type_name(), "TypeError");
        assert_eq!(err.message(), "f() got an unexpected keyword argument 'w'");
    }

    #[test]
    fn test_too_many_positionals() {
        let spec = ArgumentSpec::new("g")
            .param(Parameter::positional("a"))
            .param(Parameter::positional("b"));
        let err = spec
            .bind(&[Value::Int(1), Value::Int(2), Value::Int(3)], &KeywordArgs::default())
            .unwrap_err();
        assert_eq!(err.message(), "g() takes 2 positional arguments but 3 were given");
    }

    #[test]
    fn test_missing_arguments_are_listed() {
        let err = xyz().bind(&[], &KeywordArgs::default()).unwrap_err();
        assert_eq!(err.message(), "f() missing 2 required positional arguments: 'x', 'y'");

        let spec = ArgumentSpec::new("h").param(Parameter::keyword_only("key"));
        let err = spec.bind(&[], &KeywordArgs::default()).unwrap_err();
        assert_eq!(err.message(), "h() missing 1 required keyword-only argument: 'key'");
    }

    #[test]
    fn test_multiple_values() {
        let err = xyz()
            .bind(&[Value::Int(1), Value::Int(2)], &kw(&[("x", Value::Int(0))]))
            .unwrap_err();
        assert_eq!(err.message(), "f() got multiple values for argument 'x'");
    }

    #[test]
    fn test_positional_only_by_keyword() {
        let spec = ArgumentSpec::new("p")
            .param(Parameter::positional("b").with_default(Value::None))
            .param(Parameter::positional_only("a"));
        assert_eq!(&*spec.params()[0].name, "a");
        let err = spec.bind(&[], &kw(&[("a", Value::Int(1))])).unwrap_err();
        assert_eq!(
            err.message(),
            "p() got some positional-only arguments passed as keyword arguments: 'a'"
        );

        let spec = spec.varkw("rest");
        let bound = spec.bind(&[Value::Int(0)], &kw(&[("a", Value::Int(1))])).unwrap();
        let Value::Dict(rest) = &bound[2] else {
            panic!("expected the keyword capture");
        };
        assert_eq!(rest.read().get_str("a"), Some(Value::Int(1)));
    }

    #[test]
    fn test_variadic_captures() {
        let spec = ArgumentSpec::new("v")
            .param(Parameter::positional("a"))
            .param(Parameter::keyword_only("k").with_default(Value::Int(0)))
            .varargs("args")
            .varkw("kwargs");
        let bound = spec
            .bind(
                &[Value::Int(1), Value::Int(2), Value::Int(3)],
                &kw(&[("other", Value::from("x"))]),
            )
            .unwrap();
        assert_eq!(bound.len(), 4);
        assert_eq!(bound[1], Value::Int(0));
        assert_eq!(bound[2], Value::tuple(vec![Value::Int(2), Value::Int(3)]));
        let Value::Dict(extra) = &bound[3] else {
            panic!("expected a dict");
        };
        assert_eq!(extra.read().get_str("other"), Some(Value::from("x")));
    }

    #[test]
    fn test_declared_type_is_checked() {
        let spec = ArgumentSpec::new("t")
            .param(Parameter::positional("n").typed(&builtin_types().int))
            .param(
                Parameter::positional("s")
                    .typed(&builtin_types().str)
                    .with_default(Value::None),
            );
        assert!(spec.bind(&[Value::Int(1)], &KeywordArgs::default()).is_ok());
        let err = spec.bind(&[Value::from("x")], &KeywordArgs::default()).unwrap_err();
        assert_eq!(
            err.message(),
            "t's argument 'n' has incorrect type: 'n' must be a int (got str instead)"
        );
    }

    #[test]
    fn test_runtime_defaults_align_right() {
        let spec = xyz().with_defaults(Some(&[Value::Int(7), Value::Int(8)]), None);
        assert!(spec.params()[0].default.is_none());
        assert_eq!(spec.params()[1].default, Some(Value::Int(7)));
        assert_eq!(spec.params()[2].default, Some(Value::Int(8)));
        assert_eq!(spec.required_positional(), 1);
        assert!(spec.accepts_positional(1));
        assert!(!spec.accepts_positional(4));
    }

    #[test]
    fn test_display() {
        let spec = ArgumentSpec::new("d")
            .param(Parameter::positional_only("a").typed(&builtin_types().int))
            .param(Parameter::positional("b").with_default(Value::Int(1)))
            .param(Parameter::keyword_only("c"))
            .varkw("kw");
        assert_eq!(spec.to_string(), "d(a: int, /, b = 1, *, c, **kw)");
    }
}
