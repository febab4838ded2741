//! Translated units and the callables instantiated from them.
//!
//! A [`Unit`] is the translation of one `CompiledFunction`: its lowered
//! body, regions and argument spec. It is shared; every `MAKE_FUNCTION`
//! that creates a function from the same code reuses it and only supplies
//! runtime defaults, closure cells and globals, which together make a
//! [`TranslatedFunction`].

use crate::config::TranslatorConfig;
use crate::dispatch::{ArgumentSpec, FunctionSignature};
use crate::exec::{Exit, Program, Start};
use crate::generator::{Generator, GeneratorPlan};
use crate::lower::frame::Frame;
use crate::regions::RegionMap;
use crate::translate::Translator;
use kiln_bytecode::{CompiledFunction, MethodKind};
use kiln_core::object::cell::Cell;
use kiln_core::object::Callable;
use kiln_core::value::DictRef;
use kiln_core::{Exception, KeywordArgs, PyResult, Value};
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Executable body of a unit.
#[derive(Debug)]
pub enum Body {
    /// Runs to completion on every call.
    Plain(Program),
    /// Each call creates a generator over these segments.
    Generator(Arc<GeneratorPlan>),
}

/// One translated function.
#[derive(Debug)]
pub struct Unit {
    pub(crate) name: Arc<str>,
    pub(crate) code: Arc<CompiledFunction>,
    pub(crate) spec: ArgumentSpec,
    pub(crate) regions: Arc<RegionMap>,
    pub(crate) body: Body,
}

impl Unit {
    /// Unique unit name.
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Code the unit was translated from.
    #[must_use]
    pub fn code(&self) -> &Arc<CompiledFunction> {
        &self.code
    }

    /// Parameters with compile-time defaults.
    #[must_use]
    pub fn spec(&self) -> &ArgumentSpec {
        &self.spec
    }

    /// Protected regions of the body.
    #[must_use]
    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// The lowered body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Whether calling the unit creates a generator.
    #[must_use]
    pub fn is_generator(&self) -> bool {
        matches!(self.body, Body::Generator(_))
    }
}

/// Units for the code constants of a function, translated ahead of its body.
#[derive(Clone, Default)]
pub(crate) struct NestedUnits(Arc<Vec<(Arc<CompiledFunction>, Arc<Unit>)>>);

impl NestedUnits {
    pub(crate) fn new(units: Vec<(Arc<CompiledFunction>, Arc<Unit>)>) -> Self {
        Self(Arc::new(units))
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Unit for `code`, translating it now if it was not a known constant.
    pub(crate) fn resolve(
        &self,
        code: &Arc<CompiledFunction>,
        config: &TranslatorConfig,
    ) -> PyResult<Arc<Unit>> {
        if let Some((_, unit)) = self.0.iter().find(|(known, _)| Arc::ptr_eq(known, code)) {
            return Ok(Arc::clone(unit));
        }
        Translator::new(config.clone())
            .translate_unit(Arc::clone(code))
            .map_err(|err| Exception::system_error(err.to_string()))
    }
}

/// Positionals as a unit of `kind` sees them, receiver included.
pub(crate) fn with_receiver<'a>(
    kind: MethodKind,
    receiver: Option<&Value>,
    positional: &'a [Value],
) -> Cow<'a, [Value]> {
    let bound = match (kind, receiver) {
        (MethodKind::Virtual, Some(receiver)) => receiver.clone(),
        (MethodKind::Class, Some(Value::Type(ty))) => Value::Type(ty.clone()),
        (MethodKind::Class, Some(receiver)) => Value::Type(receiver.type_of()),
        _ => return Cow::Borrowed(positional),
    };
    let mut args = Vec::with_capacity(positional.len() + 1);
    args.push(bound);
    args.extend_from_slice(positional);
    Cow::Owned(args)
}

/// A callable instance of a [`Unit`].
pub struct TranslatedFunction {
    unit: Arc<Unit>,
    spec: ArgumentSpec,
    closure: Vec<Arc<Cell>>,
    globals: DictRef,
}

impl TranslatedFunction {
    /// A top-level function using the closure and globals stored on its code.
    #[must_use]
    pub fn new(unit: Arc<Unit>) -> Self {
        Self {
            spec: unit.spec.clone(),
            closure: unit.code.closure.to_vec(),
            globals: Arc::clone(&unit.code.globals),
            unit,
        }
    }

    /// A function created at run time with its own defaults, cells and globals.
    pub fn instantiate(
        unit: Arc<Unit>,
        defaults: Option<Vec<Value>>,
        kw_defaults: Option<KeywordArgs>,
        closure: Vec<Arc<Cell>>,
        globals: DictRef,
    ) -> PyResult<Self> {
        let expected = unit.code.freevars.len();
        if closure.len() != expected {
            return Err(Exception::system_error(format!(
                "{} expects {expected} closure cells, got {}",
                unit.code.qualname,
                closure.len()
            )));
        }
        let spec = if defaults.is_none() && kw_defaults.is_none() {
            unit.spec.clone()
        } else {
            unit.spec
                .with_defaults(defaults.as_deref(), kw_defaults.as_ref())
        };
        Ok(Self {
            unit,
            spec,
            closure,
            globals,
        })
    }

    /// The shared unit.
    #[must_use]
    pub fn unit(&self) -> &Arc<Unit> {
        &self.unit
    }

    /// Parameters with this instance's defaults.
    #[must_use]
    pub fn spec(&self) -> &ArgumentSpec {
        &self.spec
    }

    /// Typed signature, for overload sets.
    #[must_use]
    pub fn signature(&self) -> FunctionSignature {
        let code = &self.unit.code;
        let mut signature =
            FunctionSignature::new(self.spec.clone(), code.return_type(), code.method_kind);
        signature.name = Arc::clone(&code.name);
        signature
    }

    /// Call with positional arguments only.
    pub fn call(&self, args: &[Value]) -> PyResult<Value> {
        self.invoke(args, &KeywordArgs::default(), None)
    }

    /// Call with positional and keyword arguments.
    pub fn call_with_keywords(&self, args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
        self.invoke(args, keywords, None)
    }

    /// Activation for bound argument slots.
    fn frame(&self, slots: Vec<Value>) -> Frame {
        let code = &self.unit.code;
        let mut locals = vec![None; code.varnames.len().max(slots.len())];
        for (local, value) in locals.iter_mut().zip(&slots) {
            *local = Some(value.clone());
        }
        let params = code.param_names();
        let mut cells: Vec<Arc<Cell>> = code
            .cellvars
            .iter()
            .map(|name| {
                params
                    .iter()
                    .position(|p| p == name)
                    .and_then(|slot| slots.get(slot).cloned())
                    .map_or_else(Cell::empty, Cell::with_value)
            })
            .collect();
        cells.extend(self.closure.iter().cloned());
        Frame::new(locals, cells, Arc::clone(&self.globals), self.unit.regions.len())
    }
}

impl Callable for TranslatedFunction {
    fn name(&self) -> &str {
        &self.unit.code.name
    }

    fn invoke(
        &self,
        positional: &[Value],
        keywords: &KeywordArgs,
        receiver: Option<&Value>,
    ) -> PyResult<Value> {
        let args = with_receiver(self.unit.code.method_kind, receiver, positional);
        let slots = self.spec.bind(&args, keywords)?;
        let mut frame = self.frame(slots);
        match &self.unit.body {
            Body::Plain(program) => match program.run(&mut frame, Start::At(0))? {
                Exit::Return(value) => Ok(value),
                Exit::Yield { at, .. } => Err(Exception::system_error(format!(
                    "{} suspended at instruction {at} outside a generator",
                    self.unit.name
                ))),
            },
            Body::Generator(plan) => Ok(Value::Object(Arc::new(Generator::new(
                Arc::clone(&self.unit.name),
                Arc::clone(plan),
                frame,
            )))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for TranslatedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatedFunction")
            .field("unit", &self.unit.name)
            .field("spec", &self.spec.to_string())
            .field("closure", &self.closure.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bytecode::FunctionBuilder;
    use kiln_core::protocol::BinaryOp;

    fn translate(builder: FunctionBuilder) -> TranslatedFunction {
        let code = builder.finish().unwrap();
        Translator::default().translate(code).unwrap()
    }

    #[test]
    fn test_virtual_receiver_binds_first_parameter() {
        let mut b = FunctionBuilder::new("first");
        b.positional(&["self", "x"]).method_kind(MethodKind::Virtual);
        b.load_fast("self").return_value();
        let f = translate(b);
        let result = f
            .invoke(&[Value::Int(2)], &KeywordArgs::default(), Some(&Value::from("me")))
            .unwrap();
        assert_eq!(result, Value::from("me"));
    }

    #[test]
    fn test_class_receiver_binds_its_type() {
        let mut b = FunctionBuilder::new("kind");
        b.positional(&["cls"]).method_kind(MethodKind::Class);
        b.load_fast("cls").return_value();
        let f = translate(b);
        let result = f
            .invoke(&[], &KeywordArgs::default(), Some(&Value::Int(1)))
            .unwrap();
        assert!(matches!(&result, Value::Type(ty) if ty.name() == "int"));
    }

    #[test]
    fn test_static_ignores_receiver() {
        let mut b = FunctionBuilder::new("double");
        b.positional(&["x"]);
        b.load_fast("x").load_fast("x").binary(BinaryOp::Add).return_value();
        let f = translate(b);
        let result = f
            .invoke(&[Value::Int(4)], &KeywordArgs::default(), Some(&Value::None))
            .unwrap();
        assert_eq!(result, Value::Int(8));
    }

    #[test]
    fn test_closure_arity_is_checked() {
        let mut b = FunctionBuilder::new("inner");
        b.freevar("n").load_deref("n").return_value();
        let code = Arc::new(b.finish().unwrap());
        let unit = Translator::default().translate_unit(code).unwrap();
        let globals = Arc::clone(&unit.code.globals);
        let err = TranslatedFunction::instantiate(unit, None, None, Vec::new(), globals).unwrap_err();
        assert_eq!(err.type_name(), "SystemError");
    }

    #[test]
    fn test_runtime_defaults_override_compiled_ones() {
        let mut b = FunctionBuilder::new("pick");
        b.positional(&["a", "b"]).defaults(vec![Value::Int(1)]);
        b.load_fast("b").return_value();
        let code = Arc::new(b.finish().unwrap());
        let unit = Translator::default().translate_unit(code).unwrap();
        let globals = Arc::clone(&unit.code.globals);
        let f = TranslatedFunction::instantiate(unit, Some(vec![Value::Int(9)]), None, Vec::new(), globals)
            .unwrap();
        assert_eq!(f.call(&[Value::Int(0)]).unwrap(), Value::Int(9));
    }
}
