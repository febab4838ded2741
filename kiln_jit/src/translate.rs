//! Translation entry point.
//!
//! ```text
//! CompiledFunction ─▶ type parameters ─▶ regions ─▶ flow graph ─▶ nested units
//!                                                                      │
//!                     Unit ◀─ lowering, or generator segments ◀────────┘
//! ```

use crate::config::TranslatorConfig;
use crate::dispatch::{resolve_type_parameters, ArgumentSpec, OverloadDispatcher, OverloadSet};
use crate::exec::Program;
use crate::flow::{initial_state, FlowGraph};
use crate::function::{Body, NestedUnits, TranslatedFunction, Unit};
use crate::generator::GeneratorPlan;
use crate::lower::{lower_steps, LowerContext};
use crate::naming::unique_name;
use crate::regions::{self, RegionMap};
use kiln_bytecode::{CodeConstant, CompiledFunction};
use kiln_core::{KilnResult, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Counters for one translation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationStats {
    /// Instructions in the input.
    pub instructions: usize,
    /// Steps lowered, summed over generator segments.
    pub lowered_steps: usize,
    /// Resolved exception regions.
    pub regions: usize,
    /// Worklist visits of the flow solver.
    pub solver_visits: usize,
    /// Generator segments, `0` for plain bodies.
    pub segments: usize,
    /// Nested code constants translated ahead of the body.
    pub nested: usize,
    /// Wall time spent, in nanoseconds.
    pub elapsed_ns: u64,
}

/// Translates compiled functions into callable units.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    config: TranslatorConfig,
}

impl Translator {
    /// A translator with `config`.
    #[must_use]
    pub fn new(config: TranslatorConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Translate `code` into a top-level function.
    pub fn translate(&self, code: CompiledFunction) -> KilnResult<TranslatedFunction> {
        self.translate_unit(Arc::new(code)).map(TranslatedFunction::new)
    }

    /// Translate `code` and report what the translation did.
    pub fn translate_with_stats(
        &self,
        code: CompiledFunction,
    ) -> KilnResult<(TranslatedFunction, TranslationStats)> {
        let started = Instant::now();
        let (unit, mut stats) = self.build(Arc::new(code))?;
        stats.elapsed_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Ok((TranslatedFunction::new(unit), stats))
    }

    /// Translate `code` into a shareable unit.
    pub fn translate_unit(&self, code: Arc<CompiledFunction>) -> KilnResult<Arc<Unit>> {
        self.build(code).map(|(unit, _)| unit)
    }

    /// Translate every candidate and wrap them in one dispatcher named `name`.
    pub fn translate_overloads(
        &self,
        name: &str,
        candidates: impl IntoIterator<Item = CompiledFunction>,
    ) -> KilnResult<OverloadDispatcher> {
        let mut set = OverloadSet::new(name);
        for code in candidates {
            let function = self.translate(code)?;
            set.push(function.signature(), Arc::new(function));
        }
        OverloadDispatcher::new(set)
    }

    fn build(&self, code: Arc<CompiledFunction>) -> KilnResult<(Arc<Unit>, TranslationStats)> {
        debug!(
            function = %code.qualname,
            instructions = code.instructions.len(),
            regions = code.exception_table.len(),
            "translating"
        );

        // Phase 0: bind declared type parameters to their bounds.
        let code = resolve_type_parameters(code)?;

        // Phase 1: resolve the exception table against instruction indices.
        let resolved = regions::resolve(&code, self.config.strict_exception_regions)?;
        let regions = Arc::new(RegionMap::new(resolved, code.instructions.len()));

        // Phase 2: solve the per-instruction entry states.
        let graph = FlowGraph::build(&code, &regions, initial_state(&code), &self.config)?;

        // Phase 3: nested functions, so MAKE_FUNCTION only instantiates.
        let nested = self.translate_nested(&code)?;

        // Phase 4: lower the body, or split it into generator segments.
        let ctx = LowerContext {
            code: &code,
            graph: &graph,
            config: &self.config,
            nested: &nested,
        };
        let name = unique_name(&code.qualname);
        let (body, lowered_steps, segments) = if code.is_generator() {
            let plan = GeneratorPlan::build(&ctx, &regions, &name, &code)?;
            let lowered = plan.lowered();
            let segments = plan.len();
            (Body::Generator(Arc::new(plan)), lowered, segments)
        } else {
            let steps = lower_steps(&ctx, &regions, &|_| true)?;
            let program = Program::new(Arc::clone(&name), Arc::clone(&code), steps, Arc::clone(&regions));
            let lowered = program.lowered();
            (Body::Plain(program), lowered, 0)
        };

        let stats = TranslationStats {
            instructions: code.instructions.len(),
            lowered_steps,
            regions: regions.len(),
            solver_visits: graph.visits(),
            segments,
            nested: nested.len(),
            elapsed_ns: 0,
        };
        debug!(
            function = %code.qualname,
            unit = %name,
            lowered = stats.lowered_steps,
            visits = stats.solver_visits,
            segments = stats.segments,
            "translated"
        );

        let unit = Unit {
            name,
            spec: ArgumentSpec::from_code(&code),
            code,
            regions,
            body,
        };
        Ok((Arc::new(unit), stats))
    }

    fn translate_nested(&self, code: &CompiledFunction) -> KilnResult<NestedUnits> {
        let units = code
            .constants
            .iter()
            .filter_map(CodeConstant::from_value)
            .map(|nested| {
                let unit = self.translate_unit(Arc::clone(&nested))?;
                Ok((nested, unit))
            })
            .collect::<KilnResult<Vec<_>>>()?;
        Ok(NestedUnits::new(units))
    }
}

/// Translate and call in one go, for callers that do not keep the unit.
pub fn evaluate(code: CompiledFunction, args: &[Value]) -> kiln_core::PyResult<Value> {
    let function = Translator::default()
        .translate(code)
        .map_err(|err| kiln_core::Exception::system_error(err.to_string()))?;
    function.call(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bytecode::FunctionBuilder;
    use kiln_core::protocol::BinaryOp;

    fn add() -> CompiledFunction {
        let mut b = FunctionBuilder::new("add");
        b.positional(&["a", "b"]);
        b.load_fast("a").load_fast("b").binary(BinaryOp::Add).return_value();
        b.finish().unwrap()
    }

    #[test]
    fn test_translate_and_call() {
        let f = Translator::default().translate(add()).unwrap();
        assert_eq!(f.call(&[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_units_get_unique_names() {
        let translator = Translator::default();
        let mut b = FunctionBuilder::new("translate_twice");
        b.return_const(1);
        let code = Arc::new(b.finish().unwrap());
        let first = translator.translate_unit(Arc::clone(&code)).unwrap();
        let second = translator.translate_unit(code).unwrap();
        assert_ne!(first.name(), second.name());
        assert_eq!(crate::naming::base_name(second.name()), "translate_twice");
    }

    #[test]
    fn test_stats() {
        let (_, stats) = Translator::default().translate_with_stats(add()).unwrap();
        assert_eq!(stats.instructions, 4);
        assert_eq!(stats.lowered_steps, 4);
        assert_eq!(stats.segments, 0);
        assert!(stats.solver_visits >= 4);
    }

    #[test]
    fn test_nested_code_is_translated_ahead() {
        let mut b = FunctionBuilder::new("outer");
        b.make_function(add(), 0).return_value();
        let (f, stats) = Translator::default()
            .translate_with_stats(b.finish().unwrap())
            .unwrap();
        assert_eq!(stats.nested, 1);
        let inner = f.call(&[]).unwrap();
        let result =
            kiln_core::protocol::call(&inner, &[Value::Int(1), Value::Int(1)], &Default::default()).unwrap();
        assert_eq!(result, Value::Int(2));
    }

    #[test]
    fn test_unbound_type_parameter_fails_translation() {
        let mut b = FunctionBuilder::new("generic");
        b.positional(&["x"])
            .annotate("x", kiln_core::TypeObject::type_parameter("T", None));
        b.load_fast("x").return_value();
        let err = Translator::default().translate(b.finish().unwrap()).unwrap_err();
        assert!(matches!(err, kiln_core::KilnError::UnresolvedTypeParameter { .. }));
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(evaluate(add(), &[Value::from("a"), Value::from("b")]).unwrap(), Value::from("ab"));
    }
}
