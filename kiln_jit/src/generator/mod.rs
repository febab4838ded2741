//! Generator transformation.
//!
//! A body with suspension points is split into segments, one per integer
//! state. State `0` starts the body; a suspension at instruction `i` moves
//! the generator to state `i + 1`; `-1` is exhausted.
//!
//! ```text
//!             ┌─────────── advance ────────────┐
//!             ▼                                │
//! state 0 ─▶ segment(0) ──yield at i──▶ state i+1 ─▶ segment(i+1) ─▶ ...
//!             │                                        │
//!             └──────────── return / raise ────────────┴─▶ state -1
//! ```
//!
//! Plain yields resume at the next instruction with the sent value pushed.
//! Delegating suspensions (`YIELD_FROM`, `SEND`) resume at the delegating
//! instruction itself so it can forward the next value, or a thrown
//! exception, to the delegate until the delegate is exhausted.
//!
//! Every segment is lowered independently over the instructions reachable
//! from its entry; a segment stops at the plain yields it reaches.

pub mod object;

pub use object::Generator;

use crate::exec::{Exit, Program, Start};
use crate::flow::{FlowGraph, LiveState};
use crate::lower::frame::Frame;
use crate::lower::{lower_steps, Flow, LowerContext, Step};
use crate::regions::RegionMap;
use kiln_bytecode::{CompiledFunction, Opcode};
use kiln_core::types::builtin_types;
use kiln_core::{protocol, Exception, KilnResult, PyResult, Value};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// State of a generator that has finished.
pub const EXHAUSTED: i64 = -1;

// =============================================================================
// Lowering of generator opcodes
// =============================================================================

pub(crate) fn emit(ctx: &LowerContext<'_>, index: usize, _state: &LiveState) -> KilnResult<Step> {
    let opcode = ctx.instruction(index).opcode;
    Ok(match opcode {
        Opcode::ReturnGenerator => Box::new(|f: &mut Frame| {
            f.push(Value::None);
            Ok(Flow::Next)
        }),
        Opcode::GenStart => Box::new(|_| Ok(Flow::Next)),
        Opcode::GetYieldFromIter => Box::new(|f: &mut Frame| {
            let iterable = f.pop()?;
            let iterator = if kiln_core::object::downcast::<Generator>(&iterable).is_some() {
                iterable
            } else {
                protocol::get_iter(&iterable)?
            };
            f.push(iterator);
            Ok(Flow::Next)
        }),
        Opcode::YieldValue => Box::new(|f: &mut Frame| Ok(Flow::Suspend(f.pop()?))),
        Opcode::YieldFrom => delegate(None),
        Opcode::Send => delegate(Some(ctx.target(index)?)),
        _ => return Err(ctx.unsupported(index)),
    })
}

/// Forward one value into the delegate at TOS1.
///
/// `done` is where `SEND` continues once the delegate is exhausted;
/// `YIELD_FROM` falls through instead.
fn delegate(done: Option<usize>) -> Step {
    Box::new(move |f: &mut Frame| {
        let value = f.pop()?;
        let receiver = f.peek(0)?.clone();
        let outcome = match f.pending_throw.take() {
            Some(exc) => throw_into(&receiver, exc),
            None if value.is_none() => advance_delegate(&receiver),
            None => protocol::getattr(&receiver, "send")
                .and_then(|send| protocol::call(&send, &[value], &Default::default())),
        };
        match outcome {
            Ok(yielded) => Ok(Flow::Suspend(yielded)),
            Err(exc) if exc.is_instance(&builtin_types().stop_iteration) => {
                f.pop()?;
                f.push(exc.stop_value());
                Ok(done.map_or(Flow::Next, Flow::Jump))
            }
            Err(exc) => Err(exc),
        }
    })
}

fn advance_delegate(receiver: &Value) -> PyResult<Value> {
    match receiver.type_of().lookup("__next__") {
        Some(next) => next.call(std::slice::from_ref(receiver)),
        None => Err(Exception::type_error(format!(
            "'{}' object is not an iterator",
            receiver.type_name()
        ))),
    }
}

fn throw_into(receiver: &Value, exc: Exception) -> PyResult<Value> {
    let ty = receiver.type_of();
    if exc.is_instance(&builtin_types().generator_exit) {
        if let Some(close) = ty.lookup("close") {
            close.call(std::slice::from_ref(receiver))?;
        }
        return Err(exc);
    }
    match ty.lookup("throw") {
        Some(throw) => throw.call(&[receiver.clone(), Value::Exception(exc)]),
        None => Err(exc),
    }
}

// =============================================================================
// Segments
// =============================================================================

/// How a segment is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEntry {
    /// Function start.
    Start,
    /// Just after a plain yield at `suspension`.
    AfterYield {
        /// Index of the yield.
        suspension: usize,
    },
    /// Re-entry of the delegating instruction at `suspension`.
    Delegate {
        /// Index of the delegating instruction.
        suspension: usize,
    },
}

/// One independently lowered resumable slice of the body.
#[derive(Debug)]
pub struct Segment {
    /// Generator state this segment runs for.
    pub state: i64,
    /// Instruction index execution resumes at.
    pub entry: usize,
    /// How the segment is entered.
    pub kind: SegmentEntry,
    /// Solved state before the entry instruction.
    pub entry_state: Option<LiveState>,
    program: Program,
}

impl Segment {
    /// Lowered steps in this segment.
    #[must_use]
    pub fn lowered(&self) -> usize {
        self.program.lowered()
    }
}

/// The segments of a generator body, keyed by state.
#[derive(Debug)]
pub struct GeneratorPlan {
    name: Arc<str>,
    segments: FxHashMap<i64, Segment>,
}

/// Value threaded into a generator on resume.
#[derive(Debug)]
pub enum Resume {
    /// `next(gen)`.
    Next,
    /// `gen.send(value)`.
    Send(Value),
    /// `gen.throw(exc)`.
    Throw(Exception),
}

/// Heap-resident state of one generator instance.
pub struct GeneratorState {
    /// Current state number.
    pub state: i64,
    /// Activation preserved across suspensions.
    pub frame: Frame,
    /// Value the body returned, once exhausted.
    pub returned: Value,
}

impl GeneratorPlan {
    /// Split `code` into segments and lower each one.
    pub(crate) fn build(
        ctx: &LowerContext<'_>,
        regions: &Arc<RegionMap>,
        name: &Arc<str>,
        code: &Arc<CompiledFunction>,
    ) -> KilnResult<Self> {
        let graph = ctx.graph;
        let mut entries = vec![(0_i64, 0_usize, SegmentEntry::Start)];
        for (index, instruction) in code.instructions.iter().enumerate() {
            if !instruction.opcode.is_suspension() || !graph.is_reachable(index) {
                continue;
            }
            let state = i64::try_from(index + 1).unwrap_or(i64::MAX);
            entries.push(match instruction.opcode {
                Opcode::YieldValue => (
                    state,
                    index + 1,
                    SegmentEntry::AfterYield { suspension: index },
                ),
                _ => (state, index, SegmentEntry::Delegate { suspension: index }),
            });
        }

        let mut segments = FxHashMap::default();
        for (state, entry, kind) in entries {
            let reach = reachable_from(graph, code, regions, entry, kind);
            let steps = lower_steps(ctx, regions, &|i| reach[i])?;
            let program = Program::new(Arc::clone(name), Arc::clone(code), steps, Arc::clone(regions));
            debug!(
                function = %name,
                state,
                entry,
                kind = ?kind,
                steps = program.lowered(),
                "generator segment"
            );
            segments.insert(
                state,
                Segment {
                    state,
                    entry,
                    kind,
                    entry_state: graph.states().get(entry).and_then(|s| s.live().cloned()),
                    program,
                },
            );
        }
        Ok(Self {
            name: Arc::clone(name),
            segments,
        })
    }

    /// Segment run for `state`.
    #[must_use]
    pub fn segment(&self, state: i64) -> Option<&Segment> {
        self.segments.get(&state)
    }

    /// Number of segments, including the start segment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Lowered steps summed over all segments.
    #[must_use]
    pub fn lowered(&self) -> usize {
        self.segments.values().map(Segment::lowered).sum()
    }

    /// Whether the plan has no segment (never true for a built plan).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Run the segment for the current state.
    ///
    /// `Ok(Some(v))` when the body yields `v`, `Ok(None)` once it returns.
    pub fn advance(&self, gen: &mut GeneratorState, input: Resume) -> PyResult<Option<Value>> {
        if gen.state == EXHAUSTED {
            return match input {
                Resume::Throw(exc) => Err(exc),
                Resume::Next | Resume::Send(_) => Ok(None),
            };
        }
        let segment = self.segments.get(&gen.state).ok_or_else(|| {
            Exception::system_error(format!("{}: no segment for state {}", self.name, gen.state))
        })?;
        let start = match (segment.kind, input) {
            (SegmentEntry::Start, Resume::Throw(exc)) => {
                gen.state = EXHAUSTED;
                return Err(exc);
            }
            // The first sent value has nowhere to go.
            (SegmentEntry::Start, _) => Start::At(segment.entry),
            (SegmentEntry::AfterYield { suspension }, Resume::Throw(exc)) => Start::Raise {
                at: suspension,
                exc,
            },
            (SegmentEntry::AfterYield { .. } | SegmentEntry::Delegate { .. }, resume) => {
                match resume {
                    Resume::Next => gen.frame.push(Value::None),
                    Resume::Send(value) => gen.frame.push(value),
                    Resume::Throw(exc) => {
                        gen.frame.push(Value::None);
                        gen.frame.pending_throw = Some(exc);
                    }
                }
                Start::At(segment.entry)
            }
        };
        match segment.program.run(&mut gen.frame, start) {
            Ok(Exit::Yield { value, at }) => {
                gen.state = i64::try_from(at + 1).unwrap_or(i64::MAX);
                Ok(Some(value))
            }
            Ok(Exit::Return(value)) => {
                gen.state = EXHAUSTED;
                gen.returned = value;
                Ok(None)
            }
            Err(exc) => {
                gen.state = EXHAUSTED;
                if exc.is_instance(&builtin_types().stop_iteration) {
                    let wrapped = Exception::runtime_error("generator raised StopIteration");
                    wrapped.set_cause(Some(exc));
                    return Err(wrapped);
                }
                Err(exc)
            }
        }
    }
}

/// Instructions a segment entered at `entry` can execute before its next
/// plain yield.
fn reachable_from(
    graph: &FlowGraph,
    code: &CompiledFunction,
    regions: &RegionMap,
    entry: usize,
    kind: SegmentEntry,
) -> Vec<bool> {
    let len = code.instructions.len();
    let mut seen = vec![false; len];
    let mut queue = VecDeque::new();
    let seed = |index: usize, seen: &mut Vec<bool>, queue: &mut VecDeque<usize>| {
        if index < len && !seen[index] && graph.is_reachable(index) {
            seen[index] = true;
            queue.push_back(index);
        }
    };
    seed(entry, &mut seen, &mut queue);
    // A throw delivered at a plain yield lands in the handlers covering it.
    if let SegmentEntry::AfterYield { suspension } = kind {
        for region in regions.covering(suspension) {
            seed(region.target, &mut seen, &mut queue);
        }
    }
    while let Some(index) = queue.pop_front() {
        if code.instructions[index].opcode == Opcode::YieldValue {
            continue;
        }
        for next in graph.successors(code, regions, index) {
            seed(next, &mut seen, &mut queue);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::flow::initial_state;
    use crate::function::NestedUnits;
    use crate::regions::resolve;
    use kiln_bytecode::FunctionBuilder;

    fn plan_for(code: CompiledFunction) -> (GeneratorPlan, Arc<CompiledFunction>) {
        let code = Arc::new(code);
        let config = TranslatorConfig::default();
        let regions = Arc::new(RegionMap::new(
            resolve(&code, false).unwrap(),
            code.instructions.len(),
        ));
        let graph = FlowGraph::build(&code, &regions, initial_state(&code), &config).unwrap();
        let nested = NestedUnits::default();
        let ctx = LowerContext {
            code: &code,
            graph: &graph,
            config: &config,
            nested: &nested,
        };
        let plan = GeneratorPlan::build(&ctx, &regions, &Arc::from("gen"), &code).unwrap();
        (plan, code)
    }

    fn fresh(code: &CompiledFunction) -> GeneratorState {
        GeneratorState {
            state: 0,
            frame: Frame::detached(code.varnames.len(), code.exception_table.len()),
            returned: Value::None,
        }
    }

    fn two_yields() -> CompiledFunction {
        let mut b = FunctionBuilder::new("two");
        b.load_const(1).yield_value().pop_top();
        b.load_const(2).yield_value().pop_top();
        b.return_const(7);
        b.finish().unwrap()
    }

    #[test]
    fn test_segments_per_suspension() {
        let (plan, _) = plan_for(two_yields());
        assert_eq!(plan.len(), 3);
        let start = plan.segment(0).unwrap();
        assert_eq!(start.kind, SegmentEntry::Start);
        // Stops at the first yield: LOAD_CONST, YIELD_VALUE.
        assert_eq!(start.lowered(), 2);
        let after_first = plan.segment(2).unwrap();
        assert_eq!(after_first.entry, 2);
        assert_eq!(after_first.kind, SegmentEntry::AfterYield { suspension: 1 });
        assert!(after_first.entry_state.is_some());
    }

    #[test]
    fn test_advance_through_states() {
        let (plan, code) = plan_for(two_yields());
        let mut gen = fresh(&code);
        assert_eq!(plan.advance(&mut gen, Resume::Next).unwrap(), Some(Value::Int(1)));
        assert_eq!(gen.state, 2);
        assert_eq!(plan.advance(&mut gen, Resume::Send(Value::Int(9))).unwrap(), Some(Value::Int(2)));
        assert_eq!(gen.state, 5);
        assert_eq!(plan.advance(&mut gen, Resume::Next).unwrap(), None);
        assert_eq!(gen.state, EXHAUSTED);
        assert_eq!(gen.returned, Value::Int(7));
        assert_eq!(plan.advance(&mut gen, Resume::Next).unwrap(), None);
    }

    #[test]
    fn test_throw_before_start_exhausts() {
        let (plan, code) = plan_for(two_yields());
        let mut gen = fresh(&code);
        let err = plan
            .advance(&mut gen, Resume::Throw(Exception::value_error("early")))
            .unwrap_err();
        assert_eq!(err.message(), "early");
        assert_eq!(gen.state, EXHAUSTED);
    }

    #[test]
    fn test_stop_iteration_in_body_becomes_runtime_error() {
        let mut b = FunctionBuilder::new("leaky");
        b.load_const(1).yield_value().pop_top();
        b.load_global("StopIteration").emit(Opcode::RaiseVarargs, 1);
        let (plan, code) = plan_for(b.finish().unwrap());
        let mut gen = fresh(&code);
        plan.advance(&mut gen, Resume::Next).unwrap();
        let err = plan.advance(&mut gen, Resume::Next).unwrap_err();
        assert_eq!(err.type_name(), "RuntimeError");
        assert_eq!(err.cause().unwrap().type_name(), "StopIteration");
    }
}
