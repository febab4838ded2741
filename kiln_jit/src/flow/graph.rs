//! Flow graph construction and the fixed-point solver.

use super::effect;
use super::state::{LiveState, StackFrameState};
use super::value_source::ValueSource;
use crate::config::TranslatorConfig;
use crate::regions::RegionMap;
use kiln_bytecode::CompiledFunction;
use kiln_core::types::builtin_types;
use kiln_core::{KilnError, KilnResult};
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::trace;

/// Entry state of a function: parameter types bound into locals `0..N`,
/// free variables bound, everything else unbound.
#[must_use]
pub fn initial_state(code: &CompiledFunction) -> LiveState {
    let t = builtin_types();
    let mut state = LiveState::new(code.varnames.len(), code.cell_count());
    for (slot, name) in code.param_names().iter().enumerate() {
        let ty = if Some(slot) == code.varargs_slot() {
            t.tuple.clone()
        } else if Some(slot) == code.varkw_slot() {
            t.dict.clone()
        } else {
            code.param_type(name)
        };
        state.locals[slot] = Some(ValueSource::synthesized(ty));
    }
    for (i, name) in code.cellvars.iter().enumerate() {
        if let Some(local) = code.param_names().iter().position(|p| p == name) {
            state.cells[i] = state.locals[local].clone();
        }
    }
    for slot in code.cellvars.len()..code.cell_count() {
        state.cells[slot] = Some(ValueSource::generic());
    }
    state
}

/// Control-flow graph of one function with the solved entry state of every
/// instruction.
#[derive(Debug)]
pub struct FlowGraph {
    targets: Box<[Option<usize>]>,
    states: Box<[StackFrameState]>,
    visits: usize,
}

impl FlowGraph {
    /// Resolve edges and solve the state fixed point from `initial`.
    pub fn build(
        code: &CompiledFunction,
        regions: &RegionMap,
        initial: LiveState,
        config: &TranslatorConfig,
    ) -> KilnResult<Self> {
        let targets = resolve_targets(code)?;
        let mut graph = Self {
            targets,
            states: vec![StackFrameState::Dead; code.instructions.len()].into_boxed_slice(),
            visits: 0,
        };
        graph.solve(code, regions, initial, config)?;
        if config.trace_states {
            for (index, state) in graph.states.iter().enumerate() {
                trace!(
                    function = %code.qualname,
                    offset = code.instructions[index].offset,
                    opcode = %code.instructions[index].opcode,
                    state = ?state,
                    "entry state"
                );
            }
        }
        Ok(graph)
    }

    fn solve(
        &mut self,
        code: &CompiledFunction,
        regions: &RegionMap,
        initial: LiveState,
        config: &TranslatorConfig,
    ) -> KilnResult<()> {
        let len = code.instructions.len();
        if len == 0 {
            return Ok(());
        }
        let budget = config.max_fixed_point_passes.saturating_mul(len);
        let mut queued = vec![false; len];
        let mut worklist = VecDeque::new();
        self.merge_into(code, 0, StackFrameState::Live(initial), &mut worklist, &mut queued)?;

        while let Some(index) = worklist.pop_front() {
            queued[index] = false;
            self.visits += 1;
            if self.visits > budget {
                return Err(KilnError::FixedPointLimit {
                    function: code.qualname.to_string(),
                    passes: self.visits / len,
                });
            }
            let Some(state) = self.states[index].live().cloned() else {
                continue;
            };
            let successors = effect::apply(code, index, self.targets[index], &state)?;
            for region in regions.covering(index) {
                let seeded = handler_entry(&state, region.depth, region.push_lasti, index);
                self.merge_into(
                    code,
                    region.target,
                    StackFrameState::Live(seeded),
                    &mut worklist,
                    &mut queued,
                )?;
                for (_, after) in &successors {
                    let seeded = handler_entry(after, region.depth, region.push_lasti, index);
                    self.merge_into(
                        code,
                        region.target,
                        StackFrameState::Live(seeded),
                        &mut worklist,
                        &mut queued,
                    )?;
                }
            }
            for (target, next) in successors {
                if target >= len {
                    return Err(KilnError::jump_target(
                        code.qualname.to_string(),
                        code.instructions[index].offset,
                        i64::try_from(target).unwrap_or(i64::MAX),
                    ));
                }
                self.merge_into(code, target, StackFrameState::Live(next), &mut worklist, &mut queued)?;
            }
        }
        Ok(())
    }

    fn merge_into(
        &mut self,
        code: &CompiledFunction,
        target: usize,
        incoming: StackFrameState,
        worklist: &mut VecDeque<usize>,
        queued: &mut [bool],
    ) -> KilnResult<()> {
        let merged = self.states[target].merge(&incoming).map_err(|mismatch| {
            KilnError::InconsistentStackDepth {
                function: code.qualname.to_string(),
                offset: code.instructions[target].offset,
                left: mismatch.left,
                right: mismatch.right,
                types: mismatch.types,
            }
        })?;
        if merged != self.states[target] {
            self.states[target] = merged;
            if !queued[target] {
                queued[target] = true;
                worklist.push_back(target);
            }
        }
        Ok(())
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the function has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Entry state of instruction `index`.
    #[must_use]
    pub fn state(&self, index: usize) -> &StackFrameState {
        &self.states[index]
    }

    /// Entry states of every instruction.
    #[must_use]
    pub fn states(&self) -> &[StackFrameState] {
        &self.states
    }

    /// Resolved branch target of instruction `index`.
    #[must_use]
    pub fn target(&self, index: usize) -> Option<usize> {
        self.targets.get(index).copied().flatten()
    }

    /// Whether instruction `index` is reachable.
    #[must_use]
    pub fn is_reachable(&self, index: usize) -> bool {
        self.states.get(index).is_some_and(|s| !s.is_dead())
    }

    /// Solver visits performed.
    #[must_use]
    pub fn visits(&self) -> usize {
        self.visits
    }

    /// Structural successors of instruction `index`: fall-through, branch,
    /// and handler entries.
    #[must_use]
    pub fn successors(
        &self,
        code: &CompiledFunction,
        regions: &RegionMap,
        index: usize,
    ) -> SmallVec<[usize; 4]> {
        let mut out = SmallVec::new();
        let opcode = code.instructions[index].opcode;
        if opcode.falls_through() && index + 1 < self.len() {
            out.push(index + 1);
        }
        if let Some(target) = self.target(index) {
            if !out.contains(&target) {
                out.push(target);
            }
        }
        for region in regions.covering(index) {
            if !out.contains(&region.target) {
                out.push(region.target);
            }
        }
        out
    }
}

fn handler_entry(from: &LiveState, depth: usize, push_lasti: bool, raiser: usize) -> LiveState {
    let t = builtin_types();
    let mut stack: Vec<ValueSource> = (0..depth).map(|_| ValueSource::generic()).collect();
    if push_lasti {
        stack.push(ValueSource::produced(t.int.clone(), raiser));
    }
    stack.push(ValueSource::produced(t.base_exception.clone(), raiser));
    LiveState {
        stack,
        locals: from.locals.clone(),
        cells: from.cells.clone(),
        kw_names: None,
    }
}

fn resolve_targets(code: &CompiledFunction) -> KilnResult<Box<[Option<usize>]>> {
    code.instructions
        .iter()
        .map(|instruction| match instruction.jump_target() {
            None => Ok(None),
            Some(target) => u32::try_from(target)
                .ok()
                .and_then(|offset| code.index_of_offset(offset))
                .map(Some)
                .ok_or_else(|| {
                    KilnError::jump_target(code.qualname.to_string(), instruction.offset, target)
                }),
        })
        .collect()
}
