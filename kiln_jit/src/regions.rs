//! Exception region reconstruction.
//!
//! The flat exception table is resolved into [`ExceptionRegion`] records
//! addressed by instruction index. At run time the innermost covering
//! region (narrowest range, first table entry on ties) receives control
//! through its landing pad:
//!
//! ```text
//! raise at i ──▶ restore stack to `depth` ──▶ [push lasti] ──▶ push exc ──▶ jump target
//! ```

use crate::lower::frame::Frame;
use crate::lower::Step;
use kiln_bytecode::CompiledFunction;
use kiln_core::{Exception, KilnError, KilnResult, Value};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::warn;

/// One resolved protected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Position of the region among the valid regions; indexes capture slots.
    pub id: usize,
    /// Position of the source entry in the exception table.
    pub table_index: usize,
    /// First protected instruction index.
    pub start: usize,
    /// End of the protected range (exclusive instruction index).
    pub end: usize,
    /// Handler instruction index.
    pub target: usize,
    /// Operand-stack depth at handler entry, before lasti and the exception.
    pub depth: usize,
    /// Push the raising instruction's offset before the exception.
    pub push_lasti: bool,
}

impl ExceptionRegion {
    /// Whether instruction `index` is protected.
    #[inline]
    #[must_use]
    pub fn covers(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }

    /// Number of protected instructions.
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.end - self.start
    }

    /// Transfer a raised exception to the handler.
    ///
    /// Restores the stack to the declared depth, pushes the raising offset
    /// when requested, then the exception.
    pub fn land(&self, frame: &mut Frame, raise_offset: u32, exc: Exception) -> Result<(), Exception> {
        if frame.stack.len() >= self.depth {
            frame.stack.truncate(self.depth);
        } else {
            match frame.captured.get(self.id).and_then(Option::as_ref) {
                Some(saved) if saved.len() == self.depth => frame.stack.clone_from(saved),
                _ => {
                    return Err(Exception::system_error(format!(
                        "operand stack below handler depth {} with no saved state",
                        self.depth
                    )))
                }
            }
        }
        if self.push_lasti {
            frame.push(Value::Int(i64::from(raise_offset)));
        }
        frame.push(Value::Exception(exc));
        Ok(())
    }
}

/// Resolve the exception table of `code` against its instruction indices.
///
/// Void entries are dropped. Entries whose handler precedes their start are
/// dropped with a warning, or rejected when `strict` is set.
pub fn resolve(code: &CompiledFunction, strict: bool) -> KilnResult<Vec<ExceptionRegion>> {
    let function = code.qualname.to_string();
    let at_or_after =
        |offset: u32| code.instructions.partition_point(|i| i.offset < offset);
    let mut regions = Vec::new();
    for (table_index, entry) in code.exception_table.iter().enumerate() {
        if entry.is_void() {
            continue;
        }
        if entry.is_backward() {
            if strict {
                return Err(KilnError::InvalidExceptionRegion {
                    function,
                    start: entry.start,
                    end: entry.end,
                    target: entry.target,
                });
            }
            warn!(
                function = %function,
                start = entry.start,
                end = entry.end,
                target = entry.target,
                "skipping exception region whose handler precedes its start"
            );
            continue;
        }
        let target = code
            .index_of_offset(entry.target)
            .ok_or_else(|| KilnError::jump_target(function.clone(), entry.start, i64::from(entry.target)))?;
        let start = at_or_after(entry.start);
        let end = at_or_after(entry.end);
        if start >= end {
            continue;
        }
        regions.push(ExceptionRegion {
            id: regions.len(),
            table_index,
            start,
            end,
            target,
            depth: usize::try_from(entry.depth).unwrap_or(usize::MAX),
            push_lasti: entry.push_lasti,
        });
    }
    Ok(regions)
}

/// Region lookup by instruction index.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: Arc<[ExceptionRegion]>,
    innermost: Box<[Option<usize>]>,
    starts: Box<[SmallVec<[usize; 2]>]>,
}

impl RegionMap {
    /// Index `regions` over a body of `len` instructions.
    #[must_use]
    pub fn new(regions: Vec<ExceptionRegion>, len: usize) -> Self {
        let mut innermost: Vec<Option<usize>> = vec![None; len];
        let mut starts: Vec<SmallVec<[usize; 2]>> = vec![SmallVec::new(); len];
        for region in &regions {
            if let Some(slot) = starts.get_mut(region.start) {
                slot.push(region.id);
            }
            for index in region.start..region.end.min(len) {
                let replace = match innermost[index] {
                    None => true,
                    // Strictly narrower wins; equal widths keep the earlier entry.
                    Some(current) => region.width() < regions[current].width(),
                };
                if replace {
                    innermost[index] = Some(region.id);
                }
            }
        }
        Self {
            regions: regions.into(),
            innermost: innermost.into_boxed_slice(),
            starts: starts.into_boxed_slice(),
        }
    }

    /// All valid regions, in table order.
    #[must_use]
    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    /// Number of valid regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether no region survived resolution.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The region that handles a raise at `index`.
    #[must_use]
    pub fn handler_for(&self, index: usize) -> Option<&ExceptionRegion> {
        self.innermost
            .get(index)
            .copied()
            .flatten()
            .map(|id| &self.regions[id])
    }

    /// Every region covering `index`, in table order.
    pub fn covering(&self, index: usize) -> impl Iterator<Item = &ExceptionRegion> {
        self.regions.iter().filter(move |r| r.covers(index))
    }

    /// Wrap the step at a region start so the stack below the region depth
    /// is captured each time the region is entered.
    #[must_use]
    pub fn wrap_start(&self, index: usize, step: Step) -> Step {
        let Some(ids) = self.starts.get(index).filter(|ids| !ids.is_empty()) else {
            return step;
        };
        let captures: SmallVec<[(usize, usize); 2]> = ids
            .iter()
            .map(|&id| (id, self.regions[id].depth))
            .collect();
        Box::new(move |frame: &mut Frame| {
            for &(id, depth) in &captures {
                if frame.stack.len() >= depth {
                    if let Some(slot) = frame.captured.get_mut(id) {
                        *slot = Some(frame.stack[..depth].to_vec());
                    }
                }
            }
            step(frame)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bytecode::{ExceptionTableEntry, FunctionBuilder, Instruction, Opcode};

    fn code_with(table: &[ExceptionTableEntry], len: u32) -> CompiledFunction {
        let mut code = CompiledFunction::empty("regions");
        code.instructions = (0..len).map(|i| Instruction::new(Opcode::Nop, i, 0)).collect();
        code.exception_table = table.iter().copied().collect();
        code
    }

    #[test]
    fn test_innermost_wins() {
        let code = code_with(
            &[
                ExceptionTableEntry::new(0, 8, 10, 0, false),
                ExceptionTableEntry::new(2, 4, 12, 1, true),
            ],
            14,
        );
        let map = RegionMap::new(resolve(&code, false).unwrap(), 14);
        assert_eq!(map.handler_for(1).unwrap().target, 10);
        assert_eq!(map.handler_for(3).unwrap().target, 12);
        assert_eq!(map.handler_for(4).unwrap().target, 10);
        assert!(map.handler_for(8).is_none());
        assert_eq!(map.covering(3).count(), 2);
    }

    #[test]
    fn test_ties_go_to_first_entry() {
        let code = code_with(
            &[
                ExceptionTableEntry::new(2, 4, 10, 0, false),
                ExceptionTableEntry::new(2, 4, 12, 0, false),
            ],
            14,
        );
        let map = RegionMap::new(resolve(&code, false).unwrap(), 14);
        assert_eq!(map.handler_for(2).unwrap().target, 10);
        assert_eq!(map.handler_for(2).unwrap().table_index, 0);
    }

    #[test]
    fn test_void_and_backward_regions() {
        let code = code_with(
            &[
                ExceptionTableEntry::new(3, 3, 10, 0, false),
                ExceptionTableEntry::new(5, 8, 1, 0, false),
                ExceptionTableEntry::new(0, 2, 9, 0, false),
            ],
            12,
        );
        let regions = resolve(&code, false).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].table_index, 2);
        assert_eq!(regions[0].id, 0);

        let err = resolve(&code, true).unwrap_err();
        assert!(matches!(err, KilnError::InvalidExceptionRegion { target: 1, .. }));
    }

    #[test]
    fn test_unknown_handler_offset() {
        let code = code_with(&[ExceptionTableEntry::new(0, 2, 40, 0, false)], 4);
        assert!(matches!(
            resolve(&code, false),
            Err(KilnError::InvalidJumpTarget { target: 40, .. })
        ));
    }

    #[test]
    fn test_landing_pad_restores_depth() {
        let region = ExceptionRegion {
            id: 0,
            table_index: 0,
            start: 0,
            end: 2,
            target: 3,
            depth: 1,
            push_lasti: true,
        };
        let mut frame = Frame::detached(0, 1);
        frame.push(Value::Int(7));
        frame.push(Value::Int(8));
        frame.push(Value::Int(9));
        region
            .land(&mut frame, 5, Exception::value_error("boom"))
            .unwrap();
        assert_eq!(frame.stack.len(), 3);
        assert_eq!(frame.stack[0], Value::Int(7));
        assert_eq!(frame.stack[1], Value::Int(5));
        assert!(matches!(frame.stack[2], Value::Exception(_)));
    }

    #[test]
    fn test_landing_pad_uses_capture_when_stack_is_short() {
        let region = ExceptionRegion {
            id: 0,
            table_index: 0,
            start: 0,
            end: 2,
            target: 3,
            depth: 2,
            push_lasti: false,
        };
        let mut frame = Frame::detached(0, 1);
        frame.captured[0] = Some(vec![Value::Int(1), Value::Int(2)]);
        region
            .land(&mut frame, 0, Exception::value_error("boom"))
            .unwrap();
        assert_eq!(frame.stack.len(), 3);
        assert_eq!(frame.stack[1], Value::Int(2));

        let mut empty = Frame::detached(0, 1);
        assert!(region.land(&mut empty, 0, Exception::value_error("x")).is_err());
    }

    #[test]
    fn test_builder_regions_resolve() {
        let mut b = FunctionBuilder::new("f");
        b.try_except(|b| { b.load_const(1).pop_top(); }, |b| { b.pop_top(); });
        b.return_const(Value::None);
        let code = b.finish().unwrap();
        let regions = resolve(&code, true).unwrap();
        assert_eq!(regions.len(), 2);
        assert!(!regions[0].push_lasti);
        assert!(regions[1].push_lasti);
        assert_eq!(regions[1].depth, 1);
    }
}
