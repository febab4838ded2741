//! Step execution loop.
//!
//! A [`Program`] is the lowered body of one unit (or one generator segment).
//! Running it walks the step table from an entry index until a step returns
//! or suspends. A raise consults the region map: the innermost covering
//! region lands the exception and execution continues at its handler;
//! otherwise the exception leaves the unit with a traceback entry added.

use crate::lower::frame::Frame;
use crate::lower::{Flow, Step};
use crate::regions::RegionMap;
use kiln_bytecode::CompiledFunction;
use kiln_core::{Exception, PyResult, Value};
use std::fmt;
use std::sync::Arc;

/// Where a run begins.
#[derive(Debug)]
pub enum Start {
    /// Execute from an instruction index.
    At(usize),
    /// Raise an exception as if the instruction at `at` had raised it.
    Raise {
        /// Raising instruction index.
        at: usize,
        /// Exception to raise.
        exc: Exception,
    },
}

/// How a run ended.
#[derive(Debug)]
pub enum Exit {
    /// The unit returned.
    Return(Value),
    /// The unit suspended at instruction `at`.
    Yield {
        /// Yielded value.
        value: Value,
        /// Index of the suspending instruction.
        at: usize,
    },
}

/// Lowered steps of a body with the regions protecting them.
pub struct Program {
    name: Arc<str>,
    code: Arc<CompiledFunction>,
    steps: Box<[Option<Step>]>,
    regions: Arc<RegionMap>,
}

impl Program {
    /// Assemble a program.
    #[must_use]
    pub fn new(
        name: Arc<str>,
        code: Arc<CompiledFunction>,
        steps: Box<[Option<Step>]>,
        regions: Arc<RegionMap>,
    ) -> Self {
        Self {
            name,
            code,
            steps,
            regions,
        }
    }

    /// Number of lowered (reachable) steps.
    #[must_use]
    pub fn lowered(&self) -> usize {
        self.steps.iter().filter(|s| s.is_some()).count()
    }

    /// Regions protecting this body.
    #[must_use]
    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// Run against `frame` from `start`.
    pub fn run(&self, frame: &mut Frame, start: Start) -> PyResult<Exit> {
        let mut pc = match start {
            Start::At(index) => index,
            Start::Raise { at, exc } => self.unwind(frame, at, exc)?,
        };
        loop {
            let result = match self.steps.get(pc).and_then(Option::as_ref) {
                Some(step) => step(frame),
                None => Err(Exception::system_error(format!(
                    "{}: no lowered step at instruction {pc}",
                    self.name
                ))),
            };
            pc = match result {
                Ok(Flow::Next) => pc + 1,
                Ok(Flow::Jump(target)) => target,
                Ok(Flow::Return(value)) => return Ok(Exit::Return(value)),
                Ok(Flow::Suspend(value)) => return Ok(Exit::Yield { value, at: pc }),
                Err(exc) => self.unwind(frame, pc, exc)?,
            };
        }
    }

    /// Route an exception raised at `pc` to its handler, or out of the unit.
    fn unwind(&self, frame: &mut Frame, pc: usize, exc: Exception) -> PyResult<usize> {
        if let Some(handled) = &frame.exc_info {
            if !handled.ptr_eq(&exc) && exc.context().is_none() {
                exc.set_context(Some(handled.clone()));
            }
        }
        match self.regions.handler_for(pc) {
            Some(region) => {
                let offset = self.code.instructions.get(pc).map_or(0, |i| i.offset);
                region.land(frame, offset, exc)?;
                Ok(region.target)
            }
            None => {
                exc.push_traceback(Arc::clone(&self.name), self.code.line_at(pc));
                Err(exc)
            }
        }
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("lowered", &self.lowered())
            .field("regions", &self.regions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::ExceptionRegion;

    fn program(steps: Vec<Option<Step>>, regions: RegionMap) -> Program {
        let mut code = CompiledFunction::empty("prog");
        code.instructions = (0..steps.len())
            .map(|i| {
                kiln_bytecode::Instruction::new(
                    kiln_bytecode::Opcode::Nop,
                    u32::try_from(i).unwrap(),
                    0,
                )
                .with_line(10 + u32::try_from(i).unwrap())
            })
            .collect();
        Program::new(
            Arc::from("prog"),
            Arc::new(code),
            steps.into_boxed_slice(),
            Arc::new(regions),
        )
    }

    #[test]
    fn test_uncaught_raise_records_traceback() {
        let raise: Step = Box::new(|_| Err(Exception::value_error("bad")));
        let prog = program(vec![Some(Box::new(|_| Ok(Flow::Next))), Some(raise)], RegionMap::default());
        let mut frame = Frame::detached(0, 0);
        let err = prog.run(&mut frame, Start::At(0)).unwrap_err();
        let tb = err.traceback();
        assert_eq!(tb.len(), 1);
        assert_eq!(&*tb[0].function, "prog");
        assert_eq!(tb[0].line, Some(11));
    }

    #[test]
    fn test_raise_lands_in_handler() {
        let region = ExceptionRegion {
            id: 0,
            table_index: 0,
            start: 0,
            end: 1,
            target: 1,
            depth: 0,
            push_lasti: false,
        };
        let raise: Step = Box::new(|f: &mut Frame| {
            f.push(Value::Int(1));
            Err(Exception::value_error("caught"))
        });
        let handler: Step = Box::new(|f: &mut Frame| Ok(Flow::Return(f.pop()?)));
        let prog = program(vec![Some(raise), Some(handler)], RegionMap::new(vec![region], 2));
        let mut frame = Frame::detached(0, 1);
        let Exit::Return(Value::Exception(exc)) = prog.run(&mut frame, Start::At(0)).unwrap() else {
            panic!("expected the exception to be returned");
        };
        assert_eq!(exc.message(), "caught");
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn test_context_is_the_handled_exception() {
        let raise: Step = Box::new(|_| Err(Exception::type_error("second")));
        let prog = program(vec![Some(raise)], RegionMap::default());
        let mut frame = Frame::detached(0, 0);
        frame.exc_info = Some(Exception::value_error("first"));
        let err = prog.run(&mut frame, Start::At(0)).unwrap_err();
        assert_eq!(err.context().unwrap().message(), "first");
    }

    #[test]
    fn test_missing_step_is_a_system_error() {
        let prog = program(vec![None], RegionMap::default());
        let mut frame = Frame::detached(0, 0);
        let err = prog.run(&mut frame, Start::At(0)).unwrap_err();
        assert_eq!(err.type_name(), "SystemError");
    }
}
