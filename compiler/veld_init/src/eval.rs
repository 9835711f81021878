//! The instruction evaluator: one transfer function per opcode.
//!
//! Each evaluator reads its operands out of the context, updates
//! register and memory state, and either succeeds or emits a diagnostic
//! and aborts the current block. Two evaluators repair the program
//! instead of rejecting it: a `set` borrow over (partially) initialized
//! storage and a `dealloc_stack` of a live cell both insert `load` +
//! `deinit` pairs immediately before themselves, then proceed on the
//! deinitialized state.
//!
//! Repairs inserted *before the current instruction* are not evaluated
//! on this visit — their effect is applied to the context directly, and
//! any later re-evaluation of the block (or a second run of the pass)
//! executes them for real with the same outcome.

use std::collections::BTreeSet;

use veld_diagnostic::{Diagnostic, DiagnosticQueue, ErrorCode};
use veld_ir::{
    BlockId, Convention, Function, InsertionPoint, InstrId, Op, Operand, RecordPath, RegisterKey,
    Span, Terminator,
};
use veld_types::TypePool;

use crate::context::{Context, Value};
use crate::lattice::{Consumer, Object, ObjectState, Summary};
use crate::memory::{Cell, MemoryLocation};

/// Marker: a diagnostic was emitted and evaluation of the current block
/// must stop.
pub(crate) struct Abort;

pub(crate) type EvalResult = Result<(), Abort>;

/// Evaluates one block at a time against an abstract context.
pub(crate) struct Evaluator<'a> {
    pub func: &'a mut Function,
    pub types: &'a TypePool,
    pub diagnostics: &'a mut DiagnosticQueue,
}

impl Evaluator<'_> {
    /// Evaluate a block's body and terminator, mutating `ctx` in place.
    ///
    /// Stops at the first failing instruction; the context then holds
    /// the state just before the failure.
    pub fn eval_block(&mut self, block: BlockId, ctx: &mut Context) -> EvalResult {
        // Snapshot the body order: repairs inserted during this visit
        // must not be evaluated on this visit.
        let body: Vec<InstrId> = self.func.block(block).body.clone();
        for id in body {
            self.eval_instr(id, ctx)?;
        }
        self.eval_terminator(block, ctx)
    }

    fn eval_instr(&mut self, id: InstrId, ctx: &mut Context) -> EvalResult {
        let op = self.func.instr(id).op.clone();
        match op {
            Op::AllocStack { ty } => self.eval_alloc_stack(id, ty, ctx),
            Op::Borrow {
                capability,
                source,
                path,
            } => self.eval_borrow(id, capability, source, &path, ctx),
            Op::Load { source, path, .. } => self.eval_load(id, source, &path, ctx),
            Op::Store { object, target } => self.eval_store(id, object, target, ctx),
            Op::Record { operands, .. } => self.eval_record(id, &operands, ctx),
            Op::Destructure { ty, object } => self.eval_destructure(id, ty, object, ctx),
            Op::Call {
                operands,
                conventions,
                ..
            } => self.eval_call(id, &operands, &conventions, ctx),
            Op::Deinit { object } => self.eval_deinit(id, object, ctx),
            Op::DeallocStack { location } => self.eval_dealloc_stack(id, location, ctx),
            Op::EndBorrow { .. } => Ok(()),
        }
    }

    fn eval_terminator(&mut self, block: BlockId, ctx: &mut Context) -> EvalResult {
        let terminator = self.func.block(block).terminator.clone();
        let at = Consumer::Terminator(block);
        match terminator {
            Terminator::CondBranch { condition, .. } => self.consume_operand(condition, at, ctx),
            Terminator::Return { value: Some(value) } => self.consume_operand(value, at, ctx),
            Terminator::Return { value: None }
            | Terminator::Branch { .. }
            | Terminator::Unreachable => Ok(()),
        }
    }

    // Per-opcode transfer functions

    fn eval_alloc_stack(
        &mut self,
        id: InstrId,
        ty: veld_types::TypeId,
        ctx: &mut Context,
    ) -> EvalResult {
        let location = MemoryLocation::Inst(id);
        if ctx.memory.contains_key(&location) {
            return Err(self.diagnose(
                ErrorCode::UnboundedStackAllocation,
                "unbounded stack allocation",
                Consumer::Instr(id),
                "allocation executes again while its cell is still live",
            ));
        }
        ctx.memory.insert(
            location.clone(),
            Cell {
                ty,
                object: Object::full(ObjectState::Uninitialized),
            },
        );
        ctx.locals
            .insert(RegisterKey::Result(id, 0), Value::singleton(location));
        Ok(())
    }

    fn eval_borrow(
        &mut self,
        id: InstrId,
        capability: Convention,
        source: Operand,
        path: &RecordPath,
        ctx: &mut Context,
    ) -> EvalResult {
        let sources = self.locations_of(source, ctx);
        let locations: BTreeSet<MemoryLocation> =
            sources.iter().map(|s| s.appending(path)).collect();

        match capability {
            Convention::Let | Convention::Inout => {
                for location in &locations {
                    let summary = ctx.with_object(self.types, location, |o| o.summary());
                    if !matches!(summary, Summary::FullyInitialized) {
                        return Err(self.diagnose_use(&summary, Consumer::Instr(id)));
                    }
                }
            }
            Convention::Set => {
                // A set borrow hands out uninitialized storage; whatever
                // is still live under the borrowed path gets loaded and
                // deinitialized right before the borrow.
                let probe = locations
                    .first()
                    .unwrap_or_else(|| panic!("borrow with an empty location set"));
                let summary = ctx.with_object(self.types, probe, |o| o.summary());
                let initialized = summary.initialized_paths();
                for sub in &initialized {
                    self.insert_unload(id, source, &path.appending(sub), &probe.appending(sub), ctx);
                }
                if !initialized.is_empty() {
                    tracing::debug!(
                        function = %self.func.name,
                        instr = id.raw(),
                        repairs = initialized.len(),
                        "deinitialized storage before set borrow",
                    );
                }
                for location in &locations {
                    ctx.with_object(self.types, location, |o| {
                        *o = Object::full(ObjectState::Uninitialized);
                    });
                }
            }
            Convention::Sink | Convention::Yielded => {
                panic!("borrow with {capability} capability (ill-formed IR)")
            }
        }

        ctx.locals
            .insert(RegisterKey::Result(id, 0), Value::Locations(locations));
        Ok(())
    }

    fn eval_load(
        &mut self,
        id: InstrId,
        source: Operand,
        path: &RecordPath,
        ctx: &mut Context,
    ) -> EvalResult {
        let sources = self.locations_of(source, ctx);
        for root in &sources {
            let location = root.appending(path);
            let summary = ctx.with_object(self.types, &location, |o| o.summary());
            if !matches!(summary, Summary::FullyInitialized) {
                return Err(self.diagnose_use(&summary, Consumer::Instr(id)));
            }
            ctx.with_object(self.types, &location, |o| {
                *o = Object::full(ObjectState::consumed_by(Consumer::Instr(id)));
            });
        }
        ctx.locals.insert(
            RegisterKey::Result(id, 0),
            Value::Object(Object::full(ObjectState::Initialized)),
        );
        Ok(())
    }

    fn eval_store(
        &mut self,
        id: InstrId,
        object: Operand,
        target: Operand,
        ctx: &mut Context,
    ) -> EvalResult {
        self.consume_operand(object, Consumer::Instr(id), ctx)?;
        let targets = self.locations_of(target, ctx);
        for location in &targets {
            ctx.with_object(self.types, location, |o| {
                *o = Object::full(ObjectState::Initialized);
            });
        }
        Ok(())
    }

    fn eval_record(&mut self, id: InstrId, operands: &[Operand], ctx: &mut Context) -> EvalResult {
        for &operand in operands {
            self.consume_operand(operand, Consumer::Instr(id), ctx)?;
        }
        ctx.locals.insert(
            RegisterKey::Result(id, 0),
            Value::Object(Object::full(ObjectState::Initialized)),
        );
        Ok(())
    }

    fn eval_destructure(
        &mut self,
        id: InstrId,
        ty: veld_types::TypeId,
        object: Operand,
        ctx: &mut Context,
    ) -> EvalResult {
        self.consume_operand(object, Consumer::Instr(id), ctx)?;
        let part_count = self.types.parts(ty).len();
        assert!(part_count > 0, "destructure of non-record type {ty}");
        for k in 0..part_count {
            let k = u32::try_from(k).unwrap_or_else(|_| panic!("part index exceeds u32::MAX"));
            ctx.locals.insert(
                RegisterKey::Result(id, k),
                Value::Object(Object::full(ObjectState::Initialized)),
            );
        }
        Ok(())
    }

    fn eval_call(
        &mut self,
        id: InstrId,
        operands: &[Operand],
        conventions: &[Convention],
        ctx: &mut Context,
    ) -> EvalResult {
        debug_assert_eq!(operands.len(), conventions.len());
        for (&operand, &convention) in operands.iter().zip(conventions) {
            match convention {
                // Borrowing conventions leave the argument's state to
                // the callee's own analysis and the IR builder's
                // parameter bindings.
                Convention::Let | Convention::Inout | Convention::Set => {}
                Convention::Sink => self.consume_operand(operand, Consumer::Instr(id), ctx)?,
                Convention::Yielded => {
                    panic!("call argument with yielded convention (ill-formed IR)")
                }
            }
        }
        ctx.locals.insert(
            RegisterKey::Result(id, 0),
            Value::Object(Object::full(ObjectState::Initialized)),
        );
        Ok(())
    }

    fn eval_deinit(&mut self, id: InstrId, object: Operand, ctx: &mut Context) -> EvalResult {
        let key = object
            .register()
            .unwrap_or_else(|| panic!("deinit of a constant (ill-formed IR)"));
        self.consume(key, Consumer::Instr(id), ctx)
    }

    fn eval_dealloc_stack(
        &mut self,
        id: InstrId,
        location: Operand,
        ctx: &mut Context,
    ) -> EvalResult {
        let locations = self.locations_of(location, ctx);
        let Some(cell_location) = locations.first().cloned() else {
            panic!("dealloc_stack with an empty location set");
        };
        debug_assert!(
            locations.len() == 1 && matches!(cell_location, MemoryLocation::Inst(_)),
            "dealloc_stack must target exactly the cell of a dominating alloc_stack",
        );

        // Whatever still lives in the cell is loaded and deinitialized
        // before the deallocation; the cell then disappears.
        let summary = ctx.with_object(self.types, &cell_location, |o| o.summary());
        let initialized = summary.initialized_paths();
        for sub in &initialized {
            self.insert_unload(id, location, sub, &cell_location.appending(sub), ctx);
        }
        if !initialized.is_empty() {
            tracing::debug!(
                function = %self.func.name,
                instr = id.raw(),
                repairs = initialized.len(),
                "deinitialized live cell before dealloc_stack",
            );
        }
        ctx.memory.remove(&cell_location);
        Ok(())
    }

    // Shared helpers

    /// Insert `load` + `deinit` of the object at `target` immediately
    /// before instruction `anchor`, reading through `source` at `path`.
    fn insert_unload(
        &mut self,
        anchor: InstrId,
        source: Operand,
        path: &RecordPath,
        target: &MemoryLocation,
        ctx: &Context,
    ) {
        let ty = ctx.type_at(self.types, target);
        let load = self.func.insert(
            Op::Load {
                ty,
                source,
                path: path.clone(),
            },
            None,
            InsertionPoint::Before(anchor),
        );
        self.func.insert(
            Op::Deinit {
                object: Operand::result(load),
            },
            None,
            InsertionPoint::Before(anchor),
        );
    }

    /// Consume the object held by `key`: fully initialized objects
    /// transition to consumed; anything else is an illegal move.
    fn consume(&mut self, key: RegisterKey, by: Consumer, ctx: &mut Context) -> EvalResult {
        let value = ctx
            .locals
            .get_mut(&key)
            .unwrap_or_else(|| panic!("consumed register {key:?} has no value"));
        let Value::Object(object) = value else {
            panic!("consume of a location-valued register (ill-typed IR)");
        };
        let summary = object.summary();
        if matches!(summary, Summary::FullyInitialized) {
            *object = Object::full(ObjectState::consumed_by(by));
            Ok(())
        } else {
            Err(self.illegal_move(&summary, by))
        }
    }

    /// [`consume`](Self::consume), skipping constants (they are
    /// immutable and cannot be moved from).
    fn consume_operand(&mut self, operand: Operand, by: Consumer, ctx: &mut Context) -> EvalResult {
        match operand.register() {
            None => Ok(()),
            Some(key) => self.consume(key, by, ctx),
        }
    }

    /// The location set a storage operand resolves to.
    fn locations_of(&self, operand: Operand, ctx: &Context) -> BTreeSet<MemoryLocation> {
        let key = operand
            .register()
            .unwrap_or_else(|| panic!("constant-rooted storage operand (not supported)"));
        match ctx.locals.get(&key) {
            Some(Value::Locations(locations)) => locations.clone(),
            Some(Value::Object(_)) => {
                panic!("expected a location-valued register at {key:?} (ill-typed IR)")
            }
            None => panic!("storage register {key:?} has no value"),
        }
    }

    // Diagnostics

    fn span_of(&self, at: Consumer) -> Span {
        match at {
            Consumer::Instr(id) => self.func.instr(id).span,
            Consumer::Terminator(block) => self.func.block(block).terminator_span,
        }
        .unwrap_or(Span::DUMMY)
    }

    fn diagnose(&mut self, code: ErrorCode, message: &str, at: Consumer, label: &str) -> Abort {
        let diagnostic = Diagnostic::error(code)
            .with_message(message)
            .with_label(self.span_of(at).first(), label);
        self.diagnostics.push(diagnostic);
        Abort
    }

    /// Report a read of an object that is not fully initialized,
    /// pointing at the consumers when the state remembers them.
    fn diagnose_use(&mut self, summary: &Summary, at: Consumer) -> Abort {
        let (code, message) = match summary {
            Summary::FullyUninitialized => (
                ErrorCode::UseOfUninitializedObject,
                "use of uninitialized object",
            ),
            Summary::FullyConsumed(_) => (ErrorCode::UseOfConsumedObject, "use of consumed object"),
            Summary::PartiallyInitialized(_) => (
                ErrorCode::UseOfPartiallyInitializedObject,
                "use of partially initialized object",
            ),
            Summary::PartiallyConsumed { .. } => (
                ErrorCode::UseOfPartiallyConsumedObject,
                "use of partially consumed object",
            ),
            Summary::FullyInitialized => {
                unreachable!("fully initialized object reported as a misuse")
            }
        };
        let mut diagnostic = Diagnostic::error(code)
            .with_message(message)
            .with_label(self.span_of(at).first(), "used here");
        if let Summary::FullyConsumed(consumers) | Summary::PartiallyConsumed { consumers, .. } =
            summary
        {
            for &consumer in consumers {
                diagnostic = diagnostic
                    .with_secondary_label(self.span_of(consumer).first(), "object consumed here");
            }
        }
        self.diagnostics.push(diagnostic);
        Abort
    }

    /// Report a move out of an object that is not fully initialized.
    fn illegal_move(&mut self, summary: &Summary, at: Consumer) -> Abort {
        let mut diagnostic = Diagnostic::error(ErrorCode::IllegalMove)
            .with_message("illegal move")
            .with_label(self.span_of(at).first(), "moved here");
        if let Summary::FullyConsumed(consumers) | Summary::PartiallyConsumed { consumers, .. } =
            summary
        {
            for &consumer in consumers {
                diagnostic = diagnostic
                    .with_secondary_label(self.span_of(consumer).first(), "object consumed here");
            }
        }
        self.diagnostics.push(diagnostic);
        Abort
    }
}
