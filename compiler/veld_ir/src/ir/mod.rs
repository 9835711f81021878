//! Veld IR — basic-block intermediate representation.
//!
//! The IR is SSA-flavoured: every value-producing instruction defines one
//! or more *registers* ([`RegisterKey`]), blocks end in a single
//! [`Terminator`], and control flow references blocks by [`BlockId`].
//! Storage is explicit — `alloc_stack` / `dealloc_stack` bracket stack
//! cells, `borrow` produces symbolic addresses, and `load` / `store` /
//! `deinit` move objects in and out of them.
//!
//! # Stable instruction addressing
//!
//! Analysis passes key long-lived facts (consumer sets, symbolic memory
//! locations) by instruction identity, and the definite-initialization
//! pass *inserts* instructions while it iterates. Both work because
//! instructions live in a function-wide arena and a block's body is an
//! ordered list of [`InstrId`]s: insertion allocates a fresh id and
//! splices it into the order, so existing ids never move or change
//! meaning.

use std::fmt;

use smallvec::{smallvec, SmallVec};

use veld_types::{TypeId, TypePool};

use crate::Span;

// ID newtypes

/// Instruction ID within a function.
///
/// Ids are allocated sequentially from 0 and remain valid for the life of
/// the function, regardless of later insertions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct InstrId(u32);

impl InstrId {
    /// Create a new instruction ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into the arena).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Basic block ID within a function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    /// Create a new block ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Function ID within a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FunctionId(u32);

impl FunctionId {
    /// Create a new function ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the index as `usize`.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// Conventions

/// Parameter-passing convention.
///
/// Conventions govern how an argument's object crosses a function (or
/// borrow) boundary: by immutable borrow, mutable borrow, write-only
/// borrow into uninitialized storage, ownership transfer, or coroutine
/// yield slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Convention {
    /// Immutable borrow of initialized storage.
    Let,
    /// Mutable borrow of initialized storage.
    Inout,
    /// Write-only borrow of uninitialized storage.
    Set,
    /// Ownership transfer into the callee.
    Sink,
    /// Coroutine yield slot. Never instantiated in analyzed IR.
    Yielded,
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Convention::Let => "let",
            Convention::Inout => "inout",
            Convention::Set => "set",
            Convention::Sink => "sink",
            Convention::Yielded => "yielded",
        })
    }
}

// Record paths

/// A path of stored-part offsets identifying a sub-object.
///
/// The empty path identifies the whole object. Paths compare
/// lexicographically, which analysis passes rely on for deterministic
/// repair ordering.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RecordPath(SmallVec<[u32; 4]>);

impl RecordPath {
    /// The empty path (the whole object).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a path from part offsets.
    pub fn from_slice(offsets: &[u32]) -> Self {
        Self(SmallVec::from_slice(offsets))
    }

    /// Whether this is the empty path.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of path steps.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The offsets as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Append one offset in place.
    pub fn push(&mut self, offset: u32) {
        self.0.push(offset);
    }

    /// This path extended by `suffix`.
    #[must_use]
    pub fn appending(&self, suffix: &RecordPath) -> RecordPath {
        let mut out = self.clone();
        out.0.extend_from_slice(&suffix.0);
        out
    }
}

impl fmt::Debug for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordPath({self})")
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("[]");
        }
        for (i, offset) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{offset}")?;
        }
        Ok(())
    }
}

// Operands

/// A compile-time constant operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Bool(bool),
    Unit,
}

/// Identity of a register: either a parameter slot or the `index`-th
/// result of an instruction.
///
/// Most instructions produce a single result (index 0); `destructure`
/// produces one result per stored part of its operand's record type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterKey {
    /// The i-th function parameter.
    Param(u32),
    /// The `index`-th result of an instruction.
    Result(InstrId, u32),
}

/// An instruction operand: a register or a constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(RegisterKey),
    Constant(Constant),
}

impl Operand {
    /// Operand reading the i-th parameter.
    pub fn param(i: u32) -> Self {
        Operand::Register(RegisterKey::Param(i))
    }

    /// Operand reading the (single) result of `instr`.
    pub fn result(instr: InstrId) -> Self {
        Operand::Register(RegisterKey::Result(instr, 0))
    }

    /// The register this operand reads, if it is not a constant.
    pub fn register(self) -> Option<RegisterKey> {
        match self {
            Operand::Register(key) => Some(key),
            Operand::Constant(_) => None,
        }
    }

    /// Whether this operand is a constant.
    pub fn is_constant(self) -> bool {
        matches!(self, Operand::Constant(_))
    }
}

// Opcodes

/// An instruction opcode with its operands.
///
/// This is the full set the definite-initialization pass recognizes.
/// The IR builder never produces anything else; an unknown opcode at
/// analysis time is ill-formed IR.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Allocate an uninitialized stack cell of type `ty`.
    /// Result: the cell's symbolic address.
    AllocStack { ty: TypeId },

    /// Borrow the sub-object at `path` within the storage `source`
    /// points to, under `capability` (`let`, `inout`, or `set`).
    /// Result: a symbolic address.
    Borrow {
        capability: Convention,
        source: Operand,
        path: RecordPath,
    },

    /// Move the object of type `ty` at `path` within `source`'s storage
    /// out of memory. Result: the loaded object.
    Load {
        ty: TypeId,
        source: Operand,
        path: RecordPath,
    },

    /// Move `object` into the storage `target` points to.
    Store { object: Operand, target: Operand },

    /// Construct a record of type `ty` from per-part objects.
    /// Result: the record object.
    Record { ty: TypeId, operands: Vec<Operand> },

    /// Split a record object of type `ty` into its stored parts.
    /// Results: one object per part.
    Destructure { ty: TypeId, object: Operand },

    /// Apply `callee` to `operands`, passing each under the matching
    /// convention. Result: the callee's return object.
    Call {
        callee: String,
        operands: Vec<Operand>,
        conventions: Vec<Convention>,
        result: TypeId,
    },

    /// Destroy an owned object.
    Deinit { object: Operand },

    /// Release the stack cell `location` points to. The cell must hold
    /// no live object.
    DeallocStack { location: Operand },

    /// End the access that produced `borrow`.
    EndBorrow { borrow: Operand },
}

impl Op {
    /// The opcode's textual mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::AllocStack { .. } => "alloc_stack",
            Op::Borrow { .. } => "borrow",
            Op::Load { .. } => "load",
            Op::Store { .. } => "store",
            Op::Record { .. } => "record",
            Op::Destructure { .. } => "destructure",
            Op::Call { .. } => "call",
            Op::Deinit { .. } => "deinit",
            Op::DeallocStack { .. } => "dealloc_stack",
            Op::EndBorrow { .. } => "end_borrow",
        }
    }

    /// How many result registers this opcode defines.
    ///
    /// `destructure` defines one result per stored part of its record
    /// type; side-effect-only opcodes define none.
    pub fn result_count(&self, types: &TypePool) -> u32 {
        match self {
            Op::AllocStack { .. }
            | Op::Borrow { .. }
            | Op::Load { .. }
            | Op::Record { .. }
            | Op::Call { .. } => 1,
            Op::Destructure { ty, .. } => {
                u32::try_from(types.parts(*ty).len())
                    .unwrap_or_else(|_| panic!("record part count exceeds u32::MAX"))
            }
            Op::Store { .. }
            | Op::Deinit { .. }
            | Op::DeallocStack { .. }
            | Op::EndBorrow { .. } => 0,
        }
    }
}

// Instructions

/// An instruction in the function arena: opcode, source range, and the
/// block that currently contains it.
///
/// `span` is `None` for synthetic instructions inserted by analysis
/// repairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instr {
    /// The opcode with operands.
    pub op: Op,
    /// Originating source range; `None` for inserted code.
    pub span: Option<Span>,
    /// The block whose body contains this instruction.
    pub block: BlockId,
}

// Terminators

/// Block terminator — how control leaves a basic block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    /// Unconditional jump.
    Branch { target: BlockId },

    /// Two-way branch on a boolean object.
    CondBranch {
        condition: Operand,
        on_true: BlockId,
        on_false: BlockId,
    },

    /// Return from the function, optionally yielding an object.
    Return { value: Option<Operand> },

    /// Marks a block as unreachable.
    Unreachable,
}

impl Terminator {
    /// Successor blocks of this terminator.
    ///
    /// Returns `SmallVec<[BlockId; 2]>`: at most two successors exist.
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Terminator::Branch { target } => smallvec![*target],
            Terminator::CondBranch {
                on_true, on_false, ..
            } => smallvec![*on_true, *on_false],
            Terminator::Return { .. } | Terminator::Unreachable => SmallVec::new(),
        }
    }
}

// Blocks

/// A basic block: an ordered body of instruction ids and a terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// This block's identifier.
    pub id: BlockId,
    /// Instruction order. Entries index the function's arena.
    pub body: Vec<InstrId>,
    /// How control leaves this block.
    pub terminator: Terminator,
    /// Source range of the terminator; `None` for synthetic blocks.
    pub terminator_span: Option<Span>,
}

// Functions

/// A function parameter: its passing convention and type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Param {
    pub convention: Convention,
    pub ty: TypeId,
}

/// Where to insert a new instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertionPoint {
    /// Immediately before an existing instruction, in its block.
    Before(InstrId),
    /// At the end of a block's body, before its terminator.
    BeforeTerminator(BlockId),
}

/// A complete function: signature, blocks, and the instruction arena.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    /// The function's mangled name.
    pub name: String,
    /// Parameters with conventions.
    pub params: Vec<Param>,
    /// The return type.
    pub return_type: TypeId,
    /// The entry block.
    pub entry: BlockId,
    blocks: Vec<Block>,
    instrs: Vec<Instr>,
}

impl Function {
    /// Create a function with a single empty entry block terminated by
    /// `unreachable`. Callers add instructions and retarget terminators
    /// through the builder methods.
    pub fn new(name: impl Into<String>, params: Vec<Param>, return_type: TypeId) -> Self {
        let mut func = Self {
            name: name.into(),
            params,
            return_type,
            entry: BlockId::new(0),
            blocks: Vec::new(),
            instrs: Vec::new(),
        };
        func.add_block();
        func
    }

    /// Append a new empty block (terminator `unreachable`) and return
    /// its id.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(
            u32::try_from(self.blocks.len())
                .unwrap_or_else(|_| panic!("block count exceeds u32::MAX")),
        );
        self.blocks.push(Block {
            id,
            body: Vec::new(),
            terminator: Terminator::Unreachable,
            terminator_span: None,
        });
        id
    }

    /// All blocks in id order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Look up a block.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Look up an instruction in the arena.
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.index()]
    }

    /// Number of instructions ever allocated (inserted repairs included).
    pub fn num_instrs(&self) -> usize {
        self.instrs.len()
    }

    /// Replace a block's terminator.
    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator, span: Option<Span>) {
        let b = &mut self.blocks[block.index()];
        b.terminator = terminator;
        b.terminator_span = span;
    }

    /// Append an instruction at the end of `block`'s body.
    pub fn append(&mut self, block: BlockId, op: Op, span: Option<Span>) -> InstrId {
        self.insert(op, span, InsertionPoint::BeforeTerminator(block))
    }

    /// Insert an instruction at `point`, returning its fresh id.
    ///
    /// Existing instruction ids are unaffected: the new instruction is
    /// allocated at the end of the arena and spliced into the owning
    /// block's order.
    ///
    /// # Panics
    ///
    /// Panics if `point` names an instruction that is not in its block's
    /// body (arena corruption — cannot happen through this API).
    pub fn insert(&mut self, op: Op, span: Option<Span>, point: InsertionPoint) -> InstrId {
        let id = InstrId::new(
            u32::try_from(self.instrs.len())
                .unwrap_or_else(|_| panic!("instruction count exceeds u32::MAX")),
        );
        let (block, position) = match point {
            InsertionPoint::Before(anchor) => {
                let block = self.instrs[anchor.index()].block;
                let body = &self.blocks[block.index()].body;
                let position = body
                    .iter()
                    .position(|&i| i == anchor)
                    .unwrap_or_else(|| {
                        panic!("instruction {} not in body of its block", anchor.raw())
                    });
                (block, position)
            }
            InsertionPoint::BeforeTerminator(block) => {
                (block, self.blocks[block.index()].body.len())
            }
        };
        self.instrs.push(Instr { op, span, block });
        self.blocks[block.index()].body.insert(position, id);
        id
    }

    /// Check structural well-formedness: entry exists, terminator
    /// targets are in range, bodies and the arena agree on ownership,
    /// and call conventions match operand counts.
    ///
    /// # Panics
    ///
    /// Panics on the first violation. Ill-formed IR is a bug in the
    /// producing pass, not a user error.
    pub fn validate(&self) {
        assert!(
            self.entry.index() < self.blocks.len(),
            "function {}: entry block {} out of range",
            self.name,
            self.entry.raw(),
        );
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                assert!(
                    succ.index() < self.blocks.len(),
                    "function {}: block {} targets missing block {}",
                    self.name,
                    block.id.raw(),
                    succ.raw(),
                );
            }
            for &id in &block.body {
                let instr = &self.instrs[id.index()];
                assert!(
                    instr.block == block.id,
                    "function {}: instruction {} listed in block {} but owned by {}",
                    self.name,
                    id.raw(),
                    block.id.raw(),
                    instr.block.raw(),
                );
                if let Op::Call {
                    operands,
                    conventions,
                    ..
                } = &instr.op
                {
                    assert!(
                        operands.len() == conventions.len(),
                        "function {}: call {} has {} operands but {} conventions",
                        self.name,
                        id.raw(),
                        operands.len(),
                        conventions.len(),
                    );
                }
            }
        }
    }
}

// Modules

/// A translation unit: a named collection of functions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Module {
    /// The module's name.
    pub name: String,
    functions: Vec<Function>,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Add a function, returning its id.
    pub fn add_function(&mut self, function: Function) -> FunctionId {
        let id = FunctionId::new(
            u32::try_from(self.functions.len())
                .unwrap_or_else(|_| panic!("function count exceeds u32::MAX")),
        );
        self.functions.push(function);
        id
    }

    /// Look up a function.
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    /// Look up a function mutably.
    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    /// All functions in id order.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }
}
