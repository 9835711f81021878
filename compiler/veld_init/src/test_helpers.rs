//! Shared test utilities for the definite-initialization tests.
//!
//! Consolidates factory functions used across the lattice, context,
//! and pass tests. Only compiled in test builds.

use veld_ir::{Convention, Function, Module, Op, Param, Span};
use veld_types::{TypeId, TypePool};

/// A span starting at byte `n`, for pinning diagnostic positions.
pub(crate) fn sp(n: u32) -> Option<Span> {
    Some(Span::new(n, n + 4))
}

/// A `sink` parameter.
pub(crate) fn sink_param(ty: TypeId) -> Param {
    Param {
        convention: Convention::Sink,
        ty,
    }
}

/// A `let` parameter.
pub(crate) fn let_param(ty: TypeId) -> Param {
    Param {
        convention: Convention::Let,
        ty,
    }
}

/// A `set` parameter.
pub(crate) fn set_param(ty: TypeId) -> Param {
    Param {
        convention: Convention::Set,
        ty,
    }
}

/// Wrap a single function in a module, returning the module and id.
pub(crate) fn module_with(func: Function) -> (Module, veld_ir::FunctionId) {
    let mut module = Module::new("test");
    let id = module.add_function(func);
    (module, id)
}

/// Intern the two-int `Pair` record.
pub(crate) fn pair_type(pool: &mut TypePool) -> TypeId {
    pool.record("Pair", vec![TypeId::INT, TypeId::INT])
}

/// The mnemonics of a block's body, in order. Makes inserted-repair
/// assertions read like the IR itself.
pub(crate) fn mnemonics(func: &Function, block: veld_ir::BlockId) -> Vec<&'static str> {
    func.block(block)
        .body
        .iter()
        .map(|&id| func.instr(id).op.mnemonic())
        .collect()
}

/// Count occurrences of an opcode across the whole function.
pub(crate) fn count_ops(func: &Function, mnemonic: &str) -> usize {
    func.blocks()
        .iter()
        .flat_map(|b| b.body.iter())
        .filter(|&&id| func.instr(id).op.mnemonic() == mnemonic)
        .count()
}

/// True if the op at `id` is a synthetic (inserted) instruction.
pub(crate) fn is_synthetic(func: &Function, id: veld_ir::InstrId) -> bool {
    func.instr(id).span.is_none()
}

/// Shorthand for an `Op::Call` that sinks all of its operands.
pub(crate) fn sink_call(operands: Vec<veld_ir::Operand>, result: TypeId) -> Op {
    let conventions = vec![Convention::Sink; operands.len()];
    Op::Call {
        callee: "consume".to_owned(),
        operands,
        conventions,
        result,
    }
}
