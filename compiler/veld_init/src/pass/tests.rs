use pretty_assertions::assert_eq;

use veld_ir::{
    Constant, Convention, Function, Module, Op, Operand, RecordPath, Span, Terminator,
};
use veld_types::{TypeId, TypePool};

use crate::test_helpers::{
    count_ops, is_synthetic, let_param, mnemonics, module_with, pair_type, set_param, sink_call,
    sink_param, sp,
};

use super::DefiniteInitialization;

fn run(module: &mut Module, id: veld_ir::FunctionId, pool: &TypePool) -> (bool, DefiniteInitialization) {
    let mut pass = DefiniteInitialization::new();
    let ok = pass.run(module, id, pool);
    (ok, pass)
}

/// Re-running the pass on its own output must change nothing and
/// report nothing.
fn assert_idempotent(module: &mut Module, id: veld_ir::FunctionId, pool: &TypePool) {
    let instrs_before = module.function(id).num_instrs();
    let (ok, pass) = run(module, id, pool);
    assert!(ok, "second run failed: {:?}", pass.diagnostics());
    assert!(pass.diagnostics().is_empty());
    assert_eq!(module.function(id).num_instrs(), instrs_before);
}

// Straight-line success cases

#[test]
fn let_parameter_borrows_cleanly() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![let_param(TypeId::INT)], TypeId::UNIT);
    let entry = func.entry;
    let b = func.append(
        entry,
        Op::Borrow {
            capability: Convention::Let,
            source: Operand::param(0),
            path: RecordPath::empty(),
        },
        sp(0),
    );
    func.append(
        entry,
        Op::EndBorrow {
            borrow: Operand::result(b),
        },
        sp(4),
    );
    func.set_terminator(entry, Terminator::Return { value: None }, sp(8));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(ok, "{:?}", pass.diagnostics());
    assert!(pass.diagnostics().is_empty());
}

#[test]
fn set_parameter_accepts_a_store() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![set_param(TypeId::INT)], TypeId::UNIT);
    let entry = func.entry;
    func.append(
        entry,
        Op::Store {
            object: Operand::Constant(Constant::Int(7)),
            target: Operand::param(0),
        },
        sp(0),
    );
    func.set_terminator(entry, Terminator::Return { value: None }, sp(8));

    let (mut module, id) = module_with(func);
    let (ok, _) = run(&mut module, id, &pool);
    assert!(ok);
}

#[test]
fn sink_parameter_is_consumed_by_return() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![sink_param(TypeId::INT)], TypeId::INT);
    let entry = func.entry;
    func.set_terminator(
        entry,
        Terminator::Return {
            value: Some(Operand::param(0)),
        },
        sp(0),
    );

    let (mut module, id) = module_with(func);
    let (ok, _) = run(&mut module, id, &pool);
    assert!(ok);
}

#[test]
fn destructure_and_record_round_trip() {
    let mut pool = TypePool::new();
    let pair = pair_type(&mut pool);
    let mut func = Function::new("f", vec![sink_param(pair)], pair);
    let entry = func.entry;
    let parts = func.append(
        entry,
        Op::Destructure {
            ty: pair,
            object: Operand::param(0),
        },
        sp(0),
    );
    let rebuilt = func.append(
        entry,
        Op::Record {
            ty: pair,
            operands: vec![
                Operand::Register(veld_ir::RegisterKey::Result(parts, 0)),
                Operand::Register(veld_ir::RegisterKey::Result(parts, 1)),
            ],
        },
        sp(4),
    );
    func.set_terminator(
        entry,
        Terminator::Return {
            value: Some(Operand::result(rebuilt)),
        },
        sp(8),
    );

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(ok, "{:?}", pass.diagnostics());
}

// Diagnosed failures

#[test]
fn use_of_uninitialized_object() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let x = func.append(entry, Op::AllocStack { ty: TypeId::INT }, sp(0));
    func.append(
        entry,
        Op::Borrow {
            capability: Convention::Let,
            source: Operand::result(x),
            path: RecordPath::empty(),
        },
        sp(10),
    );
    func.set_terminator(entry, Terminator::Return { value: None }, sp(20));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(!ok);
    let diags = pass.diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "use of uninitialized object");
    assert_eq!(diags[0].primary_span(), Some(Span::point(10)));
}

#[test]
fn double_move_is_an_illegal_move() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![sink_param(TypeId::INT)], TypeId::UNIT);
    let entry = func.entry;
    func.append(entry, sink_call(vec![Operand::param(0)], TypeId::UNIT), sp(0));
    func.append(entry, sink_call(vec![Operand::param(0)], TypeId::UNIT), sp(8));
    func.set_terminator(entry, Terminator::Return { value: None }, sp(16));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(!ok);
    let diags = pass.diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "illegal move");
    assert_eq!(diags[0].primary_span(), Some(Span::point(8)));
    // Provenance: the secondary label points at the first move.
    let secondary: Vec<_> = diags[0].labels.iter().filter(|l| !l.is_primary).collect();
    assert_eq!(secondary.len(), 1);
    assert_eq!(secondary[0].span, Span::point(0));
}

#[test]
fn partial_initialization_is_reported_on_let_borrow() {
    let mut pool = TypePool::new();
    let pair = pair_type(&mut pool);
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let x = func.append(entry, Op::AllocStack { ty: pair }, sp(0));
    let first = func.append(
        entry,
        Op::Borrow {
            capability: Convention::Set,
            source: Operand::result(x),
            path: RecordPath::from_slice(&[0]),
        },
        sp(4),
    );
    func.append(
        entry,
        Op::Store {
            object: Operand::Constant(Constant::Int(1)),
            target: Operand::result(first),
        },
        sp(8),
    );
    func.append(
        entry,
        Op::Borrow {
            capability: Convention::Let,
            source: Operand::result(x),
            path: RecordPath::empty(),
        },
        sp(12),
    );
    func.set_terminator(entry, Terminator::Return { value: None }, sp(16));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(!ok);
    let diags = pass.diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "use of partially initialized object");
    assert_eq!(diags[0].primary_span(), Some(Span::point(12)));
}

#[test]
fn partial_consumption_is_reported_with_provenance() {
    let mut pool = TypePool::new();
    let pair = pair_type(&mut pool);
    let mut func = Function::new("f", vec![let_param(pair)], TypeId::UNIT);
    let entry = func.entry;
    // Reading one part out of a borrowed-let argument is fine for the
    // load itself; the whole object is then partially consumed.
    func.append(
        entry,
        Op::Load {
            ty: TypeId::INT,
            source: Operand::param(0),
            path: RecordPath::from_slice(&[0]),
        },
        sp(0),
    );
    func.append(
        entry,
        Op::Borrow {
            capability: Convention::Let,
            source: Operand::param(0),
            path: RecordPath::empty(),
        },
        sp(8),
    );
    func.set_terminator(entry, Terminator::Return { value: None }, sp(16));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(!ok);
    let diags = pass.diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "use of partially consumed object");
    let secondary: Vec<_> = diags[0].labels.iter().filter(|l| !l.is_primary).collect();
    assert_eq!(secondary.len(), 1);
    assert_eq!(secondary[0].span, Span::point(0), "points at the consuming load");
}

#[test]
fn reallocation_in_a_loop_is_unbounded() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let header = func.add_block();
    let exit = func.add_block();
    func.set_terminator(entry, Terminator::Branch { target: header }, sp(0));
    func.append(header, Op::AllocStack { ty: TypeId::INT }, sp(4));
    func.set_terminator(
        header,
        Terminator::CondBranch {
            condition: Operand::Constant(Constant::Bool(true)),
            on_true: header,
            on_false: exit,
        },
        sp(8),
    );
    func.set_terminator(exit, Terminator::Return { value: None }, sp(12));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(!ok);
    let diags = pass.diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "unbounded stack allocation");
    assert_eq!(diags[0].primary_span(), Some(Span::point(4)));
}

// Repairs

#[test]
fn set_borrow_over_initialized_storage_is_repaired() {
    let mut pool = TypePool::new();
    let pair = pair_type(&mut pool);
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let x = func.append(entry, Op::AllocStack { ty: pair }, sp(0));
    let r = func.append(
        entry,
        Op::Record {
            ty: pair,
            operands: vec![
                Operand::Constant(Constant::Int(1)),
                Operand::Constant(Constant::Int(2)),
            ],
        },
        sp(4),
    );
    func.append(
        entry,
        Op::Store {
            object: Operand::result(r),
            target: Operand::result(x),
        },
        sp(8),
    );
    func.append(
        entry,
        Op::Borrow {
            capability: Convention::Set,
            source: Operand::result(x),
            path: RecordPath::empty(),
        },
        sp(12),
    );
    func.set_terminator(entry, Terminator::Return { value: None }, sp(16));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(ok, "{:?}", pass.diagnostics());
    assert!(pass.diagnostics().is_empty());

    let func = module.function(id);
    assert_eq!(
        mnemonics(func, entry),
        vec!["alloc_stack", "record", "store", "load", "deinit", "borrow"],
    );
    // The repair loads the whole pair right before the borrow.
    let load_id = func.block(entry).body[3];
    assert!(is_synthetic(func, load_id));
    let Op::Load { ty, path, .. } = &func.instr(load_id).op else {
        panic!("expected a load");
    };
    assert_eq!(*ty, pair);
    assert!(path.is_empty());

    assert_idempotent(&mut module, id, &pool);
}

#[test]
fn dealloc_of_a_live_cell_is_repaired() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let x = func.append(entry, Op::AllocStack { ty: TypeId::INT }, sp(0));
    func.append(
        entry,
        Op::Store {
            object: Operand::Constant(Constant::Int(3)),
            target: Operand::result(x),
        },
        sp(4),
    );
    func.append(
        entry,
        Op::DeallocStack {
            location: Operand::result(x),
        },
        sp(8),
    );
    func.set_terminator(entry, Terminator::Return { value: None }, sp(12));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(ok, "{:?}", pass.diagnostics());

    let func = module.function(id);
    assert_eq!(
        mnemonics(func, entry),
        vec!["alloc_stack", "store", "load", "deinit", "dealloc_stack"],
    );

    assert_idempotent(&mut module, id, &pool);
}

#[test]
fn divergent_initialization_is_reconciled_at_the_merge() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let then_block = func.add_block();
    let else_block = func.add_block();
    let merge = func.add_block();

    let x = func.append(entry, Op::AllocStack { ty: TypeId::INT }, sp(0));
    func.set_terminator(
        entry,
        Terminator::CondBranch {
            condition: Operand::Constant(Constant::Bool(true)),
            on_true: then_block,
            on_false: else_block,
        },
        sp(4),
    );
    // Only the then-branch initializes the cell.
    func.append(
        then_block,
        Op::Store {
            object: Operand::Constant(Constant::Int(1)),
            target: Operand::result(x),
        },
        sp(8),
    );
    func.set_terminator(then_block, Terminator::Branch { target: merge }, sp(12));
    func.set_terminator(else_block, Terminator::Branch { target: merge }, sp(16));
    func.set_terminator(merge, Terminator::Return { value: None }, sp(20));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(ok, "{:?}", pass.diagnostics());
    assert!(pass.diagnostics().is_empty());

    let func = module.function(id);
    // The initializing predecessor deinitializes the cell at its tail.
    assert_eq!(mnemonics(func, then_block), vec!["store", "load", "deinit"]);
    assert_eq!(mnemonics(func, else_block), Vec::<&str>::new());
    assert_eq!(mnemonics(func, merge), Vec::<&str>::new());
    for &id in &func.block(then_block).body[1..] {
        assert!(is_synthetic(func, id));
    }

    assert_idempotent(&mut module, id, &pool);
}

#[test]
fn consumed_rvalue_is_reconciled_with_a_bare_deinit() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let then_block = func.add_block();
    let else_block = func.add_block();
    let merge = func.add_block();

    let obj = func.append(
        entry,
        Op::Call {
            callee: "make".to_owned(),
            operands: vec![],
            conventions: vec![],
            result: TypeId::INT,
        },
        sp(0),
    );
    func.set_terminator(
        entry,
        Terminator::CondBranch {
            condition: Operand::Constant(Constant::Bool(true)),
            on_true: then_block,
            on_false: else_block,
        },
        sp(4),
    );
    // Only the then-branch consumes the call result.
    func.append(
        then_block,
        sink_call(vec![Operand::result(obj)], TypeId::UNIT),
        sp(8),
    );
    func.set_terminator(then_block, Terminator::Branch { target: merge }, sp(12));
    func.set_terminator(else_block, Terminator::Branch { target: merge }, sp(16));
    func.set_terminator(merge, Terminator::Return { value: None }, sp(20));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(ok, "{:?}", pass.diagnostics());

    let func = module.function(id);
    // The non-consuming predecessor gets a bare deinit (the register is
    // an rvalue, so there is nothing to load).
    assert_eq!(mnemonics(func, else_block), vec!["deinit"]);
    assert_eq!(mnemonics(func, then_block), vec!["call"]);
    assert_eq!(count_ops(func, "load"), 0);

    assert_idempotent(&mut module, id, &pool);
}

#[test]
fn agreeing_branches_need_no_repair() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let then_block = func.add_block();
    let else_block = func.add_block();
    let merge = func.add_block();

    let x = func.append(entry, Op::AllocStack { ty: TypeId::INT }, sp(0));
    func.set_terminator(
        entry,
        Terminator::CondBranch {
            condition: Operand::Constant(Constant::Bool(true)),
            on_true: then_block,
            on_false: else_block,
        },
        sp(4),
    );
    for (block, at) in [(then_block, 8), (else_block, 12)] {
        func.append(
            block,
            Op::Store {
                object: Operand::Constant(Constant::Int(1)),
                target: Operand::result(x),
            },
            sp(at),
        );
        func.set_terminator(block, Terminator::Branch { target: merge }, sp(at + 2));
    }
    let b = func.append(
        merge,
        Op::Borrow {
            capability: Convention::Let,
            source: Operand::result(x),
            path: RecordPath::empty(),
        },
        sp(16),
    );
    func.append(
        merge,
        Op::EndBorrow {
            borrow: Operand::result(b),
        },
        sp(20),
    );
    func.set_terminator(merge, Terminator::Return { value: None }, sp(24));

    let (mut module, id) = module_with(func);
    let instrs_before = module.function(id).num_instrs();
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(ok, "{:?}", pass.diagnostics());
    assert_eq!(module.function(id).num_instrs(), instrs_before);
}

#[test]
fn benign_self_loop_converges() {
    let pool = TypePool::new();
    let mut func = Function::new("f", vec![], TypeId::UNIT);
    let entry = func.entry;
    let header = func.add_block();
    let exit = func.add_block();
    func.set_terminator(entry, Terminator::Branch { target: header }, sp(0));
    func.set_terminator(
        header,
        Terminator::CondBranch {
            condition: Operand::Constant(Constant::Bool(true)),
            on_true: header,
            on_false: exit,
        },
        sp(4),
    );
    func.set_terminator(exit, Terminator::Return { value: None }, sp(8));

    let (mut module, id) = module_with(func);
    let (ok, pass) = run(&mut module, id, &pool);
    assert!(ok, "{:?}", pass.diagnostics());
    assert!(pass.diagnostics().is_empty());
}

#[test]
fn flush_orders_diagnostics_by_source_position() {
    // A single run reports at most one diagnostic, so exercise the
    // ordering across two functions sharing one pass.
    let pool = TypePool::new();
    let mut module = Module::new("test");

    let mut late = Function::new("late", vec![sink_param(TypeId::INT)], TypeId::UNIT);
    let entry = late.entry;
    late.append(entry, sink_call(vec![Operand::param(0)], TypeId::UNIT), sp(40));
    late.append(entry, sink_call(vec![Operand::param(0)], TypeId::UNIT), sp(48));
    late.set_terminator(entry, Terminator::Return { value: None }, sp(56));
    let late_id = module.add_function(late);

    let mut early = Function::new("early", vec![sink_param(TypeId::INT)], TypeId::UNIT);
    let entry = early.entry;
    early.append(entry, sink_call(vec![Operand::param(0)], TypeId::UNIT), sp(0));
    early.append(entry, sink_call(vec![Operand::param(0)], TypeId::UNIT), sp(8));
    early.set_terminator(entry, Terminator::Return { value: None }, sp(16));
    let early_id = module.add_function(early);

    let mut pass = DefiniteInitialization::new();
    assert!(!pass.run(&mut module, late_id, &pool));
    assert!(!pass.run(&mut module, early_id, &pool));

    let sorted = pass.flush_diagnostics();
    assert_eq!(sorted.len(), 2);
    assert_eq!(sorted[0].primary_span(), Some(Span::point(8)));
    assert_eq!(sorted[1].primary_span(), Some(Span::point(48)));
}
