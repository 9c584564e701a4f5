//! Universal properties the pipeline must hold for any module (spec.md
//! §8.1), checked directly at the `mir`/`opt`/`backend` layer rather than
//! through AST source — each property names the invariant it is
//! checking in its test name.

mod support;

use minzc::ast::{BinaryOp, Item, Type};
use minzc::backend::z80::smc;
use minzc::mir::interp::Interpreter;
use minzc::mir::{self, Function, Instruction, Opcode, Operand, Width};
use minzc::{opt, sema};
use support::*;

/// Every register operand a function's instructions reference must be
/// one that function actually allocated, and every jump target must be
/// an in-bounds instruction index. `mir::validate` is the pipeline's own
/// gate for this (invoked by `lib::compile` before optimization).
#[test]
fn validate_rejects_a_module_with_a_dangling_register() {
    let mut f = Function::new("broken");
    f.alloc_register(Width::W8);
    f.push(Instruction::ret(Some(mir::Register(99)), Width::W8));

    let mut module = mir::Module::new();
    module.functions.push(f);

    assert!(mir::validate(&module).is_err());
}

#[test]
fn validate_accepts_a_well_formed_module() {
    let add = function(
        "add",
        vec![param("a", Type::U8), param("b", Type::U8)],
        Type::U8,
        None,
        vec![stmt(returns(binary(BinaryOp::Add, var("a"), var("b"))))],
    );
    let module = module(vec![Item::Function(add)]);
    let analysis = sema::analyze(&module);
    assert!(mir::validate(&analysis.mir).is_ok());
}

/// A function the purity pass marks `Some(true)` must contain no
/// `Push`/`Pop`/`Patch` instruction anywhere in its own body — those are
/// exactly the opcodes that make a function impure regardless of
/// whether they touch actual I/O (§4.3, `opt::purity`).
#[test]
fn pure_functions_contain_no_stack_or_patch_instructions() {
    let add_and_main = {
        let add = function(
            "add",
            vec![param("a", Type::U8), param("b", Type::U8)],
            Type::U8,
            None,
            vec![stmt(returns(binary(BinaryOp::Add, var("a"), var("b"))))],
        );
        let main = function(
            "main",
            vec![],
            Type::U8,
            None,
            vec![stmt(returns(call("add", vec![int(5), int(3)])))],
        );
        module(vec![Item::Function(add), Item::Function(main)])
    };

    let analysis = sema::analyze(&add_and_main);
    let mut mir_module = analysis.mir;
    opt::purity::run(&mut mir_module);

    for f in &mir_module.functions {
        if f.is_pure == Some(true) {
            assert!(
                !f.instructions.iter().any(|i| matches!(
                    i.opcode,
                    Opcode::Push | Opcode::Pop | Opcode::Patch
                )),
                "{} is marked pure but contains a stack/patch instruction",
                f.name
            );
        }
    }
}

/// Whatever CTIE folds a pure call's constant arguments down to must
/// equal what the shared interpreter produces for the same arguments —
/// CTIE (`opt::ctie`) and the property check both ultimately call
/// `mir::interp::Interpreter::run`, so this pins CTIE's folded constant
/// to that single source of truth rather than re-deriving arithmetic.
#[test]
fn ctie_folded_constant_matches_direct_interpretation() {
    let add = function(
        "add",
        vec![param("a", Type::U8), param("b", Type::U8)],
        Type::U8,
        None,
        vec![stmt(returns(binary(BinaryOp::Add, var("a"), var("b"))))],
    );
    let main = function(
        "main",
        vec![],
        Type::U8,
        None,
        vec![stmt(returns(call("add", vec![int(5), int(3)])))],
    );
    let ast_module = module(vec![Item::Function(add), Item::Function(main)]);

    let analysis = sema::analyze(&ast_module);
    let mut mir_module = analysis.mir;
    opt::run_to_fixed_point(&mut mir_module, &minzc::config::OptimizationFlags::all())
        .expect("pipeline converges");

    let main_fn = mir_module.function("main").expect("main lowered");
    let folded = main_fn
        .instructions
        .iter()
        .find_map(|i| match (i.opcode, i.src1) {
            (Opcode::LoadConst, Operand::Imm(v)) => Some(v),
            _ => None,
        })
        .expect("main should hold a folded constant");

    // Re-derive the unoptimized callee's own semantics directly, as a
    // cross-check independent of the CTIE pass that produced `folded`.
    let fresh = sema::analyze(&ast_module).mir;
    let add_fn = fresh.function("add$u8$u8").expect("add lowered");
    let interpreted = match Interpreter::new(&fresh).run(add_fn, &[5, 3]) {
        mir::interp::InterpResult::Returned(Some(v)) => v,
        other => panic!("expected add(5, 3) to return a value, got {other:?}"),
    };

    assert_eq!(folded, interpreted);
}

/// Every SMC-eligible function gets exactly one anchor per declared
/// parameter, used or not (`backend::z80::smc::plan_anchors`), and no
/// parameter index is anchored twice.
#[test]
fn smc_anchors_never_exceed_one_per_parameter() {
    let add8 = function(
        "add8",
        vec![param("x", Type::U8), param("y", Type::U8)],
        Type::U8,
        None,
        vec![stmt(returns(binary(BinaryOp::Add, var("x"), var("y"))))],
    );
    let ast_module = module(vec![Item::Function(add8)]);
    let analysis = sema::analyze(&ast_module);
    let f = analysis.mir.function("add8$u8$u8").expect("add8 lowered");

    assert!(smc::is_eligible(f));
    let anchors = smc::plan_anchors(f);
    assert_eq!(anchors.len(), f.params.len());

    let mut seen = std::collections::HashSet::new();
    for anchor in &anchors {
        assert!(seen.insert(anchor.param_index), "duplicate anchor for parameter {}", anchor.param_index);
    }
}
