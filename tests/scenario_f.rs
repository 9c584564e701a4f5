//! Scenario F (spec.md §8.3): DJNZ loop formation.
//!
//! One suite drives the pattern end-to-end from an AST `while` loop
//! shaped like `while i != 0 { ...; i = i - 1; }`, which
//! `sema::lower::lower_while` now rotates into the decrement-compare-
//! conditional-back-jump shape `opt::djnz::annotate_function` looks for.
//! The other is built directly at the MIR level, mirroring `opt::djnz`'s
//! own `counted_loop()` test helper, to pin the backend's DJNZ rewrite
//! independent of how a loop reached that MIR shape.

mod support;

use minzc::ast::{BinaryOp, Item, Type};
use minzc::backend::{Backend, z80::Z80Backend};
use minzc::config::OptimizationFlags;
use minzc::mir::{Function, Instruction, Label, Module, Opcode, Width};
use minzc::{opt, sema};
use support::*;

fn countdown_module() -> Module {
    let mut f = Function::new("countdown");
    let counter = f.alloc_register(Width::W8);
    let cmp = f.alloc_register(Width::W8);
    f.params = vec![(counter, Width::W8)];

    let loop_start = f.instructions.len() as u32;
    f.push(Instruction::binary_imm(Opcode::Sub, counter, counter, 1, Width::W8));
    f.push(Instruction::binary_imm(Opcode::CmpNe, cmp, counter, 0, Width::W8));
    f.push(Instruction::jump_if(Opcode::JumpIfTrue, cmp, Label(loop_start), Width::W8));
    f.push(Instruction::ret(None, Width::W8));

    let mut module = Module::new();
    module.functions.push(f);
    module
}

#[test]
fn counted_loop_lowers_to_a_single_djnz_instruction() {
    let mut module = countdown_module();
    opt::djnz::run(&mut module);

    let backend = Z80Backend;
    let program = backend.compile(&module).expect("countdown compiles");

    assert!(program.source.contains("DJNZ"), "expected a DJNZ instruction:\n{}", program.source);
    assert!(
        !program.source.contains("DEC B"),
        "DJNZ replaces the decrement/compare/jump triple, not composes with it:\n{}",
        program.source
    );
}

#[test]
fn without_the_djnz_pass_the_backend_emits_the_decrement_triple() {
    let module = countdown_module();
    let backend = Z80Backend;
    let program = backend.compile(&module).expect("countdown compiles");

    assert!(
        !program.source.contains("DJNZ"),
        "no DJNZ annotation should mean no DJNZ instruction:\n{}",
        program.source
    );
}

fn sum_to_module() -> minzc::ast::Module {
    let body = vec![
        stmt(let_stmt("s", true, Some(Type::U16), Some(int(0)))),
        stmt(let_stmt("i", true, Some(Type::U8), Some(var("n")))),
        stmt(while_stmt(
            binary(BinaryOp::Ne, var("i"), int(0)),
            vec![
                stmt(assign(
                    var("s"),
                    binary(BinaryOp::Add, var("s"), cast(var("i"), Type::U16)),
                )),
                stmt(assign(var("i"), binary(BinaryOp::Sub, var("i"), int(1)))),
            ],
        )),
        stmt(returns(var("s"))),
    ];
    let sum_to = function("sum_to", vec![param("n", Type::U8)], Type::U16, None, body);
    module(vec![Item::Function(sum_to)])
}

#[test]
fn an_ast_while_countdown_loop_forms_a_djnz() {
    let ast_module = sum_to_module();
    let analysis = sema::analyze(&ast_module);
    assert!(!analysis.diagnostics.has_fatal());

    let mut mir = analysis.mir;
    opt::run_to_fixed_point(&mut mir, &OptimizationFlags::all()).expect("pipeline converges");

    let backend = Z80Backend;
    let program = backend.compile(&mir).expect("sum_to compiles");
    assert!(program.source.contains("DJNZ"), "expected DJNZ formation:\n{}", program.source);
    assert!(
        !program.source.contains("DEC B"),
        "DJNZ should replace the decrement/compare/jump triple:\n{}",
        program.source
    );
}
