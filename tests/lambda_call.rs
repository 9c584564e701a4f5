//! Regression test for calling a lambda through its let-bound name
//! (spec.md §4.1 lambda monomorphization): `let f = |x| x + 1; f(5)` must
//! resolve the call to the monomorphized sibling function, not fall back
//! to an `UndefinedSymbol` diagnostic and a dead placeholder constant.

mod support;

use minzc::ast::{BinaryOp, ExprKind, Item, Type};
use minzc::diagnostics::DiagnosticKind;
use minzc::mir::Opcode;
use support::*;

#[test]
fn calling_a_lambda_through_its_let_bound_name_resolves_to_the_monomorphized_function() {
    let lambda_expr = expr(ExprKind::Lambda {
        params: vec![("x".to_string(), Type::U8)],
        ret: None,
        body: Box::new(binary(BinaryOp::Add, var("x"), int(1))),
    });

    let main = function(
        "main",
        vec![],
        Type::U8,
        None,
        vec![
            stmt(let_stmt("f", false, None, Some(lambda_expr))),
            stmt(returns(call("f", vec![int(5)]))),
        ],
    );
    let ast_module = module(vec![Item::Function(main)]);

    let analysis = minzc::sema::analyze(&ast_module);
    assert!(
        !analysis
            .diagnostics
            .iter()
            .any(|d| matches!(d.kind, DiagnosticKind::UndefinedSymbol { .. })),
        "calling a lambda by its bound name should not raise UndefinedSymbol"
    );

    let main_fn = analysis
        .mir
        .functions
        .iter()
        .find(|f| f.name == "main")
        .expect("main lowered");
    let call_instr = main_fn
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::Call)
        .expect("main calls f");
    let callee = call_instr.callee.as_deref().expect("call has a callee");
    assert!(
        callee.contains("$lambda_"),
        "expected the call to target the monomorphized lambda, got `{callee}`"
    );
    assert!(
        analysis.mir.functions.iter().any(|f| f.name == callee),
        "the monomorphized lambda function `{callee}` must exist in the module"
    );
}
