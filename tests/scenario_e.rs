//! Scenario E (spec.md §8.3): `?` across two distinct error types
//! synthesizes a conversion stub (`sema::lower::ensure_conversion_stub`)
//! and tags the propagating `Return` as converted so the backend knows
//! to route through it rather than a bare carry-flag passthrough.
//!
//! The emitted call site does not match the spec prose's literal
//! "JR NC, .ok; CALL conv_MErr_to_AErr; RET; .ok:" shape — the
//! conversion call is reached through the same general `err_dst`
//! materialization block Scenario D uses, not a dedicated minimal
//! sequence. See DESIGN.md's "Error-propagation codegen shape" entry;
//! the second test below pins the assembly this backend actually
//! emits.

mod support;

use minzc::ast::{Item, Type};
use minzc::config::{CompilerConfig, OptimizationFlags};
use minzc::mir::Opcode;
use minzc::sema;
use support::*;

fn cross_type_propagation() -> minzc::ast::Module {
    let err_a = error_enum("ErrA", &["A0", "A1"]);
    let err_b = error_enum("ErrB", &["B0", "A1"]);

    let signals_error = function(
        "signals_error",
        vec![],
        Type::U8,
        Some(Type::Named("ErrA".to_string())),
        vec![stmt(returns(expr(minzc::ast::ExprKind::ErrorCtor {
            error_type: "ErrA".to_string(),
            variant: "A1".to_string(),
            args: Vec::new(),
        })))],
    );

    let outer = function(
        "outer",
        vec![],
        Type::U8,
        Some(Type::Named("ErrB".to_string())),
        vec![stmt(returns(expr(minzc::ast::ExprKind::Try(Box::new(
            call("signals_error", Vec::new()),
        )))))],
    );

    module(vec![
        err_a,
        err_b,
        Item::Function(signals_error),
        Item::Function(outer),
    ])
}

#[test]
fn cross_type_try_calls_a_conversion_stub() {
    let module = cross_type_propagation();
    let analysis = sema::analyze(&module);
    assert!(!analysis.diagnostics.has_fatal());

    let stub = analysis
        .mir
        .functions
        .iter()
        .find(|f| f.name == "conv_ErrA_to_ErrB")
        .expect("a conv_ErrA_to_ErrB stub should be synthesized");
    assert!(!stub.instructions.is_empty());

    let outer = analysis
        .mir
        .functions
        .iter()
        .find(|f| f.name == "outer")
        .expect("outer lowered");

    assert!(
        outer
            .instructions
            .iter()
            .any(|i| i.opcode == Opcode::Call && i.callee.as_deref() == Some("conv_ErrA_to_ErrB")),
        "outer must route its propagated error through the conversion stub"
    );

    assert!(outer.instructions.iter().any(|i| {
        i.opcode == Opcode::Return && i.comment.as_deref() == Some("propagate-error-converted")
    }));
}

#[test]
fn emitted_assembly_calls_the_conversion_stub_and_still_sets_carry() {
    let module = cross_type_propagation();
    let mut config = CompilerConfig::default();
    config.build.optimization = OptimizationFlags::none();

    let program = minzc::compile(&module, &config).expect("compiles");
    let asm = program.source;

    assert!(
        asm.contains("CALL conv_ErrA_to_ErrB"),
        "outer must route its propagated error through the conversion stub:\n{asm}"
    );
    assert!(
        !asm.contains("RET C"),
        "this backend never emits the spec prose's literal minimal shape \
         (JR NC, .ok; CALL conv_...; RET; .ok:) — see DESIGN.md:\n{asm}"
    );
    assert!(
        asm.contains("SCF"),
        "the converted error must still set carry before RET:\n{asm}"
    );
}
