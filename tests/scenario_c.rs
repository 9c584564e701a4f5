//! Scenario C (spec.md §8.3): SMC parameter passing, CTIE disabled.
//!
//! ```text
//! fun add8(x: u8, y: u8) -> u8 { return x + y; }
//! fun main() -> u8 { return add8(5, 3); }
//! ```
//! `add8` is non-recursive with parameters, so it is TRUE-SMC eligible
//! (src/backend/z80/smc.rs::is_eligible): the call site patches its
//! anchors directly instead of pushing arguments on the stack.

mod support;

use minzc::ast::{BinaryOp, Item, Type};
use minzc::config::{CompilerConfig, OptimizationFlags};
use support::*;

fn add8_and_main() -> minzc::ast::Module {
    let add8 = function(
        "add8",
        vec![param("x", Type::U8), param("y", Type::U8)],
        Type::U8,
        None,
        vec![stmt(returns(binary(BinaryOp::Add, var("x"), var("y"))))],
    );
    let main = function(
        "main",
        vec![],
        Type::U8,
        None,
        vec![stmt(returns(call("add8", vec![int(5), int(3)])))],
    );
    module(vec![Item::Function(add8), Item::Function(main)])
}

#[test]
fn smc_eligible_call_site_patches_anchors_instead_of_pushing() {
    let module = add8_and_main();
    let mut config = CompilerConfig::default();
    config.build.optimization = OptimizationFlags::none();

    let program = minzc::compile(&module, &config).expect("compiles with CTIE disabled");

    assert!(program.source.contains("EQU"), "expected an SMC anchor EQU declaration:\n{}", program.source);
    assert!(program.source.contains("CALL add8$u8$u8"));
    assert!(
        !program.source.contains("PUSH AF") && !program.source.contains("PUSH HL"),
        "SMC call sites patch anchors directly, never push arguments:\n{}",
        program.source
    );
}
