//! Scenario B (spec.md §8.3): `case` over an enum lowers to a linear
//! compare/jump chain rather than a jump table.
//!
//! `lower_case` (src/sema/lower.rs) assigns each non-wildcard arm's
//! comparison value from its position in the arm list, not from the
//! enum's own declared discriminants — so this test drives the scrutinee
//! and arm patterns by that same positional convention rather than
//! reconstructing enum-literal syntax the AST has no constructor for.

mod support;

use minzc::ast::{EnumDef, EnumVariant, Item, MatchArm, Pattern, Type};
use minzc::mir::Opcode;
use minzc::sema;
use support::*;

fn state_enum() -> Item {
    Item::Enum(EnumDef {
        name: "State".to_string(),
        variants: vec!["IDLE", "RUNNING", "PAUSED"]
            .into_iter()
            .map(|v| EnumVariant {
                name: v.to_string(),
                payload: Vec::new(),
            })
            .collect(),
        is_error_type: false,
        span: span(),
    })
}

fn next_fn() -> minzc::ast::Module {
    let arms = vec![
        MatchArm {
            pattern: Pattern::EnumVariant {
                enum_type: "State".to_string(),
                variant: "IDLE".to_string(),
                bindings: Vec::new(),
            },
            guard: None,
            body: int(1),
        },
        MatchArm {
            pattern: Pattern::EnumVariant {
                enum_type: "State".to_string(),
                variant: "RUNNING".to_string(),
                bindings: Vec::new(),
            },
            guard: None,
            body: int(2),
        },
        MatchArm {
            pattern: Pattern::EnumVariant {
                enum_type: "State".to_string(),
                variant: "PAUSED".to_string(),
                bindings: Vec::new(),
            },
            guard: None,
            body: int(0),
        },
    ];
    let case = expr(minzc::ast::ExprKind::Case {
        scrutinee: Box::new(var("s")),
        arms,
    });
    let next = function(
        "next",
        vec![param("s", Type::Named("State".to_string()))],
        Type::Named("State".to_string()),
        None,
        vec![stmt(returns(case))],
    );
    module(vec![state_enum(), Item::Function(next)])
}

#[test]
fn case_over_an_enum_lowers_to_a_compare_and_jump_chain() {
    let module = next_fn();
    let analysis = sema::analyze(&module);

    let next = analysis
        .mir
        .functions
        .iter()
        .find(|f| f.name == "next")
        .expect("next lowered");

    // spec.md §8.3 Scenario B: exactly two compares (IDLE, RUNNING), and a
    // fall-through for the last arm (PAUSED) rather than a third compare.
    let compares = next
        .instructions
        .iter()
        .filter(|i| i.opcode == Opcode::CmpNe)
        .count();
    assert_eq!(compares, 2, "expected exactly two discriminant compares, got {compares}");

    let branches = next
        .instructions
        .iter()
        .filter(|i| i.opcode == Opcode::JumpIfTrue)
        .count();
    assert_eq!(branches, compares, "every compare should feed a conditional branch");

    // No runtime table lookup (Opcode::Load against a computed address) is
    // involved; every arm resolves through compares alone.
    assert!(!next.instructions.iter().any(|i| i.opcode == Opcode::Load));
}
