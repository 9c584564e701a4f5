//! Dead-code elimination: removes `Nop`/`Comment` padding left behind by
//! earlier passes (CTIE's folded-away pushes and calls, constant-folding's
//! superseded definitions) and any instruction whose destination register
//! is never read again and has no side effect.
//!
//! Runs after DJNZ formation so it also cleans up the loop-counter
//! decrement/compare instructions DJNZ folds into the single `djnz`
//! pseudo-op (§4.3, "DJNZ loop formation" precedes "dead-code
//! elimination" in the fixed pass order).

use crate::mir::{Function, Module, Opcode, Operand, Register};
use std::collections::HashSet;

pub fn run(module: &mut Module) {
    for function in &mut module.functions {
        strip_nops(function);
        remove_dead_assignments(function);
    }
}

fn strip_nops(function: &mut Function) {
    if function
        .instructions
        .iter()
        .any(|i| i.opcode == Opcode::Jump || i.opcode == Opcode::JumpIfTrue || i.opcode == Opcode::JumpIfFalse)
    {
        // Removing instructions would shift indices that jump labels
        // reference; label renumbering is out of scope for this pass
        // (DJNZ already renumbers what it rewrites). Functions with
        // control flow keep their Nops as harmless no-ops; the backend's
        // own peephole pass elides them from emitted text instead.
        return;
    }

    function
        .instructions
        .retain(|i| i.opcode != Opcode::Nop && i.opcode != Opcode::Comment);
}

fn remove_dead_assignments(function: &mut Function) {
    loop {
        let live = live_registers(function);
        let before_len = function.instructions.len();

        let has_control_flow = function.instructions.iter().any(|i| {
            matches!(
                i.opcode,
                Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse
            )
        });
        if has_control_flow {
            // As above: no safe index-preserving removal without label
            // renumbering, which this pass does not perform.
            return;
        }

        function.instructions.retain(|instr| {
            if has_side_effect(instr.opcode) {
                return true;
            }
            match instr.dst {
                Operand::Reg(r) => live.contains(&r),
                _ => true,
            }
        });

        if function.instructions.len() == before_len {
            break;
        }
    }
}

fn has_side_effect(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Store
            | Opcode::Call
            | Opcode::Push
            | Opcode::Pop
            | Opcode::Patch
            | Opcode::Return
    )
}

fn live_registers(function: &Function) -> HashSet<Register> {
    let mut live = HashSet::new();
    for instr in &function.instructions {
        for operand in [instr.src1, instr.src2] {
            if let Operand::Reg(r) = operand {
                live.insert(r);
            }
        }
        if has_side_effect(instr.opcode) {
            if let Operand::Reg(r) = instr.dst {
                live.insert(r);
            }
        }
    }
    live
}
