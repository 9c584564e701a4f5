//! DJNZ loop formation (§4.3, §8.3 Scenario F).
//!
//! Detects the MIR shape a counted `while` loop lowers to — a register
//! decremented by exactly one per iteration, compared against zero, and a
//! conditional jump back to the loop head — and annotates the closing
//! jump as DJNZ-eligible. This pass never changes control flow or
//! register semantics itself: Z80's `DJNZ` instruction decrements B and
//! branches in one step with its own flag behavior, so the actual
//! rewrite happens in `backend::z80::isel`, which looks for this
//! annotation instead of re-deriving the pattern from scratch.

use crate::mir::{Function, Module, Opcode, Operand, Register};

pub const DJNZ_ANNOTATION_PREFIX: &str = "djnz-eligible:";

pub fn run(module: &mut Module) {
    for function in &mut module.functions {
        annotate_function(function);
    }
}

fn annotate_function(function: &mut Function) {
    let len = function.instructions.len();
    if len < 3 {
        return;
    }

    for end in (2..len).rev() {
        let jump = function.instructions[end].clone();
        if !matches!(jump.opcode, Opcode::JumpIfTrue | Opcode::JumpIfFalse) {
            continue;
        }
        let Some(target) = jump.label else { continue };
        if target.0 as usize >= end {
            continue;
        }

        let compare = function.instructions[end - 1].clone();
        if !compare.opcode.is_compare() {
            continue;
        }
        let Operand::Reg(compared_reg) = compare.dst else {
            continue;
        };
        if jump.src1 != Operand::Reg(compared_reg) {
            continue;
        }
        let zero_compare = matches!(compare.src2, Operand::Imm(0)) || matches!(compare.src1, Operand::Imm(0));
        if !zero_compare {
            continue;
        }

        let decrement = function.instructions[end - 2].clone();
        if decrement.opcode != Opcode::Sub {
            continue;
        }
        let Operand::Reg(counter) = decrement.dst else {
            continue;
        };
        if !matches!(decrement.src2, Operand::Imm(1)) {
            continue;
        }
        if decrement.src1 != Operand::Reg(counter) {
            continue;
        }
        if !operand_reads(&compare, counter) {
            continue;
        }

        let already_annotated = function.instructions[end]
            .comment
            .as_deref()
            .is_some_and(|c| c.starts_with(DJNZ_ANNOTATION_PREFIX));
        if !already_annotated {
            function.instructions[end].comment =
                Some(format!("{DJNZ_ANNOTATION_PREFIX} {counter}"));
        }
    }
}

fn operand_reads(instr: &crate::mir::Instruction, reg: Register) -> bool {
    instr.src1 == Operand::Reg(reg) || instr.src2 == Operand::Reg(reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Instruction, Label, Module, Width};

    fn counted_loop() -> Function {
        let mut f = Function::new("countdown");
        let counter = f.alloc_register(Width::W8);
        let cmp = f.alloc_register(Width::W8);
        f.params = vec![(counter, Width::W8)];

        let loop_start = f.instructions.len() as u32;
        f.push(Instruction::binary_imm(Opcode::Sub, counter, counter, 1, Width::W8));
        f.push(Instruction::binary_imm(Opcode::CmpNe, cmp, counter, 0, Width::W8));
        f.push(Instruction::jump_if(Opcode::JumpIfTrue, cmp, Label(loop_start), Width::W8));
        f.push(Instruction::ret(None, Width::W8));
        f
    }

    #[test]
    fn annotates_the_closing_jump() {
        let mut module = Module::new();
        module.functions.push(counted_loop());
        run(&mut module);

        let f = module.function("countdown").unwrap();
        let jump = &f.instructions[2];
        assert!(jump
            .comment
            .as_deref()
            .unwrap()
            .starts_with(DJNZ_ANNOTATION_PREFIX));
    }

    #[test]
    fn is_idempotent() {
        let mut module = Module::new();
        module.functions.push(counted_loop());
        run(&mut module);
        let once = module.clone();
        run(&mut module);
        assert_eq!(once, module);
    }

    #[test]
    fn does_not_annotate_non_counted_loops() {
        let mut f = Function::new("while_cond");
        let flag = f.alloc_register(Width::W8);
        f.params = vec![(flag, Width::W8)];
        let loop_start = f.instructions.len() as u32;
        f.push(Instruction::binary_imm(Opcode::CmpEq, flag, flag, 1, Width::W8));
        f.push(Instruction::jump_if(Opcode::JumpIfTrue, flag, Label(loop_start), Width::W8));
        f.push(Instruction::ret(None, Width::W8));

        let mut module = Module::new();
        module.functions.push(f);
        run(&mut module);

        let f = module.function("while_cond").unwrap();
        assert!(f.instructions[1].comment.is_none());
    }
}
