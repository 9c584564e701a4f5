//! MIR-level peephole and strength reduction (§4.3).
//!
//! Operates on single instructions in place: strength-reduces
//! multiplication/division by a power of two to shifts, and removes
//! additive/multiplicative identities. This is distinct from the Z80
//! backend's own ~35-pattern textual peephole pass (§4.5), which rewrites
//! emitted assembly mnemonic sequences after instruction selection; this
//! pass only ever rewrites one MIR instruction into an equivalent one, so
//! it commutes freely with DCE and CTIE regardless of run order within a
//! basic block.

use crate::mir::{Instruction, Module, Opcode, Operand};

pub fn run(module: &mut Module) {
    for function in &mut module.functions {
        for instr in &mut function.instructions {
            if let Some(reduced) = reduce(instr) {
                *instr = reduced;
            }
        }
    }
}

fn reduce(instr: &Instruction) -> Option<Instruction> {
    let Operand::Reg(dst) = instr.dst else {
        return None;
    };
    let Operand::Reg(lhs) = instr.src1 else {
        return None;
    };

    match (instr.opcode, instr.src2) {
        (Opcode::Mul, Operand::Imm(n)) if n > 0 && n.is_power_of_two() => {
            let shift = n.trailing_zeros() as i64;
            if shift == 0 {
                return Some(Instruction::mov(dst, lhs, instr.width).with_comment("peephole: x*1"));
            }
            Some(
                Instruction::binary_imm(Opcode::Shl, dst, lhs, shift, instr.width)
                    .with_comment(format!("peephole: strength-reduced *{n}")),
            )
        }
        (Opcode::Div, Operand::Imm(n)) if n > 0 && n.is_power_of_two() => {
            let shift = n.trailing_zeros() as i64;
            if shift == 0 {
                return Some(Instruction::mov(dst, lhs, instr.width).with_comment("peephole: x/1"));
            }
            Some(
                Instruction::binary_imm(Opcode::Shr, dst, lhs, shift, instr.width)
                    .with_comment(format!("peephole: strength-reduced /{n}")),
            )
        }
        (Opcode::Add, Operand::Imm(0)) | (Opcode::Sub, Operand::Imm(0)) => {
            Some(Instruction::mov(dst, lhs, instr.width).with_comment("peephole: additive identity"))
        }
        (Opcode::Mul, Operand::Imm(1)) => {
            Some(Instruction::mov(dst, lhs, instr.width).with_comment("peephole: x*1"))
        }
        (Opcode::Mul, Operand::Imm(0)) => {
            Some(Instruction::load_const(dst, 0, instr.width).with_comment("peephole: x*0"))
        }
        _ => None,
    }
}
