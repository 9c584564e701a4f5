//! Constant folding and propagation: second pass in the fixed pipeline.
//!
//! Operates purely syntactically over each function's instruction list:
//! when both operands of an arithmetic/bitwise/compare instruction are
//! `LoadConst`-defined registers (and that definition is not redefined
//! between the two instructions), the instruction is rewritten to a
//! `LoadConst` of the folded value and the original operands' liveness is
//! left for `opt::dce` to clean up. Folding reuses `Width::mask` so its
//! results agree bit-for-bit with both the MIR interpreter (§4.3.1's CTIE)
//! and the eventual Z80 arithmetic (§9 open question: signed overflow
//! wraps silently).

use crate::mir::{Function, Instruction, Module, Opcode, Operand, Register, Width};
use std::collections::HashMap;

pub fn run(module: &mut Module) {
    for function in &mut module.functions {
        fold_function(function);
    }
}

fn fold_function(function: &mut Function) {
    loop {
        let mut known: HashMap<Register, i64> = HashMap::new();
        let mut changed = false;

        for index in 0..function.instructions.len() {
            let instr = function.instructions[index].clone();

            if instr.opcode == Opcode::LoadConst {
                if let Operand::Reg(dst) = instr.dst {
                    if let Operand::Imm(value) = instr.src1 {
                        known.insert(dst, value);
                    }
                }
                continue;
            }

            if let Some(folded) = try_fold(&instr, &known) {
                function.instructions[index] = folded.clone();
                if let Operand::Reg(dst) = folded.dst {
                    known.insert(dst, as_imm(&folded));
                }
                changed = true;
                continue;
            }

            // Any instruction that redefines a register invalidates the
            // constant we'd recorded for it, unless it's itself a fold we
            // just performed above.
            if let Operand::Reg(dst) = instr.dst {
                known.remove(&dst);
            }
        }

        if !changed {
            break;
        }
    }
}

fn as_imm(folded: &Instruction) -> i64 {
    match folded.src1 {
        Operand::Imm(v) => v,
        _ => unreachable!("try_fold always produces a LoadConst with an immediate src1"),
    }
}

fn operand_value(op: Operand, known: &HashMap<Register, i64>) -> Option<i64> {
    match op {
        Operand::Imm(v) => Some(v),
        Operand::Reg(r) => known.get(&r).copied(),
        Operand::None => None,
    }
}

fn try_fold(instr: &Instruction, known: &HashMap<Register, i64>) -> Option<Instruction> {
    let dst = match instr.dst {
        Operand::Reg(r) => r,
        _ => return None,
    };
    let width = instr.width;

    let binary = |f: fn(i64, i64) -> Option<i64>| -> Option<Instruction> {
        let lhs = operand_value(instr.src1, known)?;
        let rhs = operand_value(instr.src2, known)?;
        let result = width.mask(f(lhs, rhs)?);
        Some(Instruction::load_const(dst, result, width))
    };

    let unary = |f: fn(i64) -> i64| -> Option<Instruction> {
        let operand = operand_value(instr.src1, known)?;
        Some(Instruction::load_const(dst, width.mask(f(operand)), width))
    };

    match instr.opcode {
        Opcode::Add => binary(|a, b| Some(a.wrapping_add(b))),
        Opcode::Sub => binary(|a, b| Some(a.wrapping_sub(b))),
        Opcode::Mul => binary(|a, b| Some(a.wrapping_mul(b))),
        Opcode::Div => binary(|a, b| if b == 0 { None } else { Some(a.wrapping_div(b)) }),
        Opcode::Mod => binary(|a, b| if b == 0 { None } else { Some(a.wrapping_rem(b)) }),
        Opcode::And => binary(|a, b| Some(a & b)),
        Opcode::Or => binary(|a, b| Some(a | b)),
        Opcode::Xor => binary(|a, b| Some(a ^ b)),
        Opcode::Shl => binary(|a, b| Some(a.wrapping_shl(b as u32))),
        Opcode::Shr => binary(|a, b| Some(a.wrapping_shr(b as u32))),
        Opcode::Neg => unary(|a| -a),
        Opcode::Not => unary(|a| !a),
        Opcode::CmpEq => binary(|a, b| Some((a == b) as i64)),
        Opcode::CmpNe => binary(|a, b| Some((a != b) as i64)),
        Opcode::CmpLt => binary(|a, b| Some((a < b) as i64)),
        Opcode::CmpLe => binary(|a, b| Some((a <= b) as i64)),
        Opcode::CmpGt => binary(|a, b| Some((a > b) as i64)),
        Opcode::CmpGe => binary(|a, b| Some((a >= b) as i64)),
        _ => None,
    }
}
