//! Register-pressure hinting: last pass in the fixed pipeline (§4.3).
//!
//! Computes, per virtual register, how many other registers' live ranges
//! overlap its own. This crate's register allocator (§4.5) is tiered —
//! physical Z80 registers, then the shadow bank reachable via `EXX`/
//! `EX AF,AF'`, then memory-backed scratch — and uses this count purely as
//! a prioritization hint: registers with the most overlapping live ranges
//! are allocated to the physical tier first, since they are the ones a
//! tier demotion would hurt most.

use crate::mir::{Function, Module, Operand};

pub fn run(module: &mut Module) {
    for function in &mut module.functions {
        function.register_pressure = compute_pressure(function);
    }
}

fn compute_pressure(function: &Function) -> Vec<u32> {
    let n = function.registers.len();
    if n == 0 {
        return Vec::new();
    }

    let live_ranges = live_ranges(function);
    let mut pressure = vec![0u32; n];

    for i in 0..n {
        let Some((start_i, end_i)) = live_ranges[i] else {
            continue;
        };
        for j in 0..n {
            if i == j {
                continue;
            }
            let Some((start_j, end_j)) = live_ranges[j] else {
                continue;
            };
            if start_i <= end_j && start_j <= end_i {
                pressure[i] += 1;
            }
        }
    }

    pressure
}

/// First-def to last-use instruction index per register, treating
/// function parameters as defined at instruction 0 regardless of where
/// their first real use is.
fn live_ranges(function: &Function) -> Vec<Option<(usize, usize)>> {
    let mut ranges: Vec<Option<(usize, usize)>> = vec![None; function.registers.len()];

    for (reg, _) in &function.params {
        ranges[reg.0 as usize] = Some((0, 0));
    }

    for (index, instr) in function.instructions.iter().enumerate() {
        let mut touch = |op: Operand| {
            if let Operand::Reg(r) = op {
                let entry = ranges[r.0 as usize].get_or_insert((index, index));
                entry.0 = entry.0.min(index);
                entry.1 = entry.1.max(index);
            }
        };
        touch(instr.dst);
        touch(instr.src1);
        touch(instr.src2);
    }

    ranges
}
