//! Compile-Time Interface Execution (§4.3.1).
//!
//! Finds `Call` instructions to pure functions whose every argument is a
//! compile-time constant (produced by `opt::constfold` running before this
//! pass in the fixed pipeline) and replaces the call with the interpreted
//! result, eliminating the call entirely. Never touches a call whose
//! target has `is_pure != Some(true)`, never touches `OpPatch`-containing
//! functions (the interpreter refuses them anyway), and respects the
//! configured instruction budget.

use crate::mir::interp::{InterpResult, Interpreter, DEFAULT_INSTRUCTION_BUDGET};
use crate::mir::{Instruction, Module, Opcode, Operand, Register, Width};
use std::collections::HashMap;

pub fn run(module: &mut Module) {
    run_with_budget(module, DEFAULT_INSTRUCTION_BUDGET);
}

pub fn run_with_budget(module: &mut Module, budget: u64) {
    let snapshot = module.clone();

    for function in &mut module.functions {
        let mut known: HashMap<Register, i64> = HashMap::new();
        // Arguments pushed for the call currently being matched, in the
        // order `Push` appeared: MIR's calling convention (§6.1) pushes
        // arguments left to right immediately before `Call`.
        let mut pending_args: Vec<i64> = Vec::new();
        let mut pending_push_indices: Vec<usize> = Vec::new();
        let mut args_are_constant = true;

        for index in 0..function.instructions.len() {
            let instr = function.instructions[index].clone();

            match instr.opcode {
                Opcode::LoadConst => {
                    if let (Operand::Reg(dst), Operand::Imm(value)) = (instr.dst, instr.src1) {
                        known.insert(dst, value);
                    }
                }
                Opcode::Push => {
                    match operand_value(instr.src1, &known) {
                        Some(v) => {
                            pending_args.push(v);
                            pending_push_indices.push(index);
                        }
                        None => args_are_constant = false,
                    }
                    continue;
                }
                Opcode::Call => {
                    let args = if args_are_constant {
                        std::mem::take(&mut pending_args)
                    } else {
                        pending_args.clear();
                        pending_push_indices.clear();
                        args_are_constant = true;
                        continue;
                    };
                    let push_indices = std::mem::take(&mut pending_push_indices);
                    args_are_constant = true;

                    if let Some(replacement) =
                        try_fold_call(&snapshot, &instr, &args, budget)
                    {
                        for push_index in push_indices {
                            function.instructions[push_index] = Instruction::nop()
                                .with_comment("ctie: argument push folded away");
                        }
                        function.instructions[index] = replacement;
                    }
                    continue;
                }
                _ => {
                    if let Operand::Reg(dst) = instr.dst {
                        known.remove(&dst);
                    }
                }
            }

            pending_args.clear();
            pending_push_indices.clear();
            args_are_constant = true;
        }
    }
}

fn operand_value(op: Operand, known: &HashMap<Register, i64>) -> Option<i64> {
    match op {
        Operand::Imm(v) => Some(v),
        Operand::Reg(r) => known.get(&r).copied(),
        Operand::None => None,
    }
}

fn try_fold_call(
    snapshot: &Module,
    instr: &Instruction,
    args: &[i64],
    budget: u64,
) -> Option<Instruction> {
    let callee_name = instr.callee.as_deref()?;
    let callee = snapshot.function(callee_name)?;
    if callee.is_pure != Some(true) {
        return None;
    }
    if !callee.smc_anchors.is_empty() {
        return None;
    }
    if args.len() != callee.params.len() {
        return None;
    }

    let interp = Interpreter::new(snapshot).with_budget(budget);
    match interp.run(callee, args) {
        InterpResult::Returned(value) => {
            let width = instr.width;
            match (instr.dst, value) {
                (Operand::Reg(dst), Some(v)) => Some(
                    Instruction::load_const(dst, v, width)
                        .with_comment(format!("ctie: folded call to {callee_name}")),
                ),
                (Operand::None, _) => Some(
                    Instruction::nop()
                        .with_comment(format!("ctie: folded call to {callee_name}")),
                ),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Function, Module};

    #[test]
    fn folds_a_pure_call_with_constant_arguments() {
        // Scenario A: add(5, 3) should fold to a constant 8 with no
        // remaining Call to `add`.
        let mut add = Function::new("add");
        let a = add.alloc_register(Width::W8);
        let b = add.alloc_register(Width::W8);
        let sum = add.alloc_register(Width::W8);
        add.params = vec![(a, Width::W8), (b, Width::W8)];
        add.is_pure = Some(true);
        add.push(Instruction::binary(Opcode::Add, sum, a, b, Width::W8));
        add.push(Instruction::ret(Some(sum), Width::W8));

        let mut main = Function::new("main");
        let five = main.alloc_register(Width::W8);
        let three = main.alloc_register(Width::W8);
        let result = main.alloc_register(Width::W8);
        main.push(Instruction::load_const(five, 5, Width::W8));
        main.push(Instruction::load_const(three, 3, Width::W8));
        main.push(Instruction {
            opcode: Opcode::Push,
            dst: Operand::None,
            src1: Operand::Reg(five),
            src2: Operand::None,
            label: None,
            width: Width::W8,
            callee: None,
            anchor: None,
            err_dst: None,
            comment: None,
        });
        main.push(Instruction {
            opcode: Opcode::Push,
            dst: Operand::None,
            src1: Operand::Reg(three),
            src2: Operand::None,
            label: None,
            width: Width::W8,
            callee: None,
            anchor: None,
            err_dst: None,
            comment: None,
        });
        main.push(Instruction::call(Some(result), "add", Width::W8));
        main.push(Instruction::ret(Some(result), Width::W8));

        let mut module = Module::new();
        module.functions.push(add);
        module.functions.push(main);
        run(&mut module);

        let main = module.function("main").unwrap();
        assert!(
            !main.instructions.iter().any(|i| i.opcode == Opcode::Call),
            "call to add should have been folded away"
        );
        let call_replacement = &main.instructions[4];
        assert_eq!(call_replacement.opcode, Opcode::LoadConst);
        assert_eq!(call_replacement.src1, Operand::Imm(8));
    }

    #[test]
    fn leaves_calls_to_impure_functions_untouched() {
        let mut caller = Function::new("main");
        caller.push(Instruction::call(None, "print_str", Width::W16));
        caller.push(Instruction::ret(None, Width::W16));

        let mut module = Module::new();
        module.functions.push(caller);
        let before = module.clone();
        run(&mut module);
        assert_eq!(module, before);
    }

    #[test]
    fn skips_functions_with_smc_anchors() {
        let mut pure_fn = Function::new("with_anchor");
        pure_fn.is_pure = Some(true);
        pure_fn.smc_anchors.push(crate::mir::SmcAnchor {
            name: "with_anchor_p".to_string(),
            param_index: 0,
            instruction: 0,
            width: Width::W8,
        });
        pure_fn.push(Instruction::ret(None, Width::W8));

        let mut caller = Function::new("main");
        caller.push(Instruction::call(None, "with_anchor", Width::W8));
        caller.push(Instruction::ret(None, Width::W8));

        let mut module = Module::new();
        module.functions.push(pure_fn);
        module.functions.push(caller);
        let before = module.clone();
        run(&mut module);
        assert_eq!(module, before);
    }
}
