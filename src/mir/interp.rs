//! The minimal MIR interpreter shared by `opt::ctie`.
//!
//! Executes a single pure function given compile-time-constant arguments.
//! Deliberately narrow: no globals, no I/O, no impure calls, and no
//! `Patch` (TRUE SMC anchors have no meaning independent of the backend
//! that emits them). Anything outside that subset is reported as
//! `InterpResult::Unsupported` rather than attempted, mirroring the
//! teacher's `Interpreter`/`InterpResult` split in `interp::dispatch`
//! (register file + instruction budget + a result enum distinguishing
//! "ran fine" from every way it couldn't).

use super::{Function, Instruction, Module, Opcode, Operand, Register, Width};

/// Default instruction budget, matching the teacher's
/// `max_instructions: 1_000_000` default in `Interpreter::new`. CTIE
/// (§4.3.1) uses this same default unless the driver overrides it via
/// `CompilerConfig`.
pub const DEFAULT_INSTRUCTION_BUDGET: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpResult {
    Returned(Option<i64>),
    BudgetExceeded,
    DivByZero,
    /// The function uses an opcode or calls a function this interpreter
    /// cannot execute purely (`Call` to a non-builtin-pure function,
    /// `Push`/`Pop`, `Patch`). CTIE treats this as "not eligible," not as
    /// an error: the call is left in MIR for the backend to emit normally.
    Unsupported(Opcode),
}

pub struct Interpreter<'a> {
    module: &'a Module,
    budget: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(module: &'a Module) -> Self {
        Interpreter {
            module,
            budget: DEFAULT_INSTRUCTION_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    /// Runs `function` with `args` bound to its parameters in order.
    /// `args.len()` must equal `function.params.len()`.
    pub fn run(&self, function: &Function, args: &[i64]) -> InterpResult {
        debug_assert_eq!(args.len(), function.params.len());

        let mut registers = vec![0i64; function.registers.len()];
        for ((reg, _width), value) in function.params.iter().zip(args.iter()) {
            registers[reg.0 as usize] = function.width_of(*reg).mask(*value);
        }

        let mut pc: usize = 0;
        let mut steps_remaining = self.budget;

        loop {
            if steps_remaining == 0 {
                return InterpResult::BudgetExceeded;
            }
            steps_remaining -= 1;

            let instr = match function.instructions.get(pc) {
                Some(instr) => instr,
                None => return InterpResult::Returned(None),
            };

            match self.step(function, &mut registers, instr, &mut pc) {
                Ok(Some(result)) => return result,
                Ok(None) => {}
                Err(result) => return result,
            }
        }
    }

    /// Executes one instruction. Returns `Ok(Some(result))` when the
    /// function has returned, `Ok(None)` to continue (with `pc` already
    /// advanced), or `Err(result)` for an unsupported/failing instruction.
    fn step(
        &self,
        function: &Function,
        registers: &mut [i64],
        instr: &Instruction,
        pc: &mut usize,
    ) -> Result<Option<InterpResult>, InterpResult> {
        let read = |op: Operand| -> i64 {
            match op {
                Operand::Reg(Register(id)) => registers[id as usize],
                Operand::Imm(v) => v,
                Operand::None => 0,
            }
        };
        let width = instr.width;

        macro_rules! write_dst {
            ($value:expr) => {
                if let Operand::Reg(Register(id)) = instr.dst {
                    registers[id as usize] = width.mask($value);
                }
            };
        }

        match instr.opcode {
            Opcode::Move | Opcode::LoadConst => write_dst!(read(instr.src1)),
            Opcode::Add => write_dst!(read(instr.src1).wrapping_add(read(instr.src2))),
            Opcode::Sub => write_dst!(read(instr.src1).wrapping_sub(read(instr.src2))),
            Opcode::Mul => write_dst!(read(instr.src1).wrapping_mul(read(instr.src2))),
            Opcode::Div => {
                let divisor = read(instr.src2);
                if divisor == 0 {
                    return Err(InterpResult::DivByZero);
                }
                write_dst!(read(instr.src1).wrapping_div(divisor));
            }
            Opcode::Mod => {
                let divisor = read(instr.src2);
                if divisor == 0 {
                    return Err(InterpResult::DivByZero);
                }
                write_dst!(read(instr.src1).wrapping_rem(divisor));
            }
            Opcode::Neg => write_dst!(-read(instr.src1)),
            Opcode::And => write_dst!(read(instr.src1) & read(instr.src2)),
            Opcode::Or => write_dst!(read(instr.src1) | read(instr.src2)),
            Opcode::Xor => write_dst!(read(instr.src1) ^ read(instr.src2)),
            Opcode::Not => write_dst!(!read(instr.src1)),
            Opcode::Shl => write_dst!(read(instr.src1).wrapping_shl(read(instr.src2) as u32)),
            Opcode::Shr => write_dst!(read(instr.src1).wrapping_shr(read(instr.src2) as u32)),
            Opcode::CmpEq => write_dst!((read(instr.src1) == read(instr.src2)) as i64),
            Opcode::CmpNe => write_dst!((read(instr.src1) != read(instr.src2)) as i64),
            Opcode::CmpLt => write_dst!((read(instr.src1) < read(instr.src2)) as i64),
            Opcode::CmpLe => write_dst!((read(instr.src1) <= read(instr.src2)) as i64),
            Opcode::CmpGt => write_dst!((read(instr.src1) > read(instr.src2)) as i64),
            Opcode::CmpGe => write_dst!((read(instr.src1) >= read(instr.src2)) as i64),
            Opcode::Jump => {
                *pc = instr.label.expect("jump missing label").0 as usize;
                return Ok(None);
            }
            Opcode::JumpIfTrue => {
                if read(instr.src1) != 0 {
                    *pc = instr.label.expect("jump missing label").0 as usize;
                    return Ok(None);
                }
            }
            Opcode::JumpIfFalse => {
                if read(instr.src1) == 0 {
                    *pc = instr.label.expect("jump missing label").0 as usize;
                    return Ok(None);
                }
            }
            Opcode::Return => {
                let value = match instr.src1 {
                    Operand::None => None,
                    op => Some(width.mask(read(op))),
                };
                return Ok(Some(InterpResult::Returned(value)));
            }
            Opcode::Call => {
                let callee_name = instr.callee.as_deref().unwrap_or("");
                if !crate::builtins::is_pure_builtin(callee_name) {
                    if let Some(callee) = self.module.function(callee_name) {
                        if callee.is_pure == Some(true) {
                            // Pure-to-pure calls are not inlined by this
                            // interpreter; CTIE only folds leaf calls
                            // directly, so a function containing a call to
                            // another user function is left for the
                            // optimizer's own recursive CTIE pass rather
                            // than executed here.
                            return Err(InterpResult::Unsupported(Opcode::Call));
                        }
                    }
                    return Err(InterpResult::Unsupported(Opcode::Call));
                }
            }
            Opcode::Nop | Opcode::Comment => {}
            other @ (Opcode::Push | Opcode::Pop | Opcode::Patch | Opcode::Phi) => {
                return Err(InterpResult::Unsupported(other));
            }
        }

        *pc += 1;
        let _ = function;
        Ok(None)
    }
}
