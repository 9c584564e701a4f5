//! The mid-level IR all optimizer passes and the Z80 backend operate on.
//!
//! A MIR `Function` is a flat instruction list over virtual registers
//! (three-address form) rather than a basic-block graph: `Jump`/
//! `JumpIfTrue`/`JumpIfFalse` target instruction indices directly via
//! `Label`. This mirrors the teacher's flat `Program { instructions, ... }`
//! shape (`ir::format::Program`) rather than a block-structured CFG, which
//! keeps DJNZ formation (§4.3) and the peephole pass (§4.5) simple
//! sliding-window rewrites over a `Vec<Instruction>`.

pub mod interp;
pub mod opcode;

pub use opcode::Opcode;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// A virtual register. Width is carried per-register rather than inferred
/// from use sites, since CTIE and the backend both need to know the exact
/// wraparound width before they can execute or allocate an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Register(pub u32);

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Width {
    W8,
    W16,
}

impl Width {
    pub fn mask(self, value: i64) -> i64 {
        match self {
            Width::W8 => (value as i8) as i64,
            Width::W16 => (value as i16) as i64,
        }
    }

    pub fn mask_unsigned(self, value: i64) -> i64 {
        match self {
            Width::W8 => value & 0xFF,
            Width::W16 => value & 0xFFFF,
        }
    }
}

/// A jump/branch target, always an instruction index within the owning
/// function's flat instruction list. Resolved by `sema::lower` at MIR
/// construction time; nothing downstream invents new labels except the
/// optimizer's DJNZ and dead-code passes, which renumber in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label(pub u32);

/// A single MIR operand: either a register, an immediate, or (for
/// `Patch`) the byte offset of an anchor within the current function's own
/// emitted code, filled in by the backend rather than by any optimizer
/// pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Reg(Register),
    Imm(i64),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst: Operand,
    pub src1: Operand,
    pub src2: Operand,
    pub label: Option<Label>,
    pub width: Width,
    /// Present only on `Call`; the mangled callee name (§4.1 overload
    /// resolution already baked the mangling in by the time MIR exists).
    pub callee: Option<String>,
    /// Present only on `Patch`; names the anchor so the backend can emit
    /// `f_p.op:` / `f_p EQU f_p.op + N` and the caller-side patch sequence
    /// that writes it before `Call` (§4.4).
    pub anchor: Option<String>,
    /// Present only on a `Call` to a fallible (`-> T ? E`) function: the
    /// register the carry-flag error state (§6.3) lands in once the call
    /// returns — 0 on success, the callee's error tag otherwise. The
    /// backend fills it in right after `CALL`; `sema::lower`'s `?`/`??`
    /// lowering reads it back rather than ever materializing its own
    /// never-written stand-in (see `sema::lower::lower_try`).
    pub err_dst: Option<Register>,
    pub comment: Option<String>,
}

impl Instruction {
    fn bare(opcode: Opcode, width: Width) -> Self {
        Instruction {
            opcode,
            dst: Operand::None,
            src1: Operand::None,
            src2: Operand::None,
            label: None,
            width,
            callee: None,
            anchor: None,
            err_dst: None,
            comment: None,
        }
    }

    pub fn mov(dst: Register, src: Register, width: Width) -> Self {
        Instruction {
            dst: Operand::Reg(dst),
            src1: Operand::Reg(src),
            ..Instruction::bare(Opcode::Move, width)
        }
    }

    pub fn load_const(dst: Register, value: i64, width: Width) -> Self {
        Instruction {
            dst: Operand::Reg(dst),
            src1: Operand::Imm(value),
            ..Instruction::bare(Opcode::LoadConst, width)
        }
    }

    pub fn binary(opcode: Opcode, dst: Register, lhs: Register, rhs: Register, width: Width) -> Self {
        Instruction {
            dst: Operand::Reg(dst),
            src1: Operand::Reg(lhs),
            src2: Operand::Reg(rhs),
            ..Instruction::bare(opcode, width)
        }
    }

    pub fn binary_imm(opcode: Opcode, dst: Register, lhs: Register, rhs: i64, width: Width) -> Self {
        Instruction {
            dst: Operand::Reg(dst),
            src1: Operand::Reg(lhs),
            src2: Operand::Imm(rhs),
            ..Instruction::bare(opcode, width)
        }
    }

    pub fn jump(target: Label) -> Self {
        Instruction {
            label: Some(target),
            ..Instruction::bare(Opcode::Jump, Width::W16)
        }
    }

    pub fn jump_if(opcode: Opcode, cond: Register, target: Label, width: Width) -> Self {
        debug_assert!(matches!(opcode, Opcode::JumpIfTrue | Opcode::JumpIfFalse));
        Instruction {
            src1: Operand::Reg(cond),
            label: Some(target),
            ..Instruction::bare(opcode, width)
        }
    }

    pub fn call(dst: Option<Register>, callee: impl Into<String>, width: Width) -> Self {
        Instruction {
            dst: dst.map(Operand::Reg).unwrap_or(Operand::None),
            callee: Some(callee.into()),
            ..Instruction::bare(Opcode::Call, width)
        }
    }

    /// A `Call` to a fallible function (§6.3): identical to [`Instruction::call`]
    /// except it also names the register the backend writes the carry-flag
    /// error state into once the call returns.
    pub fn call_fallible(
        dst: Option<Register>,
        err_dst: Register,
        callee: impl Into<String>,
        width: Width,
    ) -> Self {
        Instruction {
            err_dst: Some(err_dst),
            ..Instruction::call(dst, callee, width)
        }
    }

    pub fn ret(value: Option<Register>, width: Width) -> Self {
        Instruction {
            src1: value.map(Operand::Reg).unwrap_or(Operand::None),
            ..Instruction::bare(Opcode::Return, width)
        }
    }

    pub fn patch(anchor: impl Into<String>, value: Register, width: Width) -> Self {
        Instruction {
            src1: Operand::Reg(value),
            anchor: Some(anchor.into()),
            ..Instruction::bare(Opcode::Patch, width)
        }
    }

    pub fn nop() -> Self {
        Instruction::bare(Opcode::Nop, Width::W8)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.mnemonic())?;
        if let Operand::Reg(r) = self.dst {
            write!(f, " {r},")?;
        }
        match self.src1 {
            Operand::Reg(r) => write!(f, " {r}")?,
            Operand::Imm(i) => write!(f, " #{i}")?,
            Operand::None => {}
        }
        if self.src2 != Operand::None {
            match self.src2 {
                Operand::Reg(r) => write!(f, ", {r}")?,
                Operand::Imm(i) => write!(f, ", #{i}")?,
                Operand::None => {}
            }
        }
        if let Some(label) = self.label {
            write!(f, " @{}", label.0)?;
        }
        if let Some(callee) = &self.callee {
            write!(f, " {callee}")?;
        }
        if let Some(err_dst) = self.err_dst {
            write!(f, " -> err {err_dst}")?;
        }
        if let Some(anchor) = &self.anchor {
            write!(f, " <{anchor}>")?;
        }
        if let Some(comment) = &self.comment {
            write!(f, "  ; {comment}")?;
        }
        Ok(())
    }
}

/// A TRUE SMC anchor: one parameter or captured value stored as an
/// immediate operand inside an instruction of this function's own body,
/// patched by callers before every `Call` (§4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmcAnchor {
    pub name: String,
    pub param_index: u32,
    /// Index into `Function::instructions` of the instruction whose
    /// operand byte(s) this anchor patches.
    pub instruction: u32,
    pub width: Width,
}

/// A static call site inside a function body, recorded during lowering so
/// purity analysis and the SMC eligibility check don't need to re-scan
/// instructions for `Call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub instruction: u32,
    pub callee: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<(Register, Width)>,
    pub return_width: Option<Width>,
    /// Name of the error enum this function returns via `-> T ? E`
    /// (§3.3); `None` for an infallible function. Carried on MIR itself
    /// (rather than derived from the AST at backend time) since the
    /// backend needs it to pick the carry-flag `Return` convention
    /// (§6.3) without re-consulting `sema`.
    pub error_type: Option<String>,
    pub instructions: Vec<Instruction>,
    pub registers: Vec<Width>,

    /// Set by `opt::purity`; `None` until that pass has run.
    pub is_pure: Option<bool>,
    pub is_recursive: bool,
    /// Set once the backend commits this function to the TRUE SMC
    /// calling convention. A function can only be `uses_smc` if it is
    /// also non-recursive (§4.4: recursion/reentrancy excludes SMC).
    pub uses_smc: bool,
    pub smc_anchors: Vec<SmcAnchor>,
    pub call_sites: Vec<CallSite>,

    /// Estimated simultaneous live-range count per register, indexed by
    /// `Register::0`. Empty until `opt::regpressure` runs; the Z80
    /// backend's tiered allocator (§4.5) reads this to decide which
    /// registers are worth keeping in the physical tier versus pushing to
    /// the shadow or memory tier.
    pub register_pressure: Vec<u32>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Function {
            name: name.into(),
            params: Vec::new(),
            return_width: None,
            error_type: None,
            instructions: Vec::new(),
            registers: Vec::new(),
            is_pure: None,
            is_recursive: false,
            uses_smc: false,
            smc_anchors: Vec::new(),
            call_sites: Vec::new(),
            register_pressure: Vec::new(),
        }
    }

    pub fn alloc_register(&mut self, width: Width) -> Register {
        let id = self.registers.len() as u32;
        self.registers.push(width);
        Register(id)
    }

    pub fn width_of(&self, reg: Register) -> Width {
        self.registers[reg.0 as usize]
    }

    pub fn push(&mut self, instruction: Instruction) -> u32 {
        let index = self.instructions.len() as u32;
        if instruction.opcode == Opcode::Call {
            if let Some(callee) = &instruction.callee {
                self.call_sites.push(CallSite {
                    instruction: index,
                    callee: callee.clone(),
                });
            }
        }
        self.instructions.push(instruction);
        index
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MirError {
    #[error("function `{0}` references unknown register r{1}")]
    UnknownRegister(String, u32),
    #[error("function `{0}` jumps to out-of-range label {1}")]
    LabelOutOfRange(String, u32),
    #[error("function `{0}` calls undefined function `{1}`")]
    UndefinedCallee(String, String),
    #[error("function `{0}` does not end in a terminator instruction")]
    MissingTerminator(String),
}

/// Structural validation run after lowering and after every optimizer
/// pass (§4.2): every register operand must name a register this function
/// allocated, every jump target must be in range, every callee must exist
/// in the module (or be a recognized builtin, checked by the caller before
/// invoking this), and the instruction stream must end in a terminator.
pub fn validate(module: &Module) -> Result<(), MirError> {
    let known_functions: HashSet<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();

    for function in &module.functions {
        let register_count = function.registers.len() as u32;
        let check_operand = |op: Operand| -> Result<(), MirError> {
            if let Operand::Reg(Register(id)) = op {
                if id >= register_count {
                    return Err(MirError::UnknownRegister(function.name.clone(), id));
                }
            }
            Ok(())
        };

        for instruction in &function.instructions {
            check_operand(instruction.dst)?;
            check_operand(instruction.src1)?;
            check_operand(instruction.src2)?;

            if let Some(label) = instruction.label {
                if label.0 as usize >= function.instructions.len() {
                    return Err(MirError::LabelOutOfRange(function.name.clone(), label.0));
                }
            }

            if instruction.opcode == Opcode::Call {
                if let Some(callee) = &instruction.callee {
                    if !known_functions.contains(callee.as_str())
                        && !crate::builtins::is_builtin(callee)
                    {
                        return Err(MirError::UndefinedCallee(
                            function.name.clone(),
                            callee.clone(),
                        ));
                    }
                }
            }
        }

        match function.instructions.last() {
            Some(instr) if instr.opcode.is_terminator() => {}
            _ => return Err(MirError::MissingTerminator(function.name.clone())),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_function() -> Function {
        let mut f = Function::new("add");
        let a = f.alloc_register(Width::W8);
        let b = f.alloc_register(Width::W8);
        let sum = f.alloc_register(Width::W8);
        f.params.push((a, Width::W8));
        f.params.push((b, Width::W8));
        f.push(Instruction::binary(Opcode::Add, sum, a, b, Width::W8));
        f.push(Instruction::ret(Some(sum), Width::W8));
        f
    }

    #[test]
    fn validates_well_formed_function() {
        let mut module = Module::new();
        module.functions.push(simple_function());
        assert!(validate(&module).is_ok());
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut module = Module::new();
        let mut f = simple_function();
        f.instructions.pop();
        module.functions.push(f);
        assert_eq!(
            validate(&module),
            Err(MirError::MissingTerminator("add".to_string()))
        );
    }

    #[test]
    fn rejects_unknown_register() {
        let mut module = Module::new();
        let mut f = simple_function();
        f.push(Instruction::ret(Some(Register(99)), Width::W8));
        module.functions.push(f);
        assert!(matches!(
            validate(&module),
            Err(MirError::UnknownRegister(_, 99))
        ));
    }

    #[test]
    fn rejects_out_of_range_label() {
        let mut module = Module::new();
        let mut f = simple_function();
        f.instructions.insert(1, Instruction::jump(Label(50)));
        module.functions.push(f);
        assert!(matches!(
            validate(&module),
            Err(MirError::LabelOutOfRange(_, 50))
        ));
    }

    #[test]
    fn rejects_undefined_callee() {
        let mut module = Module::new();
        let mut f = Function::new("caller");
        f.push(Instruction::call(None, "does_not_exist", Width::W16));
        f.push(Instruction::ret(None, Width::W16));
        module.functions.push(f);
        assert!(matches!(
            validate(&module),
            Err(MirError::UndefinedCallee(_, _))
        ));
    }
}
