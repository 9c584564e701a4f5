//! Z80 instruction selection (§4.5).
//!
//! Walks a validated `mir::Function` instruction-by-instruction and emits
//! one textual Z80 assembly fragment per MIR opcode, materializing every
//! operand through the accumulator (8-bit values) or `HL`/`DE` (16-bit
//! values) the way hand-written Z80 routines do. Grounded on the
//! teacher's `CodeGenerator::gen_expr`/`gen_binary_op` (evaluate left into
//! the destination register, right into a scratch register, then apply
//! the ALU op) adapted from a sixteen-register-file target to the
//! accumulator-centric two-operand shape Z80's ALU actually has.
//!
//! 16-bit virtual registers bypass `regalloc`'s tiered physical/shadow
//! allocation entirely and live in their own flat memory area (`w16`
//! slots below) — the tiered allocator only ever hands out single 8-bit
//! register names, and Z80 has no way to hold a 16-bit value split across
//! two *unrelated* 8-bit slots without nailing down which register pair
//! backs it, which `regalloc::allocate` does not attempt (see its own
//! doc comment on fixed-register requirements).

use crate::backend::z80::regalloc::{Allocation, Location, Z80Reg};
use crate::backend::z80::{abi, smc};
use crate::mir::{Function, Instruction, Opcode, Operand, Register, Width};
use crate::opt::djnz::DJNZ_ANNOTATION_PREFIX;
use std::collections::{HashMap, HashSet};

/// Flat per-function memory layout for every `Width::W16` register,
/// placed immediately after the 8-bit memory tier's `scratch_bytes` so
/// the two scratch areas never overlap.
fn plan_w16_slots(function: &Function, base: u16) -> HashMap<Register, u16> {
    let mut slots = HashMap::new();
    let mut offset = base;
    for (id, width) in function.registers.iter().enumerate() {
        if *width == Width::W16 {
            slots.insert(Register(id as u32), offset);
            offset += 2;
        }
    }
    slots
}

/// Renders a W8 register's location as an operand Z80 can read directly:
/// a bare register name for the physical/shadow tiers, a parenthesized
/// memory reference otherwise. Shadow-tier access is simplified to a
/// plain register name too — the real `EXX`/`EX AF,AF'` swap in and back
/// out is elided here and left as a single pair around the whole function
/// body by `emit_function`, not threaded through every access.
fn w8_operand(reg: Register, alloc: &Allocation, overrides: &HashMap<Register, Location>) -> String {
    let location = overrides.get(&reg).copied().unwrap_or_else(|| alloc.location_of(reg));
    match location {
        Location::Physical(r) | Location::Shadow(r) => r.name().to_string(),
        Location::Memory(offset) => format!("(scratch_{offset})"),
    }
}

fn w16_operand(reg: Register, slots: &HashMap<Register, u16>) -> String {
    let offset = slots.get(&reg).copied().unwrap_or(0);
    format!("(w16_{offset})")
}

struct Ctx<'a> {
    function: &'a Function,
    alloc: &'a Allocation,
    slots: HashMap<Register, u16>,
    overrides: HashMap<Register, Location>,
    smc_functions: &'a HashMap<String, bool>,
    anchors: &'a HashMap<String, Vec<smc::Anchor>>,
    pending_pushes: Vec<(Register, Width)>,
}

impl<'a> Ctx<'a> {
    fn operand(&self, reg: Register, width: Width) -> String {
        match width {
            Width::W8 => w8_operand(reg, self.alloc, &self.overrides),
            Width::W16 => w16_operand(reg, &self.slots),
        }
    }

    fn load_into_acc(&self, reg: Register, width: Width) -> Vec<String> {
        match width {
            Width::W8 => vec![format!("    LD A, {}", self.operand(reg, width))],
            Width::W16 => vec![format!("    LD HL, {}", self.operand(reg, width))],
        }
    }

    fn store_from_acc(&self, reg: Register, width: Width) -> Vec<String> {
        match width {
            Width::W8 => vec![format!("    LD {}, A", self.operand(reg, width))],
            Width::W16 => vec![format!("    LD {}, HL", self.operand(reg, width))],
        }
    }
}

/// `DJNZ` folds away the MIR decrement+compare pair a counted loop lowers
/// to (§4.3, §8.3 Scenario F); this scans ahead once to find which
/// instruction indices that fold consumes and which register the folded
/// `DJNZ` pins to `B`.
fn plan_djnz(function: &Function) -> (HashSet<usize>, HashMap<usize, Register>) {
    let mut skip = HashSet::new();
    let mut jumps = HashMap::new();
    for (idx, instr) in function.instructions.iter().enumerate() {
        if !matches!(instr.opcode, Opcode::JumpIfTrue | Opcode::JumpIfFalse) {
            continue;
        }
        let Some(comment) = &instr.comment else { continue };
        let Some(rest) = comment.strip_prefix(DJNZ_ANNOTATION_PREFIX) else { continue };
        let Some(reg_id) = rest.trim().strip_prefix('r').and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if idx < 2 {
            continue;
        }
        skip.insert(idx - 1);
        skip.insert(idx - 2);
        jumps.insert(idx, Register(reg_id));
    }
    (skip, jumps)
}

pub fn emit_function(
    function: &Function,
    alloc: &Allocation,
    smc_functions: &HashMap<String, bool>,
    anchors: &HashMap<String, Vec<smc::Anchor>>,
) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("{}:", function.name));

    let uses_smc = smc_functions.get(&function.name).copied().unwrap_or(false);

    let (djnz_skip, djnz_jumps) = plan_djnz(function);
    let mut overrides = HashMap::new();
    for reg in djnz_jumps.values() {
        overrides.insert(*reg, Location::Physical(Z80Reg::B));
    }

    let targets: HashSet<u32> = function
        .instructions
        .iter()
        .filter_map(|i| i.label.map(|l| l.0))
        .collect();

    let mut ctx = Ctx {
        function,
        alloc,
        slots: plan_w16_slots(function, alloc.scratch_bytes),
        overrides,
        smc_functions,
        anchors,
        pending_pushes: Vec::new(),
    };

    lines.extend(emit_prologue(&ctx, function, uses_smc, anchors.get(&function.name)));

    for (idx, instr) in function.instructions.iter().enumerate() {
        if targets.contains(&(idx as u32)) {
            lines.push(format!("L{idx}:"));
        }
        if djnz_skip.contains(&idx) {
            continue;
        }
        if let Some(counter) = djnz_jumps.get(&idx) {
            let target = instr.label.expect("djnz jump always carries a label").0;
            lines.push(format!("    DJNZ L{target}  ; counter {counter}"));
            continue;
        }
        lines.extend(emit_instruction(&mut ctx, idx, instr));
    }

    lines
}

/// TRUE SMC functions get one patchable placeholder load per parameter,
/// labeled with the anchor's `op_label` so `smc::emit_equ`'s `EQU`
/// resolves to the byte right after the opcode — exactly the byte(s) a
/// caller's `emit_patch` overwrites. Conventional (non-SMC, typically
/// recursive) functions instead pop their arguments straight off the
/// stack: `CALL` already pushed the return address on top of whatever
/// the caller pushed, so the prologue stashes that address in `DE`,
/// pops each parameter in reverse push order into wherever `regalloc`
/// placed it, then restores the return address so the function's own
/// `RET` still lands back at the caller.
fn emit_prologue(
    ctx: &Ctx,
    function: &Function,
    uses_smc: bool,
    own_anchors: Option<&Vec<smc::Anchor>>,
) -> Vec<String> {
    let mut lines = Vec::new();
    if uses_smc {
        if let Some(own_anchors) = own_anchors {
            for anchor in own_anchors {
                let (reg, _) = function.params[anchor.param_index];
                lines.push(format!("{}:", anchor.op_label));
                lines.push(match anchor.width {
                    Width::W8 => "    LD A, 0".to_string(),
                    Width::W16 => "    LD HL, 0".to_string(),
                });
                lines.extend(ctx.store_from_acc(reg, anchor.width));
                lines.push(format!("    {}", smc::emit_equ(anchor)));
            }
        }
    } else if !function.params.is_empty() {
        lines.push("    POP DE".to_string());
        for (reg, width) in function.params.iter().rev() {
            match width {
                Width::W8 => {
                    lines.push("    POP AF".to_string());
                    lines.extend(ctx.store_from_acc(*reg, Width::W8));
                }
                Width::W16 => {
                    lines.push("    POP HL".to_string());
                    lines.extend(ctx.store_from_acc(*reg, Width::W16));
                }
            }
        }
        lines.push("    PUSH DE".to_string());
    }
    lines
}

fn emit_instruction(ctx: &mut Ctx, idx: usize, instr: &Instruction) -> Vec<String> {
    match instr.opcode {
        Opcode::Nop | Opcode::Comment => Vec::new(),
        Opcode::Move => emit_move(ctx, instr),
        Opcode::LoadConst => emit_load_const(ctx, instr),
        Opcode::Load => emit_mem(ctx, instr, true),
        Opcode::Store => emit_mem(ctx, instr, false),
        Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor => emit_binary(ctx, instr),
        Opcode::Mul | Opcode::Div | Opcode::Mod => emit_runtime_binary(ctx, instr),
        Opcode::Shl | Opcode::Shr => emit_shift(ctx, instr),
        Opcode::Neg => emit_neg(ctx, instr),
        Opcode::Not => emit_not(ctx, instr),
        Opcode::CmpEq | Opcode::CmpNe | Opcode::CmpLt | Opcode::CmpLe | Opcode::CmpGt | Opcode::CmpGe => {
            emit_compare(ctx, idx, instr)
        }
        Opcode::Jump => {
            let target = instr.label.expect("Jump always carries a label");
            vec![format!("    JP L{}", target.0)]
        }
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => emit_conditional_jump(ctx, instr),
        Opcode::Push => {
            if let Operand::Reg(reg) = instr.src1 {
                ctx.pending_pushes.push((reg, instr.width));
            }
            Vec::new()
        }
        Opcode::Pop => Vec::new(),
        Opcode::Call => emit_call(ctx, idx, instr),
        Opcode::Return => emit_return(ctx, instr),
        Opcode::Phi => Vec::new(),
        Opcode::Patch => Vec::new(),
    }
}

fn emit_move(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let Operand::Reg(dst) = instr.dst else { return Vec::new() };
    let mut lines = match instr.src1 {
        Operand::Reg(src) => ctx.load_into_acc(src, instr.width),
        Operand::Imm(v) => vec![match instr.width {
            Width::W8 => format!("    LD A, {v}"),
            Width::W16 => format!("    LD HL, {v}"),
        }],
        Operand::None => return Vec::new(),
    };
    lines.extend(ctx.store_from_acc(dst, instr.width));
    lines
}

fn emit_load_const(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let Operand::Reg(dst) = instr.dst else { return Vec::new() };
    let Operand::Imm(value) = instr.src1 else { return Vec::new() };
    match instr.width {
        Width::W8 => vec![format!("    LD {}, {}", ctx.operand(dst, Width::W8), value)],
        Width::W16 => vec![format!("    LD {}, {}", ctx.operand(dst, Width::W16), value)],
    }
}

/// `Load`/`Store` address through `HL`; the address register is carried
/// in `src2` by convention (`src1` is the value for `Store`, unused for
/// `Load`).
fn emit_mem(ctx: &Ctx, instr: &Instruction, is_load: bool) -> Vec<String> {
    let mut lines = Vec::new();
    if let Operand::Reg(addr) = instr.src2 {
        lines.extend(match instr.width {
            Width::W8 | Width::W16 => vec![format!("    LD HL, {}", ctx.operand(addr, Width::W16))],
        });
    }
    if is_load {
        if let Operand::Reg(dst) = instr.dst {
            lines.push(match instr.width {
                Width::W8 => format!("    LD {}, (HL)", ctx.operand(dst, Width::W8)),
                Width::W16 => format!("    LD {}, (HL)", ctx.operand(dst, Width::W16)),
            });
        }
    } else if let Operand::Reg(value) = instr.src1 {
        match instr.width {
            Width::W8 => {
                lines.push(format!("    LD A, {}", ctx.operand(value, Width::W8)));
                lines.push("    LD (HL), A".to_string());
            }
            Width::W16 => lines.push(format!("    LD (HL), {}", ctx.operand(value, Width::W16))),
        }
    }
    lines
}

fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Add => "ADD",
        Opcode::Sub => "SUB",
        Opcode::And => "AND",
        Opcode::Or => "OR",
        Opcode::Xor => "XOR",
        _ => unreachable!("emit_binary only handles arithmetic/bitwise opcodes"),
    }
}

fn emit_binary(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let (Operand::Reg(dst), Operand::Reg(lhs)) = (instr.dst, instr.src1) else {
        return Vec::new();
    };
    let mut lines = ctx.load_into_acc(lhs, instr.width);
    let rhs_operand = match instr.src2 {
        Operand::Reg(rhs) => ctx.operand(rhs, instr.width),
        Operand::Imm(v) => v.to_string(),
        Operand::None => return lines,
    };
    match instr.width {
        Width::W8 => {
            let op = mnemonic(instr.opcode);
            let line = if op == "ADD" {
                format!("    ADD A, {rhs_operand}")
            } else {
                format!("    {op} {rhs_operand}")
            };
            lines.push(line);
            lines.extend(ctx.store_from_acc(dst, instr.width));
        }
        Width::W16 => {
            lines.push(format!("    LD DE, {rhs_operand}"));
            match instr.opcode {
                Opcode::Add => lines.push("    ADD HL, DE".to_string()),
                Opcode::Sub => {
                    lines.push("    OR A".to_string());
                    lines.push("    SBC HL, DE".to_string());
                }
                _ => lines.push(format!("    CALL {}16_rom", mnemonic(instr.opcode).to_lowercase())),
            }
            lines.extend(ctx.store_from_acc(dst, instr.width));
        }
    }
    lines
}

/// Z80 has no native multiply/divide; every width routes through a
/// runtime helper taking its operands in `HL`/`DE` and returning in `HL`
/// (§4.5 names no specific ROM addresses, so these are left as symbolic
/// labels a linker script resolves).
fn emit_runtime_binary(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let (Operand::Reg(dst), Operand::Reg(lhs)) = (instr.dst, instr.src1) else {
        return Vec::new();
    };
    let routine = match instr.opcode {
        Opcode::Mul => "mul8_rom",
        Opcode::Div => "div8_rom",
        Opcode::Mod => "mod8_rom",
        _ => unreachable!("emit_runtime_binary only handles Mul/Div/Mod"),
    };
    let mut lines = vec![format!("    LD A, {}", ctx.operand(lhs, Width::W8))];
    match instr.src2 {
        Operand::Reg(rhs) => lines.push(format!("    LD B, {}", ctx.operand(rhs, Width::W8))),
        Operand::Imm(v) => lines.push(format!("    LD B, {v}")),
        Operand::None => {}
    }
    lines.push(format!("    CALL {routine}"));
    lines.extend(ctx.store_from_acc(dst, Width::W8));
    lines
}

fn emit_shift(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let (Operand::Reg(dst), Operand::Reg(src)) = (instr.dst, instr.src1) else {
        return Vec::new();
    };
    let count = match instr.src2 {
        Operand::Imm(v) => v.max(0) as u32,
        _ => 1,
    };
    let op = if instr.opcode == Opcode::Shl { "SLA" } else { "SRL" };
    let mut lines = vec![format!("    LD A, {}", ctx.operand(src, Width::W8))];
    for _ in 0..count.max(1) {
        lines.push(format!("    {op} A"));
    }
    lines.extend(ctx.store_from_acc(dst, Width::W8));
    lines
}

fn emit_neg(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let (Operand::Reg(dst), Operand::Reg(src)) = (instr.dst, instr.src1) else {
        return Vec::new();
    };
    let mut lines = vec![format!("    LD A, {}", ctx.operand(src, Width::W8)), "    NEG".to_string()];
    lines.extend(ctx.store_from_acc(dst, Width::W8));
    lines
}

fn emit_not(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let (Operand::Reg(dst), Operand::Reg(src)) = (instr.dst, instr.src1) else {
        return Vec::new();
    };
    let mut lines = vec![format!("    LD A, {}", ctx.operand(src, Width::W8)), "    CPL".to_string()];
    lines.extend(ctx.store_from_acc(dst, Width::W8));
    lines
}

/// Mirrors the teacher's `gen_comparison` (branch on the condition, set
/// 1/0 in two arms joined by a local label) rather than relying on a
/// native Z80 "set if" instruction, since Z80 has none.
fn emit_compare(ctx: &Ctx, idx: usize, instr: &Instruction) -> Vec<String> {
    let (Operand::Reg(dst), Operand::Reg(lhs)) = (instr.dst, instr.src1) else {
        return Vec::new();
    };
    let rhs_operand = match instr.src2 {
        Operand::Reg(rhs) => ctx.operand(rhs, instr.width),
        Operand::Imm(v) => v.to_string(),
        Operand::None => return Vec::new(),
    };
    let true_label = format!("Lcmp_true_{idx}");
    let false_label = format!("Lcmp_false_{idx}");
    let end_label = format!("Lcmp_end_{idx}");

    // `CP` leaves the unsigned-borrow result in carry/zero: carry means
    // lhs < rhs, zero means lhs == rhs. Gt/Le need both flags since
    // neither alone distinguishes "greater" from "equal".
    let branch_to_true = match instr.opcode {
        Opcode::CmpEq => vec![format!("    JP Z, {true_label}")],
        Opcode::CmpNe => vec![format!("    JP NZ, {true_label}")],
        Opcode::CmpLt => vec![format!("    JP C, {true_label}")],
        Opcode::CmpGe => vec![format!("    JP NC, {true_label}")],
        Opcode::CmpGt => vec![
            format!("    JP Z, {false_label}"),
            format!("    JP NC, {true_label}"),
        ],
        Opcode::CmpLe => vec![
            format!("    JP Z, {true_label}"),
            format!("    JP C, {true_label}"),
        ],
        _ => unreachable!("emit_compare only handles comparison opcodes"),
    };

    let mut lines = vec![
        format!("    LD A, {}", ctx.operand(lhs, instr.width)),
        format!("    CP {rhs_operand}"),
    ];
    lines.extend(branch_to_true);
    lines.push(format!("{false_label}:"));
    lines.push("    LD A, 0".to_string());
    lines.push(format!("    JP {end_label}"));
    lines.push(format!("{true_label}:"));
    lines.push("    LD A, 1".to_string());
    lines.push(format!("{end_label}:"));
    lines.extend(ctx.store_from_acc(dst, Width::W8));
    lines
}

fn emit_conditional_jump(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let Operand::Reg(cond) = instr.src1 else { return Vec::new() };
    let target = instr.label.expect("conditional jump always carries a label");
    let branch = if instr.opcode == Opcode::JumpIfTrue { "NZ" } else { "Z" };
    vec![
        format!("    LD A, {}", ctx.operand(cond, Width::W8)),
        "    OR A".to_string(),
        format!("    JP {branch}, L{}", target.0),
    ]
}

/// The fixed register each builtin's ROM routine (§11) expects its
/// arguments in, in source argument order. Builtins never go through the
/// ordinary SMC-anchor or stack-push call sequence, so their pushed
/// arguments (already evaluated into registers/scratch slots by
/// `Opcode::Push`) have to be materialized into these specific registers
/// right before the `CALL` instead.
fn builtin_arg_targets(name: &str) -> &'static [&'static str] {
    match name {
        "print_u8" => &["A"],
        "print_u16" | "print_str" => &["HL"],
        "mem_copy" => &["DE", "HL", "BC"],
        _ => &[],
    }
}

/// Loads every pending pushed argument into the register `builtin_arg_targets`
/// names for `name`, in order.
fn materialize_builtin_args(ctx: &Ctx, name: &str, pending: &[(Register, Width)]) -> Vec<String> {
    builtin_arg_targets(name)
        .iter()
        .zip(pending.iter())
        .map(|(target, (reg, width))| format!("    LD {target}, {}", ctx.operand(*reg, *width)))
        .collect()
}

fn emit_call(ctx: &mut Ctx, idx: usize, instr: &Instruction) -> Vec<String> {
    let callee = instr.callee.clone().unwrap_or_default();

    if let Some(call_lines) = abi::builtin_call_sequence(&callee) {
        let pending = std::mem::take(&mut ctx.pending_pushes);
        let mut lines = materialize_builtin_args(ctx, &callee, &pending);
        lines.extend(call_lines);
        return lines;
    }

    let pending = std::mem::take(&mut ctx.pending_pushes);
    let uses_smc = ctx.smc_functions.get(&callee).copied().unwrap_or(false);

    let mut lines = Vec::new();
    if uses_smc {
        if let Some(callee_anchors) = ctx.anchors.get(&callee) {
            for (anchor, (reg, width)) in callee_anchors.iter().zip(pending.iter()) {
                let value_text = ctx.operand(*reg, *width);
                lines.extend(smc::emit_patch(anchor, &value_text));
            }
        }
        lines.push(format!("    CALL {callee}"));
    } else {
        // Conventional calling convention: push every argument left to
        // right, then `CALL`. The callee's own prologue (`emit_prologue`)
        // pops them back out from underneath the return address `CALL`
        // just pushed — nothing pops them back here, or the callee would
        // never see them.
        for (reg, width) in &pending {
            match width {
                Width::W8 => {
                    lines.push(format!("    LD A, {}", ctx.operand(*reg, Width::W8)));
                    lines.push("    PUSH AF".to_string());
                }
                Width::W16 => {
                    lines.push(format!("    LD HL, {}", ctx.operand(*reg, Width::W16)));
                    lines.push("    PUSH HL".to_string());
                }
            }
        }
        lines.push(format!("    CALL {callee}"));
    }

    // §6.3: the callee's own `Return` clears carry on success (value in
    // A/HL) or sets carry with the error tag already loaded into A. A
    // fallible call's `err_dst` register makes that transient flag state
    // durable immediately after `CALL`, before anything else can touch
    // it, so `lower_try`'s `CmpNe err_dst, 0` downstream sees the right
    // thing regardless of how many instructions sit between the call and
    // the `?`.
    if let Some(err_dst) = instr.err_dst {
        let ok_label = format!("Lcall_ok_{idx}");
        let end_label = format!("Lcall_errdst_end_{idx}");
        lines.push(format!("    JR NC, {ok_label}"));
        lines.extend(ctx.store_from_acc(err_dst, Width::W8));
        lines.push(format!("    JR {end_label}"));
        lines.push(format!("{ok_label}:"));
        lines.push(format!("    LD {}, 0", ctx.operand(err_dst, Width::W8)));
        lines.push(format!("{end_label}:"));
    }

    if let Operand::Reg(dst) = instr.dst {
        lines.extend(ctx.store_from_acc(dst, instr.width));
    }
    lines
}

/// Return's carry-flag convention (§6.3): an error arm (tagged
/// `"propagate-error"` or `"propagate-error-converted"` by
/// `sema::lower`) always sets carry before `RET`; the success arm of a
/// fallible function explicitly clears it with `OR A` (which leaves `A`
/// untouched) so a caller's `JP C, ...`/`RET C` reads the right thing
/// either way. An infallible function emits a bare `RET`.
fn emit_return(ctx: &Ctx, instr: &Instruction) -> Vec<String> {
    let mut lines = match instr.src1 {
        Operand::Reg(reg) => ctx.load_into_acc(reg, instr.width),
        Operand::Imm(v) => vec![match instr.width {
            Width::W8 => format!("    LD A, {v}"),
            Width::W16 => format!("    LD HL, {v}"),
        }],
        Operand::None => Vec::new(),
    };

    let is_error_arm = matches!(
        instr.comment.as_deref(),
        Some("propagate-error") | Some("propagate-error-converted")
    );

    if ctx.function.error_type.is_some() {
        if is_error_arm {
            lines.push("    SCF".to_string());
        } else {
            lines.push("    OR A".to_string());
        }
    }
    lines.push("    RET".to_string());
    lines
}
