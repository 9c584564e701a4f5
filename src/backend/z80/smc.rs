//! TRUE SMC anchor planning (§4.4).
//!
//! A non-recursive function's parameters are stored as immediate operand
//! bytes inside its own body rather than on a stack frame: the function's
//! own prologue carries one placeholder `LD A, 0` / `LD HL, 0` per
//! parameter — that load's immediate operand is the parameter's "anchor",
//! and callers patch it directly before `CALL` instead of pushing
//! arguments. The prologue then copies the patched value into wherever
//! `regalloc` actually placed the parameter, so the anchor mechanism
//! never has to care which tier (physical, shadow, memory) the allocator
//! chose. Recursion excludes SMC outright (§4.4) since a reentrant call
//! would patch the anchor out from under an outer, still-running
//! invocation of the same function.
//!
//! Grounded on the teacher's `arch::Architecture::patch_register`/
//! `patch_imm32` (locate a fixed byte offset inside already-emitted code
//! and overwrite it) generalized from a binary offset to a symbolic
//! assembler label (`f_p.op` / `f_p EQU f_p.op + N`), since this backend
//! emits text for an external assembler rather than patching its own
//! binary output.

use crate::mir::{Function, Width};

/// One parameter's anchor: the label the assembler resolves to the
/// address of the operand byte(s) a caller patches, and the `EQU`-style
/// symbolic name the rest of this function's own body (and callers)
/// reference it by.
#[derive(Debug, Clone)]
pub struct Anchor {
    pub param_index: usize,
    pub width: Width,
    /// `f_p.op` — label on the instruction whose operand this anchor is.
    pub op_label: String,
    /// `f_p` — the symbolic offset name callers patch through.
    pub symbol: String,
}

/// Whether `function` is eligible for the TRUE SMC calling convention at
/// all: non-recursive or self-contained, and MIR marks it parametrized
/// for SMC only if at least one parameter actually feeds an anchor-
/// eligible instruction (a function can decline this and still compile,
/// just under the conventional push-args convention, per `BackendError`
/// never being raised for this alone).
pub fn is_eligible(function: &Function) -> bool {
    !function.is_recursive && !function.params.is_empty()
}

/// Builds exactly one anchor per declared parameter, naming it
/// positionally (`<func>_p0`, `<func>_p1`, ...) since MIR carries no
/// parameter names — those were erased once `sema::lower::Lowerer`
/// resolved them to registers. Every parameter gets an anchor
/// unconditionally, including one the body never reads (§4.4 "Failure
/// modes": patching must stay well-defined even for an unused parameter),
/// so the caller-side patch sequence can always zip its pushed argument
/// values against the callee's anchor list one-to-one.
pub fn plan_anchors(function: &Function) -> Vec<Anchor> {
    function
        .params
        .iter()
        .enumerate()
        .map(|(param_index, (_reg, width))| Anchor {
            param_index,
            width: *width,
            op_label: format!("{}_p{}.op", function.name, param_index),
            symbol: format!("{}_p{}", function.name, param_index),
        })
        .collect()
}

/// Emits the `EQU`-style declaration pair a generated function needs once
/// per anchor, placed right after the function's entry label so both the
/// function's own body and any caller's patch sequence can reference
/// `symbol` before the anchor's instruction is assembled.
pub fn emit_equ(anchor: &Anchor) -> String {
    format!("{} EQU {} + 1", anchor.symbol, anchor.op_label)
}

/// The caller-side patch sequence (§4.4): load the argument value into
/// the accumulator (or `HL` for 16-bit) and store it straight into the
/// callee's own anchor byte(s) before `CALL`, instead of pushing it.
pub fn emit_patch(anchor: &Anchor, value_reg_text: &str) -> Vec<String> {
    match anchor.width {
        Width::W8 => vec![
            format!("    LD A, {}", value_reg_text),
            format!("    LD ({}), A", anchor.symbol),
        ],
        Width::W16 => vec![
            format!("    LD HL, {}", value_reg_text),
            format!("    LD ({}), HL", anchor.symbol),
        ],
    }
}
