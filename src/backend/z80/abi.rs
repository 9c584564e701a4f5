//! Z80-side calling convention details that aren't register allocation:
//! builtin I/O routines (§11), program exit conventions, and the
//! carry-flag error-return ABI (§6.3).
//!
//! Grounded on the teacher's `gen_call` intrinsic table in
//! `compiler::codegen` (a fixed match over names that map straight to IR
//! instructions rather than a real call) — MinZ's builtins are the same
//! idea: a short fixed list the backend recognizes by name instead of
//! emitting a `CALL` to a MIR function that doesn't exist.

use crate::builtins;

/// How a compiled program's `main` hands control back to whatever loaded
/// it. `minz.toml`'s `build.target` doesn't currently expose a way to
/// pick between these (SPEC_FULL.md §10.1 only names `z80`); `RetToZero`
/// is always used until a host environment needs `Rst38`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitConvention {
    /// Falls off the end of `main` straight into `RET`, matching
    /// subroutine-style embedding into a larger ROM image.
    RetToZero,
    /// `RST 38h`, the standard entry back into a monitor/BASIC ROM on
    /// 48K Spectrum-shaped targets.
    Rst38,
}

impl ExitConvention {
    pub fn emit(self) -> &'static str {
        match self {
            ExitConvention::RetToZero => "    RET",
            ExitConvention::Rst38 => "    RST 38h",
        }
    }
}

/// Textual call sequence for a builtin (§11); `None` if `name` isn't one
/// of `builtins::is_builtin`'s names. Builtins are never pushed through
/// the ordinary `Push`/`Call` sequence — `isel::emit_call` special-cases
/// them, first materializing each pushed argument into the fixed
/// register the ROM routine expects (`isel::builtin_arg_targets`: `A` for
/// `print_u8`, `HL` for `print_u16`/`print_str`, `DE`/`HL`/`BC` for
/// `mem_copy`'s `dst`/`src`/`len`) and only then emitting the lines
/// below.
pub fn builtin_call_sequence(name: &str) -> Option<Vec<String>> {
    if !builtins::is_builtin(name) {
        return None;
    }
    let lines = match name {
        "print_u8" => vec!["    CALL print_u8_rom".to_string()],
        "print_u16" => vec!["    CALL print_u16_rom".to_string()],
        "print_str" => vec!["    CALL print_str_rom".to_string()],
        "mem_copy" => vec!["    CALL mem_copy_rom".to_string()],
        "halt" => vec!["    HALT".to_string()],
        _ => return None,
    };
    Some(lines)
}
