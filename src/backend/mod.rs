//! Backend abstraction (§4.5, §1's "same MIR contract" note).
//!
//! Every backend consumes the same validated MIR module and produces
//! textual assembly plus any diagnostics raised while doing so; nothing
//! downstream of `opt::run_pipeline` is Z80-specific at this layer. Only
//! one implementation (`z80`) ships with this crate, but the trait is the
//! seam a second target would plug into without touching `sema`/`mir`/
//! `opt`. Modeled on the teacher's `Architecture` trait (`arch::mod`) —
//! associated name/word-size consts plus a fixed set of codegen
//! operations — generalized from binary-stencil patching to textual
//! assembly with symbolic anchor patching (TRUE SMC has no fixed byte
//! offset to patch against ahead of assembly time).

pub mod z80;

use crate::diagnostics::Diagnostics;
use crate::mir::Module as MirModule;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("function `{0}` is marked for ROM residency but requires TRUE SMC, which only RAM-resident code can use")]
    SmcInRom(String),
    #[error("function `{function}` has no anchor for parameter `{param}`")]
    MissingAnchor { function: String, param: String },
    #[error("call to undefined function `{0}`")]
    UndefinedCallee(String),
    #[error("instruction selection has no template for opcode `{0}`")]
    UnsupportedOpcode(String),
}

/// Assembly text plus whatever non-fatal notes the backend raised along
/// the way (e.g. `SmcIneligible` when a function asked for SMC but is
/// recursive and fell back to the conventional convention).
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub source: String,
    pub diagnostics: Diagnostics,
}

pub trait Backend {
    /// Name registered in `minz.toml`'s `build.target` (§10.1).
    const NAME: &'static str;

    fn compile(&self, module: &MirModule) -> Result<CompiledProgram, BackendError>;
}
