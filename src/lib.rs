//! MinZ: a compiler core that lowers a high-level AST (structs, enums,
//! interfaces, lambdas, pattern matching, fallible functions) through a
//! register-based MIR, a fixed seven-pass optimizer, and a Z80 backend
//! with a TRUE self-modifying-code calling convention.
//!
//! This crate is the core: it takes an already-parsed `ast::Module` (see
//! `minzc`'s `--ast` flag for how the binary gets one) and drives it all
//! the way to assembly text via [`compile`]. Surface-syntax parsing is
//! out of scope (SPEC_FULL.md §1's non-goals).
//!
//! # Pipeline
//!
//! ```text
//! ast::Module
//!   -> sema::analyze        (two-pass analysis, AST -> MIR lowering)
//!   -> mir::validate
//!   -> opt::run_to_fixed_point   (purity, constfold, CTIE, peephole, djnz, dce, regpressure)
//!   -> mir::validate
//!   -> backend::z80::Z80Backend  (TRUE SMC, instruction selection, peephole, error ABI)
//! ```

#![warn(clippy::all)]

pub mod ast;
pub mod backend;
pub mod builtins;
pub mod config;
pub mod diagnostics;
pub mod mir;
pub mod opt;
pub mod sema;

use backend::{Backend, BackendError, CompiledProgram};
use backend::z80::Z80Backend;
use config::CompilerConfig;
use diagnostics::Diagnostics;
use mir::MirError;
use opt::OptError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Semantic analysis produced at least one fatal diagnostic; the
    /// diagnostics themselves (including any non-fatal ones alongside
    /// them) are carried for the driver to print, not just a summary.
    #[error("semantic analysis reported {} error(s)", .0.iter().filter(|d| d.is_fatal()).count())]
    Analysis(Diagnostics),
    #[error("lowering produced malformed MIR: {0}")]
    Mir(#[from] MirError),
    #[error("optimizer error: {0}")]
    Optimizer(#[from] OptError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("unknown build target `{0}` (only \"z80\" is implemented)")]
    UnknownTarget(String),
}

/// Runs the full pipeline described in the module docs. `config` selects
/// which optimizer passes run and which backend target to compile for
/// (SPEC_FULL.md §10.1); the caller is responsible for loading it (e.g.
/// via `CompilerConfig::find_and_load`) since this crate's core never
/// touches the filesystem itself.
pub fn compile(module: &ast::Module, config: &CompilerConfig) -> Result<CompiledProgram, CompileError> {
    let analysis = sema::analyze(module);
    if analysis.diagnostics.has_fatal() {
        return Err(CompileError::Analysis(analysis.diagnostics));
    }

    let mut mir = analysis.mir;
    mir::validate(&mir)?;

    opt::run_to_fixed_point(&mut mir, &config.build.optimization)?;
    mir::validate(&mir)?;

    let mut program = match config.build.target.as_str() {
        "z80" => Z80Backend.compile(&mir)?,
        other => return Err(CompileError::UnknownTarget(other.to_string())),
    };
    program.diagnostics.extend(analysis.diagnostics);
    Ok(program)
}
