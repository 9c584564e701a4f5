//! The optimizer: a fixed seven-pass pipeline over MIR (§4.3).
//!
//! Pass order is load-bearing and never reordered by configuration: each
//! pass assumes the invariants the ones before it established. `purity`
//! must run before `ctie` (CTIE only folds calls to functions already
//! known pure); `constfold` before `ctie` (constants must already be
//! propagated into `Push` operands for CTIE to see them); `peephole`
//! after `ctie` (strength reduction can fire on CTIE's own folded
//! constants); `djnz` after `peephole` (a strength-reduced loop bound is
//! still eligible for DJNZ annotation); `dce` after `djnz` (cleans up
//! whatever both of the previous passes left dead); `regpressure` last,
//! since every rewrite above can change a register's live range.

pub mod constfold;
pub mod ctie;
pub mod dce;
pub mod djnz;
pub mod peephole;
pub mod purity;
pub mod regpressure;

use crate::config::OptimizationFlags;
use crate::mir::Module;

/// Runs every enabled pass once, in the fixed order. `purity` always
/// runs regardless of `flags`, since later passes (and the backend's SMC
/// eligibility check) depend on `Function::is_pure` being populated.
pub fn run_pipeline(module: &mut Module, flags: &OptimizationFlags) {
    purity::run(module);
    if flags.constant_folding {
        constfold::run(module);
    }
    if flags.ctie {
        ctie::run(module);
    }
    if flags.peephole {
        peephole::run(module);
    }
    if flags.djnz {
        djnz::run(module);
    }
    if flags.dead_code_elimination {
        dce::run(module);
    }
    regpressure::run(module);
}

/// Runs the pipeline repeatedly until a fixed point (§8.2: the optimizer
/// is idempotent, running it again after it has converged changes
/// nothing). Bounded to guard against a pass pair that could otherwise
/// oscillate forever; reaching the bound without converging is an
/// internal-compiler-error condition the driver should surface rather
/// than silently truncate.
pub fn run_to_fixed_point(module: &mut Module, flags: &OptimizationFlags) -> Result<(), OptError> {
    const MAX_ITERATIONS: usize = 16;

    for _ in 0..MAX_ITERATIONS {
        let before = module.clone();
        run_pipeline(module, flags);
        if *module == before {
            return Ok(());
        }
    }

    Err(OptError::DidNotConverge)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptError {
    #[error("optimizer pipeline did not reach a fixed point within the iteration bound")]
    DidNotConverge,
}
