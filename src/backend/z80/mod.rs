//! The Z80 backend: TRUE SMC anchor planning, tiered register allocation,
//! instruction selection, and a textual peephole pass, tied together
//! behind the crate's `Backend` trait.
//!
//! Grounded on the teacher's `to_nl_source` (join each function's
//! generated lines with blank-line separators into one assembly listing)
//! for the final join step, after the per-function pipeline below.

pub mod abi;
pub mod isel;
pub mod peephole;
pub mod regalloc;
pub mod smc;

use crate::backend::{Backend, BackendError, CompiledProgram};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Span};
use crate::mir::Module as MirModule;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Z80Backend;

impl Backend for Z80Backend {
    const NAME: &'static str = "z80";

    fn compile(&self, module: &MirModule) -> Result<CompiledProgram, BackendError> {
        let mut diagnostics = Diagnostics::new();

        let mut smc_functions: HashMap<String, bool> = HashMap::new();
        let mut anchors_by_fn: HashMap<String, Vec<smc::Anchor>> = HashMap::new();
        for function in &module.functions {
            if smc::is_eligible(function) {
                smc_functions.insert(function.name.clone(), true);
                anchors_by_fn.insert(function.name.clone(), smc::plan_anchors(function));
            } else {
                smc_functions.insert(function.name.clone(), false);
                if function.is_recursive && !function.params.is_empty() {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::SmcIneligible {
                            function: function.name.clone(),
                            reason: "recursive functions cannot use TRUE SMC parameter storage"
                                .to_string(),
                        },
                        Span::synthetic(),
                    ));
                }
            }
        }

        let mut sections = Vec::with_capacity(module.functions.len());
        for function in &module.functions {
            let allocation = regalloc::allocate(function);
            let raw = isel::emit_function(function, &allocation, &smc_functions, &anchors_by_fn);
            let polished = peephole::run(raw);
            sections.push(polished.join("\n"));
        }

        let source = sections.join("\n\n") + "\n";
        Ok(CompiledProgram { source, diagnostics })
    }
}
