//! Two-pass semantic analysis (§4.1): declaration collection, then body
//! analysis and AST-to-MIR lowering. Mirrors the teacher's
//! `Analyzer::analyze` two-step (register parameters, then walk the
//! body) but widened to a whole-module first pass, since MinZ allows
//! forward references between functions that the teacher's single-
//! function-at-a-time analyzer never had to resolve.

pub mod castable;
pub mod lower;
pub mod symtab;

use crate::ast::{self, Item, Module as AstModule, Type};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Span};
use crate::mir::Module as MirModule;
use crate::sema::lower::{width_of, Lowerer};
use crate::sema::symtab::{mangle_function_name, FunctionSignature, SymbolTable};
use std::collections::HashMap;

pub struct AnalysisResult {
    pub mir: MirModule,
    pub diagnostics: Diagnostics,
}

/// Runs both passes over `module` and lowers every function reachable
/// from pass 1's declaration table into MIR. Never panics on malformed-
/// but-structurally-valid input (§7): anything it cannot resolve becomes a
/// diagnostic and lowering continues with a best-effort placeholder so a
/// single bad function doesn't block diagnostics about the rest of the
/// module.
pub fn analyze(module: &AstModule) -> AnalysisResult {
    let mut diagnostics = Diagnostics::new();
    let mut symtab = SymbolTable::new();
    let error_enums = collect_error_enums(module);

    collect_declarations(module, &mut symtab, &mut diagnostics);

    let mut mir = MirModule::new();
    for function in module.functions() {
        let (mir_functions, function_diags) =
            lower_function(function, &symtab, &error_enums);
        diagnostics.extend(function_diags);
        mir.functions.extend(mir_functions);
    }

    for impl_block in module.impls() {
        for method in &impl_block.methods {
            let mangled_name = mangled_method_name(impl_block, method);
            let mut renamed = method.clone();
            renamed.name = mangled_name;
            let (mir_functions, function_diags) =
                lower_function(&renamed, &symtab, &error_enums);
            diagnostics.extend(function_diags);
            mir.functions.extend(mir_functions);
        }
    }

    AnalysisResult { mir, diagnostics }
}

fn mangled_method_name(impl_block: &ast::ImplBlock, method: &ast::Function) -> String {
    format!("{}::{}", impl_block.target_type, method.name)
}

/// Pass 1: register every function (under its overload-mangled name),
/// struct, enum, and interface so forward references resolve during pass
/// 2 regardless of declaration order.
fn collect_declarations(module: &AstModule, symtab: &mut SymbolTable, diagnostics: &mut Diagnostics) {
    for function in module.functions() {
        let param_types: Vec<Type> = function.params.iter().map(|p| p.ty.clone()).collect();
        let mangled_name = mangle_function_name(&function.name, &param_types);
        symtab.declare_function(
            &function.name,
            FunctionSignature {
                mangled_name,
                param_types,
                ret: function.ret.clone(),
                error_type: function.error_type.clone(),
            },
        );
    }

    for interface in module.interfaces() {
        // Interface conformance is checked lazily (SPEC_FULL.md §14): no
        // eager scan here for missing `impl`s. `resolve_overload` below
        // is what actually surfaces `NoMatchingOverload` if a call site
        // needs a method no `impl` provides.
        let _ = interface;
    }

    // Every `impl` method is registered under the same
    // `"{ConcreteType}::{method}"` base name `mangled_method_name` renames
    // its own AST node to before lowering (§4.1, §4.3): a `MethodCall`
    // resolves the receiver's concrete type, builds that same base name,
    // and looks it up here exactly like an overloaded free function.
    for impl_block in module.impls() {
        for method in &impl_block.methods {
            let base_name = mangled_method_name(impl_block, method);
            let param_types: Vec<Type> = method.params.iter().map(|p| p.ty.clone()).collect();
            let mangled_name = mangle_function_name(&base_name, &param_types);
            symtab.declare_function(
                &base_name,
                FunctionSignature {
                    mangled_name,
                    param_types,
                    ret: method.ret.clone(),
                    error_type: method.error_type.clone(),
                },
            );
        }
    }

    let _ = diagnostics;
}

fn collect_error_enums(module: &AstModule) -> HashMap<String, Vec<String>> {
    module
        .enums()
        .filter(|e| e.is_error_type)
        .map(|e| {
            let variants = e.variants.iter().map(|v| v.name.clone()).collect();
            (e.name.clone(), variants)
        })
        .collect()
}

/// Lowers a single function's body to MIR. Any nested lambdas
/// monomorphize into sibling functions of the *caller's* module (§4.1);
/// since `Lowerer` needs `&mut MirModule` to append those siblings as it
/// goes, `analyze` hands each function a private scratch module here and
/// splices every function it produced — the original plus any lambdas —
/// back into the real module afterward.
fn lower_function(
    function: &ast::Function,
    symtab: &SymbolTable,
    error_enums: &HashMap<String, Vec<String>>,
) -> (Vec<crate::mir::Function>, Diagnostics) {
    let param_types: Vec<Type> = function.params.iter().map(|p| p.ty.clone()).collect();
    let mangled_name = mangle_function_name(&function.name, &param_types);
    let error_type_name = function.error_type.as_ref().map(|ty| match ty {
        Type::Named(name) => name.clone(),
        other => format!("{other:?}"),
    });

    let mut scratch = MirModule::new();
    let mut lowerer = Lowerer::new(
        &mut scratch,
        symtab,
        error_enums,
        mangled_name,
        error_type_name.clone(),
    );
    for param in &function.params {
        lowerer.bind_param(&param.name, &param.ty);
    }

    let return_width = width_of(&function.ret);
    let (mut mir_function, diagnostics) = lowerer.lower_body(&function.body);
    mir_function.return_width = Some(return_width);
    mir_function.error_type = error_type_name;

    let mut functions = scratch.functions;
    functions.push(mir_function);
    (functions, diagnostics)
}
