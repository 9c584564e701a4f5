//! Scope stack and overload-mangled symbol table (§4.1).
//!
//! Function names are mangled as `base$type1$type2$…` at declaration-
//! collection time so that later lookups can select an overload purely by
//! string match against the mangled name built from the call site's
//! argument types — no separate overload-resolution search structure is
//! needed once mangling has happened once, mirroring the teacher's
//! `Analyzer` scope-stack design in `compiler::analyzer` generalized from
//! "one function per name" to "one function per mangled name."

use crate::ast::Type;
use std::collections::HashMap;

/// Renders a type the same way on both the declaring and the calling
/// side, so mangled names always agree.
pub fn mangle_type(ty: &Type) -> String {
    match ty {
        Type::U8 => "u8".to_string(),
        Type::U16 => "u16".to_string(),
        Type::I8 => "i8".to_string(),
        Type::I16 => "i16".to_string(),
        Type::Bool => "bool".to_string(),
        Type::String => "str".to_string(),
        Type::Void => "void".to_string(),
        Type::Named(name) => name.clone(),
        Type::Pointer { mutable, pointee } => {
            format!("{}ptr_{}", if *mutable { "mut" } else { "" }, mangle_type(pointee))
        }
        Type::Array { element, len } => format!("arr{len}_{}", mangle_type(element)),
        Type::Function { params, ret } => {
            let params = params.iter().map(mangle_type).collect::<Vec<_>>().join("_");
            format!("fn_{params}_to_{}", mangle_type(ret))
        }
        Type::Fallible { ok, err } => format!("{}q{}", mangle_type(ok), mangle_type(err)),
    }
}

pub fn mangle_function_name(base: &str, param_types: &[Type]) -> String {
    if param_types.is_empty() {
        return base.to_string();
    }
    let mut name = base.to_string();
    for ty in param_types {
        name.push('$');
        name.push_str(&mangle_type(ty));
    }
    name
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub mangled_name: String,
    pub param_types: Vec<Type>,
    pub ret: Type,
    pub error_type: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableBinding {
    pub ty: Type,
    pub mutable: bool,
    /// Tracks deferred initialization (`let x: u8;` followed by a later
    /// assignment before first use) the way the teacher's
    /// `Variable::is_initialized` flag does.
    pub initialized: bool,
}

#[derive(Debug, Default)]
struct Scope {
    variables: HashMap<String, VariableBinding>,
}

/// All overloads sharing a base name, keyed by base name for candidate
/// lookup during resolution (`resolve_overload` in `mod.rs` needs the
/// full candidate set to report `NoMatchingOverload` with useful
/// information when nothing matches).
#[derive(Debug, Default)]
pub struct SymbolTable {
    functions: HashMap<String, Vec<FunctionSignature>>,
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            functions: HashMap::new(),
            scopes: vec![Scope::default()],
        }
    }

    pub fn declare_function(&mut self, base_name: &str, signature: FunctionSignature) {
        self.functions
            .entry(base_name.to_string())
            .or_default()
            .push(signature);
    }

    pub fn overloads(&self, base_name: &str) -> &[FunctionSignature] {
        self.functions
            .get(base_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        debug_assert!(!self.scopes.is_empty(), "popped the outermost scope");
    }

    pub fn declare_variable(&mut self, name: &str, binding: VariableBinding) {
        self.scopes
            .last_mut()
            .expect("at least one scope always exists")
            .variables
            .insert(name.to_string(), binding);
    }

    pub fn lookup_variable(&self, name: &str) -> Option<&VariableBinding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(name))
    }

    pub fn mark_initialized(&mut self, name: &str) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(binding) = scope.variables.get_mut(name) {
                binding.initialized = true;
                return;
            }
        }
    }
}
