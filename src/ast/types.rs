//! Type expressions as written in source, before semantic resolution.
//!
//! These are the types the analyzer resolves into its own internal
//! `sema::Type` representation (which additionally tracks sizes, overload
//! mangling names, and Castable/Negatable membership). `ast::Type` only
//! needs to represent what a programmer could literally write down.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    U8,
    U16,
    I8,
    I16,
    Bool,
    String,
    Void,
    /// A named user type: struct, enum, or interface.
    Named(String),
    Pointer { mutable: bool, pointee: Box<Type> },
    Array { element: Box<Type>, len: u16 },
    /// `fn(A, B) -> R`, used for lambda parameter/return annotations and
    /// for first-class function values passed between functions.
    Function {
        params: Vec<Type>,
        ret: Box<Type>,
    },
    /// `T ? E`: a fallible return type, carrying both the success payload
    /// type and the error enum type used by carry-flag propagation.
    Fallible { ok: Box<Type>, err: Box<Type> },
}

impl Type {
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::U8 | Type::U16 | Type::I8 | Type::I16)
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Type::I8 | Type::I16)
    }
}
