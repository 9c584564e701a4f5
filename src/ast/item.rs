//! Top-level items: functions, types, interfaces, impls.

use super::expr::Stmt;
use super::types::Type;
use crate::diagnostics::Span;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    /// Present when the function is fallible (`-> T ? E`); `ret` then
    /// holds `T` and this holds `E`.
    pub error_type: Option<Type>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Param>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumVariant {
    pub name: String,
    /// Payload fields, empty for a unit variant.
    pub payload: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    /// Marks this enum as usable on the right-hand side of `-> T ? E` and
    /// in `@error(...)`. Distinguished from an ordinary enum because error
    /// enums also participate in carry-flag ABI conversion-stub generation.
    pub is_error_type: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceMethod {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    pub methods: Vec<InterfaceMethod>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplBlock {
    pub interface: Option<String>,
    pub target_type: String,
    pub methods: Vec<Function>,
    pub span: Span,
}

/// A `@minz[[[ ... ]]]` metaprogramming block. Its contents are carried as
/// an opaque source span rather than parsed further: executing one
/// requires the same MIR interpreter CTIE uses, run over the *surrounding*
/// compilation's own MIR, which is a staged bootstrapping concern the
/// driver owns rather than this crate's fixed AST-to-assembly pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaBlock {
    pub source: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Function(Function),
    Struct(StructDef),
    Enum(EnumDef),
    Interface(InterfaceDef),
    Impl(ImplBlock),
    Meta(MetaBlock),
}

/// The AST handed to semantic analysis. Immutable after construction: no
/// pass rewrites it in place, only reads it to build MIR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub items: Vec<Item>,
}

impl Module {
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Struct(s) => Some(s),
            _ => None,
        })
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Enum(e) => Some(e),
            _ => None,
        })
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Interface(i) => Some(i),
            _ => None,
        })
    }

    pub fn impls(&self) -> impl Iterator<Item = &ImplBlock> {
        self.items.iter().filter_map(|item| match item {
            Item::Impl(i) => Some(i),
            _ => None,
        })
    }
}
