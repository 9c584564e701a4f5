//! Shared AST-builder helpers for the scenario/property/idempotence
//! integration suites. Every scenario in spec.md §8.3 starts from MinZ
//! source text that this crate never parses (surface parsing is out of
//! scope, SPEC_FULL.md §1); these helpers build the equivalent
//! `ast::Module` directly, the same way `src/sema/mod.rs`'s own
//! `simple_module` test helper does.

#![allow(dead_code)]

use minzc::ast::{
    EnumDef, EnumVariant, Expr, ExprKind, Function, Item, Module, Param, Stmt, StmtKind, Type,
};
use minzc::diagnostics::Span;

pub fn span() -> Span {
    Span::synthetic()
}

pub fn expr(kind: ExprKind) -> Expr {
    Expr { kind, span: span() }
}

pub fn stmt(kind: StmtKind) -> Stmt {
    Stmt { kind, span: span() }
}

pub fn int(v: i64) -> Expr {
    expr(ExprKind::IntLit(v))
}

pub fn var(name: &str) -> Expr {
    expr(ExprKind::Var(name.to_string()))
}

pub fn binary(op: minzc::ast::BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    expr(ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn call(callee: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        callee: callee.to_string(),
        args,
    })
}

pub fn returns(e: Expr) -> StmtKind {
    StmtKind::Return(Some(e))
}

pub fn returns_nothing() -> StmtKind {
    StmtKind::Return(None)
}

pub fn param(name: &str, ty: Type) -> Param {
    Param {
        name: name.to_string(),
        ty,
    }
}

pub fn function(
    name: &str,
    params: Vec<Param>,
    ret: Type,
    error_type: Option<Type>,
    body: Vec<Stmt>,
) -> Function {
    Function {
        name: name.to_string(),
        params,
        ret,
        error_type,
        body,
        span: span(),
    }
}

pub fn error_enum(name: &str, variants: &[&str]) -> Item {
    Item::Enum(EnumDef {
        name: name.to_string(),
        variants: variants
            .iter()
            .map(|v| EnumVariant {
                name: v.to_string(),
                payload: Vec::new(),
            })
            .collect(),
        is_error_type: true,
        span: span(),
    })
}

pub fn let_stmt(name: &str, mutable: bool, ty: Option<Type>, init: Option<Expr>) -> StmtKind {
    StmtKind::Let {
        name: name.to_string(),
        mutable,
        ty,
        init,
    }
}

pub fn assign(target: Expr, value: Expr) -> StmtKind {
    StmtKind::Assign { target, value }
}

pub fn while_stmt(cond: Expr, body: Vec<Stmt>) -> StmtKind {
    StmtKind::While { cond, body }
}

pub fn cast(e: Expr, target: Type) -> Expr {
    expr(ExprKind::Cast {
        expr: Box::new(e),
        target,
    })
}

pub fn module(items: Vec<Item>) -> Module {
    Module {
        name: "test".to_string(),
        items,
    }
}
