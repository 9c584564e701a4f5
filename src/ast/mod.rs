//! The read-only tree semantic analysis consumes.
//!
//! MinZ's surface parser is a separate, out-of-scope component; this
//! module only fixes the shape it produces so `sema` has something
//! concrete to walk. Nothing under `ast` mutates after construction —
//! these values live for the whole compilation.

pub mod expr;
pub mod item;
pub mod types;

pub use expr::{BinaryOp, Expr, ExprKind, MatchArm, Pattern, Stmt, StmtKind, UnaryOp};
pub use item::{
    EnumDef, EnumVariant, Function, ImplBlock, InterfaceDef, InterfaceMethod, Item, MetaBlock,
    Module, Param, StructDef,
};
pub use types::Type;
