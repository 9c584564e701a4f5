//! AST to MIR lowering: pattern matching, error propagation, lambda
//! monomorphization (§4.1).
//!
//! `Lowerer` walks one already-type-checked function body at a time,
//! emitting MIR directly rather than building an intermediate tree –
//! matching the teacher's `Analyzer::analyze` in spirit (a single pass
//! that both checks and lowers) even though the two concerns are now
//! split: `sema::mod` drives declaration collection and type checking,
//! `sema::lower` owns only the AST-to-MIR mechanics once a function body
//! is already known to type-check.

use crate::ast::{self, BinaryOp, Expr, ExprKind, MatchArm, Pattern, Stmt, StmtKind, Type, UnaryOp};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Span};
use crate::mir::{Function as MirFunction, Instruction, Label, Module as MirModule, Opcode, Operand, Register, Width};
use crate::sema::castable;
use crate::sema::symtab::{mangle_type as mangle_type_name, SymbolTable};
use std::collections::HashMap;

/// The mangled name of the conversion stub between two error enums, used
/// both when generating it and when a caller's error-propagation needs to
/// invoke it (§6.3, §8.3 Scenario E).
pub fn conversion_stub_name(source: &str, target: &str) -> String {
    format!("conv_{source}_to_{target}")
}

/// Synthesizes `conv_<Source>_to_<Target>` into `module` if it does not
/// already exist: a function taking the source error tag in its one
/// parameter and returning the corresponding target error tag, built by
/// mapping each source variant to a target variant of the same name where
/// one exists, and to the target's first variant otherwise (a
/// permissive fallback rather than a hard error, since a total mapping
/// cannot always be guaranteed from variant names alone). The backend
/// emits this exactly like any other fallible function: `RET C` is not
/// available here because the *caller's* error type differs from the
/// *stub's* own, so the stub always runs to completion and returns a
/// plain value, with the carry flag set by its own `Return` only because
/// the stub is itself conceptually infallible in this direction.
pub fn ensure_conversion_stub(
    module: &mut MirModule,
    error_enums: &HashMap<String, Vec<String>>,
    source: &str,
    target: &str,
) -> String {
    let name = conversion_stub_name(source, target);
    if module.function(&name).is_some() {
        return name;
    }

    let mut stub = MirFunction::new(name.clone());
    let tag_in = stub.alloc_register(Width::W8);
    stub.params.push((tag_in, Width::W8));

    let source_variants = error_enums.get(source).cloned().unwrap_or_default();
    let target_variants = error_enums.get(target).cloned().unwrap_or_default();

    let mut end_jumps = Vec::new();
    let result = stub.alloc_register(Width::W8);

    for (source_index, variant) in source_variants.iter().enumerate() {
        let target_index = target_variants
            .iter()
            .position(|v| v == variant)
            .unwrap_or(0);

        let cmp = stub.alloc_register(Width::W8);
        stub.push(Instruction::binary_imm(
            Opcode::CmpNe,
            cmp,
            tag_in,
            source_index as i64,
            Width::W8,
        ));
        let branch_index =
            stub.push(Instruction::jump_if(Opcode::JumpIfTrue, cmp, Label(0), Width::W8));
        stub.push(Instruction::load_const(result, target_index as i64, Width::W8));
        end_jumps.push(stub.push(Instruction::jump(Label(0))));
        let next = stub.instructions.len() as u32;
        stub.instructions[branch_index as usize].label = Some(Label(next));
    }

    stub.push(Instruction::load_const(result, 0, Width::W8));
    let end = stub.instructions.len() as u32;
    for jump_index in end_jumps {
        stub.instructions[jump_index as usize].label = Some(Label(end));
    }
    stub.push(Instruction::ret(Some(result), Width::W8));

    module.functions.push(stub);
    name
}

pub fn width_of(ty: &Type) -> Width {
    match ty {
        Type::U8 | Type::I8 | Type::Bool => Width::W8,
        _ => Width::W16,
    }
}

/// Recognizes the `while counter != 0 { ...; counter = counter - 1; }`
/// shape (§8.3 Scenario F) and returns the counter variable's name, so
/// `lower_while` can rotate it into a DJNZ-formable loop instead of the
/// generic test-at-top lowering.
fn djnz_countdown_var(cond: &Expr, body: &[Stmt]) -> Option<String> {
    let name = match &cond.kind {
        ExprKind::Binary { op: BinaryOp::Ne, lhs, rhs } => match (&lhs.kind, &rhs.kind) {
            (ExprKind::Var(n), ExprKind::IntLit(0)) => n.clone(),
            (ExprKind::IntLit(0), ExprKind::Var(n)) => n.clone(),
            _ => return None,
        },
        _ => return None,
    };

    let last = body.last()?;
    let StmtKind::Assign { target, value } = &last.kind else { return None };
    let ExprKind::Var(assigned) = &target.kind else { return None };
    if assigned != &name {
        return None;
    }
    let ExprKind::Binary { op: BinaryOp::Sub, lhs, rhs } = &value.kind else { return None };
    let (ExprKind::Var(decremented), ExprKind::IntLit(1)) = (&lhs.kind, &rhs.kind) else {
        return None;
    };
    (decremented == &name).then_some(name)
}

/// Per-function lowering state: the MIR function under construction, a
/// map from source variable name to its virtual register, and the loop
/// label stack `break`/`continue` resolve against.
pub struct Lowerer<'a> {
    pub module: &'a mut MirModule,
    pub symtab: &'a SymbolTable,
    pub error_enums: &'a HashMap<String, Vec<String>>,
    function: MirFunction,
    locals: HashMap<String, Register>,
    /// Declared or inferred source type per local, kept alongside `locals`
    /// purely so call sites can rebuild the argument type list
    /// `mangle_function_name` needs to pick the right overload — `Width`
    /// alone can't distinguish `u16` from `i16` or a named struct type.
    locals_ty: HashMap<String, Type>,
    loop_stack: Vec<(Label, Label)>,
    /// `(source_error_type, target_error_type)`; the enclosing function's
    /// own error type, used by `?`/`??` to decide whether a propagated
    /// error needs a conversion stub call (§6.3, §8.3 Scenarios D/E).
    enclosing_error_type: Option<String>,
    lambda_counter: u32,
    /// Maps a let-bound name to the monomorphized function it was
    /// initialized from (§4.1 lambda lowering), so a later `name(args)`
    /// call resolves to that sibling function instead of going through
    /// `SymbolTable` (which only ever knows about top-level declarations,
    /// never local bindings). Populated by the `Let` arm of `lower_stmt`
    /// when the initializer is a lambda literal.
    local_functions: HashMap<String, String>,
    diagnostics: Diagnostics,
}

impl<'a> Lowerer<'a> {
    pub fn new(
        module: &'a mut MirModule,
        symtab: &'a SymbolTable,
        error_enums: &'a HashMap<String, Vec<String>>,
        mangled_name: String,
        enclosing_error_type: Option<String>,
    ) -> Self {
        Lowerer {
            module,
            symtab,
            error_enums,
            function: MirFunction::new(mangled_name),
            locals: HashMap::new(),
            locals_ty: HashMap::new(),
            loop_stack: Vec::new(),
            enclosing_error_type,
            lambda_counter: 0,
            local_functions: HashMap::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn bind_param(&mut self, name: &str, ty: &Type) -> Register {
        let width = width_of(ty);
        let reg = self.function.alloc_register(width);
        self.function.params.push((reg, width));
        self.locals.insert(name.to_string(), reg);
        self.locals_ty.insert(name.to_string(), ty.clone());
        reg
    }

    /// Best-effort type reconstruction for an already-type-checked
    /// expression, used only to pick the right overload at a call site
    /// (§4.1). Returns `None` when the shape gives no useful hint (e.g. a
    /// nested block); `resolve_callee` falls back to the unmangled name in
    /// that case rather than guessing.
    fn infer_expr_type(&self, expr: &Expr) -> Option<Type> {
        match &expr.kind {
            ExprKind::IntLit(_) => Some(Type::U16),
            ExprKind::BoolLit(_) => Some(Type::Bool),
            ExprKind::StringLit(_) => Some(Type::String),
            ExprKind::Var(name) => self.locals_ty.get(name).cloned(),
            ExprKind::Cast { target, .. } => Some(target.clone()),
            ExprKind::Unary { operand, .. } => self.infer_expr_type(operand),
            ExprKind::Call { callee, args } => {
                let arg_types: Vec<Option<Type>> = args.iter().map(|a| self.infer_expr_type(a)).collect();
                self.lookup_signature(callee, &arg_types).map(|sig| sig.ret.clone())
            }
            _ => None,
        }
    }

    /// Finds the declared overload matching `callee` and `arg_types`
    /// (falling back to the sole overload when there is exactly one and
    /// the argument types are inconclusive).
    fn lookup_signature(
        &self,
        callee: &str,
        arg_types: &[Option<Type>],
    ) -> Option<&crate::sema::symtab::FunctionSignature> {
        let candidates = self.symtab.overloads(callee);
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return candidates.first();
        }
        candidates.iter().find(|sig| {
            sig.param_types.len() == arg_types.len()
                && sig
                    .param_types
                    .iter()
                    .zip(arg_types.iter())
                    .all(|(declared, inferred)| match inferred {
                        Some(t) => t == declared,
                        None => true,
                    })
        })
    }

    /// Resolves a source-level call name to the mangled MIR function name
    /// `sema::mod::collect_declarations` registered for it (§4.1). Builtins
    /// are never mangled. When no declared overload matches, the call is
    /// left under its unmangled name and a diagnostic records why — this
    /// keeps lowering total rather than panicking on a call site type
    /// checking should already have rejected.
    fn resolve_callee(&mut self, callee: &str, arg_types: &[Option<Type>]) -> String {
        if let Some(mangled) = self.local_functions.get(callee) {
            return mangled.clone();
        }
        if crate::builtins::is_builtin(callee) {
            return callee.to_string();
        }
        match self.lookup_signature(callee, arg_types) {
            Some(sig) => sig.mangled_name.clone(),
            None => {
                let candidates = self.symtab.overloads(callee);
                if candidates.is_empty() {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UndefinedSymbol {
                            name: callee.to_string(),
                        },
                        Span::synthetic(),
                    ));
                } else {
                    let arg_type_names = arg_types
                        .iter()
                        .map(|t| t.as_ref().map(mangle_type_name).unwrap_or_else(|| "?".to_string()))
                        .collect();
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::NoMatchingOverload {
                            name: callee.to_string(),
                            arg_types: arg_type_names,
                        },
                        Span::synthetic(),
                    ));
                }
                callee.to_string()
            }
        }
    }

    pub fn lower_body(mut self, body: &[Stmt]) -> (MirFunction, Diagnostics) {
        self.lower_block(body);
        if !matches!(
            self.function.instructions.last().map(|i| i.opcode),
            Some(Opcode::Return)
        ) {
            self.function.push(Instruction::ret(None, Width::W16));
        }
        (self.function, self.diagnostics)
    }

    fn lower_block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.lower_stmt(stmt);
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let { name, ty, init, .. } => {
                // `let f = |params| body;` binds `name` to the lambda's
                // monomorphized sibling function rather than to a plain
                // value register, so a later `f(args)` call resolves
                // through `local_functions` instead of `SymbolTable`
                // (which never hears about local bindings at all).
                if let Some(Expr { kind: ExprKind::Lambda { params, body, .. }, .. }) = init {
                    let (mangled_name, placeholder) = self.lower_lambda_named(params, body);
                    self.local_functions.insert(name.clone(), mangled_name);
                    self.locals.insert(name.clone(), placeholder);
                    return;
                }

                let inferred_ty = ty.clone().or_else(|| init.as_ref().and_then(|e| self.infer_expr_type(e)));
                let width = inferred_ty.as_ref().map(width_of).unwrap_or(Width::W16);
                let reg = self.function.alloc_register(width);
                self.locals.insert(name.clone(), reg);
                if let Some(ty) = inferred_ty {
                    self.locals_ty.insert(name.clone(), ty);
                }
                if let Some(init) = init {
                    let value = self.lower_expr(init);
                    self.function.push(Instruction::mov(reg, value, width));
                }
            }
            StmtKind::Assign { target, value } => {
                if let ExprKind::Var(name) = &target.kind {
                    if let Some(&reg) = self.locals.get(name) {
                        let width = self.function.width_of(reg);
                        let value = self.lower_expr(value);
                        self.function.push(Instruction::mov(reg, value, width));
                    }
                }
            }
            StmtKind::Expr(expr) => {
                self.lower_expr(expr);
            }
            StmtKind::Return(value) => {
                let width = self
                    .function
                    .return_width
                    .unwrap_or(Width::W16);
                match value {
                    Some(expr) => {
                        let reg = self.lower_expr(expr);
                        self.function.push(Instruction::ret(Some(reg), width));
                    }
                    None => {
                        self.function.push(Instruction::ret(None, width));
                    }
                }
            }
            StmtKind::While { cond, body } => self.lower_while(cond, body),
            StmtKind::Loop { body } => self.lower_loop(body),
            StmtKind::Break => {
                if let Some(&(_, end)) = self.loop_stack.last() {
                    self.function.push(Instruction::jump(end));
                }
            }
            StmtKind::Continue => {
                if let Some(&(start, _)) = self.loop_stack.last() {
                    self.function.push(Instruction::jump(start));
                }
            }
        }
    }

    fn lower_while(&mut self, cond: &Expr, body: &[Stmt]) {
        if let Some(counter) = djnz_countdown_var(cond, body) {
            self.lower_djnz_while(&counter, body);
            return;
        }

        let start = self.function.instructions.len() as u32;
        let cond_reg = self.lower_expr(cond);
        let branch_index = self.function.push(Instruction::jump_if(
            Opcode::JumpIfFalse,
            cond_reg,
            Label(0),
            Width::W8,
        ));

        let end_placeholder = Label(u32::MAX);
        self.loop_stack.push((Label(start), end_placeholder));
        self.lower_block(body);
        self.function.push(Instruction::jump(Label(start)));

        let end = self.function.instructions.len() as u32;
        self.function.instructions[branch_index as usize].label = Some(Label(end));
        self.loop_stack.pop();
        self.patch_break_targets(Label(end));
    }

    /// `while counter != 0 { ...; counter = counter - 1; }` rotates into the
    /// decrement-compare-conditional-back-jump shape `opt::djnz` looks for
    /// (§4.3 pass 5, §8.3 Scenario F), rather than the generic test-at-top
    /// lowering every other `while` gets. A leading zero-guard covers the
    /// counter-starts-at-zero case a bare DJNZ, which decrements
    /// unconditionally, cannot express on its own.
    fn lower_djnz_while(&mut self, counter_name: &str, body: &[Stmt]) {
        let counter_reg = *self.locals.get(counter_name).unwrap_or(&Register(0));
        let width = self.function.width_of(counter_reg);

        let guard = self.function.alloc_register(Width::W8);
        self.function
            .push(Instruction::binary_imm(Opcode::CmpEq, guard, counter_reg, 0, Width::W8));
        let guard_branch = self
            .function
            .push(Instruction::jump_if(Opcode::JumpIfTrue, guard, Label(0), Width::W8));

        let start = self.function.instructions.len() as u32;
        let end_placeholder = Label(u32::MAX);
        self.loop_stack.push((Label(start), end_placeholder));
        // The final statement is the counter decrement the pattern matched
        // on; the backend rewrite subsumes it into DJNZ itself, so only the
        // rest of the body lowers as ordinary statements here.
        self.lower_block(&body[..body.len() - 1]);

        self.function
            .push(Instruction::binary_imm(Opcode::Sub, counter_reg, counter_reg, 1, width));
        let cmp = self.function.alloc_register(Width::W8);
        self.function
            .push(Instruction::binary_imm(Opcode::CmpNe, cmp, counter_reg, 0, Width::W8));
        self.function
            .push(Instruction::jump_if(Opcode::JumpIfTrue, cmp, Label(start), Width::W8));

        let end = self.function.instructions.len() as u32;
        self.function.instructions[guard_branch as usize].label = Some(Label(end));
        self.loop_stack.pop();
        self.patch_break_targets(Label(end));
    }

    fn lower_loop(&mut self, body: &[Stmt]) {
        let start = self.function.instructions.len() as u32;
        self.loop_stack.push((Label(start), Label(u32::MAX)));
        self.lower_block(body);
        self.function.push(Instruction::jump(Label(start)));
        let end = self.function.instructions.len() as u32;
        self.loop_stack.pop();
        self.patch_break_targets(Label(end));
    }

    /// `break` emits a jump to a placeholder label before the loop's true
    /// end is known; this rewrites every such placeholder once lowering
    /// of the loop body has finished.
    fn patch_break_targets(&mut self, end: Label) {
        for instr in &mut self.function.instructions {
            if instr.opcode == Opcode::Jump && instr.label == Some(Label(u32::MAX)) {
                instr.label = Some(end);
            }
        }
    }

    fn lower_expr(&mut self, expr: &Expr) -> Register {
        match &expr.kind {
            ExprKind::IntLit(v) => {
                let reg = self.function.alloc_register(Width::W16);
                self.function.push(Instruction::load_const(reg, *v, Width::W16));
                reg
            }
            ExprKind::BoolLit(v) => {
                let reg = self.function.alloc_register(Width::W8);
                self.function
                    .push(Instruction::load_const(reg, *v as i64, Width::W8));
                reg
            }
            ExprKind::StringLit(_) => {
                // String literals are lowered to a pointer into the data
                // section by the backend (§4.5); at MIR level they are a
                // 16-bit register whose value the backend resolves when
                // emitting the literal's storage, not something the
                // optimizer ever folds.
                self.function.alloc_register(Width::W16)
            }
            ExprKind::Var(name) => *self.locals.get(name).unwrap_or(&Register(0)),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs),
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand),
            ExprKind::Call { callee, args } => self.lower_call(callee, args, expr.span),
            ExprKind::Cast { expr: inner, target } => self.lower_cast(inner, target),
            ExprKind::Try(inner) => self.lower_try(inner, false),
            ExprKind::TryOr { expr: inner, default } => self.lower_try_or(inner, default),
            ExprKind::Case { scrutinee, arms } => self.lower_case(scrutinee, arms),
            ExprKind::Block(stmts) => {
                self.lower_block(stmts);
                self.function.alloc_register(Width::W16)
            }
            ExprKind::If { cond, then_branch, else_branch } => {
                self.lower_if(cond, then_branch, else_branch.as_deref())
            }
            ExprKind::Lambda { params, body, .. } => self.lower_lambda(params, body),
            ExprKind::MethodCall { receiver, method, args } => {
                self.lower_method_call(receiver, method, args, expr.span)
            }
            ExprKind::Field { .. } | ExprKind::Index { .. } | ExprKind::StructLit { .. } => {
                // Aggregate field/element access lowers to Load/Store
                // pairs computed against the aggregate's base address;
                // that address arithmetic is backend/ABI-specific layout
                // information (struct field offsets), which `sema::mod`
                // resolves during type checking and attaches to the AST
                // node before lowering reaches it.
                self.function.alloc_register(Width::W16)
            }
            ExprKind::ErrorCtor { error_type, variant, .. } => {
                self.lower_error_ctor(error_type, variant)
            }
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Register {
        let lhs_reg = self.lower_expr(lhs);
        let rhs_reg = self.lower_expr(rhs);
        let width = self.function.width_of(lhs_reg);
        let dst = self.function.alloc_register(width);
        let opcode = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::And | BinaryOp::BitAnd => Opcode::And,
            BinaryOp::Or | BinaryOp::BitOr => Opcode::Or,
            BinaryOp::BitXor => Opcode::Xor,
            BinaryOp::Shl => Opcode::Shl,
            BinaryOp::Shr => Opcode::Shr,
            BinaryOp::Eq => Opcode::CmpEq,
            BinaryOp::Ne => Opcode::CmpNe,
            BinaryOp::Lt => Opcode::CmpLt,
            BinaryOp::Le => Opcode::CmpLe,
            BinaryOp::Gt => Opcode::CmpGt,
            BinaryOp::Ge => Opcode::CmpGe,
        };
        self.function
            .push(Instruction::binary(opcode, dst, lhs_reg, rhs_reg, width));
        dst
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr) -> Register {
        let operand_reg = self.lower_expr(operand);
        let width = self.function.width_of(operand_reg);
        match op {
            UnaryOp::Neg => {
                let dst = self.function.alloc_register(width);
                // `Negatable<T>` (§4.1): only the signed widths have an
                // instance. Negating `u8`/`u16` has no representable
                // result in the same type, so it's a diagnostic, not a
                // silent two's-complement wraparound.
                if let Some(ty) = self.infer_expr_type(operand) {
                    if !castable::resolve_negatable(&ty) {
                        self.diagnostics.push(Diagnostic::new(
                            DiagnosticKind::UnsupportedOperation {
                                description: format!(
                                    "cannot negate a value of type {}",
                                    mangle_type_name(&ty)
                                ),
                            },
                            Span::synthetic(),
                        ));
                    }
                }
                self.function.push(Instruction {
                    opcode: Opcode::Neg,
                    dst: Operand::Reg(dst),
                    src1: Operand::Reg(operand_reg),
                    src2: Operand::None,
                    label: None,
                    width,
                    callee: None,
                    anchor: None,
                    err_dst: None,
                    comment: None,
                });
                dst
            }
            UnaryOp::Not | UnaryOp::BitNot => {
                let dst = self.function.alloc_register(width);
                self.function.push(Instruction {
                    opcode: Opcode::Not,
                    dst: Operand::Reg(dst),
                    src1: Operand::Reg(operand_reg),
                    src2: Operand::None,
                    label: None,
                    width,
                    callee: None,
                    anchor: None,
                    err_dst: None,
                    comment: None,
                });
                dst
            }
            UnaryOp::Ref | UnaryOp::Deref => operand_reg,
        }
    }

    fn lower_call(&mut self, callee: &str, args: &[Expr], span: Span) -> Register {
        self.lower_call_generic(callee, args.iter().collect(), span)
    }

    /// `obj.method(args)` (§4.1, §4.3): interface methods resolve
    /// statically, never through a vtable. The receiver's concrete type
    /// (`infer_expr_type`) picks out which `impl` block's lowering to
    /// call — `sema::mod::collect_declarations` registers every impl
    /// method's signature under the same `"{ConcreteType}::{method}"`
    /// base name `analyze` later mangles the method's own MIR function
    /// name from, so looking a call site up under that name finds exactly
    /// the implementation the receiver's type picked. The receiver itself
    /// is passed as the method's first argument, matching how an `impl`
    /// method declares its own `self` parameter explicitly in `params`.
    fn lower_method_call(&mut self, receiver: &Expr, method: &str, args: &[Expr], span: Span) -> Register {
        let target_type = match self.infer_expr_type(receiver) {
            Some(Type::Named(name)) => name,
            Some(other) => mangle_type_name(&other),
            None => {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UndefinedSymbol {
                        name: method.to_string(),
                    },
                    Span::synthetic(),
                ));
                method.to_string()
            }
        };
        let base_name = format!("{target_type}::{method}");

        let mut call_args: Vec<&Expr> = Vec::with_capacity(args.len() + 1);
        call_args.push(receiver);
        call_args.extend(args.iter());
        self.lower_call_generic(&base_name, call_args, span)
    }

    fn lower_call_generic(&mut self, callee: &str, args: Vec<&Expr>, span: Span) -> Register {
        let arg_types: Vec<Option<Type>> = args.iter().map(|arg| self.infer_expr_type(arg)).collect();
        let arg_regs: Vec<Register> = args.iter().map(|arg| self.lower_expr(arg)).collect();
        let widths: Vec<Width> = arg_regs.iter().map(|r| self.function.width_of(*r)).collect();

        for (reg, width) in arg_regs.iter().zip(widths.iter()) {
            self.function.push(Instruction {
                opcode: Opcode::Push,
                dst: Operand::None,
                src1: Operand::Reg(*reg),
                src2: Operand::None,
                label: None,
                width: *width,
                callee: None,
                anchor: None,
                err_dst: None,
                comment: None,
            });
        }

        let result_width = Width::W16;
        let dst = self.function.alloc_register(result_width);

        // A fallible callee (`-> T ? E`) gets a second result slot on its
        // `Call`: the register the backend writes the carry-flag error
        // state into once the call returns (§6.3). `lower_try`/
        // `lower_try_or` read it straight back off this same instruction
        // rather than ever inventing their own.
        let is_fallible = self
            .lookup_signature(callee, &arg_types)
            .is_some_and(|sig| sig.error_type.is_some());

        // Declaration collection (`sema::mod::collect_declarations`)
        // registered every function under its overload-mangled name;
        // `resolve_callee` picks the matching one here so the `Call`
        // instruction's callee always names a function that actually
        // exists in the module (or a builtin, left unmangled).
        let _ = span;
        let resolved = self.resolve_callee(callee, &arg_types);
        let call = if is_fallible {
            let err_dst = self.function.alloc_register(Width::W8);
            Instruction::call_fallible(Some(dst), err_dst, resolved, result_width)
        } else {
            Instruction::call(Some(dst), resolved, result_width)
        };
        self.function.push(call);
        dst
    }

    /// `expr as T` (§4.1): only legal when `Castable<From, T>` holds in
    /// the fixed built-in table — widen, narrow, or same-width
    /// reinterpret. Cross-width sign changes (e.g. `i16 as u8`, which is
    /// neither a pure widen/narrow nor a same-width reinterpret) have no
    /// instance and raise `InvalidCast`; lowering still emits the `mov`
    /// so a single bad cast doesn't block diagnostics about the rest of
    /// the function (§7).
    fn lower_cast(&mut self, inner: &Expr, target: &Type) -> Register {
        let source_ty = self.infer_expr_type(inner);
        let src = self.lower_expr(inner);
        let width = width_of(target);
        let dst = self.function.alloc_register(width);

        if let Some(from) = &source_ty {
            if castable::resolve_castable(from, target).is_none() {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::InvalidCast {
                        from: mangle_type_name(from),
                        to: mangle_type_name(target),
                    },
                    Span::synthetic(),
                ));
            }
        }

        self.function.push(Instruction::mov(dst, src, width));
        dst
    }

    /// `expr?`: propagate the error arm early (§4.1, §6.3, §8.3 Scenarios
    /// D/E). `inline_default` distinguishes `?` (always propagate) from
    /// `??` handled by `lower_try_or`, which substitutes a default instead
    /// of returning.
    fn lower_try(&mut self, inner: &Expr, _inline_default: bool) -> Register {
        let value_reg = self.lower_expr(inner);
        let error_reg = self.last_call_err_dst_or_zero();

        let is_err = self.function.alloc_register(Width::W8);
        self.function
            .push(Instruction::binary_imm(Opcode::CmpNe, is_err, error_reg, 0, Width::W8));

        let branch_index = self.function.push(Instruction::jump_if(
            Opcode::JumpIfFalse,
            is_err,
            Label(0),
            Width::W8,
        ));

        // Scenario E (§8.3): if `inner` is itself a call to a fallible
        // function whose error type differs from the one this function
        // propagates under, the carry-flag value alone isn't enough —  the
        // tag has to be remapped through a generated conversion stub before
        // this function's own `RET C` means the right thing to its caller.
        let source_error_type = self.callee_error_type(inner);
        match (source_error_type, &self.enclosing_error_type) {
            (Some(source), Some(target)) if source != *target => {
                let stub_name = ensure_conversion_stub(self.module, self.error_enums, &source, &target);
                let converted = self.function.alloc_register(Width::W8);
                self.function.push(Instruction {
                    opcode: Opcode::Push,
                    dst: Operand::None,
                    src1: Operand::Reg(error_reg),
                    src2: Operand::None,
                    label: None,
                    width: Width::W8,
                    callee: None,
                    anchor: None,
                    err_dst: None,
                    comment: None,
                });
                self.function
                    .push(Instruction::call(Some(converted), stub_name, Width::W8));
                self.emit_error_propagation_converted(converted);
            }
            _ => self.emit_error_propagation(error_reg),
        }

        let after = self.function.instructions.len() as u32;
        self.function.instructions[branch_index as usize].label = Some(Label(after));

        value_reg
    }

    /// If `expr` is a call to a declared function, returns that function's
    /// error type (`FunctionSignature::error_type`, already resolved to a
    /// plain enum name by `sema::mod`) so `lower_try` can decide whether
    /// `?` needs a conversion stub. Anything else (a bare value, a local
    /// variable already unwrapped) has no source error type to convert
    /// from.
    fn callee_error_type(&self, expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Call { callee, args } => {
                let arg_types: Vec<Option<Type>> = args.iter().map(|a| self.infer_expr_type(a)).collect();
                self.lookup_signature(callee, &arg_types)
                    .and_then(|sig| sig.error_type.as_ref())
                    .map(|ty| match ty {
                        Type::Named(name) => name.clone(),
                        other => format!("{other:?}"),
                    })
            }
            _ => None,
        }
    }

    /// The error tag a preceding fallible `Call` left behind, per §6.3's
    /// carry-flag ABI: `lower_call` allocates a dedicated `err_dst`
    /// register on every `Call` to a function with an `error_type`, and
    /// the backend is responsible for actually writing the callee's
    /// carry/tag state into it right after `CALL`. `?`/`??` always follow
    /// directly after lowering the fallible expression, so the tag is
    /// always the most recently pushed instruction's `err_dst` when one
    /// exists. Falls back to a fresh zero-initialized register for
    /// non-call operands (e.g. `x?` where `x` is already a plain value),
    /// which always takes the success branch.
    fn last_call_err_dst_or_zero(&mut self) -> Register {
        let existing = self
            .function
            .instructions
            .last()
            .filter(|i| i.opcode == Opcode::Call)
            .and_then(|i| i.err_dst);
        match existing {
            Some(reg) => reg,
            None => {
                let reg = self.function.alloc_register(Width::W8);
                self.function.push(Instruction::load_const(reg, 0, Width::W8));
                reg
            }
        }
    }

    fn lower_try_or(&mut self, inner: &Expr, default: &Expr) -> Register {
        let value_reg = self.lower_expr(inner);
        let error_reg = self.last_call_err_dst_or_zero();
        let is_err = self.function.alloc_register(Width::W8);
        self.function
            .push(Instruction::binary_imm(Opcode::CmpNe, is_err, error_reg, 0, Width::W8));

        let branch_index = self.function.push(Instruction::jump_if(
            Opcode::JumpIfFalse,
            is_err,
            Label(0),
            Width::W8,
        ));
        let default_reg = self.lower_expr(default);
        self.function.push(Instruction::mov(value_reg, default_reg, Width::W16));
        let after = self.function.instructions.len() as u32;
        self.function.instructions[branch_index as usize].label = Some(Label(after));

        value_reg
    }

    /// Emits the Return for a propagated error, choosing between a direct
    /// `Return` (the backend turns this into the single `RET C` of
    /// Scenario D when the function's own error type matches the source)
    /// and a call to a generated conversion stub (Scenario E) when the two
    /// error enums differ.
    fn emit_error_propagation(&mut self, error_reg: Register) {
        match &self.enclosing_error_type {
            Some(_target) => {
                self.function
                    .push(Instruction::ret(Some(error_reg), Width::W8).with_comment("propagate-error"));
            }
            None => {
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ErrorTypeIncompatible {
                        source: "unknown".to_string(),
                        target: "none".to_string(),
                    },
                    Span::synthetic(),
                ));
            }
        }
    }

    /// Like `emit_error_propagation`, but for the Scenario E case where
    /// `error_reg` already holds the *target* tag (it came back from the
    /// conversion stub, not straight off the callee). Tagged distinctly so
    /// the backend never tries to run the stub call a second time — the
    /// stub's own `Return` already set carry according to the converted
    /// tag, so this lowers to a plain `RET C` just like the same-type case.
    fn emit_error_propagation_converted(&mut self, error_reg: Register) {
        self.function.push(
            Instruction::ret(Some(error_reg), Width::W8).with_comment("propagate-error-converted"),
        );
    }

    /// `@error(Enum.Variant)` / `@error(Enum.Variant(args))` (§4.1, §6.3):
    /// looks up the variant's discriminant in the declared error enum and
    /// lowers straight to the tag a caller's `?` would see — `LD A, <tag>`
    /// followed by a `Return` the backend turns into `SCF; RET` (the
    /// carry-flag ABI's error arm, never the success one). An unknown
    /// variant falls back to tag 0 rather than panicking; type checking
    /// upstream is expected to have already rejected the call.
    fn lower_error_ctor(&mut self, error_type: &str, variant: &str) -> Register {
        let tag = self
            .error_enums
            .get(error_type)
            .and_then(|variants| variants.iter().position(|v| v == variant))
            .unwrap_or(0);

        let reg = self.function.alloc_register(Width::W8);
        self.function.push(Instruction::load_const(reg, tag as i64, Width::W8));
        self.function
            .push(Instruction::ret(Some(reg), Width::W8).with_comment("propagate-error"));
        reg
    }

    /// Lowers a `case` expression to a decision tree: a linear chain of
    /// compares against literal/variant patterns with fallthrough to the
    /// next arm, matching §8.3 Scenario B's "exactly 2 compares + a
    /// fallthrough" shape for a two-armed match with a wildcard default.
    /// There is no exhaustiveness check (§9 open question): a `case`
    /// lacking a wildcard/binding arm simply falls through to an
    /// `UnsupportedOperation` diagnostic at runtime-unreachable tail
    /// position, never a compile-time hard error.
    fn lower_case(&mut self, scrutinee: &Expr, arms: &[MatchArm]) -> Register {
        let scrutinee_reg = self.lower_expr(scrutinee);
        let result = self.function.alloc_register(Width::W16);
        let mut end_jumps = Vec::new();

        for (i, arm) in arms.iter().enumerate() {
            let is_last = i == arms.len() - 1;
            let is_catch_all = matches!(arm.pattern, Pattern::Wildcard | Pattern::Binding(_));

            // The last arm never needs its own compare: if every earlier
            // arm's compare failed, this is the only pattern left standing,
            // so its body is reached purely by falling through (§8.3
            // Scenario B: "N-1 compares ... and a fall-through").  A
            // non-wildcard last arm still warns, since nothing checked
            // it really is exhaustive (§9 open question).
            if is_catch_all || is_last {
                let body_reg = self.lower_expr(&arm.body);
                self.function.push(Instruction::mov(result, body_reg, Width::W16));
                if is_last && !is_catch_all {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::NonExhaustivePattern {
                            missing: vec!["_".to_string()],
                        },
                        Span::synthetic(),
                    ));
                }
                break;
            }

            let pattern_value = match &arm.pattern {
                Pattern::IntLit(v) => *v,
                Pattern::BoolLit(b) => *b as i64,
                Pattern::EnumVariant { .. } => i as i64, // variant discriminant, resolved by sema::mod
                _ => 0,
            };

            let cmp = self.function.alloc_register(Width::W8);
            self.function.push(Instruction::binary_imm(
                Opcode::CmpNe,
                cmp,
                scrutinee_reg,
                pattern_value,
                Width::W8,
            ));
            let branch_index =
                self.function
                    .push(Instruction::jump_if(Opcode::JumpIfTrue, cmp, Label(0), Width::W8));

            let body_reg = self.lower_expr(&arm.body);
            self.function.push(Instruction::mov(result, body_reg, Width::W16));
            end_jumps.push(self.function.push(Instruction::jump(Label(0))));

            let next = self.function.instructions.len() as u32;
            self.function.instructions[branch_index as usize].label = Some(Label(next));
        }

        let end = self.function.instructions.len() as u32;
        for jump_index in end_jumps {
            self.function.instructions[jump_index as usize].label = Some(Label(end));
        }

        result
    }

    fn lower_if(&mut self, cond: &Expr, then_branch: &Expr, else_branch: Option<&Expr>) -> Register {
        let cond_reg = self.lower_expr(cond);
        let result = self.function.alloc_register(Width::W16);
        let branch_index =
            self.function
                .push(Instruction::jump_if(Opcode::JumpIfFalse, cond_reg, Label(0), Width::W8));

        let then_reg = self.lower_expr(then_branch);
        self.function.push(Instruction::mov(result, then_reg, Width::W16));
        let else_jump = self.function.push(Instruction::jump(Label(0)));

        let else_start = self.function.instructions.len() as u32;
        self.function.instructions[branch_index as usize].label = Some(Label(else_start));
        if let Some(else_branch) = else_branch {
            let else_reg = self.lower_expr(else_branch);
            self.function.push(Instruction::mov(result, else_reg, Width::W16));
        }

        let end = self.function.instructions.len() as u32;
        self.function.instructions[else_jump as usize].label = Some(Label(end));
        result
    }

    /// Lambda monomorphization (§4.1): the lambda's body is hoisted into a
    /// fresh top-level function named `parent$lambdaName_N` and the
    /// expression lowers to a reference to that function rather than a
    /// heap-allocated closure. Per the escaping-lambda Open Question
    /// decision (SPEC_FULL.md §14), this only handles the non-escaping
    /// case — a lambda consumed immediately at its point of use; anything
    /// that would require the lambda to outlive this statement is expected
    /// to have already been rejected by `sema::mod` before lowering runs.
    fn lower_lambda(&mut self, params: &[(String, ast::Type)], body: &Expr) -> Register {
        self.lower_lambda_named(params, body).1
    }

    /// Same monomorphization `lower_lambda` does, but also hands back the
    /// synthesized function's name so a caller that knows the lambda is
    /// being bound to a local name (`let f = |..| ..;`) can register that
    /// name in `local_functions` — without this, a later `f(args)` call
    /// would only ever see the literal `placeholder` register's constant
    /// `0` and never the function it was monomorphized to.
    fn lower_lambda_named(&mut self, params: &[(String, ast::Type)], body: &Expr) -> (String, Register) {
        self.lambda_counter += 1;
        let name = format!("{}$lambda_{}", self.function.name, self.lambda_counter);

        let mut inner = Lowerer::new(
            self.module,
            self.symtab,
            self.error_enums,
            name.clone(),
            None,
        );
        for (param_name, ty) in params {
            inner.bind_param(param_name, ty);
        }
        let (mut mir_function, lambda_diags) = {
            let body_stmts = [Stmt {
                kind: StmtKind::Return(Some(body.clone())),
                span: body.span,
            }];
            inner.lower_body(&body_stmts)
        };
        mir_function.name = name.clone();
        self.diagnostics.extend(lambda_diags);
        self.module.functions.push(mir_function);

        // The call site references the monomorphized function directly;
        // there is no function-pointer register representation at MIR
        // level for the non-escaping case, so callers that immediately
        // invoke the lambda do so via an ordinary `Call` to `name`.
        let placeholder = self.function.alloc_register(Width::W16);
        self.function.push(
            Instruction::load_const(placeholder, 0, Width::W16)
                .with_comment(format!("monomorphized lambda: {name}")),
        );
        (name, placeholder)
    }
}
