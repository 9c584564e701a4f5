//! Benchmarks for the MinZ compiler pipeline, grounded on the teacher's
//! `benches/compile_bench.rs` structure: one `bench_*` function per
//! pipeline stage, each sweeping a handful of program sizes inside a
//! `criterion_group!`.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use minzc::ast::{BinaryOp, Expr, ExprKind, Function, Item, Module, Param, Stmt, StmtKind, Type};
use minzc::config::{CompilerConfig, OptimizationFlags};
use minzc::diagnostics::Span;
use minzc::{mir, opt, sema};

fn e(kind: ExprKind) -> Expr {
    Expr { kind, span: Span::synthetic() }
}

fn s(kind: StmtKind) -> Stmt {
    Stmt { kind, span: Span::synthetic() }
}

/// A chain of `n` leaf-arithmetic functions, `fN(a, b) = f{N-1}(a, b) + b`
/// bottoming out at plain addition, with `main` calling the top of the
/// chain on constant arguments — deep enough to exercise purity's
/// fixed-point call-graph walk and CTIE's recursive constant folding
/// rather than a single flat function.
fn create_call_chain(n: usize) -> Module {
    let mut items = Vec::with_capacity(n + 1);

    items.push(Item::Function(Function {
        name: "f0".to_string(),
        params: vec![
            Param { name: "a".to_string(), ty: Type::U16 },
            Param { name: "b".to_string(), ty: Type::U16 },
        ],
        ret: Type::U16,
        error_type: None,
        body: vec![s(StmtKind::Return(Some(e(ExprKind::Binary {
            op: BinaryOp::Add,
            lhs: Box::new(e(ExprKind::Var("a".to_string()))),
            rhs: Box::new(e(ExprKind::Var("b".to_string()))),
        }))))],
        span: Span::synthetic(),
    }));

    for i in 1..n {
        let callee = format!("f{}", i - 1);
        items.push(Item::Function(Function {
            name: format!("f{i}"),
            params: vec![
                Param { name: "a".to_string(), ty: Type::U16 },
                Param { name: "b".to_string(), ty: Type::U16 },
            ],
            ret: Type::U16,
            error_type: None,
            body: vec![s(StmtKind::Return(Some(e(ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(e(ExprKind::Call {
                    callee,
                    args: vec![e(ExprKind::Var("a".to_string())), e(ExprKind::Var("b".to_string()))],
                })),
                rhs: Box::new(e(ExprKind::Var("b".to_string()))),
            }))))],
            span: Span::synthetic(),
        }));
    }

    items.push(Item::Function(Function {
        name: "main".to_string(),
        params: vec![],
        ret: Type::U16,
        error_type: None,
        body: vec![s(StmtKind::Return(Some(e(ExprKind::Call {
            callee: format!("f{}", n - 1),
            args: vec![e(ExprKind::IntLit(1)), e(ExprKind::IntLit(2))],
        }))))],
        span: Span::synthetic(),
    }));

    Module { name: "bench".to_string(), items }
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pipeline");

    for &size in &[1, 8, 16, 32, 64] {
        let module = create_call_chain(size);
        group.throughput(Throughput::Elements(size as u64));

        let config = CompilerConfig::default();

        group.bench_function(format!("{size}_functions"), |b| {
            b.iter(|| {
                let result = minzc::compile(black_box(&module), &config);
                black_box(result)
            })
        });
    }

    group.finish();
}

fn bench_sema_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("sema_analyze");

    for &size in &[1, 8, 16, 32, 64] {
        let module = create_call_chain(size);
        group.bench_function(format!("{size}_functions"), |b| {
            b.iter(|| black_box(sema::analyze(black_box(&module))))
        });
    }

    group.finish();
}

fn bench_optimizer_fixed_point(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer_fixed_point");

    for &size in &[1, 8, 16, 32, 64] {
        let module = create_call_chain(size);
        let mir_module = sema::analyze(&module).mir;
        let flags = OptimizationFlags::all();

        group.bench_function(format!("{size}_functions"), |b| {
            b.iter_batched(
                || mir_module.clone(),
                |mut m: mir::Module| {
                    let result = opt::run_to_fixed_point(black_box(&mut m), &flags);
                    black_box(result)
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_full_pipeline, bench_sema_analyze, bench_optimizer_fixed_point);
criterion_main!(benches);
