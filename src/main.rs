//! `minzc` — the thin CLI driver around the `minzc` library (SPEC_FULL.md
//! §10.2). The surface MinZ parser is out of scope for this crate
//! (spec.md §1), so the input this binary reads is already a serialized
//! `ast::Module` (JSON, via `serde_json`) rather than MinZ source text —
//! the "input AST or source path" boundary spec.md §6.2 describes.
//!
//! Everything below the `ast::Module` boundary — analysis, optimization,
//! code generation — lives in the library and returns its own typed
//! errors; this binary's only job is wiring argv to `minzc::compile` and
//! printing the result, using `anyhow` at this outer boundary the same
//! way the teacher's `main.rs` does, while the library itself never
//! returns `anyhow::Error`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use minzc::ast::Module as AstModule;
use minzc::config::{CompilerConfig, OptimizationFlags};
use minzc::{compile, mir, opt, sema};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minzc")]
#[command(version)]
#[command(about = "MinZ compiler core: AST to MIR to optimized Z80 assembly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a serialized AST module to target assembly.
    Compile {
        /// Path to a JSON-serialized `ast::Module` (§12).
        input: PathBuf,

        /// Output path for the generated assembly; prints to stdout if
        /// omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Backend name registered with the `Backend` trait. Only `z80`
        /// is implemented by this crate (spec.md §1).
        #[arg(long, default_value = "z80")]
        target: String,

        /// Comma-separated optimizer passes to enable, from
        /// {ctie,peephole,djnz,dce}. Constant folding and purity analysis
        /// always run regardless of this list (§4.3: later passes and the
        /// backend's SMC check both depend on their output). Omit this
        /// flag to enable every configurable pass.
        #[arg(long, value_delimiter = ',')]
        opt: Option<Vec<String>>,

        /// Print the MIR after each optimizer pass to stderr (§6.4: MIR
        /// may optionally be emitted as textual diagnostics).
        #[arg(long)]
        emit_mir: bool,
    },

    /// Pretty-print MIR after each optimizer pass without generating
    /// assembly.
    DumpMir {
        /// Path to a JSON-serialized `ast::Module` (§12).
        input: PathBuf,

        #[arg(long, value_delimiter = ',')]
        opt: Option<Vec<String>>,
    },

    /// Run semantic analysis only and print any diagnostics.
    Check {
        /// Path to a JSON-serialized `ast::Module` (§12).
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Compile {
            input,
            output,
            target,
            opt,
            emit_mir,
        } => run_compile(input, output, target, opt, emit_mir),
        Commands::DumpMir { input, opt } => run_dump_mir(input, opt),
        Commands::Check { input } => run_check(input),
    }
}

fn load_ast(path: &PathBuf) -> Result<AstModule> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading AST input {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing {} as a JSON-serialized ast::Module", path.display()))
}

/// Builds the flags this CLI surfaces (§10.2's `--opt ctie,peephole,djnz,dce`).
/// `None` enables every configurable pass, matching `CompilerConfig`'s own
/// default. Constant folding is always on: it is not in the CLI's list
/// because nothing downstream can be disabled independently of it without
/// breaking the pass-ordering invariants `opt::run_pipeline` documents.
fn flags_from_opt(opt: &Option<Vec<String>>) -> OptimizationFlags {
    let Some(names) = opt else {
        return OptimizationFlags::all();
    };
    let enabled = |name: &str| names.iter().any(|n| n == name);
    OptimizationFlags {
        constant_folding: true,
        ctie: enabled("ctie"),
        peephole: enabled("peephole"),
        djnz: enabled("djnz"),
        dead_code_elimination: enabled("dce"),
    }
}

fn print_diagnostics(diagnostics: &minzc::diagnostics::Diagnostics) {
    for diagnostic in diagnostics.iter() {
        eprintln!("{diagnostic}");
    }
}

fn run_compile(
    input: PathBuf,
    output: Option<PathBuf>,
    target: String,
    opt: Option<Vec<String>>,
    emit_mir: bool,
) -> Result<()> {
    let module = load_ast(&input)?;
    let mut config = CompilerConfig::default();
    config.build.target = target;
    config.build.optimization = flags_from_opt(&opt);

    if emit_mir {
        dump_pipeline(&module, &config.build.optimization)?;
    }

    match compile(&module, &config) {
        Ok(program) => {
            print_diagnostics(&program.diagnostics);
            match output {
                Some(path) => {
                    fs::write(&path, &program.source)
                        .with_context(|| format!("writing {}", path.display()))?;
                }
                None => print!("{}", program.source),
            }
            Ok(())
        }
        Err(err) => {
            if let minzc::CompileError::Analysis(diagnostics) = &err {
                print_diagnostics(diagnostics);
            }
            Err(err).context("compilation failed")
        }
    }
}

/// Pass-by-pass MIR dump used by both `--emit-mir` and `dump-mir`. Runs
/// the same fixed pass order `opt::run_pipeline` does (§4.3) rather than
/// calling it directly, so each intermediate module can be printed
/// between passes.
fn dump_pipeline(module: &AstModule, flags: &OptimizationFlags) -> Result<()> {
    let analysis = sema::analyze(module);
    print_diagnostics(&analysis.diagnostics);

    let mut mir_module = analysis.mir;
    eprintln!("=== after lowering ===");
    eprintln!("{}", format_module(&mir_module));

    opt::purity::run(&mut mir_module);
    eprintln!("=== after purity ===");
    eprintln!("{}", format_module(&mir_module));

    if flags.constant_folding {
        opt::constfold::run(&mut mir_module);
        eprintln!("=== after constfold ===");
        eprintln!("{}", format_module(&mir_module));
    }
    if flags.ctie {
        opt::ctie::run(&mut mir_module);
        eprintln!("=== after ctie ===");
        eprintln!("{}", format_module(&mir_module));
    }
    if flags.peephole {
        opt::peephole::run(&mut mir_module);
        eprintln!("=== after peephole ===");
        eprintln!("{}", format_module(&mir_module));
    }
    if flags.djnz {
        opt::djnz::run(&mut mir_module);
        eprintln!("=== after djnz ===");
        eprintln!("{}", format_module(&mir_module));
    }
    if flags.dead_code_elimination {
        opt::dce::run(&mut mir_module);
        eprintln!("=== after dce ===");
        eprintln!("{}", format_module(&mir_module));
    }
    opt::regpressure::run(&mut mir_module);
    eprintln!("=== after regpressure ===");
    eprintln!("{}", format_module(&mir_module));

    mir::validate(&mir_module).context("optimized MIR failed validation")?;
    Ok(())
}

fn format_module(module: &mir::Module) -> String {
    let mut out = String::new();
    for function in &module.functions {
        out.push_str(&format!(
            "fn {} (pure={:?}, smc={})\n",
            function.name, function.is_pure, function.uses_smc
        ));
        for (index, instruction) in function.instructions.iter().enumerate() {
            out.push_str(&format!("  {index:4}: {instruction}\n"));
        }
    }
    out
}

fn run_dump_mir(input: PathBuf, opt: Option<Vec<String>>) -> Result<()> {
    let module = load_ast(&input)?;
    let flags = flags_from_opt(&opt);
    dump_pipeline(&module, &flags)
}

fn run_check(input: PathBuf) -> Result<()> {
    let module = load_ast(&input)?;
    let analysis = sema::analyze(&module);
    print_diagnostics(&analysis.diagnostics);
    if analysis.diagnostics.has_fatal() {
        anyhow::bail!("semantic analysis reported errors");
    }
    mir::validate(&analysis.mir).context("lowered MIR failed validation")?;
    println!("ok");
    Ok(())
}
