//! `scriptc` — a small CLI front-end around the `scriptcore` library.
//!
//! Exists purely as a convenience for exercising the engine from a
//! terminal (running a script file, dumping its disassembly, or
//! evaluating a one-liner); it is explicitly outside the library's own
//! interface surface, kept as a thin wrapper the same way a CLI binary
//! should stay a thin wrapper over the library crate backing it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use scriptcore::compiler::{binder::Binder, codegen, optimize, parse};
use scriptcore::config::ScriptConfig;
use scriptcore::memory::Memory;
use scriptcore::panic::PanicOutputFlags;
use scriptcore::vm::Vm;

#[derive(Parser)]
#[command(name = "scriptc")]
#[command(version)]
#[command(about = "Behavior-tree + script VM CLI for the scriptcore engine", long_about = None)]
struct Cli {
    /// Install a tracing-subscriber `fmt` layer at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a script file against a fresh Memory.
    Run {
        /// Path to a `.script` source file.
        path: PathBuf,
    },
    /// Compile a script file and print its bytecode disassembly.
    Disasm { path: PathBuf },
    /// Parse, optimize, compile, and run a source snippet passed inline.
    Eval { source: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .init();
    }

    // script.toml governs optimizer toggles/limits for a host embedding the
    // engine; the CLI only loads it to report which project it's running in.
    let config = ScriptConfig::load_from_cwd().unwrap_or_default();
    tracing::debug!(package = %config.package.name, "loaded script.toml (or defaults)");

    match cli.command {
        Commands::Run { path } => run(&path),
        Commands::Disasm { path } => disasm(&path),
        Commands::Eval { source } => eval(&source),
    }
}

fn read_source(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn compile_source(source: &str, binder: &Binder) -> Result<scriptcore::bytecode::Program> {
    let mut parsed = parse::parse(source, binder);
    if parsed.diagnostics.has_errors() {
        for diag in parsed.diagnostics.diagnostics() {
            eprintln!("{}", diag);
        }
        anyhow::bail!("{} diagnostic(s)", parsed.diagnostics.diagnostics().len());
    }
    optimize::optimize(&mut parsed.doc, parsed.root);
    let program = codegen::compile(&parsed.doc, parsed.root, binder.signature_hash())
        .context("compiling to bytecode")?;
    program.validate().context("validating compiled bytecode")?;
    Ok(program)
}

fn run(path: &PathBuf) -> Result<()> {
    let source = read_source(path)?;
    let binder = Binder::new();
    let program = compile_source(&source, &binder)?;
    let mut memory = Memory::new();
    match Vm::new(&program, &binder).run(&mut memory) {
        Ok(value) => {
            println!("{}", value);
            Ok(())
        }
        Err(panic) => {
            eprintln!("{}", panic.display(&source, PanicOutputFlags::IncludeRange));
            anyhow::bail!("script panicked");
        }
    }
}

fn disasm(path: &PathBuf) -> Result<()> {
    let source = read_source(path)?;
    let binder = Binder::new();
    let program = compile_source(&source, &binder)?;
    print!("{}", program.disassemble());
    Ok(())
}

fn eval(source: &str) -> Result<()> {
    let binder = Binder::new();
    let program = compile_source(source, &binder)?;
    let mut memory = Memory::new();
    match Vm::new(&program, &binder).run(&mut memory) {
        Ok(value) => {
            println!("{}", value);
            Ok(())
        }
        Err(panic) => {
            eprintln!("{}", panic.display(source, PanicOutputFlags::IncludeRange));
            anyhow::bail!("script panicked");
        }
    }
}
