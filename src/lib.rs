//! Behavior-tree evaluator, scripting VM, and blackboard memory for
//! game-entity AI.
//!
//! An entity's behavior is a tree of composites (`Sequence`, `Selector`,
//! `Parallel`, ...) and leaves (`Condition`, `Execute`, `KnowledgeSet`, ...)
//! walked depth-first once per tick by [`behavior::ai_eval`]. Leaves that
//! need real logic embed a small dynamically-typed script, compiled by
//! [`compiler`] into [`bytecode::Program`]s and run by [`vm::Vm`] against a
//! shared [`memory::Memory`] blackboard.
//!
//! ```text
//! source text -> lex -> parse (-> Doc) -> optimize -> codegen -> Program -> Vm::run
//! ```

#![warn(clippy::all)]

pub mod behavior;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod diag;
pub mod memory;
pub mod noise;
pub mod panic;
pub mod pos;
pub mod sym;
pub mod value;
pub mod vm;

pub use behavior::{ai_eval, BehaviorTree, Compare, EvalContext, EvalResult, SourceValue, Tracer, TreeBuilder};
pub use bytecode::{Opcode, Program};
pub use compiler::binder::Binder;
pub use compiler::sig::{ArgFlags, ArgInfo, Signature};
pub use config::ScriptConfig;
pub use diag::{DiagBag, DiagKind, Diagnostic, Severity};
pub use memory::{Key, Memory};
pub use panic::{Panic, PanicKind, PanicOutputFlags};
pub use pos::{Pos, Range};
pub use value::{TypeMask, Value, ValueType};
pub use vm::Vm;

/// Library version, reported by `scriptc --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs `source` end to end (lex, parse, optimize, compile, execute) against
/// a fresh [`memory::Memory`] and the given [`Binder`]. Convenience wrapper
/// for callers that don't need the intermediate `Doc`/diagnostics — the CLI
/// and the integration tests build the pipeline by hand instead so they can
/// inspect diagnostics and disassembly.
pub fn eval(source: &str, binder: &Binder) -> Result<Value, EvalError> {
    let mut parsed = compiler::parse::parse(source, binder);
    if parsed.diagnostics.has_errors() {
        return Err(EvalError::Diagnostics(parsed.diagnostics));
    }
    compiler::optimize::optimize(&mut parsed.doc, parsed.root);
    let program = compiler::codegen::compile(&parsed.doc, parsed.root, binder.signature_hash())
        .map_err(EvalError::Compile)?;
    let mut memory = Memory::new();
    Vm::new(&program, binder).run(&mut memory).map_err(EvalError::Panic)
}

#[derive(Debug)]
pub enum EvalError {
    Diagnostics(DiagBag),
    Compile(compiler::codegen::CompileError),
    Panic(Panic),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Diagnostics(bag) => write!(f, "{} diagnostic(s)", bag.diagnostics().len()),
            EvalError::Compile(e) => write!(f, "{:?}", e),
            EvalError::Panic(p) => write!(f, "{}", p),
        }
    }
}

impl std::error::Error for EvalError {}
