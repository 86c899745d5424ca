//! The script compilation pipeline: lex -> parse -> optimize -> codegen.
//!
//! Each stage is its own module so tooling (the CLI's `disasm` subcommand,
//! the compile-pipeline benchmark, integration tests) can stop at whatever
//! stage it needs rather than only ever calling a single `compile` facade.

pub mod binder;
pub mod codegen;
pub mod doc;
pub mod intrinsic;
pub mod lex;
pub mod optimize;
pub mod parse;
pub mod sig;

pub use binder::{Binder, BinderFlags};
pub use codegen::{compile, CompileError};
pub use doc::{Doc, ExprId, VarId};
pub use optimize::optimize;
pub use parse::{parse, ParseResult};
pub use sig::{ArgFlags, ArgInfo, Signature};
