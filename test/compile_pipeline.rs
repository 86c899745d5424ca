//! Exercises the full lex -> parse -> optimize -> compile -> validate ->
//! run pipeline from outside the crate, the way an embedder linking against
//! `scriptcore` as a library dependency would.

use scriptcore::compiler::binder::Binder;
use scriptcore::compiler::{codegen, optimize, parse};
use scriptcore::memory::Memory;
use scriptcore::vm::Vm;

/// Mirrors the FNV-1a key-hashing scheme `compiler::parse` uses internally
/// for `$name` memory accesses; a `test/` integration file can't reach that
/// private function, so it's reproduced here the same way `behavior.rs`'s
/// own unit tests do.
fn mem_key_hash(name: &str) -> u32 {
    let mut h: u32 = 0x811c9dc5;
    for b in name.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x01000193);
    }
    h
}

fn compile(source: &str, binder: &Binder) -> scriptcore::bytecode::Program {
    let mut parsed = parse::parse(source, binder);
    assert!(!parsed.diagnostics.has_errors(), "unexpected diagnostics for {source:?}");
    optimize::optimize(&mut parsed.doc, parsed.root);
    let program = codegen::compile(&parsed.doc, parsed.root, binder.signature_hash()).expect("compiles");
    program.validate().expect("validates");
    program
}

fn run(source: &str) -> scriptcore::Value {
    let binder = Binder::new();
    let program = compile(source, &binder);
    let mut memory = Memory::new();
    Vm::new(&program, &binder).run(&mut memory).expect("runs without panicking")
}

#[test]
fn arithmetic_precedence() {
    // No explicit `return`: the bare trailing expression is the block's
    // (and the program's) value.
    let value = run("1 + 2 * 3;");
    assert_eq!(value.get_num(0.0), 7.0);
}

#[test]
fn while_loop_accumulates() {
    let value = run("var i = 0; while (i < 10) { i += 1; } i;");
    assert_eq!(value.get_num(0.0), 10.0);
}

#[test]
fn memory_compound_assignment_updates_the_blackboard() {
    let binder = Binder::new();
    let program = compile("$hp = 100; $hp -= 25; $hp;", &binder);
    let mut memory = Memory::new();
    let value = Vm::new(&program, &binder).run(&mut memory).expect("runs without panicking");
    assert_eq!(value.get_num(0.0), 75.0);
    assert_eq!(memory.load(mem_key_hash("hp")).get_num(0.0), 75.0);
}

#[test]
fn short_circuit_or_returns_the_truthy_operand() {
    let value = run("true && (false || 1);");
    assert_eq!(value.get_bool(false), true);
}

#[test]
fn for_loop_with_an_early_return_stops_the_execution_count_low() {
    let value = run("for (var i = 0; i < 1000; i += 1) { if (i == 11) { return i; } } return -1;");
    assert_eq!(value.get_num(0.0), 11.0);
}

#[test]
fn disassembly_is_nonempty_and_stable_across_two_compiles() {
    let binder = Binder::new();
    let program_a = compile("return 1 + 2;", &binder);
    let program_b = compile("return 1 + 2;", &binder);
    assert!(!program_a.disassemble().is_empty());
    assert_eq!(program_a.disassemble(), program_b.disassemble());
}

#[test]
fn bytecode_roundtrips_through_the_file_format() {
    let binder = Binder::new();
    let program = compile("return 1 + 2;", &binder);
    let bytes = scriptcore::bytecode::write_program(&program);
    let back = scriptcore::bytecode::read_program(&bytes).expect("reads back");
    assert_eq!(back.code, program.code);
    assert_eq!(back.binder_hash, program.binder_hash);
}

#[test]
fn diagnostics_are_reported_without_compiling() {
    let binder = Binder::new();
    let parsed = parse::parse("var x = (;", &binder);
    assert!(parsed.diagnostics.has_errors());
}

#[test]
fn calling_an_unbound_extern_is_an_unresolved_identifier_diagnostic() {
    let binder = Binder::new();
    let parsed = parse::parse("return totally_unbound_function(1);", &binder);
    assert!(parsed.diagnostics.has_errors());
}
