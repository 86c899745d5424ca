//! Drives the register VM directly against hand-assembled and compiled
//! programs, from outside the crate — the angle an embedder calling
//! `Vm::run` straight off a `Binder` it built itself would take.

use scriptcore::compiler::binder::{Binder, BinderFlags};
use scriptcore::compiler::sig::{ArgInfo, Signature};
use scriptcore::compiler::{codegen, optimize, parse};
use scriptcore::memory::Memory;
use scriptcore::panic::PanicKind;
use scriptcore::value::{TypeMask, Value, ValueType};
use scriptcore::vm::{Vm, MAX_INSTRUCTIONS};

fn compile(source: &str, binder: &Binder) -> scriptcore::bytecode::Program {
    let mut parsed = parse::parse(source, binder);
    assert!(!parsed.diagnostics.has_errors(), "unexpected diagnostics for {source:?}");
    optimize::optimize(&mut parsed.doc, parsed.root);
    codegen::compile(&parsed.doc, parsed.root, binder.signature_hash()).expect("compiles")
}

#[test]
fn assert_panics_on_a_falsy_argument() {
    let binder = Binder::new();
    let program = compile("assert(1 == 2);", &binder);
    let mut memory = Memory::new();
    let err = Vm::new(&program, &binder).run(&mut memory).unwrap_err();
    assert_eq!(err.kind, PanicKind::AssertionFailed);
}

#[test]
fn execution_limit_is_enforced_on_an_infinite_loop() {
    let binder = Binder::new();
    let program = compile("while (true) {}", &binder);
    let mut memory = Memory::new();
    let err = Vm::new(&program, &binder).run(&mut memory).unwrap_err();
    assert_eq!(err.kind, PanicKind::ExecutionLimitExceeded);
    // MAX_INSTRUCTIONS is a real engine limit, not just a vm.rs implementation detail.
    assert!(MAX_INSTRUCTIONS > 0);
}

#[test]
fn disallow_memory_access_flag_turns_dollar_access_into_a_panic() {
    let binder = Binder::new().with_flags(BinderFlags::DISALLOW_MEMORY_ACCESS);
    let program = compile("return $hp;", &binder);
    let mut memory = Memory::new();
    let err = Vm::new(&program, &binder).run(&mut memory).unwrap_err();
    assert_eq!(err.kind, PanicKind::MissingCapability);
}

#[test]
fn native_extern_function_is_callable_from_script() {
    let mut binder = Binder::new();
    binder.declare(
        "double",
        Signature::new(vec![ArgInfo::required("x", TypeMask::of(ValueType::Num))], TypeMask::of(ValueType::Num)),
        |args: &[Value]| Ok(Value::num(args[0].get_num(0.0) * 2.0)),
    );
    let program = compile("return double(21);", &binder);
    let mut memory = Memory::new();
    let value = Vm::new(&program, &binder).run(&mut memory).expect("runs without panicking");
    assert_eq!(value.get_num(0.0), 42.0);
}

#[test]
fn native_extern_argument_type_mismatch_panics_before_the_native_body_runs() {
    let mut binder = Binder::new();
    binder.declare(
        "double",
        Signature::new(vec![ArgInfo::required("x", TypeMask::of(ValueType::Num))], TypeMask::of(ValueType::Num)),
        |_args: &[Value]| Ok(Value::num(0.0)),
    );
    let program = compile("return double(true);", &binder);
    let mut memory = Memory::new();
    let err = Vm::new(&program, &binder).run(&mut memory).unwrap_err();
    assert_eq!(err.kind, PanicKind::ArgumentTypeMismatch);
}

#[test]
fn seeded_random_between_is_reproducible_across_two_identical_runs() {
    let binder = Binder::new();
    let program = compile("return random_between(10, 20);", &binder);
    let mut mem_a = Memory::new();
    let mut mem_b = Memory::new();
    let a = Vm::with_seed(&program, &binder, 7).run(&mut mem_a).expect("runs without panicking");
    let b = Vm::with_seed(&program, &binder, 7).run(&mut mem_b).expect("runs without panicking");
    assert_eq!(a.get_num(0.0), b.get_num(0.0));
    assert!(a.get_num(0.0) >= 10.0 && a.get_num(0.0) < 20.0);
}

#[test]
fn vec3_composition_and_component_access_round_trip() {
    let binder = Binder::new();
    let program = compile("var v = vec3(1, 2, 3); return vec_y(v);", &binder);
    let mut memory = Memory::new();
    let value = Vm::new(&program, &binder).run(&mut memory).expect("runs without panicking");
    assert_eq!(value.get_num(0.0), 2.0);
}

#[test]
fn hand_assembled_program_rejects_an_out_of_range_register_without_running_it() {
    use scriptcore::bytecode::{Opcode, Program};
    use scriptcore::pos::Range;

    let mut code = Vec::new();
    code.push(Opcode::ValueNull as u8);
    code.push(200); // register far outside the 32-slot file
    code.push(Opcode::Return as u8);
    code.push(200);
    let program = Program {
        code,
        literals: vec![],
        locations: vec![(0, Range::new(0, 1))],
        binder_hash: 0,
    };
    assert!(program.validate().is_err());
}
