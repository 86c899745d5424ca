//! Builds small behavior trees with `TreeBuilder` and drives them through
//! `ai_eval` the way an embedding game loop would: own the `Memory`, own the
//! `Binder`, tick the tree once per call.

use scriptcore::behavior::{
    ai_eval, BehaviorTree, Compare, CounterTracer, EvalContext, EvalResult, RecordTracer, SourceValue, Tracer,
    TreeBuilder,
};
use scriptcore::compiler::binder::Binder;
use scriptcore::compiler::{codegen, optimize, parse};
use scriptcore::memory::Memory;
use scriptcore::value::Value;

/// Mirrors the FNV-1a key-hashing scheme `compiler::parse` uses internally
/// for `$name` memory accesses.
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
    assert!(!parsed.diagnostics.has_errors());
    optimize::optimize(&mut parsed.doc, parsed.root);
    codegen::compile(&parsed.doc, parsed.root, binder.signature_hash()).expect("compiles")
}

fn tick(tree: &BehaviorTree, memory: &mut Memory, binder: &Binder) -> EvalResult {
    let mut ctx = EvalContext { memory, binder, now: 0.0 };
    let mut tracer: Option<&mut dyn Tracer> = None;
    ai_eval(tree, tree.root(), &mut ctx, &mut tracer).expect("tree evaluation never panics")
}

#[test]
fn sequence_of_success_condition_failure_records_four_entries_at_the_documented_depths() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let success = b.success();
    let alive = b.condition(compile("return $alive;", &binder));
    let failure = b.failure();
    let root = b.sequence(&[success, alive, failure]);
    let tree = b.build(root);

    let mut memory = Memory::new();
    memory.store(mem_key_hash("alive"), Value::boolean(true));

    let mut recorder = RecordTracer::new();
    let mut ctx = EvalContext { memory: &mut memory, binder: &binder, now: 0.0 };
    let mut tracer: Option<&mut dyn Tracer> = Some(&mut recorder);
    let result = ai_eval(&tree, tree.root(), &mut ctx, &mut tracer).expect("tree evaluation never panics");

    assert_eq!(result, EvalResult::Failure);
    let entries = recorder.entries();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries.iter().map(|e| e.depth).collect::<Vec<_>>(), vec![0, 1, 1, 1]);
}

#[test]
fn a_guard_condition_short_circuits_an_attack_sequence() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let has_target = b.condition(compile("return $has_target;", &binder));
    let in_range = b.condition(compile("return $distance < 5;", &binder));
    let attack = b.execute(compile("$attacked = true;", &binder));
    let root = b.sequence(&[has_target, in_range, attack]);
    let tree = b.build(root);

    let mut memory = Memory::new();
    memory.store(mem_key_hash("has_target"), Value::boolean(false));
    memory.store(mem_key_hash("distance"), Value::num(1.0));

    assert_eq!(tick(&tree, &mut memory, &binder), EvalResult::Failure);
    // the sequence bailed out before the Execute leaf ever ran
    assert!(memory.load(mem_key_hash("attacked")).is_null());
}

#[test]
fn a_passing_guard_lets_the_sequence_reach_and_run_the_action() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let has_target = b.condition(compile("return $has_target;", &binder));
    let attack = b.execute(compile("$attacked = true;", &binder));
    let root = b.sequence(&[has_target, attack]);
    let tree = b.build(root);

    let mut memory = Memory::new();
    memory.store(mem_key_hash("has_target"), Value::boolean(true));

    assert_eq!(tick(&tree, &mut memory, &binder), EvalResult::Success);
    assert!(memory.load(mem_key_hash("attacked")).get_bool(false));
}

#[test]
fn selector_falls_through_to_the_fallback_behavior() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let flee = b.condition(compile("return $hp < 10;", &binder));
    let fallback = b.success();
    let root = b.selector(&[flee, fallback]);
    let tree = b.build(root);

    let mut memory = Memory::new();
    memory.store(mem_key_hash("hp"), Value::num(100.0));

    assert_eq!(tick(&tree, &mut memory, &binder), EvalResult::Success);
}

#[test]
fn invert_and_repeat_compose_over_a_condition_leaf() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let alive = b.condition(compile("return $alive;", &binder));
    let not_alive = b.invert(alive);
    let root = b.repeat(not_alive);
    let tree = b.build(root);

    let mut memory = Memory::new();
    memory.store(mem_key_hash("alive"), Value::boolean(true));

    // invert(Success) -> Failure, repeat(Failure) -> Failure
    assert_eq!(tick(&tree, &mut memory, &binder), EvalResult::Failure);
}

#[test]
fn knowledge_set_and_compare_round_trip_through_memory_without_a_script() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let set = b.knowledge_set(mem_key_hash("score"), SourceValue::Literal(Value::num(42.0)));
    let compare = b.knowledge_compare(mem_key_hash("score"), Compare::Equal, SourceValue::Literal(Value::num(42.0)));
    let root = b.sequence(&[set, compare]);
    let tree = b.build(root);

    let mut memory = Memory::new();
    assert_eq!(tick(&tree, &mut memory, &binder), EvalResult::Success);
    assert_eq!(memory.load(mem_key_hash("score")).get_num(0.0), 42.0);
}

#[test]
fn knowledge_check_requires_every_key_to_be_present() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let root = b.knowledge_check(vec![mem_key_hash("a"), mem_key_hash("b")]);
    let tree = b.build(root);

    let mut memory = Memory::new();
    memory.store(mem_key_hash("a"), Value::num(1.0));
    assert_eq!(tick(&tree, &mut memory, &binder), EvalResult::Failure);

    memory.store(mem_key_hash("b"), Value::num(1.0));
    assert_eq!(tick(&tree, &mut memory, &binder), EvalResult::Success);
}

#[test]
fn a_panicking_condition_script_is_reported_to_the_tracer_but_the_tree_keeps_running_as_failure() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let unsafe_condition = b.condition(compile("assert(false); return true;", &binder));
    let fallback = b.success();
    let tree_root = b.selector(&[unsafe_condition, fallback]);
    let tree = b.build(tree_root);

    let mut memory = Memory::new();
    let mut recorder = RecordTracer::new();
    let mut ctx = EvalContext { memory: &mut memory, binder: &binder, now: 0.0 };
    let mut tracer: Option<&mut dyn Tracer> = Some(&mut recorder);
    // the condition's own script panics, but tree evaluation itself never
    // propagates that as an `Err` — it's caught, reported to the tracer, and
    // surfaced to the selector as an ordinary `Failure` so the fallback runs.
    let result = ai_eval(&tree, tree.root(), &mut ctx, &mut tracer).expect("tree evaluation never panics");
    assert_eq!(result, EvalResult::Success);

    let entries = recorder.entries();
    let condition_entry = &entries[1];
    assert_eq!(condition_entry.result, Some(EvalResult::Failure));
    assert!(condition_entry.panic.is_some());
}

#[test]
fn counter_tracer_counts_every_node_visited_including_children() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let a = b.success();
    let c = b.success();
    let root = b.sequence(&[a, c]);
    let tree = b.build(root);

    let mut memory = Memory::new();
    let mut counter = CounterTracer::default();
    let mut ctx = EvalContext { memory: &mut memory, binder: &binder, now: 0.0 };
    let mut tracer: Option<&mut dyn Tracer> = Some(&mut counter);
    ai_eval(&tree, tree.root(), &mut ctx, &mut tracer).expect("tree evaluation never panics");
    assert_eq!(counter.count, 3); // the sequence itself plus its two leaves
}

#[test]
fn record_tracer_captures_depth_and_result_per_node() {
    let binder = Binder::new();
    let mut b = TreeBuilder::new();
    let leaf = b.success();
    let root = b.invert(leaf);
    let tree = b.build(root);

    let mut memory = Memory::new();
    let mut recorder = RecordTracer::new();
    let mut ctx = EvalContext { memory: &mut memory, binder: &binder, now: 0.0 };
    let mut tracer: Option<&mut dyn Tracer> = Some(&mut recorder);
    ai_eval(&tree, tree.root(), &mut ctx, &mut tracer).expect("tree evaluation never panics");

    let entries = recorder.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].depth, 0);
    assert_eq!(entries[1].depth, 1);
    assert_eq!(entries[1].result, Some(EvalResult::Success));
    assert_eq!(entries[0].result, Some(EvalResult::Failure)); // invert flipped the leaf's Success
}
