//! Behavior-tree evaluator: a depth-first, single-threaded interpreter over
//! a dense node array, driving and driven by the same `Memory` blackboard
//! the script VM uses.
//!
//! Grounded on the script runtime's own recursive-descent shape (`vm.rs`'s
//! fetch-decode-execute loop is iterative, but the tree evaluator's
//! `Sequence`/`Selector` composites are naturally recursive, matching how
//! `runtime::ai::BehaviorNode::tick` walks its children in the source
//! material this was distilled from) plus `script_binder.h`'s boxed-closure
//! style for anything that calls back into a script expression.

use crate::bytecode::Program;
use crate::compiler::binder::Binder;
use crate::memory::{Key, Memory};
use crate::panic::{Panic, PanicKind};
use crate::pos::Range;
use crate::value::Value;
use crate::vm::Vm;

/// 32-bit index into a tree's node array. The tree's designated root need
/// not be index 0 — unlike the serialized asset format (§6 of the design
/// notes), a tree built in memory via [`TreeBuilder`] records its root
/// explicitly, the same way `Doc`/`ExprId` never assume the parser's root
/// expression lands at arena slot zero.
pub type NodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalResult {
    Success,
    Failure,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Compare {
    fn apply(self, a: &Value, b: &Value) -> bool {
        match self {
            Compare::Equal => a.equal(b),
            Compare::NotEqual => !a.equal(b),
            Compare::Less => a.less(b),
            Compare::LessOrEqual => a.less(b) || a.equal(b),
            Compare::Greater => a.greater(b),
            Compare::GreaterOrEqual => a.greater(b) || a.equal(b),
        }
    }
}

/// A `KnowledgeCompare`/`KnowledgeSet` operand: a literal baked into the
/// tree, a read of another memory key, or a host-clock offset resolved at
/// evaluation time (`TimeFromNow`).
#[derive(Debug, Clone)]
pub enum SourceValue {
    Literal(Value),
    Memory(Key),
    TimeFromNow(f64),
}

impl SourceValue {
    fn resolve(&self, memory: &Memory, now: f64) -> Value {
        match self {
            SourceValue::Literal(v) => *v,
            SourceValue::Memory(key) => memory.load(*key),
            SourceValue::TimeFromNow(offset) => Value::time_seconds(now + offset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKindTag {
    Success,
    Failure,
    Running,
    Invert,
    Repeat,
    Try,
    Parallel,
    Selector,
    Sequence,
    Condition,
    Execute,
    KnowledgeCheck,
    KnowledgeClear,
    KnowledgeCompare,
    KnowledgeSet,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Success,
    Failure,
    Running,
    Invert { child: NodeId },
    Repeat { child: NodeId },
    Try { child: NodeId },
    Parallel { first_child: Option<NodeId> },
    Selector { first_child: Option<NodeId> },
    Sequence { first_child: Option<NodeId> },
    /// Index into the tree's compiled-script pool.
    Condition { script: u32 },
    Execute { script: u32 },
    KnowledgeCheck { keys: Vec<Key> },
    KnowledgeClear { keys: Vec<Key> },
    KnowledgeCompare { key: Key, cmp: Compare, source: SourceValue },
    KnowledgeSet { key: Key, source: SourceValue },
}

impl NodeKind {
    fn tag(&self) -> NodeKindTag {
        match self {
            NodeKind::Success => NodeKindTag::Success,
            NodeKind::Failure => NodeKindTag::Failure,
            NodeKind::Running => NodeKindTag::Running,
            NodeKind::Invert { .. } => NodeKindTag::Invert,
            NodeKind::Repeat { .. } => NodeKindTag::Repeat,
            NodeKind::Try { .. } => NodeKindTag::Try,
            NodeKind::Parallel { .. } => NodeKindTag::Parallel,
            NodeKind::Selector { .. } => NodeKindTag::Selector,
            NodeKind::Sequence { .. } => NodeKindTag::Sequence,
            NodeKind::Condition { .. } => NodeKindTag::Condition,
            NodeKind::Execute { .. } => NodeKindTag::Execute,
            NodeKind::KnowledgeCheck { .. } => NodeKindTag::KnowledgeCheck,
            NodeKind::KnowledgeClear { .. } => NodeKindTag::KnowledgeClear,
            NodeKind::KnowledgeCompare { .. } => NodeKindTag::KnowledgeCompare,
            NodeKind::KnowledgeSet { .. } => NodeKindTag::KnowledgeSet,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub next_sibling: Option<NodeId>,
    pub name: Option<String>,
}

/// A node array plus the scripts its `Condition`/`Execute` leaves reference.
/// `next_sibling` chains mirror the dense on-disk asset layout; composite
/// nodes hold their first child and walk siblings from there, the same
/// linked traversal the serialized format is built to support directly.
pub struct BehaviorTree {
    nodes: Vec<Node>,
    scripts: Vec<Program>,
    root: NodeId,
}

impl BehaviorTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    fn script(&self, slot: u32) -> &Program {
        &self.scripts[slot as usize]
    }
}

/// Incrementally assembles a [`BehaviorTree`], wiring `next_sibling` chains
/// for composite children as they're grouped.
#[derive(Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
    scripts: Vec<Program>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        TreeBuilder::default()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node { kind, next_sibling: None, name: None });
        id
    }

    fn chain(&mut self, children: &[NodeId]) -> Option<NodeId> {
        for pair in children.windows(2) {
            self.nodes[pair[0] as usize].next_sibling = Some(pair[1]);
        }
        children.first().copied()
    }

    /// Attaches a debug label to `node`, surfaced by [`Tracer::begin`].
    pub fn name(&mut self, node: NodeId, label: impl Into<String>) {
        self.nodes[node as usize].name = Some(label.into());
    }

    pub fn success(&mut self) -> NodeId {
        self.push(NodeKind::Success)
    }

    pub fn failure(&mut self) -> NodeId {
        self.push(NodeKind::Failure)
    }

    pub fn running(&mut self) -> NodeId {
        self.push(NodeKind::Running)
    }

    pub fn invert(&mut self, child: NodeId) -> NodeId {
        self.push(NodeKind::Invert { child })
    }

    pub fn repeat(&mut self, child: NodeId) -> NodeId {
        self.push(NodeKind::Repeat { child })
    }

    pub fn try_node(&mut self, child: NodeId) -> NodeId {
        self.push(NodeKind::Try { child })
    }

    pub fn sequence(&mut self, children: &[NodeId]) -> NodeId {
        let first_child = self.chain(children);
        self.push(NodeKind::Sequence { first_child })
    }

    pub fn selector(&mut self, children: &[NodeId]) -> NodeId {
        let first_child = self.chain(children);
        self.push(NodeKind::Selector { first_child })
    }

    pub fn parallel(&mut self, children: &[NodeId]) -> NodeId {
        let first_child = self.chain(children);
        self.push(NodeKind::Parallel { first_child })
    }

    pub fn condition(&mut self, program: Program) -> NodeId {
        let slot = self.scripts.len() as u32;
        self.scripts.push(program);
        self.push(NodeKind::Condition { script: slot })
    }

    pub fn execute(&mut self, program: Program) -> NodeId {
        let slot = self.scripts.len() as u32;
        self.scripts.push(program);
        self.push(NodeKind::Execute { script: slot })
    }

    pub fn knowledge_check(&mut self, keys: Vec<Key>) -> NodeId {
        self.push(NodeKind::KnowledgeCheck { keys })
    }

    pub fn knowledge_clear(&mut self, keys: Vec<Key>) -> NodeId {
        self.push(NodeKind::KnowledgeClear { keys })
    }

    pub fn knowledge_compare(&mut self, key: Key, cmp: Compare, source: SourceValue) -> NodeId {
        self.push(NodeKind::KnowledgeCompare { key, cmp, source })
    }

    pub fn knowledge_set(&mut self, key: Key, source: SourceValue) -> NodeId {
        self.push(NodeKind::KnowledgeSet { key, source })
    }

    pub fn build(self, root: NodeId) -> BehaviorTree {
        BehaviorTree { nodes: self.nodes, scripts: self.scripts, root }
    }
}

/// Evaluation inputs shared across the whole tree walk: the blackboard
/// scripts read and write, the binder scripts call out through, and the
/// host clock `KnowledgeCompare`/`KnowledgeSet`'s `TimeFromNow` resolves
/// against.
pub struct EvalContext<'a> {
    pub memory: &'a mut Memory,
    pub binder: &'a Binder,
    pub now: f64,
}

/// Observes node entry/exit without influencing the result. `begin` can
/// refuse an evaluation (used by [`RecordTracer`] to cap recursion depth)
/// by returning a [`PanicKind`], which the evaluator surfaces as a normal
/// panic at the offending node — no separate error channel needed.
pub trait Tracer {
    fn begin(&mut self, node: NodeId, kind: NodeKindTag, name: Option<&str>) -> Result<(), PanicKind>;
    fn end(&mut self, node: NodeId, result: EvalResult);

    /// Called when a `Condition`/`Execute` node's script panics. The
    /// default is a no-op; `RecordTracer` stores it alongside the entry.
    fn panic(&mut self, node: NodeId, panic: &Panic) {
        let _ = (node, panic);
    }
}

/// Counts evaluations only; the cheapest tracer capability.
#[derive(Debug, Default)]
pub struct CounterTracer {
    pub count: u64,
}

impl Tracer for CounterTracer {
    fn begin(&mut self, _node: NodeId, _kind: NodeKindTag, _name: Option<&str>) -> Result<(), PanicKind> {
        self.count += 1;
        Ok(())
    }

    fn end(&mut self, _node: NodeId, _result: EvalResult) {}
}

const RECORD_MAX_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct RecordEntry {
    pub node: NodeId,
    pub kind: NodeKindTag,
    pub name: Option<String>,
    pub depth: u8,
    pub result: Option<EvalResult>,
    pub panic: Option<PanicKind>,
}

/// Appends one `{kind, name, depth, result}` entry per evaluation, in
/// call order. Recursion past [`RECORD_MAX_DEPTH`] raises
/// `PanicKind::TracerDepthExceeded` instead of growing without bound.
#[derive(Debug, Default)]
pub struct RecordTracer {
    entries: Vec<RecordEntry>,
    open: Vec<usize>,
}

impl RecordTracer {
    pub fn new() -> Self {
        RecordTracer::default()
    }

    pub fn entries(&self) -> &[RecordEntry] {
        &self.entries
    }
}

impl Tracer for RecordTracer {
    fn begin(&mut self, node: NodeId, kind: NodeKindTag, name: Option<&str>) -> Result<(), PanicKind> {
        if self.open.len() >= RECORD_MAX_DEPTH {
            return Err(PanicKind::TracerDepthExceeded);
        }
        let depth = self.open.len() as u8;
        let idx = self.entries.len();
        self.entries.push(RecordEntry {
            node,
            kind,
            name: name.map(str::to_owned),
            depth,
            result: None,
            panic: None,
        });
        self.open.push(idx);
        Ok(())
    }

    fn end(&mut self, _node: NodeId, result: EvalResult) {
        if let Some(idx) = self.open.pop() {
            self.entries[idx].result = Some(result);
        }
    }

    fn panic(&mut self, _node: NodeId, panic: &Panic) {
        if let Some(&idx) = self.open.last() {
            self.entries[idx].panic = Some(panic.kind);
        }
    }
}

fn reborrow<'a>(tracer: &'a mut Option<&mut dyn Tracer>) -> Option<&'a mut dyn Tracer> {
    match tracer {
        Some(t) => Some(&mut **t),
        None => None,
    }
}

/// Evaluates `node` (and, recursively, everything it depends on) against
/// `ctx`. Never returns `Err` except when a tracer's depth cap is
/// exceeded — a script panic inside `Condition`/`Execute` is caught and
/// turned into `Failure`, per the rule that tree evaluation itself never
/// panics.
pub fn ai_eval(
    tree: &BehaviorTree,
    node: NodeId,
    ctx: &mut EvalContext,
    tracer: &mut Option<&mut dyn Tracer>,
) -> Result<EvalResult, Panic> {
    let n = tree.node(node);
    let tag = n.kind.tag();
    let name = n.name.clone();
    if let Some(t) = reborrow(tracer) {
        t.begin(node, tag, name.as_deref()).map_err(|kind| Panic::new(kind, Range::point(0)))?;
    }
    let result = eval_kind(tree, node, ctx, tracer)?;
    if let Some(t) = reborrow(tracer) {
        t.end(node, result);
    }
    Ok(result)
}

fn eval_kind(
    tree: &BehaviorTree,
    node: NodeId,
    ctx: &mut EvalContext,
    tracer: &mut Option<&mut dyn Tracer>,
) -> Result<EvalResult, Panic> {
    match tree.node(node).kind.clone() {
        NodeKind::Success => Ok(EvalResult::Success),
        NodeKind::Failure => Ok(EvalResult::Failure),
        NodeKind::Running => Ok(EvalResult::Running),

        NodeKind::Invert { child } => Ok(match ai_eval(tree, child, ctx, tracer)? {
            EvalResult::Success => EvalResult::Failure,
            EvalResult::Failure => EvalResult::Success,
            EvalResult::Running => EvalResult::Running,
        }),

        NodeKind::Repeat { child } => Ok(match ai_eval(tree, child, ctx, tracer)? {
            EvalResult::Failure => EvalResult::Failure,
            EvalResult::Success | EvalResult::Running => EvalResult::Running,
        }),

        NodeKind::Try { child } => Ok(match ai_eval(tree, child, ctx, tracer)? {
            EvalResult::Failure => EvalResult::Running,
            other => other,
        }),

        NodeKind::Sequence { first_child } => {
            let mut cur = first_child;
            let mut last = EvalResult::Success;
            while let Some(id) = cur {
                last = ai_eval(tree, id, ctx, tracer)?;
                if last != EvalResult::Success {
                    return Ok(last);
                }
                cur = tree.node(id).next_sibling;
            }
            Ok(last)
        }

        NodeKind::Selector { first_child } => {
            let mut cur = first_child;
            let mut last = EvalResult::Failure;
            while let Some(id) = cur {
                last = ai_eval(tree, id, ctx, tracer)?;
                if last != EvalResult::Failure {
                    return Ok(last);
                }
                cur = tree.node(id).next_sibling;
            }
            Ok(last)
        }

        NodeKind::Parallel { first_child } => {
            let mut any_success = false;
            let mut any_running = false;
            let mut cur = first_child;
            while let Some(id) = cur {
                match ai_eval(tree, id, ctx, tracer)? {
                    EvalResult::Success => any_success = true,
                    EvalResult::Running => any_running = true,
                    EvalResult::Failure => {}
                }
                cur = tree.node(id).next_sibling;
            }
            Ok(if any_success {
                EvalResult::Success
            } else if any_running {
                EvalResult::Running
            } else {
                EvalResult::Failure
            })
        }

        NodeKind::Condition { script } => {
            let program = tree.script(script);
            // Runs against a throwaway snapshot: a condition observes the
            // blackboard, it doesn't get to mutate it.
            let mut snapshot = ctx.memory.clone();
            match Vm::new(program, ctx.binder).run(&mut snapshot) {
                Ok(v) => Ok(if v.is_truthy() { EvalResult::Success } else { EvalResult::Failure }),
                Err(panic) => {
                    if let Some(t) = reborrow(tracer) {
                        t.panic(node, &panic);
                    }
                    Ok(EvalResult::Failure)
                }
            }
        }

        NodeKind::Execute { script } => {
            let program = tree.script(script);
            match Vm::new(program, ctx.binder).run(ctx.memory) {
                Ok(_) => Ok(EvalResult::Success),
                Err(panic) => {
                    if let Some(t) = reborrow(tracer) {
                        t.panic(node, &panic);
                    }
                    Ok(EvalResult::Failure)
                }
            }
        }

        NodeKind::KnowledgeCheck { keys } => {
            Ok(if keys.iter().all(|&k| ctx.memory.load(k).non_null()) {
                EvalResult::Success
            } else {
                EvalResult::Failure
            })
        }

        NodeKind::KnowledgeClear { keys } => {
            for k in keys {
                ctx.memory.unset(k);
            }
            Ok(EvalResult::Success)
        }

        NodeKind::KnowledgeCompare { key, cmp, source } => {
            let a = ctx.memory.load(key);
            let b = source.resolve(ctx.memory, ctx.now);
            Ok(if cmp.apply(&a, &b) { EvalResult::Success } else { EvalResult::Failure })
        }

        NodeKind::KnowledgeSet { key, source } => {
            let value = source.resolve(ctx.memory, ctx.now);
            ctx.memory.store(key, value);
            Ok(EvalResult::Success)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{binder::Binder, codegen, optimize, parse};

    // Mirrors parse.rs's private key-hashing scheme so test keys agree with
    // whatever a `$name` memory access compiles to.
    fn mem_key_hash(name: &str) -> u32 {
        let mut h: u32 = 0x811c9dc5;
        for b in name.bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(0x01000193);
        }
        h
    }

    fn compile(source: &str) -> Program {
        let binder = Binder::new();
        let mut parsed = parse::parse(source, &binder);
        assert!(!parsed.diagnostics.has_errors());
        optimize::optimize(&mut parsed.doc, parsed.root);
        codegen::compile(&parsed.doc, parsed.root, binder.signature_hash()).expect("compiles")
    }

    fn run_tree(tree: &BehaviorTree, memory: &mut Memory, tracer: &mut Option<&mut dyn Tracer>) -> EvalResult {
        let binder = Binder::new();
        let mut ctx = EvalContext { memory, binder: &binder, now: 0.0 };
        ai_eval(tree, tree.root(), &mut ctx, tracer).expect("never panics")
    }

    #[test]
    fn sequence_stops_at_first_non_success_child() {
        let mut b = TreeBuilder::new();
        let s = b.success();
        let cond = b.condition(compile("return $alive;"));
        let f = b.failure();
        let root = b.sequence(&[s, cond, f]);
        let tree = b.build(root);

        let mut mem = Memory::new();
        mem.store(mem_key_hash("alive"), Value::boolean(true));

        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Failure);
    }

    #[test]
    fn selector_returns_first_non_failure_child() {
        let mut b = TreeBuilder::new();
        let f = b.failure();
        let s = b.success();
        let root = b.selector(&[f, s]);
        let tree = b.build(root);

        let mut mem = Memory::new();
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Success);
    }

    #[test]
    fn invert_flips_success_and_failure_but_not_running() {
        let mut b = TreeBuilder::new();
        let running = b.running();
        let root = b.invert(running);
        let tree = b.build(root);

        let mut mem = Memory::new();
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Running);
    }

    #[test]
    fn repeat_turns_success_into_running_and_passes_failure_through() {
        let mut b = TreeBuilder::new();
        let s = b.success();
        let root = b.repeat(s);
        let tree = b.build(root);

        let mut mem = Memory::new();
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Running);
    }

    #[test]
    fn parallel_succeeds_if_any_child_succeeds() {
        let mut b = TreeBuilder::new();
        let f = b.failure();
        let s = b.success();
        let root = b.parallel(&[f, s]);
        let tree = b.build(root);

        let mut mem = Memory::new();
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Success);
    }

    #[test]
    fn knowledge_set_and_compare_round_trip_through_memory() {
        let key = mem_key_hash("score");
        let mut b = TreeBuilder::new();
        let set = b.knowledge_set(key, SourceValue::Literal(Value::num(10.0)));
        let cmp = b.knowledge_compare(key, Compare::GreaterOrEqual, SourceValue::Literal(Value::num(5.0)));
        let root = b.sequence(&[set, cmp]);
        let tree = b.build(root);

        let mut mem = Memory::new();
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Success);
        assert_eq!(mem.load(key).get_num(0.0), 10.0);
    }

    #[test]
    fn condition_runs_against_a_snapshot_and_cannot_mutate_memory() {
        let key = mem_key_hash("score");
        let mut b = TreeBuilder::new();
        let cond = b.condition(compile("$score = 99; return true;"));
        let tree = b.build(cond);

        let mut mem = Memory::new();
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Success);
        assert!(mem.load(key).is_null());
    }

    #[test]
    fn execute_mutates_the_real_memory_and_always_reports_success() {
        let key = mem_key_hash("score");
        let mut b = TreeBuilder::new();
        let exec = b.execute(compile("$score = 7;"));
        let tree = b.build(exec);

        let mut mem = Memory::new();
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Success);
        assert_eq!(mem.load(key).get_num(0.0), 7.0);
    }

    #[test]
    fn knowledge_check_requires_every_key_present() {
        let a = mem_key_hash("a");
        let c = mem_key_hash("b");
        let mut b = TreeBuilder::new();
        let check = b.knowledge_check(vec![a, c]);
        let tree = b.build(check);

        let mut mem = Memory::new();
        mem.store(a, Value::boolean(true));
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Failure);

        mem.store(c, Value::boolean(true));
        let mut none: Option<&mut dyn Tracer> = None;
        assert_eq!(run_tree(&tree, &mut mem, &mut none), EvalResult::Success);
    }

    #[test]
    fn record_tracer_captures_one_entry_per_node_at_correct_depth() {
        let mut b = TreeBuilder::new();
        let s = b.success();
        let cond = b.condition(compile("return $alive;"));
        let f = b.failure();
        let root = b.sequence(&[s, cond, f]);
        let tree = b.build(root);

        let mut mem = Memory::new();
        mem.store(mem_key_hash("alive"), Value::boolean(true));

        let mut rec = RecordTracer::new();
        let mut tracer: Option<&mut dyn Tracer> = Some(&mut rec);
        assert_eq!(run_tree(&tree, &mut mem, &mut tracer), EvalResult::Failure);

        let entries = rec.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries.iter().map(|e| e.depth).collect::<Vec<_>>(), vec![0, 1, 1, 1]);
        assert_eq!(entries[0].kind, NodeKindTag::Sequence);
        assert_eq!(entries[1].kind, NodeKindTag::Success);
        assert_eq!(entries[2].kind, NodeKindTag::Condition);
        assert_eq!(entries[2].result, Some(EvalResult::Success));
        assert_eq!(entries[3].kind, NodeKindTag::Failure);
        assert_eq!(entries[3].result, Some(EvalResult::Failure));
    }

    #[test]
    fn record_tracer_raises_tracer_depth_exceeded_past_the_cap() {
        let mut b = TreeBuilder::new();
        let mut cur = b.success();
        for _ in 0..RECORD_MAX_DEPTH {
            cur = b.invert(cur);
        }
        let tree = b.build(cur);

        let mut mem = Memory::new();
        let mut rec = RecordTracer::new();
        let mut tracer: Option<&mut dyn Tracer> = Some(&mut rec);
        let binder = Binder::new();
        let mut ctx = EvalContext { memory: &mut mem, binder: &binder, now: 0.0 };
        let err = ai_eval(&tree, tree.root(), &mut ctx, &mut tracer).unwrap_err();
        assert_eq!(err.kind, PanicKind::TracerDepthExceeded);
    }

    #[test]
    fn counter_tracer_counts_every_node_visited() {
        let mut b = TreeBuilder::new();
        let s = b.success();
        let f = b.failure();
        let root = b.selector(&[f, s]);
        let tree = b.build(root);

        let mut mem = Memory::new();
        let mut counter = CounterTracer::default();
        let mut tracer: Option<&mut dyn Tracer> = Some(&mut counter);
        run_tree(&tree, &mut mem, &mut tracer);
        assert_eq!(counter.count, 3);
    }
}
