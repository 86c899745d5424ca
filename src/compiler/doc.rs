//! The parsed document: an arena of expression nodes addressed by a handle
//! (`ExprId`) instead of a boxed tree, so the optimizer and compiler can walk
//! and rewrite it without fighting the borrow checker.
//!
//! Grounded on `script_doc.h`'s `ScriptDoc`/`ScriptExpr` — a flat node pool
//! plus a side literal pool, addressed by index rather than pointer, so a
//! whole document can be copied, diffed, or hashed (for the Binder's
//! signature cache) as plain data.

use crate::compiler::intrinsic::Intrinsic;
use crate::pos::Range;
use crate::value::Value;

pub type ExprId = u32;
pub type VarId = u16;

/// Variables declared per script. Kept flat (no `scope_id` reuse across
/// sibling blocks) and capped below the VM's 32-register file, so the
/// compiler always has registers left over for expression-evaluation
/// temporaries: `bytecode::NUM_REGISTERS - MAX_VARS` of them.
pub const MAX_VARS: VarId = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    Value,
    VarLoad,
    VarStore,
    MemLoad,
    MemStore,
    Intrinsic,
    Block,
    Extern,
}

#[derive(Debug, Clone)]
pub enum ExprData {
    /// Index into `Doc::literals`.
    Value(u32),
    VarLoad(VarId),
    VarStore(VarId, ExprId),
    /// Interned memory-key hash.
    MemLoad(u32),
    MemStore(u32, ExprId),
    Intrinsic(Intrinsic, Vec<ExprId>),
    Block(Vec<ExprId>),
    /// Binder slot index, resolved at parse time from the function name.
    Extern(u32, Vec<ExprId>),
}

impl ExprData {
    pub fn kind(&self) -> ExprKind {
        match self {
            ExprData::Value(_) => ExprKind::Value,
            ExprData::VarLoad(_) => ExprKind::VarLoad,
            ExprData::VarStore(_, _) => ExprKind::VarStore,
            ExprData::MemLoad(_) => ExprKind::MemLoad,
            ExprData::MemStore(_, _) => ExprKind::MemStore,
            ExprData::Intrinsic(_, _) => ExprKind::Intrinsic,
            ExprData::Block(_) => ExprKind::Block,
            ExprData::Extern(_, _) => ExprKind::Extern,
        }
    }

    /// Direct child expressions, for tree walks that don't care about shape.
    pub fn children(&self) -> &[ExprId] {
        match self {
            ExprData::Value(_) | ExprData::VarLoad(_) | ExprData::MemLoad(_) => &[],
            ExprData::VarStore(_, v) | ExprData::MemStore(_, v) => std::slice::from_ref(v),
            ExprData::Intrinsic(_, args) | ExprData::Block(args) | ExprData::Extern(_, args) => {
                args
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ExprNode {
    data: ExprData,
    range: Range,
}

/// Arena of expression nodes plus the literal pool they reference. One `Doc`
/// per compiled script; `Compiler::compile` consumes it into a `Program`.
#[derive(Debug, Default)]
pub struct Doc {
    exprs: Vec<ExprNode>,
    literals: Vec<Value>,
}

impl Doc {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, data: ExprData, range: Range) -> ExprId {
        let id = self.exprs.len() as ExprId;
        self.exprs.push(ExprNode { data, range });
        id
    }

    /// Interns `value` into the literal pool, reusing an existing slot with
    /// identical bits.
    fn intern(&mut self, value: Value) -> u32 {
        if let Some(idx) = self.literals.iter().position(|l| *l == value) {
            return idx as u32;
        }
        self.literals.push(value);
        (self.literals.len() - 1) as u32
    }

    pub fn add_value(&mut self, range: Range, value: Value) -> ExprId {
        let lit = self.intern(value);
        self.push(ExprData::Value(lit), range)
    }

    /// Interns `value` without creating a node, for callers that build an
    /// `ExprData::Value` payload themselves (the optimizer's constant fold).
    pub fn intern_literal(&mut self, value: Value) -> u32 {
        self.intern(value)
    }

    pub fn add_var_load(&mut self, range: Range, var: VarId) -> ExprId {
        self.push(ExprData::VarLoad(var), range)
    }

    pub fn add_var_store(&mut self, range: Range, var: VarId, value: ExprId) -> ExprId {
        self.push(ExprData::VarStore(var, value), range)
    }

    pub fn add_mem_load(&mut self, range: Range, key: u32) -> ExprId {
        self.push(ExprData::MemLoad(key), range)
    }

    pub fn add_mem_store(&mut self, range: Range, key: u32, value: ExprId) -> ExprId {
        self.push(ExprData::MemStore(key, value), range)
    }

    pub fn add_intrinsic(&mut self, range: Range, intrinsic: Intrinsic, args: Vec<ExprId>) -> ExprId {
        self.push(ExprData::Intrinsic(intrinsic, args), range)
    }

    pub fn add_block(&mut self, range: Range, exprs: Vec<ExprId>) -> ExprId {
        self.push(ExprData::Block(exprs), range)
    }

    pub fn add_extern(&mut self, range: Range, slot: u32, args: Vec<ExprId>) -> ExprId {
        self.push(ExprData::Extern(slot, args), range)
    }

    pub fn kind(&self, id: ExprId) -> ExprKind {
        self.exprs[id as usize].data.kind()
    }

    pub fn data(&self, id: ExprId) -> &ExprData {
        &self.exprs[id as usize].data
    }

    pub fn range(&self, id: ExprId) -> Range {
        self.exprs[id as usize].range
    }

    /// Overwrites a node's payload in place, keeping its `ExprId` and source
    /// range stable so parents referencing it by id stay valid. Used by the
    /// optimizer to fold a subtree down to a single value or to splice a
    /// branch's body in place of a now-resolved `If`.
    pub fn set_data(&mut self, id: ExprId, data: ExprData) {
        self.exprs[id as usize].data = data;
    }

    pub fn literal(&self, idx: u32) -> Value {
        self.literals[idx as usize]
    }

    pub fn literals(&self) -> &[Value] {
        &self.literals
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// True when `id`'s value is wholly determined by its own literal
    /// sub-tree: no variable or memory read, no extern call, and every
    /// intrinsic involved is deterministic. Used by the optimizer's
    /// constant-folding pass — conservative by design, so a `Block` that
    /// merely contains a var-store is never folded even though the store
    /// itself has no externally visible effect.
    pub fn is_static(&self, id: ExprId) -> bool {
        match self.data(id) {
            ExprData::Value(_) => true,
            ExprData::VarLoad(_) | ExprData::MemLoad(_) | ExprData::Extern(_, _) => false,
            ExprData::VarStore(_, _) | ExprData::MemStore(_, _) => false,
            ExprData::Intrinsic(intr, args) => {
                intr.is_deterministic() && args.iter().all(|&a| self.is_static(a))
            }
            ExprData::Block(exprs) => exprs.iter().all(|&e| self.is_static(e)),
        }
    }
}
