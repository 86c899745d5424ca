//! Symbol table built up during parsing/compilation, used by tooling (a
//! formatter or language server) to resolve hovers, go-to-definition, and
//! find-references queries over a script's source text.
//!
//! Grounded on `script_sym.h`'s `ScriptSymBag`: a flat, append-only list of
//! symbol definitions plus a separate list of references into them, both kept
//! sorted by source position so lookups are a binary search rather than a
//! linear scan.

use crate::pos::{Pos, Range};

pub type SymId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymKind {
    Keyword,
    BuiltinConstant,
    BuiltinFunction,
    ExternFunction,
    Variable,
    MemoryKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Read,
    Write,
    Call,
}

#[derive(Debug, Clone)]
struct Sym {
    kind: SymKind,
    range: Range,
    label: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SymRef {
    pub sym: SymId,
    pub range: Range,
    pub kind: RefKind,
}

/// A definition together with its resolved location, returned by lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymInfo {
    pub id: SymId,
    pub kind: SymKind,
    pub range: Range,
}

#[derive(Debug, Default)]
pub struct SymBag {
    syms: Vec<Sym>,
    refs: Vec<SymRef>,
}

impl SymBag {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: SymKind, range: Range, label: &str) -> SymId {
        let id = self.syms.len() as SymId;
        // Keep definitions ordered by position; since the parser visits
        // source left-to-right this is just an append in practice, but we
        // insert-sort defensively so `first`/`next` never need to re-sort.
        let insert_at = self
            .syms
            .binary_search_by_key(&range.start, |s| s.range.start)
            .unwrap_or_else(|i| i);
        self.syms.insert(
            insert_at,
            Sym { kind, range, label: label.to_string() },
        );
        insert_at as SymId
    }

    pub fn push_keyword(&mut self, range: Range, label: &str) -> SymId {
        self.push(SymKind::Keyword, range, label)
    }

    pub fn push_builtin_const(&mut self, range: Range, label: &str) -> SymId {
        self.push(SymKind::BuiltinConstant, range, label)
    }

    pub fn push_builtin_func(&mut self, range: Range, label: &str) -> SymId {
        self.push(SymKind::BuiltinFunction, range, label)
    }

    pub fn push_extern_func(&mut self, range: Range, label: &str) -> SymId {
        self.push(SymKind::ExternFunction, range, label)
    }

    pub fn push_var(&mut self, range: Range, label: &str) -> SymId {
        self.push(SymKind::Variable, range, label)
    }

    pub fn push_mem_key(&mut self, range: Range, label: &str) -> SymId {
        self.push(SymKind::MemoryKey, range, label)
    }

    pub fn push_ref(&mut self, sym: SymId, range: Range, kind: RefKind) {
        let insert_at = self
            .refs
            .binary_search_by_key(&range.start, |r| r.range.start)
            .unwrap_or_else(|i| i);
        self.refs.insert(insert_at, SymRef { sym, range, kind });
    }

    fn info(&self, id: SymId) -> SymInfo {
        let sym = &self.syms[id as usize];
        SymInfo { id, kind: sym.kind, range: sym.range }
    }

    pub fn label(&self, id: SymId) -> &str {
        &self.syms[id as usize].label
    }

    /// First symbol definition starting at or after `pos`, for "jump to next
    /// symbol" navigation.
    pub fn first(&self, pos: Pos) -> Option<SymInfo> {
        let idx = self.syms.partition_point(|s| s.range.start < pos);
        self.syms.get(idx).map(|_| self.info(idx as SymId))
    }

    /// The symbol definition following `sym`, seeking forward from `pos`.
    /// Mirrors `script_sym_next`: callers loop `first`/`next` to walk every
    /// definition from a cursor position onward.
    pub fn next(&self, pos: Pos, sym: SymId) -> Option<SymInfo> {
        let start = (sym as usize) + 1;
        let idx = start + self.syms[start..].partition_point(|s| s.range.start < pos);
        self.syms.get(idx).map(|_| self.info(idx as SymId))
    }

    /// All references to `sym`, sorted by source position.
    pub fn refs(&self, sym: SymId) -> Vec<SymRef> {
        self.refs.iter().copied().filter(|r| r.sym == sym).collect()
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }
}
