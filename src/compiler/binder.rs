//! Registry of native ("extern") functions a script can call.
//!
//! Grounded on `script_binder.h`'s `ScriptBinder`: a name -> slot table built
//! once at startup and shared read-only across every script compiled against
//! it, plus `runtime::extensions::ExtensionRegistry`'s pattern of
//! boxed-closure registration for host call-outs. The `Filter`/flag/
//! serialization surface follows the same header's binder file format.

use std::collections::HashMap;

use once_cell::sync::OnceCell;

use crate::compiler::sig::{ArgFlags, ArgInfo, Signature};
use crate::panic::{Panic, PanicKind};
use crate::pos::Range;
use crate::value::{TypeMask, Value};

pub type NativeFn = Box<dyn Fn(&[Value]) -> Result<Value, PanicKind> + Send + Sync>;

/// Bitset of binder-wide behavior modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinderFlags(pub u16);

impl BinderFlags {
    pub const NONE: BinderFlags = BinderFlags(0);
    /// Forbids every memory-touching opcode (`MemLoad`/`MemStore` and their
    /// dynamic-key forms) for scripts compiled against this binder; the VM
    /// raises `PanicKind::MissingCapability` instead of executing them.
    pub const DISALLOW_MEMORY_ACCESS: BinderFlags = BinderFlags(1 << 0);

    pub fn contains(self, flag: BinderFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for BinderFlags {
    type Output = BinderFlags;

    fn bitor(self, rhs: BinderFlags) -> BinderFlags {
        BinderFlags(self.0 | rhs.0)
    }
}

pub struct BoundFunction {
    pub name: String,
    pub doc: String,
    pub signature: Signature,
    func: NativeFn,
}

/// Read-only once built; `declare` is only ever called during host setup,
/// before any `Doc` is parsed against it (a parsed `Doc`'s `Extern` slots are
/// indices into this exact table).
#[derive(Default)]
pub struct Binder {
    name: String,
    flags: BinderFlags,
    filter: Option<String>,
    functions: Vec<BoundFunction>,
    by_name: HashMap<String, u32>,
    /// Compiled lazily on the first `admits_source` call and reused after;
    /// a finalized binder is checked against many source paths but its
    /// filter never changes, so recompiling the glob's regex per call would
    /// be pure waste.
    filter_regex: OnceCell<regex_lite::Regex>,
}

impl Binder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_flags(mut self, flags: BinderFlags) -> Self {
        self.flags = flags;
        self
    }

    /// A case-sensitive glob (`*`, `?`) constraining which source files may
    /// bind against this table; `None` (the default) admits every source.
    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> BinderFlags {
        self.flags
    }

    pub fn disallow_memory_access(&self) -> bool {
        self.flags.contains(BinderFlags::DISALLOW_MEMORY_ACCESS)
    }

    /// Whether `source_path` is allowed to compile against this binder.
    pub fn admits_source(&self, source_path: &str) -> bool {
        match &self.filter {
            None => true,
            Some(pattern) => {
                let re = self.filter_regex.get_or_init(|| {
                    regex_lite::Regex::new(&glob_to_regex(pattern)).expect("glob pattern compiles")
                });
                re.is_match(source_path)
            }
        }
    }

    pub fn declare<F>(&mut self, name: &str, signature: Signature, func: F) -> u32
    where
        F: Fn(&[Value]) -> Result<Value, PanicKind> + Send + Sync + 'static,
    {
        self.declare_documented(name, "", signature, func)
    }

    pub fn declare_documented<F>(&mut self, name: &str, doc: &str, signature: Signature, func: F) -> u32
    where
        F: Fn(&[Value]) -> Result<Value, PanicKind> + Send + Sync + 'static,
    {
        let slot = self.functions.len() as u32;
        self.functions.push(BoundFunction {
            name: name.to_string(),
            doc: doc.to_string(),
            signature,
            func: Box::new(func),
        });
        self.by_name.insert(name.to_string(), slot);
        slot
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn signature(&self, slot: u32) -> &Signature {
        &self.functions[slot as usize].signature
    }

    pub fn function_name(&self, slot: u32) -> &str {
        &self.functions[slot as usize].name
    }

    pub fn doc(&self, slot: u32) -> &str {
        &self.functions[slot as usize].doc
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Cheap content hash of the registered name/arity table, so a compiled
    /// `Program` can assert it is being run against the Binder it was
    /// compiled for.
    pub fn signature_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325; // FNV-1a offset basis
        for f in &self.functions {
            for byte in f.name.bytes() {
                h ^= byte as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            h ^= f.signature.args.len() as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }

    /// Validate arity/argument types and invoke the native function at `slot`.
    pub fn call(&self, slot: u32, args: &[Value], range: Range) -> Result<Value, Panic> {
        let f = &self.functions[slot as usize];
        let sig = &f.signature;
        if args.len() < sig.min_arity() {
            return Err(Panic::new(PanicKind::ArgumentMissing, range));
        }
        if args.len() > sig.max_arity() {
            return Err(Panic::new(PanicKind::ArgumentCountExceedsMaximum, range));
        }
        for (idx, arg) in args.iter().enumerate() {
            let Some(info) = sig.arg_at(idx) else { break };
            if arg.is_null() && info.flags.contains(ArgFlags::OPTIONAL) {
                continue;
            }
            if !info.mask.contains(arg.value_type()) {
                return Err(Panic::new(PanicKind::ArgumentTypeMismatch, range)
                    .with_arg_mismatch(idx as u16, info.mask, arg.value_type()));
            }
        }
        (f.func)(args).map_err(|kind| Panic::new(kind, range))
    }
}

/// Translates a `*`/`?` glob into an anchored regex, escaping every other
/// character the regex engine would otherwise treat specially.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' | '.' | '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('$');
    out
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    Truncated,
    InvalidUtf8,
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Truncated => write!(f, "truncated binder file"),
            ReadError::InvalidUtf8 => write!(f, "invalid utf-8 in binder file"),
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        if self.pos + n > self.bytes.len() {
            return Err(ReadError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ReadError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, ReadError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ReadError::InvalidUtf8)
    }
}

/// Serializes a binder's declared shape: its name, flags, filter, and each
/// slot's name/doc/signature. Closures are never serialized — only a host
/// that re-declares the same names in the same order can execute a binder
/// loaded back from this form; the format exists for tooling (dumping a
/// binder's surface, diffing two binder versions) rather than for runtime
/// rehydration of callable functions.
pub fn write_binder(binder: &Binder) -> Vec<u8> {
    let mut buf = Vec::new();
    write_string(&mut buf, &binder.name);
    buf.extend_from_slice(&binder.flags.0.to_le_bytes());
    write_string(&mut buf, binder.filter.as_deref().unwrap_or(""));
    buf.extend_from_slice(&(binder.functions.len() as u16).to_le_bytes());
    for f in &binder.functions {
        write_string(&mut buf, &f.name);
        write_string(&mut buf, &f.doc);
        buf.extend_from_slice(&f.signature.ret_mask.0.to_le_bytes());
        buf.extend_from_slice(&(f.signature.args.len() as u8).to_le_bytes());
        for arg in &f.signature.args {
            write_string(&mut buf, &arg.name);
            buf.extend_from_slice(&arg.mask.0.to_le_bytes());
            buf.push(arg.flags.0);
        }
    }
    buf
}

/// The declared shape of a binder read back from [`write_binder`]'s format:
/// enough to inspect or re-populate a fresh [`Binder`] via `declare`, but
/// without the original native closures.
pub struct BinderShape {
    pub name: String,
    pub flags: BinderFlags,
    pub filter: Option<String>,
    pub slots: Vec<SlotShape>,
}

pub struct SlotShape {
    pub name: String,
    pub doc: String,
    pub signature: Signature,
}

pub fn read_binder(bytes: &[u8]) -> Result<BinderShape, ReadError> {
    let mut cur = Cursor { bytes, pos: 0 };
    let name = cur.string()?;
    let flags = BinderFlags(cur.u16()?);
    let filter = cur.string()?;
    let filter = if filter.is_empty() { None } else { Some(filter) };
    let slot_count = cur.u16()? as usize;
    let mut slots = Vec::with_capacity(slot_count);
    for _ in 0..slot_count {
        let name = cur.string()?;
        let doc = cur.string()?;
        let ret_mask = TypeMask(cur.u16()?);
        let arg_count = cur.u8()? as usize;
        let mut args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            let arg_name = cur.string()?;
            let mask = TypeMask(cur.u16()?);
            let flags = ArgFlags(cur.u8()?);
            args.push(ArgInfo { name: arg_name, mask, flags });
        }
        slots.push(SlotShape { name, doc, signature: Signature::new(args, ret_mask) });
    }
    Ok(BinderShape { name, flags, filter, slots })
}
