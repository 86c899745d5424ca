//! Native-function signatures: the shape the Binder checks call sites
//! against before invoking a registered extern.
//!
//! Grounded on `script_sig.h`'s `ScriptSig`/`ScriptSigArg`: each argument
//! carries a name (surfaced in panic messages and binder dumps), a type
//! mask, and flags for optional and variadic-tail ("multi") arguments; the
//! whole signature carries a return mask used by the optimizer's
//! type-propagation pass.

use crate::value::TypeMask;

/// Bitset over an argument's calling-convention modifiers. Mirrors
/// `TypeMask`'s bare-`u8`-newtype style rather than pulling in a bitflags
/// crate for two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgFlags(pub u8);

impl ArgFlags {
    pub const NONE: ArgFlags = ArgFlags(0);
    /// A `null` argument is accepted in this slot without a type mismatch.
    pub const OPTIONAL: ArgFlags = ArgFlags(1 << 0);
    /// The last argument in a signature may repeat zero or more times; each
    /// repetition is checked against this slot's mask.
    pub const MULTI: ArgFlags = ArgFlags(1 << 1);

    pub fn contains(self, flag: ArgFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for ArgFlags {
    type Output = ArgFlags;

    fn bitor(self, rhs: ArgFlags) -> ArgFlags {
        ArgFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct ArgInfo {
    pub name: String,
    pub mask: TypeMask,
    pub flags: ArgFlags,
}

impl ArgInfo {
    pub fn required(name: impl Into<String>, mask: TypeMask) -> Self {
        ArgInfo { name: name.into(), mask, flags: ArgFlags::NONE }
    }

    pub fn optional(name: impl Into<String>, mask: TypeMask) -> Self {
        ArgInfo { name: name.into(), mask, flags: ArgFlags::OPTIONAL }
    }

    pub fn multi(name: impl Into<String>, mask: TypeMask) -> Self {
        ArgInfo { name: name.into(), mask, flags: ArgFlags::MULTI }
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub args: Vec<ArgInfo>,
    pub ret_mask: TypeMask,
}

impl Signature {
    pub fn new(args: Vec<ArgInfo>, ret_mask: TypeMask) -> Self {
        Signature { args, ret_mask }
    }

    /// Arguments before the first optional or variadic slot are required.
    pub fn min_arity(&self) -> usize {
        self.args
            .iter()
            .take_while(|a| !a.flags.contains(ArgFlags::OPTIONAL) && !a.flags.contains(ArgFlags::MULTI))
            .count()
    }

    /// `usize::MAX` when the trailing argument is variadic; otherwise the
    /// declared argument count.
    pub fn max_arity(&self) -> usize {
        match self.args.last() {
            Some(last) if last.flags.contains(ArgFlags::MULTI) => usize::MAX,
            _ => self.args.len(),
        }
    }

    /// The `ArgInfo` that governs the call-site argument at `index`, or
    /// `None` past the end of a non-variadic signature. A variadic tail
    /// reuses its own slot for every repetition.
    pub fn arg_at(&self, index: usize) -> Option<&ArgInfo> {
        self.args.get(index).or_else(|| self.args.last().filter(|a| a.flags.contains(ArgFlags::MULTI)))
    }
}
