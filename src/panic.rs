//! Structured run-time panics.
//!
//! Grounded on `script_panic.h`'s `ScriptPanicKind`/`ScriptPanic` and
//! `ScriptPanicOutputFlags`. Kept as a plain struct with a hand-written
//! `Display` rather than a `thiserror` derive: like `runtime::extensions::ExtError`
//! and `lib::ExecuteError`, this type sits on the VM's hot path and callers
//! inspect its fields directly rather than chaining it with `?`.

use crate::pos::{range_to_line_col, Range};
use crate::value::{TypeMask, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicKind {
    AssertionFailed,
    ExecutionFailed,
    ExecutionLimitExceeded,
    ArgumentInvalid,
    ArgumentTypeMismatch,
    ArgumentMissing,
    ArgumentOutOfRange,
    ArgumentCountExceedsMaximum,
    EnumInvalidEntry,
    UnimplementedBinding,
    QueryLimitExceeded,
    QueryInvalid,
    ReadonlyParam,
    MissingCapability,
    /// The behavior tracer's recorded-node depth (16) was exceeded.
    TracerDepthExceeded,
}

impl PanicKind {
    pub fn description(self) -> &'static str {
        match self {
            PanicKind::AssertionFailed => "assertion failed",
            PanicKind::ExecutionFailed => "execution failed",
            PanicKind::ExecutionLimitExceeded => "execution limit exceeded",
            PanicKind::ArgumentInvalid => "argument invalid",
            PanicKind::ArgumentTypeMismatch => "argument type mismatch",
            PanicKind::ArgumentMissing => "argument missing",
            PanicKind::ArgumentOutOfRange => "argument out of range",
            PanicKind::ArgumentCountExceedsMaximum => "argument count exceeds maximum",
            PanicKind::EnumInvalidEntry => "invalid enum entry",
            PanicKind::UnimplementedBinding => "unimplemented binding",
            PanicKind::QueryLimitExceeded => "query limit exceeded",
            PanicKind::QueryInvalid => "invalid query",
            PanicKind::ReadonlyParam => "parameter is read-only",
            PanicKind::MissingCapability => "missing capability",
            PanicKind::TracerDepthExceeded => "tracer depth limit exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Panic {
    pub kind: PanicKind,
    pub arg_index: Option<u16>,
    pub type_mask_expected: Option<TypeMask>,
    pub type_actual: Option<ValueType>,
    pub context: u32,
    pub range: Range,
}

impl Panic {
    pub fn new(kind: PanicKind, range: Range) -> Self {
        Panic {
            kind,
            arg_index: None,
            type_mask_expected: None,
            type_actual: None,
            context: 0,
            range,
        }
    }

    pub fn with_arg_mismatch(
        mut self,
        arg_index: u16,
        expected: TypeMask,
        actual: ValueType,
    ) -> Self {
        self.arg_index = Some(arg_index);
        self.type_mask_expected = Some(expected);
        self.type_actual = Some(actual);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicOutputFlags {
    Default,
    IncludeRange,
}

impl Panic {
    /// Render panic text, optionally prefixed by its source range, matching
    /// `script_panic_write`'s `ScriptPanicOutputFlags::IncludeRange`.
    pub fn display(&self, source: &str, flags: PanicOutputFlags) -> String {
        let mut out = String::new();
        if flags == PanicOutputFlags::IncludeRange {
            let rlc = range_to_line_col(source, self.range);
            out.push_str(&format!("{}: ", rlc));
        }
        out.push_str(self.kind.description());
        if let (Some(idx), Some(expected), Some(actual)) =
            (self.arg_index, self.type_mask_expected, self.type_actual)
        {
            out.push('\n');
            out.push_str(&format!(
                "argument {}: expected {:?}, got {}",
                idx,
                expected,
                actual.type_str()
            ));
        }
        out
    }
}

impl std::fmt::Display for Panic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_range_when_requested() {
        let p = Panic::new(PanicKind::AssertionFailed, Range::new(0, 3));
        let src = "abc";
        let with_range = p.display(src, PanicOutputFlags::IncludeRange);
        let without = p.display(src, PanicOutputFlags::Default);
        assert!(with_range.contains("1:1"));
        assert!(!without.contains("1:1"));
        assert!(with_range.contains("assertion failed"));
    }

    #[test]
    fn display_includes_argument_mismatch_line() {
        let p = Panic::new(PanicKind::ArgumentTypeMismatch, Range::new(0, 1)).with_arg_mismatch(
            0,
            TypeMask::of(ValueType::Num),
            ValueType::Bool,
        );
        let text = p.display("x", PanicOutputFlags::Default);
        assert!(text.contains("argument 0"));
        assert!(text.contains("got bool"));
    }
}
