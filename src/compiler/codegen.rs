//! Lowers an optimized `Doc` into an executable `bytecode::Program`.
//!
//! Grounded on `script_compile.h`'s single-pass, stack-discipline register
//! allocator: an incrementing counter with an overflow error, reclaimed on
//! scope exit, generalized from a 16-slot local table to covering both named
//! variables and expression-evaluation temporaries out of one 32-register file.

use crate::bytecode::{Opcode, Program, Reg, NUM_REGISTERS};
use crate::compiler::doc::{Doc, ExprData, ExprId, MAX_VARS};
use crate::compiler::intrinsic::Intrinsic;
use crate::pos::Range;
use crate::value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileError {
    /// Expression nesting needed more live values at once than the register
    /// file has room for.
    TooManyRegisters,
    /// Lowered code exceeds the 64 KiB absolute-offset limit.
    ProgramTooLarge,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::TooManyRegisters => write!(f, "expression needs more registers than are available"),
            CompileError::ProgramTooLarge => write!(f, "compiled program exceeds the code size limit"),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Default)]
struct LoopCtx {
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

struct Emitter {
    code: Vec<u8>,
    locations: Vec<(u16, Range)>,
    next: Reg,
    loop_stack: Vec<LoopCtx>,
}

impl Emitter {
    fn new() -> Self {
        Emitter { code: Vec::new(), locations: Vec::new(), next: MAX_VARS as Reg, loop_stack: Vec::new() }
    }

    fn alloc(&mut self) -> Result<Reg, CompileError> {
        if (self.next as usize) >= NUM_REGISTERS {
            return Err(CompileError::TooManyRegisters);
        }
        let reg = self.next;
        self.next += 1;
        Ok(reg)
    }

    fn emit(&mut self, op: Opcode, range: Range) {
        self.locations.push((self.code.len() as u16, range));
        self.code.push(op as u8);
    }

    fn reg(&mut self, r: Reg) {
        self.code.push(r);
    }

    fn u16_placeholder(&mut self) -> usize {
        let at = self.code.len();
        self.code.extend_from_slice(&[0xff, 0xff]);
        at
    }

    fn u16_value(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn u32_value(&mut self, v: u32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn i16_value(&mut self, v: i16) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn patch_u16(&mut self, at: usize, v: u16) {
        self.code[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn here(&self) -> u16 {
        self.code.len() as u16
    }
}

/// Lowers a parsed, optimized document into a `Program`. Infallible unless
/// the expression nesting this document carries genuinely exhausts the
/// register file — the parser's own recursion-depth cap keeps that from
/// happening for anything it produced itself.
pub fn compile(doc: &Doc, root: ExprId, binder_hash: u64) -> Result<Program, CompileError> {
    let mut em = Emitter::new();
    let result = compile_value(&mut em, doc, root)?;
    let end_range = doc.range(root);
    em.emit(Opcode::Return, end_range);
    em.reg(result);
    if em.code.len() > crate::bytecode::MAX_CODE_SIZE {
        return Err(CompileError::ProgramTooLarge);
    }
    Ok(Program {
        code: em.code,
        literals: doc.literals().to_vec(),
        locations: em.locations,
        binder_hash,
    })
}

// ---- statement-position lowering (no value is ever consumed) -------------

fn compile_stmt(em: &mut Emitter, doc: &Doc, id: ExprId) -> Result<(), CompileError> {
    let range = doc.range(id);
    match doc.data(id) {
        ExprData::Block(stmts) => {
            for stmt in stmts.clone() {
                compile_stmt(em, doc, stmt)?;
            }
            Ok(())
        }
        ExprData::Intrinsic(Intrinsic::If, args) => compile_if(em, doc, range, &args.clone()),
        ExprData::Intrinsic(Intrinsic::While, args) => compile_while(em, doc, range, &args.clone()),
        ExprData::Intrinsic(Intrinsic::For, args) => compile_for(em, doc, range, &args.clone()),
        ExprData::Intrinsic(Intrinsic::Break, _) => {
            let at = emit_jump_placeholder(em, Opcode::Jump, range);
            em.loop_stack.last_mut().expect("break outside a loop is rejected at parse time").break_patches.push(at);
            Ok(())
        }
        ExprData::Intrinsic(Intrinsic::Continue, _) => {
            let at = emit_jump_placeholder(em, Opcode::Jump, range);
            em.loop_stack
                .last_mut()
                .expect("continue outside a loop is rejected at parse time")
                .continue_patches
                .push(at);
            Ok(())
        }
        ExprData::Intrinsic(Intrinsic::Return, args) => {
            let args = args.clone();
            let mark = em.next;
            match args.first() {
                Some(&value) => {
                    let reg = compile_value(em, doc, value)?;
                    em.emit(Opcode::Return, range);
                    em.reg(reg);
                }
                None => em.emit(Opcode::ReturnNull, range),
            }
            em.next = mark;
            Ok(())
        }
        _ => {
            let mark = em.next;
            compile_value(em, doc, id)?;
            em.next = mark;
            Ok(())
        }
    }
}

fn emit_jump_placeholder(em: &mut Emitter, op: Opcode, range: Range) -> usize {
    em.emit(op, range);
    em.u16_placeholder()
}

fn compile_if(em: &mut Emitter, doc: &Doc, range: Range, args: &[ExprId]) -> Result<(), CompileError> {
    let mark = em.next;
    let cond_reg = compile_value(em, doc, args[0])?;
    em.next = mark;
    em.emit(Opcode::JumpIfFalsy, range);
    em.reg(cond_reg);
    let jfalse_at = em.u16_placeholder();
    compile_stmt(em, doc, args[1])?;
    match args.get(2) {
        Some(&else_branch) => {
            em.emit(Opcode::Jump, range);
            let jend_at = em.u16_placeholder();
            let else_start = em.here();
            em.patch_u16(jfalse_at, else_start);
            compile_stmt(em, doc, else_branch)?;
            let end = em.here();
            em.patch_u16(jend_at, end);
        }
        None => {
            let end = em.here();
            em.patch_u16(jfalse_at, end);
        }
    }
    Ok(())
}

fn compile_while(em: &mut Emitter, doc: &Doc, range: Range, args: &[ExprId]) -> Result<(), CompileError> {
    let (cond, body) = (args[0], args[1]);
    em.loop_stack.push(LoopCtx::default());
    let loop_start = em.here();
    let mark = em.next;
    let cond_reg = compile_value(em, doc, cond)?;
    em.next = mark;
    em.emit(Opcode::JumpIfFalsy, range);
    em.reg(cond_reg);
    let jfalse_at = em.u16_placeholder();
    compile_stmt(em, doc, body)?;
    em.emit(Opcode::Jump, range);
    let back_at = em.u16_placeholder();
    em.patch_u16(back_at, loop_start);
    let end = em.here();
    em.patch_u16(jfalse_at, end);
    let ctx = em.loop_stack.pop().unwrap();
    for at in ctx.continue_patches {
        em.patch_u16(at, loop_start);
    }
    for at in ctx.break_patches {
        em.patch_u16(at, end);
    }
    Ok(())
}

fn compile_for(em: &mut Emitter, doc: &Doc, range: Range, args: &[ExprId]) -> Result<(), CompileError> {
    let (init, cond, step, body) = (args[0], args[1], args[2], args[3]);
    compile_stmt(em, doc, init)?;
    em.loop_stack.push(LoopCtx::default());
    let cond_start = em.here();
    let mark = em.next;
    let cond_reg = compile_value(em, doc, cond)?;
    em.next = mark;
    em.emit(Opcode::JumpIfFalsy, range);
    em.reg(cond_reg);
    let jfalse_at = em.u16_placeholder();
    compile_stmt(em, doc, body)?;
    let step_start = em.here();
    {
        let mark = em.next;
        compile_value(em, doc, step)?;
        em.next = mark;
    }
    em.emit(Opcode::Jump, range);
    let back_at = em.u16_placeholder();
    em.patch_u16(back_at, cond_start);
    let end = em.here();
    em.patch_u16(jfalse_at, end);
    let ctx = em.loop_stack.pop().unwrap();
    for at in ctx.continue_patches {
        em.patch_u16(at, step_start);
    }
    for at in ctx.break_patches {
        em.patch_u16(at, end);
    }
    Ok(())
}

// ---- value-position lowering (always yields exactly one live register) ---

fn compile_value(em: &mut Emitter, doc: &Doc, id: ExprId) -> Result<Reg, CompileError> {
    let range = doc.range(id);
    match doc.data(id).clone() {
        ExprData::Value(lit) => compile_literal(em, range, doc.literal(lit), lit),
        ExprData::VarLoad(v) => Ok(v as Reg),
        ExprData::VarStore(v, value) => {
            let mark = em.next;
            let src = compile_value(em, doc, value)?;
            em.next = mark;
            let dst = v as Reg;
            if src != dst {
                em.emit(Opcode::Move, range);
                em.reg(dst);
                em.reg(src);
            }
            Ok(dst)
        }
        ExprData::MemLoad(key) => {
            let dst = em.alloc()?;
            em.emit(Opcode::MemLoad, range);
            em.reg(dst);
            em.u32_value(key);
            Ok(dst)
        }
        ExprData::MemStore(key, value) => {
            let mark = em.next;
            let src = compile_value(em, doc, value)?;
            em.next = mark;
            em.emit(Opcode::MemStore, range);
            em.u32_value(key);
            em.reg(src);
            Ok(src)
        }
        ExprData::Extern(slot, args) => compile_extern(em, doc, range, slot, &args),
        ExprData::Intrinsic(intr, args) => compile_intrinsic(em, doc, range, intr, &args),
        ExprData::Block(stmts) => compile_block_value(em, doc, range, &stmts),
    }
}

/// A block's value is its last statement's value (spec: "blocks and
/// top-level produce the last expression's value"); every earlier statement
/// runs for effect only. A trailing statement that is itself statement-only
/// (`if`/`while`/`for`/`break`/`continue`/`return`) still runs for its
/// effect, but contributes `null` rather than a value of its own.
fn compile_block_value(em: &mut Emitter, doc: &Doc, range: Range, stmts: &[ExprId]) -> Result<Reg, CompileError> {
    let Some((&last, init)) = stmts.split_last() else {
        let dst = em.alloc()?;
        em.emit(Opcode::ValueNull, range);
        em.reg(dst);
        return Ok(dst);
    };
    for &stmt in init {
        compile_stmt(em, doc, stmt)?;
    }
    if is_statement_only(doc, last) {
        compile_stmt(em, doc, last)?;
        let dst = em.alloc()?;
        em.emit(Opcode::ValueNull, range);
        em.reg(dst);
        Ok(dst)
    } else {
        compile_value(em, doc, last)
    }
}

/// True for the intrinsics the grammar only ever produces in statement
/// position; these never leave a value behind and must run via
/// `compile_stmt` even when they happen to be a block's last statement.
fn is_statement_only(doc: &Doc, id: ExprId) -> bool {
    matches!(
        doc.data(id),
        ExprData::Intrinsic(
            Intrinsic::If | Intrinsic::While | Intrinsic::For | Intrinsic::Break | Intrinsic::Continue | Intrinsic::Return,
            _
        )
    )
}

fn compile_literal(em: &mut Emitter, range: Range, value: Value, pool_index: u32) -> Result<Reg, CompileError> {
    let dst = em.alloc()?;
    if value.is_null() {
        em.emit(Opcode::ValueNull, range);
        em.reg(dst);
        return Ok(dst);
    }
    if value.value_type() == ValueType::Bool {
        em.emit(Opcode::ValueBool, range);
        em.reg(dst);
        em.code.push(value.get_bool(false) as u8);
        return Ok(dst);
    }
    if value.value_type() == ValueType::Num {
        let n = value.get_num(0.0);
        if n.fract() == 0.0 && n >= i16::MIN as f64 && n <= i16::MAX as f64 {
            em.emit(Opcode::ValueSmallInt, range);
            em.reg(dst);
            em.i16_value(n as i16);
            return Ok(dst);
        }
    }
    em.emit(Opcode::Value, range);
    em.reg(dst);
    em.u16_value(pool_index as u16);
    Ok(dst)
}

fn compile_extern(
    em: &mut Emitter,
    doc: &Doc,
    range: Range,
    slot: u32,
    args: &[ExprId],
) -> Result<Reg, CompileError> {
    let mark = em.next;
    let base = em.next;
    for _ in args {
        em.alloc()?;
    }
    for (i, &arg) in args.iter().enumerate() {
        let slot_mark = em.next;
        let src = compile_value(em, doc, arg)?;
        em.next = slot_mark;
        let target = base + i as Reg;
        if src != target {
            em.emit(Opcode::Move, range);
            em.reg(target);
            em.reg(src);
        }
    }
    em.next = mark;
    let dst = em.alloc()?;
    em.emit(Opcode::Extern, range);
    em.reg(dst);
    em.u16_value(slot as u16);
    em.reg(base);
    em.code.push(args.len() as u8);
    Ok(dst)
}

fn compile_intrinsic(
    em: &mut Emitter,
    doc: &Doc,
    range: Range,
    intr: Intrinsic,
    args: &[ExprId],
) -> Result<Reg, CompileError> {
    use Intrinsic::*;
    match intr {
        LogicalAnd => compile_short_circuit(em, doc, range, args, false),
        LogicalOr => compile_short_circuit(em, doc, range, args, true),
        NullCoalesce => compile_null_coalesce(em, doc, range, args),
        Assert => {
            let mark = em.next;
            let a = compile_value(em, doc, args[0])?;
            em.next = mark;
            em.emit(Opcode::Assert, range);
            em.reg(a);
            let dst = em.alloc()?;
            em.emit(Opcode::ValueNull, range);
            em.reg(dst);
            Ok(dst)
        }
        If | While | For | Break | Continue | Return => {
            // The grammar only ever produces these in statement position
            // (see `compile_stmt`); kept as a total fallback instead of a
            // panic for any document built by hand rather than parsed.
            let dst = em.alloc()?;
            em.emit(Opcode::ValueNull, range);
            em.reg(dst);
            Ok(dst)
        }
        _ => compile_simple_intrinsic(em, doc, range, intr, args),
    }
}

fn unary_op(intr: Intrinsic) -> Option<Opcode> {
    use Intrinsic::*;
    Some(match intr {
        Negate => Opcode::Negate,
        Invert => Opcode::Invert,
        VecX => Opcode::VecX,
        VecY => Opcode::VecY,
        VecZ => Opcode::VecZ,
        Magnitude => Opcode::Magnitude,
        Normalize => Opcode::Normalize,
        RoundDown => Opcode::RoundDown,
        RoundNearest => Opcode::RoundNearest,
        RoundUp => Opcode::RoundUp,
        Perlin3Noise => Opcode::Perlin3,
        Has => Opcode::NonNull,
        TypeOf => Opcode::Type,
        HashOf => Opcode::Hash,
        _ => return None,
    })
}

fn binary_op(intr: Intrinsic) -> Option<Opcode> {
    use Intrinsic::*;
    Some(match intr {
        Add => Opcode::Add,
        Sub => Opcode::Sub,
        Mul => Opcode::Mul,
        Div => Opcode::Div,
        Mod => Opcode::Mod,
        Equal => Opcode::Equal,
        NotEqual => Opcode::NotEqual,
        Less => Opcode::Less,
        LessOrEqual => Opcode::LessOrEqual,
        Greater => Opcode::Greater,
        GreaterOrEqual => Opcode::GreaterOrEqual,
        Distance => Opcode::Distance,
        Angle => Opcode::Angle,
        Min => Opcode::Min,
        Max => Opcode::Max,
        QuatFromAngleAxis => Opcode::QuatFromAngleAxis,
        RandomBetween => Opcode::RandomBetween,
        _ => return None,
    })
}

fn ternary_op(intr: Intrinsic) -> Option<Opcode> {
    use Intrinsic::*;
    Some(match intr {
        Clamp => Opcode::Clamp,
        Lerp => Opcode::Lerp,
        QuatFromEuler => Opcode::QuatFromEuler,
        VecCompose => Opcode::VecCompose,
        ColorRgb => Opcode::ColorRgb,
        ColorHsv => Opcode::ColorHsv,
        _ => return None,
    })
}

fn nullary_op(intr: Intrinsic) -> Option<Opcode> {
    use Intrinsic::*;
    Some(match intr {
        Random => Opcode::Random,
        RandomSphere => Opcode::RandomSphere,
        RandomCircleXZ => Opcode::RandomCircleXZ,
        _ => return None,
    })
}

fn compile_simple_intrinsic(
    em: &mut Emitter,
    doc: &Doc,
    range: Range,
    intr: Intrinsic,
    args: &[ExprId],
) -> Result<Reg, CompileError> {
    if let Some(op) = nullary_op(intr) {
        let dst = em.alloc()?;
        em.emit(op, range);
        em.reg(dst);
        return Ok(dst);
    }
    if let Some(op) = unary_op(intr) {
        let mark = em.next;
        let a = compile_value(em, doc, args[0])?;
        em.next = mark;
        let dst = em.alloc()?;
        em.emit(op, range);
        em.reg(dst);
        em.reg(a);
        return Ok(dst);
    }
    if let Some(op) = binary_op(intr) {
        let mark = em.next;
        let a = compile_value(em, doc, args[0])?;
        let b = compile_value(em, doc, args[1])?;
        em.next = mark;
        let dst = em.alloc()?;
        em.emit(op, range);
        em.reg(dst);
        em.reg(a);
        em.reg(b);
        return Ok(dst);
    }
    if let Some(op) = ternary_op(intr) {
        let mark = em.next;
        let a = compile_value(em, doc, args[0])?;
        let b = compile_value(em, doc, args[1])?;
        let c = compile_value(em, doc, args[2])?;
        em.next = mark;
        let dst = em.alloc()?;
        em.emit(op, range);
        em.reg(dst);
        em.reg(a);
        em.reg(b);
        em.reg(c);
        return Ok(dst);
    }
    // Every `Intrinsic` variant is handled by one of the tables above or by
    // a dedicated control-flow/short-circuit function above; this is
    // unreachable for any document the compiler itself can be handed.
    let dst = em.alloc()?;
    em.emit(Opcode::ValueNull, range);
    em.reg(dst);
    Ok(dst)
}

/// `a && b`: if `a` is falsy the result is `Bool(false)` without evaluating
/// `b`; otherwise the result is `Truthy(b)`. `a || b` mirrors this, short-
/// circuiting to `Bool(true)` when `a` is truthy.
fn compile_short_circuit(
    em: &mut Emitter,
    doc: &Doc,
    range: Range,
    args: &[ExprId],
    is_or: bool,
) -> Result<Reg, CompileError> {
    let dst = em.alloc()?;
    let mark = em.next;
    let a = compile_value(em, doc, args[0])?;
    em.next = mark;
    let short_circuit_op = if is_or { Opcode::JumpIfTruthy } else { Opcode::JumpIfFalsy };
    em.emit(short_circuit_op, range);
    em.reg(a);
    let short_at = em.u16_placeholder();
    let mark = em.next;
    let b = compile_value(em, doc, args[1])?;
    em.next = mark;
    em.emit(Opcode::Truthy, range);
    em.reg(dst);
    em.reg(b);
    em.emit(Opcode::Jump, range);
    let end_at = em.u16_placeholder();
    let short_target = em.here();
    em.patch_u16(short_at, short_target);
    em.emit(Opcode::ValueBool, range);
    em.reg(dst);
    em.code.push(is_or as u8);
    let end = em.here();
    em.patch_u16(end_at, end);
    Ok(dst)
}

/// `a ?? b`: `a` if non-null, else `b`.
fn compile_null_coalesce(em: &mut Emitter, doc: &Doc, range: Range, args: &[ExprId]) -> Result<Reg, CompileError> {
    let dst = em.alloc()?;
    let mark = em.next;
    let a = compile_value(em, doc, args[0])?;
    em.next = mark;
    if a != dst {
        em.emit(Opcode::Move, range);
        em.reg(dst);
        em.reg(a);
    }
    em.emit(Opcode::JumpIfNonNull, range);
    em.reg(dst);
    let at = em.u16_placeholder();
    let mark = em.next;
    let b = compile_value(em, doc, args[1])?;
    em.next = mark;
    if b != dst {
        em.emit(Opcode::Move, range);
        em.reg(dst);
        em.reg(b);
    }
    let end = em.here();
    em.patch_u16(at, end);
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::binder::Binder;
    use crate::compiler::optimize::optimize;
    use crate::compiler::parse::parse;
    use crate::memory::Memory;
    use crate::vm::Vm;

    fn run(source: &str) -> Value {
        let binder = Binder::new();
        let mut result = parse(source, &binder);
        assert!(!result.diagnostics.has_errors(), "{:?}", result.diagnostics.diagnostics());
        optimize(&mut result.doc, result.root);
        let program = compile(&result.doc, result.root, binder.signature_hash()).unwrap();
        program.validate().expect("compiled program must validate");
        let mut vm = Vm::new(&program, &binder);
        let mut memory = Memory::new();
        vm.run(&mut memory).unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run("return 1 + 2 * 3;").get_num(0.0), 7.0);
    }

    #[test]
    fn while_loop_accumulates() {
        let v = run("var i = 0; var sum = 0; while (i < 5) { sum = sum + 1; i = i + 1; } return sum;");
        assert_eq!(v.get_num(0.0), 5.0);
    }

    #[test]
    fn short_circuit_boolean() {
        assert!(run("return true && (false || 1);").get_bool(false));
    }

    #[test]
    fn bounded_for_loop() {
        let v = run("var total = 0; for (var i = 0; i < 10; i = i + 1) { total = total + 1; } return total + 1;");
        assert_eq!(v.get_num(0.0), 11.0);
    }

    #[test]
    fn break_and_continue() {
        let v = run(
            "var sum = 0; for (var i = 0; i < 10; i = i + 1) { if (i == 5) { break; } if (i == 2) { continue; } sum = sum + i; } return sum;",
        );
        // 0 + 1 + 3 + 4 = 8 (2 skipped via continue, loop stops before 5)
        assert_eq!(v.get_num(0.0), 8.0);
    }

    #[test]
    fn null_coalesce_prefers_left_when_present() {
        assert_eq!(run("return 5 ?? 9;").get_num(0.0), 5.0);
    }

    #[test]
    fn a_bare_trailing_expression_is_the_program_value_without_an_explicit_return() {
        assert_eq!(run("1 + 2 * 3;").get_num(0.0), 7.0);
    }

    #[test]
    fn block_value_is_its_last_statement_even_nested_inside_a_preceding_if() {
        let v = run("var i = 0; while (i < 10) { i += 1; } i;");
        assert_eq!(v.get_num(0.0), 10.0);
    }

    #[test]
    fn a_block_ending_in_a_control_flow_statement_yields_null() {
        assert!(run("if (true) { 1; }").is_null());
    }
}
