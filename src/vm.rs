//! The bytecode interpreter.
//!
//! Grounded on `ir::interpreter.rs`'s fetch-decode-execute loop (a flat
//! `match` over the opcode byte, a fixed register file, `pc` as a plain
//! `usize`) generalized from a fixed-width instruction stream to this
//! engine's variable-width one, and on `script_vm.h`'s execution-count
//! guard (`ScriptExecLimitExceeded`) and `Extern` call-out convention.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::bytecode::{Opcode, Program, NUM_REGISTERS};
use crate::compiler::binder::Binder;
use crate::memory::Memory;
use crate::panic::{Panic, PanicKind};
use crate::pos::Range;
use crate::value::Value;

/// Instructions a single `run` call may execute before it's judged to be
/// looping forever.
pub const MAX_INSTRUCTIONS: u32 = 25_000;

/// Executes one compiled [`Program`] against one [`Binder`]. Stateless across
/// calls to `run` other than its random generator, so one `Vm` can back every
/// tick of a long-lived behavior tree.
pub struct Vm<'a> {
    program: &'a Program,
    binder: &'a Binder,
    rng: ChaCha8Rng,
}

impl<'a> Vm<'a> {
    /// Seeds the random generator from OS entropy; `Random`/`RandomSphere`/
    /// etc. are genuinely nondeterministic across `Vm`s, matching
    /// `Intrinsic::is_deterministic()` returning `false` for them.
    pub fn new(program: &'a Program, binder: &'a Binder) -> Self {
        Vm { program, binder, rng: ChaCha8Rng::from_entropy() }
    }

    /// Fixed-seed constructor for reproducible replays (e.g. a recorded
    /// trace re-run through `RecordTracer`).
    pub fn with_seed(program: &'a Program, binder: &'a Binder, seed: u64) -> Self {
        Vm { program, binder, rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    fn range_at(&self, offset: u16) -> Range {
        self.program.location_for(offset).unwrap_or_else(|| Range::new(0, 0))
    }

    /// Runs the program to completion against `memory`, starting fresh
    /// registers each call. `binder_hash` mismatches are the caller's
    /// responsibility to check (typically once, at load time) rather than
    /// on every call.
    pub fn run(&mut self, memory: &mut Memory) -> Result<Value, Panic> {
        tracing::debug!(code_len = self.program.code.len(), "starting program run");
        let code = &self.program.code;
        let mut regs = [Value::null(); NUM_REGISTERS];
        let mut pc: usize = 0;
        let mut executed: u32 = 0;

        loop {
            let op_offset = pc as u16;
            let Some(op) = Opcode::from_u8(code[pc]) else {
                return Err(Panic::new(PanicKind::ExecutionFailed, self.range_at(op_offset)));
            };
            pc += 1;

            executed += 1;
            if executed > MAX_INSTRUCTIONS {
                tracing::debug!(executed, "execution limit exceeded");
                return Err(Panic::new(PanicKind::ExecutionLimitExceeded, self.range_at(op_offset)));
            }

            macro_rules! reg {
                () => {{
                    let r = code[pc] as usize;
                    pc += 1;
                    r
                }};
            }
            macro_rules! u16_operand {
                () => {{
                    let v = u16::from_le_bytes([code[pc], code[pc + 1]]);
                    pc += 2;
                    v
                }};
            }
            macro_rules! u32_operand {
                () => {{
                    let v = u32::from_le_bytes([code[pc], code[pc + 1], code[pc + 2], code[pc + 3]]);
                    pc += 4;
                    v
                }};
            }
            macro_rules! i16_operand {
                () => {{
                    let v = i16::from_le_bytes([code[pc], code[pc + 1]]);
                    pc += 2;
                    v
                }};
            }

            match op {
                Opcode::Fail => return Err(Panic::new(PanicKind::ExecutionFailed, self.range_at(op_offset))),
                Opcode::Assert => {
                    let r = reg!();
                    if regs[r].is_falsy() {
                        return Err(Panic::new(PanicKind::AssertionFailed, self.range_at(op_offset)));
                    }
                }
                Opcode::Return => {
                    let r = reg!();
                    return Ok(regs[r]);
                }
                Opcode::ReturnNull => return Ok(Value::null()),
                Opcode::Jump => {
                    let target = u16_operand!();
                    pc = target as usize;
                }
                Opcode::JumpIfTruthy => {
                    let r = reg!();
                    let target = u16_operand!();
                    if regs[r].is_truthy() {
                        pc = target as usize;
                    }
                }
                Opcode::JumpIfFalsy => {
                    let r = reg!();
                    let target = u16_operand!();
                    if regs[r].is_falsy() {
                        pc = target as usize;
                    }
                }
                Opcode::JumpIfNonNull => {
                    let r = reg!();
                    let target = u16_operand!();
                    if regs[r].non_null() {
                        pc = target as usize;
                    }
                }
                Opcode::Move => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = regs[src];
                }
                Opcode::Value => {
                    let dst = reg!();
                    let idx = u16_operand!();
                    regs[dst] = self.program.literals[idx as usize];
                }
                Opcode::ValueNull => {
                    let dst = reg!();
                    regs[dst] = Value::null();
                }
                Opcode::ValueBool => {
                    let dst = reg!();
                    let b = code[pc];
                    pc += 1;
                    regs[dst] = Value::boolean(b != 0);
                }
                Opcode::ValueSmallInt => {
                    let dst = reg!();
                    let v = i16_operand!();
                    regs[dst] = Value::num(v as f64);
                }
                Opcode::MemLoad => {
                    let dst = reg!();
                    let key = u32_operand!();
                    if self.binder.disallow_memory_access() {
                        return Err(Panic::new(PanicKind::MissingCapability, self.range_at(op_offset)));
                    }
                    regs[dst] = memory.load(key);
                }
                Opcode::MemStore => {
                    let key = u32_operand!();
                    let src = reg!();
                    if self.binder.disallow_memory_access() {
                        return Err(Panic::new(PanicKind::MissingCapability, self.range_at(op_offset)));
                    }
                    memory.store(key, regs[src]);
                }
                Opcode::MemLoadDyn => {
                    let dst = reg!();
                    if self.binder.disallow_memory_access() {
                        return Err(Panic::new(PanicKind::MissingCapability, self.range_at(op_offset)));
                    }
                    let key = regs[dst].get_str(0);
                    regs[dst] = memory.load(key);
                }
                Opcode::MemStoreDyn => {
                    let key_reg = reg!();
                    let val_reg = reg!();
                    if self.binder.disallow_memory_access() {
                        return Err(Panic::new(PanicKind::MissingCapability, self.range_at(op_offset)));
                    }
                    memory.store(regs[key_reg].get_str(0), regs[val_reg]);
                }
                Opcode::Extern => {
                    let dst = reg!();
                    let slot = u16_operand!();
                    let base = reg!();
                    let count = code[pc];
                    pc += 1;
                    let args = &regs[base as usize..base as usize + count as usize];
                    tracing::debug!(slot, args = count, "calling extern function {}", self.binder.function_name(slot as u32));
                    let result = self.binder.call(slot as u32, args, self.range_at(op_offset))?;
                    regs[dst] = result;
                }
                Opcode::Truthy => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = Value::boolean(regs[src].is_truthy());
                }
                Opcode::Falsy => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = Value::boolean(regs[src].is_falsy());
                }
                Opcode::NonNull => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = Value::boolean(regs[src].non_null());
                }
                Opcode::Type => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = Value::str_hash(fnv1a(regs[src].type_str().as_bytes()) as u32);
                }
                Opcode::Hash => {
                    let dst = reg!();
                    let src = reg!();
                    let words = regs[src].raw_words();
                    let mut bytes = [0u8; 16];
                    for (i, w) in words.iter().enumerate() {
                        bytes[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
                    }
                    // Keep the result within f64's 53-bit exact-integer range.
                    let h = fnv1a(&bytes) & 0x000f_ffff_ffff_ffff;
                    regs[dst] = Value::num(h as f64);
                }
                Opcode::Add => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = regs[a].add(&regs[b]);
                }
                Opcode::Sub => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = regs[a].sub(&regs[b]);
                }
                Opcode::Mul => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = regs[a].mul(&regs[b]);
                }
                Opcode::Div => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = regs[a].div(&regs[b]);
                }
                Opcode::Mod => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = regs[a].rem(&regs[b]);
                }
                Opcode::Negate => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = regs[src].negate();
                }
                Opcode::Invert => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = regs[src].invert();
                }
                Opcode::Equal => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = Value::boolean(regs[a].equal(&regs[b]));
                }
                Opcode::NotEqual => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = Value::boolean(!regs[a].equal(&regs[b]));
                }
                Opcode::Less => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = Value::boolean(regs[a].less(&regs[b]));
                }
                Opcode::LessOrEqual => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = Value::boolean(regs[a].less(&regs[b]) || regs[a].equal(&regs[b]));
                }
                Opcode::Greater => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = Value::boolean(regs[a].greater(&regs[b]));
                }
                Opcode::GreaterOrEqual => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = Value::boolean(regs[a].greater(&regs[b]) || regs[a].equal(&regs[b]));
                }
                Opcode::VecCompose => {
                    let (dst, a, b, c) = (reg!(), reg!(), reg!(), reg!());
                    regs[dst] = Value::vec3(
                        regs[a].get_num(0.0) as f32,
                        regs[b].get_num(0.0) as f32,
                        regs[c].get_num(0.0) as f32,
                    );
                }
                Opcode::VecX => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = regs[src].vec_x();
                }
                Opcode::VecY => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = regs[src].vec_y();
                }
                Opcode::VecZ => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = regs[src].vec_z();
                }
                Opcode::Distance => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = regs[a].distance(&regs[b]);
                }
                Opcode::Angle => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = regs[a].angle(&regs[b]);
                }
                Opcode::Magnitude => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = regs[src].magnitude();
                }
                Opcode::Normalize => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = regs[src].normalize();
                }
                Opcode::QuatFromEuler => {
                    let (dst, a, b, c) = (reg!(), reg!(), reg!(), reg!());
                    regs[dst] = quat_from_euler(
                        regs[a].get_num(0.0) as f32,
                        regs[b].get_num(0.0) as f32,
                        regs[c].get_num(0.0) as f32,
                    );
                }
                Opcode::QuatFromAngleAxis => {
                    let (dst, angle, axis) = (reg!(), reg!(), reg!());
                    let (ax, ay, az) = regs[axis].get_vec3((0.0, 1.0, 0.0));
                    regs[dst] = quat_from_angle_axis(regs[angle].get_num(0.0) as f32, (ax, ay, az));
                }
                Opcode::ColorRgb => {
                    let (dst, r, g, b) = (reg!(), reg!(), reg!(), reg!());
                    regs[dst] = Value::vec3(
                        regs[r].get_num(0.0) as f32,
                        regs[g].get_num(0.0) as f32,
                        regs[b].get_num(0.0) as f32,
                    );
                }
                Opcode::ColorHsv => {
                    let (dst, h, s, v) = (reg!(), reg!(), reg!(), reg!());
                    let (r, g, b) = hsv_to_rgb(
                        regs[h].get_num(0.0) as f32,
                        regs[s].get_num(0.0) as f32,
                        regs[v].get_num(0.0) as f32,
                    );
                    regs[dst] = Value::vec3(r, g, b);
                }
                Opcode::Random => {
                    let dst = reg!();
                    regs[dst] = Value::num(self.rng.gen::<f64>());
                }
                Opcode::RandomSphere => {
                    let dst = reg!();
                    regs[dst] = self.random_sphere();
                }
                Opcode::RandomCircleXZ => {
                    let dst = reg!();
                    regs[dst] = self.random_circle_xz();
                }
                Opcode::RandomBetween => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    let (lo, hi) = (regs[a].get_num(0.0), regs[b].get_num(0.0));
                    regs[dst] = Value::num(if lo < hi { self.rng.gen_range(lo..hi) } else { lo });
                }
                Opcode::RoundDown => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = Value::num(regs[src].get_num(0.0).floor());
                }
                Opcode::RoundNearest => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = Value::num(regs[src].get_num(0.0).round());
                }
                Opcode::RoundUp => {
                    let dst = reg!();
                    let src = reg!();
                    regs[dst] = Value::num(regs[src].get_num(0.0).ceil());
                }
                Opcode::Clamp => {
                    let (dst, val, lo, hi) = (reg!(), reg!(), reg!(), reg!());
                    let (v, lo, hi) = (regs[val].get_num(0.0), regs[lo].get_num(0.0), regs[hi].get_num(0.0));
                    regs[dst] = Value::num(v.clamp(lo.min(hi), lo.max(hi)));
                }
                Opcode::Lerp => {
                    let (dst, a, b, t) = (reg!(), reg!(), reg!(), reg!());
                    let (a, b, t) = (regs[a].get_num(0.0), regs[b].get_num(0.0), regs[t].get_num(0.0));
                    regs[dst] = Value::num(a + (b - a) * t);
                }
                Opcode::Min => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] = Value::num(regs[a].get_num(f64::INFINITY).min(regs[b].get_num(f64::INFINITY)));
                }
                Opcode::Max => {
                    let (dst, a, b) = (reg!(), reg!(), reg!());
                    regs[dst] =
                        Value::num(regs[a].get_num(f64::NEG_INFINITY).max(regs[b].get_num(f64::NEG_INFINITY)));
                }
                Opcode::Perlin3 => {
                    let dst = reg!();
                    let src = reg!();
                    let (x, y, z) = regs[src].get_vec3((0.0, 0.0, 0.0));
                    regs[dst] = Value::num(crate::noise::perlin3(x, y, z) as f64);
                }
            }
        }
    }

    fn random_sphere(&mut self) -> Value {
        // Rejection sampling inside the unit cube, retried until inside the
        // unit sphere: simple, exact, and the expected retry count is small
        // (cube volume / sphere volume ≈ 1.91).
        loop {
            let x = self.rng.gen_range(-1.0..1.0);
            let y = self.rng.gen_range(-1.0..1.0);
            let z = self.rng.gen_range(-1.0..1.0);
            if x * x + y * y + z * z <= 1.0 {
                return Value::vec3(x, y, z);
            }
        }
    }

    fn random_circle_xz(&mut self) -> Value {
        loop {
            let x = self.rng.gen_range(-1.0..1.0);
            let z = self.rng.gen_range(-1.0..1.0);
            if x * x + z * z <= 1.0 {
                return Value::vec3(x, 0.0, z);
            }
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

fn quat_from_euler(pitch: f32, yaw: f32, roll: f32) -> Value {
    let (sp, cp) = (pitch * 0.5).sin_cos();
    let (sy, cy) = (yaw * 0.5).sin_cos();
    let (sr, cr) = (roll * 0.5).sin_cos();
    let x = sp * cy * cr - cp * sy * sr;
    let y = cp * sy * cr + sp * cy * sr;
    let z = cp * cy * sr - sp * sy * cr;
    Value::quat(x, y, z)
}

fn quat_from_angle_axis(angle: f32, axis: (f32, f32, f32)) -> Value {
    let mag = (axis.0 * axis.0 + axis.1 * axis.1 + axis.2 * axis.2).sqrt();
    let (ax, ay, az) = if mag > 0.0 {
        (axis.0 / mag, axis.1 / mag, axis.2 / mag)
    } else {
        (0.0, 1.0, 0.0)
    };
    let half = angle * 0.5;
    let s = half.sin();
    Value::quat(ax * s, ay * s, az * s)
}

/// `h` in degrees, `s`/`v` in `[0, 1]`.
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h = h.rem_euclid(360.0);
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (r + m, g + m, b + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::binder::Binder;
    use crate::compiler::optimize::optimize;
    use crate::compiler::parse::parse;
    use crate::compiler::codegen::compile;

    fn compile_and_run(source: &str, binder: &Binder, memory: &mut Memory) -> Value {
        let mut result = parse(source, binder);
        assert!(!result.diagnostics.has_errors());
        optimize(&mut result.doc, result.root);
        let program = compile(&result.doc, result.root, binder.signature_hash()).unwrap();
        program.validate().unwrap();
        let mut vm = Vm::new(&program, binder);
        vm.run(memory).unwrap()
    }

    #[test]
    fn memory_compound_assign_roundtrips() {
        let binder = Binder::new();
        let mut memory = Memory::new();
        let v = compile_and_run("$score = 50; $score += 25; return $score;", &binder, &mut memory);
        assert_eq!(v.get_num(0.0), 75.0);
    }

    #[test]
    fn execution_limit_is_enforced() {
        let binder = Binder::new();
        let mut result = parse("var i = 0; while (true) { i = i + 1; } return i;", &binder);
        assert!(!result.diagnostics.has_errors());
        optimize(&mut result.doc, result.root);
        let program = compile(&result.doc, result.root, binder.signature_hash()).unwrap();
        program.validate().unwrap();
        let mut vm = Vm::new(&program, &binder);
        let mut memory = Memory::new();
        let err = vm.run(&mut memory).unwrap_err();
        assert_eq!(err.kind, PanicKind::ExecutionLimitExceeded);
    }

    #[test]
    fn type_of_same_kind_values_are_equal() {
        let binder = Binder::new();
        let mut memory = Memory::new();
        let v = compile_and_run("return type_of(1) == type_of(2);", &binder, &mut memory);
        assert!(v.get_bool(false));
    }

    #[test]
    fn hsv_red_converts_to_pure_red_channel() {
        let (r, g, b) = hsv_to_rgb(0.0, 1.0, 1.0);
        assert!((r - 1.0).abs() < 1e-6);
        assert!(g.abs() < 1e-6);
        assert!(b.abs() < 1e-6);
    }

    #[test]
    fn disallow_memory_access_flag_turns_mem_store_into_a_panic() {
        use crate::compiler::binder::BinderFlags;
        use crate::panic::PanicKind;

        let binder = Binder::new().with_flags(BinderFlags::DISALLOW_MEMORY_ACCESS);
        let mut result = parse("$score = 1; return $score;", &binder);
        assert!(!result.diagnostics.has_errors());
        optimize(&mut result.doc, result.root);
        let program = compile(&result.doc, result.root, binder.signature_hash()).unwrap();
        program.validate().unwrap();
        let mut vm = Vm::new(&program, &binder);
        let mut memory = Memory::new();
        let err = vm.run(&mut memory).unwrap_err();
        assert_eq!(err.kind, PanicKind::MissingCapability);
    }
}
