//! The compiled, linear bytecode body the VM executes.
//!
//! Grounded on `ir::format.rs`'s opcode-enum-plus-encode/decode shape (the
//! teacher's 32-opcode fixed-width IR) adapted to this engine's variable-width
//! instruction stream: an opcode byte followed by however many operand bytes
//! that opcode needs, a deduplicated literal pool, and a sorted
//! `(instruction offset -> source range)` table a panic is attributed through.

use crate::pos::Range;
use crate::value::Value;

/// A register id, indexing the VM's fixed 32-register file.
pub type Reg = u8;

pub const NUM_REGISTERS: usize = 32;
/// Absolute code offsets are 16-bit, so a single program's code cannot exceed this.
pub const MAX_CODE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -- control (9) --
    Fail = 0,
    Assert = 1,
    Return = 2,
    ReturnNull = 3,
    Jump = 4,
    JumpIfTruthy = 5,
    JumpIfFalsy = 6,
    JumpIfNonNull = 7,
    Move = 8,

    // -- literals (4) --
    Value = 9,
    ValueNull = 10,
    ValueBool = 11,
    ValueSmallInt = 12,

    // -- memory (4) --
    MemLoad = 13,
    MemStore = 14,
    MemLoadDyn = 15,
    MemStoreDyn = 16,

    // -- extern call (1) --
    Extern = 17,

    // -- type probes (5) --
    Truthy = 18,
    Falsy = 19,
    NonNull = 20,
    Type = 21,
    Hash = 22,

    // -- arithmetic (7) --
    Add = 23,
    Sub = 24,
    Mul = 25,
    Div = 26,
    Mod = 27,
    Negate = 28,
    Invert = 29,

    // -- comparison (6) --
    Equal = 30,
    NotEqual = 31,
    Less = 32,
    LessOrEqual = 33,
    Greater = 34,
    GreaterOrEqual = 35,

    // -- vector (8) --
    VecCompose = 36,
    VecX = 37,
    VecY = 38,
    VecZ = 39,
    Distance = 40,
    Angle = 41,
    Magnitude = 42,
    Normalize = 43,

    // -- quaternion (2) --
    QuatFromEuler = 44,
    QuatFromAngleAxis = 45,

    // -- color (2) --
    ColorRgb = 46,
    ColorHsv = 47,

    // -- random (4) --
    Random = 48,
    RandomSphere = 49,
    RandomCircleXZ = 50,
    RandomBetween = 51,

    // -- rounding (3) --
    RoundDown = 52,
    RoundNearest = 53,
    RoundUp = 54,

    // -- clamp/lerp/min/max (4) --
    Clamp = 55,
    Lerp = 56,
    Min = 57,
    Max = 58,

    // -- noise (1) --
    Perlin3 = 59,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Self> {
        use Opcode::*;
        const TABLE: &[Opcode] = &[
            Fail, Assert, Return, ReturnNull, Jump, JumpIfTruthy, JumpIfFalsy, JumpIfNonNull,
            Move, Value, ValueNull, ValueBool, ValueSmallInt, MemLoad, MemStore, MemLoadDyn,
            MemStoreDyn, Extern, Truthy, Falsy, NonNull, Type, Hash, Add, Sub, Mul, Div, Mod,
            Negate, Invert, Equal, NotEqual, Less, LessOrEqual, Greater, GreaterOrEqual,
            VecCompose, VecX, VecY, VecZ, Distance, Angle, Magnitude, Normalize, QuatFromEuler,
            QuatFromAngleAxis, ColorRgb, ColorHsv, Random, RandomSphere, RandomCircleXZ,
            RandomBetween, RoundDown, RoundNearest, RoundUp, Clamp, Lerp, Min, Max, Perlin3,
        ];
        TABLE.get(b as usize).copied()
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Fail => "fail",
            Assert => "assert",
            Return => "return",
            ReturnNull => "return_null",
            Jump => "jump",
            JumpIfTruthy => "jump_if_truthy",
            JumpIfFalsy => "jump_if_falsy",
            JumpIfNonNull => "jump_if_non_null",
            Move => "move",
            Value => "value",
            ValueNull => "value_null",
            ValueBool => "value_bool",
            ValueSmallInt => "value_small_int",
            MemLoad => "mem_load",
            MemStore => "mem_store",
            MemLoadDyn => "mem_load_dyn",
            MemStoreDyn => "mem_store_dyn",
            Extern => "extern",
            Truthy => "truthy",
            Falsy => "falsy",
            NonNull => "non_null",
            Type => "type",
            Hash => "hash",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Negate => "negate",
            Invert => "invert",
            Equal => "equal",
            NotEqual => "not_equal",
            Less => "less",
            LessOrEqual => "less_or_equal",
            Greater => "greater",
            GreaterOrEqual => "greater_or_equal",
            VecCompose => "vec_compose",
            VecX => "vec_x",
            VecY => "vec_y",
            VecZ => "vec_z",
            Distance => "distance",
            Angle => "angle",
            Magnitude => "magnitude",
            Normalize => "normalize",
            QuatFromEuler => "quat_from_euler",
            QuatFromAngleAxis => "quat_from_angle_axis",
            ColorRgb => "color_rgb",
            ColorHsv => "color_hsv",
            Random => "random",
            RandomSphere => "random_sphere",
            RandomCircleXZ => "random_circle_xz",
            RandomBetween => "random_between",
            RoundDown => "round_down",
            RoundNearest => "round_nearest",
            RoundUp => "round_up",
            Clamp => "clamp",
            Lerp => "lerp",
            Min => "min",
            Max => "max",
            Perlin3 => "perlin3",
        }
    }

    /// Number of operand bytes following the opcode byte itself. Fixed per
    /// opcode (the instruction *stream* is variable-width across different
    /// opcodes, not within one).
    pub fn operand_len(self) -> usize {
        use Opcode::*;
        match self {
            Fail | ReturnNull => 0,
            Assert | Return | ValueNull | Random | RandomSphere | RandomCircleXZ => 1,
            Jump => 2,
            Move
            | Truthy
            | Falsy
            | NonNull
            | Type
            | Hash
            | Negate
            | Invert
            | VecX
            | VecY
            | VecZ
            | Magnitude
            | Normalize
            | RoundDown
            | RoundNearest
            | RoundUp
            | Perlin3
            | ValueBool => 2,
            JumpIfTruthy | JumpIfFalsy | JumpIfNonNull | Value | ValueSmallInt => 3,
            MemLoad | MemStore => 5,
            MemLoadDyn => 1,
            MemStoreDyn => 2,
            Add | Sub | Mul | Div | Mod | Equal | NotEqual | Less | LessOrEqual | Greater
            | GreaterOrEqual | Distance | Angle | RandomBetween | Min | Max
            | QuatFromAngleAxis => 3,
            VecCompose | QuatFromEuler | ColorRgb | ColorHsv | Clamp | Lerp => 4,
            Extern => 5,
        }
    }

    /// Terminating opcodes are legal as a program's final instruction; every
    /// other opcode at the end of the code buffer is a validation failure.
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Fail | Opcode::Return | Opcode::ReturnNull)
    }
}

/// A compiled, executable script body: its bytecode, the literal pool its
/// `Value`-typed operands index into, and the table that maps an instruction
/// offset back to the source range it was lowered from (used to attribute a
/// [`crate::panic::Panic`]).
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub code: Vec<u8>,
    pub literals: Vec<Value>,
    /// Sorted ascending by instruction offset (binary-searchable).
    pub locations: Vec<(u16, Range)>,
    pub binder_hash: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateError {
    Empty,
    NotTerminated,
    UnknownOpcode { offset: u16 },
    TruncatedOperands { offset: u16 },
    RegisterOutOfRange { offset: u16 },
    LiteralOutOfRange { offset: u16 },
    JumpOutOfRange { offset: u16 },
    CodeTooLarge,
}

impl std::fmt::Display for ValidateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidateError::Empty => write!(f, "program has no code"),
            ValidateError::NotTerminated => write!(f, "program does not end in a terminating opcode"),
            ValidateError::UnknownOpcode { offset } => write!(f, "unknown opcode at {offset}"),
            ValidateError::TruncatedOperands { offset } => {
                write!(f, "truncated operands at {offset}")
            }
            ValidateError::RegisterOutOfRange { offset } => {
                write!(f, "register out of range at {offset}")
            }
            ValidateError::LiteralOutOfRange { offset } => {
                write!(f, "literal index out of range at {offset}")
            }
            ValidateError::JumpOutOfRange { offset } => write!(f, "jump target out of range at {offset}"),
            ValidateError::CodeTooLarge => write!(f, "program exceeds the 64 KiB code limit"),
        }
    }
}

impl Program {
    pub fn location_for(&self, offset: u16) -> Option<Range> {
        match self.locations.binary_search_by_key(&offset, |(o, _)| *o) {
            Ok(idx) => Some(self.locations[idx].1),
            Err(0) => None,
            Err(idx) => Some(self.locations[idx - 1].1),
        }
    }

    /// A total function over arbitrary bytes: never panics, always returns
    /// either `Ok(())` or a structured reason. Ensures a validated program
    /// can never corrupt the VM's register file, literal pool, or binder
    /// table at runtime.
    pub fn validate(&self) -> Result<(), ValidateError> {
        if self.code.is_empty() {
            return Err(ValidateError::Empty);
        }
        if self.code.len() > MAX_CODE_SIZE {
            return Err(ValidateError::CodeTooLarge);
        }
        let mut offset = 0usize;
        let mut last_opcode_offset = 0usize;
        while offset < self.code.len() {
            let opcode_offset = offset as u16;
            let Some(op) = Opcode::from_u8(self.code[offset]) else {
                return Err(ValidateError::UnknownOpcode { offset: opcode_offset });
            };
            last_opcode_offset = offset;
            let operand_len = op.operand_len();
            if offset + 1 + operand_len > self.code.len() {
                return Err(ValidateError::TruncatedOperands { offset: opcode_offset });
            }
            let body = &self.code[offset + 1..offset + 1 + operand_len];
            self.validate_operands(op, opcode_offset, body)?;
            offset += 1 + operand_len;
        }
        let Some(last_op) = Opcode::from_u8(self.code[last_opcode_offset]) else {
            return Err(ValidateError::UnknownOpcode { offset: last_opcode_offset as u16 });
        };
        if !last_op.is_terminator() {
            return Err(ValidateError::NotTerminated);
        }
        Ok(())
    }

    fn validate_operands(&self, op: Opcode, offset: u16, body: &[u8]) -> Result<(), ValidateError> {
        use Opcode::*;
        let reg_ok = |r: u8| (r as usize) < NUM_REGISTERS;
        let jump_ok = |t: u16| (t as usize) < self.code.len();
        let lit_ok = |idx: u16| (idx as usize) < self.literals.len();
        let err_reg = || Err(ValidateError::RegisterOutOfRange { offset });
        let err_jump = || Err(ValidateError::JumpOutOfRange { offset });
        let err_lit = || Err(ValidateError::LiteralOutOfRange { offset });
        match op {
            Fail | ReturnNull => Ok(()),
            Assert | Return => {
                if reg_ok(body[0]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            Random | RandomSphere | RandomCircleXZ => {
                if reg_ok(body[0]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            Jump => {
                if jump_ok(u16::from_le_bytes([body[0], body[1]])) {
                    Ok(())
                } else {
                    err_jump()
                }
            }
            JumpIfTruthy | JumpIfFalsy | JumpIfNonNull => {
                if !reg_ok(body[0]) {
                    return err_reg();
                }
                if jump_ok(u16::from_le_bytes([body[1], body[2]])) {
                    Ok(())
                } else {
                    err_jump()
                }
            }
            Move | Truthy | Falsy | NonNull | Type | Hash | Negate | Invert | VecX | VecY
            | VecZ | Magnitude | Normalize | RoundDown | RoundNearest | RoundUp | Perlin3 => {
                if reg_ok(body[0]) && reg_ok(body[1]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            ValueBool => {
                if reg_ok(body[0]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            ValueNull => {
                if reg_ok(body[0]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            Value => {
                if !reg_ok(body[0]) {
                    return err_reg();
                }
                if lit_ok(u16::from_le_bytes([body[1], body[2]])) {
                    Ok(())
                } else {
                    err_lit()
                }
            }
            ValueSmallInt => {
                if reg_ok(body[0]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            MemLoad => {
                if reg_ok(body[0]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            MemStore => {
                if reg_ok(body[4]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            MemLoadDyn => {
                if reg_ok(body[0]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            MemStoreDyn => {
                if reg_ok(body[0]) && reg_ok(body[1]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            Extern => {
                if !reg_ok(body[0]) {
                    return err_reg();
                }
                let base = body[3];
                let count = body[4];
                if !reg_ok(base) {
                    return err_reg();
                }
                if (base as usize) + (count as usize) > NUM_REGISTERS {
                    return err_reg();
                }
                Ok(())
            }
            Add | Sub | Mul | Div | Mod | Equal | NotEqual | Less | LessOrEqual | Greater
            | GreaterOrEqual | Distance | Angle | RandomBetween | Min | Max
            | QuatFromAngleAxis => {
                if reg_ok(body[0]) && reg_ok(body[1]) && reg_ok(body[2]) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
            VecCompose | QuatFromEuler | ColorRgb | ColorHsv | Clamp | Lerp => {
                if body.iter().take(4).all(|&r| reg_ok(r)) {
                    Ok(())
                } else {
                    err_reg()
                }
            }
        }
    }

    /// Human-readable listing, one instruction per line, used by tooling and
    /// by tests that would rather assert on text than raw bytes.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut offset = 0usize;
        while offset < self.code.len() {
            let Some(op) = Opcode::from_u8(self.code[offset]) else {
                out.push_str(&format!("{offset:04x}: <bad opcode {:#x}>\n", self.code[offset]));
                break;
            };
            let len = op.operand_len();
            if offset + 1 + len > self.code.len() {
                out.push_str(&format!("{offset:04x}: <truncated {}>\n", op.name()));
                break;
            }
            let body = &self.code[offset + 1..offset + 1 + len];
            out.push_str(&format!("{:04x}: {} {}\n", offset, op.name(), hex_operands(body)));
            offset += 1 + len;
        }
        out
    }
}

fn hex_operands(body: &[u8]) -> String {
    body.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

pub const MAGIC: [u8; 4] = *b"SCRP";
pub const FORMAT_VERSION: u16 = 1;

/// Serializes a [`Program`] per the bytecode file format: magic, version,
/// binder hash, code, literal pool, location table, all little-endian.
pub fn write_program(program: &Program) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&program.binder_hash.to_le_bytes());
    buf.extend_from_slice(&(program.code.len() as u16).to_le_bytes());
    buf.extend_from_slice(&program.code);
    buf.extend_from_slice(&(program.literals.len() as u16).to_le_bytes());
    for lit in &program.literals {
        buf.extend_from_slice(&value_to_bytes(*lit));
    }
    buf.extend_from_slice(&(program.locations.len() as u16).to_le_bytes());
    for (instr, range) in &program.locations {
        buf.extend_from_slice(&instr.to_le_bytes());
        buf.extend_from_slice(&(range.start as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // col_start: resolved lazily from `Pos`
        buf.extend_from_slice(&(range.end as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // col_end
    }
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    BadMagic,
    UnsupportedVersion(u16),
    Truncated,
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::BadMagic => write!(f, "bad magic bytes"),
            ReadError::UnsupportedVersion(v) => write!(f, "unsupported bytecode version {v}"),
            ReadError::Truncated => write!(f, "truncated bytecode file"),
        }
    }
}

pub fn read_program(bytes: &[u8]) -> Result<Program, ReadError> {
    let mut cursor = 0usize;
    let take = |cursor: &mut usize, n: usize| -> Result<&[u8], ReadError> {
        if *cursor + n > bytes.len() {
            return Err(ReadError::Truncated);
        }
        let slice = &bytes[*cursor..*cursor + n];
        *cursor += n;
        Ok(slice)
    };
    let magic = take(&mut cursor, 4)?;
    if magic != MAGIC {
        return Err(ReadError::BadMagic);
    }
    let version = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(ReadError::UnsupportedVersion(version));
    }
    let binder_hash = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap());
    let code_len = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap()) as usize;
    let code = take(&mut cursor, code_len)?.to_vec();
    let lit_count = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap()) as usize;
    let mut literals = Vec::with_capacity(lit_count);
    for _ in 0..lit_count {
        let raw = take(&mut cursor, 16)?;
        literals.push(value_from_bytes(raw.try_into().unwrap()));
    }
    let loc_count = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap()) as usize;
    let mut locations = Vec::with_capacity(loc_count);
    for _ in 0..loc_count {
        let instr = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap());
        let line_start = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap());
        let _col_start = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap());
        let line_end = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap());
        let _col_end = u16::from_le_bytes(take(&mut cursor, 2)?.try_into().unwrap());
        locations.push((instr, Range::new(line_start as u32, line_end as u32)));
    }
    Ok(Program { code, literals, locations, binder_hash })
}

/// Bit-for-bit export of a `Value`'s four `u32` words, little-endian, used by
/// both the bytecode file format and by literal-pool serialization.
fn value_to_bytes(v: Value) -> [u8; 16] {
    let words = v.raw_words();
    let mut out = [0u8; 16];
    for (i, w) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
    out
}

fn value_from_bytes(bytes: [u8; 16]) -> Value {
    let mut words = [0u32; 4];
    for i in 0..4 {
        words[i] = u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
    }
    Value::from_raw_words(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(code: &mut Vec<u8>, op: Opcode, operands: &[u8]) {
        code.push(op as u8);
        code.extend_from_slice(operands);
    }

    #[test]
    fn empty_program_fails_validation() {
        let p = Program::default();
        assert_eq!(p.validate(), Err(ValidateError::Empty));
    }

    #[test]
    fn program_must_end_in_terminator() {
        let mut code = Vec::new();
        emit(&mut code, Opcode::ValueNull, &[0]);
        let p = Program { code, literals: vec![], locations: vec![], binder_hash: 0 };
        assert_eq!(p.validate(), Err(ValidateError::NotTerminated));
    }

    #[test]
    fn well_formed_program_validates() {
        let mut code = Vec::new();
        emit(&mut code, Opcode::ValueNull, &[0]);
        emit(&mut code, Opcode::Return, &[0]);
        let p = Program { code, literals: vec![], locations: vec![], binder_hash: 0 };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn out_of_range_register_is_rejected() {
        let mut code = Vec::new();
        emit(&mut code, Opcode::ValueNull, &[200]);
        emit(&mut code, Opcode::Return, &[0]);
        let p = Program { code, literals: vec![], locations: vec![], binder_hash: 0 };
        assert!(matches!(p.validate(), Err(ValidateError::RegisterOutOfRange { .. })));
    }

    #[test]
    fn out_of_range_jump_is_rejected() {
        let mut code = Vec::new();
        emit(&mut code, Opcode::Jump, &[0xff, 0xff]);
        let p = Program { code, literals: vec![], locations: vec![], binder_hash: 0 };
        assert!(matches!(p.validate(), Err(ValidateError::JumpOutOfRange { .. })));
    }

    #[test]
    fn unknown_opcode_byte_is_rejected_not_panicked() {
        let code = vec![0xfe];
        let p = Program { code, literals: vec![], locations: vec![], binder_hash: 0 };
        assert!(matches!(p.validate(), Err(ValidateError::UnknownOpcode { .. })));
    }

    #[test]
    fn roundtrips_through_the_file_format() {
        let mut code = Vec::new();
        emit(&mut code, Opcode::Value, &[0, 0, 0]);
        emit(&mut code, Opcode::Return, &[0]);
        let p = Program {
            code,
            literals: vec![Value::num(42.0)],
            locations: vec![(0, Range::new(0, 1))],
            binder_hash: 0xdead_beef,
        };
        let bytes = write_program(&p);
        let back = read_program(&bytes).unwrap();
        assert_eq!(back.code, p.code);
        assert_eq!(back.binder_hash, p.binder_hash);
        assert_eq!(back.literals[0].get_num(0.0), 42.0);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 20];
        assert_eq!(read_program(&bytes), Err(ReadError::BadMagic));
    }
}
