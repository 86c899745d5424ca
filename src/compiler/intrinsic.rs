//! The fixed set of built-in operators the lexer recognizes as keywords and
//! the parser lowers into `doc::ExprKind::Intrinsic` nodes.
//!
//! Grounded on `script_doc.h`'s `ScriptIntrinsic` enum (arithmetic, comparison,
//! logical, vector/quaternion, control-flow and noise/random built-ins) and
//! `script_lex.h`'s keyword table that maps source text to them.

/// A built-in operator, control-flow form, or math primitive. Every
/// `doc::ExprKind::Intrinsic` node carries one of these plus its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Negate,
    Invert,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    LogicalAnd,
    LogicalOr,
    NullCoalesce,
    If,
    While,
    For,
    Continue,
    Break,
    Return,
    VecCompose,
    VecX,
    VecY,
    VecZ,
    Distance,
    Angle,
    Magnitude,
    Normalize,
    QuatFromEuler,
    QuatFromAngleAxis,
    Random,
    RandomSphere,
    RandomCircleXZ,
    RandomBetween,
    RoundDown,
    RoundNearest,
    RoundUp,
    Clamp,
    Lerp,
    Min,
    Max,
    Perlin3Noise,
    Assert,
    Has,
    TypeOf,
    HashOf,
    ColorRgb,
    ColorHsv,
}

/// Inclusive `(min, max)` argument count; `max == None` means variadic.
pub type Arity = (u8, Option<u8>);

impl Intrinsic {
    pub fn keyword(self) -> &'static str {
        match self {
            Intrinsic::Add => "+",
            Intrinsic::Sub => "-",
            Intrinsic::Mul => "*",
            Intrinsic::Div => "/",
            Intrinsic::Mod => "%",
            Intrinsic::Negate => "neg",
            Intrinsic::Invert => "!",
            Intrinsic::Equal => "==",
            Intrinsic::NotEqual => "!=",
            Intrinsic::Less => "<",
            Intrinsic::LessOrEqual => "<=",
            Intrinsic::Greater => ">",
            Intrinsic::GreaterOrEqual => ">=",
            Intrinsic::LogicalAnd => "&&",
            Intrinsic::LogicalOr => "||",
            Intrinsic::NullCoalesce => "??",
            Intrinsic::If => "if",
            Intrinsic::While => "while",
            Intrinsic::For => "for",
            Intrinsic::Continue => "continue",
            Intrinsic::Break => "break",
            Intrinsic::Return => "return",
            Intrinsic::VecCompose => "vec3",
            Intrinsic::VecX => "vec_x",
            Intrinsic::VecY => "vec_y",
            Intrinsic::VecZ => "vec_z",
            Intrinsic::Distance => "distance",
            Intrinsic::Angle => "angle",
            Intrinsic::Magnitude => "magnitude",
            Intrinsic::Normalize => "normalize",
            Intrinsic::QuatFromEuler => "quat_from_euler",
            Intrinsic::QuatFromAngleAxis => "quat_from_angle_axis",
            Intrinsic::Random => "random",
            Intrinsic::RandomSphere => "random_sphere",
            Intrinsic::RandomCircleXZ => "random_circle_xz",
            Intrinsic::RandomBetween => "random_between",
            Intrinsic::RoundDown => "round_down",
            Intrinsic::RoundNearest => "round_nearest",
            Intrinsic::RoundUp => "round_up",
            Intrinsic::Clamp => "clamp",
            Intrinsic::Lerp => "lerp",
            Intrinsic::Min => "min",
            Intrinsic::Max => "max",
            Intrinsic::Perlin3Noise => "perlin3",
            Intrinsic::Assert => "assert",
            Intrinsic::Has => "has",
            Intrinsic::TypeOf => "type_of",
            Intrinsic::HashOf => "hash_of",
            Intrinsic::ColorRgb => "color_rgb",
            Intrinsic::ColorHsv => "color_hsv",
        }
    }

    pub fn from_keyword(text: &str) -> Option<Self> {
        ALL.iter().copied().find(|i| i.keyword() == text)
    }

    pub fn arity(self) -> Arity {
        use Intrinsic::*;
        match self {
            Negate | Invert | VecX | VecY | VecZ | Magnitude | Normalize | RoundDown
            | RoundNearest | RoundUp | Continue | Break | Assert | Has | TypeOf | HashOf => {
                (1, Some(1))
            }
            Return => (0, Some(1)),
            Add | Sub | Mul | Div | Mod | Equal | NotEqual | Less | LessOrEqual | Greater
            | GreaterOrEqual | LogicalAnd | LogicalOr | NullCoalesce | Distance | Angle
            | Min | Max | While | RandomBetween | QuatFromAngleAxis => (2, Some(2)),
            Clamp | Lerp | QuatFromEuler | ColorRgb | ColorHsv => (3, Some(3)),
            VecCompose => (3, Some(3)),
            For => (4, Some(4)),
            If => (2, Some(3)),
            Random | RandomSphere | RandomCircleXZ => (0, Some(0)),
            Perlin3Noise => (1, Some(1)),
        }
    }

    /// Control-flow intrinsics are lowered to jumps by the compiler instead
    /// of a flat opcode emission, and are never candidates for constant
    /// folding regardless of their operands.
    pub fn is_control_flow(self) -> bool {
        matches!(
            self,
            Intrinsic::If
                | Intrinsic::While
                | Intrinsic::For
                | Intrinsic::Continue
                | Intrinsic::Break
                | Intrinsic::Return
                | Intrinsic::LogicalAnd
                | Intrinsic::LogicalOr
        )
    }

    /// Non-deterministic intrinsics can never be constant-folded even when
    /// every argument is a static literal (`script_optimize.h`'s "purity"
    /// check on random/noise calls).
    pub fn is_deterministic(self) -> bool {
        !matches!(
            self,
            Intrinsic::Random
                | Intrinsic::RandomSphere
                | Intrinsic::RandomCircleXZ
                | Intrinsic::RandomBetween
                | Intrinsic::Perlin3Noise
        )
    }
}

pub const ALL: &[Intrinsic] = &[
    Intrinsic::Add,
    Intrinsic::Sub,
    Intrinsic::Mul,
    Intrinsic::Div,
    Intrinsic::Mod,
    Intrinsic::Negate,
    Intrinsic::Invert,
    Intrinsic::Equal,
    Intrinsic::NotEqual,
    Intrinsic::Less,
    Intrinsic::LessOrEqual,
    Intrinsic::Greater,
    Intrinsic::GreaterOrEqual,
    Intrinsic::LogicalAnd,
    Intrinsic::LogicalOr,
    Intrinsic::NullCoalesce,
    Intrinsic::If,
    Intrinsic::While,
    Intrinsic::For,
    Intrinsic::Continue,
    Intrinsic::Break,
    Intrinsic::Return,
    Intrinsic::VecCompose,
    Intrinsic::VecX,
    Intrinsic::VecY,
    Intrinsic::VecZ,
    Intrinsic::Distance,
    Intrinsic::Angle,
    Intrinsic::Magnitude,
    Intrinsic::Normalize,
    Intrinsic::QuatFromEuler,
    Intrinsic::QuatFromAngleAxis,
    Intrinsic::Random,
    Intrinsic::RandomSphere,
    Intrinsic::RandomCircleXZ,
    Intrinsic::RandomBetween,
    Intrinsic::RoundDown,
    Intrinsic::RoundNearest,
    Intrinsic::RoundUp,
    Intrinsic::Clamp,
    Intrinsic::Lerp,
    Intrinsic::Min,
    Intrinsic::Max,
    Intrinsic::Perlin3Noise,
    Intrinsic::Assert,
    Intrinsic::Has,
    Intrinsic::TypeOf,
    Intrinsic::HashOf,
    Intrinsic::ColorRgb,
    Intrinsic::ColorHsv,
];
