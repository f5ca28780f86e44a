use alloc::vec::Vec;

use crate::eval::Now;
use crate::stateful::NodeState;
use crate::value::{Value, finite, from_bool, is_true, round_to};

/// All built-in [`Func`]s.
pub const ALL_FUNCS: &[Func] = &[
    Func::Add,
    Func::Sub,
    Func::Mul,
    Func::Div,
    Func::Mod,
    Func::Pow,
    Func::And,
    Func::Or,
    Func::Not,
    Func::Xor,
    Func::BitAnd,
    Func::BitOr,
    Func::BitXor,
    Func::BitNot,
    Func::Shl,
    Func::Shr,
    Func::If,
    Func::Eq,
    Func::Gt,
    Func::Gte,
    Func::Lt,
    Func::Lte,
    Func::Min,
    Func::Max,
    Func::Avg,
    Func::Abs,
    Func::Sgn,
    Func::Floor,
    Func::Ceil,
    Func::Round,
    Func::Time,
    Func::TimeMs,
    Func::Held,
    Func::Delay,
    Func::Sample,
    Func::Freeze,
    Func::Deriv,
    Func::Integ,
    Func::FmAvg,
    Func::FmMedian,
    Func::Available,
    Func::Default,
    Func::Rising,
    Func::Falling,
    Func::Acc,
    Func::AccInc,
    Func::Hyst,
    Func::Sequence,
    Func::Lut,
    Func::LutLi,
];

/// The number of arguments a [`Func`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this number of arguments.
    Exact(usize),
    /// At least this number of arguments.
    AtLeast(usize),
    /// Between these numbers of arguments, both included.
    Between(usize, usize),
}

impl Arity {
    /// Checks whether a number of arguments satisfies the arity.
    #[must_use]
    pub const fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exact(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::Between(min, max) => count >= min && count <= max,
        }
    }
}

impl core::fmt::Display for Arity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "exactly {n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
            Self::Between(min, max) => write!(f, "{min} to {max}"),
        }
    }
}

/// A built-in function.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Func {
    /// Sum of all arguments.
    Add,
    /// Difference of two arguments.
    Sub,
    /// Product of all arguments.
    Mul,
    /// Quotient of two arguments, `Undefined` when dividing by zero.
    Div,
    /// Remainder of two arguments, `Undefined` when dividing by zero.
    Mod,
    /// First argument raised to the second.
    Pow,
    /// Logical conjunction of all arguments.
    And,
    /// Logical disjunction of all arguments.
    Or,
    /// Logical negation.
    Not,
    /// Logical exclusive disjunction.
    Xor,
    /// Bitwise conjunction of the integer parts.
    BitAnd,
    /// Bitwise disjunction of the integer parts.
    BitOr,
    /// Bitwise exclusive disjunction of the integer parts.
    BitXor,
    /// Bitwise negation of the integer part.
    BitNot,
    /// Left shift of the integer part.
    Shl,
    /// Right shift of the integer part.
    Shr,
    /// Returns the second argument when the first is true, the third
    /// otherwise.
    If,
    /// Equality.
    Eq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Smallest argument.
    Min,
    /// Largest argument.
    Max,
    /// Arithmetic mean of all arguments.
    Avg,
    /// Absolute value.
    Abs,
    /// Sign, as `-1`, `0` or `1`.
    Sgn,
    /// Largest integer less than or equal to the argument.
    Floor,
    /// Smallest integer greater than or equal to the argument.
    Ceil,
    /// Rounds to an optional number of decimals.
    Round,
    /// Wall-clock time in seconds.
    Time,
    /// Wall-clock time in milliseconds.
    TimeMs,
    /// True once a value has been equal to a target for a duration.
    Held,
    /// Delays value changes by a number of milliseconds.
    Delay,
    /// Latches a value at most once per period.
    Sample,
    /// Holds a changed value for a duration.
    Freeze,
    /// Discrete derivative.
    Deriv,
    /// Discrete integral.
    Integ,
    /// Moving average over a sampled window.
    FmAvg,
    /// Moving median over a sampled window.
    FmMedian,
    /// Whether the argument is defined.
    Available,
    /// The argument, or a fallback when it is `Undefined`.
    Default,
    /// True on a rising edge.
    Rising,
    /// True on a falling edge.
    Falling,
    /// Running accumulator of value deltas.
    Acc,
    /// Running accumulator of positive value deltas.
    AccInc,
    /// Two-threshold hysteresis latch.
    Hyst,
    /// Cycles through values, each held for a duration.
    Sequence,
    /// Lookup table returning the nearest point.
    Lut,
    /// Lookup table with linear interpolation.
    LutLi,
}

impl core::fmt::Debug for Func {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.name().fmt(f)
    }
}

impl core::fmt::Display for Func {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.name().fmt(f)
    }
}

impl Func {
    /// Returns the [`Func`] name, as written in expressions.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Pow => "POW",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::Xor => "XOR",
            Self::BitAnd => "BITAND",
            Self::BitOr => "BITOR",
            Self::BitXor => "BITXOR",
            Self::BitNot => "BITNOT",
            Self::Shl => "SHL",
            Self::Shr => "SHR",
            Self::If => "IF",
            Self::Eq => "EQ",
            Self::Gt => "GT",
            Self::Gte => "GTE",
            Self::Lt => "LT",
            Self::Lte => "LTE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
            Self::Abs => "ABS",
            Self::Sgn => "SGN",
            Self::Floor => "FLOOR",
            Self::Ceil => "CEIL",
            Self::Round => "ROUND",
            Self::Time => "TIME",
            Self::TimeMs => "TIMEMS",
            Self::Held => "HELD",
            Self::Delay => "DELAY",
            Self::Sample => "SAMPLE",
            Self::Freeze => "FREEZE",
            Self::Deriv => "DERIV",
            Self::Integ => "INTEG",
            Self::FmAvg => "FMAVG",
            Self::FmMedian => "FMEDIAN",
            Self::Available => "AVAILABLE",
            Self::Default => "DEFAULT",
            Self::Rising => "RISING",
            Self::Falling => "FALLING",
            Self::Acc => "ACC",
            Self::AccInc => "ACCINC",
            Self::Hyst => "HYST",
            Self::Sequence => "SEQUENCE",
            Self::Lut => "LUT",
            Self::LutLi => "LUTLI",
        }
    }

    /// Returns the [`Arity`] of the function.
    #[must_use]
    pub const fn arity(self) -> Arity {
        match self {
            Self::Time | Self::TimeMs => Arity::Exact(0),
            Self::Not
            | Self::BitNot
            | Self::Abs
            | Self::Sgn
            | Self::Floor
            | Self::Ceil
            | Self::Available
            | Self::Rising
            | Self::Falling => Arity::Exact(1),
            Self::Round => Arity::Between(1, 2),
            Self::Sub
            | Self::Div
            | Self::Mod
            | Self::Pow
            | Self::Xor
            | Self::BitAnd
            | Self::BitOr
            | Self::BitXor
            | Self::Shl
            | Self::Shr
            | Self::Eq
            | Self::Gt
            | Self::Gte
            | Self::Lt
            | Self::Lte
            | Self::Delay
            | Self::Sample
            | Self::Freeze
            | Self::Deriv
            | Self::Default
            | Self::Acc
            | Self::AccInc => Arity::Exact(2),
            Self::Add
            | Self::Mul
            | Self::And
            | Self::Or
            | Self::Min
            | Self::Max
            | Self::Avg
            | Self::Sequence => Arity::AtLeast(2),
            Self::If | Self::Held | Self::Integ | Self::FmAvg | Self::FmMedian | Self::Hyst => {
                Arity::Exact(3)
            }
            Self::Lut | Self::LutLi => Arity::AtLeast(5),
        }
    }

    /// Whether the function is invoked even when some of its arguments
    /// are `Undefined`.
    #[must_use]
    pub const fn accepts_undefined(self) -> bool {
        matches!(self, Self::Available | Self::Default)
    }

    /// Whether the function result depends on the wall-clock second.
    #[must_use]
    pub const fn is_time_dependent(self) -> bool {
        matches!(self, Self::Time)
    }

    /// Whether the function result depends on the elapsed milliseconds.
    #[must_use]
    pub const fn is_time_ms_dependent(self) -> bool {
        matches!(
            self,
            Self::TimeMs
                | Self::Sample
                | Self::Freeze
                | Self::Held
                | Self::Delay
                | Self::Deriv
                | Self::Integ
                | Self::Sequence
                | Self::FmAvg
                | Self::FmMedian
        )
    }

    /// Whether the function rounds its first argument.
    #[must_use]
    pub const fn is_rounding(self) -> bool {
        matches!(self, Self::Floor | Self::Ceil | Self::Round)
    }

    /// Looks a function up by name, ignoring the case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_FUNCS
            .iter()
            .copied()
            .find(|func| func.name().eq_ignore_ascii_case(name))
    }

    // The typed state a call node of this function owns.
    pub(crate) fn initial_state(self) -> NodeState {
        match self {
            Self::Delay => NodeState::Delay(Default::default()),
            Self::Sample => NodeState::Sample(Default::default()),
            Self::Freeze => NodeState::Freeze(Default::default()),
            Self::Held => NodeState::Held(Default::default()),
            Self::Deriv | Self::Integ => NodeState::Timed(Default::default()),
            Self::FmAvg | Self::FmMedian => NodeState::Window(Default::default()),
            Self::Rising | Self::Falling | Self::Acc | Self::AccInc => {
                NodeState::Previous(Default::default())
            }
            Self::Hyst => NodeState::Hyst(Default::default()),
            Self::Sequence => NodeState::Sequence(Default::default()),
            _ => NodeState::None,
        }
    }

    // Runs a function tolerating `Undefined` arguments.
    pub(crate) fn call_tolerant(self, args: &[Value]) -> Value {
        match (self, args) {
            (Self::Available, [value]) => Some(from_bool(value.and_then(finite).is_some())),
            (Self::Default, [value, fallback]) => {
                value.and_then(finite).or_else(|| fallback.and_then(finite))
            }
            _ => None,
        }
    }

    // Runs a function on defined arguments.
    //
    // The argument count has already been checked by the parser.
    pub(crate) fn call(self, args: &[f64], state: &mut NodeState, now: Now) -> Value {
        let result = match (self, args) {
            (Self::Add, _) => Some(args.iter().sum()),
            (Self::Sub, [a, b]) => Some(a - b),
            (Self::Mul, _) => Some(args.iter().product()),
            (Self::Div, [a, b]) => (*b != 0.).then(|| a / b),
            (Self::Mod, [a, b]) => (*b != 0.).then(|| a % b),
            (Self::Pow, [a, b]) => Some(libm::pow(*a, *b)),
            (Self::And, _) => Some(from_bool(args.iter().all(|v| is_true(*v)))),
            (Self::Or, _) => Some(from_bool(args.iter().any(|v| is_true(*v)))),
            (Self::Not, [a]) => Some(from_bool(!is_true(*a))),
            (Self::Xor, [a, b]) => Some(from_bool(is_true(*a) != is_true(*b))),
            (Self::BitAnd, [a, b]) => Some((*a as i64 & *b as i64) as f64),
            (Self::BitOr, [a, b]) => Some((*a as i64 | *b as i64) as f64),
            (Self::BitXor, [a, b]) => Some((*a as i64 ^ *b as i64) as f64),
            (Self::BitNot, [a]) => Some(!(*a as i64) as f64),
            (Self::Shl, [a, b]) => shift(*a, *b, i64::checked_shl),
            (Self::Shr, [a, b]) => shift(*a, *b, i64::checked_shr),
            (Self::If, [condition, a, b]) => Some(if is_true(*condition) { *a } else { *b }),
            (Self::Eq, [a, b]) => Some(from_bool(a == b)),
            (Self::Gt, [a, b]) => Some(from_bool(a > b)),
            (Self::Gte, [a, b]) => Some(from_bool(a >= b)),
            (Self::Lt, [a, b]) => Some(from_bool(a < b)),
            (Self::Lte, [a, b]) => Some(from_bool(a <= b)),
            (Self::Min, _) => args.iter().copied().reduce(f64::min),
            (Self::Max, _) => args.iter().copied().reduce(f64::max),
            (Self::Avg, _) => Some(args.iter().sum::<f64>() / args.len() as f64),
            (Self::Abs, [a]) => Some(libm::fabs(*a)),
            (Self::Sgn, [a]) => Some(if *a > 0. {
                1.
            } else if *a < 0. {
                -1.
            } else {
                0.
            }),
            (Self::Floor, [a]) => Some(libm::floor(*a)),
            (Self::Ceil, [a]) => Some(libm::ceil(*a)),
            (Self::Round, [a]) => Some(libm::round(*a)),
            (Self::Round, [a, decimals]) => Some(round_to(*a, *decimals as i32)),
            (Self::Time, []) => now.unix_ms.map(|ms| (ms / 1000) as f64),
            (Self::TimeMs, []) => now.unix_ms.map(|ms| ms as f64),
            (Self::Lut, [x, table @ ..]) => lookup(*x, table, false),
            (Self::LutLi, [x, table @ ..]) => lookup(*x, table, true),
            _ => state.call(self, args, now.uptime_ms),
        };

        result.and_then(finite)
    }
}

fn shift(value: f64, amount: f64, op: fn(i64, u32) -> Option<i64>) -> Value {
    if amount < 0. {
        return None;
    }
    op(value as i64, amount as u32).map(|v| v as f64)
}

// Looks `x` up in a table of `(x, y)` pairs, sorted by `x` on every call.
//
// An `x` below the first point yields the `y` of the second point. Nearest
// point ties go to the point with the larger `x`.
fn lookup(x: f64, table: &[f64], interpolate: bool) -> Value {
    if table.len() % 2 != 0 {
        return None;
    }

    let mut points: Vec<(f64, f64)> = table.chunks_exact(2).map(|p| (p[0], p[1])).collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (first_x, _) = *points.first()?;
    if x < first_x {
        return points.get(1).map(|p| p.1);
    }

    let (last_x, last_y) = *points.last()?;
    if x >= last_x {
        return Some(last_y);
    }

    let (x1, y1, x2, y2) = points
        .windows(2)
        .find(|w| x >= w[0].0 && x < w[1].0)
        .map(|w| (w[0].0, w[0].1, w[1].0, w[1].1))?;

    if interpolate {
        Some(y1 + (x - x1) * (y2 - y1) / (x2 - x1))
    } else if x - x1 < x2 - x {
        Some(y1)
    } else {
        Some(y2)
    }
}
