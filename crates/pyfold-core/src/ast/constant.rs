use super::operators::{BinaryOp, CompareOp, UnaryOp};
use std::cmp::Ordering;
use std::fmt;

/// Longest string or tuple a repetition may produce at compile time
const MAX_FOLDED_SEQUENCE: usize = 256;

/// Immutable compile-time value
///
/// Only immutable values are constants; list, dict and set displays stay
/// expressions because every evaluation creates a fresh object.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Constant>),
    Ellipsis,
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Constant::Bool(value)
    }
}

impl From<i32> for Constant {
    fn from(value: i32) -> Self {
        Constant::Int(value as i64)
    }
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Constant::Int(value)
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Constant::Float(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::Str(value.to_string())
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Constant::Str(value)
    }
}

impl Constant {
    /// Python truth value
    pub fn is_truthy(&self) -> bool {
        match self {
            Constant::None => false,
            Constant::Bool(b) => *b,
            Constant::Int(i) => *i != 0,
            Constant::Float(f) => *f != 0.0,
            Constant::Str(s) => !s.is_empty(),
            Constant::Tuple(items) => !items.is_empty(),
            Constant::Ellipsis => true,
        }
    }

    /// Python type name, used in messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Constant::None => "NoneType",
            Constant::Bool(_) => "bool",
            Constant::Int(_) => "int",
            Constant::Float(_) => "float",
            Constant::Str(_) => "str",
            Constant::Tuple(_) => "tuple",
            Constant::Ellipsis => "ellipsis",
        }
    }

    /// Elements when the constant can be iterated and unpacked
    pub fn iteration_elements(&self) -> Option<Vec<Constant>> {
        match self {
            Constant::Tuple(items) => Some(items.clone()),
            Constant::Str(s) => Some(s.chars().map(|c| Constant::Str(c.to_string())).collect()),
            _ => None,
        }
    }

    /// Length for `len()`
    pub fn length(&self) -> Option<usize> {
        match self {
            Constant::Tuple(items) => Some(items.len()),
            Constant::Str(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(i) => Some(*i),
            Constant::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Constant::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, Constant::Int(_) | Constant::Bool(_) | Constant::Float(_))
    }

    /// Fold a unary operation; `None` when evaluating it would raise
    pub fn unary(op: UnaryOp, operand: &Constant) -> Option<Constant> {
        match op {
            UnaryOp::Not => Some(Constant::Bool(!operand.is_truthy())),
            UnaryOp::Negate => match operand {
                Constant::Float(f) => Some(Constant::Float(-f)),
                other => other.as_int()?.checked_neg().map(Constant::Int),
            },
            UnaryOp::Positive => match operand {
                Constant::Float(f) => Some(Constant::Float(*f)),
                other => other.as_int().map(Constant::Int),
            },
            UnaryOp::Invert => operand.as_int().map(|i| Constant::Int(!i)),
        }
    }

    /// Fold a binary operation; `None` when it would raise, overflow, or
    /// depend on the language level
    pub fn binary(op: BinaryOp, left: &Constant, right: &Constant) -> Option<Constant> {
        if let (Some(l), Some(r)) = (left.as_int(), right.as_int()) {
            return fold_int(op, l, r);
        }
        if left.is_number() && right.is_number() {
            return fold_float(op, left.as_float()?, right.as_float()?);
        }

        match (op, left, right) {
            (BinaryOp::Add, Constant::Str(l), Constant::Str(r)) => {
                Some(Constant::Str(format!("{l}{r}")))
            }
            (BinaryOp::Add, Constant::Tuple(l), Constant::Tuple(r)) => {
                let mut items = l.clone();
                items.extend(r.iter().cloned());
                Some(Constant::Tuple(items))
            }
            (BinaryOp::Multiply, Constant::Str(s), count)
            | (BinaryOp::Multiply, count, Constant::Str(s)) => {
                let count = repeat_count(count.as_int()?, s.chars().count())?;
                Some(Constant::Str(s.repeat(count)))
            }
            (BinaryOp::Multiply, Constant::Tuple(items), count)
            | (BinaryOp::Multiply, count, Constant::Tuple(items)) => {
                let count = repeat_count(count.as_int()?, items.len())?;
                let mut repeated = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    repeated.extend(items.iter().cloned());
                }
                Some(Constant::Tuple(repeated))
            }
            _ => None,
        }
    }

    /// Fold a comparison; `None` when the operands are not comparable
    pub fn compare(op: CompareOp, left: &Constant, right: &Constant) -> Option<Constant> {
        let result = match op {
            CompareOp::Eq => python_eq(left, right)?,
            CompareOp::NotEq => !python_eq(left, right)?,
            CompareOp::Lt => python_cmp(left, right)? == Ordering::Less,
            CompareOp::LtE => python_cmp(left, right)? != Ordering::Greater,
            CompareOp::Gt => python_cmp(left, right)? == Ordering::Greater,
            CompareOp::GtE => python_cmp(left, right)? != Ordering::Less,
            CompareOp::Is | CompareOp::IsNot => {
                let same = match (left, right) {
                    (Constant::None, Constant::None) => true,
                    (Constant::Ellipsis, Constant::Ellipsis) => true,
                    (Constant::Bool(l), Constant::Bool(r)) => l == r,
                    (Constant::None | Constant::Bool(_) | Constant::Ellipsis, _)
                    | (_, Constant::None | Constant::Bool(_) | Constant::Ellipsis) => false,
                    _ => return None,
                };
                if op == CompareOp::Is {
                    same
                } else {
                    !same
                }
            }
            CompareOp::In | CompareOp::NotIn => {
                let contained = match right {
                    Constant::Tuple(items) => {
                        let mut found = false;
                        for item in items {
                            if python_eq(left, item)? {
                                found = true;
                                break;
                            }
                        }
                        found
                    }
                    Constant::Str(haystack) => match left {
                        Constant::Str(needle) => haystack.contains(needle.as_str()),
                        _ => return None,
                    },
                    _ => return None,
                };
                if op == CompareOp::In {
                    contained
                } else {
                    !contained
                }
            }
        };
        Some(Constant::Bool(result))
    }

    /// Result of `str()` where it is identical across language levels
    pub fn to_python_str(&self) -> Option<String> {
        match self {
            Constant::None => Some("None".to_string()),
            Constant::Bool(true) => Some("True".to_string()),
            Constant::Bool(false) => Some("False".to_string()),
            Constant::Int(i) => Some(i.to_string()),
            Constant::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Python `repr()` style rendering
    pub fn repr(&self) -> String {
        self.to_string()
    }
}

fn repeat_count(count: i64, unit: usize) -> Option<usize> {
    let count = count.max(0) as usize;
    if count.saturating_mul(unit) > MAX_FOLDED_SEQUENCE {
        return None;
    }
    Some(count)
}

fn fold_int(op: BinaryOp, l: i64, r: i64) -> Option<Constant> {
    let value = match op {
        BinaryOp::Add => l.checked_add(r)?,
        BinaryOp::Subtract => l.checked_sub(r)?,
        BinaryOp::Multiply => l.checked_mul(r)?,
        BinaryOp::FloorDivide => {
            if r == 0 {
                return None;
            }
            let q = l.checked_div(r)?;
            if l % r != 0 && ((l < 0) != (r < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinaryOp::Modulo => {
            if r == 0 {
                return None;
            }
            let m = l.checked_rem(r)?;
            if m != 0 && ((m < 0) != (r < 0)) {
                m + r
            } else {
                m
            }
        }
        BinaryOp::Power => {
            if r < 0 {
                return None;
            }
            let exponent = u32::try_from(r).ok()?;
            l.checked_pow(exponent)?
        }
        BinaryOp::LeftShift => {
            if !(0..63).contains(&r) {
                return None;
            }
            let shifted = l.checked_shl(r as u32)?;
            if shifted >> r != l {
                return None;
            }
            shifted
        }
        BinaryOp::RightShift => {
            if r < 0 {
                return None;
            }
            l >> r.min(63)
        }
        BinaryOp::BitAnd => l & r,
        BinaryOp::BitOr => l | r,
        BinaryOp::BitXor => l ^ r,
        // Classic division differs between language levels
        BinaryOp::Divide => return None,
    };
    Some(Constant::Int(value))
}

fn fold_float(op: BinaryOp, l: f64, r: f64) -> Option<Constant> {
    let value = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Subtract => l - r,
        BinaryOp::Multiply => l * r,
        BinaryOp::Divide => {
            if r == 0.0 {
                return None;
            }
            l / r
        }
        _ => return None,
    };
    if value.is_finite() {
        Some(Constant::Float(value))
    } else {
        None
    }
}

/// Python `==`, `None` when the answer would need user code
fn python_eq(left: &Constant, right: &Constant) -> Option<bool> {
    if left.is_number() && right.is_number() {
        if let (Some(l), Some(r)) = (left.as_int(), right.as_int()) {
            return Some(l == r);
        }
        return Some(left.as_float()? == right.as_float()?);
    }
    match (left, right) {
        (Constant::Str(l), Constant::Str(r)) => Some(l == r),
        (Constant::None, Constant::None) => Some(true),
        (Constant::Ellipsis, Constant::Ellipsis) => Some(true),
        (Constant::Tuple(l), Constant::Tuple(r)) => {
            if l.len() != r.len() {
                return Some(false);
            }
            for (a, b) in l.iter().zip(r) {
                if !python_eq(a, b)? {
                    return Some(false);
                }
            }
            Some(true)
        }
        _ => Some(false),
    }
}

fn python_cmp(left: &Constant, right: &Constant) -> Option<Ordering> {
    if left.is_number() && right.is_number() {
        if let (Some(l), Some(r)) = (left.as_int(), right.as_int()) {
            return Some(l.cmp(&r));
        }
        return left.as_float()?.partial_cmp(&right.as_float()?);
    }
    match (left, right) {
        (Constant::Str(l), Constant::Str(r)) => Some(l.cmp(r)),
        (Constant::Tuple(l), Constant::Tuple(r)) => {
            for (a, b) in l.iter().zip(r) {
                if !python_eq(a, b)? {
                    return python_cmp(a, b);
                }
            }
            Some(l.len().cmp(&r.len()))
        }
        _ => None,
    }
}

fn write_str_repr(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\'' => f.write_str("\\'")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("'")
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => f.write_str("None"),
            Constant::Bool(true) => f.write_str("True"),
            Constant::Bool(false) => f.write_str("False"),
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Constant::Str(s) => write_str_repr(f, s),
            Constant::Tuple(items) => {
                f.write_str("(")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Constant::Ellipsis => f.write_str("Ellipsis"),
        }
    }
}
