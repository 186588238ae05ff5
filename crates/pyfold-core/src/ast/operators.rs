use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    LeftShift,
    RightShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::FloorDivide => "//",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    Positive,
    Invert,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Not => "not ",
            UnaryOp::Negate => "-",
            UnaryOp::Positive => "+",
            UnaryOp::Invert => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtE => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtE => ">=",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }
}

/// Kind of comprehension a contraction body belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractionKind {
    List,
    Set,
    Dict,
    Generator,
}

/// Builtins the optimizer knows how to reason about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Builtin {
    Len,
    Int,
    Float,
    Str,
    Bool,
    Tuple,
    List,
    Dict,
    Set,
    Abs,
    Chr,
    Ord,
    Min,
    Max,
    Locals,
    Globals,
    Eval,
    Exec,
    ValueError,
    TypeError,
    KeyError,
    IndexError,
    NameError,
    AttributeError,
    ZeroDivisionError,
    RuntimeError,
    Exception,
}

const ALL_BUILTINS: &[Builtin] = &[
    Builtin::Len,
    Builtin::Int,
    Builtin::Float,
    Builtin::Str,
    Builtin::Bool,
    Builtin::Tuple,
    Builtin::List,
    Builtin::Dict,
    Builtin::Set,
    Builtin::Abs,
    Builtin::Chr,
    Builtin::Ord,
    Builtin::Min,
    Builtin::Max,
    Builtin::Locals,
    Builtin::Globals,
    Builtin::Eval,
    Builtin::Exec,
    Builtin::ValueError,
    Builtin::TypeError,
    Builtin::KeyError,
    Builtin::IndexError,
    Builtin::NameError,
    Builtin::AttributeError,
    Builtin::ZeroDivisionError,
    Builtin::RuntimeError,
    Builtin::Exception,
];

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::Tuple => "tuple",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::Abs => "abs",
            Builtin::Chr => "chr",
            Builtin::Ord => "ord",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Locals => "locals",
            Builtin::Globals => "globals",
            Builtin::Eval => "eval",
            Builtin::Exec => "exec",
            Builtin::ValueError => "ValueError",
            Builtin::TypeError => "TypeError",
            Builtin::KeyError => "KeyError",
            Builtin::IndexError => "IndexError",
            Builtin::NameError => "NameError",
            Builtin::AttributeError => "AttributeError",
            Builtin::ZeroDivisionError => "ZeroDivisionError",
            Builtin::RuntimeError => "RuntimeError",
            Builtin::Exception => "Exception",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        ALL_BUILTINS.iter().copied().find(|b| b.name() == name)
    }

    pub fn all() -> &'static [Builtin] {
        ALL_BUILTINS
    }

    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Builtin::ValueError
                | Builtin::TypeError
                | Builtin::KeyError
                | Builtin::IndexError
                | Builtin::NameError
                | Builtin::AttributeError
                | Builtin::ZeroDivisionError
                | Builtin::RuntimeError
                | Builtin::Exception
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_round_trip() {
        for builtin in Builtin::all() {
            assert_eq!(Builtin::from_name(builtin.name()), Some(*builtin));
        }
        assert_eq!(Builtin::from_name("print_"), None);
    }

    #[test]
    fn test_exception_builtins() {
        assert!(Builtin::ValueError.is_exception());
        assert!(!Builtin::Len.is_exception());
    }
}
