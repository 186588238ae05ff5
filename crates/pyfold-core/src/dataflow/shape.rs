use crate::ast::Constant;
use std::fmt;

/// Set of runtime types a value may have
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShapeSet(u16);

impl ShapeSet {
    pub const NONE_TYPE: ShapeSet = ShapeSet(1 << 0);
    pub const BOOL: ShapeSet = ShapeSet(1 << 1);
    pub const INT: ShapeSet = ShapeSet(1 << 2);
    pub const FLOAT: ShapeSet = ShapeSet(1 << 3);
    pub const STR: ShapeSet = ShapeSet(1 << 4);
    pub const TUPLE: ShapeSet = ShapeSet(1 << 5);
    pub const LIST: ShapeSet = ShapeSet(1 << 6);
    pub const DICT: ShapeSet = ShapeSet(1 << 7);
    pub const SET: ShapeSet = ShapeSet(1 << 8);
    pub const FUNCTION: ShapeSet = ShapeSet(1 << 9);
    pub const CLASS: ShapeSet = ShapeSet(1 << 10);
    pub const MODULE: ShapeSet = ShapeSet(1 << 11);
    pub const EXCEPTION: ShapeSet = ShapeSet(1 << 12);
    /// Anything, user-defined types included
    pub const UNKNOWN: ShapeSet = ShapeSet(u16::MAX);

    /// Builtin immutable scalars whose operations never run user code
    pub const SCALARS: ShapeSet = ShapeSet(
        Self::NONE_TYPE.0 | Self::BOOL.0 | Self::INT.0 | Self::FLOAT.0 | Self::STR.0,
    );

    pub const fn empty() -> Self {
        ShapeSet(0)
    }

    pub fn of_constant(value: &Constant) -> Self {
        match value {
            Constant::None => Self::NONE_TYPE,
            Constant::Bool(_) => Self::BOOL,
            Constant::Int(_) => Self::INT,
            Constant::Float(_) => Self::FLOAT,
            Constant::Str(_) => Self::STR,
            Constant::Tuple(_) => Self::TUPLE,
            Constant::Ellipsis => Self::UNKNOWN,
        }
    }

    pub fn union(self, other: ShapeSet) -> ShapeSet {
        ShapeSet(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }

    /// Every shape of `self` is in `other`
    pub fn is_subset_of(self, other: ShapeSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn contains(self, shape: ShapeSet) -> bool {
        shape.is_subset_of(self)
    }

    /// Non-empty and made only of builtin scalars
    pub fn is_scalar(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::SCALARS)
    }
}

impl fmt::Debug for ShapeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return f.write_str("ShapeSet(unknown)");
        }
        const NAMES: [&str; 13] = [
            "NoneType", "bool", "int", "float", "str", "tuple", "list", "dict", "set", "function",
            "class", "module", "exception",
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ShapeSet({})", names.join("|"))
    }
}

/// What is known about an assigned value
#[derive(Debug, Clone, PartialEq)]
pub struct ValueFact {
    pub shapes: ShapeSet,
    /// Set only for immutable compile-time constants
    pub constant: Option<Constant>,
}

impl ValueFact {
    pub fn unknown() -> Self {
        Self {
            shapes: ShapeSet::UNKNOWN,
            constant: None,
        }
    }

    pub fn of_shape(shapes: ShapeSet) -> Self {
        Self {
            shapes,
            constant: None,
        }
    }

    pub fn of_constant(value: Constant) -> Self {
        Self {
            shapes: ShapeSet::of_constant(&value),
            constant: Some(value),
        }
    }
}
