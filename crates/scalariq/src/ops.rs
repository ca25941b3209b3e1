//! Operator codes and the process-wide op registry.
//!
//! The registry maps every operator name to the small integer used by the
//! array wire form. Numbers are stable: they are the enum discriminants below
//! and must never be reordered.

use std::{fmt, str::FromStr, sync::LazyLock};

use bimap::BiMap;
use strum::IntoEnumIterator;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, strum::IntoStaticStr)]
pub enum OpError {
    #[error("Unknown op number #{0}")]
    UnknownOpId(u64),
    #[error("Unknown op name \"{0}\"")]
    UnknownOpName(String),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum OpCode {
    Expression = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Mod = 5,
    Not = 6,
    Or = 7,
    And = 8,
    Eq = 9,
    Ne = 10,
    Lt = 11,
    Le = 12,
    Ge = 13,
    Gt = 14,
    Condition = 15,
    Call = 16,
    Lookup = 17,
    Scope = 18,
    Coalesce = 19,
    IsNull = 20,
    TypeOf = 21,
    Lambda = 22,
}

/// Operand count accepted by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// An odd count of at least one: `(a, b)` pairs plus a trailing operand.
    Odd,
    Any,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Odd => count % 2 == 1,
            Arity::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Odd => write!(f, "an odd number of"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

static REGISTRY: LazyLock<BiMap<&'static str, u64>> = LazyLock::new(|| {
    OpCode::iter()
        .map(|op| (op.name(), op.id()))
        .collect::<BiMap<_, _>>()
});

/// Returns the wire number of the operator called `name`.
pub fn op_number(name: &str) -> Result<u64, OpError> {
    REGISTRY
        .get_by_left(name)
        .copied()
        .ok_or_else(|| OpError::UnknownOpName(name.to_string()))
}

/// Returns the operator name registered for wire number `number`.
pub fn op_name(number: u64) -> Result<&'static str, OpError> {
    REGISTRY
        .get_by_right(&number)
        .copied()
        .ok_or(OpError::UnknownOpId(number))
}

impl OpCode {
    #[inline(always)]
    pub fn name(self) -> &'static str {
        self.into()
    }

    #[inline(always)]
    pub fn id(self) -> u64 {
        self as u8 as u64
    }

    pub fn from_name(name: &str) -> Result<Self, OpError> {
        OpCode::from_str(name).map_err(|_| OpError::UnknownOpName(name.to_string()))
    }

    pub fn from_id(id: u64) -> Result<Self, OpError> {
        op_name(id).and_then(Self::from_name)
    }

    pub fn arity(self) -> Arity {
        match self {
            OpCode::Expression
            | OpCode::Not
            | OpCode::Lookup
            | OpCode::IsNull
            | OpCode::TypeOf => Arity::Exact(1),
            OpCode::Div
            | OpCode::Mod
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Ge
            | OpCode::Gt => Arity::Exact(2),
            OpCode::Add | OpCode::Mul | OpCode::Or | OpCode::And => Arity::AtLeast(1),
            OpCode::Call | OpCode::Lambda => Arity::AtLeast(1),
            OpCode::Sub => Arity::AtLeast(2),
            OpCode::Condition | OpCode::Scope => Arity::Odd,
            OpCode::Coalesce => Arity::Any,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
