use std::time::Duration;

use smol_str::SmolStr;
use thiserror::Error;

use crate::{
    calls::CallError,
    ir::NodeId,
    limits::Counter,
    ops::{Arity, OpCode},
};

use super::scope::Namespace;

type Name = SmolStr;
type TypeName = &'static str;

/// Error categories, used to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed IR.
    Structural,
    /// Invalid expression at a well-formed node.
    Semantic,
    /// A counter or deadline was exceeded.
    Resource,
    Call,
    Uninitialized,
}

#[derive(Error, Debug, Clone, PartialEq, strum::IntoStaticStr)]
pub enum EvalError {
    #[error("Invalid number of operands for \"{op}\" at {node}, expected {expected}, got {got}")]
    InvalidArity {
        node: NodeId,
        op: OpCode,
        expected: Arity,
        got: usize,
    },
    #[error("Invalid name in \"{op}\" at {node} (string required)")]
    InvalidName { node: NodeId, op: OpCode },
    #[error("Duplicate {namespace} name \"{name}\" in scope at {node}")]
    DuplicateName {
        node: NodeId,
        name: Name,
        namespace: Namespace,
    },
    #[error("Lambda at {0} can only be declared as a scope binding value")]
    MisplacedLambda(NodeId),
    #[error(r#"Invalid operand for "{op}" at {node}, got {found}"#)]
    InvalidOperand {
        node: NodeId,
        op: OpCode,
        found: TypeName,
    },
    #[error("Divided by 0 at {0}")]
    ZeroDivision(NodeId),
    #[error("Expression overflow at {0}")]
    Overflow(NodeId),
    #[error("Expression evaluation limit exceeded ({counter}: {value} > {limit})")]
    LimitExceeded {
        counter: Counter,
        value: u64,
        limit: u64,
    },
    #[error("Expression evaluation timed out ({0:?})")]
    Timeout(Duration),
    #[error("Call \"{name}\" at {node} timed out ({budget:?})")]
    CallTimeout {
        node: NodeId,
        name: Name,
        budget: Duration,
    },
    #[error("Undefined expression call \"{name}\" at {node}")]
    UndefinedCall { node: NodeId, name: Name },
    #[error("Call \"{name}\" at {node} is not allowed")]
    CallNotAllowed { node: NodeId, name: Name },
    #[error("Call \"{name}\" at {node} failed: {source}")]
    CallFailed {
        node: NodeId,
        name: Name,
        source: CallError,
    },
    #[error("Invalid return value from call \"{name}\" at {node}")]
    InvalidCallReturn { node: NodeId, name: Name },
    #[error("Invalid number of arguments for lambda \"{name}\" at {node}, expected {expected}, got {got}")]
    LambdaArity {
        node: NodeId,
        name: Name,
        expected: usize,
        got: usize,
    },
    #[error("Recursive call to lambda \"{name}\" at {node}")]
    Recursion { node: NodeId, name: Name },
    #[error("Uninitialized variable \"{name}\" at {node}")]
    UninitializedVariable { node: NodeId, name: Name },
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::InvalidArity { .. }
            | EvalError::InvalidName { .. }
            | EvalError::DuplicateName { .. }
            | EvalError::MisplacedLambda(_) => ErrorKind::Structural,
            EvalError::InvalidOperand { .. } | EvalError::ZeroDivision(_) | EvalError::Overflow(_) => {
                ErrorKind::Semantic
            }
            EvalError::LimitExceeded { .. } | EvalError::Timeout(_) | EvalError::CallTimeout { .. } => {
                ErrorKind::Resource
            }
            EvalError::UndefinedCall { .. }
            | EvalError::CallNotAllowed { .. }
            | EvalError::CallFailed { .. }
            | EvalError::InvalidCallReturn { .. }
            | EvalError::LambdaArity { .. }
            | EvalError::Recursion { .. } => ErrorKind::Call,
            EvalError::UninitializedVariable { .. } => ErrorKind::Uninitialized,
        }
    }

    #[cold]
    pub fn node(&self) -> Option<NodeId> {
        match self {
            EvalError::InvalidArity { node, .. } => Some(*node),
            EvalError::InvalidName { node, .. } => Some(*node),
            EvalError::DuplicateName { node, .. } => Some(*node),
            EvalError::MisplacedLambda(node) => Some(*node),
            EvalError::InvalidOperand { node, .. } => Some(*node),
            EvalError::ZeroDivision(node) => Some(*node),
            EvalError::Overflow(node) => Some(*node),
            EvalError::LimitExceeded { .. } => None,
            EvalError::Timeout(_) => None,
            EvalError::CallTimeout { node, .. } => Some(*node),
            EvalError::UndefinedCall { node, .. } => Some(*node),
            EvalError::CallNotAllowed { node, .. } => Some(*node),
            EvalError::CallFailed { node, .. } => Some(*node),
            EvalError::InvalidCallReturn { node, .. } => Some(*node),
            EvalError::LambdaArity { node, .. } => Some(*node),
            EvalError::Recursion { node, .. } => Some(*node),
            EvalError::UninitializedVariable { node, .. } => Some(*node),
        }
    }
}
