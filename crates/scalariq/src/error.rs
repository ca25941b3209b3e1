use miette::Diagnostic;

use crate::{
    eval::{ErrorKind, EvalError},
    ir::{IrError, NodeId},
    limits::ConfigError,
    linearizer::LinearizeError,
    ops::OpError,
};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum InnerError {
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Linearize(#[from] LinearizeError),
}

/// The error returned by [`crate::Engine`].
#[derive(PartialEq, Debug, Clone, thiserror::Error)]
#[error("{cause}")]
pub struct Error {
    /// The underlying cause of the error.
    pub cause: InnerError,
    /// The IR node that failed, when the failure is tied to one.
    pub node: Option<NodeId>,
    /// The failing expression rendered as an s-expression.
    pub expression: Option<String>,
}

impl Error {
    pub fn new(cause: impl Into<InnerError>) -> Self {
        let cause = cause.into();
        let node = match &cause {
            InnerError::Eval(e) => e.node(),
            _ => None,
        };

        Self {
            cause,
            node,
            expression: None,
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// The evaluation error category, if this is an evaluation error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match &self.cause {
            InnerError::Eval(e) => Some(e.kind()),
            _ => None,
        }
    }
}

macro_rules! impl_from_cause {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(cause: $ty) -> Self {
                    Error::new(cause)
                }
            }
        )*
    };
}

impl_from_cause!(InnerError, OpError, IrError, EvalError, ConfigError, LinearizeError);

impl Diagnostic for Error {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let (category, variant): (&str, &'static str) = match &self.cause {
            InnerError::Op(e) => ("OpError", e.into()),
            InnerError::Ir(e) => ("IrError", e.into()),
            InnerError::Eval(e) => ("EvalError", e.into()),
            InnerError::Config(e) => ("ConfigError", e.into()),
            InnerError::Linearize(e) => ("LinearizeError", e.into()),
        };

        Some(Box::new(format!("{}::{}", category, variant)))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match &self.cause {
            InnerError::Eval(EvalError::LimitExceeded { counter, .. }) => Some(Box::new(format!(
                "Raise or disable the \"{}\" limit, or simplify the expression",
                counter
            ))),
            InnerError::Eval(EvalError::Recursion { .. }) => {
                Some(Box::new("Lambdas cannot call themselves, directly or indirectly"))
            }
            InnerError::Eval(EvalError::MisplacedLambda(_)) => {
                Some(Box::new("Declare lambdas as binding values of a scope"))
            }
            _ => None,
        }
    }
}
