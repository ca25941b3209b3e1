//! The tree-walking interpreter.
//!
//! Every evaluation owns its scope stack, counters and deadline; the IR and
//! the default call table are only borrowed, so one [`Evaluator`] can serve
//! many concurrent evaluations.

pub(crate) mod context;
pub mod error;
pub mod scope;

use serde::Serialize;

pub use error::{ErrorKind, EvalError};

use crate::{
    calls::{CallTable, MergedCalls},
    ir::{Ir, NodeId},
    limits::{EvaluationLimits, EvaluationStats},
    scalar::Scalar,
};
use context::Context;

/// A result together with the counters it consumed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    #[serde(serialize_with = "serialize_scalar")]
    pub result: Scalar,
    pub stats: EvaluationStats,
}

fn serialize_scalar<S: serde::Serializer>(value: &Scalar, serializer: S) -> Result<S::Ok, S::Error> {
    value.to_json().serialize(serializer)
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    limits: EvaluationLimits,
    calls: CallTable,
}

impl Evaluator {
    pub fn new(limits: EvaluationLimits, calls: CallTable) -> Self {
        Self { limits, calls }
    }

    pub fn limits(&self) -> &EvaluationLimits {
        &self.limits
    }

    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    /// Evaluates `ir` to a scalar.
    ///
    /// Host calls are raced against their time budget when a Tokio runtime is
    /// running. On any other executor a call runs to completion and fails
    /// afterwards if it went over budget.
    pub async fn evaluate(&self, ir: &Ir) -> Result<Scalar, EvalError> {
        self.evaluate_with_stats(ir, None).await.map(|evaluation| evaluation.result)
    }

    /// Evaluates `ir`; names in `overrides` shadow the configured call table.
    pub async fn evaluate_with_stats(
        &self,
        ir: &Ir,
        overrides: Option<&CallTable>,
    ) -> Result<Evaluation, EvalError> {
        tracing::debug!(nodes = ir.len(), "Evaluating expression");
        let evaluation = self.evaluate_node(ir, ir.root(), overrides).await;

        match &evaluation {
            Ok(Evaluation { result, stats }) => {
                tracing::debug!(%result, ?stats, "Evaluation finished");
            }
            Err(e) => tracing::debug!(error = %e, "Evaluation failed"),
        }

        evaluation
    }

    /// Evaluates the subtree at `node` with an empty scope stack.
    pub(crate) async fn evaluate_node(
        &self,
        ir: &Ir,
        node: NodeId,
        overrides: Option<&CallTable>,
    ) -> Result<Evaluation, EvalError> {
        let mut context = Context::new(
            ir,
            &self.limits,
            MergedCalls {
                overrides,
                defaults: &self.calls,
            },
        );
        let result = context.eval(node).await?;

        Ok(Evaluation {
            result,
            stats: context.into_stats(),
        })
    }
}
