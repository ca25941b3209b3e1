use std::borrow::Cow;

use crate::{
    ScalarResult,
    calls::CallTable,
    error::Error,
    eval::{Evaluation, Evaluator},
    ir::Ir,
    limits::EvaluationLimits,
    linearizer,
    optimizer::{CheckReport, Optimizer},
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Run the static checker before evaluating.
    pub check: bool,
    /// Fold constant subtrees before evaluating.
    pub optimize: bool,
    /// Host calls an expression may use; `None` allows any.
    pub allowed_calls: Option<Vec<String>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            check: true,
            optimize: false,
            allowed_calls: None,
        }
    }
}

/// Checks, optimizes and evaluates expressions against one configuration.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    pub(crate) evaluator: Evaluator,
    pub(crate) optimizer: Optimizer,
    pub(crate) options: EngineOptions,
}

impl Engine {
    pub fn new(limits: EvaluationLimits, calls: CallTable) -> Self {
        Self {
            evaluator: Evaluator::new(limits, calls),
            ..Default::default()
        }
    }

    /// Uses limits from the environment and no host calls.
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self::new(EvaluationLimits::from_env()?, CallTable::new()))
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_check(&mut self, check: bool) {
        self.options.check = check;
    }

    pub fn set_optimize(&mut self, optimize: bool) {
        self.options.optimize = optimize;
    }

    pub fn set_allowed_calls(&mut self, allowed_calls: Option<Vec<String>>) {
        self.options.allowed_calls = allowed_calls;
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Runs the checker with the configured allow-list.
    pub fn check(&self, ir: &Ir) -> Result<CheckReport, Error> {
        let allowed = self
            .options
            .allowed_calls
            .as_ref()
            .map(|names| names.iter().map(String::as_str).collect::<Vec<_>>());

        self.optimizer
            .check(ir, allowed.as_deref())
            .map_err(|e| Error::from(e).with_expression(ir.to_string()))
    }

    /// Applies the configured check and optimize passes.
    pub async fn prepare<'a>(&self, ir: &'a Ir) -> Result<Cow<'a, Ir>, Error> {
        if self.options.check {
            let report = self.check(ir)?;
            for warning in &report.warnings {
                tracing::debug!(%warning, "Check warning");
            }
        }

        if self.options.optimize {
            let optimized = self
                .optimizer
                .optimize(ir)
                .await
                .map_err(|e| Error::from(e).with_expression(ir.to_string()))?;
            Ok(Cow::Owned(optimized))
        } else {
            Ok(Cow::Borrowed(ir))
        }
    }

    pub async fn eval(&self, ir: &Ir) -> ScalarResult {
        self.eval_with_stats(ir, None)
            .await
            .map(|evaluation| evaluation.result)
    }

    pub async fn eval_with_stats(&self, ir: &Ir, overrides: Option<&CallTable>) -> Result<Evaluation, Error> {
        let ir = self.prepare(ir).await?;
        self.evaluator
            .evaluate_with_stats(&ir, overrides)
            .await
            .map_err(|e| Error::from(e).with_expression(ir.to_string()))
    }

    /// Evaluates a JSON document in tree or array form.
    pub async fn eval_json(&self, value: &serde_json::Value) -> ScalarResult {
        let ir = linearizer::explode(value)?;
        self.eval(&ir).await
    }

    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        calls::Lookup,
        error::InnerError,
        eval::{ErrorKind, EvalError},
        scalar::Scalar,
        test_utils::init_test_logging,
    };

    fn engine() -> Engine {
        let mut calls = CallTable::new();
        calls
            .insert("lookup", Lookup::new([("rate", Scalar::from(0.5))]))
            .unwrap();
        Engine::new(EvaluationLimits::default(), calls)
    }

    #[test]
    fn test_engine_default() {
        let engine = Engine::default();
        assert!(engine.options().check);
        assert!(!engine.options().optimize);
        assert!(engine.options().allowed_calls.is_none());
    }

    #[tokio::test]
    async fn test_eval_json_forms() {
        init_test_logging();
        let engine = engine();
        let tree = json!({"op": "mul", "operands": [10, {"op": "call", "operands": ["lookup", "rate"]}]});
        let array = json!([3, 10, [16, "lookup", "rate"]]);

        assert_eq!(engine.eval_json(&tree).await, Ok(Scalar::from(5)));
        assert_eq!(engine.eval_json(&array).await, Ok(Scalar::from(5)));
    }

    #[tokio::test]
    async fn test_allowed_calls() {
        let mut engine = engine();
        engine.set_allowed_calls(Some(vec!["now".to_string()]));

        let error = engine
            .eval_json(&json!([16, "lookup", "rate"]))
            .await
            .unwrap_err();
        assert!(matches!(error.cause, InnerError::Eval(EvalError::CallNotAllowed { .. })));
        assert_eq!(error.expression.as_deref(), Some("call(\"lookup\", \"rate\")"));
    }

    #[tokio::test]
    async fn test_optimize_before_evaluating() {
        init_test_logging();
        let mut engine = engine();
        engine.set_optimize(true);

        let ir = Ir::from_json(&json!({"op": "add", "operands": [{"op": "mul", "operands": [2, 3]}, 1]})).unwrap();
        assert_eq!(engine.prepare(&ir).await.unwrap().to_string(), "expression(7)");

        let evaluation = engine.eval_with_stats(&ir, None).await.unwrap();
        assert_eq!(evaluation.result, Scalar::from(7));
        assert_eq!(evaluation.stats.op_count, 2);
    }

    #[tokio::test]
    async fn test_errors_carry_node() {
        let mut engine = engine();
        engine.set_check(false);

        let error = engine
            .eval_json(&json!({"op": "div", "operands": [1, 0]}))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), Some(ErrorKind::Semantic));
        assert_eq!(error.node, Some(2usize.into()));
    }
}
