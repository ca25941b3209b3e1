//! Static checking and constant folding of op-trees.

use std::fmt;

use futures::future::{BoxFuture, FutureExt};
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::{
    calls::CallTable,
    eval::{
        EvalError, Evaluation, Evaluator,
        context::declare_lambda,
        scope::{Lambda, Namespace},
    },
    ir::{Ir, IrBuilder, Node, NodeId, Operands},
    limits::{Counter, EvaluationLimits, Limit},
    ops::OpCode,
    scalar::Scalar,
};

/// Upper bound on the work spent trying to fold a single subtree.
const FOLD_OP_LIMIT: u64 = 10_000;

/// A condition `check` could not confirm statically.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    DynamicName { node: NodeId, op: OpCode },
    UnresolvedLookup { node: NodeId, name: SmolStr },
    UnresolvedCall { node: NodeId, name: SmolStr },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::DynamicName { node, op } => {
                write!(f, "Node {}:{} name is not a constant and is therefore not checked", node, op)
            }
            Warning::UnresolvedLookup { node, name } => write!(
                f,
                "Node {}:lookup unknown constant name \"{}\", but an enclosing scope declares dynamic names that may satisfy it",
                node, name
            ),
            Warning::UnresolvedCall { node, name } => write!(
                f,
                "Node {}:call \"{}\" is not an allowed call, but an enclosing scope declares dynamic names that may satisfy it",
                node, name
            ),
        }
    }
}

/// Result of a successful [`Optimizer::check`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    /// Number of op nodes, scalar leaves excluded.
    pub op_count: u64,
    /// Host call names in order of first appearance.
    pub calls: Vec<SmolStr>,
    pub warnings: Vec<Warning>,
}

/// Validates and simplifies op-trees.
///
/// Folding runs subtrees through an evaluator that has no host calls, so a
/// subtree folds only when its value does not depend on anything outside it.
#[derive(Debug, Clone)]
pub struct Optimizer {
    evaluator: Evaluator,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    pub fn new() -> Self {
        let limits = EvaluationLimits::unlimited().with(Counter::OpCount, Limit::new(FOLD_OP_LIMIT));
        Self {
            evaluator: Evaluator::new(limits, CallTable::new()),
        }
    }

    /// Validates `ir` without evaluating it.
    ///
    /// With an allow-list, every call that does not resolve to a lambda must
    /// name one of `allowed`.
    pub fn check(&self, ir: &Ir, allowed: Option<&[&str]>) -> Result<CheckReport, EvalError> {
        let mut checker = Checker {
            ir,
            allowed,
            frames: Vec::new(),
            report: CheckReport::default(),
        };
        checker.check_node(ir.root())?;

        tracing::debug!(
            op_count = checker.report.op_count,
            calls = ?checker.report.calls,
            warnings = checker.report.warnings.len(),
            "Checked expression"
        );
        Ok(checker.report)
    }

    /// Returns a folded copy of `ir`.
    pub async fn optimize(&self, ir: &Ir) -> Result<Ir, EvalError> {
        self.check(ir, None)?;

        let mut builder = Ir::builder();
        let root = self.fold(ir, ir.root(), &mut builder).await;
        let root = if builder.node(root).as_scalar().is_some() {
            builder.op(OpCode::Expression, [root])
        } else {
            root
        };

        Ok(builder.finish(root))
    }

    fn fold<'b>(&'b self, ir: &'b Ir, id: NodeId, builder: &'b mut IrBuilder) -> BoxFuture<'b, NodeId> {
        async move {
            let Node::Op { op, operands } = ir.node(id) else {
                return builder.copy_subtree(ir, id);
            };

            if let Ok(Evaluation { result, .. }) = self.evaluator.evaluate_node(ir, id, None).await {
                tracing::debug!(node = %id, %result, "Folded constant subtree");
                return builder.scalar(result);
            }

            let mut folded = Operands::with_capacity(operands.len());
            for operand in operands {
                folded.push(self.fold(ir, *operand, builder).await);
            }

            simplify(*op, folded, builder)
        }
        .boxed()
    }
}

fn simplify(op: OpCode, operands: Operands, builder: &mut IrBuilder) -> NodeId {
    match op {
        OpCode::Scope if operands.len() == 1 => operands[0],
        OpCode::Condition => simplify_condition(operands, builder),
        _ => builder.op(op, operands),
    }
}

/// Drops pairs guarded by a literal false condition and cuts the node at the
/// first literal true condition.
fn simplify_condition(operands: Operands, builder: &mut IrBuilder) -> NodeId {
    let Some((&default, pairs)) = operands.split_last() else {
        return builder.op(OpCode::Condition, operands);
    };

    let mut live = Operands::new();
    let mut fallback = default;
    for pair in pairs.chunks_exact(2) {
        match builder.node(pair[0]).as_scalar() {
            Some(condition) if condition.truthy().unwrap_or(false) => {
                fallback = pair[1];
                break;
            }
            Some(_) => continue,
            None => live.extend_from_slice(pair),
        }
    }

    if live.is_empty() {
        fallback
    } else {
        live.push(fallback);
        builder.op(OpCode::Condition, live)
    }
}

#[derive(Debug, Default)]
struct CheckFrame {
    constants: FxHashSet<SmolStr>,
    lambdas: FxHashMap<SmolStr, usize>,
    /// Set when a binding name is only known at evaluation time.
    dynamic: bool,
}

enum Resolution<T> {
    Found(T),
    Maybe,
    Missing,
}

struct Checker<'a> {
    ir: &'a Ir,
    allowed: Option<&'a [&'a str]>,
    frames: Vec<CheckFrame>,
    report: CheckReport,
}

impl<'a> Checker<'a> {
    fn check_node(&mut self, id: NodeId) -> Result<(), EvalError> {
        let ir = self.ir;
        let Node::Op { op, operands } = ir.node(id) else {
            return Ok(());
        };

        self.report.op_count += 1;
        let expected = op.arity();
        if !expected.accepts(operands.len()) {
            return Err(EvalError::InvalidArity {
                node: id,
                op: *op,
                expected,
                got: operands.len(),
            });
        }

        match op {
            OpCode::Lambda => Err(EvalError::MisplacedLambda(id)),
            OpCode::Lookup => self.check_lookup(id, operands[0]),
            OpCode::Call => self.check_call(id, operands),
            OpCode::Scope => self.check_scope(id, operands),
            _ => operands.iter().try_for_each(|operand| self.check_node(*operand)),
        }
    }

    /// Returns the literal name, or `None` for a name computed at runtime.
    fn check_name(&mut self, node: NodeId, op: OpCode, operand: NodeId) -> Result<Option<&'a str>, EvalError> {
        let ir = self.ir;
        match ir.node(operand) {
            Node::Scalar(Scalar::String(name)) => Ok(Some(name.as_str())),
            Node::Scalar(_) => Err(EvalError::InvalidName { node, op }),
            Node::Op { .. } => {
                self.check_node(operand)?;
                self.report.warnings.push(Warning::DynamicName { node, op });
                Ok(None)
            }
        }
    }

    fn resolve<T>(&self, find: impl Fn(&CheckFrame) -> Option<T>) -> Resolution<T> {
        for frame in self.frames.iter().rev() {
            if let Some(found) = find(frame) {
                return Resolution::Found(found);
            }
            if frame.dynamic {
                return Resolution::Maybe;
            }
        }
        Resolution::Missing
    }

    fn check_lookup(&mut self, node: NodeId, operand: NodeId) -> Result<(), EvalError> {
        let Some(name) = self.check_name(node, OpCode::Lookup, operand)? else {
            return Ok(());
        };

        match self.resolve(|frame| frame.constants.contains(name).then_some(())) {
            Resolution::Found(()) => Ok(()),
            Resolution::Maybe => {
                self.report.warnings.push(Warning::UnresolvedLookup {
                    node,
                    name: SmolStr::new(name),
                });
                Ok(())
            }
            Resolution::Missing => Err(EvalError::UninitializedVariable {
                node,
                name: SmolStr::new(name),
            }),
        }
    }

    fn check_call(&mut self, node: NodeId, operands: &'a [NodeId]) -> Result<(), EvalError> {
        let name = self.check_name(node, OpCode::Call, operands[0])?;
        let args = &operands[1..];

        if let Some(name) = name {
            let allowed = self.allowed.is_none_or(|allowed| allowed.contains(&name));
            match self.resolve(|frame| frame.lambdas.get(name).copied()) {
                Resolution::Found(params) if params != args.len() => {
                    return Err(EvalError::LambdaArity {
                        node,
                        name: SmolStr::new(name),
                        expected: params,
                        got: args.len(),
                    });
                }
                Resolution::Found(_) => {}
                Resolution::Missing if !allowed => {
                    return Err(EvalError::CallNotAllowed {
                        node,
                        name: SmolStr::new(name),
                    });
                }
                Resolution::Maybe if !allowed => {
                    self.report.warnings.push(Warning::UnresolvedCall {
                        node,
                        name: SmolStr::new(name),
                    });
                }
                Resolution::Missing | Resolution::Maybe => {
                    if !self.report.calls.iter().any(|call| call == name) {
                        self.report.calls.push(SmolStr::new(name));
                    }
                }
            }
        }

        args.iter().try_for_each(|arg| self.check_node(*arg))
    }

    fn check_scope(&mut self, node: NodeId, operands: &'a [NodeId]) -> Result<(), EvalError> {
        let ir = self.ir;
        let (bindings, body) = operands.split_at(operands.len() - 1);
        let mut frame = CheckFrame::default();
        let mut lambdas: Vec<Lambda> = Vec::new();

        for pair in bindings.chunks_exact(2) {
            let name = self.check_name(node, OpCode::Scope, pair[0])?;

            let namespace = match ir.node(pair[1]) {
                Node::Op {
                    op: OpCode::Lambda,
                    operands: lambda,
                } => {
                    self.report.op_count += 1;
                    let lambda = declare_lambda(ir, pair[1], lambda)?;
                    let params = lambda.params.len();
                    lambdas.push(lambda);
                    name.map(|name| (frame.lambdas.insert(SmolStr::new(name), params).is_none(), Namespace::Lambda))
                }
                _ => {
                    self.check_node(pair[1])?;
                    name.map(|name| (frame.constants.insert(SmolStr::new(name)), Namespace::Constant))
                }
            };

            match (namespace, name) {
                (Some((false, namespace)), Some(name)) => {
                    return Err(EvalError::DuplicateName {
                        node,
                        name: SmolStr::new(name),
                        namespace,
                    });
                }
                (None, _) => frame.dynamic = true,
                _ => {}
            }
        }

        self.frames.push(frame);
        let result = lambdas
            .iter()
            .try_for_each(|lambda| self.check_lambda(lambda))
            .and_then(|_| self.check_node(body[0]));
        self.frames.pop();
        result
    }

    fn check_lambda(&mut self, lambda: &Lambda) -> Result<(), EvalError> {
        self.frames.push(CheckFrame {
            constants: lambda.params.iter().cloned().collect(),
            ..Default::default()
        });
        let result = self.check_node(lambda.body);
        self.frames.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn ir(value: serde_json::Value) -> Ir {
        Ir::from_json(&value).unwrap()
    }

    fn op(name: &str, operands: serde_json::Value) -> serde_json::Value {
        json!({"op": name, "operands": operands})
    }

    fn lookup(name: &str) -> serde_json::Value {
        op("lookup", json!([name]))
    }

    fn call(name: &str, args: &[serde_json::Value]) -> serde_json::Value {
        let mut operands = vec![json!(name)];
        operands.extend_from_slice(args);
        op("call", serde_json::Value::Array(operands))
    }

    #[test]
    fn test_check_report() {
        let input = ir(op(
            "expression",
            json!([op("add", json!([call("now", &[]), call("len", &[json!("x")]), call("now", &[])]))]),
        ));
        let report = Optimizer::new().check(&input, None).unwrap();

        assert_eq!(report.op_count, 5);
        assert_eq!(report.calls, vec![SmolStr::new("now"), SmolStr::new("len")]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_check_scopes_and_lambdas() {
        let input = ir(op(
            "scope",
            json!([
                "x", 1,
                "f", op("lambda", json!(["a", op("add", json!([lookup("a"), lookup("x")]))])),
                call("f", &[lookup("x")])
            ]),
        ));
        let report = Optimizer::new().check(&input, Some(&[])).unwrap();
        assert!(report.calls.is_empty());
        assert_eq!(report.op_count, 7);
    }

    #[rstest]
    #[case::arity(op("not", json!([1, 2])), "InvalidArity")]
    #[case::undeclared(lookup("x"), "UninitializedVariable")]
    #[case::out_of_scope(op("add", json!([op("scope", json!(["x", 1, lookup("x")])), lookup("x")])), "UninitializedVariable")]
    #[case::sibling(op("scope", json!(["x", 1, "y", lookup("x"), 0])), "UninitializedVariable")]
    #[case::non_string_name(op("lookup", json!([true])), "InvalidName")]
    #[case::duplicate(op("scope", json!(["x", 1, "x", 2, 0])), "DuplicateName")]
    #[case::misplaced_lambda(op("add", json!([op("lambda", json!([1]))])), "MisplacedLambda")]
    #[case::lambda_param(op("scope", json!(["f", op("lambda", json!([1, 2])), 0])), "InvalidName")]
    #[case::lambda_arity(op("scope", json!(["f", op("lambda", json!(["a", lookup("a")])), call("f", &[])])), "LambdaArity")]
    #[case::not_allowed(call("rm", &[]), "CallNotAllowed")]
    fn test_check_errors(#[case] input: serde_json::Value, #[case] expected: &str) {
        let error = Optimizer::new()
            .check(&ir(input), Some(&["len"]))
            .unwrap_err();
        assert!(format!("{:?}", error).starts_with(expected), "{:?}", error);
    }

    #[test]
    fn test_check_dynamic_names() {
        let input = ir(op(
            "scope",
            json!([
                call("name", &[]), 1,
                op("add", json!([lookup("anything"), op("lookup", json!([call("key", &[])]))]))
            ]),
        ));
        let report = Optimizer::new().check(&input, None).unwrap();

        assert_eq!(report.calls, vec![SmolStr::new("name"), SmolStr::new("key")]);
        assert_eq!(report.warnings.len(), 3);
        assert!(matches!(report.warnings[0], Warning::DynamicName { op: OpCode::Scope, .. }));
        assert!(matches!(&report.warnings[1], Warning::UnresolvedLookup { name, .. } if name == "anything"));
        assert!(matches!(report.warnings[2], Warning::DynamicName { op: OpCode::Lookup, .. }));
    }

    #[rstest]
    #[case::whole_tree(op("add", json!([1, 2, 3])), op("expression", json!([6])))]
    #[case::scalar_root(json!("x"), op("expression", json!(["x"])))]
    #[case::partial(
        op("add", json!([op("mul", json!([2, 3])), call("now", &[])])),
        op("add", json!([6, call("now", &[])]))
    )]
    #[case::prune_false(
        op("condition", json!([false, call("a", &[]), call("c", &[]), call("b", &[]), call("d", &[])])),
        op("condition", json!([call("c", &[]), call("b", &[]), call("d", &[])]))
    )]
    #[case::prune_true(
        op("condition", json!([call("c", &[]), 1, op("eq", json!([1, 1])), call("a", &[]), call("b", &[])])),
        op("condition", json!([call("c", &[]), 1, call("a", &[])]))
    )]
    #[case::leading_true(
        op("condition", json!([true, call("a", &[]), call("b", &[])])),
        call("a", &[])
    )]
    #[case::only_default(
        op("condition", json!([op("lt", json!([2, 1])), 1, call("b", &[])])),
        call("b", &[])
    )]
    #[case::lambda_body(
        op("scope", json!(["f", op("lambda", json!(["a", op("add", json!([lookup("a"), op("mul", json!([2, 2]))]))])), call("f", &[call("now", &[])])])),
        op("scope", json!(["f", op("lambda", json!(["a", op("add", json!([lookup("a"), 4]))])), call("f", &[call("now", &[])])]))
    )]
    #[case::bound_constants(
        op("scope", json!(["x", 2, op("mul", json!([lookup("x"), 5]))])),
        op("expression", json!([10]))
    )]
    #[case::failing_subtree(op("div", json!([1, 0])), op("div", json!([1, 0])))]
    #[tokio::test]
    async fn test_optimize(#[case] input: serde_json::Value, #[case] expected: serde_json::Value) {
        let optimized = Optimizer::new().optimize(&ir(input)).await.unwrap();
        assert_eq!(optimized.to_json(), expected);
    }

    #[tokio::test]
    async fn test_optimize_is_idempotent() {
        let input = ir(op(
            "scope",
            json!([
                "x", call("now", &[]),
                op("condition", json!([op("gt", json!([lookup("x"), op("add", json!([1, 1]))])), "big", op("not", json!([false])), "small", "none"]))
            ]),
        ));
        let optimizer = Optimizer::new();
        let once = optimizer.optimize(&input).await.unwrap();
        let twice = optimizer.optimize(&once).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_optimize_runs_check() {
        let input = ir(op("add", json!([lookup("x"), 1])));
        assert!(matches!(
            Optimizer::new().optimize(&input).await,
            Err(EvalError::UninitializedVariable { .. })
        ));
    }
}
