use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt};
use smol_str::SmolStr;
use tokio::time::Instant;

use super::{
    error::EvalError,
    scope::{Frame, Lambda, Params, ScopeStack},
};
use crate::{
    calls::{HostCall, MergedCalls},
    ir::{Ir, Node, NodeId},
    limits::{EvaluationLimits, EvaluationStats, Meter},
    ops::{Arity, OpCode},
    scalar::Scalar,
};

/// Mutable state of one evaluation.
pub(crate) struct Context<'a> {
    ir: &'a Ir,
    limits: &'a EvaluationLimits,
    calls: MergedCalls<'a>,
    scopes: ScopeStack,
    meter: Meter,
    deadline: Option<(Instant, Duration)>,
}

impl<'a> Context<'a> {
    pub fn new(ir: &'a Ir, limits: &'a EvaluationLimits, calls: MergedCalls<'a>) -> Self {
        Self {
            ir,
            limits,
            calls,
            scopes: ScopeStack::default(),
            meter: Meter::default(),
            deadline: limits
                .evaluation_budget()
                .map(|budget| (Instant::now() + budget, budget)),
        }
    }

    pub fn into_stats(self) -> EvaluationStats {
        self.meter.stats
    }

    pub fn eval(&mut self, id: NodeId) -> BoxFuture<'_, Result<Scalar, EvalError>> {
        async move {
            self.tick()?;

            let ir = self.ir;
            match ir.node(id) {
                Node::Scalar(value) => {
                    if !value.is_valid() {
                        return Err(EvalError::Overflow(id));
                    }
                    self.count_string(value)?;
                    Ok(value.clone())
                }
                Node::Op { op, operands } => self.eval_op(id, *op, operands).await,
            }
        }
        .boxed()
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.meter.stats.op_count += 1;

        if let Some((deadline, budget)) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(EvalError::Timeout(budget));
        }

        self.check_limits()
    }

    #[inline(always)]
    fn check_limits(&self) -> Result<(), EvalError> {
        match self.meter.first_exceeded(self.limits) {
            Some((counter, value, limit)) => Err(EvalError::LimitExceeded {
                counter,
                value,
                limit,
            }),
            None => Ok(()),
        }
    }

    fn count_string(&mut self, value: &Scalar) -> Result<(), EvalError> {
        if let Scalar::String(_) = value {
            self.meter.stats.str_count += 1;
            self.meter.stats.str_chars += value.char_count() as u64;
            self.check_limits()?;
        }
        Ok(())
    }

    async fn eval_op(&mut self, node: NodeId, op: OpCode, operands: &'a [NodeId]) -> Result<Scalar, EvalError> {
        let expected = op.arity();
        if !expected.accepts(operands.len()) {
            return Err(EvalError::InvalidArity {
                node,
                op,
                expected,
                got: operands.len(),
            });
        }

        match op {
            OpCode::Expression => self.eval(operands[0]).await,
            OpCode::Add => self.fold_numbers(node, op, operands, |a, b| a + b).await,
            OpCode::Sub => self.fold_numbers(node, op, operands, |a, b| a - b).await,
            OpCode::Mul => self.fold_numbers(node, op, operands, |a, b| a * b).await,
            OpCode::Div | OpCode::Mod => {
                let Some(left) = self.number(node, op, operands[0]).await? else {
                    return Ok(Scalar::Null);
                };
                let Some(right) = self.number(node, op, operands[1]).await? else {
                    return Ok(Scalar::Null);
                };
                if right == 0.0 {
                    return Err(EvalError::ZeroDivision(node));
                }
                let value = if op == OpCode::Div { left / right } else { left % right };
                finite(node, value)
            }
            OpCode::Not => Ok(self
                .boolean(operands[0])
                .await?
                .map(|b| Scalar::Boolean(!b))
                .unwrap_or_default()),
            OpCode::Or | OpCode::And => {
                let mut result = op == OpCode::And;
                for operand in operands {
                    let Some(b) = self.boolean(*operand).await? else {
                        return Ok(Scalar::Null);
                    };
                    result = if op == OpCode::And { result && b } else { result || b };
                }
                Ok(Scalar::Boolean(result))
            }
            OpCode::Eq | OpCode::Ne => {
                let left = self.eval(operands[0]).await?;
                if left.is_null() {
                    return Ok(Scalar::Null);
                }
                let right = self.eval(operands[1]).await?;
                if right.is_null() {
                    return Ok(Scalar::Null);
                }
                Ok(Scalar::Boolean((left == right) == (op == OpCode::Eq)))
            }
            OpCode::Lt | OpCode::Le | OpCode::Ge | OpCode::Gt => {
                let Some(left) = self.number(node, op, operands[0]).await? else {
                    return Ok(Scalar::Null);
                };
                let Some(right) = self.number(node, op, operands[1]).await? else {
                    return Ok(Scalar::Null);
                };
                Ok(Scalar::Boolean(match op {
                    OpCode::Lt => left < right,
                    OpCode::Le => left <= right,
                    OpCode::Ge => left >= right,
                    _ => left > right,
                }))
            }
            OpCode::Condition => {
                let (pairs, default) = operands.split_at(operands.len() - 1);
                for pair in pairs.chunks_exact(2) {
                    if self.eval(pair[0]).await?.truthy().unwrap_or(false) {
                        return self.eval(pair[1]).await;
                    }
                }
                self.eval(default[0]).await
            }
            OpCode::Call => self.eval_call(node, operands).await,
            OpCode::Lookup => {
                let name = self.name(node, op, operands[0]).await?;
                match self.scopes.resolve_constant(&name).cloned() {
                    Some(value) => {
                        self.count_string(&value)?;
                        Ok(value)
                    }
                    None => Err(EvalError::UninitializedVariable { node, name }),
                }
            }
            OpCode::Scope => self.eval_scope(node, operands).await,
            OpCode::Coalesce => {
                for operand in operands {
                    let value = self.eval(*operand).await?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Scalar::Null)
            }
            OpCode::IsNull => Ok(Scalar::Boolean(self.eval(operands[0]).await?.is_null())),
            OpCode::TypeOf => Ok(Scalar::from(self.eval(operands[0]).await?.type_name())),
            OpCode::Lambda => Err(EvalError::MisplacedLambda(node)),
        }
    }

    async fn fold_numbers(
        &mut self,
        node: NodeId,
        op: OpCode,
        operands: &'a [NodeId],
        f: fn(f64, f64) -> f64,
    ) -> Result<Scalar, EvalError> {
        let mut acc: Option<f64> = None;
        for operand in operands {
            let Some(n) = self.number(node, op, *operand).await? else {
                return Ok(Scalar::Null);
            };
            let value = match acc {
                Some(acc) => f(acc, n),
                None => n,
            };
            if !value.is_finite() {
                return Err(EvalError::Overflow(node));
            }
            acc = Some(value);
        }
        Ok(acc.map(Scalar::Number).unwrap_or_default())
    }

    /// Evaluates a numeric operand; `None` means it was `null`.
    async fn number(&mut self, node: NodeId, op: OpCode, operand: NodeId) -> Result<Option<f64>, EvalError> {
        match self.eval(operand).await? {
            Scalar::Null => Ok(None),
            Scalar::Number(n) => Ok(Some(n)),
            other => Err(EvalError::InvalidOperand {
                node,
                op,
                found: other.type_name(),
            }),
        }
    }

    async fn boolean(&mut self, operand: NodeId) -> Result<Option<bool>, EvalError> {
        Ok(self.eval(operand).await?.truthy())
    }

    /// Resolves a name operand. String literals are taken as is; any other
    /// operand is evaluated and must produce a string.
    async fn name(&mut self, node: NodeId, op: OpCode, operand: NodeId) -> Result<SmolStr, EvalError> {
        if let Some(name) = self.ir.literal_str(operand) {
            return Ok(SmolStr::new(name));
        }

        match self.eval(operand).await? {
            Scalar::String(name) => Ok(name),
            _ => Err(EvalError::InvalidName { node, op }),
        }
    }

    async fn eval_scope(&mut self, node: NodeId, operands: &'a [NodeId]) -> Result<Scalar, EvalError> {
        let (bindings, body) = operands.split_at(operands.len() - 1);
        let ir = self.ir;
        let mut frame = Frame::default();

        for pair in bindings.chunks_exact(2) {
            let name = self.name(node, OpCode::Scope, pair[0]).await?;
            self.meter.declare_variable();
            self.check_limits()?;

            match ir.node(pair[1]) {
                Node::Op {
                    op: OpCode::Lambda,
                    operands: lambda,
                } => {
                    let lambda = declare_lambda(ir, pair[1], lambda)?;
                    frame
                        .define_lambda(name, lambda)
                        .map_err(|e| e.to_eval_error(node))?;
                }
                _ => {
                    let value = self.eval(pair[1]).await?;
                    frame
                        .define_constant(name, value)
                        .map_err(|e| e.to_eval_error(node))?;
                }
            }
        }

        self.meter.enter_scope();
        self.scopes.push(frame);
        let result = self.eval(body[0]).await;
        self.scopes.pop();
        self.meter.exit_scope();
        result
    }

    async fn eval_call(&mut self, node: NodeId, operands: &'a [NodeId]) -> Result<Scalar, EvalError> {
        let name = self.name(node, OpCode::Call, operands[0]).await?;
        let args = &operands[1..];

        if let Some((index, lambda)) = self.scopes.resolve_lambda(&name) {
            let lambda = lambda.clone();
            return self.invoke_lambda(node, name, index, lambda, args).await;
        }

        let Some(call) = self.calls.get(&name) else {
            return Err(EvalError::UndefinedCall { node, name });
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(*arg).await?);
        }

        tracing::trace!(call = %name, args = values.len(), "Invoking host call");
        let value = self.invoke(node, &name, call, values).await?;
        if !value.is_valid() {
            return Err(EvalError::InvalidCallReturn { node, name });
        }

        self.count_string(&value)?;
        Ok(value)
    }

    async fn invoke_lambda(
        &mut self,
        node: NodeId,
        name: SmolStr,
        index: usize,
        lambda: Lambda,
        args: &'a [NodeId],
    ) -> Result<Scalar, EvalError> {
        if lambda.params.len() != args.len() {
            return Err(EvalError::LambdaArity {
                node,
                name,
                expected: lambda.params.len(),
                got: args.len(),
            });
        }

        // Busy for the whole call, argument evaluation included.
        if lambda.busy.swap(true, Ordering::AcqRel) {
            return Err(EvalError::Recursion { node, name });
        }
        let _busy = scopeguard::guard(Arc::clone(&lambda.busy), |busy| {
            busy.store(false, Ordering::Release);
        });

        let mut frame = Frame::default();
        for (param, arg) in lambda.params.iter().zip(args) {
            let value = self.eval(*arg).await?;
            self.meter.declare_variable();
            self.check_limits()?;
            frame
                .define_constant(param.clone(), value)
                .map_err(|e| e.to_eval_error(node))?;
        }

        tracing::trace!(lambda = %name, "Invoking lambda");
        let hidden = self.scopes.hide_above(index + 1);
        self.meter.enter_scope();
        self.scopes.push(frame);
        let result = self.eval(lambda.body).await;
        self.scopes.pop();
        self.meter.exit_scope();
        self.scopes.restore(hidden);
        result
    }

    /// Runs a host call under the tighter of the per-call budget and the
    /// time left for the whole evaluation.
    async fn invoke(
        &self,
        node: NodeId,
        name: &SmolStr,
        call: &Arc<dyn HostCall>,
        args: Vec<Scalar>,
    ) -> Result<Scalar, EvalError> {
        let failed = |source| EvalError::CallFailed {
            node,
            name: name.clone(),
            source,
        };

        let remaining = self
            .deadline
            .map(|(deadline, budget)| (deadline.saturating_duration_since(Instant::now()), budget));
        let (timeout, overall) = match (self.limits.call_budget(), remaining) {
            (None, None) => return call.call(args).await.map_err(failed),
            (Some(call_budget), None) => (call_budget, None),
            (None, Some((left, budget))) => (left, Some(budget)),
            (Some(call_budget), Some((left, budget))) if left < call_budget => (left, Some(budget)),
            (Some(call_budget), Some(_)) => (call_budget, None),
        };

        let expired = || {
            tracing::warn!(call = %name, "Host call timed out after {:?}", timeout);
            match overall {
                Some(budget) => EvalError::Timeout(budget),
                None => EvalError::CallTimeout {
                    node,
                    name: name.clone(),
                    budget: timeout,
                },
            }
        };

        // Without a Tokio runtime there is no timer to race against, so the
        // budget is enforced once the call returns.
        if tokio::runtime::Handle::try_current().is_err() {
            let started = Instant::now();
            let value = call.call(args).await.map_err(failed)?;
            return if started.elapsed() < timeout { Ok(value) } else { Err(expired()) };
        }

        match tokio::time::timeout(timeout, call.call(args)).await {
            Ok(result) => result.map_err(failed),
            Err(_) => Err(expired()),
        }
    }
}

/// Builds a lambda slot from the operands of a `lambda` node.
pub(crate) fn declare_lambda(ir: &Ir, node: NodeId, operands: &[NodeId]) -> Result<Lambda, EvalError> {
    let Some((body, params)) = operands.split_last() else {
        return Err(EvalError::InvalidArity {
            node,
            op: OpCode::Lambda,
            expected: Arity::AtLeast(1),
            got: 0,
        });
    };

    let mut names = Params::with_capacity(params.len());
    for param in params {
        let name = ir.literal_str(*param).ok_or(EvalError::InvalidName {
            node,
            op: OpCode::Lambda,
        })?;
        if names.iter().any(|n| n == name) {
            return Err(EvalError::DuplicateName {
                node,
                name: SmolStr::new(name),
                namespace: super::scope::Namespace::Constant,
            });
        }
        names.push(SmolStr::new(name));
    }

    Ok(Lambda::new(names, *body))
}

#[inline(always)]
fn finite(node: NodeId, value: f64) -> Result<Scalar, EvalError> {
    if value.is_finite() {
        Ok(Scalar::Number(value))
    } else {
        Err(EvalError::Overflow(node))
    }
}
