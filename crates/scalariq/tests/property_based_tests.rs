//! Property-based tests for evaluation, optimization and the array form.
use std::future::Future;

use proptest::prelude::*;
use scalariq::{CallTable, EvalError, EvaluationLimits, Evaluator, Ir, Optimizer, Scalar, explode, implode};
use serde_json::{Value, json};

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn evaluate(ir: &Ir) -> Result<Scalar, EvalError> {
    block_on(Evaluator::new(EvaluationLimits::unlimited(), CallTable::new()).evaluate(ir))
}

mod strategies {
    use super::*;

    fn op(name: &str, operands: Vec<Value>) -> Value {
        json!({"op": name, "operands": operands})
    }

    /// Scalar leaves; numbers stay small so folds rarely overflow.
    pub fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            (-100i64..=100).prop_map(Value::from),
            (-100.0f64..100.0f64).prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z]{0,4}".prop_map(Value::from),
        ]
    }

    /// Pure op-trees with valid arity and no host calls.
    pub fn expr() -> impl Strategy<Value = Value> {
        scalar().prop_recursive(4, 64, 4, |inner| {
            prop_oneof![
                (
                    prop::sample::select(vec!["add", "mul", "and", "or", "coalesce"]),
                    prop::collection::vec(inner.clone(), 1..4)
                )
                    .prop_map(|(name, operands)| op(name, operands)),
                (
                    prop::sample::select(vec!["sub", "div", "mod", "eq", "ne", "lt", "le", "ge", "gt"]),
                    inner.clone(),
                    inner.clone()
                )
                    .prop_map(|(name, a, b)| op(name, vec![a, b])),
                (prop::sample::select(vec!["not", "isnull", "typeof"]), inner.clone())
                    .prop_map(|(name, a)| op(name, vec![a])),
                (inner.clone(), inner.clone(), inner.clone()).prop_map(|(c, a, b)| op("condition", vec![c, a, b])),
                (inner.clone(), inner.clone()).prop_map(|(value, other)| {
                    op(
                        "scope",
                        vec![
                            json!("v"),
                            value,
                            op("coalesce", vec![op("lookup", vec![json!("v")]), other]),
                        ],
                    )
                }),
            ]
        })
    }

    /// Two finite operands and an arithmetic op.
    pub fn arithmetic() -> impl Strategy<Value = (&'static str, f64, f64)> {
        (
            prop::sample::select(vec!["add", "sub", "mul", "div", "mod"]),
            prop_oneof![-1e6f64..1e6f64, (-10i32..=10).prop_map(f64::from)],
            prop_oneof![-1e6f64..1e6f64, (-10i32..=10).prop_map(f64::from), Just(0.0)],
        )
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_array_form_round_trip(input in strategies::expr()) {
        let ir = Ir::from_json(&input).unwrap();
        let array = implode(&ir);
        let exploded = explode(&array).unwrap();

        prop_assert_eq!(&exploded, &ir);
        prop_assert_eq!(implode(&exploded), array);
    }

    #[test]
    fn test_arithmetic_matches_ieee((name, a, b) in strategies::arithmetic()) {
        let ir = Ir::from_json(&json!({"op": name, "operands": [a, b]})).unwrap();
        let expected = match name {
            "add" => a + b,
            "sub" => a - b,
            "mul" => a * b,
            "div" => a / b,
            "mod" => a % b,
            _ => unreachable!(),
        };

        match evaluate(&ir) {
            Ok(Scalar::Number(n)) => prop_assert_eq!(n, expected),
            Err(EvalError::ZeroDivision(_)) => prop_assert!(matches!(name, "div" | "mod") && b == 0.0),
            Err(EvalError::Overflow(_)) => prop_assert!(!expected.is_finite()),
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_optimize_preserves_results(input in strategies::expr()) {
        let ir = Ir::from_json(&input).unwrap();
        let optimizer = Optimizer::new();
        let optimized = block_on(optimizer.optimize(&ir)).unwrap();

        if let Ok(expected) = evaluate(&ir) {
            prop_assert_eq!(evaluate(&optimized), Ok(expected));
        }
    }

    #[test]
    fn test_optimize_is_idempotent(input in strategies::expr()) {
        let ir = Ir::from_json(&input).unwrap();
        let optimizer = Optimizer::new();
        let once = block_on(optimizer.optimize(&ir)).unwrap();
        let twice = block_on(optimizer.optimize(&once)).unwrap();

        prop_assert_eq!(twice, once);
    }

    #[test]
    fn test_small_trees_stay_within_global_limits(input in strategies::expr()) {
        let ir = Ir::from_json(&input).unwrap();
        let limits = EvaluationLimits::global(10_000);
        let result = block_on(Evaluator::new(limits, CallTable::new()).evaluate(&ir));

        let exceeded = matches!(result, Err(EvalError::LimitExceeded { .. }));
        prop_assert!(!exceeded, "limit exceeded: {:?}", result);
    }
}
