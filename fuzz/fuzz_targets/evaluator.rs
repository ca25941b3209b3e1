#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scalariq::{CallTable, EvaluationLimits, Evaluator, Ir, Optimizer, Scalar};
use serde_json::{Value, json};

const MAX_DEPTH: usize = 12;

#[derive(Debug, Clone, Arbitrary)]
enum Leaf {
    Null,
    Int(i32),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Arbitrary)]
enum Node {
    Leaf(Leaf),
    /// Any op by number, with any operands; invalid arity is allowed.
    Op(u8, Vec<Node>),
    Scope(Vec<(String, Node)>, Box<Node>),
    Lambda(Vec<String>, Box<Node>),
    Call(String, Vec<Node>),
    Lookup(String),
}

impl Node {
    fn to_json(&self, depth: usize) -> Value {
        if depth > MAX_DEPTH {
            return Value::Null;
        }

        match self {
            Node::Leaf(Leaf::Null) => Value::Null,
            Node::Leaf(Leaf::Int(n)) => json!(n),
            Node::Leaf(Leaf::Float(n)) if n.is_finite() => json!(n),
            Node::Leaf(Leaf::Float(_)) => json!(0),
            Node::Leaf(Leaf::Bool(b)) => json!(b),
            Node::Leaf(Leaf::Str(s)) => json!(s),
            Node::Op(id, operands) => {
                let mut items = vec![json!(id % 24)];
                items.extend(operands.iter().map(|n| n.to_json(depth + 1)));
                Value::Array(items)
            }
            Node::Scope(bindings, body) => {
                let mut items = vec![json!(18)];
                for (name, value) in bindings {
                    items.push(json!(name));
                    items.push(value.to_json(depth + 1));
                }
                items.push(body.to_json(depth + 1));
                Value::Array(items)
            }
            Node::Lambda(params, body) => {
                let mut items = vec![json!(22)];
                items.extend(params.iter().map(|p| json!(p)));
                items.push(body.to_json(depth + 1));
                Value::Array(items)
            }
            Node::Call(name, args) => {
                let mut items = vec![json!(16), json!(name)];
                items.extend(args.iter().map(|n| n.to_json(depth + 1)));
                Value::Array(items)
            }
            Node::Lookup(name) => json!([17, name]),
        }
    }
}

fuzz_target!(|node: Node| {
    let value = node.to_json(0);
    let Ok(ir) = scalariq::explode(&value) else {
        return;
    };

    assert_eq!(scalariq::explode(&scalariq::implode(&ir)).ok().as_ref(), Some(&ir));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let calls = CallTable::new()
        .with_constant("one", 1)
        .unwrap()
        .with_fn("echo", |args| Ok(args.into_iter().next().unwrap_or(Scalar::Null)))
        .unwrap();
    let evaluator = Evaluator::new(EvaluationLimits::default(), calls);
    let optimizer = Optimizer::new();

    runtime.block_on(async {
        let _ = optimizer.check(&ir, None);
        let original = evaluator.evaluate(&ir).await;

        if let Ok(optimized) = optimizer.optimize(&ir).await
            && let Ok(expected) = original
            && let Ok(actual) = evaluator.evaluate(&optimized).await
        {
            assert_eq!(actual, expected);
        }
    });
});
