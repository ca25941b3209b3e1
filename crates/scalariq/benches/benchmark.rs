use scalariq::{CallTable, EvaluationLimits, Evaluator, Ir, Optimizer, Scalar};
use serde_json::{Value, json};

fn main() {
    divan::main();
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn op(name: &str, operands: Value) -> Value {
    json!({"op": name, "operands": operands})
}

/// `add(1, add(1, ... add(1, 0)))` nested `depth` times.
fn nested_add(depth: usize) -> Ir {
    let tree = (0..depth).fold(json!(0), |acc, _| op("add", json!([1, acc])));
    Ir::from_json(&tree).unwrap()
}

/// A scope of `n` constants summed by the body.
fn wide_scope(n: usize) -> Ir {
    let mut operands = Vec::with_capacity(n * 2 + 1);
    for i in 0..n {
        operands.push(json!(format!("v{}", i)));
        operands.push(json!(i));
    }
    operands.push(op(
        "add",
        Value::Array((0..n).map(|i| op("lookup", json!([format!("v{}", i)]))).collect()),
    ));
    Ir::from_json(&op("scope", Value::Array(operands))).unwrap()
}

#[divan::bench(args = [10, 100, 250])]
fn eval_nested_add(bencher: divan::Bencher, depth: usize) {
    let rt = runtime();
    let ir = nested_add(depth);
    let evaluator = Evaluator::new(EvaluationLimits::unlimited(), CallTable::new());
    bencher.bench_local(|| rt.block_on(evaluator.evaluate(&ir)).unwrap());
}

#[divan::bench(args = [10, 100])]
fn eval_wide_scope(bencher: divan::Bencher, n: usize) {
    let rt = runtime();
    let ir = wide_scope(n);
    let evaluator = Evaluator::new(EvaluationLimits::unlimited(), CallTable::new());
    bencher.bench_local(|| rt.block_on(evaluator.evaluate(&ir)).unwrap());
}

#[divan::bench]
fn eval_lambda_chain(bencher: divan::Bencher) {
    let rt = runtime();
    let ir = Ir::from_json(&op(
        "scope",
        json!([
            "inc", op("lambda", json!(["n", op("add", json!([op("lookup", json!(["n"])), 1]))])),
            "twice", op("lambda", json!(["n", op("add", json!([
                op("call", json!(["inc", op("lookup", json!(["n"]))])),
                op("call", json!(["inc", op("lookup", json!(["n"]))]))
            ]))])),
            op("call", json!(["twice", op("call", json!(["inc", 0]))]))
        ]),
    ))
    .unwrap();
    let evaluator = Evaluator::new(EvaluationLimits::unlimited(), CallTable::new());
    bencher.bench_local(|| rt.block_on(evaluator.evaluate(&ir)).unwrap());
}

#[divan::bench]
fn eval_host_calls(bencher: divan::Bencher) {
    let rt = runtime();
    let calls = CallTable::new()
        .with_fn("double", |args| Ok(Scalar::from(args[0].as_number().unwrap_or_default() * 2.0)))
        .unwrap();
    let tree = (0..50).fold(json!(1), |acc, _| op("call", json!(["double", acc])));
    let ir = Ir::from_json(&op("mod", json!([tree, 1000]))).unwrap();
    let evaluator = Evaluator::new(EvaluationLimits::unlimited(), calls);
    bencher.bench_local(|| rt.block_on(evaluator.evaluate(&ir)).unwrap());
}

#[divan::bench(args = [100])]
fn optimize_nested_add(bencher: divan::Bencher, depth: usize) {
    let rt = runtime();
    let ir = nested_add(depth);
    let optimizer = Optimizer::new();
    bencher.bench_local(|| rt.block_on(optimizer.optimize(&ir)).unwrap());
}

#[divan::bench(args = [100])]
fn linearize_round_trip(bencher: divan::Bencher, n: usize) {
    let ir = wide_scope(n);
    bencher.bench_local(|| scalariq::explode(&scalariq::implode(&ir)).unwrap());
}
