//! `scalariq` evaluates small, non-Turing-complete expressions that always
//! produce a single scalar: `null`, a finite number, a string or a boolean.
//!
//! Expressions are op-trees ([`Ir`]) of arithmetic, logic, conditional,
//! scope and call nodes. Every evaluation is bounded by [`EvaluationLimits`]
//! (operation, scope, variable and string counters plus time budgets) and a
//! lambda can never re-enter itself, so evaluation always terminates.
//!
//! ## Examples
//!
//! ```rust
//! use scalariq::{CallTable, Engine, EvaluationLimits, Scalar};
//! use serde_json::json;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let calls = CallTable::new().with_constant("vat", 0.25).unwrap();
//! let engine = Engine::new(EvaluationLimits::default(), calls);
//!
//! // price * (1 + vat), with price bound in a scope
//! let expression = json!({
//!     "op": "scope",
//!     "operands": [
//!         "price", 80,
//!         {"op": "mul", "operands": [
//!             {"op": "lookup", "operands": ["price"]},
//!             {"op": "add", "operands": [1, {"op": "call", "operands": ["vat"]}]}
//!         ]}
//!     ]
//! });
//! assert_eq!(engine.eval_json(&expression).await.unwrap(), Scalar::from(100));
//!
//! // The same expression in array form.
//! let array = scalariq::implode_value(&expression).unwrap();
//! assert_eq!(engine.eval_json(&array).await.unwrap(), Scalar::from(100));
//! # });
//! # }
//! ```
mod arena;
mod calls;
mod engine;
mod error;
mod eval;
mod ir;
mod limits;
mod linearizer;
mod ops;
mod optimizer;
mod scalar;

pub use arena::{Arena, ArenaId};
pub use calls::{CallError, CallTable, HostCall, Lookup};
pub use engine::{Engine, EngineOptions};
pub use error::{Error, InnerError};
pub use eval::error::{ErrorKind, EvalError};
pub use eval::scope::Namespace;
pub use eval::{Evaluation, Evaluator};
pub use ir::{Ir, IrBuilder, IrError, Node, NodeId, Operands};
pub use limits::{ConfigError, Counter, EvaluationLimits, EvaluationStats, LIMITS_ENV_VAR, Limit};
pub use linearizer::{LinearizeError, explode, explode_value, implode, implode_value};
pub use ops::{Arity, OpCode, OpError, op_name, op_number};
pub use optimizer::{CheckReport, Optimizer, Warning};
pub use scalar::Scalar;

pub type ScalarResult = Result<Scalar, Error>;
