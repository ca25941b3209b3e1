//! Dense array encoding of op-trees.
//!
//! An op node is written as `[opNumber, ...operands]` and a scalar as
//! itself, so `{"op": "add", "operands": [1, 2]}` becomes `[1, 1, 2]`.

use serde_json::Value;
use thiserror::Error;

use crate::{
    ir::{Ir, IrBuilder, Node, NodeId, Operands},
    ops::{OpCode, OpError},
    scalar::Scalar,
};

#[derive(Error, Debug, Clone, PartialEq, strum::IntoStaticStr)]
pub enum LinearizeError {
    #[error("Invalid input at {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Op(#[from] OpError),
}

/// Encodes `ir` in array form.
pub fn implode(ir: &Ir) -> Value {
    implode_node(ir, ir.root())
}

fn implode_node(ir: &Ir, id: NodeId) -> Value {
    match ir.node(id) {
        Node::Scalar(s) => s.to_json(),
        Node::Op { op, operands } => Value::Array(
            std::iter::once(Value::from(op.id()))
                .chain(operands.iter().map(|operand| implode_node(ir, *operand)))
                .collect(),
        ),
    }
}

/// Decodes an array form document.
///
/// Tree form objects (`{op, operands}` or `{op, av}`) are accepted at any
/// depth as well, so mixed documents decode too.
pub fn explode(value: &Value) -> Result<Ir, LinearizeError> {
    let mut builder = Ir::builder();
    let root = explode_node(&mut builder, value, &mut String::from("$"))?;
    Ok(builder.finish(root))
}

/// Normalizes a tree or array form document into array form.
pub fn implode_value(value: &Value) -> Result<Value, LinearizeError> {
    explode(value).map(|ir| implode(&ir))
}

/// Normalizes a tree or array form document into tree form.
pub fn explode_value(value: &Value) -> Result<Value, LinearizeError> {
    explode(value).map(|ir| ir.to_json())
}

fn explode_node(builder: &mut IrBuilder, value: &Value, path: &mut String) -> Result<NodeId, LinearizeError> {
    if let Some(scalar) = Scalar::from_json(value) {
        return Ok(builder.scalar(scalar));
    }

    let (op, operands, field) = match value {
        Value::Array(items) => match items.split_first() {
            Some((Value::Number(number), operands)) => {
                let id = number
                    .as_u64()
                    .ok_or_else(|| LinearizeError::InvalidInput(path.clone()))?;
                (OpCode::from_id(id)?, operands, "")
            }
            _ => return Err(LinearizeError::InvalidInput(path.clone())),
        },
        Value::Object(object) => {
            let op = match object.get("op") {
                Some(Value::String(name)) => OpCode::from_name(name)?,
                _ => return Err(LinearizeError::InvalidInput(path.clone())),
            };
            let operands = match object.get("operands").or_else(|| object.get("av")) {
                Some(Value::Array(items)) => items.as_slice(),
                None | Some(Value::Null) => &[],
                Some(_) => return Err(LinearizeError::InvalidInput(path.clone())),
            };
            (op, operands, ".operands")
        }
        _ => return Err(LinearizeError::InvalidInput(path.clone())),
    };

    let offset = usize::from(field.is_empty());
    let mut ids = Operands::with_capacity(operands.len());
    for (i, operand) in operands.iter().enumerate() {
        let len = path.len();
        path.push_str(&format!("{}[{}]", field, i + offset));
        ids.push(explode_node(builder, operand, path)?);
        path.truncate(len);
    }

    Ok(builder.op(op, ids))
}
