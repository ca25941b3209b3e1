//! The op-tree intermediate representation.
//!
//! A tree is stored in an [`Arena`] and children are referenced by [`NodeId`],
//! so an [`Ir`] is a plain owned value that can be cloned, shared read-only
//! between evaluations and rebuilt by the optimizer.
//!
//! The JSON tree form is `Scalar | { "op": "<name>", "operands": [...] }`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    arena::{Arena, ArenaId},
    ops::{OpCode, OpError},
    scalar::Scalar,
};

pub type NodeId = ArenaId<Node>;
pub type Operands = SmallVec<[NodeId; 4]>;

#[derive(Error, Debug, Clone, PartialEq, strum::IntoStaticStr)]
pub enum IrError {
    #[error("Invalid node at {path}: {reason}")]
    InvalidNode { path: String, reason: &'static str },
    #[error(transparent)]
    Op(#[from] OpError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Op { op: OpCode, operands: Operands },
}

impl Node {
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            Node::Op { .. } => None,
        }
    }

    pub fn op(&self) -> Option<OpCode> {
        match self {
            Node::Scalar(_) => None,
            Node::Op { op, .. } => Some(*op),
        }
    }

    pub fn operands(&self) -> &[NodeId] {
        match self {
            Node::Scalar(_) => &[],
            Node::Op { operands, .. } => operands,
        }
    }
}

/// An immutable op-tree.
#[derive(Debug, Clone)]
pub struct Ir {
    nodes: Arena<Node>,
    root: NodeId,
}

impl Ir {
    pub fn builder() -> IrBuilder {
        IrBuilder::default()
    }

    /// A tree consisting of a single scalar leaf.
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        let mut builder = IrBuilder::default();
        let root = builder.scalar(value);
        builder.finish(root)
    }

    #[inline(always)]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline(always)]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Number of nodes, scalars included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the literal string held by `id`, if it is a string leaf.
    pub fn literal_str(&self, id: NodeId) -> Option<&str> {
        self.node(id).as_scalar().and_then(Scalar::as_str)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, IrError> {
        let mut builder = IrBuilder::default();
        let root = builder.json_node(value, &mut String::from("$"))?;
        Ok(builder.finish(root))
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.node_to_json(self.root)
    }

    fn node_to_json(&self, id: NodeId) -> serde_json::Value {
        match self.node(id) {
            Node::Scalar(s) => s.to_json(),
            Node::Op { op, operands } => serde_json::json!({
                "op": op.name(),
                "operands": operands
                    .iter()
                    .map(|operand| self.node_to_json(*operand))
                    .collect::<Vec<_>>(),
            }),
        }
    }

    /// Compares the subtree at `a` with the subtree at `b` in `other`.
    pub fn subtree_eq(&self, a: NodeId, other: &Ir, b: NodeId) -> bool {
        match (self.node(a), other.node(b)) {
            (Node::Scalar(x), Node::Scalar(y)) => x == y,
            (
                Node::Op {
                    op: op_a,
                    operands: operands_a,
                },
                Node::Op {
                    op: op_b,
                    operands: operands_b,
                },
            ) => {
                op_a == op_b
                    && operands_a.len() == operands_b.len()
                    && operands_a
                        .iter()
                        .zip(operands_b.iter())
                        .all(|(x, y)| self.subtree_eq(*x, other, *y))
            }
            _ => false,
        }
    }

    fn fmt_node(&self, id: NodeId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node(id) {
            Node::Scalar(s) => write!(f, "{}", s),
            Node::Op { op, operands } => {
                write!(f, "{}(", op)?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.fmt_node(*operand, f)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Structural equality: node ids and arena layout are ignored.
impl PartialEq for Ir {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }
}

impl fmt::Display for Ir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(self.root, f)
    }
}

impl Serialize for Ir {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ir {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ir::from_json(&value).map_err(de::Error::custom)
    }
}

/// Incrementally allocates nodes bottom-up and seals them into an [`Ir`].
#[derive(Debug, Default)]
pub struct IrBuilder {
    nodes: Arena<Node>,
}

impl IrBuilder {
    pub fn scalar(&mut self, value: impl Into<Scalar>) -> NodeId {
        self.nodes.alloc(Node::Scalar(value.into()))
    }

    pub fn op(&mut self, op: OpCode, operands: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.nodes.alloc(Node::Op {
            op,
            operands: operands.into_iter().collect(),
        })
    }

    #[inline(always)]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Deep-copies the subtree rooted at `id` in `source` into this builder.
    pub fn copy_subtree(&mut self, source: &Ir, id: NodeId) -> NodeId {
        match source.node(id) {
            Node::Scalar(s) => self.scalar(s.clone()),
            Node::Op { op, operands } => {
                let copied = operands
                    .iter()
                    .map(|operand| self.copy_subtree(source, *operand))
                    .collect::<Operands>();
                self.op(*op, copied)
            }
        }
    }

    pub fn finish(self, root: NodeId) -> Ir {
        Ir {
            nodes: self.nodes,
            root,
        }
    }

    fn json_node(&mut self, value: &serde_json::Value, path: &mut String) -> Result<NodeId, IrError> {
        if let Some(scalar) = Scalar::from_json(value) {
            return Ok(self.scalar(scalar));
        }

        let object = match value {
            serde_json::Value::Object(object) => object,
            serde_json::Value::Number(_) => return Err(invalid(path, "non-finite number")),
            _ => return Err(invalid(path, "expected a scalar or an {op, operands} object")),
        };

        let op = match object.get("op") {
            Some(serde_json::Value::String(name)) => OpCode::from_name(name)?,
            _ => return Err(invalid(path, "missing or invalid op")),
        };

        let operands = match object.get("operands").or_else(|| object.get("av")) {
            Some(serde_json::Value::Array(items)) => items.as_slice(),
            None | Some(serde_json::Value::Null) => &[],
            Some(_) => return Err(invalid(path, "operands must be an array")),
        };

        let mut ids = Operands::with_capacity(operands.len());
        for (i, operand) in operands.iter().enumerate() {
            let len = path.len();
            path.push_str(&format!(".operands[{}]", i));
            ids.push(self.json_node(operand, path)?);
            path.truncate(len);
        }

        Ok(self.op(op, ids))
    }
}

fn invalid(path: &str, reason: &'static str) -> IrError {
    IrError::InvalidNode {
        path: path.to_string(),
        reason,
    }
}
