use std::{
    fmt,
    sync::{Arc, atomic::AtomicBool},
};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use smol_str::SmolStr;
use thiserror::Error;

use super::error::EvalError;
use crate::{ir::NodeId, scalar::Scalar};

pub type Params = SmallVec<[SmolStr; 4]>;

/// Constants and lambdas are resolved independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Constant,
    Lambda,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Constant => write!(f, "constant"),
            Namespace::Lambda => write!(f, "lambda"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ScopeError {
    #[error("Duplicate {1} name \"{0}\"")]
    Duplicate(SmolStr, Namespace),
}

impl ScopeError {
    pub fn to_eval_error(&self, node: NodeId) -> EvalError {
        match self {
            ScopeError::Duplicate(name, namespace) => EvalError::DuplicateName {
                node,
                name: name.clone(),
                namespace: *namespace,
            },
        }
    }
}

/// A lambda slot.
///
/// `busy` is set while the lambda body runs; clones share the flag.
#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Params,
    pub body: NodeId,
    pub busy: Arc<AtomicBool>,
}

impl Lambda {
    pub fn new(params: Params, body: NodeId) -> Self {
        Self {
            params,
            body,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    constants: FxHashMap<SmolStr, Scalar>,
    lambdas: FxHashMap<SmolStr, Lambda>,
}

impl Frame {
    pub fn define_constant(&mut self, name: SmolStr, value: Scalar) -> Result<(), ScopeError> {
        if self.constants.contains_key(&name) {
            return Err(ScopeError::Duplicate(name, Namespace::Constant));
        }
        self.constants.insert(name, value);
        Ok(())
    }

    pub fn define_lambda(&mut self, name: SmolStr, lambda: Lambda) -> Result<(), ScopeError> {
        if self.lambdas.contains_key(&name) {
            return Err(ScopeError::Duplicate(name, Namespace::Lambda));
        }
        self.lambdas.insert(name, lambda);
        Ok(())
    }
}

/// The stack of active frames, innermost last.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    #[inline(always)]
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn resolve_constant(&self, name: &str) -> Option<&Scalar> {
        self.frames.iter().rev().find_map(|frame| frame.constants.get(name))
    }

    /// Returns the lambda with the index of the frame declaring it.
    pub fn resolve_lambda(&self, name: &str) -> Option<(usize, &Lambda)> {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, frame)| frame.lambdas.get(name).map(|lambda| (index, lambda)))
    }

    /// Detaches every frame above `depth`, so that only the first `depth`
    /// frames stay visible until [`ScopeStack::restore`].
    pub fn hide_above(&mut self, depth: usize) -> Vec<Frame> {
        self.frames.split_off(depth.min(self.frames.len()))
    }

    pub fn restore(&mut self, hidden: Vec<Frame>) {
        self.frames.extend(hidden);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(constants: &[(&str, i64)]) -> Frame {
        let mut frame = Frame::default();
        for (name, value) in constants {
            frame
                .define_constant(SmolStr::new(name), Scalar::from(*value))
                .unwrap();
        }
        frame
    }

    #[test]
    fn test_innermost_wins() {
        let mut scopes = ScopeStack::default();
        scopes.push(frame(&[("x", 1), ("y", 2)]));
        scopes.push(frame(&[("x", 3)]));

        assert_eq!(scopes.resolve_constant("x"), Some(&Scalar::from(3)));
        assert_eq!(scopes.resolve_constant("y"), Some(&Scalar::from(2)));
        assert_eq!(scopes.resolve_constant("z"), None);

        scopes.pop();
        assert_eq!(scopes.resolve_constant("x"), Some(&Scalar::from(1)));
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let mut f = frame(&[("f", 1)]);
        f.define_lambda(SmolStr::new("f"), Lambda::new(Params::new(), 0usize.into()))
            .unwrap();
        assert_eq!(
            f.define_lambda(SmolStr::new("f"), Lambda::new(Params::new(), 0usize.into())),
            Err(ScopeError::Duplicate(SmolStr::new("f"), Namespace::Lambda))
        );
        assert_eq!(
            f.define_constant(SmolStr::new("f"), Scalar::Null),
            Err(ScopeError::Duplicate(SmolStr::new("f"), Namespace::Constant))
        );

        let mut scopes = ScopeStack::default();
        scopes.push(f);
        assert!(scopes.resolve_lambda("f").is_some());
        assert!(scopes.resolve_constant("f").is_some());
    }

    #[test]
    fn test_hide_and_restore() {
        let mut scopes = ScopeStack::default();
        let mut outer = frame(&[("x", 1)]);
        outer
            .define_lambda(SmolStr::new("f"), Lambda::new(Params::new(), 0usize.into()))
            .unwrap();
        scopes.push(outer);
        scopes.push(frame(&[("x", 2)]));

        let (index, _) = scopes.resolve_lambda("f").unwrap();
        assert_eq!(index, 0);

        let hidden = scopes.hide_above(index + 1);
        assert_eq!(hidden.len(), 1);
        assert_eq!(scopes.resolve_constant("x"), Some(&Scalar::from(1)));

        scopes.restore(hidden);
        assert_eq!(scopes.resolve_constant("x"), Some(&Scalar::from(2)));
    }
}
