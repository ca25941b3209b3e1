//! Host call contract and call tables.

use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use thiserror::Error;

use crate::{limits::ConfigError, scalar::Scalar};

#[derive(Error, Debug, Clone, PartialEq, strum::IntoStaticStr)]
pub enum CallError {
    #[error("{0}")]
    Failed(String),
    #[error("Invalid arguments")]
    InvalidArguments,
}

/// A named scalar function callable from expressions.
///
/// Implementations receive already evaluated arguments in call order. A
/// returned `Scalar::Number` must be finite.
#[async_trait]
pub trait HostCall: Send + Sync {
    async fn call(&self, args: Vec<Scalar>) -> Result<Scalar, CallError>;
}

struct SyncFn<F>(F);

#[async_trait]
impl<F> HostCall for SyncFn<F>
where
    F: Fn(Vec<Scalar>) -> Result<Scalar, CallError> + Send + Sync,
{
    async fn call(&self, args: Vec<Scalar>) -> Result<Scalar, CallError> {
        (self.0)(args)
    }
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> HostCall for AsyncFn<F>
where
    F: Fn(Vec<Scalar>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Scalar, CallError>> + Send + 'static,
{
    async fn call(&self, args: Vec<Scalar>) -> Result<Scalar, CallError> {
        (self.0)(args).await
    }
}

struct Constant(Scalar);

#[async_trait]
impl HostCall for Constant {
    async fn call(&self, args: Vec<Scalar>) -> Result<Scalar, CallError> {
        if args.is_empty() {
            Ok(self.0.clone())
        } else {
            Err(CallError::InvalidArguments)
        }
    }
}

/// Name to host call mapping.
///
/// Cloning is cheap: entries are reference counted, so one table can back
/// many concurrent evaluations.
#[derive(Clone, Default)]
pub struct CallTable {
    calls: FxHashMap<SmolStr, Arc<dyn HostCall>>,
}

impl fmt::Debug for CallTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, call: impl HostCall + 'static) -> Result<(), ConfigError> {
        self.insert_shared(name, Arc::new(call))
    }

    pub fn insert_shared(&mut self, name: &str, call: Arc<dyn HostCall>) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::InvalidCallName(name.to_string()));
        }
        self.calls.insert(SmolStr::new(name), call);
        Ok(())
    }

    pub fn insert_fn<F>(&mut self, name: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(Vec<Scalar>) -> Result<Scalar, CallError> + Send + Sync + 'static,
    {
        self.insert(name, SyncFn(f))
    }

    pub fn insert_async<F, Fut>(&mut self, name: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(Vec<Scalar>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Scalar, CallError>> + Send + 'static,
    {
        self.insert(name, AsyncFn(f))
    }

    /// Registers a constant, callable with zero arguments.
    pub fn insert_constant(&mut self, name: &str, value: impl Into<Scalar>) -> Result<(), ConfigError> {
        self.insert(name, Constant(value.into()))
    }

    pub fn with_fn<F>(mut self, name: &str, f: F) -> Result<Self, ConfigError>
    where
        F: Fn(Vec<Scalar>) -> Result<Scalar, CallError> + Send + Sync + 'static,
    {
        self.insert_fn(name, f)?;
        Ok(self)
    }

    pub fn with_constant(mut self, name: &str, value: impl Into<Scalar>) -> Result<Self, ConfigError> {
        self.insert_constant(name, value)?;
        Ok(self)
    }

    #[inline(always)]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn HostCall>> {
        self.calls.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.calls.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.calls.keys().map(SmolStr::as_str).sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Adds every entry of `other`, replacing entries with the same name.
    pub fn extend(&mut self, other: &CallTable) {
        self.calls
            .extend(other.calls.iter().map(|(name, call)| (name.clone(), Arc::clone(call))));
    }
}

/// Resolves names against a per-evaluation table first, then the defaults.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MergedCalls<'a> {
    pub overrides: Option<&'a CallTable>,
    pub defaults: &'a CallTable,
}

impl<'a> MergedCalls<'a> {
    pub fn get(&self, name: &str) -> Option<&'a Arc<dyn HostCall>> {
        self.overrides
            .and_then(|table| table.get(name))
            .or_else(|| self.defaults.get(name))
    }
}

/// A host call answering from a shared name to scalar map.
///
/// Called with a single string argument it returns the stored value, or
/// `null` when the name is unknown or the argument is not a string.
#[derive(Debug, Clone, Default)]
pub struct Lookup {
    values: Arc<RwLock<FxHashMap<SmolStr, Scalar>>>,
}

impl Lookup {
    pub fn new<K: Into<SmolStr>>(entries: impl IntoIterator<Item = (K, Scalar)>) -> Self {
        let lookup = Self::default();
        lookup.append(entries);
        lookup
    }

    /// Merges `entries`; a `null` or non-finite value removes the name.
    pub fn append<K: Into<SmolStr>>(&self, entries: impl IntoIterator<Item = (K, Scalar)>) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        Self::merge(&mut values, entries);
    }

    /// Replaces all entries.
    pub fn set<K: Into<SmolStr>>(&self, entries: impl IntoIterator<Item = (K, Scalar)>) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.clear();
        Self::merge(&mut values, entries);
    }

    fn merge<K: Into<SmolStr>>(
        values: &mut FxHashMap<SmolStr, Scalar>,
        entries: impl IntoIterator<Item = (K, Scalar)>,
    ) {
        for (name, value) in entries {
            let name = name.into();
            if value.is_null() || !value.is_valid() {
                values.remove(&name);
            } else {
                values.insert(name, value);
            }
        }
    }
}

#[async_trait]
impl HostCall for Lookup {
    async fn call(&self, args: Vec<Scalar>) -> Result<Scalar, CallError> {
        match args.as_slice() {
            [Scalar::String(name)] => Ok(self
                .values
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned()
                .unwrap_or_default()),
            [_] => Ok(Scalar::Null),
            _ => Err(CallError::InvalidArguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn table() -> CallTable {
        let mut table = CallTable::new();
        table
            .insert_fn("len", |args| match args.as_slice() {
                [Scalar::String(s)] => Ok(Scalar::Number(s.chars().count() as f64)),
                _ => Err(CallError::InvalidArguments),
            })
            .unwrap();
        table
            .insert_async("echo", |args: Vec<Scalar>| async move {
                Ok(args.into_iter().next().unwrap_or_default())
            })
            .unwrap();
        table.insert_constant("answer", 42).unwrap();
        table
    }

    #[tokio::test]
    async fn test_call_kinds() {
        let table = table();
        assert_eq!(table.names(), vec!["answer", "echo", "len"]);

        let len = table.get("len").unwrap();
        assert_eq!(len.call(vec!["abc".into()]).await, Ok(Scalar::Number(3.0)));
        assert_eq!(len.call(vec![]).await, Err(CallError::InvalidArguments));

        let echo = table.get("echo").unwrap();
        assert_eq!(echo.call(vec![true.into()]).await, Ok(Scalar::Boolean(true)));

        let answer = table.get("answer").unwrap();
        assert_eq!(answer.call(vec![]).await, Ok(Scalar::Number(42.0)));
        assert_eq!(answer.call(vec![1.into()]).await, Err(CallError::InvalidArguments));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert_eq!(
            CallTable::new().with_constant("", 1).unwrap_err(),
            ConfigError::InvalidCallName(String::new())
        );
    }

    #[test]
    fn test_merged_calls_prefer_overrides() {
        let defaults = table();
        let overrides = CallTable::new().with_constant("answer", 7).unwrap();
        let merged = MergedCalls {
            overrides: Some(&overrides),
            defaults: &defaults,
        };

        assert!(Arc::ptr_eq(merged.get("answer").unwrap(), overrides.get("answer").unwrap()));
        assert!(Arc::ptr_eq(merged.get("len").unwrap(), defaults.get("len").unwrap()));
        assert!(merged.get("missing").is_none());
    }

    #[rstest]
    #[case::known(vec![Scalar::from("one")], Ok(Scalar::Number(1.0)))]
    #[case::string_value(vec![Scalar::from("dog")], Ok(Scalar::from("lazy")))]
    #[case::unknown(vec![Scalar::from("nope")], Ok(Scalar::Null))]
    #[case::not_a_string(vec![Scalar::Number(1.0)], Ok(Scalar::Null))]
    #[case::no_args(vec![], Err(CallError::InvalidArguments))]
    #[tokio::test]
    async fn test_lookup(#[case] args: Vec<Scalar>, #[case] expected: Result<Scalar, CallError>) {
        let lookup = Lookup::new([("one", Scalar::from(1)), ("dog", Scalar::from("lazy"))]);
        assert_eq!(lookup.call(args).await, expected);
    }

    #[tokio::test]
    async fn test_lookup_append_and_set() {
        let lookup = Lookup::new([("a", Scalar::from(1))]);
        lookup.append([("b", Scalar::from(true)), ("a", Scalar::Null)]);
        assert_eq!(lookup.call(vec!["a".into()]).await, Ok(Scalar::Null));
        assert_eq!(lookup.call(vec!["b".into()]).await, Ok(Scalar::Boolean(true)));

        lookup.set([("c", Scalar::from("x"))]);
        assert_eq!(lookup.call(vec!["b".into()]).await, Ok(Scalar::Null));
        assert_eq!(lookup.call(vec!["c".into()]).await, Ok(Scalar::from("x")));
    }
}
