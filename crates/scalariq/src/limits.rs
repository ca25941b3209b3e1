//! Evaluation limits and the statistics they are checked against.

use std::{env, str::FromStr, time::Duration};

use serde::Serialize;
use strum::IntoEnumIterator;
use thiserror::Error;

/// Environment variable holding a JSON limits configuration.
pub const LIMITS_ENV_VAR: &str = "SCALARIQ_LIMITS";

const EVALUATION_TIME_KEY: &str = "evaluationTime";
const CALL_TIME_KEY: &str = "callTime";

#[derive(Error, Debug, Clone, PartialEq, strum::IntoStaticStr)]
pub enum ConfigError {
    #[error("Invalid limits configuration")]
    InvalidLimits,
    #[error("Invalid limits configuration ({0})")]
    InvalidLimit(String),
    #[error("Invalid limits configuration: {0}")]
    InvalidJson(String),
    #[error("Invalid calls configuration (function name {0:?})")]
    InvalidCallName(String),
}

/// An evaluation counter that can be bounded.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::EnumString,
    strum::Display,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "camelCase")]
pub enum Counter {
    OpCount,
    ScopeCount,
    ScopeDepth,
    VarCount,
    StrCount,
    StrChars,
}

const COUNTERS: usize = 6;

/// A bound on one counter or time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    #[default]
    Unbounded,
    Bounded(u64),
}

impl Limit {
    /// A zero bound disables the check, like an explicit `Unbounded`.
    pub const fn new(bound: u64) -> Self {
        if bound == 0 {
            Limit::Unbounded
        } else {
            Limit::Bounded(bound)
        }
    }

    pub fn bound(self) -> Option<u64> {
        match self {
            Limit::Unbounded => None,
            Limit::Bounded(n) => Some(n),
        }
    }

    fn from_json(key: &str, value: &serde_json::Value) -> Result<Self, ConfigError> {
        match value {
            serde_json::Value::Null => Ok(Limit::Unbounded),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(Limit::new)
                .ok_or_else(|| ConfigError::InvalidLimit(key.to_string())),
            _ => Err(ConfigError::InvalidLimit(key.to_string())),
        }
    }
}

/// Bounds applied to one `evaluate()` call.
///
/// Time budgets are in milliseconds. The evaluation budget starts when
/// evaluation starts; the call budget applies to every single host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationLimits {
    counters: [Limit; COUNTERS],
    evaluation_time: Limit,
    call_time: Limit,
}

impl Default for EvaluationLimits {
    fn default() -> Self {
        let mut limits = Self::unlimited();
        limits.counters[Counter::OpCount as usize] = Limit::new(1000);
        limits.counters[Counter::ScopeCount as usize] = Limit::new(200);
        limits.counters[Counter::ScopeDepth as usize] = Limit::new(100);
        limits.counters[Counter::VarCount as usize] = Limit::new(200);
        limits.counters[Counter::StrChars as usize] = Limit::new(10_000);
        limits.evaluation_time = Limit::new(2000);
        limits.call_time = Limit::new(500);
        limits
    }
}

impl EvaluationLimits {
    /// No counter and no time budget is checked.
    pub fn unlimited() -> Self {
        Self {
            counters: [Limit::Unbounded; COUNTERS],
            evaluation_time: Limit::Unbounded,
            call_time: Limit::Unbounded,
        }
    }

    /// Applies `bound` to every counter; time budgets keep their defaults.
    pub fn global(bound: u64) -> Self {
        Self {
            counters: [Limit::new(bound); COUNTERS],
            ..Self::default()
        }
    }

    pub fn with(mut self, counter: Counter, limit: Limit) -> Self {
        self.counters[counter as usize] = limit;
        self
    }

    pub fn with_evaluation_time(mut self, limit: Limit) -> Self {
        self.evaluation_time = limit;
        self
    }

    pub fn with_call_time(mut self, limit: Limit) -> Self {
        self.call_time = limit;
        self
    }

    #[inline(always)]
    pub fn get(&self, counter: Counter) -> Limit {
        self.counters[counter as usize]
    }

    pub fn evaluation_budget(&self) -> Option<Duration> {
        self.evaluation_time.bound().map(Duration::from_millis)
    }

    pub fn call_budget(&self) -> Option<Duration> {
        self.call_time.bound().map(Duration::from_millis)
    }

    /// Reads [`LIMITS_ENV_VAR`]; unset means the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(LIMITS_ENV_VAR) {
            Ok(raw) => {
                let value = serde_json::from_str::<serde_json::Value>(&raw).map_err(|e| {
                    tracing::warn!("Invalid {} value '{}': {}", LIMITS_ENV_VAR, raw, e);
                    ConfigError::InvalidJson(e.to_string())
                })?;
                Self::try_from(&value).inspect_err(|e| {
                    tracing::warn!("Invalid {} value '{}': {}", LIMITS_ENV_VAR, raw, e);
                })
            }
            Err(_) => Ok(Self::default()),
        }
    }
}

/// `null` disables every limit, an integer is a global bound and an object
/// overrides individual defaults.
impl TryFrom<&serde_json::Value> for EvaluationLimits {
    type Error = ConfigError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(Self::unlimited()),
            serde_json::Value::Number(n) => n.as_u64().map(Self::global).ok_or(ConfigError::InvalidLimits),
            serde_json::Value::Object(entries) => {
                entries
                    .iter()
                    .try_fold(Self::default(), |limits, (key, value)| {
                        let limit = Limit::from_json(key, value)?;
                        match key.as_str() {
                            EVALUATION_TIME_KEY => Ok(limits.with_evaluation_time(limit)),
                            CALL_TIME_KEY => Ok(limits.with_call_time(limit)),
                            name => Counter::from_str(name)
                                .map(|counter| limits.with(counter, limit))
                                .map_err(|_| ConfigError::InvalidLimit(key.to_string())),
                        }
                    })
            }
            _ => Err(ConfigError::InvalidLimits),
        }
    }
}

/// Counters observed by one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationStats {
    pub op_count: u64,
    pub scope_count: u64,
    pub scope_depth_max: u64,
    pub var_count: u64,
    pub str_count: u64,
    pub str_chars: u64,
}

impl EvaluationStats {
    /// The observed value of `counter`; for `ScopeDepth` the deepest nesting reached.
    pub fn value(&self, counter: Counter) -> u64 {
        match counter {
            Counter::OpCount => self.op_count,
            Counter::ScopeCount => self.scope_count,
            Counter::ScopeDepth => self.scope_depth_max,
            Counter::VarCount => self.var_count,
            Counter::StrCount => self.str_count,
            Counter::StrChars => self.str_chars,
        }
    }
}

/// Live counters of a running evaluation.
#[derive(Debug, Clone, Default)]
pub(crate) struct Meter {
    pub stats: EvaluationStats,
    pub scope_depth: u64,
}

impl Meter {
    /// Like [`EvaluationStats::value`], but `ScopeDepth` is the current depth.
    pub fn value(&self, counter: Counter) -> u64 {
        match counter {
            Counter::ScopeDepth => self.scope_depth,
            _ => self.stats.value(counter),
        }
    }

    /// Returns the first counter above its bound as `(counter, value, bound)`.
    pub fn first_exceeded(&self, limits: &EvaluationLimits) -> Option<(Counter, u64, u64)> {
        Counter::iter().find_map(|counter| {
            let value = self.value(counter);
            limits
                .get(counter)
                .bound()
                .filter(|bound| value > *bound)
                .map(|bound| (counter, value, bound))
        })
    }

    pub fn declare_variable(&mut self) {
        self.stats.var_count += 1;
    }

    pub fn enter_scope(&mut self) {
        self.stats.scope_count += 1;
        self.scope_depth += 1;
        self.stats.scope_depth_max = self.stats.scope_depth_max.max(self.scope_depth);
    }

    pub fn exit_scope(&mut self) {
        self.scope_depth = self.scope_depth.saturating_sub(1);
    }
}
