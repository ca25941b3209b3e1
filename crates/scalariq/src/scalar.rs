use std::fmt;

use smol_str::SmolStr;

/// Largest magnitude at which every integral `f64` is exactly representable.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// The only kind of value an evaluation can produce.
///
/// A `Number` is always finite once it has passed validation; NaN and the
/// infinities are rejected as overflow wherever they would be produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scalar {
    #[default]
    Null,
    Number(f64),
    String(SmolStr),
    Boolean(bool),
}

impl Scalar {
    #[inline(always)]
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Returns `false` for non-finite numbers, `true` otherwise.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        match self {
            Scalar::Number(n) => n.is_finite(),
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The name reported by the `typeof` operator.
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Number(_) => "number",
            Scalar::String(_) => "string",
            Scalar::Boolean(_) => "boolean",
        }
    }

    /// Booleanizes a non-null scalar.
    ///
    /// Numbers are truthy when non-zero and strings when non-empty.
    /// `Null` has no truth value and yields `None`.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Scalar::Null => None,
            Scalar::Boolean(b) => Some(*b),
            Scalar::Number(n) => Some(*n != 0.0),
            Scalar::String(s) => Some(!s.is_empty()),
        }
    }

    /// Number of characters counted against the `strChars` limit.
    pub fn char_count(&self) -> usize {
        match self {
            Scalar::String(s) => s.chars().count(),
            _ => 0,
        }
    }

    /// Converts a JSON value into a scalar, or `None` if it is not one.
    pub fn from_json(value: &serde_json::Value) -> Option<Scalar> {
        match value {
            serde_json::Value::Null => Some(Scalar::Null),
            serde_json::Value::Bool(b) => Some(Scalar::Boolean(*b)),
            serde_json::Value::Number(n) => n.as_f64().filter(|n| n.is_finite()).map(Scalar::Number),
            serde_json::Value::String(s) => Some(Scalar::String(SmolStr::new(s))),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Converts the scalar into JSON.
    ///
    /// Integral numbers are written as JSON integers so that re-encoding a
    /// decoded document yields an identical value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Boolean(b) => serde_json::Value::Bool(*b),
            Scalar::String(s) => serde_json::Value::String(s.to_string()),
            Scalar::Number(n) => {
                if n.fract() == 0.0
                    && n.abs() <= MAX_SAFE_INTEGER
                    && !(*n == 0.0 && n.is_sign_negative())
                {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::String(s) => write!(f, "{:?}", s.as_str()),
            Scalar::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value as f64)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Number(value as f64)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(SmolStr::new(value))
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(SmolStr::from(value))
    }
}

impl From<SmolStr> for Scalar {
    fn from(value: SmolStr) -> Self {
        Scalar::String(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Scalar::Null)
    }
}
