// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::Error;

/// Runtime value produced and consumed by the evaluator.
///
/// Besides the ordinary data shapes this union carries two evaluator-internal
/// sentinels: [`MissingRef`], an unresolved reference chain that remembers how
/// to print itself literally, and [`DotChain`], a chain that continued past a
/// primitive and degrades to accumulated literal text. Arithmetic,
/// comparison and truthiness treat `MissingRef` like `Null`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Callable(Callable),
    MissingRef(MissingRef),
    DotChain(DotChain),
}

/// A numeric value with its display tag. Numbers written with a decimal
/// point or exponent, or produced by float-producing operations, keep a
/// trailing `.0` when whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Number {
    pub value: f64,
    pub float: bool,
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
impl Number {
    pub fn int(value: i64) -> Self {
        Self {
            value: value as f64,
            float: false,
        }
    }

    pub fn float(value: f64) -> Self {
        Self { value, float: true }
    }

    pub fn display(&self) -> String {
        if self.float {
            if self.value.is_finite() && self.value.fract() == 0.0 {
                format!("{:.1}", self.value)
            } else {
                format!("{}", self.value)
            }
        } else {
            format!("{}", self.value as i64)
        }
    }
}

/// Unresolved reference chain; `text` is the literal source form
/// (`$name`, `$name.prop`, ...) and `quiet` suppresses that fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRef {
    pub text: String,
    pub quiet: bool,
}

/// A chain that resolved to a primitive and then kept going; remembers the
/// primitive's rendering plus the literal remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotChain {
    pub text: String,
}

/// Callable value: provider methods, the synthetic `.size` accessor and the
/// loop object's `stop()` all take this shape. Single-threaded by design,
/// hence `Rc`.
#[derive(Clone)]
pub struct Callable {
    func: Rc<dyn Fn(&[Value]) -> Result<Value, Error>>,
}

impl Callable {
    pub fn new(func: impl Fn(&[Value]) -> Result<Value, Error> + 'static) -> Self {
        Self {
            func: Rc::new(func),
        }
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, Error> {
        (self.func)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callable")
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl Value {
    pub fn int(value: i64) -> Self {
        Value::Number(Number::int(value))
    }

    pub fn float(value: f64) -> Self {
        Value::Number(Number::float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn missing(text: impl Into<String>, quiet: bool) -> Self {
        Value::MissingRef(MissingRef {
            text: text.into(),
            quiet,
        })
    }

    pub fn chain(text: impl Into<String>) -> Self {
        Value::DotChain(DotChain { text: text.into() })
    }

    /// The string a bare interpolation of this value appends to the output.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.display(),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Map(_) => {
                serde_json::to_string(&self.to_json()).unwrap_or_default()
            }
            Value::Callable(_) => String::new(),
            Value::MissingRef(missing) => {
                if missing.quiet {
                    String::new()
                } else {
                    missing.text.clone()
                }
            }
            Value::DotChain(chain) => chain.text.clone(),
        }
    }

    /// Converts into the `serde_json` value used for structured-data output.
    /// Callables and sentinels have no data representation and become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Callable(_) | Value::MissingRef(_) | Value::DotChain(_) => {
                serde_json::Value::Null
            }
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if !n.float && n.value.is_finite() {
                    #[allow(clippy::cast_possible_truncation)]
                    let as_int = n.value as i64;
                    serde_json::Value::Number(serde_json::Number::from(as_int))
                } else {
                    serde_json::Number::from_f64(n.value)
                        .map_or(serde_json::Value::Null, serde_json::Value::Number)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map {
                    object.insert(key.clone(), value.to_json());
                }
                serde_json::Value::Object(object)
            }
        }
    }

    /// Builds an engine value from untyped JSON input data.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::int(i)
                } else {
                    Value::float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(object) => {
                let mut map = IndexMap::new();
                for (key, value) in object {
                    map.insert(key.clone(), Value::from_json(value));
                }
                Value::Map(map)
            }
        }
    }
}

/// Truthiness: null-likes, `false`, zero, NaN and empty containers/strings
/// are false; everything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::MissingRef(_) => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.value != 0.0 && !n.value.is_nan(),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Map(map) => !map.is_empty(),
        Value::Callable(_) => true,
        Value::DotChain(chain) => !chain.text.is_empty(),
    }
}

/// Numeric coercion used by arithmetic: null-likes are 0, booleans 0/1,
/// unparsable strings NaN.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null | Value::MissingRef(_) => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.value,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::DotChain(chain) => chain.text.trim().parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Map(_) | Value::Callable(_) => f64::NAN,
    }
}

/// Whether the operand is float-tagged for result-tag propagation.
pub fn is_float_tagged(value: &Value) -> bool {
    matches!(value, Value::Number(n) if n.float)
}

/// Loose equality: numbers and numeric strings compare by value, containers
/// structurally, null-likes only equal each other.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null | Value::MissingRef(_), Value::Null | Value::MissingRef(_)) => true,
        (Value::Null | Value::MissingRef(_), _) | (_, Value::Null | Value::MissingRef(_)) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a.value == b.value,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::DotChain(a), Value::String(b)) | (Value::String(b), Value::DotChain(a)) => {
            &a.text == b
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| loose_eq(v, other)))
        }
        (Value::Callable(a), Value::Callable(b)) => a == b,
        _ => {
            // mixed scalar types fall back to numeric comparison
            let a = to_number(left);
            let b = to_number(right);
            !a.is_nan() && !b.is_nan() && a == b
        }
    }
}

/// Loose ordering for the relational operators. Numbers (and anything
/// coercible) compare numerically, strings lexicographically; incomparable
/// operands yield `None` and the comparison is false.
pub fn loose_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Some(a.cmp(b));
    }
    let a = to_number(left);
    let b = to_number(right);
    if a.is_nan() || b.is_nan() {
        None
    } else {
        a.partial_cmp(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_numbers_display_without_decimal() {
        assert_eq!(Value::int(14).display_string(), "14");
        assert_eq!(Value::float(3.0).display_string(), "3.0");
        assert_eq!(Value::float(2.5).display_string(), "2.5");
    }

    #[test]
    fn truthiness_matches_reference_rules() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&Value::Bool(false)));
        assert!(!is_truthy(&Value::int(0)));
        assert!(!is_truthy(&Value::float(f64::NAN)));
        assert!(!is_truthy(&Value::string("")));
        assert!(!is_truthy(&Value::Array(Vec::new())));
        assert!(!is_truthy(&Value::Map(IndexMap::new())));
        assert!(!is_truthy(&Value::missing("$gone", false)));
        assert!(is_truthy(&Value::string("0")));
        assert!(is_truthy(&Value::int(7)));
        assert!(is_truthy(&Value::string("x")));
    }

    #[test]
    fn missing_ref_behaves_like_null_in_comparisons() {
        assert!(loose_eq(&Value::missing("$a", false), &Value::Null));
        assert!(!loose_eq(&Value::missing("$a", false), &Value::int(0)));
        assert_eq!(to_number(&Value::missing("$a", false)), 0.0);
    }

    #[test]
    fn numeric_strings_compare_by_value() {
        assert!(loose_eq(&Value::string("5"), &Value::int(5)));
        assert_eq!(
            loose_cmp(&Value::string("2"), &Value::int(10)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn strings_compare_lexicographically() {
        assert_eq!(
            loose_cmp(&Value::string("apple"), &Value::string("banana")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn containers_compare_structurally() {
        let a = Value::Array(vec![Value::int(1), Value::string("x")]);
        let b = Value::Array(vec![Value::int(1), Value::string("x")]);
        assert!(loose_eq(&a, &b));
    }

    #[test]
    fn json_roundtrip_preserves_number_tags() {
        let json = serde_json::json!({"count": 3, "ratio": 0.5});
        let value = Value::from_json(&json);
        let Value::Map(map) = &value else {
            panic!("expected map");
        };
        assert!(matches!(map["count"], Value::Number(n) if !n.float));
        assert!(matches!(map["ratio"], Value::Number(n) if n.float));
    }

    #[test]
    fn quiet_missing_ref_displays_as_empty() {
        assert_eq!(Value::missing("$gone", true).display_string(), "");
        assert_eq!(Value::missing("$gone", false).display_string(), "$gone");
    }
}
