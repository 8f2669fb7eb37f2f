//! The boundary value model
//!
//! Every argument passed into a script and every result coming back out is a
//! [`Value`]. The set of variants is closed: homogeneous lists get their own
//! variants so the common cases (a list of numbers, a list of names) don't pay
//! for per-element boxing.

use std::collections::HashMap;
use std::fmt;

/// String-keyed map of values.
pub type Table = HashMap<String, Value>;

/// A value crossing the script boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Bools(Vec<bool>),
    Numbers(Vec<f64>),
    Strings(Vec<String>),
    Table(Table),
    Array(Vec<Value>),
}

/// Kind tag for a [`Value`].
///
/// `ValueType::Value` is not the kind of any concrete value; it stands for
/// "any value" in native function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Nil,
    Bool,
    Number,
    String,
    Bools,
    Numbers,
    Strings,
    Table,
    Array,
    Value,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Nil => "nil",
            ValueType::Bool => "bool",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Bools => "bools",
            ValueType::Numbers => "numbers",
            ValueType::Strings => "strings",
            ValueType::Table => "table",
            ValueType::Array => "array",
            ValueType::Value => "value",
        }
    }

    /// True for the list and map kinds.
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            ValueType::Bools
                | ValueType::Numbers
                | ValueType::Strings
                | ValueType::Table
                | ValueType::Array
        )
    }

    /// Whether a value of kind `actual` satisfies this declared kind.
    ///
    /// An empty table satisfies every aggregate kind: the guest cannot tell an
    /// empty list from an empty map.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueType::Value => true,
            ty if ty.is_aggregate() => value.kind() == ty || value.is_empty_table(),
            ty => value.kind() == ty,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    pub fn kind(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Bools(_) => ValueType::Bools,
            Value::Numbers(_) => ValueType::Numbers,
            Value::Strings(_) => ValueType::Strings,
            Value::Table(_) => ValueType::Table,
            Value::Array(_) => ValueType::Array,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_empty_table(&self) -> bool {
        matches!(self, Value::Table(t) if t.is_empty())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Look up a key when this value is a table.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_table().and_then(|t| t.get(key))
    }

    /// Plain host data for this value.
    ///
    /// Integral numbers come out as JSON integers, non-finite numbers as
    /// `null`, tables as objects with sorted keys.
    pub fn native(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Nil => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Bools(v) => Json::Array(v.iter().map(|b| Json::Bool(*b)).collect()),
            Value::Numbers(v) => Json::Array(v.iter().map(|n| number_to_json(*n)).collect()),
            Value::Strings(v) => Json::Array(v.iter().map(|s| Json::String(s.clone())).collect()),
            Value::Table(t) => Json::Object(
                t.iter()
                    .map(|(k, v)| (k.clone(), v.native()))
                    .collect(),
            ),
            Value::Array(v) => Json::Array(v.iter().map(Value::native).collect()),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if is_integral(n) {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// True when `n` is a whole number that survives a trip through `i64`.
pub fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15
}

/// Format a number the way scripts print it: `89`, `10.15`, `NaN`, `-Infinity`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if is_integral(n) {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn write_list<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    mut each: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    f.write_str("]")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("(nil)"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Bools(v) => write_list(f, v, |f, b| write!(f, "{}", b)),
            Value::Numbers(v) => write_list(f, v, |f, n| f.write_str(&format_number(*n))),
            Value::Strings(v) => write_list(f, v, |f, s| f.write_str(s)),
            Value::Array(v) => write_list(f, v, |f, item| write!(f, "{}", item)),
            Value::Table(t) => {
                let mut keys: Vec<&String> = t.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, t[key])?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_script_printing() {
        assert_eq!(Value::Nil.to_string(), "(nil)");
        assert_eq!(Value::Number(89.0).to_string(), "89");
        assert_eq!(Value::Number(10.15).to_string(), "10.15");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(
            Value::Strings(vec!["a".into(), "b".into()]).to_string(),
            "[a, b]"
        );

        let mut table = Table::new();
        table.insert("b".into(), Value::Number(2.0));
        table.insert("a".into(), Value::Number(1.0));
        assert_eq!(Value::Table(table).to_string(), "{a: 1, b: 2}");
    }

    #[test]
    fn kinds_and_acceptance() {
        assert_eq!(Value::Numbers(vec![1.0]).kind(), ValueType::Numbers);
        assert!(ValueType::Numbers.accepts(&Value::Numbers(vec![])));
        assert!(ValueType::Numbers.accepts(&Value::Table(Table::new())));
        assert!(!ValueType::Numbers.accepts(&Value::Strings(vec![])));
        assert!(ValueType::Value.accepts(&Value::Nil));
        assert!(!ValueType::Number.accepts(&Value::String("1".into())));
    }

    #[test]
    fn native_unwraps_recursively() {
        let mut inner = Table::new();
        inner.insert("Name".into(), Value::String("Roman".into()));
        let mut table = Table::new();
        table.insert("a".into(), Value::Number(123.0));
        table.insert("c".into(), Value::Number(10.15));
        table.insert("e".into(), Value::Table(inner));

        let native = Value::Table(table).native();
        assert_eq!(
            native.to_string(),
            r#"{"a":123,"c":10.15,"e":{"Name":"Roman"}}"#
        );
    }

    #[test]
    fn native_is_idempotent() {
        let value = Value::Array(vec![
            Value::Numbers(vec![1.0, 2.5]),
            Value::Strings(vec!["x".into()]),
            Value::Nil,
        ]);
        assert_eq!(value.native(), value.native());
        assert_eq!(Value::Number(f64::INFINITY).native(), serde_json::Value::Null);
    }
}
