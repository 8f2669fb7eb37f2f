//! Typed extraction out of [`Value`]

use crate::value::{Table, Value, ValueType};

/// A host type that a [`Value`] of one declared kind can be unpacked into.
///
/// This is the closed set of parameter types native functions may declare.
pub trait FromValue: Sized {
    /// The kind a script must supply for this type.
    const TYPE: ValueType;

    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for Value {
    const TYPE: ValueType = ValueType::Value;

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FromValue for bool {
    const TYPE: ValueType = ValueType::Bool;

    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for f64 {
    const TYPE: ValueType = ValueType::Number;

    fn from_value(value: Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    const TYPE: ValueType = ValueType::String;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl FromValue for Table {
    const TYPE: ValueType = ValueType::Table;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }
}

// An empty table stands in for an empty list of any kind.
macro_rules! list_from_value {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl FromValue for $ty {
                const TYPE: ValueType = ValueType::$variant;

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        Value::Table(t) if t.is_empty() => Some(Vec::new()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

list_from_value!(
    Vec<bool> => Bools,
    Vec<f64> => Numbers,
    Vec<String> => Strings,
    Vec<Value> => Array
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_matching_kinds() {
        assert_eq!(f64::from_value(Value::Number(2.0)), Some(2.0));
        assert_eq!(String::from_value(Value::String("x".into())), Some("x".into()));
        assert_eq!(bool::from_value(Value::Number(1.0)), None);
        assert_eq!(<Vec<f64>>::from_value(Value::Numbers(vec![1.0])), Some(vec![1.0]));
    }

    #[test]
    fn empty_table_is_an_empty_list() {
        assert_eq!(<Vec<String>>::from_value(Value::Table(Table::new())), Some(vec![]));
        assert_eq!(<Vec<Value>>::from_value(Value::Table(Table::new())), Some(vec![]));
    }

    #[test]
    fn declared_kinds() {
        assert_eq!(<Vec<bool> as FromValue>::TYPE, ValueType::Bools);
        assert_eq!(<Value as FromValue>::TYPE, ValueType::Value);
        assert_eq!(<Table as FromValue>::TYPE, ValueType::Table);
    }
}
