//! Host data into [`Value`]
//!
//! Ordinary host types convert through `From`. Anything else that implements
//! `Serialize` goes through [`Value::from_serialize`], which takes a detour
//! through JSON and lands on `Nil` when that fails.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::{Table, Value};

macro_rules! from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }

            impl From<Vec<$ty>> for Value {
                fn from(v: Vec<$ty>) -> Self {
                    Value::Numbers(v.into_iter().map(|n| n as f64).collect())
                }
            }

            impl From<&[$ty]> for Value {
                fn from(v: &[$ty]) -> Self {
                    Value::Numbers(v.iter().map(|n| *n as f64).collect())
                }
            }
        )*
    };
}

from_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::Bools(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Strings(v)
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::Strings(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Nil)
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Value {
    fn from(map: HashMap<String, V>) -> Self {
        Value::Table(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(map: BTreeMap<String, V>) -> Self {
        Value::Table(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<Vec<HashMap<String, V>>> for Value {
    fn from(v: Vec<HashMap<String, V>>) -> Self {
        Value::Array(v.into_iter().map(Value::from).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Nil),
            Json::String(s) => Value::String(s),
            Json::Array(items) => from_json_array(items),
            Json::Object(map) => Value::Table(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .filter(|(_, v)| !v.is_nil())
                    .collect(),
            ),
        }
    }
}

/// Lists are classified by their first element; later elements of another
/// kind are dropped.
fn from_json_array(items: Vec<serde_json::Value>) -> Value {
    use serde_json::Value as Json;

    match items.first() {
        None | Some(Json::Null) => {
            let mut table = Table::new();
            for (i, item) in items.into_iter().enumerate() {
                let value = Value::from(item);
                if !value.is_nil() {
                    table.insert(i.to_string(), value);
                }
            }
            Value::Table(table)
        }
        Some(Json::Number(_)) => Value::Numbers(
            items
                .iter()
                .filter_map(serde_json::Value::as_f64)
                .collect(),
        ),
        Some(Json::String(_)) => Value::Strings(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Json::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        Some(Json::Bool(_)) => Value::Bools(
            items
                .iter()
                .filter_map(serde_json::Value::as_bool)
                .collect(),
        ),
        Some(Json::Array(_)) | Some(Json::Object(_)) => {
            Value::Array(items.into_iter().map(Value::from).collect())
        }
    }
}

impl Value {
    /// Convert any serializable host value by way of its JSON form.
    ///
    /// Serialization failures produce `Nil`.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Value {
        match serde_json::to_value(value) {
            Ok(json) => Value::from(json),
            Err(err) => {
                tracing::debug!("value fallback conversion failed: {}", err);
                Value::Nil
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.native().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Person {
        #[serde(rename = "Name")]
        name: String,
    }

    #[test]
    fn numbers_of_every_width() {
        assert_eq!(Value::from(5u8), Value::Number(5.0));
        assert_eq!(Value::from(-3i64), Value::Number(-3.0));
        assert_eq!(Value::from(1.5f32), Value::Number(1.5));
        assert_eq!(Value::from(vec![1u16, 2, 3]), Value::Numbers(vec![1.0, 2.0, 3.0]));
        assert_eq!(Value::from(&[0.5f64][..]), Value::Numbers(vec![0.5]));
    }

    #[test]
    fn homogeneous_lists() {
        assert_eq!(Value::from(vec![true, false]), Value::Bools(vec![true, false]));
        assert_eq!(
            Value::from(vec!["apples", "oranges"]),
            Value::Strings(vec!["apples".into(), "oranges".into()])
        );
    }

    #[test]
    fn maps_become_tables() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), vec![1.0, 2.0]);
        map.insert("b".to_string(), vec![3.0]);

        let value = Value::from(map);
        assert_eq!(value.get("a"), Some(&Value::Numbers(vec![1.0, 2.0])));
        assert_eq!(value.get("b"), Some(&Value::Numbers(vec![3.0])));
    }

    #[test]
    fn optional_values() {
        assert_eq!(Value::from(None::<f64>), Value::Nil);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }

    #[test]
    fn serialize_fallback_for_structs() {
        let value = Value::from_serialize(&Person { name: "Roman".into() });
        assert_eq!(value.get("Name"), Some(&Value::String("Roman".into())));
    }

    #[test]
    fn json_arrays_follow_first_element() {
        let value = Value::from(serde_json::json!([1, "two", 3]));
        assert_eq!(value, Value::Numbers(vec![1.0, 3.0]));

        let value = Value::from(serde_json::json!(["a", 1, "b"]));
        assert_eq!(value, Value::Strings(vec!["a".into(), "b".into()]));

        let value = Value::from(serde_json::json!([]));
        assert_eq!(value, Value::Table(Table::new()));

        let value = Value::from(serde_json::json!([null, 7]));
        let mut expected = Table::new();
        expected.insert("1".into(), Value::Number(7.0));
        assert_eq!(value, Value::Table(expected));

        let value = Value::from(serde_json::json!([{"a": 1}, [true]]));
        assert!(matches!(value, Value::Array(ref items) if items.len() == 2));
    }

    #[test]
    fn serde_round_trip_keeps_shape() {
        let mut table = Table::new();
        table.insert("d".into(), Value::Bool(true));
        table.insert("n".into(), Value::Numbers(vec![1.0, 2.5]));
        let value = Value::Table(table);

        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"d":true,"n":[1,2.5]}"#);

        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}
