//! The built-in `json` module
//!
//! Injected into every execution context ahead of user modules:
//!
//! - `encode(value)` returns JSON text and throws on values JSON cannot hold
//!   (functions, symbols, big integers) and on self-referencing structures
//! - `decode(text)` returns the parsed value and throws on malformed input
//! - `array(...)` makes an explicit list, so `json.array()` encodes as `[]`

use std::collections::HashSet;

use rquickjs::function::Rest;
use rquickjs::{Array, Ctx, Exception, Function, IntoJs, Object, Type, Value as JsValue};
use sable_core::value::is_integral;

use crate::error::{GuestResultExt, ScriptResult};
use crate::module::{preload, Module};

/// Name scripts `require` the codec by.
pub const JSON_MODULE: &str = "json";

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonModule;

impl Module for JsonModule {
    fn name(&self) -> &str {
        JSON_MODULE
    }

    fn version(&self) -> &str {
        sable_core::VERSION
    }

    fn inject<'js>(&self, ctx: &Ctx<'js>) -> ScriptResult<()> {
        let load = Function::new(ctx.clone(), |ctx: Ctx<'js>| -> rquickjs::Result<Object<'js>> {
            let module = Object::new(ctx.clone())?;
            module.set(
                "encode",
                Function::new(ctx.clone(), |ctx: Ctx<'js>, value: JsValue<'js>| {
                    encode(&ctx, &value)
                })?
                .with_name("encode")?,
            )?;
            module.set(
                "decode",
                Function::new(ctx.clone(), |ctx: Ctx<'js>, text: String| decode(&ctx, &text))?
                    .with_name("decode")?,
            )?;
            module.set(
                "array",
                Function::new(ctx.clone(), |ctx: Ctx<'js>, items: Rest<JsValue<'js>>| {
                    array(&ctx, items.0)
                })?
                .with_name("array")?,
            )?;
            module.set("version", sable_core::VERSION)?;
            Ok(module)
        })
        .guest(ctx)?;

        preload(ctx, JSON_MODULE, load)
    }
}

fn encode<'js>(ctx: &Ctx<'js>, value: &JsValue<'js>) -> rquickjs::Result<String> {
    let mut path = HashSet::new();
    let json = to_json(value, &mut path).map_err(|msg| Exception::throw_message(ctx, &msg))?;
    serde_json::to_string(&json).map_err(|err| Exception::throw_message(ctx, &err.to_string()))
}

fn decode<'js>(ctx: &Ctx<'js>, text: &str) -> rquickjs::Result<JsValue<'js>> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|err| Exception::throw_message(ctx, &err.to_string()))?;
    from_json(ctx, &json)
}

fn array<'js>(ctx: &Ctx<'js>, items: Vec<JsValue<'js>>) -> rquickjs::Result<JsValue<'js>> {
    if let [only] = items.as_slice() {
        if only.is_array() {
            return Ok(only.clone());
        }
        if let Some(object) = only.as_object() {
            if only.type_of() == Type::Object && object.keys::<String>().next().is_none() {
                return Ok(Array::new(ctx.clone())?.into_value());
            }
        }
    }

    let list = Array::new(ctx.clone())?;
    for (i, item) in items.into_iter().enumerate() {
        list.set(i, item)?;
    }
    Ok(list.into_value())
}

// `path` holds the containers on the way down from the root. Meeting one of
// them again means the structure refers to itself.
fn to_json<'js>(
    value: &JsValue<'js>,
    path: &mut HashSet<Object<'js>>,
) -> Result<serde_json::Value, String> {
    use serde_json::Value as Json;

    match value.type_of() {
        Type::Undefined | Type::Null | Type::Uninitialized => Ok(Json::Null),
        Type::Bool => Ok(Json::Bool(value.as_bool().unwrap_or(false))),
        Type::Int => Ok(Json::from(value.as_int().unwrap_or(0))),
        Type::Float => {
            let n = value.as_float().unwrap_or(f64::NAN);
            if is_integral(n) {
                Ok(Json::from(n as i64))
            } else {
                Ok(serde_json::Number::from_f64(n)
                    .map(Json::Number)
                    .unwrap_or(Json::Null))
            }
        }
        Type::String => value
            .as_string()
            .and_then(|s| s.to_string().ok())
            .map(Json::String)
            .ok_or_else(|| "cannot encode invalid string to JSON".to_string()),
        Type::Array => {
            let Some(array) = value.as_array() else {
                return Ok(Json::Null);
            };
            let object = array.as_object().clone();
            if !path.insert(object.clone()) {
                return Err(nested());
            }
            let mut items = Vec::with_capacity(array.len());
            for item in array.iter::<JsValue>() {
                let item = item.map_err(|err| err.to_string())?;
                items.push(to_json(&item, path)?);
            }
            path.remove(&object);
            Ok(Json::Array(items))
        }
        Type::Object | Type::Exception => {
            let Some(object) = value.as_object() else {
                return Ok(Json::Null);
            };
            if !path.insert(object.clone()) {
                return Err(nested());
            }
            let mut map = serde_json::Map::new();
            for prop in object.props::<String, JsValue>() {
                let (key, item) = prop.map_err(|err| err.to_string())?;
                if item.is_undefined() {
                    continue;
                }
                map.insert(key, to_json(&item, path)?);
            }
            path.remove(object);
            Ok(Json::Object(map))
        }
        Type::Constructor | Type::Function => Err("cannot encode function to JSON".to_string()),
        other => Err(format!("cannot encode {} to JSON", other.as_str())),
    }
}

fn nested() -> String {
    "cannot encode recursively nested tables to JSON".to_string()
}

fn from_json<'js>(ctx: &Ctx<'js>, json: &serde_json::Value) -> rquickjs::Result<JsValue<'js>> {
    use serde_json::Value as Json;

    match json {
        Json::Null => Ok(JsValue::new_null(ctx.clone())),
        Json::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        Json::Number(n) => Ok(JsValue::new_number(ctx.clone(), n.as_f64().unwrap_or(f64::NAN))),
        Json::String(s) => s.as_str().into_js(ctx),
        Json::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, from_json(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        Json::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), from_json(ctx, item)?)?;
            }
            Ok(object.into_value())
        }
    }
}
