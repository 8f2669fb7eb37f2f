//! Conversion between [`Value`] and guest values
//!
//! Host to guest is total and structural. Guest to host never fails: shapes
//! that have no `Value` counterpart (functions, symbols, cyclic references)
//! come back as `Nil`.
//!
//! Guest lists are classified by their first element only. A list whose first
//! element is a number decodes as `Numbers` and any later non-number is
//! dropped; a list with a missing first element decodes as a `Table` keyed by
//! index. This keeps decoding a single pass with no look-ahead.

use std::collections::HashSet;

use rquickjs::{Array, Ctx, Function, IntoJs, JsLifetime, Object, Type, Value as JsValue};
use sable_core::{Table, Value};

/// Build the guest representation of `value`.
///
/// `Nil` becomes `undefined`; `Nil` entries of a table are left out.
pub fn to_guest<'js>(ctx: &Ctx<'js>, value: &Value) -> rquickjs::Result<JsValue<'js>> {
    match value {
        Value::Table(table) => {
            let object = Object::new(ctx.clone())?;
            fill_object(ctx, &object, table)?;
            Ok(object.into_value())
        }
        Value::Bools(_) | Value::Numbers(_) | Value::Strings(_) | Value::Array(_) => {
            let array = Array::new(ctx.clone())?;
            fill_array(ctx, &array, value)?;
            Ok(array.into_value())
        }
        scalar => scalar_to_guest(ctx, scalar),
    }
}

fn scalar_to_guest<'js>(ctx: &Ctx<'js>, value: &Value) -> rquickjs::Result<JsValue<'js>> {
    match value {
        Value::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        Value::Number(n) => Ok(JsValue::new_number(ctx.clone(), *n)),
        Value::String(s) => s.as_str().into_js(ctx),
        _ => Ok(JsValue::new_undefined(ctx.clone())),
    }
}

fn fill_object<'js>(ctx: &Ctx<'js>, object: &Object<'js>, table: &Table) -> rquickjs::Result<()> {
    for (key, value) in table {
        if value.is_nil() {
            continue;
        }
        object.set(key.as_str(), to_guest(ctx, value)?)?;
    }
    Ok(())
}

fn fill_array<'js>(ctx: &Ctx<'js>, array: &Array<'js>, value: &Value) -> rquickjs::Result<()> {
    match value {
        Value::Bools(items) => {
            for (i, b) in items.iter().enumerate() {
                array.set(i, *b)?;
            }
        }
        Value::Numbers(items) => {
            for (i, n) in items.iter().enumerate() {
                array.set(i, JsValue::new_number(ctx.clone(), *n))?;
            }
        }
        Value::Strings(items) => {
            for (i, s) in items.iter().enumerate() {
                array.set(i, s.as_str())?;
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                array.set(i, to_guest(ctx, item)?)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Decode a guest value.
pub fn from_guest(value: &JsValue<'_>) -> Value {
    let mut path = HashSet::new();
    decode(value, &mut path)
}

// `path` holds the containers currently being decoded, by identity. A
// container that reaches itself decodes the back-reference as Nil; the same
// container appearing twice side by side decodes twice.
fn decode<'js>(value: &JsValue<'js>, path: &mut HashSet<Object<'js>>) -> Value {
    match value.type_of() {
        Type::Bool => value.as_bool().map(Value::Bool).unwrap_or(Value::Nil),
        Type::Int | Type::Float => value.as_number().map(Value::Number).unwrap_or(Value::Nil),
        Type::String => value
            .as_string()
            .and_then(|s| s.to_string().ok())
            .map(Value::String)
            .unwrap_or(Value::Nil),
        Type::Array => match value.as_array() {
            Some(array) => enter(array.as_object(), path, |path| decode_array(array, path)),
            None => Value::Nil,
        },
        Type::Object | Type::Exception => match value.as_object() {
            Some(object) => enter(object, path, |path| decode_object(object, path)),
            None => Value::Nil,
        },
        _ => Value::Nil,
    }
}

fn enter<'js>(
    object: &Object<'js>,
    path: &mut HashSet<Object<'js>>,
    f: impl FnOnce(&mut HashSet<Object<'js>>) -> Value,
) -> Value {
    if !path.insert(object.clone()) {
        return Value::Nil;
    }
    let value = f(path);
    path.remove(object);
    value
}

fn element<'js>(array: &Array<'js>, index: usize) -> Option<JsValue<'js>> {
    array.get::<Option<JsValue>>(index).ok().flatten()
}

fn decode_array<'js>(array: &Array<'js>, path: &mut HashSet<Object<'js>>) -> Value {
    let len = array.len();
    let first = match element(array, 0) {
        Some(first) => first,
        None => {
            let mut table = Table::new();
            for i in 0..len {
                if let Some(item) = element(array, i) {
                    let value = decode(&item, path);
                    if !value.is_nil() {
                        table.insert(i.to_string(), value);
                    }
                }
            }
            return Value::Table(table);
        }
    };

    let items = (0..len).filter_map(|i| element(array, i));
    match first.type_of() {
        Type::Int | Type::Float => Value::Numbers(items.filter_map(|v| v.as_number()).collect()),
        Type::Bool => Value::Bools(items.filter_map(|v| v.as_bool()).collect()),
        Type::String => Value::Strings(
            items
                .filter_map(|v| v.as_string().and_then(|s| s.to_string().ok()))
                .collect(),
        ),
        _ => Value::Array(
            (0..len)
                .map(|i| element(array, i).map_or(Value::Nil, |v| decode(&v, path)))
                .collect(),
        ),
    }
}

fn decode_object<'js>(object: &Object<'js>, path: &mut HashSet<Object<'js>>) -> Value {
    let mut table = Table::new();
    for prop in object.props::<String, JsValue>() {
        match prop {
            Ok((key, value)) => {
                let value = decode(&value, path);
                if !value.is_nil() {
                    table.insert(key, value);
                }
            }
            Err(_) => {
                // A throwing getter leaves its exception pending.
                object.ctx().catch();
            }
        }
    }
    Value::Table(table)
}

/// Empties a lent container and reports whether it is back to a fresh
/// state: extensible, default prototype, no own keys left (symbols and
/// non-enumerable ones included) and, for arrays, a writable zero length.
/// Intrinsics are captured when the scratch list is created.
const RESET: &str = r#"
'use strict';
(function () {
    const ownKeys = Reflect.ownKeys;
    const deleteProperty = Reflect.deleteProperty;
    const getPrototypeOf = Reflect.getPrototypeOf;
    const isExtensible = Object.isExtensible;
    const describe = Object.getOwnPropertyDescriptor;
    const isArray = Array.isArray;
    const arrayProto = Array.prototype;
    const objectProto = Object.prototype;

    return function reset(target) {
        const array = isArray(target);
        if (!isExtensible(target)) return false;
        if (getPrototypeOf(target) !== (array ? arrayProto : objectProto)) return false;
        try {
            if (array) {
                const length = describe(target, 'length');
                if (!length || !length.writable) return false;
                target.length = 0;
            }
            const keys = ownKeys(target);
            for (let i = 0; i < keys.length; i++) {
                if (array && keys[i] === 'length') continue;
                if (!deleteProperty(target, keys[i])) return false;
            }
        } catch (e) {
            return false;
        }
        return ownKeys(target).length === (array ? 1 : 0) && (!array || target.length === 0);
    };
})()
"#;

/// Reusable argument containers for one execution context.
///
/// Top-level aggregate arguments are built into recycled arrays and objects.
/// Everything lent out during a call is reset by [`reclaim`] and kept, up to
/// `capacity` containers of each kind, only if the reset leaves it pristine.
///
/// [`reclaim`]: Scratch::reclaim
#[derive(JsLifetime)]
pub(crate) struct Scratch<'js> {
    reset: Function<'js>,
    arrays: Vec<Array<'js>>,
    objects: Vec<Object<'js>>,
    lent_arrays: Vec<Array<'js>>,
    lent_objects: Vec<Object<'js>>,
    capacity: usize,
}

impl<'js> Scratch<'js> {
    /// Create before any guest code runs in `ctx`.
    pub fn new(ctx: &Ctx<'js>, capacity: usize) -> rquickjs::Result<Self> {
        Ok(Self {
            reset: ctx.eval(RESET)?,
            arrays: Vec::new(),
            objects: Vec::new(),
            lent_arrays: Vec::new(),
            lent_objects: Vec::new(),
            capacity,
        })
    }

    /// Convert call arguments, drawing aggregate containers from the free-list.
    pub fn args(&mut self, ctx: &Ctx<'js>, args: &[Value]) -> rquickjs::Result<Vec<JsValue<'js>>> {
        args.iter().map(|arg| self.arg(ctx, arg)).collect()
    }

    fn arg(&mut self, ctx: &Ctx<'js>, value: &Value) -> rquickjs::Result<JsValue<'js>> {
        match value {
            Value::Table(table) => {
                let object = match self.objects.pop() {
                    Some(object) => object,
                    None => Object::new(ctx.clone())?,
                };
                self.lent_objects.push(object.clone());
                fill_object(ctx, &object, table)?;
                Ok(object.into_value())
            }
            Value::Bools(_) | Value::Numbers(_) | Value::Strings(_) | Value::Array(_) => {
                let array = match self.arrays.pop() {
                    Some(array) => array,
                    None => Array::new(ctx.clone())?,
                };
                self.lent_arrays.push(array.clone());
                fill_array(ctx, &array, value)?;
                Ok(array.into_value())
            }
            scalar => scalar_to_guest(ctx, scalar),
        }
    }

    /// Reset everything lent out since the last reclaim. Containers the guest
    /// altered beyond their own keys are dropped instead of kept.
    pub fn reclaim(&mut self) {
        for array in std::mem::take(&mut self.lent_arrays) {
            if self.arrays.len() < self.capacity && self.restore(array.as_object()) {
                self.arrays.push(array);
            }
        }
        for object in std::mem::take(&mut self.lent_objects) {
            if self.objects.len() < self.capacity && self.restore(&object) {
                self.objects.push(object);
            }
        }
    }

    fn restore(&self, container: &Object<'js>) -> bool {
        match self.reset.call::<_, bool>((container.clone(),)) {
            Ok(pristine) => pristine,
            Err(_) => {
                // Interrupted or out of memory; leave nothing pending.
                container.ctx().catch();
                false
            }
        }
    }

    pub fn pooled(&self) -> usize {
        self.arrays.len() + self.objects.len()
    }
}
