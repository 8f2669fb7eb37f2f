//! Native function binding
//!
//! Turns host closures into guest-callable functions. A host function may take
//! any number of parameters drawn from the boundary kinds (`bool`, `f64`,
//! `String`, `Value`, the three homogeneous lists, `Table`, `Vec<Value>`) and
//! returns either `Result<(), E>` or `Result<T, E>` with `T` from the same
//! set. The error's `Display` text is what the guest sees.
//!
//! Statically typed closures go through [`Binder::bind`]; their shape is
//! checked by the compiler. Signatures assembled at runtime go through
//! [`Binder::bind_dynamic`] and are validated when bound.
//!
//! Everything that can be decided once is decided at bind time: each
//! parameter gets a decoding strategy and a handful of very common shapes get a
//! dedicated fast path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Value as JsValue};
use sable_core::value::format_number;
use sable_core::{FromValue, Table, Value, ValueType};

use crate::convert::{from_guest, to_guest};
use crate::error::{ScriptError, ScriptResult};

/// Type-erased host function. Arguments arrive already decoded to the
/// declared kinds.
pub type NativeFn = dyn Fn(Vec<Value>) -> Result<Value, String> + Send + Sync;

/// Parameter and return kinds of a native function.
///
/// `ret: None` means the function only reports an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Vec<ValueType>,
    ret: Option<ValueType>,
}

impl Signature {
    pub fn new(params: Vec<ValueType>, ret: Option<ValueType>) -> Self {
        Self { params, ret }
    }

    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    pub fn ret(&self) -> Option<ValueType> {
        self.ret
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    fn validate(&self, name: &str) -> ScriptResult<()> {
        let invalid = |reason: String| ScriptError::InvalidSignature {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("function name is empty".to_string()));
        }
        if let Some(i) = self.params.iter().position(|p| *p == ValueType::Nil) {
            return Err(invalid(format!("parameter {} has unsupported type nil", i + 1)));
        }
        if self.ret == Some(ValueType::Nil) {
            return Err(invalid("return type nil is not supported".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", p)?;
        }
        match self.ret {
            Some(ret) => write!(f, ") -> {}", ret),
            None => f.write_str(") -> ()"),
        }
    }
}

/// The success half of a native function's result.
pub trait IntoReturn {
    /// `None` for functions that only report an error.
    const TYPE: Option<ValueType>;

    fn into_return(self) -> Value;
}

impl IntoReturn for () {
    const TYPE: Option<ValueType> = None;

    fn into_return(self) -> Value {
        Value::Nil
    }
}

macro_rules! into_return {
    ($($ty:ty => $kind:ident),*) => {
        $(
            impl IntoReturn for $ty {
                const TYPE: Option<ValueType> = Some(ValueType::$kind);

                fn into_return(self) -> Value {
                    Value::from(self)
                }
            }
        )*
    };
}

into_return!(
    bool => Bool,
    f64 => Number,
    String => String,
    Vec<bool> => Bools,
    Vec<f64> => Numbers,
    Vec<String> => Strings,
    Vec<Value> => Array
);

impl IntoReturn for Value {
    const TYPE: Option<ValueType> = Some(ValueType::Value);

    fn into_return(self) -> Value {
        self
    }
}

impl IntoReturn for Table {
    const TYPE: Option<ValueType> = Some(ValueType::Table);

    fn into_return(self) -> Value {
        Value::Table(self)
    }
}

/// A host closure with a statically known signature.
///
/// Implemented for `Fn(A1, .., An) -> Result<R, E>` up to eight parameters.
pub trait IntoNative<Args>: Send + Sync + 'static {
    fn signature() -> Signature;

    fn into_native(self) -> Arc<NativeFn>;
}

macro_rules! into_native {
    ($($arg:ident $var:ident),*) => {
        impl<F, R, E, $($arg,)*> IntoNative<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Result<R, E> + Send + Sync + 'static,
            R: IntoReturn,
            E: fmt::Display,
            $($arg: FromValue + 'static,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($arg::TYPE),*], R::TYPE)
            }

            #[allow(unused_mut, unused_variables)]
            fn into_native(self) -> Arc<NativeFn> {
                Arc::new(move |args: Vec<Value>| {
                    let mut args = args.into_iter();
                    $(
                        let $var = args
                            .next()
                            .and_then($arg::from_value)
                            .ok_or_else(|| format!("expected {} argument", $arg::TYPE))?;
                    )*
                    (self)($($var),*)
                        .map(IntoReturn::into_return)
                        .map_err(|err| err.to_string())
                })
            }
        }
    };
}

into_native!();
into_native!(A1 a1);
into_native!(A1 a1, A2 a2);
into_native!(A1 a1, A2 a2, A3 a3);
into_native!(A1 a1, A2 a2, A3 a3, A4 a4);
into_native!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
into_native!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
into_native!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
into_native!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

/// How one guest argument is turned into a host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Bool,
    /// Numbers, or strings that parse as numbers
    Number,
    /// Strings, or numbers formatted as text
    String,
    Any,
    Aggregate(ValueType),
}

impl Decode {
    fn for_type(ty: ValueType) -> Self {
        match ty {
            ValueType::Bool => Decode::Bool,
            ValueType::Number => Decode::Number,
            ValueType::String => Decode::String,
            ValueType::Value | ValueType::Nil => Decode::Any,
            aggregate => Decode::Aggregate(aggregate),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Decode::Bool => "boolean",
            Decode::Number => "number",
            Decode::String => "string",
            Decode::Any => "value",
            Decode::Aggregate(ty) => ty.as_str(),
        }
    }

    fn apply(self, value: &JsValue<'_>) -> Option<Value> {
        match self {
            Decode::Bool => value.as_bool().map(Value::Bool),
            Decode::Number => match value.as_number() {
                Some(n) => Some(Value::Number(n)),
                None => value
                    .as_string()
                    .and_then(|s| s.to_string().ok())
                    .and_then(|s| parse_number(&s))
                    .map(Value::Number),
            },
            Decode::String => match value.as_string() {
                Some(s) => s.to_string().ok().map(Value::String),
                None => value.as_number().map(|n| Value::String(format_number(n))),
            },
            Decode::Any => Some(from_guest(value)),
            Decode::Aggregate(ty) => {
                let decoded = from_guest(value);
                if !ty.accepts(&decoded) {
                    return None;
                }
                Some(match (ty, decoded) {
                    (ValueType::Bools, Value::Table(_)) => Value::Bools(Vec::new()),
                    (ValueType::Numbers, Value::Table(_)) => Value::Numbers(Vec::new()),
                    (ValueType::Strings, Value::Table(_)) => Value::Strings(Vec::new()),
                    (ValueType::Array, Value::Table(_)) => Value::Array(Vec::new()),
                    (_, decoded) => decoded,
                })
            }
        }
    }
}

/// Decimal text only: optional sign, digits with an optional fraction and
/// exponent. Spellings like `inf` or `NaN` that `f64::from_str` accepts are
/// refused.
fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let plain = text.bytes().any(|b| b.is_ascii_digit())
        && text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if plain {
        text.parse().ok()
    } else {
        None
    }
}

/// Specialised call shapes that skip the per-parameter strategy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FastPath {
    /// One scalar in, error only out
    Consume(Decode),
    /// Nothing in, one scalar out
    Produce(ValueType),
}

#[derive(Debug, Clone)]
enum Adapter {
    Fast(FastPath),
    Generic(Vec<Decode>),
}

/// Binds host functions, owning the table of fast-path shapes.
pub struct Binder {
    fast_paths: HashMap<Signature, FastPath>,
}

impl Binder {
    pub fn new() -> Self {
        let mut fast_paths = HashMap::new();
        for ty in [ValueType::String, ValueType::Number, ValueType::Bool] {
            fast_paths.insert(
                Signature::new(vec![ty], None),
                FastPath::Consume(Decode::for_type(ty)),
            );
            fast_paths.insert(Signature::new(vec![], Some(ty)), FastPath::Produce(ty));
        }
        Self { fast_paths }
    }

    /// Bind a statically typed host closure.
    pub fn bind<F, Args>(&self, name: &str, f: F) -> ScriptResult<BoundFunction>
    where
        F: IntoNative<Args>,
    {
        self.bind_native(name, F::signature(), f.into_native())
    }

    /// Bind a host closure whose signature is only known at runtime.
    ///
    /// The closure receives arguments already decoded to `signature`'s
    /// parameter kinds and must return a value of the declared return kind.
    pub fn bind_dynamic<F, E>(
        &self,
        name: &str,
        signature: Signature,
        f: F,
    ) -> ScriptResult<BoundFunction>
    where
        F: Fn(Vec<Value>) -> Result<Value, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let native: Arc<NativeFn> = Arc::new(move |args| f(args).map_err(|err| err.to_string()));
        self.bind_native(name, signature, native)
    }

    fn bind_native(
        &self,
        name: &str,
        signature: Signature,
        native: Arc<NativeFn>,
    ) -> ScriptResult<BoundFunction> {
        signature.validate(name)?;

        let adapter = match self.fast_paths.get(&signature) {
            Some(fast) => Adapter::Fast(*fast),
            None => Adapter::Generic(
                signature
                    .params()
                    .iter()
                    .map(|ty| Decode::for_type(*ty))
                    .collect(),
            ),
        };
        tracing::debug!("bound native function {}{}", name, signature);

        Ok(BoundFunction {
            name: Arc::from(name),
            signature,
            adapter,
            native,
        })
    }
}

impl Default for Binder {
    fn default() -> Self {
        Self::new()
    }
}

/// A host function ready to be exposed to scripts.
///
/// Cheap to clone; the closure is shared.
#[derive(Clone)]
pub struct BoundFunction {
    name: Arc<str>,
    signature: Signature,
    adapter: Adapter,
    native: Arc<NativeFn>,
}

impl fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFunction")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("adapter", &self.adapter)
            .finish()
    }
}

impl BoundFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_fast_path(&self) -> bool {
        matches!(self.adapter, Adapter::Fast(_))
    }

    /// Create the guest function object for this binding.
    pub fn to_function<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Function<'js>> {
        let bound = self.clone();
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| {
            bound.call(&ctx, args.0)
        })?
        .with_name(&*self.name)
    }

    fn call<'js>(&self, ctx: &Ctx<'js>, args: Vec<JsValue<'js>>) -> rquickjs::Result<JsValue<'js>> {
        let arity = self.signature.arity();
        if args.len() != arity {
            return Err(self.throw(
                ctx,
                format!(
                    "{} expects {} arguments, but got {}",
                    self.name,
                    arity,
                    args.len()
                ),
            ));
        }

        match &self.adapter {
            Adapter::Fast(FastPath::Consume(decode)) => {
                let arg = self.decode(ctx, *decode, 0, &args[0])?;
                match (self.native)(vec![arg]) {
                    Ok(_) => Ok(JsValue::new_undefined(ctx.clone())),
                    Err(message) => Err(self.throw(ctx, message)),
                }
            }
            Adapter::Fast(FastPath::Produce(ty)) => match (self.native)(Vec::new()) {
                Ok(value) if ty.accepts(&value) => to_guest(ctx, &value),
                Ok(value) => Err(self.wrong_return(ctx, &value)),
                Err(message) => Err(self.throw(ctx, message)),
            },
            Adapter::Generic(decoders) => {
                let mut decoded = Vec::with_capacity(arity);
                for (i, (decode, arg)) in decoders.iter().zip(args.iter()).enumerate() {
                    decoded.push(self.decode(ctx, *decode, i, arg)?);
                }
                let value = (self.native)(decoded).map_err(|message| self.throw(ctx, message))?;
                match self.signature.ret() {
                    None => Ok(JsValue::new_undefined(ctx.clone())),
                    Some(ty) if ty.accepts(&value) => to_guest(ctx, &value),
                    Some(_) => Err(self.wrong_return(ctx, &value)),
                }
            }
        }
    }

    fn decode(
        &self,
        ctx: &Ctx<'_>,
        decode: Decode,
        index: usize,
        arg: &JsValue<'_>,
    ) -> rquickjs::Result<Value> {
        decode.apply(arg).ok_or_else(|| {
            self.throw(
                ctx,
                format!(
                    "bad argument #{} to '{}' ({} expected, got {})",
                    index + 1,
                    self.name,
                    decode.expected(),
                    arg.type_name()
                ),
            )
        })
    }

    fn wrong_return(&self, ctx: &Ctx<'_>, value: &Value) -> rquickjs::Error {
        let expected = self.signature.ret().unwrap_or(ValueType::Nil);
        self.throw(
            ctx,
            format!("{} returned {}, expected {}", self.name, value.kind(), expected),
        )
    }

    fn throw(&self, ctx: &Ctx<'_>, message: String) -> rquickjs::Error {
        tracing::debug!("native function {} raised: {}", self.name, message);
        Exception::throw_message(ctx, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn with_function<R>(bound: &BoundFunction, f: impl FnOnce(&Ctx<'_>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let function = bound.to_function(&ctx).unwrap();
            ctx.globals().set(bound.name(), function).unwrap();
            f(&ctx)
        })
    }

    fn eval(ctx: &Ctx<'_>, src: &str) -> Result<Value, String> {
        ctx.eval::<JsValue, _>(src)
            .map(|v| from_guest(&v))
            .map_err(|err| ScriptError::caught(ctx, err).to_string())
    }

    #[test]
    fn typed_signatures_are_derived() {
        let binder = Binder::new();
        let sum = binder
            .bind("sum", |a: f64, b: f64| Ok::<_, String>(a + b))
            .unwrap();
        assert_eq!(
            sum.signature(),
            &Signature::new(vec![ValueType::Number, ValueType::Number], Some(ValueType::Number))
        );
        assert_eq!(sum.signature().to_string(), "(number, number) -> number");

        let log = binder
            .bind("log", |_: String| Ok::<_, String>(()))
            .unwrap();
        assert_eq!(log.signature().ret(), None);
    }

    #[test]
    fn fast_paths_are_selected_by_shape() {
        let binder = Binder::new();
        let consume = binder.bind("consume", |_: bool| Ok::<_, String>(())).unwrap();
        let produce = binder.bind("produce", || Ok::<_, String>(1.0)).unwrap();
        let generic = binder.bind("join", |_: Vec<String>| Ok::<_, String>(String::new())).unwrap();

        assert!(consume.is_fast_path());
        assert!(produce.is_fast_path());
        assert!(!generic.is_fast_path());
    }

    #[test]
    fn nil_is_rejected_in_dynamic_signatures() {
        let binder = Binder::new();
        let err = binder
            .bind_dynamic(
                "bad",
                Signature::new(vec![ValueType::Nil], None),
                |_| Ok::<_, String>(Value::Nil),
            )
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidSignature { .. }));

        let err = binder
            .bind_dynamic(
                "bad",
                Signature::new(vec![], Some(ValueType::Nil)),
                |_| Ok::<_, String>(Value::Nil),
            )
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidSignature { .. }));
    }

    #[test]
    fn calls_decode_and_encode() {
        let binder = Binder::new();
        let sum = binder
            .bind("sum", |a: f64, b: f64| Ok::<_, String>(a + b))
            .unwrap();
        with_function(&sum, |ctx| {
            assert_eq!(eval(ctx, "sum(2, 3)"), Ok(Value::Number(5.0)));
            assert_eq!(eval(ctx, "sum('2', 3)"), Ok(Value::Number(5.0)));
        });
    }

    #[test]
    fn arity_is_exact() {
        let binder = Binder::new();
        let sum = binder
            .bind("sum", |a: f64, b: f64| Ok::<_, String>(a + b))
            .unwrap();
        with_function(&sum, |ctx| {
            assert_eq!(
                eval(ctx, "sum(1)"),
                Err("sum expects 2 arguments, but got 1".to_string())
            );
            assert_eq!(
                eval(ctx, "sum(1, 2, 3)"),
                Err("sum expects 2 arguments, but got 3".to_string())
            );
        });
    }

    #[test]
    fn scalar_coercion() {
        let binder = Binder::new();
        let echo = binder
            .bind("echo", |s: String| Ok::<_, String>(s))
            .unwrap();
        with_function(&echo, |ctx| {
            assert_eq!(eval(ctx, "echo(12)"), Ok(Value::String("12".into())));
            assert!(eval(ctx, "echo(true)").is_err());
        });

        let not = binder.bind("not", |b: bool| Ok::<_, String>(!b)).unwrap();
        with_function(&not, |ctx| {
            assert_eq!(eval(ctx, "not(false)"), Ok(Value::Bool(true)));
            assert_eq!(
                eval(ctx, "not(1)"),
                Err("bad argument #1 to 'not' (boolean expected, got int)".to_string())
            );
        });

        let half = binder.bind("half", |n: f64| Ok::<_, String>(n / 2.0)).unwrap();
        with_function(&half, |ctx| {
            assert_eq!(eval(ctx, "half(' 12.5 ')"), Ok(Value::Number(6.25)));
            assert_eq!(eval(ctx, "half('-4e1')"), Ok(Value::Number(-20.0)));
            for text in ["inf", "NaN", "infinity", "", "0x10", "1,5"] {
                assert_eq!(
                    eval(ctx, &format!("half('{}')", text)),
                    Err("bad argument #1 to 'half' (number expected, got string)".to_string()),
                    "{}",
                    text
                );
            }
        });
    }

    #[test]
    fn numeric_text_is_decimal_only() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number("+1.5E2"), Some(150.0));
        assert_eq!(parse_number(".5"), Some(0.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("-Infinity"), None);
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("1e"), None);
    }

    #[test]
    fn host_errors_reach_the_guest_verbatim() {
        let binder = Binder::new();
        let fail = binder
            .bind("fail", |name: String| {
                Err::<(), _>(format!("error with input ({})", name))
            })
            .unwrap();
        with_function(&fail, |ctx| {
            assert_eq!(
                eval(ctx, "fail('roman')"),
                Err("error with input (roman)".to_string())
            );
            assert_eq!(
                eval(ctx, "try { fail('x') } catch (e) { e.message }"),
                Ok(Value::String("error with input (x)".into()))
            );
        });
    }

    #[test]
    fn aggregates_are_checked() {
        let binder = Binder::new();
        let join = binder
            .bind("join", |items: Vec<String>| Ok::<_, String>(items.join(", ")))
            .unwrap();
        with_function(&join, |ctx| {
            assert_eq!(
                eval(ctx, "join(['apples', 'oranges', 'watermelons'])"),
                Ok(Value::String("apples, oranges, watermelons".into()))
            );
            assert_eq!(eval(ctx, "join([])"), Ok(Value::String(String::new())));
            assert!(eval(ctx, "join([1, 2])").is_err());
        });
    }

    #[test]
    fn dynamic_return_kind_is_enforced() {
        let binder = Binder::new();
        let liar = binder
            .bind_dynamic(
                "liar",
                Signature::new(vec![ValueType::Number], Some(ValueType::String)),
                |_| Ok::<_, String>(Value::Number(1.0)),
            )
            .unwrap();
        with_function(&liar, |ctx| {
            assert_eq!(
                eval(ctx, "liar(1)"),
                Err("liar returned number, expected string".to_string())
            );
        });
    }

    #[test]
    fn error_only_functions_return_undefined() {
        let binder = Binder::new();
        let check = binder
            .bind("check", |n: f64| {
                if n > 0.0 {
                    Ok(())
                } else {
                    Err("throwing error")
                }
            })
            .unwrap();
        with_function(&check, |ctx| {
            assert_eq!(eval(ctx, "check(1)"), Ok(Value::Nil));
            assert_eq!(eval(ctx, "check(0)"), Err("throwing error".to_string()));
        });
    }
}
