//! Modules scripts can `require`
//!
//! Every execution context carries a small loader: a global `require(name)`
//! and a namespace object `__loader` with two tables, `preload` (name to
//! loader function) and `loaded` (name to materialised module). Injecting a
//! module registers its loader; the first `require` runs it and caches the
//! result for the lifetime of the context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rquickjs::{Ctx, Exception, Function, Object, Value as JsValue};

use crate::binder::{Binder, BoundFunction, IntoNative, Signature};
use crate::error::{GuestResultExt, ScriptError, ScriptResult};
use crate::runtime::{check_syntax, wrap_body};

/// Global holding the loader namespace.
pub const LOADER: &str = "__loader";

/// Something that can be made requestable inside an execution context.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Register this module's loader in `ctx`.
    fn inject<'js>(&self, ctx: &Ctx<'js>) -> ScriptResult<()>;
}

/// Install `require` and the loader namespace.
pub(crate) fn install_loader<'js>(ctx: &Ctx<'js>) -> ScriptResult<()> {
    let namespace = Object::new(ctx.clone()).guest(ctx)?;
    namespace
        .set("preload", Object::new(ctx.clone()).guest(ctx)?)
        .guest(ctx)?;
    namespace
        .set("loaded", Object::new(ctx.clone()).guest(ctx)?)
        .guest(ctx)?;
    ctx.globals().set(LOADER, namespace).guest(ctx)?;

    let require = Function::new(ctx.clone(), |ctx: Ctx<'js>, name: String| require(&ctx, &name))
        .and_then(|f| f.with_name("require"))
        .guest(ctx)?;
    ctx.globals().set("require", require).guest(ctx)
}

fn require<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<JsValue<'js>> {
    let namespace: Object = ctx.globals().get(LOADER)?;
    let loaded: Object = namespace.get("loaded")?;
    let cached: JsValue = loaded.get(name)?;
    if !cached.is_undefined() {
        return Ok(cached);
    }

    let preload: Object = namespace.get("preload")?;
    let load: JsValue = preload.get(name)?;
    let Some(load) = load.into_function() else {
        return Err(Exception::throw_message(
            ctx,
            &format!("module '{}' not found", name),
        ));
    };

    let module: JsValue = load.call((name,))?;
    loaded.set(name, module.clone())?;
    Ok(module)
}

/// Register `load` as the loader for `name`.
///
/// Fails when the loader namespace is missing or has been replaced by
/// something that is not an object.
pub fn preload<'js>(ctx: &Ctx<'js>, name: &str, load: Function<'js>) -> ScriptResult<()> {
    let missing = || {
        ScriptError::InvalidState(format!(
            "cannot inject module '{}': loader namespace is not available",
            name
        ))
    };

    let namespace: JsValue = ctx.globals().get(LOADER).guest(ctx)?;
    let namespace = namespace.into_object().ok_or_else(missing)?;
    let table: JsValue = namespace.get("preload").guest(ctx)?;
    let table = match table.into_object() {
        Some(table) if !table.is_function() && !table.is_array() => table,
        _ => return Err(missing()),
    };
    table.set(name, load).guest(ctx)
}

/// A module of host functions.
///
/// Registration is safe from any thread. Contexts pick up the functions
/// registered at the time they are built, so changes reach a running script
/// on its next `update`.
pub struct NativeModule {
    name: String,
    version: String,
    binder: Arc<Binder>,
    functions: Mutex<HashMap<String, BoundFunction>>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_binder(name, version, Arc::new(Binder::new()))
    }

    /// Share one binder between several modules.
    pub fn with_binder(
        name: impl Into<String>,
        version: impl Into<String>,
        binder: Arc<Binder>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            binder,
            functions: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) a statically typed host function.
    pub fn register<F, Args>(&self, name: &str, f: F) -> ScriptResult<()>
    where
        F: IntoNative<Args>,
    {
        let bound = self.binder.bind(name, f)?;
        self.insert(bound);
        Ok(())
    }

    /// Register (or replace) a host function with a runtime signature.
    pub fn register_dynamic<F, E>(&self, name: &str, signature: Signature, f: F) -> ScriptResult<()>
    where
        F: Fn(Vec<sable_core::Value>) -> Result<sable_core::Value, E> + Send + Sync + 'static,
        E: std::fmt::Display,
    {
        let bound = self.binder.bind_dynamic(name, signature, f)?;
        self.insert(bound);
        Ok(())
    }

    /// Remove a function; absent names are ignored.
    pub fn unregister(&self, name: &str) {
        if self.lock().remove(name).is_some() {
            tracing::debug!("module {}: unregistered {}", self.name, name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered function names, sorted.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn insert(&self, bound: BoundFunction) {
        tracing::debug!("module {}: registered {}", self.name, bound.name());
        self.lock().insert(bound.name().to_string(), bound);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BoundFunction>> {
        self.functions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Module for NativeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn inject<'js>(&self, ctx: &Ctx<'js>) -> ScriptResult<()> {
        let functions: Vec<BoundFunction> = self.lock().values().cloned().collect();
        let version = self.version.clone();

        let load = Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<Object<'js>> {
            let module = Object::new(ctx.clone())?;
            for function in &functions {
                module.set(function.name(), function.to_function(&ctx)?)?;
            }
            module.set("version", version.as_str())?;
            Ok(module)
        })
        .guest(ctx)?;

        preload(ctx, &self.name, load)
    }
}

/// A module written as guest source.
///
/// The source is a function body whose `return` value becomes the module:
///
/// ```text
/// function square(x) { return x * x }
/// return { square }
/// ```
///
/// Modules listed in `requires` are injected first, so the body may
/// `require` them.
pub struct ScriptModule {
    name: String,
    version: String,
    source: Arc<str>,
    requires: Vec<Arc<dyn Module>>,
}

impl ScriptModule {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        source: &str,
        requires: Vec<Arc<dyn Module>>,
    ) -> ScriptResult<Self> {
        let name = name.into();
        check_syntax(&name, &wrap_body(source))?;
        Ok(Self {
            name,
            version: version.into(),
            source: Arc::from(source),
            requires,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Module for ScriptModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn inject<'js>(&self, ctx: &Ctx<'js>) -> ScriptResult<()> {
        for module in &self.requires {
            module.inject(ctx)?;
        }

        let load: Function = ctx.eval(wrap_body(&self.source)).guest(ctx)?;
        preload(ctx, &self.name, load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::from_guest;
    use rquickjs::{Context, Runtime};
    use sable_core::Value;

    fn with_loader<R>(f: impl FnOnce(&Ctx<'_>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            install_loader(&ctx).unwrap();
            f(&ctx)
        })
    }

    fn eval(ctx: &Ctx<'_>, src: &str) -> ScriptResult<Value> {
        ctx.eval::<JsValue, _>(src)
            .map(|v| from_guest(&v))
            .guest(ctx)
    }

    #[test]
    fn register_and_unregister() {
        let module = NativeModule::new("test", "1.0.0");
        module
            .register("sum", |a: f64, b: f64| Ok::<_, String>(a + b))
            .unwrap();
        assert_eq!(module.len(), 1);
        assert!(module.contains("sum"));

        module.unregister("sum");
        assert_eq!(module.len(), 0);
        module.unregister("missing");
        assert!(module.is_empty());
    }

    #[test]
    fn last_registration_wins() {
        let module = NativeModule::new("test", "1.0.0");
        module.register("f", || Ok::<_, String>(1.0)).unwrap();
        module.register("f", || Ok::<_, String>(2.0)).unwrap();
        assert_eq!(module.function_names(), vec!["f".to_string()]);

        with_loader(|ctx| {
            module.inject(ctx).unwrap();
            assert_eq!(eval(ctx, "require('test').f()").unwrap(), Value::Number(2.0));
        });
    }

    #[test]
    fn invalid_signatures_are_rejected() {
        let module = NativeModule::new("test", "1.0.0");
        let err = module
            .register_dynamic(
                "bad",
                Signature::new(vec![sable_core::ValueType::Nil], None),
                |_| Ok::<_, String>(Value::Nil),
            )
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidSignature { .. }));
        assert!(module.is_empty());
    }

    #[test]
    fn required_modules_expose_functions_and_version() {
        let module = NativeModule::new("strings", "1.2.3");
        module
            .register("upper", |s: String| Ok::<_, String>(s.to_uppercase()))
            .unwrap();

        with_loader(|ctx| {
            module.inject(ctx).unwrap();
            assert_eq!(
                eval(ctx, "require('strings').upper('abc')").unwrap(),
                Value::String("ABC".into())
            );
            assert_eq!(
                eval(ctx, "require('strings').version").unwrap(),
                Value::String("1.2.3".into())
            );
            assert_eq!(
                eval(ctx, "require('strings') === require('strings')").unwrap(),
                Value::Bool(true)
            );
        });
    }

    #[test]
    fn unknown_modules_throw() {
        with_loader(|ctx| {
            let err = eval(ctx, "require('nope')").unwrap_err();
            assert_eq!(err.to_string(), "module 'nope' not found");
        });
    }

    #[test]
    fn script_modules_can_depend_on_native_ones() {
        let native = NativeModule::new("math", "1.0.0");
        native
            .register("mul", |a: f64, b: f64| Ok::<_, String>(a * b))
            .unwrap();

        let module = ScriptModule::new(
            "square",
            "1.0.0",
            "const math = require('math');\nreturn { square: (x) => math.mul(x, x) };",
            vec![Arc::new(native) as Arc<dyn Module>],
        )
        .unwrap();

        with_loader(|ctx| {
            module.inject(ctx).unwrap();
            assert_eq!(
                eval(ctx, "require('square').square(5)").unwrap(),
                Value::Number(25.0)
            );
        });
    }

    #[test]
    fn script_module_source_is_validated() {
        let err = ScriptModule::new("broken", "1.0.0", "return {", vec![]).err();
        assert!(matches!(err, Some(ScriptError::Compile { .. })));
    }

    #[test]
    fn script_module_source_is_not_run_when_checked() {
        // Would never return if checking ran the body.
        let module = ScriptModule::new("spin", "1.0.0", "while (true) {}", vec![]);
        assert!(module.is_ok());

        let module = ScriptModule::new("throws", "1.0.0", "throw new Error('ran')", vec![]);
        assert!(module.is_ok());
    }

    #[test]
    fn injection_needs_the_namespace() {
        let module = NativeModule::new("test", "1.0.0");
        with_loader(|ctx| {
            eval(ctx, "__loader.preload = 42").unwrap();
            let err = module.inject(ctx).unwrap_err();
            assert!(matches!(err, ScriptError::InvalidState(_)));
        });
    }
}
