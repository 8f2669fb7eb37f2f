//! Compiled programs and execution contexts
//!
//! A [`Program`] is syntax-checked source, immutable and shared by every
//! context built from it. An [`ExecutionContext`] owns one QuickJS runtime
//! with one context in which the program's top level has already run, the
//! modules are injected and the entry point is resolved.

use std::cell::RefCell;
use std::ffi::{c_int, CString};
use std::sync::{Arc, Mutex, PoisonError};

use rquickjs::function::{Args, Rest};
use rquickjs::{qjs, Context, Ctx, Function, JsLifetime, Object, Runtime, Value as JsValue};
use sable_core::Value;

use crate::config::ScriptConfig;
use crate::context::RunContext;
use crate::convert::{from_guest, Scratch};
use crate::error::{GuestResultExt, ScriptError, ScriptResult};
use crate::json::JsonModule;
use crate::module::{self, Module};

/// Source that parsed successfully.
#[derive(Debug, Clone)]
pub struct Program {
    name: Arc<str>,
    source: Arc<str>,
}

impl Program {
    /// Check `source` for syntax errors without running any of it.
    pub fn compile(name: &str, source: &str) -> ScriptResult<Self> {
        check_syntax(name, source)?;
        Ok(Self {
            name: Arc::from(name),
            source: Arc::from(source),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Parse `source` as global code in a throwaway context. Nothing is executed.
pub(crate) fn check_syntax(name: &str, source: &str) -> ScriptResult<()> {
    let runtime = Runtime::new()?;
    let context = Context::full(&runtime)?;
    context.with(|ctx| match compile_only(&ctx, name, source) {
        Ok(()) => Ok(()),
        Err(err) => Err(ScriptError::Compile {
            name: name.to_string(),
            message: ScriptError::caught(&ctx, err).to_string(),
        }),
    })
}

fn compile_only(ctx: &Ctx<'_>, name: &str, source: &str) -> rquickjs::Result<()> {
    let file_name = CString::new(name)?;
    let len = source.len();
    let source = CString::new(source)?;
    let flags = (qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY) as c_int;

    let raw = ctx.as_raw().as_ptr();
    // SAFETY: `raw` is the live context `ctx` borrows and both strings are
    // NUL-terminated. A compile-only eval returns either an exception marker,
    // left pending on the context, or a bytecode object we own and free here.
    unsafe {
        let compiled = qjs::JS_Eval(raw, source.as_ptr(), len as _, file_name.as_ptr(), flags);
        if qjs::JS_IsException(compiled) {
            return Err(rquickjs::Error::Exception);
        }
        qjs::JS_FreeValue(raw, compiled);
    }
    Ok(())
}

/// Wrap a function body so it parses and evaluates as one function expression.
pub(crate) fn wrap_body(body: &str) -> String {
    format!("(function () {{\n{}\n}})", body)
}

/// Per-context state that holds guest references.
#[derive(JsLifetime)]
struct ContextState<'js> {
    entry: Option<Function<'js>>,
    scratch: RefCell<Scratch<'js>>,
}

/// One isolated interpreter ready to run a program's entry point.
///
/// Used by one caller at a time; the pool hands contexts out and takes them
/// back.
pub struct ExecutionContext {
    name: Arc<str>,
    entry_point: String,
    watch: Arc<Mutex<Option<RunContext>>>,
    context: Context,
    #[allow(dead_code)] // Kept alive for context lifetime
    runtime: Runtime,
}

impl ExecutionContext {
    pub fn new(
        program: &Program,
        modules: &[Arc<dyn Module>],
        config: &ScriptConfig,
    ) -> ScriptResult<Self> {
        if !config.entry_point_is_valid() {
            return Err(ScriptError::InvalidState(format!(
                "invalid entry point '{}'",
                config.entry_point
            )));
        }

        let runtime = Runtime::new()?;
        if config.memory_limit > 0 {
            runtime.set_memory_limit(config.memory_limit);
        }
        if config.max_stack_size > 0 {
            runtime.set_max_stack_size(config.max_stack_size);
        }
        if config.gc_threshold > 0 {
            runtime.set_gc_threshold(config.gc_threshold);
        }

        let watch: Arc<Mutex<Option<RunContext>>> = Arc::default();
        let hook = Arc::clone(&watch);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            hook.lock()
                .map(|cx| cx.as_ref().is_some_and(RunContext::is_done))
                .unwrap_or(false)
        })));

        let context = Context::full(&runtime)?;
        context.with(|ctx| -> ScriptResult<()> {
            // Built before any guest code runs so it holds untouched intrinsics.
            let scratch = Scratch::new(&ctx, config.scratch_capacity).guest(&ctx)?;

            install_print(&ctx, Arc::clone(&program.name))?;
            module::install_loader(&ctx)?;
            JsonModule.inject(&ctx)?;
            for module in modules {
                module.inject(&ctx)?;
            }

            ctx.eval::<(), _>(program.source()).guest(&ctx)?;

            let entry = resolve_entry(&ctx, &config.entry_point)?;
            if entry.is_none() {
                tracing::debug!(
                    "script {}: entry point '{}' is not defined",
                    program.name(),
                    config.entry_point
                );
            }

            ctx.store_userdata(ContextState {
                entry,
                scratch: RefCell::new(scratch),
            })
            .map_err(|_| ScriptError::InvalidState("context state is in use".to_string()))?;
            Ok(())
        })?;

        Ok(Self {
            name: Arc::clone(&program.name),
            entry_point: config.entry_point.clone(),
            watch,
            context,
            runtime,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_entry_point(&self) -> bool {
        self.context.with(|ctx| {
            ctx.userdata::<ContextState>()
                .is_some_and(|state| state.entry.is_some())
        })
    }

    /// Call the entry point with `args` and decode its result.
    ///
    /// `cx` is observed by the interpreter while the guest runs; when it
    /// fires the call unwinds and the cancellation error is returned.
    pub fn run(&self, cx: &RunContext, args: &[Value]) -> ScriptResult<Value> {
        if cx.is_done() {
            return Err(cx.error());
        }

        self.set_watch(Some(cx.clone()));
        let result = self.context.with(|ctx| self.call(&ctx, args));
        self.set_watch(None);

        match result {
            Err(ScriptError::Runtime { .. }) if cx.is_done() => Err(cx.error()),
            other => other,
        }
    }

    fn call<'js>(&self, ctx: &Ctx<'js>, args: &[Value]) -> ScriptResult<Value> {
        let state = ctx.userdata::<ContextState>().ok_or_else(|| {
            ScriptError::InvalidState("execution context is not initialised".to_string())
        })?;
        let Some(entry) = state.entry.clone() else {
            return Err(ScriptError::InvalidState(format!(
                "entry point '{}' is not a function",
                self.entry_point
            )));
        };

        let converted = state.scratch.borrow_mut().args(ctx, args);
        let result = converted
            .and_then(|guest_args| {
                let mut call = Args::new(ctx.clone(), guest_args.len());
                for arg in guest_args {
                    call.push_arg(arg)?;
                }
                call.apply::<JsValue>(&entry)
            })
            .map(|value| from_guest(&value))
            .guest(ctx);

        state.scratch.borrow_mut().reclaim();
        result
    }

    fn set_watch(&self, cx: Option<RunContext>) {
        *self.watch.lock().unwrap_or_else(PoisonError::into_inner) = cx;
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // Release guest references before the runtime goes away.
        self.context.with(|ctx| {
            let _ = ctx.remove_userdata::<ContextState>();
        });
    }
}

fn resolve_entry<'js>(ctx: &Ctx<'js>, name: &str) -> ScriptResult<Option<Function<'js>>> {
    let lookup = format!("typeof {0} === 'function' ? {0} : undefined", name);
    let value: JsValue = ctx.eval(lookup).guest(ctx)?;
    Ok(value.into_function())
}

/// `print(...)` and `console.log(...)`, routed to the log.
fn install_print<'js>(ctx: &Ctx<'js>, script: Arc<str>) -> ScriptResult<()> {
    let print = Function::new(ctx.clone(), move |args: Rest<JsValue<'js>>| {
        let line = args
            .0
            .iter()
            .map(|value| from_guest(value).to_string())
            .collect::<Vec<_>>()
            .join("\t");
        tracing::info!(target: "sable_script::guest", script = %script, "{}", line);
    })
    .and_then(|f| f.with_name("print"))
    .guest(ctx)?;

    let console = Object::new(ctx.clone()).guest(ctx)?;
    console.set("log", print.clone()).guest(ctx)?;
    ctx.globals().set("console", console).guest(ctx)?;
    ctx.globals().set("print", print).guest(ctx)
}
