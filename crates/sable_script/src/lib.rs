//! Sable Scripting
//!
//! Embeds JavaScript (QuickJS) behind a host API that never exposes the
//! interpreter's own value types.
//!
//! ## Architecture
//!
//! - **Binder:** wraps typed Rust closures as guest functions, with direct
//!   adapters for the common scalar shapes
//! - **Modules:** named collections of host or guest functions, reached from
//!   scripts with `require(name)`
//! - **Script:** a compiled program plus a pool of execution contexts; safe to
//!   call from many threads and to hot-swap with `update`
//!
//! ```no_run
//! use std::sync::Arc;
//! use sable_script::{NativeModule, RunContext, Script, Value};
//!
//! let host = Arc::new(NativeModule::new("host", "1.0.0"));
//! host.register("sum", |a: f64, b: f64| Ok::<_, String>(a + b)).unwrap();
//!
//! let script = Script::builder("example")
//!     .concurrency(4)
//!     .module(host)
//!     .build("const host = require('host'); function main(a, b) { return host.sum(a, b) }")
//!     .unwrap();
//!
//! let total = script.run(&RunContext::background(), (2, 3)).unwrap();
//! assert_eq!(total, Value::Number(5.0));
//! ```

pub mod binder;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod json;
pub mod module;
pub mod pool;
pub mod runtime;
pub mod script;

pub use binder::{Binder, BoundFunction, IntoNative, IntoReturn, NativeFn, Signature};
pub use config::ScriptConfig;
pub use context::RunContext;
pub use error::{ScriptError, ScriptResult};
pub use json::{JsonModule, JSON_MODULE};
pub use module::{Module, NativeModule, ScriptModule};
pub use pool::Pool;
pub use runtime::{ExecutionContext, Program};
pub use script::{Script, ScriptBuilder, DEFAULT_CONCURRENCY};

pub use sable_core::{FromValue, IntoArgs, Table, Value, ValueType};

pub use rquickjs;
