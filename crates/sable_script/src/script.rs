//! The script container
//!
//! A [`Script`] owns a compiled program and a pool of execution contexts
//! built from it. Any number of threads may call [`Script::run`] at once;
//! each call borrows one context for its duration. [`Script::update`] swaps in
//! new source atomically: calls already running finish on the old pool, calls
//! that start afterwards see only the new one.

use std::io::Read;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::Lazy;
use sable_core::{IntoArgs, Value};

use crate::config::ScriptConfig;
use crate::context::RunContext;
use crate::error::{ScriptError, ScriptResult};
use crate::module::Module;
use crate::pool::Pool;
use crate::runtime::Program;

/// Pool size used when none is configured.
pub static DEFAULT_CONCURRENCY: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
});

enum State {
    Ready { program: Program, pool: Pool },
    /// The last update compiled but its pool could not be built
    Failed(String),
    Closed,
}

/// A named script with a pool of ready-to-run contexts.
pub struct Script {
    name: String,
    concurrency: usize,
    config: ScriptConfig,
    modules: Vec<Arc<dyn Module>>,
    state: RwLock<State>,
}

/// Builder for [`Script`].
pub struct ScriptBuilder {
    name: String,
    config: ScriptConfig,
    modules: Vec<Arc<dyn Module>>,
}

impl ScriptBuilder {
    /// Number of execution contexts; 0 means available parallelism.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn module<M: Module + 'static>(mut self, module: Arc<M>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn modules(mut self, modules: impl IntoIterator<Item = Arc<dyn Module>>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Replace the configuration. Call before `concurrency` if both are used.
    pub fn config(mut self, config: ScriptConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self, source: &str) -> ScriptResult<Script> {
        let concurrency = match self.config.concurrency {
            0 => *DEFAULT_CONCURRENCY,
            n => n,
        };

        let program = Program::compile(&self.name, source)?;
        let pool = Pool::build(&program, &self.modules, &self.config, concurrency)?;
        tracing::info!(
            "script {}: ready with {} execution contexts",
            self.name,
            concurrency
        );

        Ok(Script {
            name: self.name,
            concurrency,
            config: self.config,
            modules: self.modules,
            state: RwLock::new(State::Ready { program, pool }),
        })
    }

    pub fn build_from_reader(self, mut reader: impl Read) -> ScriptResult<Script> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.build(&source)
    }
}

impl Script {
    pub fn builder(name: impl Into<String>) -> ScriptBuilder {
        ScriptBuilder {
            name: name.into(),
            config: ScriptConfig::default(),
            modules: Vec::new(),
        }
    }

    /// Compile `source` and build `concurrency` contexts for it.
    pub fn new(
        name: impl Into<String>,
        source: &str,
        concurrency: usize,
        modules: Vec<Arc<dyn Module>>,
    ) -> ScriptResult<Self> {
        Self::builder(name)
            .concurrency(concurrency)
            .modules(modules)
            .build(source)
    }

    pub fn from_string(
        name: impl Into<String>,
        source: &str,
        modules: Vec<Arc<dyn Module>>,
    ) -> ScriptResult<Self> {
        Self::new(name, source, 0, modules)
    }

    pub fn from_reader(
        name: impl Into<String>,
        reader: impl Read,
        modules: Vec<Arc<dyn Module>>,
    ) -> ScriptResult<Self> {
        Self::builder(name).modules(modules).build_from_reader(reader)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// True while the script can accept calls.
    pub fn is_ready(&self) -> bool {
        self.read()
            .map(|state| matches!(*state, State::Ready { .. }))
            .unwrap_or(false)
    }

    /// Source of the program currently serving calls.
    pub fn source(&self) -> Option<String> {
        let state = self.read().ok()?;
        match &*state {
            State::Ready { program, .. } => Some(program.source().to_string()),
            _ => None,
        }
    }

    /// Call the entry point with `args` on a pooled context.
    ///
    /// Blocks while every context is busy, until one frees up or `cx` is done.
    pub fn run(&self, cx: &RunContext, args: impl IntoArgs) -> ScriptResult<Value> {
        let args = args.into_args();
        let state = self.read()?;
        match &*state {
            State::Ready { pool, .. } => {
                let lease = pool.acquire(cx)?;
                tracing::debug!("script {}: running with {} arguments", self.name, args.len());
                lease.run(cx, &args)
            }
            State::Failed(reason) => Err(ScriptError::InvalidState(reason.clone())),
            State::Closed => Err(closed()),
        }
    }

    /// Replace the program.
    ///
    /// A compile error leaves the current program serving calls. If the new
    /// program compiles but its contexts cannot be built, the script stops
    /// serving until a later update succeeds.
    pub fn update(&self, source: &str) -> ScriptResult<()> {
        if matches!(*self.read()?, State::Closed) {
            return Err(closed());
        }

        let program = Program::compile(&self.name, source)?;
        let pool = Pool::build(&program, &self.modules, &self.config, self.concurrency);

        let mut state = self.write()?;
        if matches!(*state, State::Closed) {
            return Err(closed());
        }
        match pool {
            Ok(pool) => {
                *state = State::Ready { program, pool };
                tracing::info!("script {}: updated", self.name);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("script {}: update failed to build contexts: {}", self.name, err);
                *state = State::Failed(err.to_string());
                Err(err)
            }
        }
    }

    pub fn update_from_reader(&self, mut reader: impl Read) -> ScriptResult<()> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.update(&source)
    }

    /// Drop every pooled context. Later calls fail with `InvalidState`.
    ///
    /// Waits for calls in flight. Closing twice is not an error.
    pub fn close(&self) -> ScriptResult<()> {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !matches!(*state, State::Closed) {
            *state = State::Closed;
            tracing::info!("script {}: closed", self.name);
        }
        Ok(())
    }

    /// Run on tokio's blocking pool so async callers never stall a reactor thread.
    #[cfg(feature = "async")]
    pub async fn run_async(self: Arc<Self>, cx: RunContext, args: Vec<Value>) -> ScriptResult<Value> {
        tokio::task::spawn_blocking(move || self.run(&cx, args))
            .await
            .map_err(|err| ScriptError::runtime(err.to_string()))?
    }

    fn read(&self) -> ScriptResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| ScriptError::InvalidState("script lock is poisoned".to_string()))
    }

    fn write(&self) -> ScriptResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| ScriptError::InvalidState("script lock is poisoned".to_string()))
    }
}

fn closed() -> ScriptError {
    ScriptError::InvalidState("script is closed".to_string())
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("name", &self.name)
            .field("concurrency", &self.concurrency)
            .field("modules", &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_concurrency_is_positive() {
        assert!(*DEFAULT_CONCURRENCY >= 1);
        let script = Script::from_string("default", "function main() {}", vec![]).unwrap();
        assert_eq!(script.concurrency(), *DEFAULT_CONCURRENCY);
    }

    #[test]
    fn explicit_concurrency() {
        let script = Script::new("ten", "function main() {}", 10, vec![]).unwrap();
        assert_eq!(script.concurrency(), 10);
        assert_eq!(script.name(), "ten");
    }

    #[test]
    fn empty_script_returns_nil() {
        let script = Script::new("empty", "function main() {}", 1, vec![]).unwrap();
        let result = script.run(&RunContext::background(), ()).unwrap();
        assert_eq!(result, Value::Nil);
    }

    #[test]
    fn from_reader() {
        let source: &[u8] = b"function main(x) { return x * 2 }";
        let script = Script::from_reader("reader", source, vec![]).unwrap();
        let result = script.run(&RunContext::background(), (21,)).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn close_is_final() {
        let script = Script::new("closing", "function main() { return 1 }", 1, vec![]).unwrap();
        script.close().unwrap();
        assert!(!script.is_ready());
        assert!(matches!(
            script.run(&RunContext::background(), ()),
            Err(ScriptError::InvalidState(_))
        ));
        assert!(matches!(
            script.update("function main() { return 2 }"),
            Err(ScriptError::InvalidState(_))
        ));
        assert!(script.close().is_ok());
    }
}
