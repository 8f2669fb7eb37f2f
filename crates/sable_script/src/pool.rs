//! Fixed-size pool of execution contexts

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use sable_core::Value;

use crate::config::ScriptConfig;
use crate::context::RunContext;
use crate::error::{ScriptError, ScriptResult};
use crate::module::Module;
use crate::runtime::{ExecutionContext, Program};

/// How often a blocked `acquire` rechecks its run context.
const ACQUIRE_POLL: Duration = Duration::from_millis(10);

/// Idle contexts wait in a bounded channel. Taking one out is the only
/// place a caller blocks; putting one back never does.
pub struct Pool {
    sender: Sender<ExecutionContext>,
    receiver: Receiver<ExecutionContext>,
    size: usize,
}

impl Pool {
    /// Build `size` contexts for `program`. Any failure fails the whole pool.
    pub fn build(
        program: &Program,
        modules: &[Arc<dyn Module>],
        config: &ScriptConfig,
        size: usize,
    ) -> ScriptResult<Self> {
        let size = size.max(1);
        let (sender, receiver) = bounded(size);
        for _ in 0..size {
            let context = ExecutionContext::new(program, modules, config)?;
            sender
                .try_send(context)
                .map_err(|_| ScriptError::InvalidState("pool overflow while building".to_string()))?;
        }
        tracing::debug!("script {}: built {} execution contexts", program.name(), size);

        Ok(Self {
            sender,
            receiver,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Contexts currently waiting to be used.
    pub fn idle(&self) -> usize {
        self.receiver.len()
    }

    /// Take a context, waiting until one is free or `cx` is done.
    pub fn acquire(&self, cx: &RunContext) -> ScriptResult<Lease<'_>> {
        loop {
            if cx.is_done() {
                return Err(cx.error());
            }

            let wait = match cx.deadline() {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(ACQUIRE_POLL),
                None => ACQUIRE_POLL,
            };

            match self.receiver.recv_timeout(wait) {
                Ok(context) => {
                    return Ok(Lease {
                        pool: self,
                        context: Some(context),
                    })
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ScriptError::InvalidState("pool is closed".to_string()))
                }
            }
        }
    }

    /// Put a context back. A full pool drops it instead.
    pub fn release(&self, context: ExecutionContext) {
        match self.sender.try_send(context) {
            Ok(()) => {}
            Err(TrySendError::Full(context)) | Err(TrySendError::Disconnected(context)) => {
                tracing::warn!(
                    "script {}: pool is full, discarding execution context",
                    context.name()
                );
            }
        }
    }
}

/// A context on loan from a [`Pool`]; returned when dropped.
pub struct Lease<'a> {
    pool: &'a Pool,
    context: Option<ExecutionContext>,
}

impl Lease<'_> {
    pub fn run(&self, cx: &RunContext, args: &[Value]) -> ScriptResult<Value> {
        match &self.context {
            Some(context) => context.run(cx, args),
            None => Err(ScriptError::InvalidState("lease already released".to_string())),
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.release(context);
        }
    }
}
