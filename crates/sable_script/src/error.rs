//! Script error types

use rquickjs::{CaughtError, Ctx};
use thiserror::Error;

/// Errors produced while building, updating or running a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script '{name}' failed to compile: {message}")]
    Compile { name: String, message: String },

    #[error("cannot bind '{name}': {reason}")]
    InvalidSignature { name: String, reason: String },

    #[error("script is not in a valid state: {0}")]
    InvalidState(String),

    /// A guest error, including errors raised by native functions.
    /// `message` is exactly what was thrown.
    #[error("{message}")]
    Runtime {
        message: String,
        stack: Option<String>,
    },

    #[error("script execution was cancelled")]
    Cancelled,

    #[error("script execution timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("failed to read script source: {0}")]
    Read(String),
}

pub type ScriptResult<T> = Result<T, ScriptError>;

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime {
            message: message.into(),
            stack: None,
        }
    }

    /// The thrown message for guest errors.
    pub fn message(&self) -> Option<&str> {
        match self {
            ScriptError::Runtime { message, .. } => Some(message),
            _ => None,
        }
    }

    /// True for the cancellation flavours of a runtime error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ScriptError::Cancelled | ScriptError::Timeout { .. })
    }

    /// Turn an engine error into a [`ScriptError`], taking the pending
    /// exception off the context when there is one.
    pub(crate) fn caught(ctx: &Ctx<'_>, err: rquickjs::Error) -> Self {
        match CaughtError::from_error(ctx, err) {
            CaughtError::Exception(ex) => ScriptError::Runtime {
                message: ex.message().unwrap_or_default(),
                stack: ex.stack().filter(|s| !s.is_empty()),
            },
            CaughtError::Value(value) => {
                ScriptError::runtime(crate::convert::from_guest(&value).to_string())
            }
            CaughtError::Error(err) => ScriptError::runtime(err.to_string()),
        }
    }
}

/// Errors raised without a context to catch from (allocation, runtime setup).
impl From<rquickjs::Error> for ScriptError {
    fn from(err: rquickjs::Error) -> Self {
        ScriptError::runtime(err.to_string())
    }
}

/// Map engine results inside a context, collecting any pending exception.
pub(crate) trait GuestResultExt<T> {
    fn guest(self, ctx: &Ctx<'_>) -> ScriptResult<T>;
}

impl<T> GuestResultExt<T> for rquickjs::Result<T> {
    fn guest(self, ctx: &Ctx<'_>) -> ScriptResult<T> {
        self.map_err(|err| ScriptError::caught(ctx, err))
    }
}

impl From<std::io::Error> for ScriptError {
    fn from(err: std::io::Error) -> Self {
        ScriptError::Read(err.to_string())
    }
}
