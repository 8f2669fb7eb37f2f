//! Sable Core
//!
//! The host side of the script boundary:
//! - `Value`, the closed set of shapes that may cross into or out of a script
//! - Conversions from ordinary host data (and a serde fallback for everything else)
//! - Typed extraction and argument packing used by the native binder

pub mod args;
pub mod convert;
pub mod extract;
pub mod value;

pub use args::IntoArgs;
pub use extract::FromValue;
pub use value::{Table, Value, ValueType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
