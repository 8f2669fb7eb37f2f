//! Script configuration

use serde::{Deserialize, Serialize};

/// Settings applied to every execution context a script builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Pool size; 0 means the available parallelism of the machine
    pub concurrency: usize,

    /// Global function called by `Script::run`
    pub entry_point: String,

    /// Per-context heap limit in bytes (0 = unlimited)
    pub memory_limit: usize,

    /// Per-context stack limit in bytes (0 = engine default)
    pub max_stack_size: usize,

    /// Allocation threshold that triggers a GC pass (0 = engine default)
    pub gc_threshold: usize,

    /// Aggregate argument containers kept for reuse per context
    pub scratch_capacity: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            entry_point: "main".to_string(),
            memory_limit: 0,
            max_stack_size: 1024 * 1024,
            gc_threshold: 0,
            scratch_capacity: 16,
        }
    }
}

impl ScriptConfig {
    /// True when `entry_point` is a plain identifier.
    pub(crate) fn entry_point_is_valid(&self) -> bool {
        let mut chars = self.entry_point.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    }
}
