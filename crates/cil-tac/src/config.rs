//! Compiler configuration

use serde::{Deserialize, Serialize};

/// Configuration for the compilation pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Duplicate finally handlers at every structured exit (default: true)
    pub inline_finally: bool,
    /// Rewrite remaining `leave` statements to plain jumps (default: true)
    pub lower_leaves: bool,
    /// Expand `InitializeArray` calls into element stores (default: true)
    pub inline_array_initializers: bool,
    /// Maximum translations of a single block before giving up (default: 64)
    pub max_block_visits: usize,
    /// Check the finished body for dangling targets and bad scopes (default: true)
    pub verify_output: bool,
    /// Worker threads for multi-method compilation; 0 uses all cores (default: 0)
    pub worker_threads: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            inline_finally: true,
            lower_leaves: true,
            inline_array_initializers: true,
            max_block_visits: 64,
            verify_output: true,
            worker_threads: 0,
        }
    }
}

impl CompilerConfig {
    /// Load a (possibly partial) JSON document over the defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Effective number of worker threads
    pub fn workers(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CompilerConfig::from_json(r#"{ "inline_finally": false, "worker_threads": 3 }"#).unwrap();
        assert!(!config.inline_finally);
        assert!(config.lower_leaves);
        assert_eq!(config.max_block_visits, 64);
        assert_eq!(config.workers(), 3);
    }

    #[test]
    fn test_default_workers() {
        assert!(CompilerConfig::default().workers() >= 1);
    }

    #[test]
    fn test_unknown_field_is_ignored() {
        assert!(CompilerConfig::from_json(r#"{ "colour": "blue" }"#).is_ok());
    }
}
